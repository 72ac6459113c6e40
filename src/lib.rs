//! # Stratum Pool
//!
//! A coin-agnostic stratum mining-pool server engine. The engine owns the
//! TCP sessions, job distribution, share bookkeeping, ban control and block
//! template synchronization; everything coin-specific plugs in through a
//! small set of trait contracts.
//!
//! ## Architecture
//!
//! One task per session read loop and one per session job scheduler, a pump
//! task polling the upstream node for templates, and an accept loop guarded
//! by a connection-ceiling semaphore. All shared state lives in
//! [`stratum::ServerState`]. The `coins::btm` module is one concrete
//! protocol dialect built on the engine.

#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_lifetimes,
    unused_qualifications,
    clippy::all
)]
#![forbid(unsafe_code)]

pub mod coins;
pub mod config;
pub mod error;
pub mod stratum;
pub mod utils;

pub use crate::error::{Error, Result};
pub use config::PoolConfig;
pub use stratum::ServerState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        config::PoolConfig,
        error::{Error, Result},
        stratum::{
            BlockTemplate, Decoder, DiffAdjust, Job, JobId, NodeSyncer, Request, ServerState,
            SessionBuilder, SessionData, SessionDataBuilder, Share, ShareState, StratumListener,
            TcpSession, Verifier, Worker,
        },
    };
}
