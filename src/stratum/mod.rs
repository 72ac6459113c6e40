//! Coin-agnostic stratum server engine
//!
//! The engine owns sockets, sessions, job distribution, share bookkeeping
//! and ban control; everything coin-specific enters through the trait
//! contracts in [`traits`].

pub mod conn_control;
pub mod history;
pub mod listener;
pub mod protocol;
pub mod session;
pub mod session_id;
pub mod state;
pub mod sync;
pub mod traits;
pub mod worker;

pub use conn_control::{ConnControlConfig, ConnectionControl, SessionCounters};
pub use history::{JobHistory, JOB_HISTORY_CAPACITY};
pub use listener::StratumListener;
pub use protocol::{ErrorReply, RpcNotification, RpcRequest, RpcResponse, StratumError};
pub use session::{SessionBuilder, SessionState, TcpSession};
pub use session_id::SessionIdManager;
pub use state::ServerState;
pub use sync::NodeSyncPump;
pub use traits::{
    BlockTemplate, Decoder, DiffAdjust, Job, JobId, NodeSyncer, RejectReason, Request, SessionData,
    SessionDataBuilder, Share, ShareState, Verifier,
};
pub use worker::Worker;
