//! Extension contracts implemented per coin
//!
//! The engine never inspects concrete coin types beyond these traits; coin
//! code downcasts through `as_any` at its own call sites.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::stratum::session::TcpSession;
use crate::stratum::worker::Worker;

/// Unique job identifier, rendered decimal on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl JobId {
    /// Allocate a random job id
    pub fn random() -> Self {
        Self(rand::random::<u64>())
    }

    /// Parse a decimal job id string
    pub fn from_decimal(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| crate::error::Error::protocol(format!("invalid job id {s:?}")))
    }

    /// Parse a hexadecimal job id string
    pub fn from_hex(s: &str) -> Result<Self> {
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| crate::error::Error::protocol(format!("invalid job id {s:?}")))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verification state of a submitted share, terminal once set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareState {
    /// Not yet verified
    Unverified,
    /// Rejected, see the reject reason
    Rejected,
    /// Meets the job difficulty
    Accepted,
    /// Meets the network difficulty, ready for node submission
    Block,
}

impl fmt::Display for ShareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unverified => "unverified",
            Self::Rejected => "rejected",
            Self::Accepted => "accepted",
            Self::Block => "block found",
        };
        f.write_str(s)
    }
}

/// Why a share was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not set
    Undefined,
    /// Accepted share, no rejection
    Pass,
    /// No matching job in history
    InvalidJob,
    /// No authorized worker on the session
    InvalidWorker,
    /// Share already seen
    Duplicate,
    /// Job height no longer matches the current template
    Stale,
    /// Below the required difficulty
    LowDifficulty,
    /// Incorrect solution
    InvalidSolution,
}

impl RejectReason {
    /// Map the reason onto the client-facing stratum error code
    pub fn to_stratum_error(self) -> crate::stratum::protocol::StratumError {
        use crate::stratum::protocol::StratumError;
        match self {
            Self::InvalidJob | Self::Stale => StratumError::JobNotFound,
            Self::InvalidWorker => StratumError::Unauthorized,
            Self::Duplicate => StratumError::DuplicateShare,
            Self::LowDifficulty => StratumError::LowDifficultyShare,
            Self::InvalidSolution => StratumError::InvalidSolution,
            Self::Pass | Self::Undefined => StratumError::Unknown,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undefined => "undefined",
            Self::Pass => "no error",
            Self::InvalidJob => "invalid job",
            Self::InvalidWorker => "invalid worker",
            Self::Duplicate => "duplicate share",
            Self::Stale => "stale share",
            Self::LowDifficulty => "low diff share",
            Self::InvalidSolution => "invalid solution",
        };
        f.write_str(s)
    }
}

/// Snapshot of the work currently being mined. Immutable; replaced, never
/// mutated in place.
pub trait BlockTemplate: Send + Sync {
    /// Create a new job for the given session
    fn create_job(&self, session: &Arc<TcpSession>) -> Result<Arc<dyn Job>>;

    /// Compare with a candidate template.
    ///
    /// Returns 0 when the candidate is identical by domain identity (same
    /// previous-block hash); a negative value means the candidate always
    /// supersedes. Height-based staleness is advisory only.
    fn compare(&self, candidate: &dyn BlockTemplate) -> i32;

    /// Downcast hook for coin call sites
    fn as_any(&self) -> &dyn Any;
}

/// One unit of assigned work, immutable once created
pub trait Job: Send + Sync {
    /// Unique job id
    fn id(&self) -> JobId;

    /// Job difficulty
    fn difficulty(&self) -> u64;

    /// Encode the job as a wire message ready to send to the client
    fn encode(&self) -> Result<Value>;

    /// Target string plus whether to notify target and/or difficulty before
    /// the job (needed by some coin protocols, unused by others)
    fn target_info(&self) -> (String, bool, bool);

    /// Downcast hook for coin call sites
    fn as_any(&self) -> &dyn Any;
}

/// One submitted candidate result from a worker
pub trait Share: Send + Sync {
    /// Update the verification state
    fn update_state(&mut self, state: ShareState, reason: RejectReason);

    /// Current verification state
    fn state(&self) -> ShareState;

    /// Reject reason, meaningful when rejected
    fn reason(&self) -> RejectReason;

    /// The worker that submitted the share
    fn worker(&self) -> &Worker;

    /// Downcast hook for coin call sites
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast hook for verifiers
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Proof-of-work verification dependency.
///
/// May serialize internally (e.g. a native hashing library behind a global
/// lock); the engine tolerates that but adds no serialization of its own.
pub trait Verifier: Send + Sync {
    /// Verify the share, updating its state as a side effect
    fn verify(&self, share: &mut dyn Share) -> Result<()>;
}

/// Decodes one raw line into a coin-specific request
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Decode a raw message. Implementations may reply with a protocol
    /// error before returning `Err`, which closes the session.
    async fn decode(&self, data: &str, session: &Arc<TcpSession>) -> Result<Box<dyn Request>>;
}

/// A decoded inbound request
#[async_trait]
pub trait Request: Send + Sync {
    /// Method name, for logging
    fn name(&self) -> &'static str;

    /// Handle the request. Return an error only when the session must close.
    async fn handle(&self, session: &Arc<TcpSession>) -> Result<()>;

    /// Forward the request instead of handling it (banned miners)
    async fn forward(&self, _session: &Arc<TcpSession>) -> Result<()> {
        Ok(())
    }

    /// Returns (miner is in the ban list, session must close regardless)
    fn check_miner(&self, _session: &Arc<TcpSession>) -> (bool, bool) {
        (false, false)
    }
}

/// Block synchronization with the upstream node
#[async_trait]
pub trait NodeSyncer: Send + Sync {
    /// Pull the latest block template from the node.
    /// Returns `None` when no new block is available.
    async fn pull(&self) -> Result<Option<Arc<dyn BlockTemplate>>>;

    /// Submit an accepted share (block) to the node
    async fn submit(&self, share: Box<dyn Share>) -> Result<()>;
}

/// Coin-specific per-session payload
pub trait SessionData: Send + Sync {
    /// The worker authorized on this session, if any
    fn worker(&self) -> Option<Worker>;

    /// Record the authorized worker
    fn set_worker(&self, worker: Worker);

    /// Called when the session's outstanding jobs are dropped; coins discard
    /// per-job bookkeeping (submitted-share records) here
    fn clear_submissions(&self) {}

    /// Downcast hook for coin call sites
    fn as_any(&self) -> &dyn Any;
}

/// Builds the per-session coin payload at accept time
pub trait SessionDataBuilder: Send + Sync {
    /// Build a new session data value for the given session id
    fn build(&self, session_id: u32) -> Arc<dyn SessionData>;
}

/// Per-port share difficulty. Static here; the vardiff extension point.
#[derive(Debug)]
pub struct DiffAdjust {
    diff: u64,
}

impl DiffAdjust {
    /// Create with a fixed difficulty
    pub fn new(diff: u64) -> Self {
        Self { diff }
    }

    /// Current difficulty
    pub fn diff(&self) -> u64 {
        self.diff
    }
}
