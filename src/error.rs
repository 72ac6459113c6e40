//! Error types for the pool server
//!
//! One crate-wide error enum built on `thiserror`. Handler errors returned
//! from a session dispatch loop terminate only that session; `BannedMiner`
//! is a distinguished value that callers treat as expected rather than a
//! failure.

use thiserror::Error;

/// Main error type for the pool server
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP errors from the node RPC client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Protocol-level errors (bad state, malformed fields, unknown method)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Access from a miner currently in the ban table
    #[error("banned miner access")]
    BannedMiner,

    /// No block template has been installed yet
    #[error("can't get block template")]
    NoBlockTemplate,

    /// Oversized single line on the wire
    #[error("socket flood detected")]
    Flood,

    /// Upstream node reported an error
    #[error("node error: {0}")]
    Node(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for the pool server
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a node error
    pub fn node(msg: impl Into<String>) -> Self {
        Self::Node(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for the distinguished banned-miner error
    pub fn is_banned(&self) -> bool {
        matches!(self, Self::BannedMiner)
    }
}
