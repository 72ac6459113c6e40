//! Wire structures for the btm stratum dialect
//!
//! All numeric header fields travel as 16-char little-endian hex strings;
//! hashes stay big-endian hex as the node reports them.

use serde::{Deserialize, Serialize};

/// Encode a u64 as little-endian hex, always 16 chars
pub fn to_le_hex(value: u64) -> String {
    hex::encode(value.to_le_bytes())
}

/// Parameters of the `login` method
#[derive(Debug, Clone, Deserialize)]
pub struct LoginParams {
    /// `account.worker` login pair
    pub login: String,
    /// Password, unused by this pool
    #[serde(default)]
    pub pass: String,
    /// Client agent string
    #[serde(default)]
    pub agent: String,
}

/// Parameters of the `submit` method
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitParams {
    /// Miner id, must match the login pair
    pub id: String,
    /// Decimal job id the share was mined against
    pub job_id: String,
    /// Hex nonce, 1..=16 lowercase hex chars
    pub nonce: String,
    /// Optional hash claimed by the miner
    #[serde(default)]
    pub result: String,
}

/// Result body of a successful login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReply {
    /// Echo of the login name
    pub id: String,
    /// The first job
    pub job: JobReplyData,
    /// Always `"OK"`
    pub status: String,
}

/// One job as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct JobReplyData {
    pub version: String,
    pub height: String,
    pub previous_block_hash: String,
    pub timestamp: String,
    pub transactions_merkle_root: String,
    pub transaction_status_hash: String,
    pub nonce: String,
    pub bits: String,
    pub job_id: String,
    pub seed: String,
    pub target: String,
}

/// Result body of an accepted submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    /// Always `"OK"`
    pub status: String,
}

impl StatusReply {
    /// The canonical accepted reply
    pub fn ok() -> Self {
        Self {
            status: "OK".to_string(),
        }
    }
}
