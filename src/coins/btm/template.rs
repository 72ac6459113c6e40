//! Block template and job for the btm coin
//!
//! A template is an immutable snapshot of the node's current work; a job is
//! that snapshot pinned to one session's nonce space and difficulty.

use std::any::Any;
use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::One;
use serde_json::Value;
use tracing::{info, warn};

use crate::coins::btm::messages::{to_le_hex, JobReply, JobReplyData};
use crate::coins::btm::session_data::BtmSessionData;
use crate::error::{Error, Result};
use crate::stratum::protocol::RpcNotification;
use crate::stratum::session::TcpSession;
use crate::stratum::traits::{BlockTemplate, Job, JobId};

/// 2^256, the proof-of-work range
pub fn pow_max() -> BigUint {
    BigUint::one() << 256u32
}

/// Target for a difficulty: `2^256 / diff`, clamped into 256 bits
pub fn diff_to_target(diff: u64) -> BigUint {
    if diff <= 1 {
        pow_max() - BigUint::one()
    } else {
        pow_max() / BigUint::from(diff)
    }
}

/// Wire target for a difficulty: first 4 bytes of the padded 256-bit
/// target, byte-reversed, hex encoded
pub fn target_hex(diff: u64) -> String {
    let bytes = diff_to_target(diff).to_bytes_be();
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(&bytes);
    let mut prefix = padded[..4].to_vec();
    prefix.reverse();
    hex::encode(prefix)
}

/// One snapshot of the node's current work
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct BtmBlockTemplate {
    pub version: u64,
    pub height: u64,
    pub previous_block_hash: String,
    pub timestamp: u64,
    pub transactions_merkle_root: String,
    pub transaction_status_hash: String,
    pub nonce: u64,
    pub bits: u64,
    pub seed: String,
}

impl BlockTemplate for BtmBlockTemplate {
    fn create_job(&self, session: &Arc<TcpSession>) -> Result<Arc<dyn Job>> {
        let data = session
            .data()
            .as_any()
            .downcast_ref::<BtmSessionData>()
            .ok_or_else(|| Error::protocol("unexpected session data type"))?;
        let job = BtmJob {
            id: JobId::random(),
            version: self.version,
            height: self.height,
            previous_block_hash: self.previous_block_hash.clone(),
            timestamp: self.timestamp,
            transactions_merkle_root: self.transactions_merkle_root.clone(),
            transaction_status_hash: self.transaction_status_hash.clone(),
            bits: self.bits,
            seed: self.seed.clone(),
            nonce: data.nonce_prefix(),
            diff: session.diff(),
        };
        info!(
            session_id = session.id(),
            session_ip = %session.ip(),
            job_id = %job.id,
            job_diff = job.diff,
            height = self.height,
            "generate new job"
        );
        Ok(Arc::new(job))
    }

    fn compare(&self, candidate: &dyn BlockTemplate) -> i32 {
        let Some(other) = candidate.as_any().downcast_ref::<BtmBlockTemplate>() else {
            return -1;
        };
        if self.previous_block_hash == other.previous_block_hash {
            return 0;
        }
        if other.height <= self.height {
            warn!(
                old_height = self.height,
                new_height = other.height,
                old_prevhash = %self.previous_block_hash,
                new_prevhash = %other.previous_block_hash,
                "template height went backwards"
            );
        }
        // a changed previous hash always supersedes, newer or older
        -1
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A job handed to one session
#[derive(Debug, Clone)]
pub struct BtmJob {
    pub(crate) id: JobId,
    pub(crate) version: u64,
    pub(crate) height: u64,
    pub(crate) previous_block_hash: String,
    pub(crate) timestamp: u64,
    pub(crate) transactions_merkle_root: String,
    pub(crate) transaction_status_hash: String,
    pub(crate) bits: u64,
    pub(crate) seed: String,
    pub(crate) nonce: u64,
    pub(crate) diff: u64,
}

impl BtmJob {
    fn reply_data(&self) -> JobReplyData {
        JobReplyData {
            version: to_le_hex(self.version),
            height: to_le_hex(self.height),
            previous_block_hash: self.previous_block_hash.clone(),
            timestamp: to_le_hex(self.timestamp),
            transactions_merkle_root: self.transactions_merkle_root.clone(),
            transaction_status_hash: self.transaction_status_hash.clone(),
            nonce: to_le_hex(self.nonce),
            bits: to_le_hex(self.bits),
            job_id: self.id.to_string(),
            seed: self.seed.clone(),
            target: target_hex(self.diff),
        }
    }

    /// The job packaged into a login result
    pub(crate) fn login_reply(&self, login: &str) -> JobReply {
        JobReply {
            id: login.to_string(),
            job: self.reply_data(),
            status: "OK".to_string(),
        }
    }
}

impl Job for BtmJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn difficulty(&self) -> u64 {
        self.diff
    }

    fn encode(&self) -> Result<Value> {
        let notify = RpcNotification::new("job", serde_json::to_value(self.reply_data())?);
        Ok(serde_json::to_value(notify)?)
    }

    fn target_info(&self) -> (String, bool, bool) {
        // the target travels inside the job message, no separate notify
        (String::new(), false, false)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_target_hex_known_values() {
        // diff 2^24 gives target 2^232: padded byte 2 is 1, prefix
        // [0,0,1,0] reversed is [0,1,0,0]
        assert_eq!(target_hex(1 << 24), "00010000");
        // diff <= 1 clamps to the full range
        assert_eq!(target_hex(1), "ffffffff");
        assert_eq!(target_hex(0), "ffffffff");
    }

    #[test]
    fn test_diff_to_target_halves() {
        assert_eq!(diff_to_target(2), pow_max() / BigUint::from(2u32));
        assert!(diff_to_target(4) < diff_to_target(2));
    }

    #[test]
    fn test_compare_same_prev_hash_is_identical() {
        let a = BtmBlockTemplate {
            height: 5,
            previous_block_hash: "aa".into(),
            ..Default::default()
        };
        let b = BtmBlockTemplate {
            height: 9,
            previous_block_hash: "aa".into(),
            ..Default::default()
        };
        assert_eq!(a.compare(&b), 0);
    }

    #[test]
    fn test_compare_changed_prev_hash_supersedes() {
        let a = BtmBlockTemplate {
            height: 5,
            previous_block_hash: "aa".into(),
            ..Default::default()
        };
        let b = BtmBlockTemplate {
            height: 4,
            previous_block_hash: "bb".into(),
            ..Default::default()
        };
        // even with a lower height
        assert_eq!(a.compare(&b), -1);
    }

    #[test]
    fn test_job_encode_shape() {
        let job = BtmJob {
            id: JobId(7),
            version: 1,
            height: 100,
            previous_block_hash: "ab".repeat(32),
            timestamp: 1_600_000_000,
            transactions_merkle_root: "cd".repeat(32),
            transaction_status_hash: "ef".repeat(32),
            bits: 2305843009213693952,
            seed: "12".repeat(32),
            nonce: 0x1000,
            diff: 1 << 24,
        };
        let value = job.encode().unwrap();
        assert_eq!(value["method"], "job");
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["params"]["job_id"], "7");
        assert_eq!(value["params"]["version"], "0100000000000000");
        assert_eq!(value["params"]["nonce"], "0010000000000000");
        assert_eq!(value["params"]["target"], "00010000");
    }
}
