//! Proof-of-work verification for btm shares
//!
//! The block header is serialized in wire order and hashed with Blake2b-256.
//! The hash as a big-endian integer is compared against the network target
//! first (block found) and the share target second (accepted), so a share
//! can be a block without a separate check.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use num_bigint::BigUint;

use crate::coins::btm::share::BtmShare;
use crate::coins::btm::template::{diff_to_target, BtmJob};
use crate::error::{Error, Result};
use crate::stratum::traits::{RejectReason, Share, ShareState, Verifier};

type Blake2b256 = Blake2b<U32>;

/// Stateless header-hash verifier
pub struct BtmVerifier;

impl BtmVerifier {
    /// Create a verifier
    pub fn new() -> Self {
        Self
    }
}

impl Default for BtmVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier for BtmVerifier {
    fn verify(&self, share: &mut dyn Share) -> Result<()> {
        let share = share
            .as_any_mut()
            .downcast_mut::<BtmShare>()
            .ok_or_else(|| Error::protocol("unexpected share type"))?;

        let (header, share_target) = {
            let job = share
                .job()
                .ok_or_else(|| Error::protocol("unexpected job type"))?;
            (header_bytes(job, share.nonce)?, diff_to_target(job.diff))
        };

        let hash = Blake2b256::digest(&header);
        let hash_hex = hex::encode(hash);
        let hash_int = BigUint::from_bytes_be(&hash);
        share.block_hash = Some(hash_hex.clone());

        // a claimed result hash must match the recomputed one
        if !share.result.is_empty() && share.result != hash_hex {
            share.update_state(ShareState::Rejected, RejectReason::InvalidSolution);
            return Ok(());
        }

        if hash_int <= diff_to_target(share.net_diff) {
            share.update_state(ShareState::Block, RejectReason::Pass);
            return Ok(());
        }
        if hash_int > share_target {
            share.update_state(ShareState::Rejected, RejectReason::LowDifficulty);
            return Ok(());
        }
        share.update_state(ShareState::Accepted, RejectReason::Pass);
        Ok(())
    }
}

/// Serialize the header fields the hash covers, in wire order
fn header_bytes(job: &BtmJob, nonce: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(5 * 8 + 3 * 32);
    buf.extend_from_slice(&job.version.to_le_bytes());
    buf.extend_from_slice(&job.height.to_le_bytes());
    buf.extend_from_slice(&decode_hash(&job.previous_block_hash)?);
    buf.extend_from_slice(&job.timestamp.to_le_bytes());
    buf.extend_from_slice(&decode_hash(&job.transactions_merkle_root)?);
    buf.extend_from_slice(&decode_hash(&job.transaction_status_hash)?);
    buf.extend_from_slice(&nonce.to_le_bytes());
    buf.extend_from_slice(&job.bits.to_le_bytes());
    Ok(buf)
}

fn decode_hash(field: &str) -> Result<[u8; 32]> {
    let bytes =
        hex::decode(field).map_err(|_| Error::protocol(format!("invalid hash hex {field:?}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::protocol(format!("hash must be 32 bytes: {field:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stratum::traits::JobId;
    use std::sync::Arc;

    fn job(diff: u64, bits: u64) -> Arc<BtmJob> {
        Arc::new(BtmJob {
            id: JobId(1),
            version: 1,
            height: 100,
            previous_block_hash: "ab".repeat(32),
            timestamp: 1_600_000_000,
            transactions_merkle_root: "cd".repeat(32),
            transaction_status_hash: "ef".repeat(32),
            bits,
            seed: "12".repeat(32),
            nonce: 0,
            diff,
        })
    }

    fn worker() -> crate::stratum::worker::Worker {
        crate::stratum::worker::Worker::parse("acct.rig", "").unwrap()
    }

    #[test]
    fn test_net_diff_one_is_always_a_block() {
        // net target is the full range: every hash qualifies
        let mut share = BtmShare::new(job(1, 1), worker(), 42, String::new(), 1);
        BtmVerifier::new().verify(&mut share).unwrap();
        assert_eq!(share.state(), ShareState::Block);
        assert_eq!(share.reason(), RejectReason::Pass);
        assert!(share.block_hash.is_some());
    }

    #[test]
    fn test_huge_diff_rejects_low_difficulty() {
        let mut share = BtmShare::new(job(u64::MAX, u64::MAX), worker(), 42, String::new(), u64::MAX);
        BtmVerifier::new().verify(&mut share).unwrap();
        assert_eq!(share.state(), ShareState::Rejected);
        assert_eq!(share.reason(), RejectReason::LowDifficulty);
    }

    #[test]
    fn test_wrong_claimed_result_is_invalid_solution() {
        let mut share = BtmShare::new(job(1, 1), worker(), 42, "00".repeat(32), 1);
        BtmVerifier::new().verify(&mut share).unwrap();
        assert_eq!(share.state(), ShareState::Rejected);
        assert_eq!(share.reason(), RejectReason::InvalidSolution);
    }

    #[test]
    fn test_matching_claimed_result_passes() {
        // verify once to learn the hash, resubmit with it claimed
        let mut probe = BtmShare::new(job(1, 1), worker(), 42, String::new(), 1);
        BtmVerifier::new().verify(&mut probe).unwrap();
        let hash = probe.block_hash.clone().unwrap();

        let mut share = BtmShare::new(job(1, 1), worker(), 42, hash, 1);
        BtmVerifier::new().verify(&mut share).unwrap();
        assert_eq!(share.state(), ShareState::Block);
    }

    #[test]
    fn test_hash_is_deterministic_per_nonce() {
        let mut a = BtmShare::new(job(1, 1), worker(), 7, String::new(), 1);
        let mut b = BtmShare::new(job(1, 1), worker(), 7, String::new(), 1);
        let mut c = BtmShare::new(job(1, 1), worker(), 8, String::new(), 1);
        let verifier = BtmVerifier::new();
        verifier.verify(&mut a).unwrap();
        verifier.verify(&mut b).unwrap();
        verifier.verify(&mut c).unwrap();
        assert_eq!(a.block_hash, b.block_hash);
        assert_ne!(a.block_hash, c.block_hash);
    }
}
