//! Per-session payload for the btm coin
//!
//! Each session gets a disjoint nonce space: the server id occupies the top
//! bits, the session id the bits below it, and the miner rolls the rest.
//! The payload also remembers submitted (job, nonce) pairs for duplicate
//! detection.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashSet;
use parking_lot::RwLock;

use crate::stratum::traits::{JobId, SessionData, SessionDataBuilder};
use crate::stratum::worker::Worker;

/// Bit position of the server id inside the 64-bit nonce
const SERVER_ID_OFFSET: u32 = 60;

/// Coin payload attached to every session
pub struct BtmSessionData {
    nonce: u64,
    worker: RwLock<Option<Worker>>,
    submitted: DashSet<(u64, u64)>,
}

impl BtmSessionData {
    /// The fixed upper bits of this session's nonce space
    pub fn nonce_prefix(&self) -> u64 {
        self.nonce
    }

    /// Remember a (job, nonce) pair; false when it was already submitted
    pub(crate) fn record_submit(&self, job: JobId, nonce: u64) -> bool {
        self.submitted.insert((job.0, nonce))
    }
}

impl SessionData for BtmSessionData {
    fn worker(&self) -> Option<Worker> {
        self.worker.read().clone()
    }

    fn set_worker(&self, worker: Worker) {
        *self.worker.write() = Some(worker);
    }

    // dead jobs cannot be submitted against again, so the set never
    // re-admits a duplicate for work that is still live
    fn clear_submissions(&self) {
        self.submitted.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builds [`BtmSessionData`] with the nonce-space layout fixed at startup
pub struct BtmSessionDataBuilder {
    server_id: u64,
    session_id_offset: u32,
}

impl BtmSessionDataBuilder {
    /// Lay out the nonce space for `max_sessions` sessions under one
    /// server id
    pub fn new(server_id: u32, max_sessions: u32) -> Self {
        let session_bits = max_sessions.next_power_of_two().trailing_zeros().max(1);
        Self {
            server_id: server_id as u64,
            session_id_offset: SERVER_ID_OFFSET - session_bits,
        }
    }
}

impl SessionDataBuilder for BtmSessionDataBuilder {
    fn build(&self, session_id: u32) -> Arc<dyn SessionData> {
        Arc::new(BtmSessionData {
            nonce: (self.server_id << SERVER_ID_OFFSET)
                | ((session_id as u64) << self.session_id_offset),
            worker: RwLock::new(None),
            submitted: DashSet::new(),
        })
    }
}
