//! A submitted btm share

use std::any::Any;
use std::sync::Arc;

use crate::coins::btm::template::BtmJob;
use crate::stratum::traits::{Job, RejectReason, Share, ShareState};
use crate::stratum::worker::Worker;

/// One candidate solution from a worker, verified in place
pub struct BtmShare {
    pub(crate) job: Arc<dyn Job>,
    pub(crate) worker: Worker,
    pub(crate) nonce: u64,
    pub(crate) result: String,
    pub(crate) net_diff: u64,
    pub(crate) block_hash: Option<String>,
    state: ShareState,
    reason: RejectReason,
}

impl BtmShare {
    pub(crate) fn new(
        job: Arc<dyn Job>,
        worker: Worker,
        nonce: u64,
        result: String,
        net_diff: u64,
    ) -> Self {
        Self {
            job,
            worker,
            nonce,
            result,
            net_diff,
            block_hash: None,
            state: ShareState::Unverified,
            reason: RejectReason::Undefined,
        }
    }

    /// The concrete job the share was mined against
    pub(crate) fn job(&self) -> Option<&BtmJob> {
        self.job.as_any().downcast_ref::<BtmJob>()
    }
}

impl Share for BtmShare {
    fn update_state(&mut self, state: ShareState, reason: RejectReason) {
        self.state = state;
        self.reason = reason;
    }

    fn state(&self) -> ShareState {
        self.state
    }

    fn reason(&self) -> RejectReason {
        self.reason
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
