//! Fixed-capacity job history ring
//!
//! Records recently issued jobs for lookup when a share is submitted.
//! Insertion overwrites the oldest slot; lookup is a linear scan. Slots are
//! locked individually, so an item in an earlier ring position may become
//! visible after a later one. Eventual consistency is intentional here, not
//! a defect.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::stratum::traits::{Job, JobId};

/// Default number of outstanding jobs remembered per session
pub const JOB_HISTORY_CAPACITY: usize = 8;

/// Ring of recently issued jobs
pub struct JobHistory {
    slots: Vec<RwLock<Option<Arc<dyn Job>>>>,
    cursor: AtomicUsize,
}

impl JobHistory {
    /// Create a ring with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| RwLock::new(None)).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Record a job, overwriting the oldest slot
    pub fn record(&self, job: Arc<dyn Job>) {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        *self.slots[index].write() = Some(job);
    }

    /// Find a job by id. `None` for expired, not-yet-visible, or never
    /// issued ids; callers reject such shares as "job not found".
    pub fn find(&self, id: JobId) -> Option<Arc<dyn Job>> {
        for slot in &self.slots {
            if let Some(job) = slot.read().as_ref() {
                if job.id() == id {
                    return Some(job.clone());
                }
            }
        }
        None
    }

    /// Drop every recorded job (on new-work broadcast)
    pub fn clear(&self) {
        for slot in &self.slots {
            *slot.write() = None;
        }
    }
}
