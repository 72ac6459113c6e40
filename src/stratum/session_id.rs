//! Session id allocation
//!
//! Small dense integer ids bounded by the max-sessions capacity. Recycled
//! ids are handed out FIFO before the monotone counter is consulted; the
//! counter wraps modulo capacity. One issuer (the listener), many recyclers
//! (session close paths).

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Allocates and recycles session ids in `[0, max_sessions)`
pub struct SessionIdManager {
    inner: Mutex<IdState>,
    max_sessions: u32,
}

struct IdState {
    free: VecDeque<u32>,
    next: u32,
}

impl SessionIdManager {
    /// Create a manager with a fixed capacity. Exceeding the capacity is
    /// the listener's concern (its connection ceiling), not detected here.
    pub fn new(max_sessions: u32) -> Self {
        Self {
            inner: Mutex::new(IdState {
                free: VecDeque::new(),
                next: 0,
            }),
            max_sessions,
        }
    }

    /// Get the next id, preferring recycled ids in FIFO order
    pub fn get_id(&self) -> u32 {
        let mut state = self.inner.lock();
        if let Some(id) = state.free.pop_front() {
            return id;
        }
        let id = state.next;
        state.next = (state.next + 1) % self.max_sessions;
        id
    }

    /// Return an id to the free list
    pub fn recycle(&self, id: u32) {
        self.inner.lock().free.push_back(id);
    }
}
