//! Server-wide shared state
//!
//! One instance per listening port: the authoritative block template behind
//! a read/write lock, the concurrent session registry, connection control
//! and the session id manager. Lives for the process lifetime.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Semaphore};
use tracing::info;

use crate::stratum::conn_control::ConnectionControl;
use crate::stratum::session::{SessionState, TcpSession};
use crate::stratum::session_id::SessionIdManager;
use crate::stratum::traits::BlockTemplate;

/// Upper bound on simultaneously running broadcast tasks
const BROADCAST_SLOTS: usize = 1024 * 16;

/// Process-wide server state shared by every session
pub struct ServerState {
    server_id: u32,
    template: RwLock<Option<Arc<dyn BlockTemplate>>>,
    sessions: DashMap<u32, Arc<TcpSession>>,
    conn_control: Arc<ConnectionControl>,
    id_manager: SessionIdManager,
    broadcast_slots: Arc<Semaphore>,
    sync_tx: mpsc::Sender<()>,
    sync_rx: parking_lot::Mutex<Option<mpsc::Receiver<()>>>,
}

impl ServerState {
    /// Create the state for one listening port.
    /// `server_id` distinguishes peer servers sharing a nonce space.
    pub fn new(server_id: u32, conn_control: Arc<ConnectionControl>, max_sessions: u32) -> Self {
        info!(server_id, "init server state");
        // single buffered slot: rapid sync triggers coalesce
        let (sync_tx, sync_rx) = mpsc::channel(1);
        Self {
            server_id,
            template: RwLock::new(None),
            sessions: DashMap::new(),
            conn_control,
            id_manager: SessionIdManager::new(max_sessions),
            broadcast_slots: Arc::new(Semaphore::new(BROADCAST_SLOTS)),
            sync_tx,
            sync_rx: parking_lot::Mutex::new(Some(sync_rx)),
        }
    }

    /// Server id for nonce-space partitioning
    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    /// The connection control instance
    pub fn conn_control(&self) -> &Arc<ConnectionControl> {
        &self.conn_control
    }

    /// The session id manager
    pub fn id_manager(&self) -> &SessionIdManager {
        &self.id_manager
    }

    /// Number of registered sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Install a candidate template.
    ///
    /// Under the exclusive lock the candidate replaces the current template
    /// when there is none yet, or when `current.compare(candidate) < 0`.
    /// Returns whether the candidate was installed.
    pub fn update_block_template(&self, candidate: Arc<dyn BlockTemplate>) -> bool {
        let mut current = self.template.write();
        match current.as_ref() {
            Some(existing) if existing.compare(candidate.as_ref()) >= 0 => false,
            _ => {
                *current = Some(candidate);
                true
            }
        }
    }

    /// Snapshot of the current template, if any
    pub fn block_template(&self) -> Option<Arc<dyn BlockTemplate>> {
        self.template.read().clone()
    }

    /// Fan a "new job available" signal out to every registered session.
    ///
    /// Fire-and-forget: each session gets its own task (bounded by the
    /// broadcast semaphore) that clears its job history and wakes its
    /// scheduler. Returns without waiting for sends to complete.
    pub fn broadcast(&self) {
        if self.template.read().is_none() {
            return;
        }

        info!(sessions = self.sessions.len(), "broadcasting new jobs");

        for entry in self.sessions.iter() {
            let session = entry.value().clone();
            let slots = self.broadcast_slots.clone();
            tokio::spawn(async move {
                let Ok(_permit) = slots.acquire_owned().await else {
                    return;
                };
                // current jobs are expired now, clear them all
                session.clear_jobs();
                session.send_job();
            });
        }
    }

    /// Register a newly accepted session
    pub fn register_session(&self, session: Arc<TcpSession>) {
        self.sessions.insert(session.id(), session);
    }

    /// Deregister a session, closing it if still open
    pub fn remove_session(&self, id: u32) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            if session.state() != SessionState::Closed {
                session.close();
            }
        }
    }

    /// Close every registered session (server shutdown)
    pub fn clear_sessions(&self) {
        for entry in self.sessions.iter() {
            entry.value().close();
        }
    }

    /// Request an out-of-band node sync. Signals already pending coalesce.
    pub fn request_sync(&self) {
        let _ = self.sync_tx.try_send(());
    }

    /// Take the sync signal receiver; consumed by the signal-driven pump
    pub fn take_sync_signal(&self) -> Option<mpsc::Receiver<()>> {
        self.sync_rx.lock().take()
    }
}
