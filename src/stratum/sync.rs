//! Block template pump
//!
//! Pulls templates from the node syncer and, when a pull yields work that
//! supersedes the installed template, broadcasts new jobs to every session.
//! Runs in ticker mode (fixed interval, first pull immediate) or in signal
//! mode driven by the server's capacity-1 sync channel. Pull failures are
//! logged and never stop the pump.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::stratum::state::ServerState;
use crate::stratum::traits::NodeSyncer;

/// Drives template pulls against one server state
pub struct NodeSyncPump {
    server: Arc<ServerState>,
    syncer: Arc<dyn NodeSyncer>,
}

impl NodeSyncPump {
    /// Create a pump for the given server and syncer
    pub fn new(server: Arc<ServerState>, syncer: Arc<dyn NodeSyncer>) -> Self {
        Self { server, syncer }
    }

    /// Ticker mode. The first tick fires immediately so the server has a
    /// template before the first miner logs in.
    pub async fn run_interval(self, period: Duration, token: CancellationToken) {
        info!(period_ms = period.as_millis() as u64, "start node sync pump");
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.sync_once().await;
        }
    }

    /// Signal mode, driven by [`ServerState::request_sync`]
    pub async fn run_signal(self, mut rx: mpsc::Receiver<()>, token: CancellationToken) {
        info!("start signal-driven node sync pump");
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                signal = rx.recv() => {
                    if signal.is_none() {
                        return;
                    }
                }
            }
            self.sync_once().await;
        }
    }

    /// One pull. Broadcasts only when the template actually changed.
    pub async fn sync_once(&self) {
        match self.syncer.pull().await {
            Ok(Some(template)) => {
                if self.server.update_block_template(template) {
                    info!("new block template installed");
                    self.server.broadcast();
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "fail to sync node");
            }
        }
    }
}
