//! TCP accept loop
//!
//! Binds the stratum port and admits connections under a semaphore sized to
//! the connection ceiling. Each admitted connection carries its permit into
//! the session lifecycle task, so a slot frees exactly when the session's
//! dispatch loop returns.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::stratum::session::SessionBuilder;
use crate::stratum::state::ServerState;

/// Listening socket plus everything needed to spin up sessions
pub struct StratumListener {
    listener: TcpListener,
    server: Arc<ServerState>,
    builder: Arc<SessionBuilder>,
    conn_slots: Arc<Semaphore>,
    token: CancellationToken,
}

impl StratumListener {
    /// Bind the listening address. Bind failure is fatal to startup.
    pub async fn bind(
        addr: &str,
        server: Arc<ServerState>,
        builder: Arc<SessionBuilder>,
        max_connections: u32,
        token: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr, max_connections, "stratum listener bound");
        Ok(Self {
            listener,
            server,
            builder,
            conn_slots: Arc::new(Semaphore::new(max_connections as usize)),
            token,
        })
    }

    /// The bound address (useful when binding port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until cancelled, then close every remaining session
    pub async fn run(self) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.token.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "accept error");
                        continue;
                    }
                },
            };

            // over the ceiling: refuse by dropping the socket
            let Ok(permit) = self.conn_slots.clone().try_acquire_owned() else {
                warn!(peer_ip = %peer.ip(), "connection ceiling reached, refusing");
                continue;
            };

            let _ = stream.set_nodelay(true);
            let session = self.builder.build(stream, peer.ip().to_string());
            self.server.register_session(session.clone());

            let server = self.server.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let id = session.id();
                session.clone().dispatch().await;
                server.remove_session(id);
            });
        }

        info!("listener stopped, draining sessions");
        self.server.clear_sessions();
    }
}
