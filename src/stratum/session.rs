//! Per-connection protocol session
//!
//! Each accepted connection gets one `TcpSession` running two tasks under a
//! shared cancellation scope: the read/dispatch loop and the job scheduler
//! loop. Exactly one session owns one socket; outbound messages are
//! serialized through a single writer so job pushes and replies never
//! interleave byte-wise.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::stratum::conn_control::SessionCounters;
use crate::stratum::history::{JobHistory, JOB_HISTORY_CAPACITY};
use crate::stratum::protocol::{RpcNotification, RpcResponse, StratumError};
use crate::stratum::state::ServerState;
use crate::stratum::traits::{
    Decoder, DiffAdjust, Job, JobId, NodeSyncer, SessionData, SessionDataBuilder, Verifier,
};

/// Cap on a single inbound line; longer is treated as a flood
const MAX_REQUEST_SIZE: usize = 10 * 1024;

/// Session protocol states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Connected, nothing negotiated yet
    Connected = 1,
    /// Subscribed; reserved for protocols with an explicit subscribe step
    Subscribed = 2,
    /// Login accepted, jobs flow
    Authorized = 3,
    /// Terminal
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::Subscribed,
            3 => Self::Authorized,
            _ => Self::Closed,
        }
    }
}

/// Builder holding everything a new session needs besides its socket
pub struct SessionBuilder {
    server: Arc<ServerState>,
    syncer: Option<Arc<dyn NodeSyncer>>,
    verifier: Arc<dyn Verifier>,
    decoder: Arc<dyn Decoder>,
    data_builder: Arc<dyn SessionDataBuilder>,
    diff: Arc<DiffAdjust>,
    idle_timeout: Duration,
    job_interval: Duration,
    token: CancellationToken,
}

impl SessionBuilder {
    /// Create a builder bound to the server's lifetime token
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server: Arc<ServerState>,
        syncer: Option<Arc<dyn NodeSyncer>>,
        verifier: Arc<dyn Verifier>,
        decoder: Arc<dyn Decoder>,
        data_builder: Arc<dyn SessionDataBuilder>,
        diff: Arc<DiffAdjust>,
        idle_timeout: Duration,
        job_interval: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            server,
            syncer,
            verifier,
            decoder,
            data_builder,
            diff,
            idle_timeout,
            job_interval,
            token,
        }
    }

    /// Build a session around an accepted socket and start its scheduler
    pub fn build(&self, conn: TcpStream, ip: String) -> Arc<TcpSession> {
        let id = self.server.id_manager().get_id();
        let (read_half, write_half) = conn.into_split();

        let session = Arc::new(TcpSession {
            id,
            ip,
            reader: parking_lot::Mutex::new(Some(read_half)),
            writer: tokio::sync::Mutex::new(write_half),
            state: AtomicU8::new(SessionState::Connected as u8),
            counters: SessionCounters::new(),
            server: self.server.clone(),
            syncer: self.syncer.clone(),
            verifier: self.verifier.clone(),
            decoder: self.decoder.clone(),
            data: self.data_builder.build(id),
            diff: self.diff.clone(),
            idle_timeout: self.idle_timeout,
            job_interval: self.job_interval,
            history: JobHistory::new(JOB_HISTORY_CAPACITY),
            job_signal: Notify::new(),
            cancel: self.token.child_token(),
        });

        tokio::spawn({
            let session = session.clone();
            async move { session.schedule_jobs().await }
        });

        session
    }
}

/// A session with an underlying TCP connection.
///
/// Coin-independent; coin code hangs its own payload off `SessionData`.
pub struct TcpSession {
    id: u32,
    ip: String,
    reader: parking_lot::Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    state: AtomicU8,
    counters: SessionCounters,
    server: Arc<ServerState>,
    syncer: Option<Arc<dyn NodeSyncer>>,
    verifier: Arc<dyn Verifier>,
    decoder: Arc<dyn Decoder>,
    data: Arc<dyn SessionData>,
    diff: Arc<DiffAdjust>,
    idle_timeout: Duration,
    job_interval: Duration,
    history: JobHistory,
    job_signal: Notify,
    cancel: CancellationToken,
}

impl TcpSession {
    /// Session id, unique while open, recycled after close
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Remote IP
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Current protocol state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Set the protocol state
    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Per-session accept/error counters
    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// The coin-specific session payload
    pub fn data(&self) -> &Arc<dyn SessionData> {
        &self.data
    }

    /// Global server state
    pub fn server(&self) -> &Arc<ServerState> {
        &self.server
    }

    /// The share verifier
    pub fn verifier(&self) -> &Arc<dyn Verifier> {
        &self.verifier
    }

    /// The node syncer, if configured
    pub fn syncer(&self) -> Option<&Arc<dyn NodeSyncer>> {
        self.syncer.as_ref()
    }

    /// Session share difficulty
    pub fn diff(&self) -> u64 {
        self.diff.diff()
    }

    /// Create a job from the current block template
    pub fn create_job(self: &Arc<Self>) -> Result<Arc<dyn Job>> {
        let template = self
            .server
            .block_template()
            .ok_or(crate::error::Error::NoBlockTemplate)?;
        template.create_job(self)
    }

    /// Record an issued job in the history ring
    pub fn record_job(&self, job: Arc<dyn Job>) {
        self.history.record(job);
    }

    /// Look up an outstanding job by id
    pub fn find_job(&self, id: JobId) -> Option<Arc<dyn Job>> {
        self.history.find(id)
    }

    /// Drop all outstanding jobs (they reference superseded work) along
    /// with the coin's per-job submission records
    pub fn clear_jobs(&self) {
        self.history.clear();
        self.data.clear_submissions();
    }

    /// Wake the scheduler to push a fresh job. Never blocks; signals sent
    /// before the scheduler consumes one collapse into a single wake.
    pub fn send_job(&self) {
        self.job_signal.notify_one();
    }

    /// Read/dispatch loop. Runs until disconnect, protocol error, handler
    /// error, or cancellation, then closes the session.
    pub async fn dispatch(self: Arc<Self>) {
        info!(session_id = self.id, session_ip = %self.ip, "session dispatch");

        let Some(read_half) = self.reader.lock().take() else {
            return;
        };
        let mut frames = FramedRead::new(
            read_half,
            LinesCodec::new_with_max_length(MAX_REQUEST_SIZE),
        );

        loop {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = timeout(self.idle_timeout, frames.next()) => match next {
                    Err(_) => {
                        info!(session_id = self.id, session_ip = %self.ip, "session idle timeout");
                        break;
                    }
                    Ok(None) => {
                        info!(session_id = self.id, session_ip = %self.ip, "client disconnected");
                        break;
                    }
                    Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                        error!(session_id = self.id, session_ip = %self.ip, "socket flood detected");
                        break;
                    }
                    Ok(Some(Err(LinesCodecError::Io(err)))) => {
                        error!(session_id = self.id, session_ip = %self.ip, error = %err, "error reading");
                        break;
                    }
                    Ok(Some(Ok(line))) => line,
                },
            };

            if line.trim().is_empty() {
                continue;
            }

            let request = match self.decoder.decode(&line, &self).await {
                Ok(request) => request,
                Err(err) => {
                    error!(
                        session_id = self.id,
                        session_ip = %self.ip,
                        error = %err,
                        data = %line,
                        "fail to decode"
                    );
                    break;
                }
            };

            let (in_banlist, must_close) = request.check_miner(&self);
            if must_close {
                break;
            }

            let handled = if in_banlist && self.server.conn_control().forward_banned() {
                request.forward(&self).await
            } else {
                request.handle(&self).await
            };

            if let Err(err) = handled {
                // bail out when the handler returns an error; a banned-miner
                // error is expected traffic, not a failure
                if !err.is_banned() {
                    error!(
                        session_id = self.id,
                        session_ip = %self.ip,
                        handler = request.name(),
                        error = %err,
                        "handler error"
                    );
                }
                break;
            }
        }

        self.close();
    }

    /// Job scheduler loop: wakes on the interval ticker (disabled when the
    /// interval is zero) or on an explicit push signal, and sends a fresh
    /// job when the session is authorized. Errors are logged and the loop
    /// continues.
    pub(crate) async fn schedule_jobs(self: Arc<Self>) {
        info!(session_id = self.id, "start job scheduler");

        let mut ticker = if self.job_interval.is_zero() {
            None
        } else {
            Some(tokio::time::interval_at(
                tokio::time::Instant::now() + self.job_interval,
                self.job_interval,
            ))
        };

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = self.job_signal.notified() => {}
                _ = next_tick(&mut ticker) => {}
            }

            // only send job notifies once the session is authorized
            if self.state() != SessionState::Authorized {
                continue;
            }

            let job = match self.create_job() {
                Ok(job) => job,
                Err(err) => {
                    error!(
                        session_id = self.id,
                        session_ip = %self.ip,
                        error = %err,
                        "fail to create job"
                    );
                    continue;
                }
            };

            // target / difficulty notifies ahead of the job, per coin needs
            let (target, notify_target, notify_diff) = job.target_info();
            if notify_target {
                if let Err(err) = self.set_target(serde_json::json!([target])).await {
                    error!(
                        session_id = self.id,
                        session_ip = %self.ip,
                        job_id = %job.id(),
                        error = %err,
                        "fail to notify target"
                    );
                    continue;
                }
            }
            if notify_diff {
                if let Err(err) = self
                    .set_difficulty(serde_json::json!([job.difficulty()]))
                    .await
                {
                    error!(
                        session_id = self.id,
                        session_ip = %self.ip,
                        job_id = %job.id(),
                        error = %err,
                        "fail to notify difficulty"
                    );
                    continue;
                }
            }

            let message = match job.encode() {
                Ok(message) => message,
                Err(err) => {
                    error!(
                        session_id = self.id,
                        session_ip = %self.ip,
                        job_id = %job.id(),
                        error = %err,
                        "fail to encode job"
                    );
                    continue;
                }
            };

            if let Err(err) = self.notify(message).await {
                error!(
                    session_id = self.id,
                    session_ip = %self.ip,
                    job_id = %job.id(),
                    error = %err,
                    "fail to notify"
                );
                continue;
            }

            self.record_job(job);
        }
    }

    /// Send a server notification to the client
    pub async fn notify(&self, message: Value) -> Result<()> {
        self.send_value(&message).await
    }

    /// Reply to a client request
    pub async fn reply<T: Serialize>(&self, id: Option<Value>, result: T) -> Result<()> {
        let message = RpcResponse::result(id, serde_json::to_value(result)?);
        self.send_value(&message).await
    }

    /// Send a `mining.set_target` notification
    pub async fn set_target(&self, params: Value) -> Result<()> {
        let message = RpcNotification::new("mining.set_target", params);
        self.send_value(&message).await
    }

    /// Send a `mining.set_difficulty` notification
    pub async fn set_difficulty(&self, params: Value) -> Result<()> {
        let message = RpcNotification::new("mining.set_difficulty", params);
        self.send_value(&message).await
    }

    /// Send a typed error reply
    pub async fn send_error(&self, id: Option<Value>, error: StratumError) -> Result<()> {
        let message = RpcResponse::error(id, error);
        if let Err(err) = self.send_value(&message).await {
            warn!(
                session_id = self.id,
                session_ip = %self.ip,
                err_type = error.message(),
                send_err = %err,
                "send error"
            );
            return Err(err);
        }
        Ok(())
    }

    /// Serialize one message plus newline through the session writer.
    /// The writer mutex is the per-connection outbound serialization point.
    async fn send_value<T: Serialize>(&self, message: &T) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the session: cancel both loops, mark terminal state, recycle
    /// the id. Idempotent; the socket closes when its halves drop.
    pub fn close(&self) {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        if previous == SessionState::Closed as u8 {
            return;
        }
        self.cancel.cancel();
        self.server.id_manager().recycle(self.id);
        info!(session_id = self.id, session_ip = %self.ip, "session closed");
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}
