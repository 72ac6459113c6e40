//! Request decoding and handlers for the btm dialect
//!
//! `handle` returns `Err` only when the session must close (wrong state,
//! banned miner, send failure). Malformed submissions reply with a protocol
//! error, count against the miner, and keep the session open.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::coins::btm::messages::{LoginParams, StatusReply, SubmitParams};
use crate::coins::btm::session_data::BtmSessionData;
use crate::coins::btm::share::BtmShare;
use crate::coins::btm::template::{BtmBlockTemplate, BtmJob};
use crate::error::{Error, Result};
use crate::stratum::protocol::{RpcRequest, StratumError};
use crate::stratum::session::{SessionState, TcpSession};
use crate::stratum::traits::{Decoder, JobId, Request, Share, ShareState};
use crate::stratum::worker::Worker;

const METHOD_LOGIN: &str = "login";
const METHOD_SUBMIT: &str = "submit";

/// Parses raw lines into login/submit requests
pub struct BtmDecoder;

#[async_trait]
impl Decoder for BtmDecoder {
    async fn decode(&self, data: &str, session: &Arc<TcpSession>) -> Result<Box<dyn Request>> {
        let request: RpcRequest = match serde_json::from_str(data) {
            Ok(request) => request,
            Err(err) => {
                let _ = session.send_error(None, StratumError::Unknown).await;
                return Err(err.into());
            }
        };

        match request.method.as_str() {
            METHOD_LOGIN => match serde_json::from_value::<LoginParams>(request.params) {
                Ok(params) => Ok(Box::new(LoginRequest {
                    id: request.id,
                    params,
                })),
                Err(err) => {
                    let _ = session.send_error(request.id, StratumError::Unknown).await;
                    Err(err.into())
                }
            },
            METHOD_SUBMIT => match serde_json::from_value::<SubmitParams>(request.params) {
                Ok(params) => Ok(Box::new(SubmitRequest {
                    id: request.id,
                    params,
                })),
                Err(err) => {
                    let _ = session.send_error(request.id, StratumError::Unknown).await;
                    Err(err.into())
                }
            },
            other => {
                let _ = session
                    .send_error(request.id, StratumError::Unsupported)
                    .await;
                Err(Error::protocol(format!("unsupported method {other:?}")))
            }
        }
    }
}

/// Decoded `login` request
pub struct LoginRequest {
    id: Option<Value>,
    params: LoginParams,
}

#[async_trait]
impl Request for LoginRequest {
    fn name(&self) -> &'static str {
        METHOD_LOGIN
    }

    async fn handle(&self, session: &Arc<TcpSession>) -> Result<()> {
        if session.state() != SessionState::Connected {
            session
                .send_error(self.id.clone(), StratumError::MultipleAuth)
                .await?;
            return Err(Error::protocol(format!(
                "wrong session state {:?}",
                session.state()
            )));
        }

        let worker = match Worker::parse(&self.params.login, &self.params.agent) {
            Ok(worker) => worker,
            Err(err) => {
                session
                    .send_error(self.id.clone(), StratumError::FormatAuthorize)
                    .await?;
                return Err(err);
            }
        };

        let miner = worker.full_name().to_string();
        session
            .server()
            .conn_control()
            .judge_miner(&miner, session.counters())?;

        session.data().set_worker(worker);
        session.set_state(SessionState::Authorized);

        // first job rides on the login reply, then again as a notification
        let job = session.create_job()?;
        let btm_job = job
            .as_any()
            .downcast_ref::<BtmJob>()
            .ok_or_else(|| Error::protocol("unexpected job type"))?;
        session
            .reply(self.id.clone(), btm_job.login_reply(&self.params.login))
            .await?;
        session.record_job(job.clone());
        session.notify(job.encode()?).await?;

        info!(
            session_id = session.id(),
            session_ip = %session.ip(),
            miner = %miner,
            method = METHOD_LOGIN,
            "handle login"
        );
        Ok(())
    }
}

/// Decoded `submit` request
pub struct SubmitRequest {
    id: Option<Value>,
    params: SubmitParams,
}

#[async_trait]
impl Request for SubmitRequest {
    fn name(&self) -> &'static str {
        METHOD_SUBMIT
    }

    async fn handle(&self, session: &Arc<TcpSession>) -> Result<()> {
        if session.state() != SessionState::Authorized {
            session
                .send_error(self.id.clone(), StratumError::Unauthorized)
                .await?;
            return Err(Error::protocol(format!(
                "wrong session state {:?}",
                session.state()
            )));
        }

        let Some(worker) = session.data().worker() else {
            session
                .send_error(self.id.clone(), StratumError::Unauthorized)
                .await?;
            return Err(Error::protocol("no registered worker"));
        };
        if worker.full_name() != self.params.id {
            session
                .send_error(self.id.clone(), StratumError::Unauthorized)
                .await?;
            return Err(Error::protocol(format!(
                "miner id mismatch: {:?}",
                self.params.id
            )));
        }
        let miner = worker.full_name().to_string();

        session
            .server()
            .conn_control()
            .judge_miner(&miner, session.counters())?;

        let Ok(job_id) = JobId::from_decimal(&self.params.job_id) else {
            session.counters().record_error();
            session
                .send_error(self.id.clone(), StratumError::FormatSubmit)
                .await?;
            warn!(
                session_id = session.id(),
                session_ip = %session.ip(),
                miner = %miner,
                job_id = %self.params.job_id,
                "invalid job id"
            );
            return Ok(());
        };

        let Some(job) = session.find_job(job_id) else {
            session.counters().record_error();
            session
                .send_error(self.id.clone(), StratumError::JobNotFound)
                .await?;
            warn!(
                session_id = session.id(),
                session_ip = %session.ip(),
                miner = %miner,
                job_id = %self.params.job_id,
                "invalid job"
            );
            return Ok(());
        };
        let btm_job = job
            .as_any()
            .downcast_ref::<BtmJob>()
            .ok_or_else(|| Error::protocol("unexpected job type"))?;

        // nonce must be 1..=16 lowercase hex chars
        let nonce = match parse_nonce(&self.params.nonce) {
            Some(nonce) => nonce,
            None => {
                session.counters().record_error();
                session
                    .send_error(self.id.clone(), StratumError::FormatSubmit)
                    .await?;
                warn!(
                    session_id = session.id(),
                    session_ip = %session.ip(),
                    miner = %miner,
                    job_id = %self.params.job_id,
                    nonce = %self.params.nonce,
                    height = btm_job.height,
                    "invalid nonce format"
                );
                return Ok(());
            }
        };

        // a share against a job from a previous height is stale
        if let Some(template) = session.server().block_template() {
            if let Some(current) = template.as_any().downcast_ref::<BtmBlockTemplate>() {
                if btm_job.height != current.height {
                    session.counters().record_error();
                    session
                        .send_error(self.id.clone(), StratumError::FormatSubmit)
                        .await?;
                    warn!(
                        session_id = session.id(),
                        session_ip = %session.ip(),
                        miner = %miner,
                        job_id = %self.params.job_id,
                        nonce = %self.params.nonce,
                        job_height = btm_job.height,
                        height = current.height,
                        "stale share"
                    );
                    return Ok(());
                }
            }
        }

        let data = session
            .data()
            .as_any()
            .downcast_ref::<BtmSessionData>()
            .ok_or_else(|| Error::protocol("unexpected session data type"))?;
        if !data.record_submit(job_id, nonce) {
            session.counters().record_error();
            session
                .send_error(self.id.clone(), StratumError::DuplicateShare)
                .await?;
            warn!(
                session_id = session.id(),
                session_ip = %session.ip(),
                miner = %miner,
                job_id = %self.params.job_id,
                nonce = %self.params.nonce,
                "duplicate share"
            );
            return Ok(());
        }

        let share_diff = btm_job.diff;
        let net_diff = btm_job.bits.max(1);
        let height = btm_job.height;
        let mut share = BtmShare::new(
            job.clone(),
            worker,
            nonce,
            self.params.result.clone(),
            net_diff,
        );
        if let Err(err) = session.verifier().verify(&mut share) {
            session
                .send_error(self.id.clone(), StratumError::FormatSubmit)
                .await?;
            warn!(
                session_id = session.id(),
                session_ip = %session.ip(),
                miner = %miner,
                job_id = %self.params.job_id,
                nonce,
                share_diff,
                net_diff,
                height,
                error = %err,
                "failed verification"
            );
            return Ok(());
        }

        match share.state() {
            ShareState::Accepted => {
                session.counters().record_accepted();
                session.reply(self.id.clone(), StatusReply::ok()).await?;
            }
            ShareState::Block => {
                session.counters().record_accepted();
                info!(
                    session_id = session.id(),
                    session_ip = %session.ip(),
                    miner = %miner,
                    job_id = %self.params.job_id,
                    nonce,
                    share_diff,
                    net_diff,
                    height,
                    hash = share.block_hash.as_deref().unwrap_or(""),
                    "found block"
                );
                if let Some(syncer) = session.syncer() {
                    let syncer = syncer.clone();
                    let session_id = session.id();
                    tokio::spawn(async move {
                        if let Err(err) = syncer.submit(Box::new(share)).await {
                            error!(session_id, height, error = %err, "failed to submit block");
                        }
                    });
                }
                session.reply(self.id.clone(), StatusReply::ok()).await?;
            }
            ShareState::Rejected | ShareState::Unverified => {
                session.counters().record_error();
                info!(
                    session_id = session.id(),
                    session_ip = %session.ip(),
                    miner = %miner,
                    job_id = %self.params.job_id,
                    nonce,
                    share_diff,
                    net_diff,
                    height,
                    hash = share.block_hash.as_deref().unwrap_or(""),
                    reason = %share.reason(),
                    "failed share"
                );
                session
                    .send_error(self.id.clone(), share.reason().to_stratum_error())
                    .await?;
            }
        }
        Ok(())
    }
}

/// Parse a nonce matching `^[0-9a-f]{1,16}$`
fn parse_nonce(nonce: &str) -> Option<u64> {
    if nonce.is_empty()
        || nonce.len() > 16
        || !nonce.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return None;
    }
    u64::from_str_radix(nonce, 16).ok()
}
