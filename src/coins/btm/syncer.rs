//! JSON-RPC client against the upstream btm node
//!
//! `get_work` pulls the current block header as a template; `submit_work`
//! pushes a solved header back. Transport failures surface as errors to the
//! pump, which logs and retries on its next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::coins::btm::share::BtmShare;
use crate::coins::btm::template::BtmBlockTemplate;
use crate::error::{Error, Result};
use crate::stratum::traits::{BlockTemplate, NodeSyncer, Share};

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct NodeReply {
    #[serde(default)]
    result: Option<NodeWork>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NodeWork {
    block_header: NodeHeader,
    #[serde(default)]
    seed: String,
}

#[derive(Debug, Deserialize)]
struct NodeHeader {
    version: u64,
    height: u64,
    previous_block_hash: String,
    timestamp: u64,
    transactions_merkle_root: String,
    transaction_status_hash: String,
    nonce: u64,
    bits: u64,
}

/// Node client implementing [`NodeSyncer`]
pub struct BtmNodeSyncer {
    client: reqwest::Client,
    url: String,
}

impl BtmNodeSyncer {
    /// Create a client for the given node URL
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(RPC_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "id": 0,
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        let reply: Value = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        Ok(reply)
    }
}

#[async_trait]
impl NodeSyncer for BtmNodeSyncer {
    async fn pull(&self) -> Result<Option<Arc<dyn BlockTemplate>>> {
        let reply = self.call("get_work", json!([])).await?;
        let reply: NodeReply = serde_json::from_value(reply)?;
        if let Some(err) = reply.error {
            return Err(Error::node(err.to_string()));
        }
        let Some(work) = reply.result else {
            return Ok(None);
        };

        let header = work.block_header;
        Ok(Some(Arc::new(BtmBlockTemplate {
            version: header.version,
            height: header.height,
            previous_block_hash: header.previous_block_hash,
            timestamp: header.timestamp,
            transactions_merkle_root: header.transactions_merkle_root,
            transaction_status_hash: header.transaction_status_hash,
            nonce: header.nonce,
            bits: header.bits,
            seed: work.seed,
        })))
    }

    async fn submit(&self, share: Box<dyn Share>) -> Result<()> {
        let share = share
            .as_any()
            .downcast_ref::<BtmShare>()
            .ok_or_else(|| Error::protocol("unexpected share type"))?;
        let job = share
            .job()
            .ok_or_else(|| Error::protocol("unexpected job type"))?;

        let params = json!([{
            "version": job.version,
            "height": job.height,
            "previous_block_hash": job.previous_block_hash,
            "timestamp": job.timestamp,
            "transactions_merkle_root": job.transactions_merkle_root,
            "transaction_status_hash": job.transaction_status_hash,
            "nonce": share.nonce,
            "bits": job.bits,
        }]);
        let reply = self.call("submit_work", params).await?;

        let accepted = reply
            .get("result")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if accepted {
            info!(nonce = share.nonce, "send nonce success");
        } else {
            error!(
                nonce = share.nonce,
                hash = share.block_hash.as_deref().unwrap_or(""),
                "block rejected by node"
            );
        }
        Ok(())
    }
}
