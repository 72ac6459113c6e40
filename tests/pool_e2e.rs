//! End-to-end tests: real TCP clients against a bound listener running the
//! btm dialect with a mock node syncer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use stratum_pool::coins::btm::{
    BtmBlockTemplate, BtmDecoder, BtmSessionDataBuilder, BtmVerifier,
};
use stratum_pool::error::Result;
use stratum_pool::stratum::{
    BlockTemplate, ConnControlConfig, ConnectionControl, DiffAdjust, NodeSyncer, ServerState,
    SessionBuilder, Share, StratumListener,
};

struct MockSyncer {
    submitted: AtomicU64,
}

#[async_trait]
impl NodeSyncer for MockSyncer {
    async fn pull(&self) -> Result<Option<Arc<dyn BlockTemplate>>> {
        Ok(None)
    }

    async fn submit(&self, _share: Box<dyn Share>) -> Result<()> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_template() -> BtmBlockTemplate {
    BtmBlockTemplate {
        version: 1,
        height: 100,
        previous_block_hash: "ab".repeat(32),
        timestamp: 1_600_000_000,
        transactions_merkle_root: "cd".repeat(32),
        transaction_status_hash: "ef".repeat(32),
        nonce: 0,
        // bits doubles as the net difficulty: 1 means every share is a block
        bits: 1,
        seed: "12".repeat(32),
    }
}

struct Pool {
    addr: SocketAddr,
    server: Arc<ServerState>,
    syncer: Arc<MockSyncer>,
    token: CancellationToken,
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn start_pool(diff: u64, max_connections: u32) -> Pool {
    start_pool_opts(diff, max_connections, Duration::from_secs(30)).await
}

async fn start_pool_opts(diff: u64, max_connections: u32, idle_timeout: Duration) -> Pool {
    let token = CancellationToken::new();
    let conn_control = Arc::new(ConnectionControl::new(ConnControlConfig::default()));
    let server = Arc::new(ServerState::new(0, conn_control, max_connections));
    server.update_block_template(Arc::new(test_template()));

    let syncer = Arc::new(MockSyncer {
        submitted: AtomicU64::new(0),
    });
    let builder = Arc::new(SessionBuilder::new(
        server.clone(),
        Some(syncer.clone() as Arc<dyn NodeSyncer>),
        Arc::new(BtmVerifier::new()),
        Arc::new(BtmDecoder),
        Arc::new(BtmSessionDataBuilder::new(0, max_connections)),
        Arc::new(DiffAdjust::new(diff)),
        idle_timeout,
        Duration::ZERO,
        token.clone(),
    ));

    let listener = StratumListener::bind(
        "127.0.0.1:0",
        server.clone(),
        builder,
        max_connections,
        token.clone(),
    )
    .await
    .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(listener.run());

    Pool {
        addr,
        server,
        syncer,
        token,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    async fn send(&mut self, message: Value) {
        let mut line = serde_json::to_vec(&message).expect("serialize");
        line.push(b'\n');
        self.writer.write_all(&line).await.expect("write");
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        let n = timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("recv timeout")
            .expect("read");
        assert!(n > 0, "connection closed");
        serde_json::from_str(&line).expect("json line")
    }

    /// Read until EOF; panics if the peer keeps the connection open
    async fn expect_eof(&mut self) {
        loop {
            let mut line = String::new();
            let n = timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
                .await
                .expect("eof timeout")
                .expect("read");
            if n == 0 {
                return;
            }
        }
    }

    /// Log in and return (login reply, job notification)
    async fn login(&mut self, name: &str) -> (Value, Value) {
        self.send(json!({
            "id": 1,
            "method": "login",
            "params": {"login": name, "pass": "x", "agent": "test/1.0"}
        }))
        .await;
        let reply = self.recv().await;
        let job = self.recv().await;
        (reply, job)
    }
}

#[tokio::test]
async fn test_login_authorizes_and_delivers_job() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;

    let (reply, job) = client.login("acct.rig").await;

    assert_eq!(reply["id"], 1);
    assert_eq!(reply["error"], Value::Null);
    assert_eq!(reply["result"]["status"], "OK");
    assert_eq!(reply["result"]["id"], "acct.rig");
    let job_data = &reply["result"]["job"];
    assert_eq!(job_data["height"], "6400000000000000");
    assert_eq!(job_data["target"], "ffffffff");
    assert!(job_data["job_id"].as_str().is_some());

    assert_eq!(job["method"], "job");
    assert_eq!(job["params"]["job_id"], job_data["job_id"]);
}

#[tokio::test]
async fn test_submit_before_login_is_unauthorized() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;

    client
        .send(json!({
            "id": 2,
            "method": "submit",
            "params": {"id": "acct.rig", "job_id": "1", "nonce": "2a", "result": ""}
        }))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["error"]["code"], 24);
    // wrong-state submissions close the session
    client.expect_eof().await;
}

#[tokio::test]
async fn test_submit_unknown_job_id_gets_job_not_found() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;
    client.login("acct.rig").await;

    client
        .send(json!({
            "id": 2,
            "method": "submit",
            "params": {"id": "acct.rig", "job_id": "999999999", "nonce": "2a", "result": ""}
        }))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["error"]["code"], 21);
    assert_eq!(reply["error"]["message"], "Job Not Found");
}

#[tokio::test]
async fn test_submit_malformed_nonce_gets_format_error() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;
    let (reply, _) = client.login("acct.rig").await;
    let job_id = reply["result"]["job"]["job_id"].as_str().expect("job id").to_string();

    for bad in ["XYZ", "", "0x2a", "12345678901234567"] {
        client
            .send(json!({
                "id": 3,
                "method": "submit",
                "params": {"id": "acct.rig", "job_id": job_id, "nonce": bad, "result": ""}
            }))
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["error"]["code"], 32, "nonce {bad:?}");
    }
}

#[tokio::test]
async fn test_submit_block_is_accepted_and_forwarded_to_node() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;
    let (reply, _) = client.login("acct.rig").await;
    let job_id = reply["result"]["job"]["job_id"].as_str().expect("job id").to_string();

    // share diff 1 and bits 1: any nonce meets the network target
    client
        .send(json!({
            "id": 4,
            "method": "submit",
            "params": {"id": "acct.rig", "job_id": job_id, "nonce": "2a", "result": ""}
        }))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["error"], Value::Null);
    assert_eq!(reply["result"]["status"], "OK");

    // block submission runs in a detached task
    for _ in 0..200 {
        if pool.syncer.submitted.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.syncer.submitted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_duplicate_share_is_rejected() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;
    let (reply, _) = client.login("acct.rig").await;
    let job_id = reply["result"]["job"]["job_id"].as_str().expect("job id").to_string();

    let submit = json!({
        "id": 5,
        "method": "submit",
        "params": {"id": "acct.rig", "job_id": job_id, "nonce": "2a", "result": ""}
    });
    client.send(submit.clone()).await;
    let first = client.recv().await;
    assert_eq!(first["result"]["status"], "OK");

    client.send(submit).await;
    let second = client.recv().await;
    assert_eq!(second["error"]["code"], 22);
    assert_eq!(second["error"]["message"], "Duplicate Share");
}

#[tokio::test]
async fn test_unknown_method_replies_then_closes() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;

    client
        .send(json!({"id": 6, "method": "mining.extranonce", "params": {}}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["error"]["code"], 34);
    client.expect_eof().await;
}

#[tokio::test]
async fn test_second_login_is_multiple_auth() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;
    client.login("acct.rig").await;

    client
        .send(json!({
            "id": 7,
            "method": "login",
            "params": {"login": "acct.rig", "pass": "x", "agent": "test/1.0"}
        }))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["error"]["code"], 40);
    client.expect_eof().await;
}

/// A template superseding [`test_template`]: next height, new parent
fn next_template() -> BtmBlockTemplate {
    BtmBlockTemplate {
        height: 101,
        previous_block_hash: "ba".repeat(32),
        ..test_template()
    }
}

#[tokio::test]
async fn test_oversized_line_closes_session() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;
    client.login("acct.rig").await;

    // a single line past the inbound cap counts as a flood
    let mut line = vec![b'a'; 20 * 1024];
    line.push(b'\n');
    client.writer.write_all(&line).await.expect("write");
    client.expect_eof().await;
}

#[tokio::test]
async fn test_idle_session_times_out() {
    let pool = start_pool_opts(1, 8, Duration::from_millis(200)).await;
    let mut client = Client::connect(pool.addr).await;

    // no traffic at all: the read deadline closes the session
    client.expect_eof().await;
}

#[tokio::test]
async fn test_new_template_broadcast_replaces_jobs() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;
    let (reply, _) = client.login("acct.rig").await;
    let old_job_id = reply["result"]["job"]["job_id"]
        .as_str()
        .expect("job id")
        .to_string();

    assert!(pool.server.update_block_template(Arc::new(next_template())));
    pool.server.broadcast();

    // a fresh job built from the new template reaches the client
    let job = client.recv().await;
    assert_eq!(job["method"], "job");
    assert_eq!(job["params"]["height"], "6500000000000000");
    assert_ne!(job["params"]["job_id"], Value::String(old_job_id.clone()));

    // the superseded job was dropped with the broadcast
    client
        .send(json!({
            "id": 8,
            "method": "submit",
            "params": {"id": "acct.rig", "job_id": old_job_id, "nonce": "2a", "result": ""}
        }))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["error"]["code"], 21);
    assert_eq!(reply["error"]["message"], "Job Not Found");
}

#[tokio::test]
async fn test_submit_against_old_height_is_stale() {
    let pool = start_pool(1, 8).await;
    let mut client = Client::connect(pool.addr).await;
    let (reply, _) = client.login("acct.rig").await;
    let job_id = reply["result"]["job"]["job_id"]
        .as_str()
        .expect("job id")
        .to_string();

    // move the chain tip without pushing new work to the session: the old
    // job is still in history but its height no longer matches
    assert!(pool.server.update_block_template(Arc::new(next_template())));

    client
        .send(json!({
            "id": 9,
            "method": "submit",
            "params": {"id": "acct.rig", "job_id": job_id, "nonce": "2a", "result": ""}
        }))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["error"]["code"], 32);
}

#[tokio::test]
async fn test_connection_ceiling_refuses_then_readmits() {
    let pool = start_pool(1, 1).await;

    let mut first = Client::connect(pool.addr).await;
    first.login("acct.rig").await;

    // over the ceiling: accepted at TCP level, dropped immediately
    let mut refused = Client::connect(pool.addr).await;
    refused.expect_eof().await;

    // closing the first session frees the slot
    drop(first);
    let mut readmitted = None;
    for _ in 0..200 {
        let mut candidate = Client::connect(pool.addr).await;
        candidate
            .send(json!({
                "id": 1,
                "method": "login",
                "params": {"login": "acct.rig2", "pass": "x", "agent": "test/1.0"}
            }))
            .await;
        let mut line = String::new();
        let n = timeout(Duration::from_secs(5), candidate.reader.read_line(&mut line))
            .await
            .expect("timeout")
            .expect("read");
        if n > 0 {
            let reply: Value = serde_json::from_str(&line).expect("json");
            assert_eq!(reply["result"]["status"], "OK");
            readmitted = Some(candidate);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(readmitted.is_some(), "slot never freed");
}
