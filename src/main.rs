//! Stratum pool server binary
//!
//! Wires the btm coin dialect into the engine: node syncer, verifier,
//! decoder and session-data builder, then runs the listener until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use stratum_pool::coins::btm::{BtmDecoder, BtmNodeSyncer, BtmSessionDataBuilder, BtmVerifier};
use stratum_pool::config::{Args, PoolConfig};
use stratum_pool::error::Result;
use stratum_pool::stratum::{
    ConnectionControl, Decoder, DiffAdjust, NodeSyncPump, NodeSyncer, ServerState, SessionBuilder,
    SessionDataBuilder, StratumListener, Verifier,
};
use stratum_pool::utils::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, &args.log_format);

    let config = PoolConfig::from_args(&args)?;
    info!(
        listen = %config.listen,
        node = %config.node.url,
        server_id = config.server_id,
        "starting stratum pool"
    );

    let root = CancellationToken::new();

    let conn_control = Arc::new(ConnectionControl::new(config.conn_control_config()));
    let server = Arc::new(ServerState::new(
        config.server_id,
        conn_control.clone(),
        config.max_connections,
    ));

    let syncer: Arc<dyn NodeSyncer> = Arc::new(BtmNodeSyncer::new(&config.node.url)?);
    let verifier: Arc<dyn Verifier> = Arc::new(BtmVerifier::new());
    let decoder: Arc<dyn Decoder> = Arc::new(BtmDecoder);
    let data_builder: Arc<dyn SessionDataBuilder> = Arc::new(BtmSessionDataBuilder::new(
        config.server_id,
        config.max_connections,
    ));
    let diff = Arc::new(DiffAdjust::new(config.session.initial_difficulty));

    let builder = Arc::new(SessionBuilder::new(
        server.clone(),
        Some(syncer.clone()),
        verifier,
        decoder,
        data_builder,
        diff,
        Duration::from_secs(config.session.idle_timeout_secs),
        Duration::from_secs(config.session.job_interval_secs),
        root.clone(),
    ));

    tokio::spawn(
        conn_control
            .clone()
            .run_sweep(Duration::from_secs(config.ban.sweep_interval_secs), root.clone()),
    );

    let pump = NodeSyncPump::new(server.clone(), syncer.clone());
    tokio::spawn(pump.run_interval(Duration::from_millis(config.node.sync_interval_ms), root.clone()));
    if let Some(rx) = server.take_sync_signal() {
        let pump = NodeSyncPump::new(server.clone(), syncer.clone());
        tokio::spawn(pump.run_signal(rx, root.clone()));
    }

    let listener = StratumListener::bind(
        &config.listen,
        server.clone(),
        builder,
        config.max_connections,
        root.clone(),
    )
    .await?;
    let listen_task = tokio::spawn(listener.run());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    root.cancel();
    let _ = listen_task.await;
    Ok(())
}
