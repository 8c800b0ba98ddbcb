use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use sweepd_core::{NodeId, SystemClock};
use sweepd_infra::TtlConfig;
use sweepd_infra::jobs::LocalTimerService;

use sweepd_api::app::{self, services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    sweepd_observability::init();

    let node_id = match std::env::var("SWEEPD_NODE_ID") {
        Ok(raw) => raw.parse::<NodeId>().context("invalid SWEEPD_NODE_ID")?,
        Err(_) => NodeId::generate(),
    };
    let listen: SocketAddr = std::env::var("SWEEPD_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .context("invalid SWEEPD_LISTEN")?;
    let leader = std::env::var("SWEEPD_LEADER")
        .map(|v| !matches!(v.trim(), "0" | "false"))
        .unwrap_or(true);

    let config = TtlConfig::from_env();
    let stores = services::build_stores().await?;
    let (services, manager) = services::wire(node_id.clone(), stores, config.clone(), leader);

    let cancel = CancellationToken::new();
    let timer = LocalTimerService::spawn(
        services.adapter.clone(),
        Arc::new(SystemClock),
        config.timer_sync_tick_interval,
    );
    let manager = tokio::spawn(manager.run(timer, cancel.clone()));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        shutdown.cancel();
    });

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    tracing::info!(node_id = %node_id, leader, "listening on {}", listener.local_addr()?);

    let server_cancel = cancel.clone();
    axum::serve(listener, app::build_app(services))
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await?;

    // The server can also stop on its own; make sure the manager follows.
    cancel.cancel();
    manager.await??;
    tracing::info!("shut down");
    Ok(())
}
