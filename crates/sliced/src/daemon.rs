//! Run mode: store, controller and metrics server in one process.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use slicegrid_controller::Controller;
use slicegrid_core::SliceConfig;
use slicegrid_metrics::SliceMetrics;
use slicegrid_state::StateStore;
use tokio::sync::watch;
use tracing::{error, info};

use crate::http::build_router;

pub async fn run(config: SliceConfig, data_dir: PathBuf, metrics_port: u16) -> anyhow::Result<()> {
    info!(policy = %config.policy, domain = %config.domain, "slicegrid daemon starting");

    // ── State store ──────────────────────────────────────────────
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("slicegrid.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Controller ───────────────────────────────────────────────
    let metrics = Arc::new(SliceMetrics::new());
    let controller = Arc::new(Controller::new(store, config, metrics.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut controller_handle = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller.run(shutdown_rx).await;
        })
    };

    // ── Metrics server ───────────────────────────────────────────
    let router = build_router(metrics);
    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    info!(%addr, "metrics server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // The controller only returns early if it failed.
    tokio::select! {
        result = server.into_future() => result?,
        joined = &mut controller_handle => {
            return match joined {
                Ok(()) => Err(anyhow::anyhow!("controller stopped before shutdown")),
                Err(e) => {
                    error!(error = %e, "controller task failed");
                    Err(e.into())
                }
            };
        }
    }

    if let Err(e) = controller_handle.await {
        error!(error = %e, "controller task failed");
        return Err(e.into());
    }

    info!("slicegrid daemon stopped");
    Ok(())
}
