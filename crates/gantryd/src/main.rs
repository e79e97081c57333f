//! gantryd — the Gantry daemon.
//!
//! Just-in-time node provisioner for a container-orchestration cluster:
//! watches for pods the cluster scheduler cannot place, batches them,
//! computes a minimal set of new nodes, launches them through the
//! configured cloud provider, and binds the pods before the nodes are
//! Ready.
//!
//! # Usage
//!
//! ```text
//! gantryd --config gantry.toml --fleet fleet.toml --port 8080
//! gantryd --cluster-name dev --cluster-endpoint https://localhost:6443 --data-dir /var/lib/gantry
//! ```
//!
//! The daemon is single-writer by design; run one replica and leave
//! leader election to the caller.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use gantry_cloud::{ProviderRegistry, StaticFleet};
use gantry_core::config::{ClusterConfig, parse_duration};
use gantry_core::GantryConfig;
use gantry_metrics::MetricsRegistry;
use gantry_provision::{Batcher, Provisioner};
use gantry_state::{Cluster, ClusterStore, TracingRecorder, WatchEvent};

use gantryd::{build_router, run_watch_pump};

#[derive(Parser)]
#[command(name = "gantryd", about = "Gantry — just-in-time node provisioner")]
struct Cli {
    /// Path to gantry.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cluster name handed to node bootstrap (overrides the config).
    #[arg(long)]
    cluster_name: Option<String>,

    /// Cluster API endpoint handed to node bootstrap (overrides the
    /// config).
    #[arg(long)]
    cluster_endpoint: Option<String>,

    /// HTTP port serving /healthz and /metrics.
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Data directory for the cluster store. In-memory when omitted.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Fleet definition for the static provider (fleet.toml).
    #[arg(long)]
    fleet: Option<PathBuf>,

    /// Batcher idle window, e.g. "1s" (overrides the config).
    #[arg(long)]
    batch_idle_window: Option<String>,

    /// Batcher max window, e.g. "10s" (overrides the config).
    #[arg(long)]
    batch_max_window: Option<String>,

    /// Log filter, e.g. "info" or "gantry_provision=debug" (overrides
    /// the config).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GantryConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GantryConfig {
            cluster: ClusterConfig {
                name: "gantry".to_string(),
                endpoint: "https://localhost:6443".to_string(),
            },
            provisioning: None,
            aws: None,
            log_level: None,
        },
    };

    let log_filter = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info,gantryd=debug,gantry_provision=debug".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.parse().expect("static default filter parses")),
        )
        .init();

    let cluster_name = cli.cluster_name.unwrap_or_else(|| config.cluster.name.clone());
    let cluster_endpoint = cli
        .cluster_endpoint
        .unwrap_or_else(|| config.cluster.endpoint.clone());
    info!(%cluster_name, %cluster_endpoint, "gantryd starting");

    // ── Cluster store ──────────────────────────────────────────────
    let store = match &cli.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let path = dir.join("gantry.redb");
            let store = ClusterStore::open(&path)?;
            info!(path = %path.display(), "cluster store opened");
            store
        }
        None => {
            info!("using in-memory cluster store");
            ClusterStore::open_in_memory()?
        }
    };

    // ── Cloud provider ─────────────────────────────────────────────
    let fleet = match &cli.fleet {
        Some(path) => StaticFleet::from_file(path)?,
        None => StaticFleet::default_fleet(&["us-east-1a", "us-east-1b", "us-east-1c"]),
    };
    let cloud = Arc::new(ProviderRegistry::new().register("static", Arc::new(fleet)));

    // ── Mirror, batcher, provisioner ───────────────────────────────
    let cluster = Arc::new(Cluster::new());
    // Rebuild the mirror from whatever the store already holds.
    for node in store.list_nodes()? {
        cluster.apply(&WatchEvent::NodeUpserted(node));
    }
    for pod in store.list_pods()? {
        cluster.apply(&WatchEvent::PodUpserted(pod));
    }

    let idle_window = window(&cli.batch_idle_window, config.batch_idle_window())?;
    let max_window = window(&cli.batch_max_window, config.batch_max_window())?;
    let batcher = Arc::new(Batcher::new(idle_window, max_window));
    info!(
        idle_ms = idle_window.as_millis() as u64,
        max_ms = max_window.as_millis() as u64,
        "batcher configured"
    );

    let metrics = Arc::new(MetricsRegistry::new());
    let provisioner = Arc::new(Provisioner::new(
        store.clone(),
        cloud,
        cluster.clone(),
        batcher.clone(),
        Arc::new(TracingRecorder),
        metrics.clone(),
    ));

    // ── Shutdown signal ────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────────
    let pump_handle = tokio::spawn(run_watch_pump(
        cluster,
        batcher,
        store.watch(),
        shutdown_rx.clone(),
    ));
    let loop_handle = {
        let provisioner = provisioner.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { provisioner.run(shutdown_rx).await })
    };

    // Anything already pending in the store gets a first pass.
    provisioner.trigger();

    // ── HTTP server ────────────────────────────────────────────────
    let router = build_router(metrics);
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!(%addr, "serving /healthz and /metrics");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
    server.await?;

    let _ = loop_handle.await;
    let _ = pump_handle.await;
    info!("gantryd stopped");
    Ok(())
}

fn window(overridden: &Option<String>, from_config: Duration) -> anyhow::Result<Duration> {
    match overridden {
        Some(text) => Ok(parse_duration(text)?),
        None => Ok(from_config),
    }
}
