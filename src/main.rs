//! utxoracled — Bitcoin-native BTC/USD price oracle daemon.
//!
//! Subscribes to a Bitcoin Core node's ZMQ `rawtx`/`rawblock` topics,
//! infers an exchange rate purely from on-chain and mempool output
//! value distributions, and serves the result over a `/ws` push
//! channel and a `/healthz` probe. No exchange APIs are consulted
//! anywhere in this binary.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use utxoracle::oracle::config::OracleConfig;
use utxoracle::oracle::orchestrator::Orchestrator;
use utxoracle::publish;

#[derive(Parser, Debug)]
#[command(name = "utxoracled", about = "Bitcoin-native BTC/USD price oracle")]
struct Cli {
    /// Bind address for the /healthz and /ws HTTP surface.
    #[arg(long, env = "UTXORACLE_HTTP_BIND_ADDR")]
    http_bind_addr: Option<String>,

    /// Overrides both the rawtx and rawblock ZMQ endpoints at once, for
    /// the common case where a node publishes both topics on one socket.
    #[arg(long)]
    source_endpoint: Option<String>,

    /// Path to an additional `.env`-style file to load before the
    /// process environment is read (on top of the default `.env` in
    /// the working directory).
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Emit JSON-formatted log lines instead of the default compact format.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        dotenv::from_path(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?;
    }
    init_tracing(cli.log_json);

    let mut config = OracleConfig::from_env();
    if let Some(addr) = cli.http_bind_addr {
        config.http_bind_addr = addr;
    }
    if let Some(endpoint) = cli.source_endpoint {
        config.zmq_rawtx_endpoint = endpoint.clone();
        config.zmq_rawblock_endpoint = endpoint;
    }

    info!(
        rawtx = %config.zmq_rawtx_endpoint,
        rawblock = %config.zmq_rawblock_endpoint,
        http = %config.http_bind_addr,
        "starting utxoracled"
    );

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;

    let orchestrator = Orchestrator::new(config.clone());
    let running = orchestrator.spawn();

    let state = publish::AppState {
        updates: running.updates.clone(),
        source_healthy: running.source_healthy.clone(),
        stats: running.stats.clone(),
        metrics: metrics_handle,
    };

    let router = publish::router(state);
    let addr: SocketAddr = config
        .http_bind_addr
        .parse()
        .with_context(|| format!("invalid HTTP bind address: {}", config.http_bind_addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "http surface listening");

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                warn!(error = %e, "http server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    running.shutdown().await;
    Ok(())
}
