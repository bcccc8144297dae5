//! EventGate server binary.
//!
//! Runs the gateway as a standalone pub/sub broker: a catch-all route
//! accepts every request and subscription path, mutating requests and
//! bridged HTTP calls publish change events, and subscribers receive the
//! hierarchical fan-out. Embedding applications that want custom handlers
//! use `eventgate-server` as a library instead.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use eventgate_core::logging::LogSink;
use eventgate_server::{AppState, EventGate, GateConfig, build_router, handler_fn, metrics};
use eventgate_settings::{GateSettings, load_settings, load_settings_from_path};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "eventgate", about = "WebSocket request/subscription gateway")]
struct Args {
    /// Settings file (defaults to ~/.eventgate/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => load_settings().context("loading settings")?,
    };
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    init_tracing(&settings);
    eventgate_settings::init_settings(settings.clone());

    let metrics_handle = metrics::install_recorder();

    let mut gate = EventGate::new(GateConfig::from(&settings.server), LogSink::new());
    // Broker mode: accept every path so clients can subscribe anywhere.
    // The echoed body is what mutating requests publish as the change event.
    gate.all(
        "/*",
        handler_fn(|req, res| {
            res.send(req.body.clone());
            Ok(())
        }),
    );

    let gate = Arc::new(gate);
    let _reaper = gate.spawn_reaper();

    let state = AppState {
        gate,
        bridge: Arc::new(settings.bridge.clone()),
        metrics: metrics_handle,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "eventgate server started");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down");
    Ok(())
}

fn init_tracing(settings: &GateSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
}
