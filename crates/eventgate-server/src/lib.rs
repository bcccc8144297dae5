//! # eventgate-server
//!
//! The dispatch and fan-out engine behind an EventGate deployment: one
//! WebSocket connection per client multiplexes path-addressed requests and
//! topic subscriptions; published change events fan out hierarchically to
//! matching subscribers.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `handler` | Request/response surfaces and the `Handler` trait |
//! | `router` | Per-verb route tables, path patterns, URL parsing |
//! | `session` | Per-client delivery state, pending queue, replay |
//! | `registry` | Subscription registry and hierarchical fan-out |
//! | `dispatch` | Envelope pipelines, change emission, the reaper |
//! | `connection` | WebSocket upgrade and per-connection loops |
//! | `bridge` | HTTP-to-event bridge (shared-secret guarded) |
//! | `metrics` | Prometheus recorder and metric names |
//!
//! ## Data Flow
//!
//! `connection` → `dispatch` (request or subscription pipeline) → response.
//! Mutating requests and bridged HTTP calls → `registry` fan-out →
//! `session` delivery or queuing.

#![deny(unsafe_code)]

pub mod bridge;
pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod session;

pub use dispatch::{EventGate, GateConfig};
pub use handler::{Handler, Request, Response, handler_fn};

use std::sync::Arc;

use axum::Router as AxumRouter;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use eventgate_settings::BridgeSettings;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The dispatcher.
    pub gate: Arc<EventGate>,
    /// Bridge configuration.
    pub bridge: Arc<BridgeSettings>,
    /// Handle rendering the `/metrics` endpoint.
    pub metrics: PrometheusHandle,
}

/// Build the axum router: WebSocket endpoint, metrics, and the HTTP bridge
/// as the fallback for everything else.
pub fn build_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/ws", get(connection::ws_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(bridge::bridge_handler)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Render Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    metrics::render(&state.metrics)
}
