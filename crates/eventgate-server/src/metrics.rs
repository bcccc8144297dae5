//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Sessions evicted by the reaper (counter).
pub const SESSIONS_REAPED_TOTAL: &str = "sessions_reaped_total";
/// Requests dispatched total (counter, labels: verb).
pub const REQUESTS_TOTAL: &str = "requests_total";
/// Request pipeline errors total (counter, labels: kind).
pub const REQUEST_ERRORS_TOTAL: &str = "request_errors_total";
/// Subscription control messages total (counter, labels: action).
pub const SUBSCRIPTION_MESSAGES_TOTAL: &str = "subscription_messages_total";
/// Events injected into the fan-out pipeline (counter).
pub const EVENTS_PUBLISHED: &str = "events_published_total";
/// Event deliveries, primary and propagated (counter).
pub const EVENTS_DELIVERED: &str = "events_delivered_total";
/// Bridged HTTP calls total (counter, labels: status).
pub const BRIDGE_REQUESTS_TOTAL: &str = "bridge_requests_total";
