//! HTTP-to-event bridge.
//!
//! Backend services that do not hold a WebSocket connection announce changes
//! with ordinary HTTP calls: a mutating verb against a path, guarded by a
//! shared-secret header, is translated into an emitted event and fanned out
//! to subscribers exactly like a change published by a request handler.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use eventgate_core::envelope::{PublishedEvent, Verb};
use serde_json::Value;
use tracing::{info, warn};

use crate::AppState;
use crate::metrics::BRIDGE_REQUESTS_TOTAL;
use crate::router::normalize_path;

/// Shared-secret header name.
const SECRET_HEADER: &str = "x-server-secret";

/// Fallback handler translating HTTP calls into emitted events.
pub async fn bridge_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !state.bridge.enabled {
        return respond(StatusCode::NOT_FOUND, "Not Found.");
    }

    match &state.bridge.secret {
        Some(secret) => {
            let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
            if presented != Some(secret.as_str()) {
                warn!(path = uri.path(), "bridge call rejected: bad secret");
                return respond(StatusCode::UNAUTHORIZED, "Unauthorized.");
            }
        }
        None => {
            warn!("bridge call accepted without a configured secret");
        }
    }

    let verb = match verb_from_method(&method) {
        Some(verb) => verb,
        None => return respond(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed."),
    };

    let data: Option<Value> = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(path = uri.path(), %error, "bridge call rejected: invalid body");
                return respond(StatusCode::BAD_REQUEST, "Bad request.");
            }
        }
    };

    let path = normalize_path(uri.path());
    if verb.is_mutating() {
        info!(%verb, path, "bridged change event");
        state.gate.emit(PublishedEvent::new(verb, path, data)).await;
    }
    respond(StatusCode::OK, "Success.")
}

fn respond(status: StatusCode, text: &'static str) -> (StatusCode, &'static str) {
    metrics::counter!(BRIDGE_REQUESTS_TOTAL, "status" => status.as_str().to_string())
        .increment(1);
    (status, text)
}

fn verb_from_method(method: &Method) -> Option<Verb> {
    match *method {
        Method::GET => Some(Verb::Get),
        Method::POST => Some(Verb::Post),
        Method::PUT => Some(Verb::Put),
        Method::PATCH => Some(Verb::Patch),
        Method::DELETE => Some(Verb::Delete),
        Method::OPTIONS => Some(Verb::Options),
        _ => None,
    }
}
