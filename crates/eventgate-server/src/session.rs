//! Per-client session state: connection handle, pending queue, disconnect
//! bookkeeping.
//!
//! A session is created on a client's first connection and reused across
//! reconnects; the dispatcher's session map is its sole owner. While a
//! session has no live connection, event deliveries accumulate in an
//! unbounded FIFO queue and are replayed on a reconnecting upgrade.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use eventgate_core::envelope::{EventData, Headers, ResponseData, ServerEnvelope};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

/// Value of the server-identity response header.
const SERVER_IDENT: &str = "EventGate";

/// Outbound frames are pre-serialized and shared between recipients.
pub type OutboundFrame = Arc<String>;

/// Write half of a client connection.
pub type ConnectionHandle = mpsc::UnboundedSender<OutboundFrame>;

/// One client identity and its delivery state.
pub struct Session {
    client_id: String,
    state: Mutex<SessionState>,
}

struct SessionState {
    handle: Option<ConnectionHandle>,
    disconnected_at: Option<DateTime<Utc>>,
    pending: VecDeque<(String, EventData)>,
}

impl Session {
    /// Create a session bound to a live connection.
    pub fn new(client_id: impl Into<String>, handle: ConnectionHandle) -> Self {
        Self {
            client_id: client_id.into(),
            state: Mutex::new(SessionState {
                handle: Some(handle),
                disconnected_at: None,
                pending: VecDeque::new(),
            }),
        }
    }

    /// The client identity this session belongs to.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// When the session disconnected, if it is currently offline.
    pub fn disconnected_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().disconnected_at
    }

    /// Whether a live connection handle is bound.
    pub fn is_connected(&self) -> bool {
        self.state.lock().handle.is_some()
    }

    /// Number of queued deliveries awaiting replay.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Deliver an event envelope, queueing when the connection is gone.
    ///
    /// `uuid` is the subscription id the delivery belongs to; queued entries
    /// keep it so replay reproduces the original envelope.
    pub fn deliver_event(&self, uuid: &str, event: EventData) {
        let mut state = self.state.lock();
        if let Some(frame) = encode_event(uuid, &event) {
            if let Some(handle) = &state.handle {
                if handle.send(frame).is_ok() {
                    debug!(client_id = %self.client_id, uuid, "event sent");
                    return;
                }
            }
        } else {
            return;
        }
        debug!(client_id = %self.client_id, uuid, "event queued");
        state.pending.push_back((uuid.to_string(), event));
    }

    /// Deliver a response envelope over the live connection.
    ///
    /// Responses are only produced while a request is in flight, so there is
    /// no queueing path; a closed connection is logged and the response
    /// dropped.
    pub fn deliver_response(&self, uuid: &str, mut data: ResponseData) {
        augment_headers(&mut data);
        let envelope = ServerEnvelope::Response {
            uuid: uuid.to_string(),
            data,
        };
        let frame = match serde_json::to_string(&envelope) {
            Ok(json) => Arc::new(json),
            Err(error) => {
                warn!(client_id = %self.client_id, uuid, %error, "failed to encode response");
                return;
            }
        };

        let state = self.state.lock();
        match &state.handle {
            Some(handle) if handle.send(frame).is_ok() => {
                debug!(client_id = %self.client_id, uuid, "response sent");
            }
            _ => {
                warn!(client_id = %self.client_id, uuid, "response dropped: connection closed");
            }
        }
    }

    /// Record the disconnect time and release the connection handle.
    ///
    /// Only honored when `closing` is the currently bound connection: a
    /// session rebound to a newer connection ignores the old socket's late
    /// close instead of degrading a live session to queuing.
    pub fn mark_disconnected(&self, closing: &ConnectionHandle) {
        let mut state = self.state.lock();
        match &state.handle {
            Some(current) if current.same_channel(closing) => {
                state.handle = None;
                state.disconnected_at = Some(Utc::now());
                debug!(client_id = %self.client_id, "session disconnected, scheduled for cleanup");
            }
            _ => {
                debug!(client_id = %self.client_id, "close from superseded connection ignored");
            }
        }
    }

    /// Rebind to a new connection, optionally replaying the pending queue.
    ///
    /// Replay happens under the session lock so queued deliveries hit the
    /// wire before any event published after the upgrade.
    pub fn upgrade(&self, handle: ConnectionHandle, replay: bool) {
        let mut state = self.state.lock();
        state.disconnected_at = None;

        if replay {
            while let Some((uuid, event)) = state.pending.pop_front() {
                let sent = match encode_event(&uuid, &event) {
                    Some(frame) => handle.send(frame).is_ok(),
                    None => false,
                };
                if sent {
                    debug!(client_id = %self.client_id, uuid, "queued event replayed");
                } else {
                    // Connection died mid-replay; keep the entry for the
                    // next reconnect.
                    state.pending.push_front((uuid, event));
                    break;
                }
            }
        }

        state.handle = Some(handle);
    }
}

fn encode_event(uuid: &str, event: &EventData) -> Option<OutboundFrame> {
    let envelope = ServerEnvelope::Event {
        uuid: uuid.to_string(),
        data: event.clone(),
    };
    match serde_json::to_string(&envelope) {
        Ok(json) => Some(Arc::new(json)),
        Err(error) => {
            warn!(uuid, %error, "failed to encode event");
            None
        }
    }
}

/// Add the server-identity, date, and inferred content-type headers.
fn augment_headers(data: &mut ResponseData) {
    let headers = data.headers.get_or_insert_with(Headers::new);
    let _ = headers.insert("X-Powered-By".to_string(), SERVER_IDENT.to_string());
    let _ = headers.insert("Date".to_string(), Utc::now().to_rfc3339());

    match &data.data {
        Some(Value::String(text)) => {
            let _ = headers.insert("Content-Type".to_string(), "text/html".to_string());
            let _ = headers.insert("Content-Length".to_string(), text.len().to_string());
        }
        Some(Value::Object(_) | Value::Array(_)) => {
            let _ = headers.insert("Content-Type".to_string(), "application/json".to_string());
        }
        _ => {
            let _ = headers.insert("Content-Type".to_string(), "*/*".to_string());
        }
    }
}

/// The dispatcher's map of sessions, keyed by client identity.
///
/// Exactly one session exists per client identity at any time.
#[derive(Default)]
pub struct SessionMap {
    inner: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session by client identity.
    pub async fn get(&self, client_id: &str) -> Option<Arc<Session>> {
        self.inner.read().await.get(client_id).cloned()
    }

    /// Bind a connection to the client's session, creating it on first
    /// contact. Returns the session and whether it was newly created.
    ///
    /// Upgrade and insert happen under the map's write lock, so a concurrent
    /// reaper sweep cannot evict a session between lookup and rebind.
    pub async fn upgrade_or_insert(
        &self,
        client_id: &str,
        handle: ConnectionHandle,
        replay: bool,
    ) -> (Arc<Session>, bool) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.get(client_id) {
            session.upgrade(handle, replay);
            (Arc::clone(session), false)
        } else {
            let session = Arc::new(Session::new(client_id, handle));
            let _ = inner.insert(client_id.to_string(), Arc::clone(&session));
            (session, true)
        }
    }

    /// Remove the session only if it is still disconnected and its
    /// disconnect time is at or before `cutoff`.
    ///
    /// The check runs under the map's write lock: a session that reconnected
    /// after being observed as expired survives the sweep.
    pub async fn remove_if_disconnected(
        &self,
        client_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Option<Arc<Session>> {
        let mut inner = self.inner.write().await;
        let session = inner.get(client_id)?;
        if session.disconnected_at().is_some_and(|at| at <= cutoff) {
            inner.remove(client_id)
        } else {
            None
        }
    }

    /// Insert a session under its client identity.
    pub async fn insert(&self, session: Arc<Session>) {
        let _ = self
            .inner
            .write()
            .await
            .insert(session.client_id().to_string(), session);
    }

    /// Remove a session by client identity.
    pub async fn remove(&self, client_id: &str) -> Option<Arc<Session>> {
        self.inner.write().await.remove(client_id)
    }

    /// Snapshot of all sessions, for the reaper sweep.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the map is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
