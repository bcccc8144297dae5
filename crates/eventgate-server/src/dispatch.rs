//! The dispatcher: session ownership, envelope decoding, the request and
//! subscription pipelines, change-event emission, and the reaper.
//!
//! [`EventGate`] is built mutably (route registration), then wrapped in an
//! `Arc` and shared by every connection task. Routes are immutable once
//! dispatch begins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use eventgate_core::envelope::{
    ClientEnvelope, PublishedEvent, RequestData, SubscriptionAction, SubscriptionData, Verb,
};
use eventgate_core::errors::GateError;
use eventgate_core::logging::LogSink;
use eventgate_settings::ServerSettings;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::handler::{Handler, Request, Response};
use crate::metrics::{
    REQUEST_ERRORS_TOTAL, REQUESTS_TOTAL, SESSIONS_ACTIVE, SESSIONS_REAPED_TOTAL,
    SUBSCRIPTION_MESSAGES_TOTAL,
};
use crate::registry::SubscriptionRegistry;
use crate::router::{Router, split_url};
use crate::session::{ConnectionHandle, Session, SessionMap};

/// Dispatcher tuning, extracted from server settings.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Grace period a disconnected session survives before eviction.
    pub keep_alive: Duration,
    /// Reaper sweep interval.
    pub reap_interval: Duration,
    /// Whether mutating requests publish a change event at their path.
    pub publish_changes: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for GateConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            keep_alive: Duration::from_millis(settings.keep_alive_ms),
            reap_interval: Duration::from_millis(settings.reap_interval_ms),
            publish_changes: settings.publish_changes,
        }
    }
}

/// The dispatch and fan-out engine.
pub struct EventGate {
    router: Router,
    middlewares: Vec<Arc<dyn Handler>>,
    sessions: Arc<SessionMap>,
    registry: Arc<SubscriptionRegistry>,
    log: Arc<LogSink>,
    config: GateConfig,
}

impl EventGate {
    /// New dispatcher with the given tuning and observability sink.
    pub fn new(config: GateConfig, log: LogSink) -> Self {
        let sessions = Arc::new(SessionMap::new());
        let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&sessions)));
        Self {
            router: Router::new(),
            middlewares: Vec::new(),
            sessions,
            registry,
            log: Arc::new(log),
            config,
        }
    }

    /// The session map.
    pub fn sessions(&self) -> &Arc<SessionMap> {
        &self.sessions
    }

    /// The subscription registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// The observability sink.
    pub fn log(&self) -> &Arc<LogSink> {
        &self.log
    }

    /// The dispatcher tuning.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    // Registration surface. Only available before the gate is shared.

    /// Register a global middleware, run before every route's own chain in
    /// both pipelines.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Handler>) {
        self.middlewares.push(middleware);
    }

    /// Register a route with a middleware chain.
    pub fn route_with(
        &mut self,
        verb: Verb,
        path: &str,
        middlewares: Vec<Arc<dyn Handler>>,
        handler: Arc<dyn Handler>,
    ) {
        self.router.register(verb, path, middlewares, handler);
    }

    /// Register a route without middleware.
    pub fn route(&mut self, verb: Verb, path: &str, handler: Arc<dyn Handler>) {
        self.route_with(verb, path, Vec::new(), handler);
    }

    /// Register a `get` route.
    pub fn get(&mut self, path: &str, handler: Arc<dyn Handler>) {
        self.route(Verb::Get, path, handler);
    }

    /// Register a `post` route.
    pub fn post(&mut self, path: &str, handler: Arc<dyn Handler>) {
        self.route(Verb::Post, path, handler);
    }

    /// Register a `put` route.
    pub fn put(&mut self, path: &str, handler: Arc<dyn Handler>) {
        self.route(Verb::Put, path, handler);
    }

    /// Register a `patch` route.
    pub fn patch(&mut self, path: &str, handler: Arc<dyn Handler>) {
        self.route(Verb::Patch, path, handler);
    }

    /// Register a `delete` route.
    pub fn delete(&mut self, path: &str, handler: Arc<dyn Handler>) {
        self.route(Verb::Delete, path, handler);
    }

    /// Register an `options` route.
    pub fn options(&mut self, path: &str, handler: Arc<dyn Handler>) {
        self.route(Verb::Options, path, handler);
    }

    /// Register the same handler under every verb.
    pub fn all(&mut self, path: &str, handler: Arc<dyn Handler>) {
        for verb in Verb::ALL {
            self.route(verb, path, Arc::clone(&handler));
        }
    }

    /// Remove every route for a verb whose path equals `path`.
    pub fn remove_route(&mut self, verb: Verb, path: &str) {
        self.router.remove(verb, path);
    }

    // Connection lifecycle.

    /// Bind a connection to its session, creating or upgrading as needed.
    ///
    /// The pending queue is replayed iff this is a reconnect.
    pub async fn connect(
        &self,
        client_id: &str,
        reconnect: bool,
        handle: ConnectionHandle,
    ) -> Arc<Session> {
        let (session, created) = self
            .sessions
            .upgrade_or_insert(client_id, handle, reconnect)
            .await;
        if created {
            metrics::gauge!(SESSIONS_ACTIVE).increment(1.0);
            info!(client_id, "session created");
            self.log
                .info("session created", Some(json!({"clientId": client_id})));
        } else {
            info!(client_id, reconnect, "session upgraded");
            self.log
                .info("session upgraded", Some(json!({"clientId": client_id})));
        }
        session
    }

    /// Record a connection close. The session stays, queueing deliveries,
    /// until the reaper evicts it. `closing` identifies the connection that
    /// closed; a close from a connection the session no longer holds is
    /// ignored.
    pub fn disconnect(&self, session: &Session, closing: &ConnectionHandle) {
        session.mark_disconnected(closing);
        self.log.debug(
            "session disconnected",
            Some(json!({"clientId": session.client_id()})),
        );
    }

    /// Inject a change event into the fan-out pipeline.
    ///
    /// This is the surface the HTTP bridge calls; it behaves exactly like
    /// the change event emitted after a mutating request.
    pub async fn emit(&self, event: PublishedEvent) {
        self.registry.publish(&event).await;
    }

    // Envelope dispatch.

    /// Decode and dispatch one inbound frame from a session's connection.
    pub async fn dispatch_message(&self, session: &Arc<Session>, raw: &str) {
        match serde_json::from_str::<ClientEnvelope>(raw) {
            Ok(ClientEnvelope::Request { uuid, data }) => {
                self.handle_request(session, &uuid, data).await;
            }
            Ok(ClientEnvelope::Subscription { uuid, data }) => {
                self.handle_subscription(session, &uuid, data).await;
            }
            Err(decode_error) => {
                metrics::counter!(REQUEST_ERRORS_TOTAL, "kind" => "protocol").increment(1);
                // Answer on the envelope's correlation id when it survives
                // the malformed payload; otherwise there is nothing to
                // correlate a response to.
                match recover_uuid(raw) {
                    Some(uuid) => {
                        warn!(uuid, %decode_error, "malformed envelope, answering 500");
                        self.log.error(
                            "malformed envelope",
                            Some(json!({"uuid": uuid, "error": decode_error.to_string()})),
                        );
                        let mut res = Response::new(uuid, Arc::clone(session));
                        res.send_error(500, decode_error.to_string());
                    }
                    None => {
                        error!(%decode_error, "undecodable frame dropped");
                        self.log.error(
                            "undecodable frame dropped",
                            Some(json!({"error": decode_error.to_string()})),
                        );
                    }
                }
            }
        }
    }

    /// The request pipeline: resolve, middleware chain, handler, change
    /// event, default response.
    async fn handle_request(&self, session: &Arc<Session>, uuid: &str, data: RequestData) {
        let verb = data.method;
        metrics::counter!(REQUESTS_TOTAL, "verb" => verb.as_str()).increment(1);
        let (path, query) = split_url(&data.url);

        let mut res = Response::new(uuid, Arc::clone(session));
        let Some((route, params)) = self.router.lookup(verb, &path) else {
            metrics::counter!(REQUEST_ERRORS_TOTAL, "kind" => "route_not_found").increment(1);
            debug!(%verb, path, "no route matched");
            self.log.warn(
                "no route matched",
                Some(json!({"method": verb.as_str(), "path": path})),
            );
            res.send_error(404, "Not Found.");
            return;
        };

        let mut req = Request {
            verb,
            original_url: data.url.clone(),
            path: path.clone(),
            headers: data.headers.unwrap_or_default(),
            params,
            query,
            body: data.data,
        };

        let outcome = run_pipeline(
            &self.middlewares,
            route.middlewares(),
            route.handler(),
            &mut req,
            &mut res,
        )
        .await;

        match outcome {
            Ok(short_circuited) => {
                if self.config.publish_changes && verb.is_mutating() && !short_circuited {
                    self.emit(PublishedEvent::new(verb, path.clone(), res.body().cloned()))
                        .await;
                }
                if !res.is_sent() {
                    res.send(None);
                }
                self.log.info(
                    "request complete",
                    Some(json!({"uuid": uuid, "method": verb.as_str(), "path": path})),
                );
            }
            Err(err) => {
                metrics::counter!(REQUEST_ERRORS_TOTAL, "kind" => "handler").increment(1);
                error!(uuid, %verb, path, %err, "request pipeline failed");
                self.log.error(
                    "request pipeline failed",
                    Some(json!({"uuid": uuid, "path": path, "error": err.to_string()})),
                );
                if !res.is_sent() {
                    res.send_error(err.status(), err.to_string());
                }
            }
        }
    }

    /// The subscription pipeline: resolve a `get` route, middleware chain,
    /// then the control action.
    async fn handle_subscription(&self, session: &Arc<Session>, uuid: &str, data: SubscriptionData) {
        let action = data.method;
        metrics::counter!(SUBSCRIPTION_MESSAGES_TOTAL, "action" => String::from(action))
            .increment(1);
        let (path, query) = split_url(&data.url);

        let mut res = Response::new(uuid, Arc::clone(session));
        // Subscriptions are read-only in routing terms.
        let Some((route, params)) = self.router.lookup(Verb::Get, &path) else {
            metrics::counter!(REQUEST_ERRORS_TOTAL, "kind" => "route_not_found").increment(1);
            self.log.warn(
                "no route matched for subscription",
                Some(json!({"path": path})),
            );
            res.send_error(404, "Not Found.");
            return;
        };

        let mut req = Request {
            verb: Verb::Get,
            original_url: data.url.clone(),
            path: path.clone(),
            headers: data.headers.unwrap_or_default(),
            params,
            query,
            body: None,
        };

        for middleware in self.middlewares.iter().chain(route.middlewares()) {
            if let Err(err) = middleware.handle(&mut req, &mut res).await {
                metrics::counter!(REQUEST_ERRORS_TOTAL, "kind" => "handler").increment(1);
                error!(uuid, path, %err, "subscription middleware failed");
                self.log.error(
                    "subscription middleware failed",
                    Some(json!({"uuid": uuid, "path": path, "error": err.to_string()})),
                );
                if !res.is_sent() {
                    res.send_error(err.status(), err.to_string());
                }
                return;
            }
        }
        if res.is_sent() {
            // A middleware already answered; the control action is skipped.
            return;
        }

        match action {
            SubscriptionAction::Subscribe => {
                let subscription = self
                    .registry
                    .subscribe(&path, session.client_id(), data.filters)
                    .await;
                self.log.info(
                    "subscribed",
                    Some(json!({"clientId": session.client_id(), "path": path})),
                );
                let _ = res.status_text("Subscribed.");
                res.send(Some(json!({"id": subscription.id})));
            }
            SubscriptionAction::Unsubscribe => {
                self.registry
                    .unsubscribe(&path, session.client_id(), data.filters.as_ref())
                    .await;
                self.log.info(
                    "unsubscribed",
                    Some(json!({"clientId": session.client_id(), "path": path})),
                );
                let _ = res.status_text("Unsubscribed.");
                res.send(None);
            }
            SubscriptionAction::Unknown => {
                metrics::counter!(REQUEST_ERRORS_TOTAL, "kind" => "validation").increment(1);
                res.send_error(400, "Bad request.");
            }
        }
    }

    // Reaper.

    /// Evict every session disconnected longer than the keep-alive window,
    /// dropping its subscriptions. Returns the number evicted.
    pub async fn reap(&self, now: DateTime<Utc>) -> usize {
        let keep_alive =
            chrono::Duration::milliseconds(self.config.keep_alive.as_millis() as i64);
        let cutoff = now - keep_alive;
        let mut evicted = 0;

        for session in self.sessions.snapshot().await {
            let client_id = session.client_id();
            // Expiry is re-checked under the map's write lock, so a session
            // that reconnects between snapshot and sweep survives.
            if self
                .sessions
                .remove_if_disconnected(client_id, cutoff)
                .await
                .is_none()
            {
                continue;
            }
            self.registry.drop_session(client_id).await;
            metrics::counter!(SESSIONS_REAPED_TOTAL).increment(1);
            metrics::gauge!(SESSIONS_ACTIVE).decrement(1.0);
            info!(client_id, "session evicted");
            self.log
                .info("session evicted", Some(json!({"clientId": client_id})));
            evicted += 1;
        }
        evicted
    }

    /// Spawn the periodic reaper task. Runs until the process exits.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let gate = Arc::clone(self);
        let interval = gate.config.reap_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let _ = ticker.tick().await;
                let _ = gate.reap(Utc::now()).await;
            }
        })
    }
}

/// Run the middleware chain then the handler.
///
/// The handler always runs, even when a middleware already sent the
/// response. Returns whether the response was sent *before* the handler ran
/// (a short-circuit, which suppresses change publishing); the first error
/// aborts the pipeline.
async fn run_pipeline(
    global: &[Arc<dyn Handler>],
    middlewares: &[Arc<dyn Handler>],
    handler: &Arc<dyn Handler>,
    req: &mut Request,
    res: &mut Response,
) -> Result<bool, GateError> {
    for middleware in global.iter().chain(middlewares) {
        middleware.handle(req, res).await?;
    }
    let short_circuited = res.is_sent();
    handler.handle(req, res).await?;
    Ok(short_circuited)
}

/// Pull a string `uuid` field out of an otherwise-undecodable frame.
fn recover_uuid(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value.get("uuid")?.as_str().map(str::to_string)
}
