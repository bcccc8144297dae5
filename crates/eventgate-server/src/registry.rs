//! Subscription registry and hierarchical event fan-out.
//!
//! Topics are exact path strings mapped to the subscriptions registered at
//! them. Publishing an event delivers to the exact topic first, then
//! propagates to the single-segment root alias and to each ancestor prefix,
//! tagging propagated deliveries with an origin reference back at the
//! triggering path.

use std::collections::HashMap;
use std::sync::Arc;

use eventgate_core::envelope::{EventData, EventOrigin, PublishedEvent};
use eventgate_core::filter::{QueryFilter, matches};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::metrics::{EVENTS_DELIVERED, EVENTS_PUBLISHED};
use crate::router::normalize_path;
use crate::session::SessionMap;

/// An active subscription: a client's standing interest in a topic path.
///
/// Never mutated after creation. Identity for idempotent re-subscription is
/// the `(client, path, filter)` triple; the `id` is the wire-visible handle
/// used as the uuid of every delivered event envelope. An omitted filter is
/// stored as the empty filter, so `{}` and absence name the same triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Wire-visible subscription id.
    pub id: String,
    /// Owning client identity.
    pub client_id: String,
    /// Normalized topic path.
    pub path: String,
    /// Filter predicate; empty matches everything.
    pub filter: QueryFilter,
}

impl Subscription {
    fn matches(&self, body: &Value) -> bool {
        matches(body, &self.filter)
    }
}

/// Topic-path to subscription-set mapping, plus the fan-out pipeline.
pub struct SubscriptionRegistry {
    sessions: Arc<SessionMap>,
    topics: RwLock<HashMap<String, Vec<Arc<Subscription>>>>,
}

impl SubscriptionRegistry {
    /// New registry delivering through the given session map.
    pub fn new(sessions: Arc<SessionMap>) -> Self {
        Self {
            sessions,
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscription, reusing an existing one with an identical
    /// `(client, path, filter)` triple.
    pub async fn subscribe(
        &self,
        path: &str,
        client_id: &str,
        filter: Option<QueryFilter>,
    ) -> Arc<Subscription> {
        let path = normalize_path(path);
        let filter = filter.unwrap_or_default();
        let mut topics = self.topics.write().await;
        let bucket = topics.entry(path.clone()).or_default();

        if let Some(existing) = bucket
            .iter()
            .find(|sub| sub.client_id == client_id && sub.filter == filter)
        {
            debug!(client_id, path, id = %existing.id, "reusing existing subscription");
            return Arc::clone(existing);
        }

        let subscription = Arc::new(Subscription {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            path: path.clone(),
            filter,
        });
        bucket.push(Arc::clone(&subscription));
        debug!(client_id, path, id = %subscription.id, "subscription created");
        subscription
    }

    /// Remove the subscription matching the `(client, path, filter)` triple.
    /// No-op when none matches.
    pub async fn unsubscribe(&self, path: &str, client_id: &str, filter: Option<&QueryFilter>) {
        let path = normalize_path(path);
        let filter = filter.cloned().unwrap_or_default();
        let mut topics = self.topics.write().await;
        if let Some(bucket) = topics.get_mut(&path) {
            bucket.retain(|sub| !(sub.client_id == client_id && sub.filter == filter));
            if bucket.is_empty() {
                let _ = topics.remove(&path);
            }
        }
    }

    /// Remove every subscription owned by a client, across all topics.
    pub async fn drop_session(&self, client_id: &str) {
        let mut topics = self.topics.write().await;
        topics.retain(|_, bucket| {
            bucket.retain(|sub| sub.client_id != client_id);
            !bucket.is_empty()
        });
        debug!(client_id, "dropped subscriptions for evicted session");
    }

    /// Number of active subscriptions, across all topics.
    pub async fn len(&self) -> usize {
        self.topics.read().await.values().map(Vec::len).sum()
    }

    /// Whether no subscriptions are registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fan an event out to every matching subscription.
    ///
    /// Delivery order: the exact topic first (primary, no origin reference),
    /// then the single-segment root alias `/last`, then each ancestor prefix
    /// built up from the root. Propagated deliveries carry an origin
    /// reference naming the triggering verb and exact path. The filter is
    /// evaluated against the same body at every level.
    pub async fn publish(&self, event: &PublishedEvent) {
        metrics::counter!(EVENTS_PUBLISHED).increment(1);
        let path = normalize_path(&event.path);
        // Filters match against a structured body; anything else is treated
        // as an empty object. The delivered body stays untouched.
        let match_body = match &event.data {
            Some(value @ (Value::Object(_) | Value::Array(_))) => value.clone(),
            _ => json!({}),
        };

        self.deliver_to(&path, event, &match_body, None).await;

        let segments: Vec<&str> = path.split('/').filter(|seg| !seg.is_empty()).collect();
        if segments.len() < 2 {
            return;
        }
        let origin = EventOrigin {
            verb: event.verb,
            path: path.clone(),
        };

        // Root alias: subscribers at /last see changes to any instance path
        // ending in that segment.
        let last = segments[segments.len() - 1];
        self.deliver_to(&format!("/{last}"), event, &match_body, Some(&origin))
            .await;

        // Ancestor prefixes, root outward, excluding the exact path.
        let rest = &segments[..segments.len() - 1];
        for depth in 1..=rest.len() {
            let prefix = format!("/{}", rest[..depth].join("/"));
            self.deliver_to(&prefix, event, &match_body, Some(&origin))
                .await;
        }
    }

    async fn deliver_to(
        &self,
        topic: &str,
        event: &PublishedEvent,
        match_body: &Value,
        origin: Option<&EventOrigin>,
    ) {
        let subscriptions: Vec<Arc<Subscription>> = {
            let topics = self.topics.read().await;
            match topics.get(topic) {
                Some(bucket) => bucket.clone(),
                None => return,
            }
        };

        for subscription in subscriptions {
            if !subscription.matches(match_body) {
                continue;
            }
            let Some(session) = self.sessions.get(&subscription.client_id).await else {
                debug!(
                    client_id = %subscription.client_id,
                    topic,
                    "skipping delivery: no session for subscriber"
                );
                continue;
            };
            session.deliver_event(
                &subscription.id,
                EventData {
                    verb: event.verb,
                    path: subscription.path.clone(),
                    filters: Some(subscription.filter.clone()),
                    data: event.data.clone(),
                    referer: origin.cloned(),
                },
            );
            metrics::counter!(EVENTS_DELIVERED).increment(1);
        }
    }
}
