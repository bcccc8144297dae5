//! Wire envelope types for the EventGate protocol.
//!
//! Every message on a client connection is a JSON envelope of the shape
//! `{ "type": ..., "uuid": ..., "data": ... }`. Inbound envelopes are either
//! a [`ClientEnvelope::Request`] (verb against a path) or a
//! [`ClientEnvelope::Subscription`] (subscribe/unsubscribe control message).
//! Outbound envelopes are a [`ServerEnvelope::Response`] correlated to an
//! inbound `uuid`, or a [`ServerEnvelope::Event`] correlated to a
//! subscription id.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::GateError;
use crate::filter::QueryFilter;

/// Flat string headers carried on requests and responses.
pub type Headers = HashMap<String, String>;

/// Closed set of request verbs the router dispatches on.
///
/// Unknown verbs are rejected when the envelope is decoded, never at route
/// lookup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Verb {
    /// Read a resource.
    Get,
    /// Create a resource.
    Post,
    /// Replace a resource.
    Put,
    /// Partially update a resource.
    Patch,
    /// Delete a resource.
    Delete,
    /// Capability preflight.
    Options,
}

impl Verb {
    /// All verbs, in registration-table order.
    pub const ALL: [Verb; 6] = [
        Verb::Get,
        Verb::Post,
        Verb::Put,
        Verb::Patch,
        Verb::Delete,
        Verb::Options,
    ];

    /// Index into per-verb route tables.
    pub fn index(self) -> usize {
        match self {
            Verb::Get => 0,
            Verb::Post => 1,
            Verb::Put => 2,
            Verb::Patch => 3,
            Verb::Delete => 4,
            Verb::Options => 5,
        }
    }

    /// Whether a request with this verb mutates state (and therefore
    /// publishes a change event when change publishing is enabled).
    pub fn is_mutating(self) -> bool {
        matches!(self, Verb::Post | Verb::Put | Verb::Patch | Verb::Delete)
    }

    /// Lowercase wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Post => "post",
            Verb::Put => "put",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
            Verb::Options => "options",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Verb {
    type Error = GateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        // Clients are not consistent about verb casing.
        match value.to_ascii_lowercase().as_str() {
            "get" => Ok(Verb::Get),
            "post" => Ok(Verb::Post),
            "put" => Ok(Verb::Put),
            "patch" => Ok(Verb::Patch),
            "delete" => Ok(Verb::Delete),
            "options" => Ok(Verb::Options),
            other => Err(GateError::Protocol(format!("unknown verb: {other}"))),
        }
    }
}

impl From<Verb> for String {
    fn from(verb: Verb) -> Self {
        verb.as_str().to_string()
    }
}

/// Subscription control actions.
///
/// Anything other than subscribe/unsubscribe decodes as [`Unknown`] and is
/// answered with a 400 by the subscription pipeline rather than failing the
/// whole envelope.
///
/// [`Unknown`]: SubscriptionAction::Unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionAction {
    /// Register a subscription at a topic path.
    Subscribe,
    /// Remove a matching subscription.
    Unsubscribe,
    /// Unrecognized action value.
    Unknown,
}

impl From<String> for SubscriptionAction {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "subscribe" => SubscriptionAction::Subscribe,
            "unsubscribe" => SubscriptionAction::Unsubscribe,
            _ => SubscriptionAction::Unknown,
        }
    }
}

impl From<SubscriptionAction> for String {
    fn from(action: SubscriptionAction) -> Self {
        match action {
            SubscriptionAction::Subscribe => "subscribe".to_string(),
            SubscriptionAction::Unsubscribe => "unsubscribe".to_string(),
            SubscriptionAction::Unknown => "unknown".to_string(),
        }
    }
}

/// Inbound client message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEnvelope {
    /// Path-addressed request expecting exactly one response.
    Request {
        /// Correlation id echoed on the response.
        uuid: String,
        /// Request payload.
        data: RequestData,
    },
    /// Subscription control message.
    Subscription {
        /// Correlation id echoed on the response.
        uuid: String,
        /// Subscription payload.
        data: SubscriptionData,
    },
}

impl ClientEnvelope {
    /// Correlation id of the envelope, regardless of kind.
    pub fn uuid(&self) -> &str {
        match self {
            ClientEnvelope::Request { uuid, .. } | ClientEnvelope::Subscription { uuid, .. } => {
                uuid
            }
        }
    }
}

/// Payload of a request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestData {
    /// Request verb.
    pub method: Verb,
    /// Path plus optional query string, e.g. `/users/42?expand=posts`.
    pub url: String,
    /// Optional request headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Optional request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Payload of a subscription control envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionData {
    /// Control action (subscribe/unsubscribe).
    pub method: SubscriptionAction,
    /// Topic path, optionally with a query string.
    pub url: String,
    /// Optional headers, visible to middleware.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Optional filter predicate scoping the subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<QueryFilter>,
}

/// Outbound server message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEnvelope {
    /// Response to a request or subscription control message.
    Response {
        /// Correlation id of the originating envelope.
        uuid: String,
        /// Response payload.
        data: ResponseData,
    },
    /// Pushed event delivery for a subscription.
    Event {
        /// The subscription id this delivery belongs to.
        uuid: String,
        /// Event payload.
        data: EventData,
    },
}

/// Payload of a response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseData {
    /// HTTP-style status code.
    pub status: u16,
    /// Human-readable status line.
    #[serde(rename = "statusText")]
    pub status_text: String,
    /// Response headers (server-identity and content-type headers are
    /// added at delivery time).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Optional response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseData {
    /// Error response with a status code and message, no body.
    pub fn error(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: None,
            data: None,
        }
    }
}

/// Payload of an event envelope.
///
/// `path` is the *subscription's* topic path, which differs from the
/// triggering event's path on propagated deliveries; `referer` then points
/// back at the triggering verb and exact path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// Verb of the triggering event (propagation never changes it).
    #[serde(rename = "type")]
    pub verb: Verb,
    /// Topic path of the subscription receiving this delivery.
    pub path: String,
    /// The subscription's filter, echoed back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<QueryFilter>,
    /// Event body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Present only on propagated (root-alias or ancestor) deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<EventOrigin>,
}

/// Origin reference carried on propagated deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOrigin {
    /// Verb of the triggering event.
    #[serde(rename = "type")]
    pub verb: Verb,
    /// Exact path the triggering event was published at.
    pub path: String,
}

/// An event as injected into the fan-out pipeline, before any
/// per-subscription shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Verb describing the change.
    #[serde(rename = "type")]
    pub verb: Verb,
    /// Exact path the change occurred at.
    pub path: String,
    /// Event body; filters are evaluated against this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PublishedEvent {
    /// Create an event for the fan-out pipeline.
    pub fn new(verb: Verb, path: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            verb,
            path: path.into(),
            data,
        }
    }
}
