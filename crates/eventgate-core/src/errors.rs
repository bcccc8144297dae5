//! Error taxonomy for the dispatch pipeline.

use thiserror::Error;

use crate::envelope::Verb;

/// Errors produced while dispatching client traffic.
///
/// Pipeline errors never crash the server: each maps to a status code and is
/// converted into exactly one response per inbound envelope. Transport
/// failures fall back to queuing and are never surfaced to handlers.
#[derive(Debug, Error)]
pub enum GateError {
    /// No handler matches the verb + path.
    #[error("no route matches {verb} {path}")]
    RouteNotFound {
        /// Verb of the unmatched request.
        verb: Verb,
        /// Normalized request path.
        path: String,
    },

    /// Malformed subscription control message.
    #[error("{0}")]
    Validation(String),

    /// A middleware or handler failed; the message becomes the status text.
    #[error("{0}")]
    Handler(String),

    /// Malformed inbound envelope or unknown verb.
    #[error("{0}")]
    Protocol(String),

    /// Write to a closed connection. Callers queue instead of propagating.
    #[error("connection closed")]
    Transport,

    /// Envelope encoding failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GateError {
    /// Status code this error converts to when it reaches the response
    /// boundary.
    pub fn status(&self) -> u16 {
        match self {
            GateError::RouteNotFound { .. } => 404,
            GateError::Validation(_) => 400,
            GateError::Handler(_)
            | GateError::Protocol(_)
            | GateError::Transport
            | GateError::Serialization(_) => 500,
        }
    }

    /// Convenience constructor for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        GateError::Handler(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn status_mapping() {
        let not_found = GateError::RouteNotFound {
            verb: Verb::Get,
            path: "/missing".into(),
        };
        assert_eq!(not_found.status(), 404);
        assert_eq!(GateError::Validation("bad action".into()).status(), 400);
        assert_eq!(GateError::handler("boom").status(), 500);
        assert_eq!(GateError::Protocol("junk".into()).status(), 500);
        assert_eq!(GateError::Transport.status(), 500);
    }

    #[test]
    fn handler_message_is_display() {
        let err = GateError::handler("database unavailable");
        assert_eq!(err.to_string(), "database unavailable");
    }

    #[test]
    fn serde_errors_convert_via_from() {
        let bad = serde_json::from_str::<Verb>("not json").unwrap_err();
        let err = GateError::from(bad);
        assert_matches!(err, GateError::Serialization(_));
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn route_not_found_display() {
        let err = GateError::RouteNotFound {
            verb: Verb::Delete,
            path: "/users/1".into(),
        };
        assert_eq!(err.to_string(), "no route matches delete /users/1");
    }
}
