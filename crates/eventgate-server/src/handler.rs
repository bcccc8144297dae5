//! Handler-facing request and response surfaces.
//!
//! Middlewares and route handlers share one trait, [`Handler`]: both receive
//! a mutable [`Request`] and [`Response`] and may send the response at any
//! point. The response is single-shot; once sent, later sends are logged and
//! ignored.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eventgate_core::envelope::{Headers, ResponseData, Verb};
use eventgate_core::errors::GateError;
use serde_json::Value;
use tracing::warn;

use crate::session::Session;

/// A decoded, routed request as seen by middleware and handlers.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request verb.
    pub verb: Verb,
    /// The URL exactly as the client sent it, query string included.
    pub original_url: String,
    /// Normalized path with the query string stripped.
    pub path: String,
    /// Request headers.
    pub headers: Headers,
    /// Path parameters captured by the matched route pattern.
    pub params: HashMap<String, String>,
    /// Decoded query-string pairs.
    pub query: HashMap<String, String>,
    /// Request body.
    pub body: Option<Value>,
}

impl Request {
    /// A captured path parameter, by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// A decoded query-string value, by key.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// A request header, by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Single-shot response bound to the requesting session.
///
/// Mutators are chainable so handlers read like
/// `res.status(201).status_text("Created").send(body)`. The first
/// [`send`](Response::send) delivers the response envelope; every later call
/// is a no-op with a warning.
pub struct Response {
    uuid: String,
    session: Arc<Session>,
    status: u16,
    status_text: String,
    headers: Headers,
    sent: bool,
    sent_body: Option<Value>,
}

impl Response {
    /// New unsent response, defaulting to `200 Success`.
    pub fn new(uuid: impl Into<String>, session: Arc<Session>) -> Self {
        Self {
            uuid: uuid.into(),
            session,
            status: 200,
            status_text: "Success".to_string(),
            headers: Headers::new(),
            sent: false,
            sent_body: None,
        }
    }

    /// Set the status code.
    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    /// Set the status line.
    pub fn status_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.status_text = text.into();
        self
    }

    /// Set a response header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let _ = self.headers.insert(name.into(), value.into());
        self
    }

    /// Whether the response has already been sent.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// The body passed to [`send`](Response::send), if any.
    ///
    /// The dispatcher reads this to build the change event after a mutating
    /// request.
    pub fn body(&self) -> Option<&Value> {
        self.sent_body.as_ref()
    }

    /// Deliver the response with the given body. First call wins.
    pub fn send(&mut self, body: Option<Value>) {
        if self.sent {
            warn!(uuid = %self.uuid, "response already sent, ignoring duplicate send");
            return;
        }
        self.sent = true;
        self.sent_body = body.clone();

        let headers = if self.headers.is_empty() {
            None
        } else {
            Some(self.headers.clone())
        };
        self.session.deliver_response(
            &self.uuid,
            ResponseData {
                status: self.status,
                status_text: self.status_text.clone(),
                headers,
                data: body,
            },
        );
    }

    /// Deliver an error response. Subject to the same single-shot rule.
    pub fn send_error(&mut self, status: u16, status_text: impl Into<String>) {
        let _ = self.status(status).status_text(status_text);
        self.send(None);
    }
}

/// A unit of the dispatch pipeline: a middleware or a route handler.
///
/// Middlewares run in registration order before the handler; the handler
/// always runs, even if a middleware already sent the response. Returning an
/// error aborts the pipeline and converts into an error response if none was
/// sent yet.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process the request, optionally sending the response.
    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<(), GateError>;
}

/// Adapter for synchronous closures, the common case for simple routes.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<(), GateError> + Send + Sync,
{
    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<(), GateError> {
        (self.0)(req, res)
    }
}

/// Wrap a synchronous closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&mut Request, &mut Response) -> Result<(), GateError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn make_response() -> (Response, mpsc::UnboundedReceiver<Arc<String>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new("c1", tx));
        (Response::new("req-1", session), rx)
    }

    #[tokio::test]
    async fn send_is_single_shot() {
        let (mut res, mut rx) = make_response();
        res.send(Some(json!({"first": true})));
        res.send(Some(json!({"second": true})));

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["data"]["data"]["first"], true);
        assert!(rx.try_recv().is_err());
        assert_eq!(res.body().unwrap()["first"], true);
    }

    #[tokio::test]
    async fn chained_mutators_shape_the_envelope() {
        let (mut res, mut rx) = make_response();
        let _ = res
            .status(201)
            .status_text("Created")
            .set_header("Location", "/users/7");
        res.send(None);

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["data"]["status"], 201);
        assert_eq!(frame["data"]["statusText"], "Created");
        assert_eq!(frame["data"]["headers"]["Location"], "/users/7");
    }

    #[tokio::test]
    async fn send_error_sets_status_and_text() {
        let (mut res, mut rx) = make_response();
        res.send_error(403, "Forbidden.");

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["data"]["status"], 403);
        assert_eq!(frame["data"]["statusText"], "Forbidden.");
        assert!(res.is_sent());
    }

    #[tokio::test]
    async fn fn_handler_reads_request() {
        let handler = handler_fn(|req, res| {
            let id = req.param("id").unwrap_or("?").to_string();
            res.send(Some(json!({"id": id})));
            Ok(())
        });

        let mut req = Request {
            verb: Verb::Get,
            original_url: "/users/42".into(),
            path: "/users/42".into(),
            headers: Headers::new(),
            params: HashMap::from([("id".to_string(), "42".to_string())]),
            query: HashMap::new(),
            body: None,
        };
        let (mut res, mut rx) = make_response();
        handler.handle(&mut req, &mut res).await.unwrap();

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["data"]["data"]["id"], "42");
    }
}
