//! Route table and path matching.
//!
//! Routes are registered per verb and matched in registration order; the
//! first pattern that matches wins. Patterns are segment-wise: literal
//! segments, `:name` parameter captures, and a trailing `*` wildcard that
//! captures the rest of the path under the `wildcard` parameter.

use std::collections::HashMap;
use std::sync::Arc;

use eventgate_core::envelope::Verb;
use percent_encoding::percent_decode_str;

use crate::handler::Handler;

/// One segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern string such as `/users/:id/posts` or `/files/*`.
    pub fn parse(pattern: &str) -> Self {
        let segments = split_segments(pattern)
            .map(|seg| {
                if seg == "*" {
                    Segment::Wildcard
                } else if let Some(name) = seg.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(seg.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Match a normalized path, returning captured parameters on success.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split_segments(path).collect();
        let mut params = HashMap::new();

        let mut index = 0;
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                    index += 1;
                }
                Segment::Param(name) => {
                    let part = parts.get(index)?;
                    let _ = params.insert(name.clone(), (*part).to_string());
                    index += 1;
                }
                Segment::Wildcard => {
                    // Trailing wildcard: swallow the remainder, even if empty.
                    let _ = params.insert("wildcard".to_string(), parts[index..].join("/"));
                    return Some(params);
                }
            }
        }

        if index == parts.len() { Some(params) } else { None }
    }
}

/// A registered route: pattern, middleware chain, terminal handler.
pub struct Route {
    pattern: PathPattern,
    middlewares: Vec<Arc<dyn Handler>>,
    handler: Arc<dyn Handler>,
}

impl Route {
    /// The middleware chain, in registration order.
    pub fn middlewares(&self) -> &[Arc<dyn Handler>] {
        &self.middlewares
    }

    /// The terminal handler.
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

/// Per-verb route tables.
///
/// The tables are built during registration, before the server starts, and
/// are immutable at dispatch time.
#[derive(Default)]
pub struct Router {
    tables: [Vec<Route>; 6],
}

impl Router {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route for a verb.
    pub fn register(
        &mut self,
        verb: Verb,
        pattern: &str,
        middlewares: Vec<Arc<dyn Handler>>,
        handler: Arc<dyn Handler>,
    ) {
        self.tables[verb.index()].push(Route {
            pattern: PathPattern::parse(pattern),
            middlewares,
            handler,
        });
    }

    /// Remove every route registered for `verb` whose pattern was parsed
    /// from a path normalizing to `path`.
    pub fn remove(&mut self, verb: Verb, path: &str) {
        let pattern = PathPattern::parse(&normalize_path(path));
        self.tables[verb.index()].retain(|route| route.pattern != pattern);
    }

    /// Find the first matching route for a verb + normalized path.
    pub fn lookup(&self, verb: Verb, path: &str) -> Option<(&Route, HashMap<String, String>)> {
        self.tables[verb.index()]
            .iter()
            .find_map(|route| route.pattern.matches(path).map(|params| (route, params)))
    }

    /// Total number of registered routes, across all verbs.
    pub fn len(&self) -> usize {
        self.tables.iter().map(Vec::len).sum()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Non-empty path segments of a path or pattern string.
fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|seg| !seg.is_empty())
}

/// Split a client-supplied URL into its normalized path and decoded query
/// pairs.
pub fn split_url(url: &str) -> (String, HashMap<String, String>) {
    let (raw_path, raw_query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };
    let query = raw_query.map(parse_query).unwrap_or_default();
    (normalize_path(raw_path), query)
}

/// Normalize a path: leading slash, no trailing slash (except root), empty
/// segments collapsed.
pub fn normalize_path(path: &str) -> String {
    let joined: Vec<&str> = split_segments(path).collect();
    if joined.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", joined.join("/"))
    }
}

/// Decode `key=value&key2=value2` pairs, percent-decoding both sides.
fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    // '+' means space in query strings.
    let replaced = raw.replace('+', " ");
    percent_decode_str(&replaced).decode_utf8_lossy().into_owned()
}
