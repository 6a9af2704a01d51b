//! Shared request/response types and the routing vocabulary.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An HTTP request in transit through the proxy.
///
/// `path` keeps the raw path and query string exactly as received so the
/// proxy can replay the request upstream byte for byte.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Path without the query string.
    pub fn path_only(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    /// Decoded value of a query parameter, if present.
    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.path.split_once('?')?.1;
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if k == key {
                return Some(percent_decode(v));
            }
        }
        None
    }

    /// Replace or append a query parameter, leaving other pairs untouched.
    pub fn set_query_param(&mut self, key: &str, value: &str) {
        let (path, query) = match self.path.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (self.path.clone(), String::new()),
        };
        let mut pairs: Vec<String> = query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        let mut replaced = false;
        for pair in pairs.iter_mut() {
            let k = pair.split('=').next().unwrap_or("");
            if k == key {
                *pair = format!("{key}={value}");
                replaced = true;
            }
        }
        if !replaced {
            pairs.push(format!("{key}={value}"));
        }
        self.path = if pairs.is_empty() {
            path
        } else {
            format!("{path}?{}", pairs.join("&"))
        };
    }
}

/// An HTTP response in transit through the proxy.
#[derive(Debug, Clone)]
pub struct Response {
    /// Protocol marker, e.g. `HTTP/1.1`.
    pub protocol: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    /// JSON response with content headers filled in.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::from_bytes(status, serde_json::to_vec(body).unwrap_or_default())
    }

    /// Pretty-printed JSON, for endpoints people read with curl.
    pub fn json_pretty(status: u16, body: &serde_json::Value) -> Self {
        Self::from_bytes(status, serde_json::to_vec_pretty(body).unwrap_or_default())
    }

    fn from_bytes(status: u16, body: Vec<u8>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("content-length".to_string(), body.len().to_string());
        Self {
            protocol: "HTTP/1.1".to_string(),
            status,
            headers,
            body,
        }
    }
}

/// Persistent id of a saved query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Qid(pub i64);

/// Persistent id of a single saved choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cid(pub i64);

/// Query text extracted from a search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query(pub String);

/// Candidate results pulled out of an upstream response, in upstream order.
pub type Choices = Vec<serde_json::Value>;

/// Per-choice relevance scores, index-aligned with [`Choices`].
pub type Ranks = Vec<f32>;

/// Accumulated component status, keyed by component name.
pub type StatusMap = serde_json::Map<String, serde_json::Value>;

/// Relevance labels for one saved query, index-aligned with its [`Choices`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Labels(pub Vec<(Cid, f32)>);

impl Labels {
    pub fn label_for(&self, cid: Cid) -> Option<f32> {
        self.0.iter().find(|(c, _)| *c == cid).map(|(_, l)| *l)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Identity of a tracked collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId {
    pub component: &'static str,
    pub op: &'static str,
}

impl CallId {
    pub const fn new(component: &'static str, op: &'static str) -> Self {
        Self { component, op }
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.op)
    }
}

/// Future type produced by route handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send>>;

/// A route handler: owns the request, yields a response or an error for the
/// error pipeline.
pub type Handler = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// Handler invoked with the error any other handler returned.
pub type ErrorHandler = Arc<dyn Fn(Error) -> HandlerFuture + Send + Sync>;

/// Path and HTTP methods a pipeline is reachable at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathBinding {
    pub path: String,
    pub methods: Vec<String>,
}

impl PathBinding {
    pub fn new(path: impl Into<String>, methods: &[&str]) -> Self {
        Self {
            path: path.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Routing table handed to the server: one binding and handler per pipeline,
/// plus the error handler dispatch falls back to.
pub struct RouteTable {
    pub search: (PathBinding, Handler),
    pub train: (PathBinding, Handler),
    pub status: (PathBinding, Handler),
    pub error: (PathBinding, ErrorHandler),
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi * 16 + lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_decodes_value() {
        let req = Request::new("GET", "/idx/_search?q=hello%20world&size=5");
        assert_eq!(req.query_param("q").as_deref(), Some("hello world"));
        assert_eq!(req.query_param("size").as_deref(), Some("5"));
        assert_eq!(req.query_param("missing"), None);
    }

    #[test]
    fn query_param_decodes_plus_as_space() {
        let req = Request::new("GET", "/_search?q=rust+proxy");
        assert_eq!(req.query_param("q").as_deref(), Some("rust proxy"));
    }

    #[test]
    fn set_query_param_replaces_in_place() {
        let mut req = Request::new("GET", "/idx/_search?size=10&q=x");
        req.set_query_param("size", "100");
        assert_eq!(req.path, "/idx/_search?size=100&q=x");
    }

    #[test]
    fn set_query_param_appends_when_missing() {
        let mut req = Request::new("GET", "/idx/_search");
        req.set_query_param("size", "30");
        assert_eq!(req.path, "/idx/_search?size=30");
        assert_eq!(req.path_only(), "/idx/_search");
    }

    #[test]
    fn response_json_sets_content_headers() {
        let resp = Response::json(200, &serde_json::json!({"ok": true}));
        assert_eq!(resp.status, 200);
        assert_eq!(
            resp.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(
            resp.headers.get("content-length").cloned(),
            Some(resp.body.len().to_string())
        );
    }

    #[test]
    fn labels_lookup_by_cid() {
        let labels = Labels(vec![(Cid(1), 0.0), (Cid(2), 1.0)]);
        assert_eq!(labels.label_for(Cid(2)), Some(1.0));
        assert_eq!(labels.label_for(Cid(9)), None);
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn call_id_formats_as_component_dot_op() {
        assert_eq!(CallId::new("EsCodex", "magnify").to_string(), "EsCodex.magnify");
    }
}
