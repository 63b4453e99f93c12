use core::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::InvalidHeaderValue;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::collections::HashMap;
use thiserror::Error;

use wren_routing::{CallbackReply, Method, MockResponse, ServedRequest};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("only one of data, text or body may be supplied for a route")]
    MultiplePayloads,

    #[error("route payload is not JSON-serializable: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid content-type for a route: {0}")]
    InvalidContentType(#[from] InvalidHeaderValue),

    #[error("a mock scope is already active in this process")]
    ScopeAlreadyActive,
}

/// Splits a registration or request target into its path and raw
/// query-string. The query-string keeps whatever encoding and parameter
/// order it arrived with: matching compares these raw forms for exact
/// equality, so callers wanting order-insensitive matching must normalize
/// before registering.
pub fn split_target(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

/// The lookup key expectations are registered and resolved under: the HTTP
/// method plus the target path with the query-string stripped.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    method: Method,
    path: String,
}

impl RouteKey {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

impl fmt::Debug for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteKey")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

/// Per-expectation query-string requirements, captured at registration.
#[derive(Clone, Debug)]
pub struct MatchOptions {
    match_querystring: bool,
    query: String,
}

impl MatchOptions {
    pub fn new(match_querystring: bool, query: impl Into<String>) -> Self {
        Self {
            match_querystring,
            query: query.into(),
        }
    }

    /// Whether an incoming raw query-string satisfies these options: always
    /// true unless `match_querystring` was set, in which case the strings
    /// must be identical.
    pub fn matches(&self, incoming: &str) -> bool {
        !self.match_querystring || self.query == incoming
    }

    #[inline]
    pub fn match_querystring(&self) -> bool {
        self.match_querystring
    }

    #[inline]
    pub fn query(&self) -> &str {
        &self.query
    }
}

pub type CallbackFuture = BoxFuture<'static, CallbackReply>;

/// The normalized shape every callback route is stored as: plain closures
/// are wrapped into this suspend-capable form at registration so dispatch
/// has a single call path.
pub type CallbackHandler = Box<dyn Fn(ServedRequest) -> CallbackFuture + Send + Sync>;

/// One registered, not-yet-consumed route.
pub enum Expectation {
    /// A response fully prebuilt at registration.
    Static {
        response: MockResponse,
        options: MatchOptions,
    },

    /// A handler invoked with the request view when matched; its reply is
    /// synthesized into the response lazily.
    Callback { handler: CallbackHandler },
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static { response, options } => f
                .debug_struct("Static")
                .field("response", response)
                .field("options", options)
                .finish(),
            Self::Callback { .. } => f.debug_struct("Callback").finish_non_exhaustive(),
        }
    }
}

/// Registration options for a static route: at most one payload kind (JSON
/// data, text, or raw bytes), plus status, headers, content-type, reason
/// phrase and query-string matching.
///
/// The content-type defaults by payload kind when not given explicitly:
/// `application/json` for data, `text/plain` for text and
/// `application/octet-stream` for bytes or an empty payload.
#[derive(Debug, Default)]
pub struct ResponseSpec {
    data: Option<serde_json::Value>,
    text: Option<String>,
    body: Option<Bytes>,
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    content_type: Option<String>,
    match_querystring: bool,
}

impl ResponseSpec {
    /// An empty 200 response with no payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A JSON payload. Serialization happens here, at registration: a value
    /// that cannot be represented as JSON fails the registering call, not
    /// the dispatch.
    pub fn json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Self, ConfigError> {
        Ok(Self {
            data: Some(serde_json::to_value(value)?),
            ..Self::default()
        })
    }

    /// A plain-text payload.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            text: Some(value.into()),
            ..Self::default()
        }
    }

    /// A raw byte payload.
    pub fn bytes(value: impl Into<Bytes>) -> Self {
        Self {
            body: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Requires an incoming request's raw query-string to be identical to
    /// the one captured from the registration URL.
    pub fn match_querystring(mut self) -> Self {
        self.match_querystring = true;
        self
    }

    /// Builds the prebuilt response plus its match options, with
    /// `captured_query` taken from the registration URL.
    pub(crate) fn build(self, captured_query: &str) -> Result<Expectation, ConfigError> {
        let supplied = [
            self.data.is_some(),
            self.text.is_some(),
            self.body.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();
        if supplied > 1 {
            return Err(ConfigError::MultiplePayloads);
        }

        let (body, default_type) = if let Some(value) = self.data {
            (Bytes::from(serde_json::to_vec(&value)?), "application/json")
        } else if let Some(text) = self.text {
            (Bytes::from(text), "text/plain")
        } else if let Some(body) = self.body {
            (body, "application/octet-stream")
        } else {
            (Bytes::new(), "application/octet-stream")
        };

        let content_type = match self.content_type {
            Some(explicit) => HeaderValue::from_str(&explicit)?,
            None => HeaderValue::from_static(default_type),
        };

        let mut response = MockResponse::new(self.status, self.headers, content_type, body);
        if let Some(reason) = self.reason {
            response = response.with_reason(reason);
        }

        Ok(Expectation::Static {
            response,
            options: MatchOptions::new(self.match_querystring, captured_query),
        })
    }
}

/// All mutable matching state of one scope: the pending expectation queues
/// and the log of requests that matched nothing.
#[derive(Default)]
pub(crate) struct RouteTable {
    routes: HashMap<RouteKey, Vec<Expectation>>,
    unmatched: Vec<String>,
}

impl RouteTable {
    pub(crate) fn register(&mut self, key: RouteKey, expectation: Expectation) {
        wren_logs::debug!("registering expectation for {}", key);
        self.routes.entry(key).or_default().push(expectation);
    }

    fn pop_last(&mut self, key: &RouteKey) -> Option<Expectation> {
        self.routes.get_mut(key).and_then(Vec::pop)
    }

    fn record_miss(&mut self, method: &str, path: &str) {
        self.unmatched.push(format!("{method} {path}"));
    }

    /// Records a request that matched nothing: resolution later fails
    /// verification for it.
    pub(crate) fn record_unroutable(&mut self, method: &str, path: &str) {
        wren_logs::debug!("no route can exist for {} {}", method, path);
        self.record_miss(method, path);
    }

    /// Resolves one incoming request against the pending queues.
    ///
    /// Queues consume from the tail: the last-registered expectation for a
    /// key is served first. A static expectation whose captured
    /// query-string fails its match options is pushed back onto the tail
    /// and the request recorded as a miss, so a later request with the
    /// registered query can still consume it.
    pub(crate) fn resolve(&mut self, method: Method, path: &str, query: &str) -> Option<Expectation> {
        let key = RouteKey::new(method, path);
        let Some(expectation) = self.pop_last(&key) else {
            wren_logs::debug!("no pending expectation for {}", key);
            self.record_miss(method.as_str(), path);
            return None;
        };

        if let Expectation::Static { options, .. } = &expectation {
            if !options.matches(query) {
                wren_logs::debug!("query-string mismatch for {}, restoring expectation", key);
                self.push_back(key, expectation);
                self.record_miss(method.as_str(), path);
                return None;
            }
        }

        Some(expectation)
    }

    fn push_back(&mut self, key: RouteKey, expectation: Expectation) {
        self.routes.entry(key).or_default().push(expectation);
    }

    pub(crate) fn unmatched(&self) -> &[String] {
        &self.unmatched
    }

    /// Every key that still holds unconsumed expectations, with its pending
    /// count, ordered for stable reporting.
    pub(crate) fn pending(&self) -> Vec<(RouteKey, usize)> {
        let mut pending: Vec<(RouteKey, usize)> = self
            .routes
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(key, queue)| (key.clone(), queue.len()))
            .collect();
        pending.sort_by(|left, right| left.0.to_string().cmp(&right.0.to_string()));
        pending
    }
}

/// RouteManager is the registration handle a scope yields to the test: it
/// appends expectations to the scope's table and nothing else. Handles are
/// cheap clones sharing the scope's state.
#[derive(Clone)]
pub struct RouteManager {
    table: Arc<Mutex<RouteTable>>,
}

impl RouteManager {
    pub(crate) fn new(table: Arc<Mutex<RouteTable>>) -> Self {
        Self { table }
    }

    /// Registers a static response for `method` + `url`. The URL may carry
    /// a query-string: it is captured for `match_querystring` comparison
    /// and stripped from the route key.
    pub fn add(&self, method: Method, url: &str, spec: ResponseSpec) -> Result<(), ConfigError> {
        let (path, query) = split_target(url);
        let expectation = spec.build(query)?;
        self.table
            .lock()
            .expect("lock poisoned")
            .register(RouteKey::new(method, path), expectation);
        Ok(())
    }

    /// Registers a plain callback route. The callback runs on match with
    /// the request view and its reply is synthesized into the response.
    /// Callback routes match on path only.
    pub fn add_callback<F>(&self, method: Method, url: &str, callback: F)
    where
        F: Fn(ServedRequest) -> CallbackReply + Send + Sync + 'static,
    {
        self.add_async_callback(method, url, move |request| {
            std::future::ready(callback(request))
        });
    }

    /// Registers a suspend-capable callback route. Plain and async
    /// callbacks share one stored shape, so dispatch never distinguishes
    /// them.
    pub fn add_async_callback<F, Fut>(&self, method: Method, url: &str, callback: F)
    where
        F: Fn(ServedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackReply> + Send + 'static,
    {
        let (path, _) = split_target(url);
        let handler: CallbackHandler =
            Box::new(move |request| -> CallbackFuture { Box::pin(callback(request)) });
        self.table
            .lock()
            .expect("lock poisoned")
            .register(RouteKey::new(method, path), Expectation::Callback { handler });
    }
}

impl fmt::Debug for RouteManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod split_target_tests {
    use super::*;

    #[test]
    fn test_splits_path_from_query() {
        assert_eq!(
            split_target("/users?username=user1"),
            ("/users", "username=user1")
        );
    }

    #[test]
    fn test_no_query_yields_empty_string() {
        assert_eq!(split_target("/users"), ("/users", ""));
    }

    #[test]
    fn test_only_the_first_separator_splits() {
        assert_eq!(split_target("/users?a=1?b=2"), ("/users", "a=1?b=2"));
    }

    #[test]
    fn test_trailing_separator_keeps_empty_query() {
        assert_eq!(split_target("/users?"), ("/users", ""));
    }
}

#[cfg(test)]
mod response_spec_tests {
    use super::*;
    use serde_json::json;

    fn static_parts(expectation: Expectation) -> (MockResponse, MatchOptions) {
        match expectation {
            Expectation::Static { response, options } => (response, options),
            Expectation::Callback { .. } => panic!("expected a static expectation"),
        }
    }

    #[test]
    fn test_multiple_payload_kinds_are_rejected() {
        let spec = ResponseSpec {
            data: Some(json!({"ok": true})),
            text: Some(String::from("ok")),
            ..ResponseSpec::default()
        };
        assert!(matches!(
            spec.build(""),
            Err(ConfigError::MultiplePayloads)
        ));
    }

    #[test]
    fn test_json_payload_defaults_to_application_json() {
        let spec = ResponseSpec::json(&json!([{"id": 1}])).unwrap();
        let (response, _) = static_parts(spec.build("").unwrap());
        assert_eq!(response.content_type(), "application/json");
        assert_eq!(response.body().as_ref(), br#"[{"id":1}]"#.as_slice());
    }

    #[test]
    fn test_text_payload_defaults_to_text_plain() {
        let (response, _) = static_parts(ResponseSpec::text("ok").build("").unwrap());
        assert_eq!(response.content_type(), "text/plain");
        assert_eq!(response.body().as_ref(), b"ok".as_slice());
    }

    #[test]
    fn test_bytes_payload_defaults_to_octet_stream() {
        let (response, _) =
            static_parts(ResponseSpec::bytes(vec![1u8, 2, 3]).build("").unwrap());
        assert_eq!(response.content_type(), "application/octet-stream");
    }

    #[test]
    fn test_explicit_content_type_wins_over_the_default() {
        let spec = ResponseSpec::text("<h1>ok</h1>").with_content_type("text/html");
        let (response, _) = static_parts(spec.build("").unwrap());
        assert_eq!(response.content_type(), "text/html");
    }

    #[test]
    fn test_no_payload_builds_an_empty_body() {
        let (response, _) = static_parts(ResponseSpec::empty().build("").unwrap());
        assert!(response.body().is_empty());
        assert_eq!(response.status(), &StatusCode::OK);
    }

    #[test]
    fn test_status_reason_and_headers_carry_through() {
        let spec = ResponseSpec::text("gone")
            .with_status(StatusCode::GONE)
            .with_reason("long gone")
            .with_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("abc-123"),
            );
        let (response, _) = static_parts(spec.build("").unwrap());
        assert_eq!(response.status(), &StatusCode::GONE);
        assert_eq!(response.reason(), Some("long gone"));
        assert_eq!(response.headers()["x-request-id"], "abc-123");
    }

    #[test]
    fn test_captured_query_lands_in_match_options() {
        let spec = ResponseSpec::empty().match_querystring();
        let (_, options) = static_parts(spec.build("username=user1").unwrap());
        assert!(options.match_querystring());
        assert_eq!(options.query(), "username=user1");
        assert!(options.matches("username=user1"));
        assert!(!options.matches(""));
    }
}
