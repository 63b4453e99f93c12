use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};

use wren_routing::{Method, MockResponse, ServedRequest};

use crate::routes::{Expectation, RouteTable};

/// Status code of the sentinel failure response returned for requests that
/// matched no pending expectation. The round trip completes so the code
/// under test keeps running; the real failure is raised at scope exit.
pub const SENTINEL_STATUS: u16 = 499;

pub(crate) fn sentinel_response() -> http::Response<Bytes> {
    let status =
        StatusCode::from_u16(SENTINEL_STATUS).expect("sentinel status is within the valid range");
    MockResponse::new(
        status,
        HeaderMap::new(),
        HeaderValue::from_static("unknown"),
        Bytes::new(),
    )
    .into_http()
}

/// MockRouter resolves intercepted requests against the scope's route table
/// and synthesizes the response: the prebuilt one for static routes, the
/// callback's reply for callback routes, the sentinel for misses.
#[derive(Clone)]
pub struct MockRouter {
    table: Arc<Mutex<RouteTable>>,
}

impl MockRouter {
    pub(crate) fn new(table: Arc<Mutex<RouteTable>>) -> Self {
        Self { table }
    }

    /// Serves one intercepted request. Never fails: a request that matches
    /// nothing is logged into the table and answered with the sentinel.
    #[tracing::instrument(skip(self, req))]
    pub async fn dispatch(&self, req: http::Request<Bytes>) -> http::Response<Bytes> {
        let (parts, body) = req.into_parts();
        let path = String::from(parts.uri.path());
        let query = String::from(parts.uri.query().unwrap_or(""));

        let method = match Method::try_from(&parts.method) {
            Ok(method) => method,
            Err(err) => {
                wren_logs::warn!("request used an unroutable method: {}", err);
                self.table
                    .lock()
                    .expect("lock poisoned")
                    .record_unroutable(parts.method.as_str(), &path);
                return sentinel_response();
            }
        };

        // The lock is scoped to resolution only: callback routes run user
        // code and must be free to suspend without holding the table.
        let resolved = {
            let mut table = self.table.lock().expect("lock poisoned");
            table.resolve(method, &path, &query)
        };

        match resolved {
            None => sentinel_response(),
            Some(Expectation::Static { response, .. }) => response.into_http(),
            Some(Expectation::Callback { handler }) => {
                let served = ServedRequest::new(method, parts.uri, parts.headers, body);
                let reply = handler(served).await;
                MockResponse::from_reply(reply).into_http()
            }
        }
    }
}

/// The interception seam handed to the code under test in place of its real
/// transport: a cheap-to-clone handle usable either through [`Transport`]
/// or as a `tower::Service`.
#[derive(Clone)]
pub struct MockService {
    router: MockRouter,
}

impl MockService {
    pub(crate) fn new(router: MockRouter) -> Self {
        Self { router }
    }

    /// Serves one request, same contract as [`MockRouter::dispatch`].
    pub async fn dispatch(&self, req: http::Request<Bytes>) -> http::Response<Bytes> {
        self.router.dispatch(req).await
    }
}

impl tower::Service<http::Request<Bytes>> for MockService {
    type Response = http::Response<Bytes>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Bytes>) -> Self::Future {
        let router = self.router.clone();
        Box::pin(async move { Ok(router.dispatch(req).await) })
    }
}

/// Transport is the injection point for intercepting outbound HTTP calls:
/// code under test that performs requests through `dyn Transport` receives
/// the scope's [`MockService`] for the scope's lifetime and never touches
/// the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one request/response exchange.
    async fn round_trip(&self, req: http::Request<Bytes>) -> http::Response<Bytes>;
}

#[async_trait]
impl Transport for MockService {
    async fn round_trip(&self, req: http::Request<Bytes>) -> http::Response<Bytes> {
        self.dispatch(req).await
    }
}
