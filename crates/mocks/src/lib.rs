//! Mock route registry and dispatch engine for asserting exact HTTP
//! interactions in tests without a live server.

pub mod router;
pub mod routes;
pub mod scope;

pub use router::{MockRouter, MockService, Transport, SENTINEL_STATUS};
pub use routes::{
    split_target, CallbackFuture, CallbackHandler, ConfigError, Expectation, MatchOptions,
    ResponseSpec, RouteKey, RouteManager,
};
pub use scope::{with_mock_routes, MockScope, VerifyError};

pub use wren_routing::{
    BodyError, CallbackReply, Method, MethodError, MockResponse, ReasonPhrase, RequestBody,
    ServedRequest,
};
