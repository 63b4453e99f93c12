mod macros;

pub use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, Version};

pub mod requests;
pub mod response;

pub use requests::{BodyError, Method, MethodError, RequestBody, ServedRequest};
pub use response::{CallbackReply, MockResponse, ReasonPhrase};
