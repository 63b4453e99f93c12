use core::fmt;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
/// Response-side primitives re-exported from the http crate.
pub use http::{HeaderMap, HeaderValue, StatusCode};

use crate::{field_method, field_method_as_mut, set_field_method_as_mut};

/// Reason phrase carried through response extensions, as the http crate has
/// no slot for a custom reason on the status line itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReasonPhrase(pub String);

/// MockResponse is a fully prebuilt response: status, headers, content-type
/// and body are fixed when the route is registered and handed out as-is per
/// dispatch.
#[derive(Clone)]
pub struct MockResponse {
    /// The response status.
    status: StatusCode,

    /// Optional custom reason phrase for the status line.
    reason: Option<String>,

    /// The response headers.
    headers: HeaderMap,

    /// The content-type, kept apart from `headers` so it always wins over a
    /// content-type smuggled in through the header map.
    content_type: HeaderValue,

    /// The response body.
    body: Bytes,
}

impl MockResponse {
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        content_type: HeaderValue,
        body: Bytes,
    ) -> Self {
        Self {
            status,
            reason: None,
            headers,
            content_type,
            body,
        }
    }

    /// Builds a response from what a callback route returned, the same way a
    /// statically registered response is built: the reply's content-type
    /// header wins, anything else defaults to `application/octet-stream`.
    pub fn from_reply(reply: CallbackReply) -> Self {
        let CallbackReply {
            status,
            headers,
            body,
        } = reply;

        let content_type = match headers.get(CONTENT_TYPE) {
            Some(value) => value.clone(),
            None => {
                wren_logs::debug!("callback reply carried no content-type, defaulting");
                HeaderValue::from_static("application/octet-stream")
            }
        };

        Self {
            status,
            reason: None,
            headers,
            content_type,
            body,
        }
    }

    /// and_then consumes the response, returning one modified to the
    /// underlying desire and needs of the function provided.
    pub fn add_then<F>(self, f: F) -> MockResponse
    where
        F: FnOnce(Self) -> Self,
    {
        f(self)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    field_method!(status, StatusCode);
    field_method_as_mut!(status_mut, status, StatusCode);
    set_field_method_as_mut!(set_status, status, StatusCode);

    field_method!(headers, HeaderMap);
    field_method_as_mut!(headers_mut, headers, HeaderMap);
    set_field_method_as_mut!(set_headers, headers, HeaderMap);

    field_method!(content_type, HeaderValue);
    field_method_as_mut!(content_type_mut, content_type, HeaderValue);
    set_field_method_as_mut!(set_content_type, content_type, HeaderValue);

    field_method!(body, Bytes);

    #[inline]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Converts into the http crate's response shape, content-type header
    /// included and any custom reason phrase tucked into the extensions.
    pub fn into_http(self) -> http::Response<Bytes> {
        let mut response = http::Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, self.content_type);
        if let Some(reason) = self.reason {
            response.extensions_mut().insert(ReasonPhrase(reason));
        }
        response
    }
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("content_type", &self.content_type)
            .field("body", &self.body)
            .finish()
    }
}

impl From<MockResponse> for http::Response<Bytes> {
    fn from(value: MockResponse) -> Self {
        value.into_http()
    }
}

/// What a callback route hands back when invoked: status, headers and body,
/// synthesized into the outgoing response after the callback returns.
#[derive(Clone, Debug)]
pub struct CallbackReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CallbackReply {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

impl<B: Into<Bytes>> From<(StatusCode, HeaderMap, B)> for CallbackReply {
    fn from((status, headers, body): (StatusCode, HeaderMap, B)) -> Self {
        CallbackReply::new(status, headers, body)
    }
}
