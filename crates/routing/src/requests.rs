use core::fmt;
use std::collections::HashMap;
use std::str::FromStr;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
/// Request-side primitives re-exported from the http crate.
pub use http::{HeaderMap, Uri, Version};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{field_method, field_method_as_mut, set_field_method_as_mut};

#[derive(Error, Debug, Clone)]
pub enum MethodError {
    #[error("unknown http method: {0}")]
    Unknown(String),

    #[error("unsupported http::Method: {0}")]
    Unsupported(http::Method),
}

/// The closed set of HTTP methods a route can be registered under.
///
/// Anything outside this set (TRACE, CONNECT, extension methods) is not
/// routable and surfaces as a [`MethodError`] when converted.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    OPTIONS,
    HEAD,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GET => "GET",
            Self::POST => "POST",
            Self::PUT => "PUT",
            Self::PATCH => "PATCH",
            Self::DELETE => "DELETE",
            Self::OPTIONS => "OPTIONS",
            Self::HEAD => "HEAD",
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Method {
    type Err = MethodError;

    /// Parses case-insensitively: registration call sites routinely hand in
    /// lowercase method names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            "OPTIONS" => Ok(Method::OPTIONS),
            "HEAD" => Ok(Method::HEAD),
            _ => Err(MethodError::Unknown(String::from(s))),
        }
    }
}

impl From<Method> for http::Method {
    fn from(value: Method) -> Self {
        match value {
            Method::GET => http::Method::GET,
            Method::POST => http::Method::POST,
            Method::PUT => http::Method::PUT,
            Method::PATCH => http::Method::PATCH,
            Method::DELETE => http::Method::DELETE,
            Method::OPTIONS => http::Method::OPTIONS,
            Method::HEAD => http::Method::HEAD,
        }
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = MethodError;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        match *value {
            http::Method::GET => Ok(Method::GET),
            http::Method::POST => Ok(Method::POST),
            http::Method::PUT => Ok(Method::PUT),
            http::Method::PATCH => Ok(Method::PATCH),
            http::Method::DELETE => Ok(Method::DELETE),
            http::Method::OPTIONS => Ok(Method::OPTIONS),
            http::Method::HEAD => Ok(Method::HEAD),
            _ => Err(MethodError::Unsupported(value.clone())),
        }
    }
}

impl TryFrom<http::Method> for Method {
    type Error = MethodError;

    fn try_from(value: http::Method) -> Result<Self, Self::Error> {
        Method::try_from(&value)
    }
}

#[derive(Error, Debug)]
pub enum BodyError {
    #[error("request body is not valid UTF-8")]
    NonUtf8(#[from] std::str::Utf8Error),

    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// The request body decoded according to the request's content-type.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// `application/json` payload parsed into a JSON value.
    Json(serde_json::Value),

    /// `application/x-www-form-urlencoded` payload parsed into key/value
    /// pairs (last value wins for repeated keys).
    Form(HashMap<String, String>),

    /// Anything else, handed over untouched.
    Raw(Bytes),
}

/// ServedRequest is the request view handed to callback routes: the method,
/// full target (query-string included), headers and raw body of the request
/// the mock engine intercepted.
///
/// Body access is lazy. The raw bytes are always available via
/// [`ServedRequest::body`]; [`ServedRequest::decode_body`] applies the
/// content-type driven decoding on demand.
#[derive(Clone)]
pub struct ServedRequest {
    // headers captured from the intercepted request.
    headers: HeaderMap,

    /// The HTTP method of the request.
    method: Method,

    /// The [target](https://datatracker.ietf.org/doc/html/rfc7230#section-5.3) of the request.
    target: Uri,

    /// Raw body bytes of the intercepted request.
    body: Bytes,
}

impl ServedRequest {
    pub fn new(method: Method, target: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            target,
            headers,
            body,
        }
    }

    /// and_then consumes the request view, returning one modified to the
    /// underlying desire and needs of the function provided.
    pub fn add_then<F>(self, f: F) -> ServedRequest
    where
        F: FnOnce(Self) -> Self,
    {
        f(self)
    }

    field_method!(headers, HeaderMap);
    field_method_as_mut!(headers_mut, headers, HeaderMap);
    set_field_method_as_mut!(set_headers, headers, HeaderMap);

    field_method!(method, Method);
    field_method_as_mut!(method_mut, method, Method);
    set_field_method_as_mut!(set_method, method, Method);

    field_method!(target, Uri);
    field_method_as_mut!(target_mut, target, Uri);
    set_field_method_as_mut!(set_target, target, Uri);

    field_method!(body, Bytes);

    #[inline]
    pub fn path(&self) -> &str {
        self.target.path()
    }

    #[inline]
    pub fn query(&self) -> &str {
        self.target.query().unwrap_or("")
    }

    /// The content-type of the request with any parameters (charset, ...)
    /// stripped, lowercased. Empty string when the header is missing or not
    /// representable as a string.
    pub fn content_type(&self) -> String {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                value
                    .split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_ascii_lowercase()
            })
            .unwrap_or_default()
    }

    /// The body as UTF-8 text.
    pub fn text(&self) -> Result<&str, BodyError> {
        Ok(std::str::from_utf8(&self.body)?)
    }

    /// The body parsed as JSON, regardless of the declared content-type.
    pub fn json(&self) -> Result<serde_json::Value, BodyError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The body deserialized into a concrete type.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, BodyError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The body parsed as form key/value pairs, regardless of the declared
    /// content-type.
    pub fn form(&self) -> Result<HashMap<String, String>, BodyError> {
        Ok(parse_urlencoded(self.text()?))
    }

    /// Decodes the body by content-type: JSON and form payloads are parsed,
    /// everything else comes back as raw bytes.
    pub fn decode_body(&self) -> Result<RequestBody, BodyError> {
        match self.content_type().as_str() {
            "application/json" => Ok(RequestBody::Json(self.json()?)),
            "application/x-www-form-urlencoded" => Ok(RequestBody::Form(self.form()?)),
            _ => Ok(RequestBody::Raw(self.body.clone())),
        }
    }
}

impl fmt::Debug for ServedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServedRequest")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

/// Parse a URL-encoded string into key-value pairs.
fn parse_urlencoded(input: &str) -> HashMap<String, String> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((percent_decode(key), percent_decode(value)))
        })
        .collect()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'%' if index + 2 < bytes.len() => {
                match (hex_digit(bytes[index + 1]), hex_digit(bytes[index + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        index += 3;
                        continue;
                    }
                    _ => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            other => out.push(other),
        }
        index += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(value: u8) -> Option<u8> {
    (value as char).to_digit(16).map(|digit| digit as u8)
}

#[cfg(test)]
mod method_tests {
    use super::*;

    #[test]
    fn test_parsing_is_case_insensitive() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::GET);
        assert_eq!("Patch".parse::<Method>().unwrap(), Method::PATCH);
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::DELETE);
    }

    #[test]
    fn test_parsing_rejects_unknown_methods() {
        assert!(matches!(
            "BREW".parse::<Method>(),
            Err(MethodError::Unknown(_))
        ));
    }

    #[test]
    fn test_conversion_rejects_methods_outside_the_closed_set() {
        assert!(matches!(
            Method::try_from(http::Method::TRACE),
            Err(MethodError::Unsupported(_))
        ));
        assert!(matches!(
            Method::try_from(http::Method::CONNECT),
            Err(MethodError::Unsupported(_))
        ));
    }

    #[test]
    fn test_roundtrip_through_http_method() {
        for method in [
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
            Method::HEAD,
        ] {
            let as_http: http::Method = method.into();
            assert_eq!(Method::try_from(as_http).unwrap(), method);
        }
    }
}

#[cfg(test)]
mod served_request_tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use tracing_test::traced_test;

    fn request_with(content_type: &str, body: &str) -> ServedRequest {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, content_type.parse().unwrap());
        ServedRequest::new(
            Method::POST,
            Uri::from_static("/users?active=1"),
            headers,
            Bytes::copy_from_slice(body.as_bytes()),
        )
    }

    #[test]
    fn test_path_and_query_accessors() {
        let req = request_with("text/plain", "");
        assert_eq!(req.path(), "/users");
        assert_eq!(req.query(), "active=1");
    }

    #[test]
    fn test_content_type_strips_parameters() {
        let req = request_with("Application/JSON; charset=utf-8", "{}");
        assert_eq!(req.content_type(), "application/json");
    }

    #[test]
    fn test_decode_body_json() {
        let req = request_with("application/json", r#"{"some":{"nested":"payload"}}"#);
        let decoded = req.decode_body().unwrap();
        assert_eq!(
            decoded,
            RequestBody::Json(serde_json::json!({"some":{"nested":"payload"}}))
        );
    }

    #[traced_test]
    #[test]
    fn test_decode_body_form() {
        let req = request_with(
            "application/x-www-form-urlencoded",
            "username=user1&note=hello+world%21",
        );
        match req.decode_body().unwrap() {
            RequestBody::Form(fields) => {
                assert_eq!(fields["username"], "user1");
                assert_eq!(fields["note"], "hello world!");
            }
            other => panic!("expected a form body, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_body_raw_for_unknown_content_type() {
        let req = request_with("application/octet-stream", "\x01\x02");
        assert!(matches!(
            req.decode_body().unwrap(),
            RequestBody::Raw(bytes) if bytes.as_ref() == b"\x01\x02".as_slice()
        ));
    }

    #[test]
    fn test_urlencoded_parsing_skips_empty_pairs() {
        let fields = parse_urlencoded("a=1&&b=2&");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["a"], "1");
        assert_eq!(fields["b"], "2");
    }

    #[test]
    fn test_percent_decode_handles_truncated_escapes() {
        assert_eq!(percent_decode("50%"), "50%");
        assert_eq!(percent_decode("a%2"), "a%2");
        assert_eq!(percent_decode("a%zz"), "a%zz");
    }
}
