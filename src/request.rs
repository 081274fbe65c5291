//! Incoming HTTP request type.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use http::{Extensions, HeaderMap};
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, FieldError};
use crate::validation;

/// Path parameters bound by the router, keyed by placeholder name.
pub type Params = HashMap<String, ParamValue>;

/// A path parameter after type coercion.
///
/// `{id:int}` binds `Int`, `{ratio:float}` binds `Float`, and `{name}`,
/// `{name:str}` and `{rest:path}` bind `Str`. Serializes as the bare value,
/// so `json!({ "id": req.param("id") })` yields `{"id": 42}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats, and integers widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

/// Peer address inserted by the server into the transport request.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PeerAddr(pub(crate) SocketAddr);

/// An incoming HTTP request with its body fully read.
///
/// Built once per call by the application. Path parameters are bound once
/// by the router; after that only [`extensions`](Request::extensions_mut)
/// change, which is where middleware attaches per-request values.
#[derive(Clone, Debug)]
pub struct Request {
    method: http::Method,
    path: String,
    query: HashMap<String, Vec<String>>,
    headers: HeaderMap,
    body: Bytes,
    params: Params,
    route: Option<String>,
    extensions: Extensions,
    peer_addr: Option<SocketAddr>,
    received_at: Instant,
}

impl Request {
    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        let query = parts
            .uri
            .query()
            .map(parse_query)
            .unwrap_or_default();
        let peer_addr = parts.extensions.get::<PeerAddr>().map(|p| p.0);
        Self {
            method: parts.method,
            path: parts.uri.path().to_owned(),
            query,
            headers: parts.headers,
            body,
            params: Params::new(),
            route: None,
            extensions: parts.extensions,
            peer_addr,
            received_at: Instant::now(),
        }
    }

    pub(crate) fn bind_route(&mut self, pattern: String, params: Params) {
        self.route = Some(pattern);
        self.params = params;
    }

    pub fn method(&self) -> &http::Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }

    /// Remote socket address, when the request arrived over a connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }

    /// When the application received the request.
    pub fn received_at(&self) -> Instant { self.received_at }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a bound path parameter.
    ///
    /// For a route `/users/{id:int}`, `req.param("id")` on `/users/42`
    /// returns `Some(&ParamValue::Int(42))`.
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn params(&self) -> &Params { &self.params }

    /// Pattern of the route that matched, e.g. `/items/{id:int}`. `None`
    /// when no route matched.
    pub fn matched_route(&self) -> Option<&str> { self.route.as_deref() }

    /// First value of a query parameter: `?tag=a&tag=b` → `Some("a")`.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// Every value of a query parameter, in order of appearance.
    pub fn query_all(&self, name: &str) -> &[String] {
        self.query.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn query_params(&self) -> &HashMap<String, Vec<String>> { &self.query }

    /// The body as UTF-8 text.
    pub fn text(&self) -> Result<&str, Error> {
        std::str::from_utf8(&self.body)
            .map_err(|e| Error::BadRequest(format!("request body is not UTF-8: {e}")))
    }

    /// The body parsed as arbitrary JSON.
    ///
    /// Malformed JSON is a validation failure on the `body` field.
    pub fn json_value(&self) -> Result<serde_json::Value, Error> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::Validation(vec![FieldError::new("body", e.to_string(), "json_invalid")])
        })
    }

    /// Parses the body as JSON, validates it against the JSON schema of `T`
    /// and deserializes it.
    ///
    /// Every failing field is reported, not just the first:
    ///
    /// ```rust,ignore
    /// #[derive(Deserialize, JsonSchema)]
    /// struct Item { name: String, price: f64 }
    ///
    /// async fn create(req: Request) -> Result<(StatusCode, Json<Item>), Error> {
    ///     let item: Item = req.json()?;            // 422 on mismatch
    ///     Ok((StatusCode::CREATED, Json(item)))
    /// }
    /// ```
    pub fn json<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned + JsonSchema + 'static,
    {
        validation::validate(self.json_value()?)
    }
}

/// Wraps a transport request whose body is already in memory.
///
/// Useful for exercising middleware and handlers directly in tests.
impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body)
    }
}

fn parse_query(raw: &str) -> HashMap<String, Vec<String>> {
    let mut query: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        query.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        http::Request::builder()
            .uri(uri)
            .header("X-Api-Key", "secret")
            .body(Bytes::from_static(br#"{"a":1}"#))
            .unwrap()
            .into()
    }

    #[test]
    fn headers_are_case_insensitive() {
        let req = request("/");
        assert_eq!(req.header("x-api-key"), Some("secret"));
        assert_eq!(req.header("X-API-KEY"), Some("secret"));
        assert_eq!(req.header("missing"), None);
    }

    #[test]
    fn query_keeps_repeated_values() {
        let req = request("/search?tag=a&tag=b&q=hello%20world");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query("tag"), Some("a"));
        assert_eq!(req.query_all("tag"), ["a".to_owned(), "b".to_owned()]);
        assert_eq!(req.query("q"), Some("hello world"));
        assert!(req.query_all("nope").is_empty());
    }

    #[test]
    fn param_values_serialize_bare() {
        assert_eq!(serde_json::to_string(&ParamValue::Int(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&ParamValue::Str("x".into())).unwrap(), "\"x\"");
        assert_eq!(ParamValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(ParamValue::Float(1.5).as_i64(), None);
    }

    #[test]
    fn malformed_json_is_a_body_validation_error() {
        let req: Request = http::Request::builder()
            .body(Bytes::from_static(b"{not json"))
            .unwrap()
            .into();
        match req.json_value() {
            Err(Error::Validation(fields)) => {
                assert_eq!(fields[0].field, "body");
                assert_eq!(fields[0].kind, "json_invalid");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
