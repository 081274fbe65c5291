//! Unified error type.
//!
//! Every per-request failure is an [`Error`] that renders to a stable status
//! code and a JSON body of the shape `{"error": kind, "detail": ...}`:
//!
//! | Variant | Status | `error` |
//! |---|---|---|
//! | `NotFound` | 404 | `not_found` |
//! | `BadRequest` | 400 | `bad_request` |
//! | `Validation` | 422 | `validation_error` |
//! | `Http` | any | derived from the reason phrase |
//! | `Handler` | 500 | `internal_error` |
//!
//! `Configuration` and `Io` are startup / infrastructure failures. They only
//! reach a client if a handler returns them, in which case they are rendered
//! as an opaque 500 like `Handler`.

use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::response::{IntoResponse, Response};

/// Boxed error used for handler and lifecycle-hook failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type of every fallible keev operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid route, duplicate registration, bad bind address, failed
    /// startup hook. Fatal before serving begins.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No route matches the request.
    #[error("not found")]
    NotFound,

    /// The request could not be read or decoded.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request body failed schema validation.
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    /// An explicit HTTP error raised by user code, e.g. 401 from an auth
    /// middleware or 409 from a handler. `headers` are copied onto the
    /// rendered response.
    #[error("{status}: {detail}")]
    Http { status: StatusCode, detail: String, headers: HeaderMap },

    /// Unhandled failure inside a handler or middleware.
    #[error("handler error: {0}")]
    Handler(#[source] BoxError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// An HTTP error with an explicit status and client-visible detail.
    pub fn http(status: StatusCode, detail: impl Into<String>) -> Self {
        Self::Http { status, detail: detail.into(), headers: HeaderMap::new() }
    }

    /// Like [`http`](Error::http), with extra response headers such as
    /// `www-authenticate` on a 401 or `retry-after` on a 429 / 503.
    ///
    /// ```rust
    /// use keev::Error;
    /// use keev::http::{HeaderMap, HeaderValue, StatusCode, header::WWW_AUTHENTICATE};
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    /// let err = Error::http_with_headers(StatusCode::UNAUTHORIZED, "missing token", headers);
    /// ```
    pub fn http_with_headers(status: StatusCode, detail: impl Into<String>, headers: HeaderMap) -> Self {
        Self::Http { status, detail: detail.into(), headers }
    }

    /// Wraps any error as an opaque handler failure (rendered as 500).
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    /// The status code this error renders with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Http { status, .. } => *status,
            Self::Configuration(_) | Self::Handler(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The machine-readable `error` field of the rendered body.
    pub fn kind(&self) -> String {
        match self {
            Self::NotFound => "not_found".to_owned(),
            Self::BadRequest(_) => "bad_request".to_owned(),
            Self::Validation(_) => "validation_error".to_owned(),
            Self::Http { status, .. } => status
                .canonical_reason()
                .unwrap_or("http_error")
                .to_ascii_lowercase()
                .replace([' ', '-'], "_")
                .replace('\'', ""),
            Self::Configuration(_) | Self::Handler(_) | Self::Io(_) => {
                "internal_error".to_owned()
            }
        }
    }

    /// Logs a failed request: 404 at `warn`, other 4xx at `debug`, 5xx at
    /// `error`.
    pub(crate) fn log(&self, method: &http::Method, path: &str) {
        match self {
            Self::NotFound => warn!(%method, path, "no route matched"),
            e if e.status().is_server_error() => error!(%method, path, "request failed: {e}"),
            e => debug!(%method, path, status = e.status().as_u16(), "request rejected: {e}"),
        }
    }

    fn detail(&self) -> Value {
        match self {
            Self::NotFound => json!("Not Found"),
            Self::BadRequest(detail) => json!(detail),
            Self::Validation(fields) => json!(fields),
            Self::Http { detail, .. } => json!(detail),
            // Never leak internals to the client.
            Self::Configuration(_) | Self::Handler(_) | Self::Io(_) => {
                json!("Internal Server Error")
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.kind(), "detail": self.detail() });
        let mut res = Response::builder()
            .status(self.status())
            .json(body.to_string());
        if let Self::Http { headers, .. } = self {
            res.headers_mut().extend(headers);
        }
        res
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Handler(Box::new(e))
    }
}

/// One failing field of a [`Error::Validation`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Dotted path to the offending value (`price`, `tags.0`), or `body`
    /// when the document as a whole is at fault.
    pub field: String,
    pub message: String,
    /// The failing rule, e.g. `required`, `type`, `minimum`, `json_invalid`.
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into(), kind: kind.into() }
    }
}

/// Failure reported by a [`Plugin`](crate::plugin::Plugin) hook.
///
/// Hook failures are logged and swallowed; they never change a response.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct PluginError {
    message: String,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
