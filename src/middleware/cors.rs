use async_trait::async_trait;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, HeaderValue, ORIGIN, VARY,
};

use super::{Middleware, Next};
use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization";
const MAX_AGE: &str = "3600";

/// Cross-origin resource sharing headers.
///
/// `OPTIONS` responses get the full preflight set. Other responses get
/// `access-control-allow-origin` when the request's origin is allowed:
/// `*` when the allow-list contains `*`, otherwise the origin itself plus
/// `vary: Origin`.
///
/// Errors from the inner chain are rendered here so that 404, 422 and 401
/// bodies stay readable to cross-origin clients.
#[derive(Clone, Debug)]
pub struct Cors {
    allow_origins: Vec<String>,
}

impl Cors {
    pub fn new<I, S>(allow_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { allow_origins: allow_origins.into_iter().map(Into::into).collect() }
    }

    /// Allows every origin.
    pub fn permissive() -> Self {
        Self::new(["*"])
    }

    fn any_origin(&self) -> bool {
        self.allow_origins.iter().any(|o| o == "*")
    }

    fn allows(&self, origin: &str) -> bool {
        self.allow_origins.iter().any(|o| o == origin)
    }
}

impl Default for Cors {
    fn default() -> Self {
        Self::permissive()
    }
}

#[async_trait]
impl Middleware for Cors {
    async fn handle(&self, req: Request, next: Next) -> Result<Response, Error> {
        let origin = req.headers().get(ORIGIN).cloned();
        let preflight = req.method() == http::Method::OPTIONS;

        let method = req.method().clone();
        let path = req.path().to_owned();

        let mut res = match next.run(req).await {
            Ok(res) => res,
            Err(e) => {
                e.log(&method, &path);
                e.into_response()
            }
        };
        let headers = res.headers_mut();

        if preflight {
            let allow_origin = if self.any_origin() {
                HeaderValue::from_static("*")
            } else {
                origin.unwrap_or_else(|| HeaderValue::from_static(""))
            };
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
            headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE));
            return Ok(res);
        }

        if self.any_origin() {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        } else if let Some(origin) = origin.filter(|o| o.to_str().is_ok_and(|o| self.allows(o))) {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            headers.append(VARY, HeaderValue::from_static("Origin"));
        }

        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::handler::Handler;
    use crate::middleware::MiddlewareChain;

    async fn run(cors: Cors, method: http::Method, origin: Option<&str>) -> Response {
        let mut chain = MiddlewareChain::new();
        chain.add(cors);

        let mut builder = http::Request::builder().method(method).uri("/items");
        if let Some(origin) = origin {
            builder = builder.header("origin", origin);
        }
        let req: Request = builder.body(Bytes::new()).unwrap().into();

        let ok = |_req: Request| async { "ok" };
        chain.dispatch(req, ok.into_boxed_handler()).await.unwrap()
    }

    #[tokio::test]
    async fn preflight_gets_the_full_header_set() {
        let res = run(Cors::permissive(), http::Method::OPTIONS, Some("https://a.test")).await;
        assert_eq!(res.header("access-control-allow-origin"), Some("*"));
        assert_eq!(res.header("access-control-allow-methods"), Some(ALLOW_METHODS));
        assert_eq!(res.header("access-control-allow-headers"), Some(ALLOW_HEADERS));
        assert_eq!(res.header("access-control-max-age"), Some("3600"));
    }

    #[tokio::test]
    async fn preflight_echoes_origin_when_not_wildcard() {
        let cors = Cors::new(["https://a.test"]);
        let res = run(cors, http::Method::OPTIONS, Some("https://a.test")).await;
        assert_eq!(res.header("access-control-allow-origin"), Some("https://a.test"));
    }

    #[tokio::test]
    async fn allowed_origin_is_echoed_with_vary() {
        let cors = Cors::new(["https://a.test"]);
        let res = run(cors, http::Method::GET, Some("https://a.test")).await;
        assert_eq!(res.header("access-control-allow-origin"), Some("https://a.test"));
        assert_eq!(res.header("vary"), Some("Origin"));
        assert_eq!(res.body(), b"ok");
    }

    #[tokio::test]
    async fn unknown_origin_gets_nothing() {
        let cors = Cors::new(["https://a.test"]);
        let res = run(cors, http::Method::GET, Some("https://evil.test")).await;
        assert_eq!(res.header("access-control-allow-origin"), None);
        assert_eq!(res.header("vary"), None);
    }

    #[tokio::test]
    async fn wildcard_applies_without_origin_header() {
        let res = run(Cors::permissive(), http::Method::GET, None).await;
        assert_eq!(res.header("access-control-allow-origin"), Some("*"));
    }

    #[tokio::test]
    async fn error_responses_are_decorated() {
        let mut chain = MiddlewareChain::new();
        chain.add(Cors::new(["https://a.test"]));

        let req: Request = http::Request::builder()
            .uri("/missing")
            .header("origin", "https://a.test")
            .body(Bytes::new())
            .unwrap()
            .into();
        let missing = |_req: Request| async { Err::<Response, _>(Error::NotFound) };

        let res = chain.dispatch(req, missing.into_boxed_handler()).await.unwrap();
        assert_eq!(res.status_code(), http::StatusCode::NOT_FOUND);
        assert_eq!(res.header("access-control-allow-origin"), Some("https://a.test"));
        assert_eq!(res.header("vary"), Some("Origin"));
    }
}
