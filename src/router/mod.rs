//! Request router.
//!
//! Routes live in one registration-ordered list. Lookup tests every pattern
//! registered for the method and keeps the most specific match: at the
//! first position where two candidates differ, a literal beats a parameter
//! and a parameter beats a `{rest:path}` capture. Equal candidates resolve
//! to the one registered first, which is how `/items/{id:int}` and
//! `/items/{slug}` coexist: `abc` fails the int coercion and falls through.
//!
//! Build the router once at startup and hand it to
//! [`Application::builder`](crate::Application::builder).

mod pattern;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use percent_encoding::percent_decode_str;
use schemars::JsonSchema;
use tracing::debug;

use crate::docs::{self, ComponentSchema};
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::request::Params;

pub use pattern::{ParamKind, Pattern, PatternError};

// ── Route ─────────────────────────────────────────────────────────────────────

/// Documentation attached to a route. Never affects dispatch.
#[derive(Clone, Debug)]
pub struct RouteMeta {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub deprecated: bool,
    pub request_schema: Option<ComponentSchema>,
    pub response_schema: Option<ComponentSchema>,
    pub success_status: StatusCode,
}

impl Default for RouteMeta {
    fn default() -> Self {
        Self {
            summary: None,
            description: None,
            tags: Vec::new(),
            deprecated: false,
            request_schema: None,
            response_schema: None,
            success_status: StatusCode::OK,
        }
    }
}

/// A registered (method, pattern, handler) triple plus its metadata.
pub struct Route {
    method: Method,
    pattern: Pattern,
    handler: BoxedHandler,
    meta: RouteMeta,
}

impl Route {
    pub fn method(&self) -> Method { self.method }
    pub fn pattern(&self) -> &Pattern { &self.pattern }
    pub fn meta(&self) -> &RouteMeta { &self.meta }

    pub(crate) fn handler(&self) -> BoxedHandler {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.to_string())
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Returned by every registration; attaches documentation to the new route.
///
/// ```rust,no_run
/// # use keev::{Request, Router, StatusCode};
/// # async fn create(_: Request) -> StatusCode { StatusCode::CREATED }
/// # fn main() -> Result<(), keev::Error> {
/// let mut router = Router::new();
/// router
///     .post("/items", create)?
///     .summary("Create an item")
///     .tag("items")
///     .success_status(StatusCode::CREATED);
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct RouteHandle<'a> {
    route: &'a mut Route,
}

impl RouteHandle<'_> {
    pub fn summary(self, summary: impl Into<String>) -> Self {
        self.route.meta.summary = Some(summary.into());
        self
    }

    pub fn description(self, description: impl Into<String>) -> Self {
        self.route.meta.description = Some(description.into());
        self
    }

    pub fn tag(self, tag: impl Into<String>) -> Self {
        self.route.meta.tags.push(tag.into());
        self
    }

    pub fn deprecated(self) -> Self {
        self.route.meta.deprecated = true;
        self
    }

    /// Documents the JSON body the handler reads with [`Request::json`](crate::Request::json).
    pub fn request_body<T: JsonSchema>(self) -> Self {
        self.route.meta.request_schema = Some(docs::component_schema::<T>());
        self
    }

    pub fn response<T: JsonSchema>(self) -> Self {
        self.route.meta.response_schema = Some(docs::component_schema::<T>());
        self
    }

    pub fn success_status(self, status: StatusCode) -> Self {
        self.route.meta.success_status = status;
        self
    }
}

/// Outcome of a successful [`Router::lookup`].
pub struct RouteMatch<'a> {
    route: &'a Route,
    params: Params,
}

impl<'a> RouteMatch<'a> {
    pub fn route(&self) -> &'a Route { self.route }
    pub fn params(&self) -> &Params { &self.params }

    pub(crate) fn into_parts(self) -> (BoxedHandler, Params) {
        (self.route.handler(), self.params)
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The application router.
///
/// Registration fails fast with [`Error::Configuration`] on a malformed
/// pattern, an unknown method, or a second route with the same method and
/// pattern. Parameter names do not distinguish patterns; parameter types do.
///
/// ```rust,no_run
/// # use keev::{Request, Response, Router};
/// # async fn get_item(_: Request) -> Response { Response::text("") }
/// # async fn list_items(_: Request) -> Response { Response::text("") }
/// # async fn create_item(_: Request) -> Response { Response::text("") }
/// # fn main() -> Result<(), keev::Error> {
/// let mut router = Router::with_prefix("/api");
/// router.get("/items",           list_items)?;
/// router.get("/items/{id:int}",  get_item)?;
/// router.register("POST", "/items", create_item)?;
/// # Ok(()) }
/// ```
#[derive(Default)]
pub struct Router {
    prefix: String,
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// A router whose registrations are all mounted under `prefix`.
    pub fn with_prefix(prefix: &str) -> Self {
        Self { prefix: prefix.to_owned(), routes: Vec::new() }
    }

    /// Registers a handler by method name. The name is matched
    /// case-insensitively against the routable set.
    pub fn register(
        &mut self,
        method: &str,
        path: &str,
        handler: impl Handler,
    ) -> Result<RouteHandle<'_>, Error> {
        let method = method
            .to_ascii_uppercase()
            .parse::<Method>()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        self.on(method, path, handler)
    }

    pub fn on(
        &mut self,
        method: Method,
        path: &str,
        handler: impl Handler,
    ) -> Result<RouteHandle<'_>, Error> {
        let path = join(&self.prefix, path);
        self.on_root(method, &path, handler)
    }

    /// Registers `path` as given, ignoring the router's prefix.
    pub(crate) fn on_root(
        &mut self,
        method: Method,
        path: &str,
        handler: impl Handler,
    ) -> Result<RouteHandle<'_>, Error> {
        let pattern = parse_pattern(path)?;
        self.insert(Route {
            method,
            pattern,
            handler: handler.into_boxed_handler(),
            meta: RouteMeta::default(),
        })
    }

    pub fn get(&mut self, path: &str, handler: impl Handler) -> Result<RouteHandle<'_>, Error> {
        self.on(Method::Get, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: impl Handler) -> Result<RouteHandle<'_>, Error> {
        self.on(Method::Post, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: impl Handler) -> Result<RouteHandle<'_>, Error> {
        self.on(Method::Put, path, handler)
    }

    pub fn patch(&mut self, path: &str, handler: impl Handler) -> Result<RouteHandle<'_>, Error> {
        self.on(Method::Patch, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: impl Handler) -> Result<RouteHandle<'_>, Error> {
        self.on(Method::Delete, path, handler)
    }

    pub fn options(&mut self, path: &str, handler: impl Handler) -> Result<RouteHandle<'_>, Error> {
        self.on(Method::Options, path, handler)
    }

    pub fn head(&mut self, path: &str, handler: impl Handler) -> Result<RouteHandle<'_>, Error> {
        self.on(Method::Head, path, handler)
    }

    /// Mounts every route of `other` under `prefix` (itself under this
    /// router's prefix). Metadata is kept; uniqueness is checked again.
    pub fn include(&mut self, prefix: &str, other: Router) -> Result<(), Error> {
        let base = join(&self.prefix, prefix);
        for route in other.routes {
            let pattern = parse_pattern(&join(&base, &route.pattern.to_string()))?;
            self.insert(Route { pattern, ..route })?;
        }
        Ok(())
    }

    /// Finds the handler for `method` and `path`.
    ///
    /// Segments are percent-decoded before matching; a segment that does not
    /// decode to UTF-8 matches nothing.
    pub fn lookup(&self, method: Method, path: &str) -> Result<RouteMatch<'_>, Error> {
        let segments = split_path(path).ok_or(Error::NotFound)?;

        let mut best: Option<RouteMatch<'_>> = None;
        for route in self.routes.iter().filter(|r| r.method == method) {
            let Some(params) = route.pattern.matches(&segments) else {
                continue;
            };
            let better = match &best {
                Some(current) => {
                    route.pattern.specificity_cmp(&current.route.pattern) == Ordering::Greater
                }
                None => true,
            };
            if better {
                best = Some(RouteMatch { route, params });
            }
        }

        best.ok_or(Error::NotFound)
    }

    /// Registered routes in registration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    fn insert(&mut self, route: Route) -> Result<RouteHandle<'_>, Error> {
        let key = route.pattern.key();
        if self
            .routes
            .iter()
            .any(|r| r.method == route.method && r.pattern.key() == key)
        {
            return Err(Error::Configuration(format!(
                "duplicate route {} {}",
                route.method, route.pattern
            )));
        }

        debug!(method = %route.method, pattern = %route.pattern, "route registered");
        let idx = self.routes.len();
        self.routes.push(route);
        Ok(RouteHandle { route: &mut self.routes[idx] })
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("prefix", &self.prefix)
            .field("routes", &self.routes)
            .finish()
    }
}

fn parse_pattern(raw: &str) -> Result<Pattern, Error> {
    Pattern::parse(raw).map_err(|e| Error::Configuration(format!("invalid route `{raw}`: {e}")))
}

fn join(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.to_owned();
    }
    format!("{prefix}/{}", path.trim_start_matches('/'))
}

fn split_path(path: &str) -> Option<Vec<String>> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8().ok().map(|s| s.into_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ParamValue, Request};
    use crate::response::Response;

    async fn noop(_req: Request) -> Response {
        Response::text("")
    }

    fn tagged(tag: &'static str) -> impl Handler {
        move |_req: Request| async move { tag }
    }

    async fn call(router: &Router, method: Method, path: &str) -> String {
        let (handler, _) = router.lookup(method, path).unwrap().into_parts();
        let req: Request = http::Request::new(bytes::Bytes::new()).into();
        let res = handler.call(req).await.unwrap();
        String::from_utf8(res.body().to_vec()).unwrap()
    }

    #[test]
    fn binds_typed_params() {
        let mut router = Router::new();
        router.get("/items/{id:int}/price/{p:float}", noop).unwrap();
        let m = router.lookup(Method::Get, "/items/7/price/2.5").unwrap();
        assert_eq!(m.params()["id"], ParamValue::Int(7));
        assert_eq!(m.params()["p"], ParamValue::Float(2.5));
        assert_eq!(m.route().pattern().to_string(), "/items/{id:int}/price/{p:float}");
    }

    #[test]
    fn coercion_failure_is_not_found() {
        let mut router = Router::new();
        router.get("/items/{id:int}", noop).unwrap();
        assert!(matches!(router.lookup(Method::Get, "/items/abc"), Err(Error::NotFound)));
    }

    #[test]
    fn method_must_match() {
        let mut router = Router::new();
        router.get("/items", noop).unwrap();
        assert!(matches!(router.lookup(Method::Post, "/items"), Err(Error::NotFound)));
    }

    #[test]
    fn segments_are_percent_decoded() {
        let mut router = Router::new();
        router.get("/users/{name}", noop).unwrap();
        let m = router.lookup(Method::Get, "/users/j%C3%B6rg%20m").unwrap();
        assert_eq!(m.params()["name"], ParamValue::Str("jörg m".into()));
        assert!(router.lookup(Method::Get, "/users/%FF").is_err());
    }

    #[tokio::test]
    async fn literal_beats_param_regardless_of_order() {
        let mut router = Router::new();
        router.get("/items/{id}", tagged("param")).unwrap();
        router.get("/items/new", tagged("literal")).unwrap();
        assert_eq!(call(&router, Method::Get, "/items/new").await, "literal");
        assert_eq!(call(&router, Method::Get, "/items/old").await, "param");
    }

    #[tokio::test]
    async fn path_capture_ranks_lowest() {
        let mut router = Router::new();
        router.get("/files/{rest:path}", tagged("capture")).unwrap();
        router.get("/files/{name}", tagged("param")).unwrap();
        assert_eq!(call(&router, Method::Get, "/files/a").await, "param");
        assert_eq!(call(&router, Method::Get, "/files/a/b").await, "capture");
    }

    #[tokio::test]
    async fn rank_tie_goes_to_first_registered() {
        let mut router = Router::new();
        router.get("/items/{id:int}", tagged("int")).unwrap();
        router.get("/items/{slug}", tagged("slug")).unwrap();
        assert_eq!(call(&router, Method::Get, "/items/5").await, "int");
        assert_eq!(call(&router, Method::Get, "/items/five").await, "slug");
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut router = Router::new();
        router.get("/items/{id}", noop).unwrap();
        let err = router.get("/items/{other:str}", noop).unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("duplicate")));
        router.post("/items/{id}", noop).unwrap();
    }

    #[test]
    fn malformed_pattern_and_unknown_method_fail() {
        let mut router = Router::new();
        assert!(matches!(router.get("/items/{id", noop), Err(Error::Configuration(_))));
        assert!(matches!(router.register("TRACE", "/x", noop), Err(Error::Configuration(_))));
        assert!(router.register("get", "/x", noop).is_ok());
    }

    #[test]
    fn prefix_and_include_compose() {
        let mut items = Router::with_prefix("/items");
        items.get("/", noop).unwrap().summary("list");
        items.get("/{id:int}", noop).unwrap();

        let mut api = Router::with_prefix("/api/");
        api.include("/v1", items).unwrap();

        let patterns: Vec<_> = api.routes().iter().map(|r| r.pattern().to_string()).collect();
        assert_eq!(patterns, ["/api/v1/items", "/api/v1/items/{id:int}"]);
        assert_eq!(api.routes()[0].meta().summary.as_deref(), Some("list"));
        assert!(api.lookup(Method::Get, "/api/v1/items/3").is_ok());
    }

    #[test]
    fn include_rechecks_uniqueness() {
        let mut a = Router::new();
        a.get("/v1/ping", noop).unwrap();
        let mut b = Router::new();
        b.get("/ping", noop).unwrap();
        assert!(matches!(a.include("/v1", b), Err(Error::Configuration(_))));
    }

    #[test]
    fn metadata_is_recorded() {
        #[derive(JsonSchema)]
        #[allow(dead_code)]
        struct NewItem {
            name: String,
        }

        let mut router = Router::new();
        router
            .post("/items", noop)
            .unwrap()
            .summary("Create")
            .description("Creates an item")
            .tag("items")
            .deprecated()
            .request_body::<NewItem>()
            .success_status(StatusCode::CREATED);

        let meta = router.routes()[0].meta();
        assert_eq!(meta.summary.as_deref(), Some("Create"));
        assert_eq!(meta.tags, ["items"]);
        assert!(meta.deprecated);
        assert_eq!(meta.success_status, StatusCode::CREATED);
        assert_eq!(meta.request_schema.as_ref().unwrap().name, "NewItem");
    }
}
