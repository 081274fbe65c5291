//! The application: router, middleware, plugins and lifecycle in one value.
//!
//! ```text
//! raw request ─▶ Request ─▶ pre_request hooks ─▶ Router::lookup
//!                                                    │
//!                        ┌───────── error boundary ──┴────────────┐
//!                        │ middleware 1 ▶ … ▶ middleware n ▶ handler │
//!                        └──────────────────┬──────────────────────┘
//!                                           ▼
//!                   post_request hooks ◀─ Response ─▶ raw response
//! ```
//!
//! Everything is frozen by [`ApplicationBuilder::build`]. The built value is
//! shared read-only between connections; the server wraps it in an `Arc`.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::FutureExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::docs::{self, DocsConfig};
use crate::error::{BoxError, Error, panic_message};
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::method::Method;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::plugin::{Plugin, PluginRegistry};
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::router::Router;

type LifecycleHook = Box<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

fn lifecycle_hook<F, Fut, E>(hook: F) -> LifecycleHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    Box::new(move || {
        let fut = hook();
        Box::pin(async move { fut.await.map_err(Into::into) })
    })
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Configures an [`Application`]. Obtain via [`Application::builder`].
pub struct ApplicationBuilder {
    router: Router,
    title: String,
    version: String,
    middleware: MiddlewareChain,
    plugins: PluginRegistry,
    startup: Vec<LifecycleHook>,
    shutdown: Vec<LifecycleHook>,
    docs: Option<DocsConfig>,
}

impl ApplicationBuilder {
    /// Title of the OpenAPI document. Defaults to `Keev API`.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Version of the OpenAPI document. Defaults to `1.0.0`.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Adds a middleware. The first one added is the outermost.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.add(middleware);
        self
    }

    pub fn plugin(mut self, plugin: impl Plugin) -> Self {
        self.plugins.register(plugin);
        self
    }

    /// Runs `hook` during [`Application::startup`]. A failing startup hook
    /// aborts startup.
    pub fn on_startup<F, Fut, E>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.startup.push(lifecycle_hook(hook));
        self
    }

    /// Runs `hook` during [`Application::shutdown`]. Failures are logged.
    pub fn on_shutdown<F, Fut, E>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.shutdown.push(lifecycle_hook(hook));
        self
    }

    /// Serves the OpenAPI document and its pages. Off unless set.
    pub fn docs(mut self, config: DocsConfig) -> Self {
        self.docs = Some(config);
        self
    }

    /// Freezes the configuration.
    ///
    /// Fails with [`Error::Configuration`] when a documentation page collides
    /// with a registered route.
    pub fn build(self) -> Result<Application, Error> {
        let mut router = self.router;
        let openapi = docs::openapi(&self.title, &self.version, router.routes());
        if let Some(config) = &self.docs {
            docs::mount(&mut router, config, &self.title, &openapi)?;
        }

        info!(
            routes = router.routes().len(),
            middleware = self.middleware.len(),
            plugins = self.plugins.len(),
            "application built"
        );

        Ok(Application {
            title: self.title,
            router,
            middleware: self.middleware,
            plugins: self.plugins,
            startup: self.startup,
            shutdown: self.shutdown,
            not_found: not_found.into_boxed_handler(),
            openapi,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }
}

async fn not_found(_req: Request) -> Result<Response, Error> {
    Err(Error::NotFound)
}

// ── Application ───────────────────────────────────────────────────────────────

/// A built application, ready to be served.
pub struct Application {
    title: String,
    router: Router,
    middleware: MiddlewareChain,
    plugins: PluginRegistry,
    startup: Vec<LifecycleHook>,
    shutdown: Vec<LifecycleHook>,
    not_found: BoxedHandler,
    openapi: Value,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Application {
    pub fn builder(router: Router) -> ApplicationBuilder {
        ApplicationBuilder {
            router,
            title: "Keev API".to_owned(),
            version: "1.0.0".to_owned(),
            middleware: MiddlewareChain::new(),
            plugins: PluginRegistry::new(),
            startup: Vec::new(),
            shutdown: Vec::new(),
            docs: None,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The OpenAPI document of the user routes.
    pub fn openapi(&self) -> &Value {
        &self.openapi
    }

    /// Handles one transport request end to end. Never fails: every error,
    /// including a panicking handler, becomes a structured response.
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let (body, read_error): (Bytes, Option<BoxError>) = match body.collect().await {
            Ok(collected) => (collected.to_bytes(), None),
            Err(e) => (Bytes::new(), Some(e.into())),
        };
        let mut request = Request::from_parts(parts, body);

        self.plugins.run_pre_request(&request).await;

        let method = request.method().clone();
        let path = request.path().to_owned();

        let (response, observed) = match read_error {
            Some(e) => {
                warn!(%method, path = %path, "failed to read request body: {e}");
                let response = Error::BadRequest("failed to read request body".to_owned()).into_response();
                (response, Some(request))
            }
            None => {
                let endpoint = self.resolve(&mut request, &method, &path);
                let observed = (!self.plugins.is_empty()).then(|| request.clone());
                (self.dispatch(request, endpoint, &method, &path).await, observed)
            }
        };

        if let Some(req) = &observed {
            self.plugins.run_post_request(req, &response).await;
        }
        response.into_http()
    }

    /// Binds path parameters and returns the matched handler, or the
    /// not-found endpoint so unmatched requests still pass the middleware.
    fn resolve(&self, request: &mut Request, method: &http::Method, path: &str) -> BoxedHandler {
        let matched = Method::from_http(method)
            .ok_or(Error::NotFound)
            .and_then(|m| self.router.lookup(m, path));

        match matched {
            Ok(matched) => {
                let pattern = matched.route().pattern().to_string();
                let (handler, params) = matched.into_parts();
                request.bind_route(pattern, params);
                handler
            }
            Err(_) => Arc::clone(&self.not_found),
        }
    }

    /// Runs the middleware chain around `endpoint` inside the error boundary.
    async fn dispatch(
        &self,
        request: Request,
        endpoint: BoxedHandler,
        method: &http::Method,
        path: &str,
    ) -> Response {
        let outcome = AssertUnwindSafe(self.middleware.dispatch(request, endpoint))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => {
                e.log(method, path);
                e.into_response()
            }
            Err(panic) => {
                error!(%method, path, "handler panicked: {}", panic_message(panic.as_ref()));
                Error::handler("handler panicked").into_response()
            }
        }
    }

    /// Runs startup hooks, then plugin `on_startup` hooks.
    ///
    /// The first failing startup hook aborts with [`Error::Configuration`].
    /// Calling this again after a success is a no-op.
    pub async fn startup(&self) -> Result<(), Error> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(title = %self.title, "starting application");

        for hook in &self.startup {
            if let Err(e) = hook().await {
                error!("startup hook failed: {e}");
                self.started.store(false, Ordering::SeqCst);
                return Err(Error::Configuration(format!("startup hook failed: {e}")));
            }
        }
        self.plugins.run_startup().await;

        info!("application startup complete");
        Ok(())
    }

    /// Runs shutdown hooks, then plugin `on_shutdown` hooks. Failures are
    /// logged. Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down application");

        for hook in &self.shutdown {
            if let Err(e) = hook().await {
                error!("shutdown hook failed: {e}");
            }
        }
        self.plugins.run_shutdown().await;

        info!("application shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use http::StatusCode;
    use http_body_util::Empty;

    use super::*;

    async fn ok(_req: Request) -> &'static str {
        "ok"
    }

    fn get(uri: &str) -> http::Request<Empty<Bytes>> {
        http::Request::get(uri).body(Empty::new()).unwrap()
    }

    #[tokio::test]
    async fn unknown_methods_are_not_found() {
        let mut router = Router::new();
        router.get("/", ok).unwrap();
        let app = Application::builder(router).build().unwrap();

        let req = http::Request::builder()
            .method("PROPFIND")
            .uri("/")
            .body(Empty::<Bytes>::new())
            .unwrap();
        assert_eq!(app.handle(req).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(app.handle(get("/")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn startup_is_idempotent_and_shutdown_runs_once() {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let (s, t) = (Arc::clone(&starts), Arc::clone(&stops));

        let app = Application::builder(Router::new())
            .on_startup(move || {
                let s = Arc::clone(&s);
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(())
                }
            })
            .on_shutdown(move || {
                let t = Arc::clone(&t);
                async move {
                    t.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("flush failed")
                }
            })
            .build()
            .unwrap();

        app.startup().await.unwrap();
        app.startup().await.unwrap();
        app.shutdown().await;
        app.shutdown().await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_startup_hook_is_a_configuration_error() {
        let app = Application::builder(Router::new())
            .on_startup(|| async { Err::<(), _>("database unreachable") })
            .build()
            .unwrap();

        let err = app.startup().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("database unreachable")));
    }

    #[tokio::test]
    async fn openapi_excludes_documentation_routes() {
        let mut router = Router::new();
        router.get("/items", ok).unwrap();
        let app = Application::builder(router)
            .title("Shop")
            .version("2.1.0")
            .docs(DocsConfig::default())
            .build()
            .unwrap();

        assert_eq!(app.openapi()["info"]["title"], "Shop");
        assert_eq!(app.openapi()["info"]["version"], "2.1.0");
        assert!(app.openapi()["paths"].get("/docs").is_none());
        assert_eq!(app.handle(get("/openapi.json")).await.status(), StatusCode::OK);
    }
}
