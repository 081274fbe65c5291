//! Middleware layer.
//!
//! Middleware wraps the matched handler and is the right place for
//! cross-cutting concerns: tracing, CORS, timing, authentication-header
//! inspection. A middleware receives the request and a [`Next`] and
//! decides what to do with them:
//!
//! ```rust,no_run
//! use keev::http::HeaderValue;
//! use keev::middleware::Next;
//! use keev::{Error, Request, Response, StatusCode};
//!
//! async fn require_token(req: Request, next: Next) -> Result<Response, Error> {
//!     if req.header("authorization").is_none() {
//!         return Err(Error::http(StatusCode::UNAUTHORIZED, "missing token"));
//!     }
//!     let mut res = next.run(req).await?;
//!     res.headers_mut().insert("x-authenticated", HeaderValue::from_static("1"));
//!     Ok(res)
//! }
//! ```
//!
//! Returning without calling [`Next::run`] short-circuits everything inside.
//! `Next` is consumed by `run`, so the inner chain runs at most once.
//!
//! Registration order is nesting order: the first middleware added is the
//! outermost. Requests pass through in registration order and responses
//! come back in reverse. An `Err` travels outward through `?` and skips the
//! post-processing of every layer that does not match on it.
//!
//! Built-ins: [`Cors`], [`Trace`], [`Timing`].

mod cors;
mod timing;
mod trace;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;

pub use cors::Cors;
pub use timing::Timing;
pub use trace::Trace;

/// A unit of the middleware chain.
///
/// Implemented for every `Fn(Request, Next) -> impl Future<Output =
/// Result<Response, Error>>`, so plain `async fn`s work as middleware.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, req: Request, next: Next) -> Result<Response, Error>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    async fn handle(&self, req: Request, next: Next) -> Result<Response, Error> {
        (self)(req, next).await
    }
}

/// The rest of the chain: the remaining middleware, then the handler.
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    cursor: usize,
    endpoint: BoxedHandler,
}

impl Next {
    /// Runs the next inner layer with `req`.
    pub async fn run(self, req: Request) -> Result<Response, Error> {
        let Self { chain, cursor, endpoint } = self;
        match chain.get(cursor).cloned() {
            Some(layer) => {
                let next = Next { chain, cursor: cursor + 1, endpoint };
                layer.handle(req, next).await
            }
            None => endpoint.call(req).await,
        }
    }
}

/// Ordered middleware, frozen once the application is built.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Arc<[Arc<dyn Middleware>]>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `middleware` as the new innermost layer.
    pub fn add(&mut self, middleware: impl Middleware) {
        let mut layers = self.layers.to_vec();
        layers.push(Arc::new(middleware));
        self.layers = layers.into();
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs `req` through every layer and finally `endpoint`.
    pub async fn dispatch(&self, req: Request, endpoint: BoxedHandler) -> Result<Response, Error> {
        let next = Next { chain: Arc::clone(&self.layers), cursor: 0, endpoint };
        next.run(req).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::handler::Handler;

    type Log = Arc<Mutex<Vec<String>>>;

    fn request() -> Request {
        http::Request::new(Bytes::new()).into()
    }

    fn recorder(name: &'static str, log: Log) -> impl Middleware {
        move |req: Request, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{name} in"));
                let res = next.run(req).await;
                log.lock().unwrap().push(format!("{name} out"));
                res
            }
        }
    }

    fn endpoint(log: Log) -> BoxedHandler {
        let handler = move |_req: Request| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push("handler".to_owned());
                "done"
            }
        };
        handler.into_boxed_handler()
    }

    #[tokio::test]
    async fn in_registration_order_out_in_reverse() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        chain.add(recorder("a", Arc::clone(&log)));
        chain.add(recorder("b", Arc::clone(&log)));

        let res = chain.dispatch(request(), endpoint(Arc::clone(&log))).await.unwrap();
        assert_eq!(res.body(), b"done");
        assert_eq!(*log.lock().unwrap(), ["a in", "b in", "handler", "b out", "a out"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_inner_layers_and_handler() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        chain.add(recorder("outer", Arc::clone(&log)));
        chain.add(|_req: Request, _next: Next| async {
            Ok::<_, Error>(Response::status(StatusCode::FORBIDDEN))
        });
        chain.add(recorder("inner", Arc::clone(&log)));

        let res = chain.dispatch(request(), endpoint(Arc::clone(&log))).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(*log.lock().unwrap(), ["outer in", "outer out"]);
    }

    #[tokio::test]
    async fn errors_skip_post_processing_unless_matched() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        let seen = Arc::clone(&log);
        chain.add(move |req: Request, next: Next| {
            let seen = Arc::clone(&seen);
            async move {
                let res = next.run(req).await;
                seen.lock().unwrap().push(format!("matched err: {}", res.is_err()));
                res
            }
        });
        let skipped = Arc::clone(&log);
        chain.add(move |req: Request, next: Next| {
            let skipped = Arc::clone(&skipped);
            async move {
                let res = next.run(req).await?;
                skipped.lock().unwrap().push("post-processed".to_owned());
                Ok::<_, Error>(res)
            }
        });

        let failing = |_req: Request| async { Err::<Response, _>(Error::handler("boom")) };
        let err = chain.dispatch(request(), failing.into_boxed_handler()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(*log.lock().unwrap(), ["matched err: true"]);
    }

    #[tokio::test]
    async fn middleware_can_attach_extensions() {
        #[derive(Clone)]
        struct User(&'static str);

        let mut chain = MiddlewareChain::new();
        chain.add(|mut req: Request, next: Next| async move {
            req.extensions_mut().insert(User("ada"));
            next.run(req).await
        });

        let handler = |req: Request| async move {
            req.extensions().get::<User>().map(|u| u.0).unwrap_or("anonymous")
        };
        let res = chain.dispatch(request(), handler.into_boxed_handler()).await.unwrap();
        assert_eq!(res.body(), b"ada");
    }

    #[tokio::test]
    async fn empty_chain_calls_the_endpoint() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());
        let res = chain.dispatch(request(), endpoint(Log::default())).await.unwrap();
        assert_eq!(res.body(), b"done");
    }
}
