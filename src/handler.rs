//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in a single `Vec<Route>`.
//! Rust collections can only hold one concrete type, so we use **trait
//! objects** (`dyn ErasedHandler`) to hide the concrete handler type behind a
//! common interface and store everything uniformly.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn get_item(req: Request) -> Json<Item> { … }   ← user writes this
//!        ↓ router.get("/items/{id:int}", get_item)
//! get_item.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_item))                       ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(req)  at request time                  ← one vtable dispatch
//!        ↓
//! Box::pin(async { get_item(req).await.into_result() })  ← BoxFuture
//! ```
//!
//! Handlers may return anything that implements [`IntoResponse`], or a
//! `Result<T, E>` where `T: IntoResponse` and `E: Into<Error>`. An `Err`
//! travels back out through the middleware chain to the application's error
//! boundary, which renders it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` is required because the async runtime must be able to poll
/// the future in-place. `Send` lets tokio move it across worker threads.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Error>>;
}

/// A heap-allocated, type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Handler output ────────────────────────────────────────────────────────────

/// Conversion of a handler's return value into the chain's result type.
///
/// Implemented for every [`IntoResponse`] type (always `Ok`) and for
/// `Result<T, E>` with `T: IntoResponse, E: Into<Error>`.
pub trait IntoResult {
    fn into_result(self) -> Result<Response, Error>;
}

impl<T: IntoResponse> IntoResult for T {
    fn into_result(self) -> Result<Response, Error> {
        Ok(self.into_response())
    }
}

impl<T, E> IntoResult for Result<T, E>
where
    T: IntoResponse,
    E: Into<Error>,
{
    fn into_result(self) -> Result<Response, Error> {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` (or closure returning a future) with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResult
/// ```
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResult + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResult + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResult + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Error>> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_result() })
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    async fn ok(_req: Request) -> &'static str {
        "ok"
    }

    async fn failing(_req: Request) -> Result<Response, Error> {
        Err(Error::http(StatusCode::CONFLICT, "taken"))
    }

    fn empty_request() -> Request {
        http::Request::new(bytes::Bytes::new()).into()
    }

    #[tokio::test]
    async fn plain_return_values_are_ok() {
        let res = ok.into_boxed_handler().call(empty_request()).await.unwrap();
        assert_eq!(res.body(), b"ok");
    }

    #[tokio::test]
    async fn err_returns_propagate_as_errors() {
        let err = failing.into_boxed_handler().call(empty_request()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn closures_capture_state() {
        let greeting = String::from("hello");
        let handler = move |_req: Request| {
            let greeting = greeting.clone();
            async move { greeting }
        };
        let res = handler.into_boxed_handler().call(empty_request()).await.unwrap();
        assert_eq!(res.body(), b"hello");
    }
}
