//! # keev
//!
//! A minimal web framework on hyper: typed routing, a continuation-passing
//! middleware chain, plugin hooks, schema-validated JSON bodies and a
//! generated OpenAPI document.
//!
//! ## The dispatch chain
//!
//! Every request takes the same path:
//!
//! - plugin `pre_request` hooks observe it;
//! - the [`Router`] picks the most specific matching route and binds typed
//!   path parameters;
//! - the middleware chain runs around the handler, first registered
//!   outermost;
//! - an error boundary turns any `Err` or panic into a JSON error response
//!   (`{"error": kind, "detail": ...}`) with a stable status code;
//! - plugin `post_request` hooks observe the final response.
//!
//! Routes, middleware and plugins are fixed when the [`Application`] is
//! built. There is no global state: the application is a value you hand to
//! the [`Server`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use keev::middleware::Trace;
//! use keev::{Application, DocsConfig, Error, Json, Request, Router, Server};
//! use schemars::JsonSchema;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize, Serialize, JsonSchema)]
//! struct Item {
//!     name: String,
//!     price: f64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut router = Router::new();
//!     router.get("/items/{id:int}", get_item)?.summary("Fetch an item");
//!     router.post("/items", create_item)?.request_body::<Item>();
//!
//!     let app = Application::builder(router)
//!         .middleware(Trace)
//!         .docs(DocsConfig::default())
//!         .build()?;
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn get_item(req: Request) -> Json<serde_json::Value> {
//!     Json(serde_json::json!({ "id": req.param("id") }))
//! }
//!
//! // 422 with every failing field when the body does not match `Item`.
//! async fn create_item(req: Request) -> Result<(keev::StatusCode, Json<Item>), Error> {
//!     let item: Item = req.json()?;
//!     Ok(Json::created(item))
//! }
//! ```

mod app;
mod docs;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod validation;

pub mod middleware;
pub mod plugin;

pub use app::{Application, ApplicationBuilder};
pub use docs::{ComponentSchema, DocsConfig, openapi};
pub use error::{BoxError, Error, FieldError, PluginError};
pub use handler::{Handler, IntoResult};
pub use method::{Method, UnknownMethod};
pub use request::{ParamValue, Params, Request};
pub use response::{ContentType, IntoResponse, Json, Response, ResponseBuilder};
pub use router::{ParamKind, Pattern, PatternError, Route, RouteHandle, RouteMatch, RouteMeta, Router};
pub use server::{Server, serve_listener};

pub use async_trait::async_trait;
pub use http;
pub use http::StatusCode;
