//! Minimal keev example: an in-memory item store with validated JSON bodies,
//! CORS, timing, request logging, metrics and generated documentation.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/items
//!   curl -X POST http://localhost:3000/items \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"pen","price":1.5}'
//!   curl -X POST http://localhost:3000/items -d '{"name":3}'     # 422
//!   curl http://localhost:3000/items/1
//!   curl http://localhost:3000/items/abc                          # 404
//!   curl http://localhost:3000/metrics
//!   open http://localhost:3000/docs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use keev::middleware::{Cors, Next, Timing, Trace};
use keev::plugin::{Metrics, RequestLogger};
use keev::{
    Application, DocsConfig, Error, Json, Request, Response, Router, Server, StatusCode,
};
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Deserialize, JsonSchema)]
struct NewItem {
    name: String,
    #[schemars(range(min = 0))]
    price: f64,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Clone, Serialize, JsonSchema)]
struct Item {
    id: i64,
    name: String,
    price: f64,
    tags: Vec<String>,
}

/// Shared store, attached to every request by a middleware.
#[derive(Clone, Default)]
struct Store {
    next_id: Arc<AtomicI64>,
    items: Arc<RwLock<BTreeMap<i64, Item>>>,
}

fn store(req: &Request) -> Result<&Store, Error> {
    req.extensions()
        .get::<Store>()
        .ok_or_else(|| Error::handler("store middleware not installed"))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr = std::env::var("KEEV_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_owned());

    let mut items = Router::with_prefix("/items");
    items
        .get("/", list_items)?
        .summary("List items")
        .tag("items")
        .response::<Vec<Item>>();
    items
        .post("/", create_item)?
        .summary("Create an item")
        .tag("items")
        .request_body::<NewItem>()
        .response::<Item>()
        .success_status(StatusCode::CREATED);
    items
        .get("/{id:int}", get_item)?
        .summary("Fetch an item")
        .tag("items")
        .response::<Item>();
    items
        .delete("/{id:int}", delete_item)?
        .summary("Delete an item")
        .tag("items")
        .success_status(StatusCode::NO_CONTENT);

    let metrics = Metrics::new();
    let snapshot = metrics.clone();

    let mut router = Router::new();
    router.include("/", items)?;
    router
        .get("/metrics", move |_req: Request| {
            let metrics = snapshot.clone();
            async move { Json(metrics.snapshot()) }
        })?
        .summary("Request metrics");

    let store = Store::default();
    let app = Application::builder(router)
        .title("Item Store")
        .version("0.1.0")
        .middleware(Trace)
        .middleware(Cors::permissive())
        .middleware(Timing)
        .middleware(move |mut req: Request, next: Next| {
            req.extensions_mut().insert(store.clone());
            next.run(req)
        })
        .plugin(RequestLogger)
        .plugin(metrics)
        .on_startup(|| async {
            info!("warming up");
            Ok::<_, Error>(())
        })
        .docs(DocsConfig::default())
        .build()?;

    Server::bind(&addr)?.serve(app).await
}

// GET /items
async fn list_items(req: Request) -> Result<Json<Vec<Item>>, Error> {
    let items = store(&req)?.items.read().values().cloned().collect();
    Ok(Json(items))
}

// POST /items → 201, or 422 listing every invalid field
async fn create_item(req: Request) -> Result<(StatusCode, Json<Item>), Error> {
    let input: NewItem = req.json()?;
    let store = store(&req)?;

    let id = store.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let item = Item { id, name: input.name, price: input.price, tags: input.tags };
    store.items.write().insert(id, item.clone());
    Ok(Json::created(item))
}

// GET /items/{id:int}; a non-integer id never reaches this handler
async fn get_item(req: Request) -> Result<Json<Item>, Error> {
    let id = req.param("id").and_then(|p| p.as_i64()).unwrap_or_default();
    let item = store(&req)?.items.read().get(&id).cloned();
    item.map(Json)
        .ok_or_else(|| Error::http(StatusCode::NOT_FOUND, format!("item {id} does not exist")))
}

// DELETE /items/{id:int} → 204 No Content
async fn delete_item(req: Request) -> Result<Response, Error> {
    let id = req.param("id").and_then(|p| p.as_i64()).unwrap_or_default();
    let removed = store(&req)?.items.write().remove(&id);
    match removed {
        Some(_) => Ok(Response::status(StatusCode::NO_CONTENT)),
        None => Err(Error::http(StatusCode::NOT_FOUND, format!("item {id} does not exist"))),
    }
}
