use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use super::Plugin;
use crate::error::PluginError;
use crate::request::Request;
use crate::response::Response;

/// Key under which requests that matched no route are counted.
pub const UNMATCHED: &str = "<unmatched>";

/// Request counters and per-route latency.
///
/// Statistics are keyed by route pattern (`/items/{id:int}`), so the number
/// of entries is bounded by the number of routes plus [`UNMATCHED`].
///
/// Clones share the same counters, so keep one clone to read
/// [`snapshot`](Metrics::snapshot) from a handler after registering the
/// other with the application.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    requests: AtomicU64,
    paths: Mutex<HashMap<String, PathStats>>,
}

/// Latency and status-class counters for one route.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PathStats {
    pub count: u64,
    pub total_secs: f64,
    pub max_secs: f64,
    /// Keyed by class: `2xx`, `4xx`, ...
    pub statuses: BTreeMap<String, u64>,
}

impl PathStats {
    pub fn mean_secs(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.total_secs / self.count as f64 }
    }

    fn record(&mut self, elapsed: Duration, status: u16) {
        let secs = elapsed.as_secs_f64();
        self.count += 1;
        self.total_secs += secs;
        self.max_secs = self.max_secs.max(secs);
        *self.statuses.entry(format!("{}xx", status / 100)).or_default() += 1;
    }
}

/// Point-in-time copy of the counters.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Requests seen by `pre_request`, including unmatched ones.
    pub requests: u64,
    pub paths: BTreeMap<String, PathStats>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let paths = self
            .inner
            .paths
            .lock()
            .iter()
            .map(|(path, stats)| (path.clone(), stats.clone()))
            .collect();
        MetricsSnapshot { requests: self.inner.requests.load(Ordering::Relaxed), paths }
    }
}

#[async_trait]
impl Plugin for Metrics {
    async fn pre_request(&self, _req: &Request) -> Result<(), PluginError> {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn post_request(&self, req: &Request, res: &Response) -> Result<(), PluginError> {
        let elapsed = req.received_at().elapsed();
        self.inner
            .paths
            .lock()
            .entry(req.matched_route().unwrap_or(UNMATCHED).to_owned())
            .or_default()
            .record(elapsed, res.status_code().as_u16());
        Ok(())
    }

    async fn on_startup(&self) -> Result<(), PluginError> {
        info!("metrics plugin started");
        Ok(())
    }

    async fn on_shutdown(&self) -> Result<(), PluginError> {
        let snapshot = self.snapshot();
        info!(requests = snapshot.requests, paths = snapshot.paths.len(), "metrics plugin stopped");
        Ok(())
    }
}
