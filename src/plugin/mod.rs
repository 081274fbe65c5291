//! Plugin hooks.
//!
//! A plugin observes traffic and the application lifecycle without taking
//! part in dispatch. Every hook has a no-op default, so a plugin overrides
//! only what it needs:
//!
//! ```rust,no_run
//! use keev::plugin::Plugin;
//! use keev::{PluginError, Request, async_trait};
//!
//! struct Audit;
//!
//! #[async_trait]
//! impl Plugin for Audit {
//!     async fn pre_request(&self, req: &Request) -> Result<(), PluginError> {
//!         if req.header("x-tenant").is_none() {
//!             return Err(PluginError::new("request without tenant"));
//!         }
//!         Ok(())
//!     }
//! }
//! ```
//!
//! `pre_request` hooks run before routing and the middleware chain;
//! `post_request` hooks run after the response is final, including 404s and
//! 500s. Hooks run in registration order. A hook that fails or panics is
//! logged and skipped: the remaining hooks still run and the response is
//! untouched.

mod logger;
mod metrics;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info};

use crate::error::{PluginError, panic_message};
use crate::request::Request;
use crate::response::Response;

pub use logger::RequestLogger;
pub use metrics::{Metrics, MetricsSnapshot, PathStats, UNMATCHED};

#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Name used in logs. Defaults to the type name without its module path.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        let head = full.split('<').next().unwrap_or(full);
        match head.rfind("::") {
            Some(i) => &full[i + 2..],
            None => full,
        }
    }

    async fn pre_request(&self, _req: &Request) -> Result<(), PluginError> {
        Ok(())
    }

    async fn post_request(&self, _req: &Request, _res: &Response) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_startup(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Registered plugins in registration order.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: impl Plugin) {
        info!(plugin = plugin.name(), "plugin registered");
        self.plugins.push(Arc::new(plugin));
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub async fn run_pre_request(&self, req: &Request) {
        for plugin in &self.plugins {
            let outcome = AssertUnwindSafe(plugin.pre_request(req)).catch_unwind().await;
            report(plugin.as_ref(), "pre_request", outcome);
        }
    }

    pub async fn run_post_request(&self, req: &Request, res: &Response) {
        for plugin in &self.plugins {
            let outcome = AssertUnwindSafe(plugin.post_request(req, res)).catch_unwind().await;
            report(plugin.as_ref(), "post_request", outcome);
        }
    }

    pub async fn run_startup(&self) {
        for plugin in &self.plugins {
            let outcome = AssertUnwindSafe(plugin.on_startup()).catch_unwind().await;
            report(plugin.as_ref(), "on_startup", outcome);
        }
    }

    pub async fn run_shutdown(&self) {
        for plugin in &self.plugins {
            let outcome = AssertUnwindSafe(plugin.on_shutdown()).catch_unwind().await;
            report(plugin.as_ref(), "on_shutdown", outcome);
        }
    }
}

fn report(
    plugin: &dyn Plugin,
    hook: &'static str,
    outcome: Result<Result<(), PluginError>, Box<dyn Any + Send>>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(plugin = plugin.name(), hook, "plugin hook failed: {e}"),
        Err(panic) => error!(
            plugin = plugin.name(),
            hook,
            "plugin hook panicked: {}",
            panic_message(panic.as_ref())
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        async fn pre_request(&self, _req: &Request) -> Result<(), PluginError> {
            self.log.lock().unwrap().push(format!("{} pre", self.tag));
            Ok(())
        }

        async fn post_request(&self, _req: &Request, _res: &Response) -> Result<(), PluginError> {
            self.log.lock().unwrap().push(format!("{} post", self.tag));
            Ok(())
        }

        async fn on_startup(&self) -> Result<(), PluginError> {
            self.log.lock().unwrap().push(format!("{} up", self.tag));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Plugin for Failing {
        async fn pre_request(&self, _req: &Request) -> Result<(), PluginError> {
            Err(PluginError::new("nope"))
        }

        async fn post_request(&self, _req: &Request, _res: &Response) -> Result<(), PluginError> {
            panic!("post hook exploded");
        }
    }

    fn request() -> Request {
        http::Request::new(Bytes::new()).into()
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(Recorder { tag: "a", log: Arc::clone(&log) });
        registry.register(Recorder { tag: "b", log: Arc::clone(&log) });

        registry.run_startup().await;
        registry.run_pre_request(&request()).await;
        registry.run_post_request(&request(), &Response::text("x")).await;
        registry.run_shutdown().await;

        assert_eq!(*log.lock().unwrap(), ["a up", "b up", "a pre", "b pre", "a post", "b post"]);
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_stop_later_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(Failing);
        registry.register(Recorder { tag: "after", log: Arc::clone(&log) });

        registry.run_pre_request(&request()).await;
        registry.run_post_request(&request(), &Response::text("x")).await;

        assert_eq!(*log.lock().unwrap(), ["after pre", "after post"]);
    }

    #[test]
    fn default_name_is_the_bare_type_name() {
        assert_eq!(Failing.name(), "Failing");
        assert_eq!(RequestLogger.name(), "RequestLogger");
    }
}
