use async_trait::async_trait;
use tracing::{debug, info};

use super::Plugin;
use crate::error::PluginError;
use crate::request::Request;
use crate::response::Response;

/// Logs every request on arrival (`debug`) and its final status (`info`).
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestLogger;

#[async_trait]
impl Plugin for RequestLogger {
    async fn pre_request(&self, req: &Request) -> Result<(), PluginError> {
        debug!(method = %req.method(), path = req.path(), "request received");
        Ok(())
    }

    async fn post_request(&self, req: &Request, res: &Response) -> Result<(), PluginError> {
        let elapsed_ms = req.received_at().elapsed().as_secs_f64() * 1000.0;
        info!(
            method = %req.method(),
            path = req.path(),
            status = res.status_code().as_u16(),
            elapsed_ms,
            "request handled"
        );
        Ok(())
    }
}
