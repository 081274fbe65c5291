use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, info, info_span, warn};

use super::{Middleware, Next};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Opens an `info` span per request carrying method and path, and logs the
/// outcome with its latency when the inner chain returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

#[async_trait]
impl Middleware for Trace {
    async fn handle(&self, req: Request, next: Next) -> Result<Response, Error> {
        let span = info_span!("request", method = %req.method(), path = %req.path());

        async move {
            let start = Instant::now();
            let result = next.run(req).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            match &result {
                Ok(res) => info!(status = res.status_code().as_u16(), elapsed_ms, "request completed"),
                Err(e) => warn!(status = e.status().as_u16(), elapsed_ms, "request failed: {e}"),
            }
            result
        }
        .instrument(span)
        .await
    }
}
