use std::time::Instant;

use async_trait::async_trait;
use http::HeaderValue;

use super::{Middleware, Next};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Sets `x-process-time` to the seconds spent inside the layer, with three
/// decimals.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timing;

#[async_trait]
impl Middleware for Timing {
    async fn handle(&self, req: Request, next: Next) -> Result<Response, Error> {
        let start = Instant::now();
        let mut res = next.run(req).await?;
        let elapsed = format!("{:.3}", start.elapsed().as_secs_f64());
        if let Ok(value) = HeaderValue::from_str(&elapsed) {
            res.headers_mut().insert("x-process-time", value);
        }
        Ok(res)
    }
}
