//! HTTP middleware for the Trends client.

use crate::utils::fmt_duration;
use http::Extensions;
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Logs every upstream request with its status and latency. Throttling is
/// logged at WARN since it is the signal the refresh cycle reacts to.
pub struct TraceMiddleware;

#[async_trait::async_trait]
impl Middleware for TraceMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let method = req.method().clone();
        let path = req.url().path().to_owned();
        let start = Instant::now();

        let result = next.run(req, extensions).await;
        let duration = fmt_duration(start.elapsed());

        match &result {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    warn!(%method, path, status = status.as_u16(), duration, "Upstream throttled request");
                } else if !status.is_success() {
                    debug!(%method, path, status = status.as_u16(), duration, "Upstream request failed");
                } else {
                    trace!(%method, path, status = status.as_u16(), duration, "Upstream request");
                }
            }
            Err(error) => {
                debug!(%method, path, duration, error = ?error, "Upstream request errored");
            }
        }

        result
    }
}
