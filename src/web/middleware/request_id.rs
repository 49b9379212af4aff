//! Per-request tracing spans with propagated request IDs.
//!
//! Honors an inbound `X-Request-Id` (or the edge proxy's
//! `X-Railway-Request-Id`) so logs correlate across hops, and otherwise
//! generates a ULID. The resolved ID is echoed in the `X-Request-Id` response
//! header.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::Response;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::Instrument;

use crate::utils::fmt_duration;

pub const REQUEST_ID: &str = "x-request-id";
static RAILWAY_REQUEST_ID: &str = "x-railway-request-id";

/// Longest inbound ID accepted verbatim.
const MAX_INBOUND_LEN: usize = 128;

fn inbound_id(req: &Request) -> Option<String> {
    [REQUEST_ID, RAILWAY_REQUEST_ID]
        .into_iter()
        .filter_map(|name| req.headers().get(name))
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty() && v.len() <= MAX_INBOUND_LEN)
        .map(String::from)
}

#[derive(Clone)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S, B> Service<Request> for RequestIdService<S>
where
    S: Service<Request, Response = Response<B>> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Debug,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let req_id = inbound_id(&req).unwrap_or_else(|| ulid::Ulid::new().to_string());

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let span = tracing::info_span!("request", req_id = %req_id);
        let start = Instant::now();

        let future = self.inner.call(req);
        let header_value = HeaderValue::from_str(&req_id).ok();

        Box::pin(
            async move {
                let mut result = future.await;
                let duration = fmt_duration(start.elapsed());

                match &result {
                    Ok(response) => {
                        let status = response.status().as_u16();
                        match status {
                            200..=399 => {
                                tracing::debug!(%method, path, status, duration, "Response");
                            }
                            400..=499 => {
                                tracing::info!(%method, path, status, duration, "Response");
                            }
                            _ => {
                                tracing::warn!(%method, path, status, duration, "Response");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(%method, path, error = ?e, duration, "Request failed");
                    }
                }

                if let Ok(ref mut response) = result
                    && let Some(value) = header_value
                {
                    response.headers_mut().insert(REQUEST_ID, value);
                }

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn prefers_explicit_request_id() {
        let req = request(&[(RAILWAY_REQUEST_ID, "edge-1"), (REQUEST_ID, "client-1")]);
        assert_eq!(inbound_id(&req).as_deref(), Some("client-1"));
    }

    #[test]
    fn falls_back_to_edge_id_and_ignores_junk() {
        let req = request(&[(REQUEST_ID, "   "), (RAILWAY_REQUEST_ID, "edge-1")]);
        assert_eq!(inbound_id(&req).as_deref(), Some("edge-1"));

        let long = "x".repeat(MAX_INBOUND_LEN + 1);
        assert_eq!(inbound_id(&request(&[(REQUEST_ID, &long)])), None);
    }
}
