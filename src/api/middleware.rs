//! Axum middleware: one timing log line per request.

use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::routing::RouteMap;

/// Header carrying the trace id in both directions.
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// What a handler learned about the request, left in the response
/// extensions for [`request_logging`] to pick up.
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    pub trace_id: Option<String>,
    pub user: Option<String>,
    pub role: Option<String>,
    pub routes: RouteMap,
}

/// Timing log, one line per request. Also echoes the trace id header.
pub async fn request_logging(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    tracing::debug!(method = %method, path = %path, "Incoming request");

    let mut response = next.run(req).await;

    let log = response
        .extensions()
        .get::<RequestLog>()
        .cloned()
        .unwrap_or_default();

    if let Some(trace_id) = &log.trace_id {
        if let Ok(value) = HeaderValue::from_str(trace_id) {
            response.headers_mut().insert(TRACE_ID_HEADER, value);
        }
    }

    let services = serde_json::to_string(&log.routes).unwrap_or_default();
    tracing::info!(
        trace_id = log.trace_id.as_deref().unwrap_or("-"),
        user = log.user.as_deref().unwrap_or("-"),
        role = log.role.as_deref().unwrap_or("-"),
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        services = %services,
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}
