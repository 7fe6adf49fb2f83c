//! HTTP surface of the gateway.
//!
//! Handlers stay thin: extract the caller and payload, hand both to the
//! [`RequestPipeline`], and turn the result into JSON. All gating, routing
//! and auditing happens in the pipeline.

pub mod middleware;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::adapters::scanner::API_KEY_HEADER;
use crate::error::{GateError, Rejection};
use crate::pipeline::{
    Caller, EmailQuery, Handled, PageQuery, RequestPipeline, ScanPayload, SendEmailPayload,
};
use crate::security::api_key::SCANNER_INGRESS_PREFIX;

use self::middleware::{RequestLog, TRACE_ID_HEADER, request_logging};

/// Shared state for the gateway routes.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RequestPipeline>,
}

/// Build the gateway router.
pub fn gateway_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(SCANNER_INGRESS_PREFIX, post(scan))
        .route("/scanner/logs", get(scan_logs))
        .route("/emails", get(my_emails))
        .route("/emails/send", post(send_email))
        .route("/emails/mock/send", post(mock_send))
        .with_state(state)
        .layer(axum::middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}

/// Client address from the connection (proxy headers are not trusted),
/// credentials and any upstream trace id.
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let client_key = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let mut caller = Caller::new(client_key);
        if let Some(token) = bearer_token(&parts.headers) {
            caller = caller.with_token(token);
        }
        if let Some(key) = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            caller = caller.with_api_key(key);
        }
        if let Some(trace_id) = parts
            .headers
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            caller = caller.with_trace_id(trace_id);
        }
        Ok(caller)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

fn respond<T: Serialize>(result: Result<Handled<T>, Rejection>) -> Response {
    match result {
        Ok(handled) => {
            let actor = handled.trace.actor.as_ref();
            let log = RequestLog {
                trace_id: Some(handled.trace.trace_id.clone()),
                user: actor.map(|a| a.username.clone()),
                role: actor.map(|a| a.role.clone()),
                routes: handled.routes,
            };
            let mut response = Json(handled.body).into_response();
            response.extensions_mut().insert(log);
            response
        }
        Err(rejection) => {
            let log = RequestLog {
                trace_id: rejection.trace_id.clone(),
                ..Default::default()
            };
            let mut response = rejection.into_response();
            response.extensions_mut().insert(log);
            response
        }
    }
}

/// Malformed input never reaches the gate.
fn bad_request(err: impl std::fmt::Display) -> Response {
    respond::<()>(Err(GateError::BadRequest(err.to_string()).into()))
}

/// GET /health
async fn health(State(state): State<AppState>, caller: Caller) -> Response {
    respond(state.pipeline.health(caller).await)
}

/// POST /scanner/scan/
async fn scan(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<ScanPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e),
    };
    respond(state.pipeline.scan(caller, payload).await)
}

/// GET /scanner/logs
async fn scan_logs(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Response {
    let Query(page) = match query {
        Ok(query) => query,
        Err(e) => return bad_request(e),
    };
    respond(state.pipeline.scan_logs(caller, page).await)
}

/// GET /emails
async fn my_emails(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(e) => return bad_request(e),
    };
    respond(state.pipeline.my_emails(caller, query).await)
}

/// POST /emails/send
async fn send_email(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<SendEmailPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e),
    };
    respond(state.pipeline.send_email(caller, payload).await)
}

/// POST /emails/mock/send
async fn mock_send(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<SendEmailPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e),
    };
    respond(state.pipeline.mock_send(caller, payload).await)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;
    use crate::config::{GatewayConfig, TokenEntry};
    use crate::routing::OperatorMode;
    use crate::security::StaticTokenResolver;

    fn app() -> Router {
        let config = GatewayConfig {
            mode: OperatorMode::ForceMock,
            ingress_api_key: Some(SecretString::from("ingress-key")),
            tokens: vec![TokenEntry {
                token: "alice-token".into(),
                username: "alice".into(),
                role: "user".into(),
            }],
            ..GatewayConfig::default()
        };
        let resolver = Arc::new(StaticTokenResolver::new(&config.tokens));
        gateway_routes(AppState {
            pipeline: Arc::new(RequestPipeline::from_config(&config, resolver)),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn health_echoes_trace_header() {
        let response = app()
            .oneshot(
                Request::get("/health")
                    .header(TRACE_ID_HEADER, "upstream-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[TRACE_ID_HEADER], "upstream-42");
        let body = body_json(response).await;
        assert_eq!(body["mode"], "force_mock");
        assert_eq!(body["trace_id"], "upstream-42");
    }

    #[tokio::test]
    async fn scan_without_key_is_unauthorized() {
        let response = app()
            .oneshot(
                Request::post("/scanner/scan/")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"subject":"hi","body":"there"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let trace_header = response.headers()[TRACE_ID_HEADER].to_str().unwrap().to_string();
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid or missing API key");
        assert_eq!(body["trace_id"], trace_header);
    }

    #[tokio::test]
    async fn scan_with_key_uses_mock() {
        let response = app()
            .oneshot(
                Request::post("/scanner/scan/")
                    .header("content-type", "application/json")
                    .header("X-API-KEY", "ingress-key")
                    .body(Body::from(r#"{"subject":"hi","body":"there"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let trace_header = response.headers()[TRACE_ID_HEADER].to_str().unwrap().to_string();
        let body = body_json(response).await;
        assert_eq!(body["used"], "mock");
        assert_eq!(body["trace_id"], trace_header);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let response = app()
            .oneshot(
                Request::post("/emails/send")
                    .header("content-type", "application/json")
                    .header(AUTHORIZATION, "Bearer alice-token")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn listing_over_limit_reports_max_limit() {
        let response = app()
            .oneshot(
                Request::get("/emails?first=1000")
                    .header(AUTHORIZATION, "Bearer alice-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "QUERY_LIMIT_EXCEEDED");
        assert_eq!(body["max_limit"], 50);
    }
}
