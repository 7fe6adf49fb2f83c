//! Security gate: trace id, rate limit, ingress key, authentication and role
//! checks, applied in a fixed order before any routing happens.
//!
//! Each check is a [`Stage`]. A stage either lets the request through (possibly
//! enriching the context) or rejects it; the first rejection wins.

pub mod api_key;
pub mod identity;
pub mod rate_limit;

pub use api_key::ApiKeyGate;
pub use identity::{ADMIN_ROLE, Actor, IdentityResolver, StaticTokenResolver};
pub use rate_limit::RateLimiter;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{GateError, Rejection};

/// Longest inbound trace id accepted for reuse.
const MAX_TRACE_ID_LEN: usize = 128;

/// What a route demands of its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPolicy {
    /// No actor needed (health).
    Public,
    /// Machine-to-machine caller presenting the ingress key. No actor.
    ApiKey,
    /// Any authenticated actor.
    Authenticated,
    /// An authenticated actor whose role matches exactly.
    Role(String),
}

impl AccessPolicy {
    pub fn needs_actor(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Role(_))
    }
}

/// Transport-neutral view of an inbound request, as far as the gate cares.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Rate-limit key, normally the client IP.
    pub client_key: String,
    /// Trace id supplied by an upstream hop, if any.
    pub trace_id: Option<String>,
    pub bearer_token: Option<String>,
    /// Value of the `X-API-KEY` header.
    pub api_key: Option<String>,
    pub policy: AccessPolicy,
}

impl InboundRequest {
    pub fn new(client_key: impl Into<String>, policy: AccessPolicy) -> Self {
        Self {
            client_key: client_key.into(),
            trace_id: None,
            bearer_token: None,
            api_key: None,
            policy,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Per-request identity and correlation. Created once by the gate, read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub actor: Option<Actor>,
    pub created_at: DateTime<Utc>,
}

/// Mutable state threaded through the stages.
#[derive(Debug)]
pub struct GateContext {
    pub request: InboundRequest,
    pub trace_id: Option<String>,
    pub actor: Option<Actor>,
    pub created_at: DateTime<Utc>,
}

impl GateContext {
    fn new(request: InboundRequest) -> Self {
        Self {
            request,
            trace_id: None,
            actor: None,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, ctx: &mut GateContext) -> Result<(), GateError>;
}

/// Mint a new opaque trace id.
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn is_reusable_trace_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_TRACE_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Reuse the inbound trace id when it is well-formed, otherwise mint one.
pub struct TraceStage;

#[async_trait]
impl Stage for TraceStage {
    fn name(&self) -> &'static str {
        "trace"
    }

    async fn apply(&self, ctx: &mut GateContext) -> Result<(), GateError> {
        if ctx.trace_id.is_some() {
            return Ok(());
        }
        let trace_id = match ctx.request.trace_id.as_deref() {
            Some(id) if is_reusable_trace_id(id) => id.to_string(),
            _ => new_trace_id(),
        };
        ctx.trace_id = Some(trace_id);
        Ok(())
    }
}

/// Per-client sliding window.
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn apply(&self, ctx: &mut GateContext) -> Result<(), GateError> {
        self.limiter.check(&ctx.request.client_key)
    }
}

/// Shared-secret check for key-gated routes. Runs after the rate limit so
/// wrong keys still count against the client.
pub struct ApiKeyStage {
    keys: Arc<ApiKeyGate>,
}

impl ApiKeyStage {
    pub fn new(keys: Arc<ApiKeyGate>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl Stage for ApiKeyStage {
    fn name(&self) -> &'static str {
        "api_key"
    }

    async fn apply(&self, ctx: &mut GateContext) -> Result<(), GateError> {
        if ctx.request.policy != AccessPolicy::ApiKey {
            return Ok(());
        }
        self.keys.verify(ctx.request.api_key.as_deref())
    }
}

/// Resolve the actor; required for authenticated and role-gated routes.
pub struct AuthStage {
    resolver: Arc<dyn IdentityResolver>,
}

impl AuthStage {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Stage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn apply(&self, ctx: &mut GateContext) -> Result<(), GateError> {
        if !ctx.request.policy.needs_actor() {
            return Ok(());
        }
        let token = ctx.request.bearer_token.as_deref();
        let actor = match token {
            Some(token) => self.resolver.resolve(token).await,
            None => None,
        };
        match actor {
            Some(actor) => {
                ctx.actor = Some(actor);
                Ok(())
            }
            None => Err(GateError::AuthRequired),
        }
    }
}

/// Exact role match for role-gated routes.
pub struct RoleStage;

#[async_trait]
impl Stage for RoleStage {
    fn name(&self) -> &'static str {
        "role"
    }

    async fn apply(&self, ctx: &mut GateContext) -> Result<(), GateError> {
        let AccessPolicy::Role(required) = &ctx.request.policy else {
            return Ok(());
        };
        match &ctx.actor {
            Some(actor) if &actor.role == required => Ok(()),
            Some(_) => Err(GateError::PermissionDenied),
            None => Err(GateError::AuthRequired),
        }
    }
}

/// Ordered stage pipeline: trace → rate → api key → auth → role.
pub struct SecurityGate {
    stages: Vec<Arc<dyn Stage>>,
}

impl SecurityGate {
    /// Gate with the standard stage order.
    pub fn new(
        limiter: Arc<RateLimiter>,
        ingress_keys: Arc<ApiKeyGate>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self::with_stages(vec![
            Arc::new(TraceStage),
            Arc::new(RateLimitStage::new(limiter)),
            Arc::new(ApiKeyStage::new(ingress_keys)),
            Arc::new(AuthStage::new(resolver)),
            Arc::new(RoleStage),
        ])
    }

    pub fn with_stages(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order. The rejection carries the trace id whenever
    /// the trace stage has already run.
    pub async fn admit(&self, request: InboundRequest) -> Result<TraceContext, Rejection> {
        let mut ctx = GateContext::new(request);

        for stage in &self.stages {
            if let Err(error) = stage.apply(&mut ctx).await {
                debug!(
                    stage = stage.name(),
                    trace_id = ?ctx.trace_id,
                    client = %ctx.request.client_key,
                    error = %error,
                    "Request rejected"
                );
                return Err(Rejection::new(error, ctx.trace_id));
            }
        }

        let trace_id = ctx.trace_id.unwrap_or_else(new_trace_id);
        Ok(TraceContext {
            trace_id,
            actor: ctx.actor,
            created_at: ctx.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::config::RateLimitConfig;

    fn gate(max_requests: usize) -> (SecurityGate, Arc<RateLimiter>) {
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
            max_requests,
            ..RateLimitConfig::default()
        }));
        let resolver = StaticTokenResolver::default()
            .with_token("user-token", Actor::new("bob", "user"))
            .with_token("admin-token", Actor::new("alice", ADMIN_ROLE));
        (
            SecurityGate::new(
                Arc::clone(&limiter),
                Arc::new(ApiKeyGate::new(Some(SecretString::from("ingress-key")))),
                Arc::new(resolver),
            ),
            limiter,
        )
    }

    #[test]
    fn stage_order_is_fixed() {
        let (gate, _) = gate(60);
        assert_eq!(gate.stage_names(), vec!["trace", "rate_limit", "api_key", "auth", "role"]);
    }

    #[tokio::test]
    async fn mints_trace_id_when_absent() {
        let (gate, _) = gate(60);
        let trace = gate
            .admit(InboundRequest::new("1.1.1.1", AccessPolicy::Public))
            .await
            .unwrap();
        assert_eq!(trace.trace_id.len(), 32);
        assert!(trace.actor.is_none());
    }

    #[tokio::test]
    async fn reuses_inbound_trace_id() {
        let (gate, _) = gate(60);
        let trace = gate
            .admit(InboundRequest::new("1.1.1.1", AccessPolicy::Public).with_trace_id("abc-123"))
            .await
            .unwrap();
        assert_eq!(trace.trace_id, "abc-123");
    }

    #[tokio::test]
    async fn malformed_inbound_trace_id_is_replaced() {
        let (gate, _) = gate(60);
        let trace = gate
            .admit(InboundRequest::new("1.1.1.1", AccessPolicy::Public).with_trace_id("bad id\n"))
            .await
            .unwrap();
        assert_ne!(trace.trace_id, "bad id\n");
    }

    #[tokio::test]
    async fn unauthenticated_is_rejected_but_counted() {
        let (gate, limiter) = gate(60);
        let err = gate
            .admit(InboundRequest::new("2.2.2.2", AccessPolicy::Role(ADMIN_ROLE.into())))
            .await
            .unwrap_err();
        assert_eq!(err.error, GateError::AuthRequired);
        assert!(err.trace_id.is_some());
        assert_eq!(limiter.current("2.2.2.2"), 1);
    }

    #[tokio::test]
    async fn unknown_token_is_unauthenticated() {
        let (gate, _) = gate(60);
        let err = gate
            .admit(
                InboundRequest::new("2.2.2.2", AccessPolicy::Authenticated).with_token("forged"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error, GateError::AuthRequired);
    }

    #[tokio::test]
    async fn wrong_role_is_forbidden() {
        let (gate, _) = gate(60);
        let err = gate
            .admit(
                InboundRequest::new("3.3.3.3", AccessPolicy::Role(ADMIN_ROLE.into()))
                    .with_token("user-token"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error, GateError::PermissionDenied);
    }

    #[tokio::test]
    async fn matching_role_is_admitted_with_actor() {
        let (gate, _) = gate(60);
        let trace = gate
            .admit(
                InboundRequest::new("3.3.3.3", AccessPolicy::Role(ADMIN_ROLE.into()))
                    .with_token("admin-token"),
            )
            .await
            .unwrap();
        assert_eq!(trace.actor.unwrap().username, "alice");
    }

    #[tokio::test]
    async fn rate_limit_checked_before_auth() {
        let (gate, _) = gate(1);
        let req = InboundRequest::new("4.4.4.4", AccessPolicy::Authenticated);
        assert_eq!(
            gate.admit(req.clone()).await.unwrap_err().error,
            GateError::AuthRequired
        );
        // Window is full now, so the rate limit answers first.
        assert_eq!(
            gate.admit(req).await.unwrap_err().error,
            GateError::RateLimitExceeded
        );
    }

    #[tokio::test]
    async fn wrong_ingress_key_is_counted_and_traced() {
        let (gate, limiter) = gate(60);
        let err = gate
            .admit(InboundRequest::new("5.5.5.5", AccessPolicy::ApiKey).with_api_key("guess"))
            .await
            .unwrap_err();
        assert_eq!(err.error, GateError::InvalidApiKey);
        assert!(err.trace_id.is_some());
        assert_eq!(limiter.current("5.5.5.5"), 1);
    }

    #[tokio::test]
    async fn key_guessing_runs_into_rate_limit() {
        let (gate, _) = gate(3);
        for _ in 0..3 {
            let err = gate
                .admit(InboundRequest::new("6.6.6.6", AccessPolicy::ApiKey).with_api_key("guess"))
                .await
                .unwrap_err();
            assert_eq!(err.error, GateError::InvalidApiKey);
        }
        // Even the right key is refused once the window is full.
        let err = gate
            .admit(InboundRequest::new("6.6.6.6", AccessPolicy::ApiKey).with_api_key("ingress-key"))
            .await
            .unwrap_err();
        assert_eq!(err.error, GateError::RateLimitExceeded);
    }

    #[tokio::test]
    async fn ingress_key_admits_without_actor() {
        let (gate, _) = gate(60);
        let trace = gate
            .admit(
                InboundRequest::new("7.7.7.7", AccessPolicy::ApiKey).with_api_key("ingress-key"),
            )
            .await
            .unwrap();
        assert!(trace.actor.is_none());
    }

    #[tokio::test]
    async fn ingress_key_is_not_checked_on_other_routes() {
        let (gate, _) = gate(60);
        assert!(
            gate.admit(InboundRequest::new("7.7.7.7", AccessPolicy::Public))
                .await
                .is_ok()
        );
    }
}
