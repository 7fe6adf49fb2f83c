//! Request pipeline.
//!
//! Every gated operation flows through:
//! 1. `SecurityGate::admit()`: trace id, rate limit, ingress key, auth, role
//! 2. `OperationGuard::check()`: actor presence and the pagination ceiling
//! 3. `ServiceRouter::route()` then the adapter call, real or mock with fallback
//! 4. Record persistence and domain events
//! 5. One audit entry, written before the response is handed back
//!
//! Rejections from steps 1 and 2 are returned before any business logic runs
//! and are not audited.

pub mod guard;
pub mod types;

pub use guard::{Operation, OperationGuard};
pub use types::{
    Caller, EmailPage, EmailQuery, Handled, HealthReport, MockSendResponse, PageQuery,
    ScanLogPage, ScanPayload, ScanResponse, ScanSummary, SendEmailPayload, SendEmailResponse,
};

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{error, info};

use crate::adapters::{
    MailAdapter, Routed, ScanAdapter, ScanOutcome, ScanRequest, SendRequest, mail_adapter,
    scan_adapter,
};
use crate::audit::{AuditOutcome, AuditRecord, AuditSink, AuditStore, InMemoryAuditStore};
use crate::config::GatewayConfig;
use crate::error::{GateError, Rejection, StoreError};
use crate::events::{DomainEvent, EventBus};
use crate::routing::{
    Dependency, Endpoints, HealthProbe, HttpLivenessCheck, Route, RouteMap, ServiceRouter,
};
use crate::security::{
    ADMIN_ROLE, AccessPolicy, ApiKeyGate, IdentityResolver, RateLimiter, SecurityGate,
    TraceContext,
};
use crate::store::{EmailRecord, Folder, InMemoryRecordStore, RecordStore, ScanRecord};

/// Everything the pipeline is assembled from. Fields are public so callers
/// (and tests) can swap a single collaborator after `from_config`.
pub struct PipelineParts {
    pub gate: SecurityGate,
    pub limiter: Arc<RateLimiter>,
    pub router: ServiceRouter,
    pub mail: MailAdapter,
    pub scanner: ScanAdapter,
    pub records: Arc<dyn RecordStore>,
    pub audit: Arc<dyn AuditStore>,
    pub events: Arc<EventBus>,
    pub query_limit: usize,
}

impl PipelineParts {
    /// Standard wiring: HTTP adapters and probe, in-memory stores.
    pub fn from_config(config: &GatewayConfig, resolver: Arc<dyn IdentityResolver>) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let probe = Arc::new(HealthProbe::new(
            Arc::new(HttpLivenessCheck::new(config.health.probe_timeout)),
            config.health.check_interval,
        ));
        let endpoints = Endpoints {
            mail: config.mailserver_url.clone(),
            scanner: config.scanner_url.clone(),
        };

        Self {
            gate: SecurityGate::new(
                Arc::clone(&limiter),
                Arc::new(ApiKeyGate::new(config.ingress_api_key.clone())),
                resolver,
            ),
            limiter,
            router: ServiceRouter::new(config.mode, probe, endpoints),
            mail: mail_adapter(config.mailserver_url.clone(), config.adapter_timeout),
            scanner: scan_adapter(
                config.scanner_url.clone(),
                config.scanner_api_key.clone(),
                config.adapter_timeout,
            ),
            records: Arc::new(InMemoryRecordStore::new()),
            audit: Arc::new(InMemoryAuditStore::new()),
            events: Arc::new(EventBus::new()),
            query_limit: config.query_limit,
        }
    }
}

pub struct RequestPipeline {
    gate: SecurityGate,
    limiter: Arc<RateLimiter>,
    router: ServiceRouter,
    mail: MailAdapter,
    scanner: ScanAdapter,
    records: Arc<dyn RecordStore>,
    audit: AuditSink,
    events: Arc<EventBus>,
    guard: OperationGuard,
}

impl RequestPipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            gate: parts.gate,
            limiter: parts.limiter,
            router: parts.router,
            mail: parts.mail,
            scanner: parts.scanner,
            records: parts.records,
            audit: AuditSink::new(parts.audit),
            events: parts.events,
            guard: OperationGuard::new(parts.query_limit),
        }
    }

    pub fn from_config(config: &GatewayConfig, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self::new(PipelineParts::from_config(config, resolver))
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn router(&self) -> &ServiceRouter {
        &self.router
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn audit_store(&self) -> &Arc<dyn AuditStore> {
        self.audit.store()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    // ── Operations ──────────────────────────────────────────────────────

    /// Liveness plus the current health memory. Public and not audited.
    pub async fn health(&self, caller: Caller) -> Result<Handled<HealthReport>, Rejection> {
        let trace = self.gate.admit(caller.into_request(AccessPolicy::Public)).await?;
        let body = HealthReport {
            status: "ok",
            mode: self.router.mode(),
            services: self.router.probe().snapshot().await,
            trace_id: trace.trace_id.clone(),
        };
        Ok(Handled {
            trace,
            routes: RouteMap::default(),
            body,
        })
    }

    /// Machine-to-machine scan ingress, gated by the shared ingress key.
    pub async fn scan(
        &self,
        caller: Caller,
        payload: ScanPayload,
    ) -> Result<Handled<ScanResponse>, Rejection> {
        let started = Instant::now();
        let op = Operation::new(
            "scan",
            AccessPolicy::ApiKey,
            json!({ "subject": payload.subject, "from": payload.sender }),
        );
        let (trace, _) = self.admit(caller, &op).await?;
        let mut routes = RouteMap::default();

        let request = ScanRequest::new(payload.subject, payload.body);
        let scanned = self.route_scan(&request, &mut routes).await;
        let record = ScanRecord::new(request.subject.as_str(), &scanned.outcome, scanned.used)
            .with_owner(trace.actor.as_ref().map(|a| a.username.clone()))
            .with_sender(payload.sender);

        let result = self.persist_scan(&trace, &record).await.map(|()| ScanResponse {
            id: record.id,
            result: record.result.clone(),
            confidence: record.confidence,
            used: record.used,
            trace_id: trace.trace_id.clone(),
        });
        self.finish(trace, op, routes, started, result).await
    }

    /// Send as the authenticated actor: deliver, file under `sent`, scan the
    /// content and log the verdict against the new email.
    pub async fn send_email(
        &self,
        caller: Caller,
        payload: SendEmailPayload,
    ) -> Result<Handled<SendEmailResponse>, Rejection> {
        let started = Instant::now();
        let op = Operation::new(
            "send_email",
            AccessPolicy::Authenticated,
            json!({ "to": payload.to, "subject": payload.subject, "body": payload.body }),
        );
        let (trace, _) = self.admit(caller, &op).await?;
        let Some(actor) = trace.actor.clone() else {
            return Err(reject(&trace, GateError::AuthRequired));
        };
        if payload.to.trim().is_empty() {
            return Err(reject(
                &trace,
                GateError::BadRequest("recipient `to` is required".into()),
            ));
        }

        let mut routes = RouteMap::default();
        let request = SendRequest {
            to: payload.to,
            subject: payload.subject,
            body: payload.body,
        };
        let decision = self.router.route(Dependency::Mail).await;
        let delivered = self.mail.call(decision.chosen, &request).await;
        routes.set(Dependency::Mail, delivered.used);

        let email = EmailRecord::outgoing(
            actor.username.as_str(),
            request.to.as_str(),
            request.subject.as_str(),
            request.body.as_str(),
        );

        let result = async {
            self.records.insert_email(&email).await?;
            self.events.publish(DomainEvent::EmailCreated {
                email_id: email.id,
                owner: email.owner.clone(),
                trace_id: trace.trace_id.clone(),
            });

            let scan_request = ScanRequest::new(request.subject.as_str(), request.body.as_str());
            let scanned = self.route_scan(&scan_request, &mut routes).await;
            let scan = ScanRecord::new(email.subject.as_str(), &scanned.outcome, scanned.used)
                .for_email(&email);
            self.persist_scan(&trace, &scan).await?;

            info!(
                trace_id = %trace.trace_id,
                email_id = %email.id,
                verdict = %scan.result,
                mail = %delivered.used,
                scanner = %scan.used,
                "Email sent"
            );

            Ok::<_, StoreError>(SendEmailResponse {
                email: email.clone(),
                scan: ScanSummary {
                    result: scan.result,
                    confidence: scan.confidence,
                },
                delivery: delivered.outcome.clone(),
                used: delivered.used,
                routes,
                trace_id: trace.trace_id.clone(),
            })
        }
        .await
        // Delivery already happened; a retry would send the mail twice.
        .map_err(|e| {
            StoreError::Unavailable(format!(
                "{e} (mail already delivered via {}, status {})",
                delivered.used, delivered.outcome.status
            ))
        });

        self.finish(trace, op, routes, started, result).await
    }

    /// The actor's own emails in one folder, newest first.
    pub async fn my_emails(
        &self,
        caller: Caller,
        query: EmailQuery,
    ) -> Result<Handled<EmailPage>, Rejection> {
        let started = Instant::now();
        let page = query.page();
        let requested = page.requested();
        let op = Operation::new(
            "my_emails",
            AccessPolicy::Authenticated,
            json!({ "folder": query.folder, "first": requested, "offset": page.offset }),
        )
        .paged(requested);
        let (trace, limit) = self.admit(caller, &op).await?;
        let Some(actor) = trace.actor.clone() else {
            return Err(reject(&trace, GateError::AuthRequired));
        };
        let folder = match query.folder.as_deref() {
            None => Folder::Inbox,
            Some(raw) => raw
                .parse::<Folder>()
                .map_err(|e| reject(&trace, GateError::BadRequest(e)))?,
        };
        let offset = guard::offset(page.offset).map_err(|e| reject(&trace, e))?;

        let result = self
            .records
            .emails_for(&actor.username, folder, limit, offset)
            .await
            .map(|emails| EmailPage {
                emails,
                trace_id: trace.trace_id.clone(),
            });
        self.finish(trace, op, RouteMap::default(), started, result).await
    }

    /// Most recent scan verdicts across all users. Admin only.
    pub async fn scan_logs(
        &self,
        caller: Caller,
        page: PageQuery,
    ) -> Result<Handled<ScanLogPage>, Rejection> {
        let started = Instant::now();
        let requested = page.requested();
        let op = Operation::new(
            "scan_logs",
            AccessPolicy::Role(ADMIN_ROLE.to_string()),
            json!({ "first": requested }),
        )
        .paged(requested);
        let (trace, limit) = self.admit(caller, &op).await?;

        let result = self.records.recent_scans(limit).await.map(|logs| ScanLogPage {
            logs,
            trace_id: trace.trace_id.clone(),
        });
        self.finish(trace, op, RouteMap::default(), started, result).await
    }

    /// Exercise the mock mailer directly. Admin only; never touches the
    /// real mail server and creates no records.
    pub async fn mock_send(
        &self,
        caller: Caller,
        payload: SendEmailPayload,
    ) -> Result<Handled<MockSendResponse>, Rejection> {
        let started = Instant::now();
        let op = Operation::new(
            "mock_send",
            AccessPolicy::Role(ADMIN_ROLE.to_string()),
            json!({ "to": payload.to, "subject": payload.subject }),
        );
        let (trace, _) = self.admit(caller, &op).await?;

        let request = SendRequest {
            to: payload.to,
            subject: payload.subject,
            body: payload.body,
        };
        let delivered = self.mail.call(Route::Mock, &request).await;
        let mut routes = RouteMap::default();
        routes.set(Dependency::Mail, delivered.used);

        let result = Ok(MockSendResponse {
            outcome: delivered.outcome,
            used: delivered.used,
            trace_id: trace.trace_id.clone(),
        });
        self.finish(trace, op, routes, started, result).await
    }

    // ── Steps ───────────────────────────────────────────────────────────

    async fn admit(
        &self,
        caller: Caller,
        op: &Operation,
    ) -> Result<(TraceContext, usize), Rejection> {
        let trace = self.gate.admit(caller.into_request(op.policy.clone())).await?;
        let limit = self.guard.check(&trace, op).map_err(|e| reject(&trace, e))?;
        Ok((trace, limit))
    }

    async fn route_scan(&self, request: &ScanRequest, routes: &mut RouteMap) -> Routed<ScanOutcome> {
        let decision = self.router.route(Dependency::Scanner).await;
        let scanned = self.scanner.call(decision.chosen, request).await;
        routes.set(Dependency::Scanner, scanned.used);
        scanned
    }

    async fn persist_scan(&self, trace: &TraceContext, scan: &ScanRecord) -> Result<(), StoreError> {
        self.records.insert_scan(scan).await?;
        self.events.publish(DomainEvent::ScanLogged {
            scan_id: scan.id,
            email_id: scan.email_id,
            result: scan.result.clone(),
            trace_id: trace.trace_id.clone(),
        });
        Ok(())
    }

    /// Audit, then hand back the body or map a store failure to a 503.
    async fn finish<T>(
        &self,
        trace: TraceContext,
        op: Operation,
        routes: RouteMap,
        started: Instant,
        result: Result<T, StoreError>,
    ) -> Result<Handled<T>, Rejection> {
        let outcome = match &result {
            Ok(_) => AuditOutcome::Ok,
            Err(e) => AuditOutcome::Failed(e.to_string()),
        };
        self.audit
            .record(AuditRecord {
                trace: &trace,
                operation: op.name,
                variables: op.variables,
                routes,
                outcome,
                latency_ms: started.elapsed().as_millis() as u64,
            })
            .await;

        match result {
            Ok(body) => Ok(Handled {
                trace,
                routes,
                body,
            }),
            Err(e) => {
                error!(
                    trace_id = %trace.trace_id,
                    operation = op.name,
                    error = %e,
                    "Record store failed"
                );
                Err(reject(&trace, GateError::StoreUnavailable))
            }
        }
    }
}

fn reject(trace: &TraceContext, error: GateError) -> Rejection {
    Rejection::new(error, Some(trace.trace_id.clone()))
}
