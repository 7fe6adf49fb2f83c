//! Request/response shapes for the pipeline operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::SendOutcome;
use crate::routing::{HealthRecord, OperatorMode, Route, RouteMap};
use crate::security::{AccessPolicy, InboundRequest, TraceContext};
use crate::store::{EmailRecord, ScanRecord};

/// Who is calling, as seen by the transport.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub client_key: String,
    pub trace_id: Option<String>,
    pub bearer_token: Option<String>,
    pub api_key: Option<String>,
}

impl Caller {
    pub fn new(client_key: impl Into<String>) -> Self {
        Self {
            client_key: client_key.into(),
            ..Default::default()
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

    pub(crate) fn into_request(self, policy: AccessPolicy) -> InboundRequest {
        InboundRequest {
            client_key: self.client_key,
            trace_id: self.trace_id,
            bearer_token: self.bearer_token,
            api_key: self.api_key,
            policy,
        }
    }
}

/// Result of an admitted operation plus what the transport needs to log it.
#[derive(Debug)]
pub struct Handled<T> {
    pub trace: TraceContext,
    pub routes: RouteMap,
    pub body: T,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub mode: OperatorMode,
    pub services: Vec<HealthRecord>,
    pub trace_id: String,
}

// ── Scan ingress ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanPayload {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, rename = "from")]
    pub sender: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResponse {
    pub id: Uuid,
    /// `"safe"` or `"malicious"`.
    pub result: String,
    pub confidence: f64,
    pub used: Route,
    pub trace_id: String,
}

// ── Send ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendEmailPayload {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub result: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendEmailResponse {
    pub email: EmailRecord,
    pub scan: ScanSummary,
    pub delivery: SendOutcome,
    /// Route that delivered the message.
    pub used: Route,
    /// Every route used while handling the request.
    pub routes: RouteMap,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MockSendResponse {
    #[serde(flatten)]
    pub outcome: SendOutcome,
    pub used: Route,
    pub trace_id: String,
}

// ── Queries ─────────────────────────────────────────────────────────────

/// Paging arguments. `first` and `limit` are synonyms; `first` wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub first: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    pub fn requested(&self) -> Option<i64> {
        self.first.or(self.limit)
    }
}

/// Query string of the mailbox listing. Kept flat so it decodes from a URL
/// query as-is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailQuery {
    pub folder: Option<String>,
    pub first: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl EmailQuery {
    pub fn page(&self) -> PageQuery {
        PageQuery {
            first: self.first,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailPage {
    pub emails: Vec<EmailRecord>,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanLogPage {
    pub logs: Vec<ScanRecord>,
    pub trace_id: String,
}
