//! Audit sink: append-only record of every gated operation.
//!
//! Writes are awaited inline so an entry exists before the response leaves,
//! but a failed write never fails the request: it is logged at `error` and
//! dropped.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::StoreError;
use crate::routing::RouteMap;
use crate::security::TraceContext;

/// String values longer than this are truncated in the payload summary.
const MAX_SUMMARY_STRING: usize = 256;

/// How an audited operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum AuditOutcome {
    Ok,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub trace_id: String,
    /// Username of the caller; `None` for unauthenticated ingress.
    pub actor: Option<String>,
    pub operation: String,
    pub variables: serde_json::Value,
    pub routes: RouteMap,
    pub outcome: AuditOutcome,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError>;

    async fn entries(&self) -> Result<Vec<AuditEntry>, StoreError>;
}

/// In-process audit log.
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self.entries.read().await.clone())
    }
}

/// One audit write, before it is stamped.
pub struct AuditRecord<'a> {
    pub trace: &'a TraceContext,
    pub operation: &'a str,
    pub variables: serde_json::Value,
    pub routes: RouteMap,
    pub outcome: AuditOutcome,
    pub latency_ms: u64,
}

pub struct AuditSink {
    store: Arc<dyn AuditStore>,
}

impl AuditSink {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Append an entry. Never fails the caller.
    pub async fn record(&self, record: AuditRecord<'_>) {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            trace_id: record.trace.trace_id.clone(),
            actor: record.trace.actor.as_ref().map(|a| a.username.clone()),
            operation: record.operation.to_string(),
            variables: summarize(record.variables),
            routes: record.routes,
            outcome: record.outcome,
            latency_ms: record.latency_ms,
            created_at: Utc::now(),
        };
        let trace_id = entry.trace_id.clone();
        let operation = entry.operation.clone();

        match self.store.append(entry).await {
            Ok(()) => debug!(trace_id = %trace_id, operation = %operation, "Audit entry recorded"),
            Err(e) => error!(
                trace_id = %trace_id,
                operation = %operation,
                error = %e,
                "Failed to write audit entry; dropping it"
            ),
        }
    }
}

/// Truncate long strings so bodies do not end up verbatim in the audit log.
fn summarize(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) if s.chars().count() > MAX_SUMMARY_STRING => {
            let mut cut: String = s.chars().take(MAX_SUMMARY_STRING).collect();
            cut.push('…');
            Value::String(cut)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(summarize).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, summarize(v))).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Actor;

    struct BrokenStore;

    #[async_trait]
    impl AuditStore for BrokenStore {
        async fn append(&self, _entry: AuditEntry) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
        async fn entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn trace(actor: Option<Actor>) -> TraceContext {
        TraceContext {
            trace_id: "trace-1".into(),
            actor,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_trace_and_actor() {
        let store = Arc::new(InMemoryAuditStore::new());
        let sink = AuditSink::new(store.clone());
        let trace = trace(Some(Actor::new("alice", "user")));

        sink.record(AuditRecord {
            trace: &trace,
            operation: "send_email",
            variables: serde_json::json!({"to": "bob@example.com"}),
            routes: RouteMap::default(),
            outcome: AuditOutcome::Ok,
            latency_ms: 3,
        })
        .await;

        let entries = store.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trace_id, "trace-1");
        assert_eq!(entries[0].actor.as_deref(), Some("alice"));
        assert_eq!(entries[0].operation, "send_email");
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let sink = AuditSink::new(Arc::new(BrokenStore));
        let trace = trace(None);
        sink.record(AuditRecord {
            trace: &trace,
            operation: "scan",
            variables: serde_json::Value::Null,
            routes: RouteMap::default(),
            outcome: AuditOutcome::Ok,
            latency_ms: 0,
        })
        .await;
    }

    #[test]
    fn long_strings_are_truncated() {
        let long = "x".repeat(1000);
        let summary = summarize(serde_json::json!({"body": long, "n": 5}));
        let body = summary["body"].as_str().unwrap();
        assert_eq!(body.chars().count(), MAX_SUMMARY_STRING + 1);
        assert_eq!(summary["n"], 5);
    }
}
