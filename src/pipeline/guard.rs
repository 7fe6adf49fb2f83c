//! Operation guard. Runs after the security gate and before any business
//! logic: requires an actor where the policy demands one and enforces the
//! pagination ceiling.

use crate::error::GateError;
use crate::security::{AccessPolicy, TraceContext};

/// A named, auditable operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: &'static str,
    pub policy: AccessPolicy,
    pub variables: serde_json::Value,
    /// Items the caller asked for (`first`/`limit`), if this is a listing.
    pub requested: Option<i64>,
}

impl Operation {
    pub fn new(name: &'static str, policy: AccessPolicy, variables: serde_json::Value) -> Self {
        Self {
            name,
            policy,
            variables,
            requested: None,
        }
    }

    pub fn paged(mut self, requested: Option<i64>) -> Self {
        self.requested = requested;
        self
    }
}

pub struct OperationGuard {
    query_limit: usize,
}

impl OperationGuard {
    pub fn new(query_limit: usize) -> Self {
        Self { query_limit }
    }

    /// Returns the effective page size (the ceiling when none was requested).
    pub fn check(&self, trace: &TraceContext, op: &Operation) -> Result<usize, GateError> {
        if op.policy.needs_actor() && trace.actor.is_none() {
            return Err(GateError::AuthRequired);
        }
        match op.requested {
            None => Ok(self.query_limit),
            Some(n) if n < 0 => Err(GateError::BadRequest(format!(
                "page size must not be negative, got {n}"
            ))),
            Some(n) if n as u64 > self.query_limit as u64 => Err(GateError::QueryLimitExceeded {
                max_limit: self.query_limit,
            }),
            Some(n) => Ok(n as usize),
        }
    }
}

/// Validate a paging offset; absent means zero.
pub fn offset(requested: Option<i64>) -> Result<usize, GateError> {
    match requested {
        None => Ok(0),
        Some(n) if n < 0 => Err(GateError::BadRequest(format!(
            "offset must not be negative, got {n}"
        ))),
        Some(n) => Ok(n as usize),
    }
}
