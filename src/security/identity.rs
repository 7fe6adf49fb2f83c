//! Identity collaborator: resolves a bearer token to an actor.
//!
//! Token issuance and validation live outside the gateway; the gate only asks
//! "who is this?" and trusts the answer.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::TokenEntry;

/// Role granting access to admin-only operations.
pub const ADMIN_ROLE: &str = "admin";

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub username: String,
    pub role: String,
}

impl Actor {
    pub fn new(username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: role.into(),
        }
    }
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// The actor behind `token`, or `None` if the token is not valid.
    async fn resolve(&self, token: &str) -> Option<Actor>;
}

/// Fixed token table, loaded from configuration.
#[derive(Debug, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, Actor>,
}

impl StaticTokenResolver {
    pub fn new(entries: &[TokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|e| (e.token.clone(), Actor::new(&e.username, &e.role)))
            .collect();
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, actor: Actor) -> Self {
        self.tokens.insert(token.into(), actor);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Option<Actor> {
        self.tokens.get(token).cloned()
    }
}
