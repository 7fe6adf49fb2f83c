//! Shared-secret check for the machine-to-machine scanner ingress.
//!
//! The secret is captured when the gate is built. Later changes to the
//! environment do not affect an existing gate.

use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::error::GateError;

/// Route of the scanner ingress.
pub const SCANNER_INGRESS_PREFIX: &str = "/scanner/scan/";

/// Environment variable holding the ingress secret.
pub const SCANNER_API_KEY_ENV: &str = "SCANNER_API_KEY";

pub struct ApiKeyGate {
    secret: Option<SecretString>,
}

impl ApiKeyGate {
    pub fn new(secret: Option<SecretString>) -> Self {
        if secret.is_none() {
            warn!(
                var = SCANNER_API_KEY_ENV,
                "No ingress API key configured; scanner ingress will reject every request"
            );
        }
        Self { secret }
    }

    /// Check the key a caller presented. Without a configured secret
    /// nothing matches.
    pub fn verify(&self, provided: Option<&str>) -> Result<(), GateError> {
        match (&self.secret, provided) {
            (Some(secret), Some(provided)) if secret.expose_secret() == provided => Ok(()),
            _ => Err(GateError::InvalidApiKey),
        }
    }
}
