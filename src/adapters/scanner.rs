//! Scanner adapter: the remote ML scanner and its keyword-heuristic mock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{RealBackend, ServiceAdapter, Substitute};
use crate::error::DependencyError;
use crate::routing::Dependency;

/// Header carrying the scanner API key, both outbound and on ingress.
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Content submitted for scanning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

impl ScanRequest {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Scanner verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub malicious: bool,
    pub confidence: f64,
}

impl ScanOutcome {
    /// `"malicious"` or `"safe"`.
    pub fn verdict(&self) -> &'static str {
        if self.malicious { "malicious" } else { "safe" }
    }
}

pub type ScanAdapter = ServiceAdapter<ScanRequest, ScanOutcome>;

/// Build the scanner adapter; `None` for `url` yields a mock-only adapter.
pub fn scan_adapter(
    url: Option<String>,
    api_key: Option<SecretString>,
    timeout: Duration,
) -> ScanAdapter {
    let real = url.map(|url| {
        Arc::new(HttpScanner::new(url, api_key, timeout))
            as Arc<dyn RealBackend<ScanRequest, ScanOutcome>>
    });
    ServiceAdapter::new(Dependency::Scanner, real, Arc::new(MockScanner::new()))
}

// ── Real ────────────────────────────────────────────────────────────────

/// `POST {url}` with `{subject, body}` and the API key header.
pub struct HttpScanner {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpScanner {
    pub fn new(url: String, api_key: Option<SecretString>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl RealBackend<ScanRequest, ScanOutcome> for HttpScanner {
    async fn call(&self, request: &ScanRequest) -> Result<ScanOutcome, DependencyError> {
        let classify =
            |e: reqwest::Error| DependencyError::from_reqwest(Dependency::Scanner, self.timeout, e);

        let mut builder = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, key.expose_secret());
        }

        let outcome: ScanOutcome = builder
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)?
            .json()
            .await
            .map_err(classify)?;

        if !(0.0..=1.0).contains(&outcome.confidence) {
            return Err(DependencyError::InvalidResponse {
                dependency: Dependency::Scanner,
                reason: format!("confidence {} outside [0, 1]", outcome.confidence),
            });
        }
        Ok(outcome)
    }
}

// ── Mock ────────────────────────────────────────────────────────────────

/// Deterministic keyword heuristic standing in for the ML model.
///
/// Each distinct pattern hit raises confidence that the message is malicious;
/// no hits yields a fixed "safe" confidence.
pub struct MockScanner {
    patterns: Vec<Regex>,
}

const SAFE_CONFIDENCE: f64 = 0.9;

impl MockScanner {
    pub fn new() -> Self {
        let sources = [
            r"(?i)\b(verify|confirm|update) (your )?(account|password|identity)\b",
            r"(?i)\bpassword\b",
            r"(?i)\b(urgent|immediately|act now|final notice)\b",
            r"(?i)\bclick (here|the link|below)\b",
            r"(?i)\b(wire transfer|bitcoin|gift card|crypto wallet)\b",
            r"(?i)\b(lottery|you have won|prize|inheritance)\b",
            r"(?i)\baccount (has been )?(suspended|locked|disabled)\b",
            r"(?i)\.(exe|scr|js|vbs|bat)\b",
        ];
        let patterns = sources
            .iter()
            .filter_map(|src| Regex::new(src).ok())
            .collect();
        Self { patterns }
    }

    fn score(&self, text: &str) -> usize {
        self.patterns.iter().filter(|re| re.is_match(text)).count()
    }
}

impl Default for MockScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Substitute<ScanRequest, ScanOutcome> for MockScanner {
    fn substitute(&self, request: &ScanRequest) -> ScanOutcome {
        let text = format!("{} {}", request.subject, request.body);
        let hits = self.score(&text);
        if hits == 0 {
            return ScanOutcome {
                malicious: false,
                confidence: SAFE_CONFIDENCE,
            };
        }
        let confidence = (0.6 + 0.1 * hits as f64).min(0.99);
        ScanOutcome {
            malicious: true,
            confidence: (confidence * 100.0).round() / 100.0,
        }
    }
}
