//! Mail adapter: the remote mail server and an always-succeeding mock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{RealBackend, ServiceAdapter, Substitute};
use crate::error::DependencyError;
use crate::routing::Dependency;

/// Status reported by the mock mailer.
pub const MOCK_SENT_STATUS: &str = "sent_mock";

/// Outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mail server reply. Only `status` is required; anything else the server
/// returns is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub status: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub type MailAdapter = ServiceAdapter<SendRequest, SendOutcome>;

/// Build the mail adapter; `None` for `url` yields a mock-only adapter.
pub fn mail_adapter(url: Option<String>, timeout: Duration) -> MailAdapter {
    let real = url.map(|url| {
        Arc::new(HttpMailer::new(url, timeout)) as Arc<dyn RealBackend<SendRequest, SendOutcome>>
    });
    ServiceAdapter::new(Dependency::Mail, real, Arc::new(MockMailer))
}

/// `POST {url}` with `{to, subject, body}`.
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpMailer {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        }
    }
}

#[async_trait]
impl RealBackend<SendRequest, SendOutcome> for HttpMailer {
    async fn call(&self, request: &SendRequest) -> Result<SendOutcome, DependencyError> {
        let classify =
            |e: reqwest::Error| DependencyError::from_reqwest(Dependency::Mail, self.timeout, e);

        self.client
            .post(&self.url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)?
            .json::<SendOutcome>()
            .await
            .map_err(classify)
    }
}

/// Accepts every message without sending anything.
pub struct MockMailer;

impl Substitute<SendRequest, SendOutcome> for MockMailer {
    fn substitute(&self, request: &SendRequest) -> SendOutcome {
        let mut extra = serde_json::Map::new();
        extra.insert("to".into(), serde_json::json!(request.to));
        SendOutcome {
            status: MOCK_SENT_STATUS.to_string(),
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Route;

    fn request() -> SendRequest {
        SendRequest {
            to: "bob@example.com".into(),
            subject: "Hi".into(),
            body: "Hello Bob".into(),
        }
    }

    #[test]
    fn mock_always_succeeds() {
        let outcome = MockMailer.substitute(&request());
        assert_eq!(outcome.status, "sent_mock");
        assert_eq!(outcome.extra["to"], "bob@example.com");
    }

    #[test]
    fn outcome_flattens_extra_fields() {
        let outcome: SendOutcome =
            serde_json::from_str(r#"{"status":"queued","id":"m-1"}"#).unwrap();
        assert_eq!(outcome.status, "queued");
        let back = serde_json::to_value(&outcome).unwrap();
        assert_eq!(back["id"], "m-1");
    }

    #[test]
    fn outcome_without_status_is_rejected() {
        assert!(serde_json::from_str::<SendOutcome>(r#"{"id":"m-1"}"#).is_err());
    }

    #[tokio::test]
    async fn unconfigured_mailer_serves_mock() {
        let adapter = mail_adapter(None, Duration::from_secs(3));
        let routed = adapter.call(Route::Real, &request()).await;
        assert_eq!(routed.used, Route::Mock);
        assert_eq!(routed.outcome.status, MOCK_SENT_STATUS);
    }
}
