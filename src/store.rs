//! Business records the gateway creates: emails and scan logs.
//!
//! The real schema lives elsewhere. The gateway only needs append and a couple
//! of listing queries, behind [`RecordStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::adapters::ScanOutcome;
use crate::error::StoreError;
use crate::routing::Route;

/// Mailbox folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Folder {
    Inbox,
    Sent,
}

impl std::str::FromStr for Folder {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbox" => Ok(Self::Inbox),
            "sent" => Ok(Self::Sent),
            _ => Err(format!("Unknown folder: {}", s)),
        }
    }
}

/// A stored email.
#[derive(Debug, Clone, Serialize)]
pub struct EmailRecord {
    pub id: Uuid,
    pub owner: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
    pub folder: Folder,
    pub is_outgoing: bool,
    pub created_at: DateTime<Utc>,
}

impl EmailRecord {
    /// An outgoing message filed under `sent`.
    pub fn outgoing(
        owner: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let owner = owner.into();
        Self {
            id: Uuid::new_v4(),
            sender: owner.clone(),
            owner,
            recipient: Some(recipient.into()),
            subject: subject.into(),
            body: body.into(),
            folder: Folder::Sent,
            is_outgoing: true,
            created_at: Utc::now(),
        }
    }
}

/// A stored scan verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRecord {
    pub id: Uuid,
    pub email_id: Option<Uuid>,
    pub owner: Option<String>,
    pub sender: Option<String>,
    pub subject: String,
    /// `"safe"` or `"malicious"`.
    pub result: String,
    pub confidence: f64,
    pub used: Route,
    pub created_at: DateTime<Utc>,
}

impl ScanRecord {
    pub fn new(subject: impl Into<String>, outcome: &ScanOutcome, used: Route) -> Self {
        Self {
            id: Uuid::new_v4(),
            email_id: None,
            owner: None,
            sender: None,
            subject: subject.into(),
            result: outcome.verdict().to_string(),
            confidence: outcome.confidence,
            used,
            created_at: Utc::now(),
        }
    }

    pub fn for_email(mut self, email: &EmailRecord) -> Self {
        self.email_id = Some(email.id);
        self.owner = Some(email.owner.clone());
        self.sender = Some(email.sender.clone());
        self
    }

    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_sender(mut self, sender: Option<String>) -> Self {
        self.sender = sender;
        self
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_email(&self, email: &EmailRecord) -> Result<(), StoreError>;

    async fn insert_scan(&self, scan: &ScanRecord) -> Result<(), StoreError>;

    /// Newest first, `offset` then `limit`.
    async fn emails_for(
        &self,
        owner: &str,
        folder: Folder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EmailRecord>, StoreError>;

    /// Newest first.
    async fn recent_scans(&self, limit: usize) -> Result<Vec<ScanRecord>, StoreError>;
}

/// In-process record store.
#[derive(Default)]
pub struct InMemoryRecordStore {
    emails: RwLock<Vec<EmailRecord>>,
    scans: RwLock<Vec<ScanRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert_email(&self, email: &EmailRecord) -> Result<(), StoreError> {
        self.emails.write().await.push(email.clone());
        Ok(())
    }

    async fn insert_scan(&self, scan: &ScanRecord) -> Result<(), StoreError> {
        self.scans.write().await.push(scan.clone());
        Ok(())
    }

    async fn emails_for(
        &self,
        owner: &str,
        folder: Folder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EmailRecord>, StoreError> {
        let emails = self.emails.read().await;
        Ok(emails
            .iter()
            .rev()
            .filter(|e| e.owner == owner && e.folder == folder)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_scans(&self, limit: usize) -> Result<Vec<ScanRecord>, StoreError> {
        let scans = self.scans.read().await;
        Ok(scans.iter().rev().take(limit).cloned().collect())
    }
}
