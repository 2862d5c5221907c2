//! Collaborator contracts consumed by the prep pipeline.
//!
//! Calendar, relationship store, message search and text generation are
//! external services. The pipeline only sees these traits; every call through
//! them is wrapped in [`bounded`] so a slow provider degrades the run instead
//! of stalling it. The relationship store ships with a SQLite implementation
//! over the local database.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{DbAccount, DbContact, DbOpportunity, SharedDb};
use crate::error::PrepError;
use crate::types::MeetingRecord;

/// Run a collaborator call under a timeout, mapping expiry to
/// [`PrepError::Timeout`].
pub async fn bounded<T, F>(service: &'static str, secs: u64, fut: F) -> Result<T, PrepError>
where
    F: Future<Output = Result<T, PrepError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("{} call exceeded {}s", service, secs);
            Err(PrepError::Timeout { service, secs })
        }
    }
}

// =============================================================================
// Calendar
// =============================================================================

#[async_trait]
pub trait CalendarService: Send + Sync {
    /// A single event by its provider id, or `None` when it does not exist.
    async fn get_event_by_id(
        &self,
        owner_id: &str,
        event_id: &str,
    ) -> Result<Option<MeetingRecord>, PrepError>;

    /// The next `limit` events on the owner's calendar, soonest first.
    async fn list_upcoming(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<MeetingRecord>, PrepError>;
}

// =============================================================================
// Relationship store (CRM-like)
// =============================================================================

/// Read access to accounts, contacts and opportunities.
///
/// Lists come back in the store's natural order; the resolver's first-wins
/// account selection depends on it.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn contact_by_email(&self, email: &str) -> Result<Option<DbContact>, PrepError>;

    /// Contacts for any of `emails`, in the order the emails were given.
    async fn contacts_by_emails(&self, emails: &[String]) -> Result<Vec<DbContact>, PrepError>;

    async fn contacts_for_account(&self, account_id: &str) -> Result<Vec<DbContact>, PrepError>;

    async fn account(&self, account_id: &str) -> Result<Option<DbAccount>, PrepError>;

    async fn account_by_name(&self, name: &str) -> Result<Option<DbAccount>, PrepError>;

    /// Accounts whose website domain is one of `domains`.
    async fn accounts_by_domains(&self, domains: &[String]) -> Result<Vec<DbAccount>, PrepError>;

    /// Accounts whose exact name occurs in `text`.
    async fn accounts_named_in(&self, text: &str) -> Result<Vec<DbAccount>, PrepError>;

    /// Opportunities whose exact name occurs in `text`, with their account.
    async fn opportunities_named_in(
        &self,
        text: &str,
    ) -> Result<Vec<(DbOpportunity, DbAccount)>, PrepError>;

    async fn opportunities_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<DbOpportunity>, PrepError>;

    /// Every active account; used for fuzzy suggestions only.
    async fn all_accounts(&self) -> Result<Vec<DbAccount>, PrepError>;
}

/// Relationship store backed by the local SQLite database.
pub struct SqliteRelationshipStore {
    db: SharedDb,
}

impl SqliteRelationshipStore {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RelationshipStore for SqliteRelationshipStore {
    async fn contact_by_email(&self, email: &str) -> Result<Option<DbContact>, PrepError> {
        Ok(self.db.lock().get_contact_by_email(email)?)
    }

    async fn contacts_by_emails(&self, emails: &[String]) -> Result<Vec<DbContact>, PrepError> {
        Ok(self.db.lock().find_contacts_by_emails(emails)?)
    }

    async fn contacts_for_account(&self, account_id: &str) -> Result<Vec<DbContact>, PrepError> {
        Ok(self.db.lock().get_contacts_for_account(account_id)?)
    }

    async fn account(&self, account_id: &str) -> Result<Option<DbAccount>, PrepError> {
        Ok(self.db.lock().get_account(account_id)?)
    }

    async fn account_by_name(&self, name: &str) -> Result<Option<DbAccount>, PrepError> {
        Ok(self.db.lock().get_account_by_name(name)?)
    }

    async fn accounts_by_domains(&self, domains: &[String]) -> Result<Vec<DbAccount>, PrepError> {
        Ok(self.db.lock().find_accounts_by_domains(domains)?)
    }

    async fn accounts_named_in(&self, text: &str) -> Result<Vec<DbAccount>, PrepError> {
        Ok(self.db.lock().find_accounts_named_in(text)?)
    }

    async fn opportunities_named_in(
        &self,
        text: &str,
    ) -> Result<Vec<(DbOpportunity, DbAccount)>, PrepError> {
        Ok(self.db.lock().find_opportunities_named_in(text)?)
    }

    async fn opportunities_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<DbOpportunity>, PrepError> {
        Ok(self.db.lock().get_opportunities_for_account(account_id)?)
    }

    async fn all_accounts(&self) -> Result<Vec<DbAccount>, PrepError> {
        Ok(self.db.lock().get_all_accounts()?)
    }
}

// =============================================================================
// Message-thread search
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub query: Option<String>,
    pub participant_email: Option<String>,
    /// RFC 3339 lower bound on the last message in a thread.
    pub since: String,
    /// RFC 3339 upper bound on the last message in a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageThread {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub last_message_at: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[async_trait]
pub trait MessageSearch: Send + Sync {
    async fn search_threads(&self, query: &MessageQuery) -> Result<Vec<MessageThread>, PrepError>;
}

// =============================================================================
// Text / tool-calling generation
// =============================================================================

/// A tool the generator may call, as advertised to it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: Value,
}

/// A tool call requested by the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One executed tool call and its (possibly error) payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExchange {
    pub invocation: ToolInvocation,
    pub output: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    /// Empty when tools are withheld (final round).
    pub tools: Vec<ToolDescriptor>,
    /// Tool calls already executed in this run, oldest first.
    pub exchanges: Vec<ToolExchange>,
}

#[derive(Debug, Clone)]
pub enum GenerationReply {
    /// Finished output: JSON `{"sections": [...]}` or plain text.
    Final(String),
    ToolCalls(Vec<ToolInvocation>),
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationReply, PrepError>;
}
