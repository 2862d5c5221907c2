//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Failed to encode stored JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

/// A row from the `accounts` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAccount {
    pub id: String,
    pub name: String,
    /// Website as entered in the CRM (`https://www.acme.com/`, `acme.com`, ...).
    pub website: Option<String>,
    pub industry: Option<String>,
    pub employee_count: Option<i64>,
    pub annual_revenue: Option<f64>,
    pub updated_at: String,
    pub archived: bool,
}

impl DbAccount {
    /// Bare domain of the account website, if any (`acme.com`).
    pub fn website_domain(&self) -> Option<String> {
        self.website.as_deref().and_then(normalize_website_domain)
    }
}

/// Strip scheme, `www.`, path and port from a website value.
pub fn normalize_website_domain(website: &str) -> Option<String> {
    let trimmed = website.trim().to_lowercase();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(&trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("");
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() || !host.contains('.') {
        None
    } else {
        Some(host.to_string())
    }
}

/// A row from the `contacts` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbContact {
    pub id: String,
    pub account_id: Option<String>,
    pub name: String,
    pub email: String,
    pub title: Option<String>,
    pub phone: Option<String>,
    pub updated_at: String,
}

/// A row from the `opportunities` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbOpportunity {
    pub id: String,
    pub account_id: String,
    pub name: String,
    /// CRM stage label, e.g. "Prospecting", "Proposal/Price Quote", "Closed Won".
    pub stage: Option<String>,
    pub amount: Option<f64>,
    pub close_date: Option<String>,
    pub updated_at: String,
}

impl DbOpportunity {
    pub fn is_closed_won(&self) -> bool {
        self.stage
            .as_deref()
            .map(|s| s.to_lowercase().contains("closed won"))
            .unwrap_or(false)
    }

    pub fn is_open(&self) -> bool {
        !self
            .stage
            .as_deref()
            .map(|s| s.to_lowercase().starts_with("closed"))
            .unwrap_or(false)
    }
}

/// A row from the `calls` table: the local record behind a meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCall {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_start: Option<String>,
    pub scheduled_end: Option<String>,
    pub status: String,
    pub account_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Meeting fields written to the local call record on every open.
#[derive(Debug, Clone, Default)]
pub struct CallUpsert {
    pub title: String,
    pub description: Option<String>,
    pub scheduled_start: Option<String>,
    pub scheduled_end: Option<String>,
    pub status: Option<String>,
    pub attendee_emails: Vec<String>,
}

/// Result of an idempotent "ensure call" for an external event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredCall {
    pub call_id: String,
    /// True when this open created the local record and its mapping.
    pub created: bool,
}

/// Filters for call-history search. Selectors (contact email, account id,
/// account name, domain) are OR-ed; with none set, every call in the window
/// matches.
#[derive(Debug, Clone, Default)]
pub struct CallSearch {
    pub owner_id: String,
    pub contact_email: Option<String>,
    pub account_id: Option<String>,
    pub account_name: Option<String>,
    pub domain: Option<String>,
    /// RFC 3339 lower bound on the call start.
    pub since: String,
    /// RFC 3339 upper bound on the call start.
    pub until: String,
    pub exclude_call_id: Option<String>,
    pub limit: u32,
}

/// A call joined with its account, attendee emails and stored prep output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryRow {
    pub call: DbCall,
    pub account_name: Option<String>,
    pub contact_emails: Vec<String>,
    pub prep_summary: Option<String>,
    pub prep_notes: Vec<String>,
}

/// A row from `external_mappings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbExternalMapping {
    pub owner_id: String,
    pub integration_kind: String,
    pub external_id: String,
    pub call_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from `prep_records`: the stored sheet for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPrepRecord {
    pub id: String,
    pub call_id: String,
    pub owner_id: String,
    pub account_id: Option<String>,
    pub mode: String,
    pub confidence: i64,
    pub match_reason: String,
    /// Serialized `PrepSheet`.
    pub sheet_json: String,
    /// Serialized `MethodologyWeights`, when computed.
    pub methodology_json: Option<String>,
    /// Short plain-text digest used by call-history views.
    pub summary: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from `notes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbNote {
    pub id: String,
    pub owner_id: String,
    pub meeting_id: Option<String>,
    pub account_id: Option<String>,
    /// `manual` for user notes, `prep` for generated partial-mode notes.
    pub kind: String,
    pub title: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A note returned by full-text search, with its hit count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSearchHit {
    pub note: DbNote,
    pub score: usize,
}
