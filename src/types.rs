use serde::{Deserialize, Serialize};

/// Configuration loaded from `~/.callprep/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Caller identity used for calls, notes and external mappings.
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
    /// Explicit database location. Defaults to `~/.callprep/callprep.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner_id: default_owner_id(),
            database_path: None,
            pipeline: PipelineSettings::default(),
        }
    }
}

fn default_owner_id() -> String {
    "local".to_string()
}

/// Bounds applied to every pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    /// Per-call timeout for calendar, relationship store and message search.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Timeout for a single text-generation request.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    /// Maximum number of tool-invocation rounds before forcing a final answer.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// How far back call-history search looks.
    #[serde(default = "default_history_lookback_days")]
    pub history_lookback_days: u32,
    /// Maximum calls returned by call-history search.
    #[serde(default = "default_history_max_results")]
    pub history_max_results: u32,
    /// How far back message-thread evidence counts.
    #[serde(default = "default_message_lookback_days")]
    pub message_lookback_days: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            generation_timeout_secs: default_generation_timeout_secs(),
            max_tool_rounds: default_max_tool_rounds(),
            history_lookback_days: default_history_lookback_days(),
            history_max_results: default_history_max_results(),
            message_lookback_days: default_message_lookback_days(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    15
}

fn default_generation_timeout_secs() -> u64 {
    60
}

fn default_max_tool_rounds() -> usize {
    4
}

fn default_history_lookback_days() -> u32 {
    180
}

fn default_history_max_results() -> u32 {
    10
}

fn default_message_lookback_days() -> u32 {
    90
}

// =============================================================================
// Meeting records (calendar collaborator contract)
// =============================================================================

/// A meeting as handed over by the calendar collaborator.
///
/// Every field is optional on the wire; the signal extractor fills gaps with
/// defaults instead of rejecting the record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "summary")]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD` for all-day events.
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub attendees: Vec<AttendeeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    /// confirmed / tentative / cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Attendees arrive either as bare strings or as structured entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttendeeEntry {
    Address(String),
    Detailed(Attendee),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
    /// accepted / tentative / declined / needsAction
    #[serde(default)]
    pub response_status: Option<String>,
}

impl AttendeeEntry {
    pub fn address(email: &str) -> Self {
        AttendeeEntry::Address(email.to_string())
    }

    /// Human-readable label for sheet metadata.
    pub fn label(&self) -> String {
        match self {
            AttendeeEntry::Address(raw) => raw.trim().to_string(),
            AttendeeEntry::Detailed(a) => match (&a.display_name, &a.email) {
                (Some(name), Some(email)) if !name.trim().is_empty() => {
                    format!("{} <{}>", name.trim(), email.trim())
                }
                (_, Some(email)) => email.trim().to_string(),
                (Some(name), None) => name.trim().to_string(),
                (None, None) => String::new(),
            },
        }
    }
}
