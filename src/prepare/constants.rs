//! Shared constants for meeting resolution and prep generation.

/// Confidence at or above which a candidate counts as matched.
pub const MATCH_THRESHOLD: u8 = 40;

/// Jaro-Winkler similarity required for a fuzzy account-name suggestion.
pub const FUZZY_SUGGESTION_THRESHOLD: f64 = 0.85;

/// Title used when the meeting record has none.
pub const DEFAULT_MEETING_TITLE: &str = "Meeting";

/// Deal value at or above which a deal counts as large.
pub const LARGE_DEAL_VALUE: f64 = 100_000.0;

/// Deal value below which a deal counts as small.
pub const SMALL_DEAL_VALUE: f64 = 25_000.0;

/// Integration kind recorded on external mappings for calendar events.
pub const CALENDAR_INTEGRATION: &str = "calendar";

/// Personal email domains (not tied to any organization).
pub const PERSONAL_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "yahoo.com",
    "icloud.com",
    "me.com",
    "live.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
];

pub fn is_personal_domain(domain: &str) -> bool {
    PERSONAL_EMAIL_DOMAINS
        .iter()
        .any(|d| d.eq_ignore_ascii_case(domain.trim()))
}
