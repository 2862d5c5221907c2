//! Signal extraction: normalize a raw meeting record into comparable signals.
//!
//! Never fails. Missing fields become empty signals, a missing title becomes
//! "Meeting" and a missing or unparsable start becomes the current time; each
//! substitution is recorded in `defaults_applied` so callers can log it.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::types::{AttendeeEntry, MeetingRecord};

use super::constants::DEFAULT_MEETING_TITLE;

/// Comparable signals derived from one meeting. Recomputed per request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSignals {
    pub meeting_id: String,
    pub title: String,
    pub description: String,
    /// Attendees as displayed (`Name <email>` or the raw string).
    pub attendees: Vec<String>,
    /// Lowercase attendee addresses, de-duplicated in order.
    pub emails: Vec<String>,
    /// Domain part of every address, de-duplicated in order.
    pub domains: Vec<String>,
    /// Lowercase alphanumeric title/description words of 3+ characters.
    pub tokens: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: Option<String>,
    /// Fields that were synthesized because the record lacked them.
    pub defaults_applied: Vec<&'static str>,
}

impl MeetingSignals {
    /// `"YYYY-MM-DD HH:MM–HH:MM UTC"` range for sheet metadata.
    pub fn time_range(&self) -> String {
        let day = self.start.format("%Y-%m-%d");
        match self.end {
            Some(end) => format!(
                "{} {}–{} UTC",
                day,
                self.start.format("%H:%M"),
                end.format("%H:%M")
            ),
            None => format!("{} {} UTC", day, self.start.format("%H:%M")),
        }
    }
}

fn re_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)+").unwrap())
}

/// Extract signals using the current time for a missing start.
pub fn extract_signals(meeting: &MeetingRecord) -> MeetingSignals {
    extract_signals_at(meeting, Utc::now())
}

/// Extract signals with an explicit "now" for missing starts.
pub fn extract_signals_at(meeting: &MeetingRecord, now: DateTime<Utc>) -> MeetingSignals {
    let mut defaults_applied = Vec::new();

    let title = match meeting.title.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => {
            defaults_applied.push("title");
            DEFAULT_MEETING_TITLE.to_string()
        }
    };
    let description = meeting
        .description
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .to_string();

    let start = match meeting.start.as_deref().and_then(parse_meeting_time) {
        Some(start) => start,
        None => {
            defaults_applied.push("start");
            now
        }
    };
    let end = meeting
        .end
        .as_deref()
        .and_then(parse_meeting_time)
        .filter(|end| *end >= start);

    let mut attendees = Vec::new();
    let mut emails: Vec<String> = Vec::new();
    for entry in &meeting.attendees {
        let label = entry.label();
        if !label.is_empty() {
            attendees.push(label);
        }
        if let Some(email) = attendee_email(entry) {
            if !emails.contains(&email) {
                emails.push(email);
            }
        }
    }

    let mut domains: Vec<String> = Vec::new();
    for email in &emails {
        if let Some(domain) = email_domain(email) {
            if !domains.contains(&domain) {
                domains.push(domain);
            }
        }
    }

    let tokens = tokenize(&format!("{} {}", title, description));

    MeetingSignals {
        meeting_id: meeting.id.trim().to_string(),
        title,
        description,
        attendees,
        emails,
        domains,
        tokens,
        start,
        end,
        status: meeting.status.clone(),
        defaults_applied,
    }
}

/// Normalize one attendee entry to a lowercase address, if it has one.
pub fn attendee_email(entry: &AttendeeEntry) -> Option<String> {
    let raw = match entry {
        AttendeeEntry::Address(raw) => raw.as_str(),
        AttendeeEntry::Detailed(a) => a.email.as_deref()?,
    };
    re_email()
        .find(raw)
        .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
}

/// Domain part of an address (`acme.com` for `ceo@acme.com`).
pub fn email_domain(email: &str) -> Option<String> {
    let (_, domain) = email.rsplit_once('@')?;
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

/// Lowercase alphanumeric words of 3+ characters, de-duplicated in order.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
    {
        if !tokens.contains(&word) {
            tokens.push(word);
        }
    }
    tokens
}

/// Parse an RFC 3339 timestamp, a naive `YYYY-MM-DDTHH:MM:SS` (taken as UTC)
/// or a date-only value (midnight UTC).
pub fn parse_meeting_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
