//! Prior-call history for an account or contact.
//!
//! Joins call records with their linked account, attendee emails, stored prep
//! summaries and prep notes. Used directly by the enriched tier and by the
//! `search_call_history` tool.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{CallHistoryRow, CallSearch, SharedDb};
use crate::error::PrepError;
use crate::types::PipelineSettings;

use super::resolver::MatchCandidate;
use super::signals::MeetingSignals;

/// Selectors for a history lookup. Selectors are OR-ed.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub contact_email: Option<String>,
    pub account_id: Option<String>,
    pub account_name: Option<String>,
    pub domain: Option<String>,
    /// Capped at the configured lookback.
    pub lookback_days: Option<u32>,
    /// Capped at the configured maximum.
    pub limit: Option<u32>,
    pub exclude_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryEntry {
    pub call_id: String,
    pub title: String,
    pub scheduled_start: Option<String>,
    pub status: String,
    pub account_name: Option<String>,
    pub contact_emails: Vec<String>,
    pub prep_summary: Option<String>,
    pub notes: Vec<String>,
}

impl From<CallHistoryRow> for CallHistoryEntry {
    fn from(row: CallHistoryRow) -> Self {
        Self {
            call_id: row.call.id,
            title: row.call.title,
            scheduled_start: row.call.scheduled_start,
            status: row.call.status,
            account_name: row.account_name,
            contact_emails: row.contact_emails,
            prep_summary: row.prep_summary,
            notes: row.prep_notes,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistory {
    pub lookback_days: u32,
    pub entries: Vec<CallHistoryEntry>,
}

impl CallHistory {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Search calls that started within the lookback window before `anchor`.
pub fn search_call_history(
    db: &SharedDb,
    owner_id: &str,
    settings: &PipelineSettings,
    query: &HistoryQuery,
    anchor: DateTime<Utc>,
) -> Result<CallHistory, PrepError> {
    let lookback_days = query
        .lookback_days
        .unwrap_or(settings.history_lookback_days)
        .min(settings.history_lookback_days);
    let limit = query
        .limit
        .unwrap_or(settings.history_max_results)
        .clamp(1, settings.history_max_results.max(1));

    let search = CallSearch {
        owner_id: owner_id.to_string(),
        contact_email: query.contact_email.clone(),
        account_id: query.account_id.clone(),
        account_name: query.account_name.clone(),
        domain: query.domain.clone(),
        since: (anchor - Duration::days(lookback_days as i64)).to_rfc3339(),
        until: anchor.to_rfc3339(),
        exclude_call_id: query.exclude_call_id.clone(),
        limit,
    };
    let rows = db.lock().search_calls(&search)?;

    Ok(CallHistory {
        lookback_days,
        entries: rows.into_iter().map(CallHistoryEntry::from).collect(),
    })
}

/// History for a resolved candidate: its account, plus its matched contacts.
/// Returns an empty history (logged) on store failure.
pub fn history_for_candidate(
    db: &SharedDb,
    owner_id: &str,
    settings: &PipelineSettings,
    candidate: &MatchCandidate,
    signals: &MeetingSignals,
    exclude_call_id: Option<&str>,
) -> CallHistory {
    let Some(account) = candidate.account.as_ref() else {
        return CallHistory::default();
    };
    let query = HistoryQuery {
        account_id: Some(account.id.clone()),
        contact_email: candidate.contacts.first().map(|c| c.email.clone()),
        exclude_call_id: exclude_call_id.map(String::from),
        ..Default::default()
    };
    match search_call_history(db, owner_id, settings, &query, signals.start) {
        Ok(history) => history,
        Err(e) => {
            log::warn!("history: lookup for {} failed: {}", account.name, e);
            CallHistory::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_account, test_db};
    use crate::db::CallUpsert;
    use chrono::TimeZone;

    fn seed() -> SharedDb {
        let db = test_db();
        db.upsert_account(&sample_account("a1", "Acme Corp", Some("acme.com")))
            .unwrap();
        for (ext, title, start) in [
            ("e1", "Acme intro", "2026-01-05T15:00:00+00:00"),
            ("e2", "Acme demo", "2026-02-10T15:00:00+00:00"),
            ("e3", "Ancient call", "2025-01-10T15:00:00+00:00"),
        ] {
            let ensured = db
                .ensure_call(
                    "u1",
                    "calendar",
                    ext,
                    &CallUpsert {
                        title: title.into(),
                        scheduled_start: Some(start.into()),
                        attendee_emails: vec!["ceo@acme.com".into()],
                        ..Default::default()
                    },
                )
                .unwrap();
            db.set_call_account(&ensured.call_id, Some("a1")).unwrap();
        }
        db.upsert_prep_note("u1", "e1", Some("a1"), "Prep: Acme intro", "Asked about SSO")
            .unwrap();
        db.into_shared()
    }

    #[test]
    fn test_history_respects_lookback_and_joins_notes() {
        let db = seed();
        let anchor = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let history = search_call_history(
            &db,
            "u1",
            &PipelineSettings::default(),
            &HistoryQuery {
                account_name: Some("Acme Corp".into()),
                ..Default::default()
            },
            anchor,
        )
        .unwrap();
        let titles: Vec<&str> = history.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Acme demo", "Acme intro"]);
        assert_eq!(history.entries[1].notes, vec!["Asked about SSO"]);
        assert_eq!(history.entries[0].account_name.as_deref(), Some("Acme Corp"));
        assert_eq!(history.lookback_days, 180);
    }

    #[test]
    fn test_history_caps_requested_window_and_limit() {
        let db = seed();
        let anchor = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let settings = PipelineSettings {
            history_max_results: 1,
            ..PipelineSettings::default()
        };
        let history = search_call_history(
            &db,
            "u1",
            &settings,
            &HistoryQuery {
                domain: Some("acme.com".into()),
                lookback_days: Some(10_000),
                limit: Some(50),
                ..Default::default()
            },
            anchor,
        )
        .unwrap();
        assert_eq!(history.entries.len(), 1);
        assert_eq!(history.lookback_days, 180);
    }
}
