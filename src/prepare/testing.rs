//! Fake collaborators and a seeded store for pipeline tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::db::test_utils::{sample_account, sample_contact, sample_opportunity, test_db};
use crate::db::{DbAccount, DbContact, DbOpportunity, SharedDb};
use crate::error::PrepError;
use crate::providers::{
    CalendarService, GenerationReply, GenerationRequest, GenerationService, MessageQuery,
    MessageSearch, MessageThread, RelationshipStore, SqliteRelationshipStore,
};
use crate::prepare::signals::parse_meeting_time;
use crate::state::PrepServices;
use crate::types::{MeetingRecord, PipelineSettings};

/// Acme Corp (acme.com) with contact ceo@acme.com and the open "Acme
/// Expansion" opportunity; Globex (globex.com) with one contact.
pub fn seeded_db() -> SharedDb {
    let db = test_db();
    db.upsert_account(&sample_account("acme", "Acme Corp", Some("https://www.acme.com")))
        .unwrap();
    db.upsert_account(&sample_account("globex", "Globex", Some("globex.com")))
        .unwrap();
    let mut ceo = sample_contact("c-acme-ceo", "acme", "Dana Reyes", "ceo@acme.com");
    ceo.title = Some("CEO".into());
    db.upsert_contact(&ceo).unwrap();
    db.upsert_contact(&sample_contact("c-globex", "globex", "Hank Scorpio", "hank@globex.com"))
        .unwrap();
    db.upsert_opportunity(&sample_opportunity(
        "o-acme",
        "acme",
        "Acme Expansion",
        "Discovery",
        Some(60_000.0),
    ))
    .unwrap();
    db.into_shared()
}

/// Services over `db` with a working SQLite relationship store, an empty
/// calendar and inbox, and a generator that is always unavailable.
pub fn fake_services(db: SharedDb) -> PrepServices {
    PrepServices {
        owner_id: "owner-1".to_string(),
        relationships: Arc::new(SqliteRelationshipStore::new(db.clone())),
        db,
        calendar: Arc::new(FakeCalendar::default()),
        messages: Arc::new(FakeMessages::default()),
        generator: Arc::new(FailingGenerator),
        settings: PipelineSettings::default(),
    }
}

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCalendar {
    pub events: Vec<MeetingRecord>,
}

impl FakeCalendar {
    pub fn with_events(events: Vec<MeetingRecord>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl CalendarService for FakeCalendar {
    async fn get_event_by_id(
        &self,
        _owner_id: &str,
        event_id: &str,
    ) -> Result<Option<MeetingRecord>, PrepError> {
        Ok(self.events.iter().find(|e| e.id == event_id).cloned())
    }

    async fn list_upcoming(
        &self,
        _owner_id: &str,
        limit: usize,
    ) -> Result<Vec<MeetingRecord>, PrepError> {
        Ok(self.events.iter().take(limit).cloned().collect())
    }
}

pub struct FailingCalendar;

#[async_trait]
impl CalendarService for FailingCalendar {
    async fn get_event_by_id(
        &self,
        _owner_id: &str,
        _event_id: &str,
    ) -> Result<Option<MeetingRecord>, PrepError> {
        Err(PrepError::unavailable("calendar", "connection refused"))
    }

    async fn list_upcoming(
        &self,
        _owner_id: &str,
        _limit: usize,
    ) -> Result<Vec<MeetingRecord>, PrepError> {
        Err(PrepError::unavailable("calendar", "connection refused"))
    }
}

// ---------------------------------------------------------------------------
// Relationship store
// ---------------------------------------------------------------------------

pub struct FailingRelationships;

fn crm_down<T>() -> Result<T, PrepError> {
    Err(PrepError::unavailable("relationship store", "connection refused"))
}

#[async_trait]
impl RelationshipStore for FailingRelationships {
    async fn contact_by_email(&self, _email: &str) -> Result<Option<DbContact>, PrepError> {
        crm_down()
    }
    async fn contacts_by_emails(&self, _emails: &[String]) -> Result<Vec<DbContact>, PrepError> {
        crm_down()
    }
    async fn contacts_for_account(&self, _account_id: &str) -> Result<Vec<DbContact>, PrepError> {
        crm_down()
    }
    async fn account(&self, _account_id: &str) -> Result<Option<DbAccount>, PrepError> {
        crm_down()
    }
    async fn account_by_name(&self, _name: &str) -> Result<Option<DbAccount>, PrepError> {
        crm_down()
    }
    async fn accounts_by_domains(&self, _domains: &[String]) -> Result<Vec<DbAccount>, PrepError> {
        crm_down()
    }
    async fn accounts_named_in(&self, _text: &str) -> Result<Vec<DbAccount>, PrepError> {
        crm_down()
    }
    async fn opportunities_named_in(
        &self,
        _text: &str,
    ) -> Result<Vec<(DbOpportunity, DbAccount)>, PrepError> {
        crm_down()
    }
    async fn opportunities_for_account(
        &self,
        _account_id: &str,
    ) -> Result<Vec<DbOpportunity>, PrepError> {
        crm_down()
    }
    async fn all_accounts(&self) -> Result<Vec<DbAccount>, PrepError> {
        crm_down()
    }
}

// ---------------------------------------------------------------------------
// Message search
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeMessages {
    pub threads: Vec<MessageThread>,
}

impl FakeMessages {
    /// One thread with `email` as a participant, a few days before the
    /// meetings the tests schedule.
    pub fn with_participant(email: &str) -> Self {
        Self::with_thread(email, "2026-02-26T09:30:00Z")
    }

    pub fn with_thread(email: &str, last_message_at: &str) -> Self {
        Self {
            threads: vec![MessageThread {
                id: "thread-1".into(),
                subject: "Re: intro".into(),
                participants: vec![email.to_lowercase()],
                last_message_at: Some(last_message_at.to_string()),
                snippet: Some("Looking forward to it".into()),
            }],
        }
    }
}

fn within(thread: &MessageThread, query: &MessageQuery) -> bool {
    let Some(at) = thread.last_message_at.as_deref().and_then(parse_meeting_time) else {
        return true;
    };
    let after_since = parse_meeting_time(&query.since).map_or(true, |since| at >= since);
    let before_until = query
        .until
        .as_deref()
        .and_then(parse_meeting_time)
        .map_or(true, |until| at <= until);
    after_since && before_until
}

#[async_trait]
impl MessageSearch for FakeMessages {
    async fn search_threads(&self, query: &MessageQuery) -> Result<Vec<MessageThread>, PrepError> {
        let hits = self
            .threads
            .iter()
            .filter(|t| match query.participant_email.as_deref() {
                Some(email) => t.participants.iter().any(|p| p.eq_ignore_ascii_case(email)),
                None => true,
            })
            .filter(|t| match query.query.as_deref() {
                Some(q) => t.subject.to_lowercase().contains(&q.to_lowercase()),
                None => true,
            })
            .filter(|t| within(t, query))
            .take(query.limit.max(1))
            .cloned()
            .collect();
        Ok(hits)
    }
}

pub struct FailingMessages;

#[async_trait]
impl MessageSearch for FailingMessages {
    async fn search_threads(&self, _query: &MessageQuery) -> Result<Vec<MessageThread>, PrepError> {
        Err(PrepError::unavailable("message search", "connection refused"))
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

pub struct FailingGenerator;

#[async_trait]
impl GenerationService for FailingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationReply, PrepError> {
        Err(PrepError::unavailable("generation", "model offline"))
    }
}

/// Answers with `text` after `delay`.
pub struct SlowGenerator {
    pub delay: Duration,
    pub text: String,
}

#[async_trait]
impl GenerationService for SlowGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationReply, PrepError> {
        tokio::time::sleep(self.delay).await;
        Ok(GenerationReply::Final(self.text.clone()))
    }
}

/// Replays canned replies in order and records every request.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<GenerationReply>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<GenerationReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationReply, PrepError> {
        self.requests.lock().push(request.clone());
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| PrepError::unavailable("generation", "script exhausted"))
    }
}
