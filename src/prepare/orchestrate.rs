//! Prep-sheet generation: resolve, aggregate, generate, build, persist.
//!
//! `Start → Resolve → NoAccount (partial) | Matched (full)`.
//!
//! - partial: best-effort generation from meeting signals alone, no tools;
//!   base sheet; generated output is kept as a prep note keyed by meeting id.
//! - full: account context, call history and methodology feed a generation
//!   run with tool access; enriched sheet; one prep record per local call,
//!   upserted on every run.
//!
//! [`generate_prep_sheet`] never fails. The pipeline runs on its own task so
//! that even a panic lands on the emergency sheet; the task is aborted if the
//! caller gives up on it.

use chrono::Utc;
use serde::Serialize;

use crate::db::{CallUpsert, DbAccount, DbCall, DbOpportunity, DbPrepRecord, EnsuredCall, PrepDb};
use crate::error::PrepError;
use crate::providers::bounded;
use crate::state::PrepServices;
use crate::types::{AttendeeEntry, MeetingRecord};

use super::constants::CALENDAR_INTEGRATION;
use super::history::history_for_candidate;
use super::methodology::{plan_methodology, MethodologyPlan, StoredContext};
use super::prompts::{build_full_prompt, build_partial_prompt, build_system_prompt};
use super::resolver::{resolve, AccountRef, AlternativeCandidate, MatchCandidate, MatchReason};
use super::sheet::{
    build_base, build_emergency, build_enriched, decide_tier, parse_generated, EnrichedContext,
    GeneratedSection, PrepSheet, Tier,
};
use super::signals::{extract_signals, MeetingSignals};
use super::tools::{run_generation, ToolContext, ToolRegistry};

// =============================================================================
// Request / result types
// =============================================================================

/// What to prepare for.
#[derive(Debug, Clone)]
pub enum MeetingRef {
    /// Calendar event id, fetched through the calendar service.
    Event(String),
    /// Local call id.
    Call(String),
    /// A meeting record supplied by the caller.
    Inline(MeetingRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationMode {
    /// Resolve from scratch.
    #[default]
    Auto,
    /// Keep the account stored with an earlier prep record, if any.
    Regenerate,
}

#[derive(Debug, Clone)]
pub struct PrepRequest {
    pub meeting: MeetingRef,
    pub mode: GenerationMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrepMode {
    Partial,
    Full,
}

impl PrepMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrepMode::Partial => "partial",
            PrepMode::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    /// Always `success`.
    pub status: &'static str,
    pub mode: PrepMode,
    /// `base`, `enriched` or `emergency`.
    pub tier: &'static str,
    pub ai_generated: bool,
    pub confidence: u8,
    pub matched: bool,
    pub match_reason: MatchReason,
    /// Resolved account first, then alternatives for confirmation.
    pub candidates: Vec<AlternativeCandidate>,
    pub sheet: PrepSheet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prep_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methodology: Option<MethodologyPlan>,
}

impl GenerationResult {
    fn emergency() -> Self {
        Self {
            status: "success",
            mode: PrepMode::Partial,
            tier: Tier::Emergency.as_str(),
            ai_generated: false,
            confidence: 0,
            matched: false,
            match_reason: MatchReason::Emergency,
            candidates: Vec::new(),
            sheet: build_emergency(),
            call_id: None,
            prep_id: None,
            methodology: None,
        }
    }
}

// =============================================================================
// Entry point
// =============================================================================

/// Generate a prep sheet. Always returns a successful result with a sheet
/// whose first section is the editable notes section.
///
/// Dropping the returned future aborts the pipeline at its next await;
/// writes already made stay, nothing after them runs.
pub async fn generate_prep_sheet(services: &PrepServices, request: PrepRequest) -> GenerationResult {
    let mut task = AbortOnDrop(tokio::spawn(run_pipeline(services.clone(), request)));
    match (&mut task.0).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) if e.is_degradable() => {
            log::warn!("prep: pipeline degraded ({}), using emergency sheet: {}", e.kind(), e);
            GenerationResult::emergency()
        }
        Ok(Err(e)) => {
            log::error!("prep: pipeline failed ({}), using emergency sheet: {}", e.kind(), e);
            GenerationResult::emergency()
        }
        Err(e) => {
            log::error!("prep: pipeline task aborted, using emergency sheet: {}", e);
            GenerationResult::emergency()
        }
    }
}

/// Aborts the pipeline task when the caller stops waiting for it.
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Map a meeting to its local call, creating it on first sight and patching
/// title, schedule, status and attendees afterwards.
pub fn ensure_call_for_meeting(
    services: &PrepServices,
    signals: &MeetingSignals,
) -> Result<EnsuredCall, PrepError> {
    if signals.meeting_id.is_empty() {
        return Err(PrepError::MalformedInput(
            "meeting has no id to map".to_string(),
        ));
    }
    let upsert = CallUpsert {
        title: signals.title.clone(),
        description: Some(signals.description.clone()).filter(|d| !d.is_empty()),
        scheduled_start: Some(signals.start.to_rfc3339()),
        scheduled_end: signals.end.map(|e| e.to_rfc3339()),
        status: signals.status.clone(),
        attendee_emails: signals.emails.clone(),
    };
    let ensured = services.db.lock().ensure_call(
        &services.owner_id,
        CALENDAR_INTEGRATION,
        &signals.meeting_id,
        &upsert,
    )?;
    Ok(ensured)
}

// =============================================================================
// Pipeline
// =============================================================================

async fn run_pipeline(
    services: PrepServices,
    request: PrepRequest,
) -> Result<GenerationResult, PrepError> {
    let s = &services;
    let loaded = load_meeting(s, &request.meeting).await?;
    let signals = extract_signals(&loaded.record);
    if !signals.defaults_applied.is_empty() {
        log::warn!(
            "prep: meeting '{}' missing {:?}, defaults applied",
            signals.meeting_id,
            signals.defaults_applied
        );
    }

    let call_id = match loaded.call_id {
        Some(id) => Some(id),
        None => match ensure_call_for_meeting(s, &signals) {
            Ok(ensured) => Some(ensured.call_id),
            Err(e) => {
                log::warn!("prep: could not map meeting to a call: {}", e);
                None
            }
        },
    };

    let existing = match call_id.as_deref() {
        Some(id) => s.db.lock().get_prep_record_for_call(id).unwrap_or_else(|e| {
            log::warn!("prep: could not read existing prep record: {}", e);
            None
        }),
        None => None,
    };
    let previous_notes = existing
        .as_ref()
        .and_then(|r| serde_json::from_str::<PrepSheet>(&r.sheet_json).ok())
        .map(|sheet| sheet.notes_body().to_string())
        .unwrap_or_default();

    let mut candidate = resolve(s, &signals, call_id.as_deref()).await;
    if request.mode == GenerationMode::Regenerate {
        if let Some(record) = existing.as_ref() {
            reuse_stored_account(s, record, &mut candidate).await;
        }
    }

    // Nothing but the local copy of the meeting to go on.
    let sources_down = loaded.calendar_down && candidate.store_unavailable;
    let result = if candidate.matched {
        full_path(s, &signals, candidate, call_id, &previous_notes).await
    } else {
        partial_path(s, &signals, candidate, call_id, &previous_notes, sources_down).await
    };

    log::info!(
        "prep: '{}' -> {} {} (ai: {}, confidence {})",
        signals.title,
        result.mode.as_str(),
        result.tier,
        result.ai_generated,
        result.confidence
    );
    Ok(result)
}

/// A meeting ready for signal extraction.
struct LoadedMeeting {
    record: MeetingRecord,
    /// Local call already known for it.
    call_id: Option<String>,
    /// The calendar was unreachable and the record came from the local store.
    calendar_down: bool,
}

async fn load_meeting(s: &PrepServices, meeting: &MeetingRef) -> Result<LoadedMeeting, PrepError> {
    match meeting {
        MeetingRef::Inline(record) => Ok(LoadedMeeting {
            record: record.clone(),
            call_id: None,
            calendar_down: false,
        }),
        MeetingRef::Call(call_id) => {
            let (record, event_id) = {
                let db = s.db.lock();
                let record = stored_meeting(&db, call_id)?
                    .ok_or_else(|| PrepError::NotFound(format!("call {}", call_id)))?;
                let event_id = db
                    .get_mappings_for_call(call_id)?
                    .into_iter()
                    .find(|m| m.integration_kind == CALENDAR_INTEGRATION)
                    .map(|m| m.external_id);
                (record, event_id)
            };
            let Some(event_id) = event_id else {
                return Ok(LoadedMeeting {
                    record,
                    call_id: Some(call_id.clone()),
                    calendar_down: false,
                });
            };
            // Refresh from the calendar; the stored copy may be stale.
            let fetched = bounded(
                "calendar",
                s.settings.call_timeout_secs,
                s.calendar.get_event_by_id(&s.owner_id, &event_id),
            )
            .await;
            let (record, calendar_down) = match fetched {
                Ok(Some(fresh)) => (fresh, false),
                Ok(None) => (record, false),
                Err(e) => {
                    log::warn!("prep: calendar unavailable ({}), using stored call {}", e, call_id);
                    (record, true)
                }
            };
            Ok(LoadedMeeting {
                record,
                call_id: Some(call_id.clone()),
                calendar_down,
            })
        }
        MeetingRef::Event(event_id) => {
            let fetched = bounded(
                "calendar",
                s.settings.call_timeout_secs,
                s.calendar.get_event_by_id(&s.owner_id, event_id),
            )
            .await;
            match fetched {
                Ok(Some(record)) => Ok(LoadedMeeting {
                    record,
                    call_id: None,
                    calendar_down: false,
                }),
                Ok(None) => Err(PrepError::NotFound(format!("calendar event {}", event_id))),
                Err(e) => {
                    let mapped = s.db.lock().get_mapped_call_id(
                        &s.owner_id,
                        CALENDAR_INTEGRATION,
                        event_id,
                    )?;
                    let Some(call_id) = mapped else {
                        return Err(e);
                    };
                    log::warn!("prep: calendar unavailable ({}), using stored call {}", e, call_id);
                    let record = stored_meeting(&s.db.lock(), &call_id)?.ok_or(e)?;
                    Ok(LoadedMeeting {
                        record,
                        call_id: Some(call_id),
                        calendar_down: true,
                    })
                }
            }
        }
    }
}

/// Rebuild a meeting record from a stored call. The id is the call's first
/// external id so notes keyed by meeting id line up.
fn stored_meeting(db: &PrepDb, call_id: &str) -> Result<Option<MeetingRecord>, PrepError> {
    let Some(call) = db.get_call(call_id)? else {
        return Ok(None);
    };
    let attendees = db.get_call_attendees(call_id)?;
    let external_id = db
        .get_mappings_for_call(call_id)?
        .into_iter()
        .next()
        .map(|m| m.external_id);
    Ok(Some(meeting_from_call(call, attendees, external_id)))
}

fn meeting_from_call(call: DbCall, attendees: Vec<String>, external_id: Option<String>) -> MeetingRecord {
    MeetingRecord {
        id: external_id.unwrap_or_else(|| call.id.clone()),
        title: Some(call.title),
        description: call.description,
        start: call.scheduled_start,
        end: call.scheduled_end,
        attendees: attendees.iter().map(|a| AttendeeEntry::address(a)).collect(),
        location: None,
        organizer: None,
        status: Some(call.status),
    }
}

/// Regeneration keeps the account an earlier full run settled on.
async fn reuse_stored_account(s: &PrepServices, record: &DbPrepRecord, candidate: &mut MatchCandidate) {
    let Some(account_id) = record.account_id.as_deref() else {
        return;
    };
    if candidate.account.as_ref().map(|a| a.id.as_str()) == Some(account_id) && candidate.matched {
        return;
    }
    let account = match bounded(
        "relationship store",
        s.settings.call_timeout_secs,
        s.relationships.account(account_id),
    )
    .await
    {
        Ok(Some(account)) => account,
        Ok(None) => {
            log::warn!("prep: stored account {} no longer exists", account_id);
            return;
        }
        Err(e) => {
            log::warn!("prep: could not reload stored account {}: {}", account_id, e);
            return;
        }
    };
    log::info!("prep: regenerating with stored account {}", account.name);
    candidate.account = Some(AccountRef::from(&account));
    candidate.contacts.retain(|c| c.account_id.as_deref() == Some(account_id));
    candidate.confidence = candidate
        .confidence
        .max(record.confidence.clamp(0, 100) as u8)
        .max(super::constants::MATCH_THRESHOLD);
    candidate.matched = true;
    if candidate.match_reason == MatchReason::None {
        candidate.match_reason = MatchReason::parse(&record.match_reason);
    }
}

fn candidate_list(candidate: &MatchCandidate) -> Vec<AlternativeCandidate> {
    let mut list = Vec::new();
    if let Some(account) = candidate.account.as_ref() {
        list.push(AlternativeCandidate {
            account: account.clone(),
            source: candidate.match_reason.as_str().to_string(),
            similarity: None,
        });
    }
    list.extend(candidate.alternatives.iter().cloned());
    list
}

/// Run generation and parse its sections. Any failure, including empty
/// output, is logged and yields `None`.
async fn generate_sections(
    s: &PrepServices,
    signals: &MeetingSignals,
    registry: Option<&ToolRegistry>,
    prompt: &str,
) -> Option<Vec<GeneratedSection>> {
    let ctx = ToolContext {
        services: s,
        anchor: signals.start,
    };
    let system = build_system_prompt(registry.is_some());
    match run_generation(&ctx, registry, &system, prompt).await {
        Ok(outcome) => {
            let sections = parse_generated(&outcome.text);
            if sections.is_empty() {
                log::warn!("prep: generation returned empty output");
                None
            } else {
                Some(sections)
            }
        }
        Err(e) => {
            log::warn!("prep: generation failed ({}), using templates: {}", e.kind(), e);
            None
        }
    }
}

// -----------------------------------------------------------------------------
// Partial
// -----------------------------------------------------------------------------

async fn partial_path(
    s: &PrepServices,
    signals: &MeetingSignals,
    candidate: MatchCandidate,
    call_id: Option<String>,
    previous_notes: &str,
    sources_down: bool,
) -> GenerationResult {
    if candidate.needs_confirmation() {
        log::info!(
            "prep: '{}' has {} unconfirmed account candidate(s)",
            signals.title,
            candidate.account.iter().count() + candidate.alternatives.len()
        );
    }
    let prompt = build_partial_prompt(signals, &candidate);
    let generated = generate_sections(s, signals, None, &prompt).await;
    let tier = decide_tier(!(sources_down && generated.is_none()), false, generated.is_some());
    if tier == Tier::Emergency {
        log::warn!(
            "prep: calendar, relationship store and generation all failed for '{}'",
            signals.meeting_id
        );
        return GenerationResult::emergency();
    }

    let mut sheet = build_base(signals);
    if let Some(sections) = generated.as_ref() {
        sheet.apply_generated(sections);
    }
    sheet.carry_notes(previous_notes);

    if generated.is_some() && !signals.meeting_id.is_empty() {
        let title = format!("Prep: {}", signals.title);
        let account_id = candidate.account.as_ref().map(|a| a.id.as_str());
        if let Err(e) = s.db.lock().upsert_prep_note(
            &s.owner_id,
            &signals.meeting_id,
            account_id,
            &title,
            &sheet.to_markdown(),
        ) {
            log::warn!("prep: could not save prep note for '{}': {}", signals.meeting_id, e);
        }
    }

    GenerationResult {
        status: "success",
        mode: PrepMode::Partial,
        tier: tier.as_str(),
        ai_generated: tier.ai_generated(),
        confidence: candidate.confidence,
        matched: false,
        match_reason: candidate.match_reason,
        candidates: candidate_list(&candidate),
        sheet,
        call_id,
        prep_id: None,
        methodology: None,
    }
}

// -----------------------------------------------------------------------------
// Full
// -----------------------------------------------------------------------------

struct AccountContext {
    account: DbAccount,
    contacts: Vec<crate::db::DbContact>,
    opportunities: Vec<DbOpportunity>,
}

async fn load_account_context(s: &PrepServices, account_id: &str) -> Result<AccountContext, PrepError> {
    let secs = s.settings.call_timeout_secs;
    let account = bounded("relationship store", secs, s.relationships.account(account_id))
        .await?
        .ok_or_else(|| PrepError::NotFound(format!("account {}", account_id)))?;

    let contacts = bounded(
        "relationship store",
        secs,
        s.relationships.contacts_for_account(account_id),
    )
    .await
    .unwrap_or_else(|e| {
        log::warn!("prep: contacts for {} unavailable: {}", account.name, e);
        Vec::new()
    });

    let mut opportunities = bounded(
        "relationship store",
        secs,
        s.relationships.opportunities_for_account(account_id),
    )
    .await
    .unwrap_or_else(|e| {
        log::warn!("prep: opportunities for {} unavailable: {}", account.name, e);
        Vec::new()
    });
    opportunities.sort_by_key(|o| !o.is_open());

    Ok(AccountContext {
        account,
        contacts,
        opportunities,
    })
}

async fn full_path(
    s: &PrepServices,
    signals: &MeetingSignals,
    candidate: MatchCandidate,
    call_id: Option<String>,
    previous_notes: &str,
) -> GenerationResult {
    let account_id = candidate
        .account
        .as_ref()
        .map(|a| a.id.clone())
        .unwrap_or_default();

    let context = match load_account_context(s, &account_id).await {
        Ok(context) => Some(context),
        Err(e) => {
            log::warn!("prep: account context unavailable, dropping to base sheet: {}", e);
            None
        }
    };

    let registry = ToolRegistry::new();
    let (mut sheet, tier, plan) = match context.as_ref() {
        Some(ctx) => {
            let history = history_for_candidate(
                &s.db,
                &s.owner_id,
                &s.settings,
                &candidate,
                signals,
                call_id.as_deref(),
            );
            let plan = plan_methodology(
                signals,
                &StoredContext {
                    account: Some(ctx.account.clone()),
                    opportunities: ctx.opportunities.clone(),
                    contact_count: ctx.contacts.len(),
                },
            );
            let enriched = EnrichedContext {
                signals,
                account: &ctx.account,
                contacts: &ctx.contacts,
                opportunities: &ctx.opportunities,
                history: &history,
            };
            let prompt = build_full_prompt(&enriched, &plan);
            let generated = generate_sections(s, signals, Some(&registry), &prompt).await;

            let mut sheet = build_enriched(&enriched);
            if let Some(sections) = generated.as_ref() {
                sheet.apply_generated(sections);
            }
            sheet.apply_emphasis(&plan.emphasized_sections());
            (sheet, decide_tier(true, true, generated.is_some()), Some(plan))
        }
        None => {
            let prompt = build_partial_prompt(signals, &candidate);
            let generated = generate_sections(s, signals, Some(&registry), &prompt).await;
            let mut sheet = build_base(signals);
            if let Some(sections) = generated.as_ref() {
                sheet.apply_generated(sections);
            }
            (sheet, decide_tier(true, false, generated.is_some()), None)
        }
    };
    sheet.carry_notes(previous_notes);

    let prep_id = match call_id.as_deref() {
        Some(call_id) => persist_full(s, call_id, &account_id, &candidate, &sheet, plan.as_ref()),
        None => None,
    };

    GenerationResult {
        status: "success",
        mode: PrepMode::Full,
        tier: tier.as_str(),
        ai_generated: tier.ai_generated(),
        confidence: candidate.confidence,
        matched: true,
        match_reason: candidate.match_reason,
        candidates: candidate_list(&candidate),
        sheet,
        call_id,
        prep_id,
        methodology: plan,
    }
}

/// Link the call to its account and upsert the prep record. Failures are
/// logged; the sheet is returned regardless.
fn persist_full(
    s: &PrepServices,
    call_id: &str,
    account_id: &str,
    candidate: &MatchCandidate,
    sheet: &PrepSheet,
    plan: Option<&MethodologyPlan>,
) -> Option<String> {
    let sheet_json = match serde_json::to_string(sheet) {
        Ok(json) => json,
        Err(e) => {
            log::warn!("prep: could not serialize sheet: {}", e);
            return None;
        }
    };
    let now = Utc::now().to_rfc3339();
    let record = DbPrepRecord {
        id: PrepDb::new_id(),
        call_id: call_id.to_string(),
        owner_id: s.owner_id.clone(),
        account_id: Some(account_id.to_string()).filter(|id| !id.is_empty()),
        mode: PrepMode::Full.as_str().to_string(),
        confidence: candidate.confidence as i64,
        match_reason: candidate.match_reason.as_str().to_string(),
        sheet_json,
        methodology_json: plan.and_then(|p| serde_json::to_string(p).ok()),
        summary: Some(sheet.summary()),
        created_at: now.clone(),
        updated_at: now,
    };

    let db = s.db.lock();
    if !account_id.is_empty() {
        if let Err(e) = db.set_call_account(call_id, Some(account_id)) {
            log::warn!("prep: could not link call {} to account: {}", call_id, e);
        }
    }
    match db.upsert_prep_record(&record) {
        Ok(stored) => Some(stored.id),
        Err(e) => {
            log::warn!("prep: could not save prep record for call {}: {}", call_id, e);
            None
        }
    }
}
