//! Confidence-scored meeting → account resolution.
//!
//! Scoring is additive over a fixed policy table evaluated in priority order:
//!
//! | rule            | points | sets reason    |
//! |-----------------|--------|----------------|
//! | email match     | 40     | `email_match`  |
//! | name match      | 25     | `name_match`   |
//! | domain match    | 15     | `domain_match` |
//! | message threads | 10     | no             |
//! | call history    | 10     | no             |
//!
//! The first firing rule that carries a reason sets `match_reason`; the total
//! is capped at 100 and `matched` means `confidence >= 40`. The resolved
//! account is the first account produced by the highest-priority firing rule,
//! in the store's order. That is a first-wins heuristic, not a search for the
//! globally best account: with two accounts both owning an attendee contact,
//! the outcome depends on attendee and query order.
//!
//! Evidence gathering (I/O) is separate from scoring (pure) so the policy can
//! be tested without collaborators.

use serde::{Deserialize, Serialize};

use crate::db::{DbAccount, DbContact};
use crate::error::PrepError;
use crate::providers::{bounded, MessageQuery, MessageThread};
use crate::state::PrepServices;

use super::constants::{is_personal_domain, FUZZY_SUGGESTION_THRESHOLD, MATCH_THRESHOLD};
use super::signals::{parse_meeting_time, MeetingSignals};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a candidate matched. `Emergency` marks results produced by the
/// unconditional fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    EmailMatch,
    NameMatch,
    DomainMatch,
    None,
    Emergency,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::EmailMatch => "email_match",
            MatchReason::NameMatch => "name_match",
            MatchReason::DomainMatch => "domain_match",
            MatchReason::None => "none",
            MatchReason::Emergency => "emergency",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "email_match" => MatchReason::EmailMatch,
            "name_match" => MatchReason::NameMatch,
            "domain_match" => MatchReason::DomainMatch,
            "emergency" => MatchReason::Emergency,
            _ => MatchReason::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringRule {
    EmailMatch,
    NameMatch,
    DomainMatch,
    MessageEvidence,
    CallHistory,
}

impl ScoringRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringRule::EmailMatch => "email_match",
            ScoringRule::NameMatch => "name_match",
            ScoringRule::DomainMatch => "domain_match",
            ScoringRule::MessageEvidence => "message_evidence",
            ScoringRule::CallHistory => "call_history",
        }
    }
}

/// One row of the scoring policy.
#[derive(Debug, Clone, Copy)]
pub struct PolicyEntry {
    pub rule: ScoringRule,
    pub points: u8,
    pub reason: Option<MatchReason>,
}

/// Scoring policy in priority order.
pub const SCORING_POLICY: [PolicyEntry; 5] = [
    PolicyEntry {
        rule: ScoringRule::EmailMatch,
        points: 40,
        reason: Some(MatchReason::EmailMatch),
    },
    PolicyEntry {
        rule: ScoringRule::NameMatch,
        points: 25,
        reason: Some(MatchReason::NameMatch),
    },
    PolicyEntry {
        rule: ScoringRule::DomainMatch,
        points: 15,
        reason: Some(MatchReason::DomainMatch),
    },
    PolicyEntry {
        rule: ScoringRule::MessageEvidence,
        points: 10,
        reason: None,
    },
    PolicyEntry {
        rule: ScoringRule::CallHistory,
        points: 10,
        reason: None,
    },
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRef {
    pub id: String,
    pub name: String,
}

impl From<&DbAccount> for AccountRef {
    fn from(account: &DbAccount) -> Self {
        Self {
            id: account.id.clone(),
            name: account.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRef {
    pub id: String,
    pub name: String,
    pub email: String,
    pub account_id: Option<String>,
}

impl From<&DbContact> for ContactRef {
    fn from(contact: &DbContact) -> Self {
        Self {
            id: contact.id.clone(),
            name: contact.name.clone(),
            email: contact.email.clone(),
            account_id: contact.account_id.clone(),
        }
    }
}

/// A rule that fired, with the evidence that fired it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetail {
    pub rule: ScoringRule,
    pub points: u8,
    pub evidence: String,
}

/// Another plausible account, offered for manual confirmation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeCandidate {
    pub account: AccountRef,
    /// Rule that surfaced it, or `fuzzy_name` for suggestion-only hits.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub account: Option<AccountRef>,
    pub contacts: Vec<ContactRef>,
    /// 0–100.
    pub confidence: u8,
    pub matched: bool,
    pub match_reason: MatchReason,
    pub details: Vec<MatchDetail>,
    pub alternatives: Vec<AlternativeCandidate>,
    /// The relationship store could not be queried.
    #[serde(skip)]
    pub store_unavailable: bool,
}

impl MatchCandidate {
    /// Zero-confidence, unmatched candidate.
    pub fn unmatched() -> Self {
        Self {
            account: None,
            contacts: Vec::new(),
            confidence: 0,
            matched: false,
            match_reason: MatchReason::None,
            details: Vec::new(),
            alternatives: Vec::new(),
            store_unavailable: false,
        }
    }

    /// Something plausible surfaced but nothing cleared the threshold.
    pub fn needs_confirmation(&self) -> bool {
        !self.matched && (self.account.is_some() || !self.alternatives.is_empty())
    }
}

/// Everything the scorer looks at, gathered up front.
#[derive(Debug, Clone, Default)]
pub struct ResolutionEvidence {
    /// Known contacts whose email is an attendee, in attendee order.
    pub email_contacts: Vec<DbContact>,
    /// Accounts owning those contacts, in the same order.
    pub email_accounts: Vec<DbAccount>,
    /// Accounts named in the title, then accounts of opportunities named in it.
    pub name_accounts: Vec<DbAccount>,
    /// Names (account or opportunity) that matched the title.
    pub matched_names: Vec<String>,
    /// Accounts whose website domain is an attendee domain.
    pub domain_accounts: Vec<DbAccount>,
    /// Attendee with prior message threads, if any.
    pub message_participant: Option<String>,
    /// Whether the selected account has prior calls.
    pub call_history: bool,
}

impl ResolutionEvidence {
    pub fn fires(&self, rule: ScoringRule) -> bool {
        match rule {
            ScoringRule::EmailMatch => !self.email_contacts.is_empty(),
            ScoringRule::NameMatch => !self.matched_names.is_empty(),
            ScoringRule::DomainMatch => !self.domain_accounts.is_empty(),
            ScoringRule::MessageEvidence => self.message_participant.is_some(),
            ScoringRule::CallHistory => self.call_history,
        }
    }

    fn describe(&self, rule: ScoringRule) -> String {
        match rule {
            ScoringRule::EmailMatch => self
                .email_contacts
                .iter()
                .map(|c| c.email.clone())
                .collect::<Vec<_>>()
                .join(", "),
            ScoringRule::NameMatch => self.matched_names.join(", "),
            ScoringRule::DomainMatch => self
                .domain_accounts
                .iter()
                .filter_map(|a| a.website_domain())
                .collect::<Vec<_>>()
                .join(", "),
            ScoringRule::MessageEvidence => self.message_participant.clone().unwrap_or_default(),
            ScoringRule::CallHistory => "prior calls on record".to_string(),
        }
    }

    /// First account from the highest-priority account-producing rule.
    pub fn selected_account(&self) -> Option<&DbAccount> {
        self.email_accounts
            .first()
            .or_else(|| self.name_accounts.first())
            .or_else(|| self.domain_accounts.first())
    }
}

// ---------------------------------------------------------------------------
// Scoring (pure)
// ---------------------------------------------------------------------------

/// Apply the policy table to gathered evidence.
pub fn score_evidence(evidence: &ResolutionEvidence) -> MatchCandidate {
    let mut total: u32 = 0;
    let mut reason = MatchReason::None;
    let mut details = Vec::new();

    for entry in SCORING_POLICY.iter() {
        if !evidence.fires(entry.rule) {
            continue;
        }
        total += entry.points as u32;
        if reason == MatchReason::None {
            if let Some(r) = entry.reason {
                reason = r;
            }
        }
        details.push(MatchDetail {
            rule: entry.rule,
            points: entry.points,
            evidence: evidence.describe(entry.rule),
        });
    }

    let confidence = total.min(100) as u8;
    let account = evidence.selected_account().map(AccountRef::from);

    let mut alternatives: Vec<AlternativeCandidate> = Vec::new();
    let ranked = [
        (ScoringRule::EmailMatch, &evidence.email_accounts),
        (ScoringRule::NameMatch, &evidence.name_accounts),
        (ScoringRule::DomainMatch, &evidence.domain_accounts),
    ];
    for (rule, accounts) in ranked {
        for acc in accounts.iter() {
            let is_selected = account.as_ref().map(|a| a.id == acc.id).unwrap_or(false);
            if is_selected || alternatives.iter().any(|alt| alt.account.id == acc.id) {
                continue;
            }
            alternatives.push(AlternativeCandidate {
                account: AccountRef::from(acc),
                source: rule.as_str().to_string(),
                similarity: None,
            });
        }
    }

    MatchCandidate {
        account,
        contacts: evidence.email_contacts.iter().map(ContactRef::from).collect(),
        confidence,
        matched: confidence >= MATCH_THRESHOLD,
        match_reason: reason,
        details,
        alternatives,
        store_unavailable: false,
    }
}

// ---------------------------------------------------------------------------
// Evidence gathering
// ---------------------------------------------------------------------------

/// Resolve a meeting against the relationship store.
///
/// Never fails: if the relationship store is unreachable the result is a
/// zero-confidence unmatched candidate. Message search and call history are
/// corroborating evidence; if they fail the rule simply doesn't fire.
pub async fn resolve(
    services: &PrepServices,
    signals: &MeetingSignals,
    current_call_id: Option<&str>,
) -> MatchCandidate {
    let mut evidence = match gather_store_evidence(services, signals).await {
        Ok(evidence) => evidence,
        Err(e) => {
            log::warn!(
                "resolve: relationship store unavailable for '{}': {}",
                signals.title,
                e
            );
            return MatchCandidate {
                store_unavailable: true,
                ..MatchCandidate::unmatched()
            };
        }
    };

    evidence.message_participant = find_message_evidence(services, signals).await;

    if let Some(account) = evidence.selected_account() {
        let before = signals.start.to_rfc3339();
        evidence.call_history = match services
            .db
            .lock()
            .has_prior_calls_for_account(&account.id, &before, current_call_id)
        {
            Ok(found) => found,
            Err(e) => {
                log::warn!("resolve: call history lookup failed: {}", e);
                false
            }
        };
    }

    let mut candidate = score_evidence(&evidence);

    if !candidate.matched {
        match bounded(
            "relationship store",
            services.settings.call_timeout_secs,
            services.relationships.all_accounts(),
        )
        .await
        {
            Ok(accounts) => add_fuzzy_suggestions(&mut candidate, &signals.title, &accounts),
            Err(e) => log::debug!("resolve: fuzzy suggestions skipped: {}", e),
        }
    }

    log::info!(
        "resolve: '{}' -> {} (confidence {}, reason {}, {} alternatives)",
        signals.title,
        candidate
            .account
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or("no account"),
        candidate.confidence,
        candidate.match_reason.as_str(),
        candidate.alternatives.len()
    );
    candidate
}

async fn gather_store_evidence(
    services: &PrepServices,
    signals: &MeetingSignals,
) -> Result<ResolutionEvidence, PrepError> {
    let secs = services.settings.call_timeout_secs;
    let store = &services.relationships;
    let mut evidence = ResolutionEvidence::default();

    // Rule 1: attendee email → known contact
    if !signals.emails.is_empty() {
        evidence.email_contacts = bounded(
            "relationship store",
            secs,
            store.contacts_by_emails(&signals.emails),
        )
        .await?;
        for contact in &evidence.email_contacts {
            let Some(account_id) = contact.account_id.as_deref() else {
                continue;
            };
            if evidence.email_accounts.iter().any(|a| a.id == account_id) {
                continue;
            }
            if let Some(account) =
                bounded("relationship store", secs, store.account(account_id)).await?
            {
                if !account.archived {
                    evidence.email_accounts.push(account);
                }
            }
        }
    }

    // Rule 2: exact account or opportunity name in the title
    for account in bounded("relationship store", secs, store.accounts_named_in(&signals.title)).await? {
        evidence.matched_names.push(account.name.clone());
        evidence.name_accounts.push(account);
    }
    for (opportunity, account) in bounded(
        "relationship store",
        secs,
        store.opportunities_named_in(&signals.title),
    )
    .await?
    {
        evidence.matched_names.push(opportunity.name.clone());
        if !evidence.name_accounts.iter().any(|a| a.id == account.id) {
            evidence.name_accounts.push(account);
        }
    }

    // Rule 3: attendee domain → account website
    let domains: Vec<String> = signals
        .domains
        .iter()
        .filter(|d| !is_personal_domain(d))
        .cloned()
        .collect();
    if !domains.is_empty() {
        evidence.domain_accounts =
            bounded("relationship store", secs, store.accounts_by_domains(&domains)).await?;
    }

    Ok(evidence)
}

/// First attendee with a message thread inside the lookback window that
/// ends at the meeting start.
async fn find_message_evidence(services: &PrepServices, signals: &MeetingSignals) -> Option<String> {
    let since = (signals.start
        - chrono::Duration::days(services.settings.message_lookback_days as i64))
    .to_rfc3339();
    let until = signals.start.to_rfc3339();
    for email in &signals.emails {
        let query = MessageQuery {
            query: None,
            participant_email: Some(email.clone()),
            since: since.clone(),
            until: Some(until.clone()),
            limit: 1,
        };
        match bounded(
            "message search",
            services.settings.call_timeout_secs,
            services.messages.search_threads(&query),
        )
        .await
        {
            Ok(threads) if threads.iter().any(|t| is_before_meeting(t, signals)) => {
                return Some(email.clone())
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("resolve: message search failed, skipping thread evidence: {}", e);
                return None;
            }
        }
    }
    None
}

/// Threads without a timestamp are taken at the search's word.
fn is_before_meeting(thread: &MessageThread, signals: &MeetingSignals) -> bool {
    match thread.last_message_at.as_deref().and_then(parse_meeting_time) {
        Some(at) => at <= signals.start,
        None => true,
    }
}

// ---------------------------------------------------------------------------
// Fuzzy suggestions
// ---------------------------------------------------------------------------

/// Lowercase, alphanumeric-and-space only.
fn normalize_name(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Individual words (>= 3 chars) and adjacent word pairs.
fn build_fuzzy_tokens(text: &str) -> Vec<String> {
    let normalized = normalize_name(text);
    let words: Vec<&str> = normalized.split_whitespace().filter(|w| w.len() >= 3).collect();
    let mut tokens: Vec<String> = words.iter().map(|w| w.to_string()).collect();
    for pair in words.windows(2) {
        tokens.push(format!("{} {}", pair[0], pair[1]));
    }
    tokens
}

/// Best Jaro-Winkler similarity of `name` against any token.
fn best_similarity(name: &str, tokens: &[String]) -> f64 {
    tokens
        .iter()
        .map(|t| strsim::jaro_winkler(name, t))
        .fold(0.0, f64::max)
}

/// Append suggestion-only near-name matches. They never change the score.
pub fn add_fuzzy_suggestions(candidate: &mut MatchCandidate, title: &str, accounts: &[DbAccount]) {
    let tokens = build_fuzzy_tokens(title);
    if tokens.is_empty() {
        return;
    }
    for account in accounts {
        let name = normalize_name(&account.name);
        if name.len() < 3 {
            continue;
        }
        let already = candidate.account.as_ref().map(|a| a.id == account.id).unwrap_or(false)
            || candidate.alternatives.iter().any(|alt| alt.account.id == account.id);
        if already {
            continue;
        }
        let similarity = best_similarity(&name, &tokens);
        if similarity >= FUZZY_SUGGESTION_THRESHOLD {
            candidate.alternatives.push(AlternativeCandidate {
                account: AccountRef::from(account),
                source: "fuzzy_name".to_string(),
                similarity: Some((similarity * 100.0).round() / 100.0),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_account, sample_contact};
    use crate::prepare::signals::extract_signals;
    use crate::prepare::testing::{fake_services, seeded_db, FakeMessages, FailingRelationships};
    use crate::types::{AttendeeEntry, MeetingRecord};
    use std::sync::Arc;

    fn meeting(title: &str, attendees: &[&str]) -> MeetingSignals {
        extract_signals(&MeetingRecord {
            id: "evt-1".into(),
            title: Some(title.into()),
            start: Some("2026-03-02T15:00:00Z".into()),
            attendees: attendees.iter().map(|a| AttendeeEntry::address(a)).collect(),
            ..Default::default()
        })
    }

    fn evidence_with(rules: &[ScoringRule]) -> ResolutionEvidence {
        let acme = sample_account("a1", "Acme Corp", Some("acme.com"));
        let mut evidence = ResolutionEvidence::default();
        for rule in rules {
            match rule {
                ScoringRule::EmailMatch => {
                    evidence.email_contacts = vec![sample_contact("c1", "a1", "Jane", "ceo@acme.com")];
                    evidence.email_accounts = vec![acme.clone()];
                }
                ScoringRule::NameMatch => {
                    evidence.matched_names = vec!["Acme Corp".into()];
                    evidence.name_accounts = vec![acme.clone()];
                }
                ScoringRule::DomainMatch => evidence.domain_accounts = vec![acme.clone()],
                ScoringRule::MessageEvidence => {
                    evidence.message_participant = Some("ceo@acme.com".into())
                }
                ScoringRule::CallHistory => evidence.call_history = true,
            }
        }
        evidence
    }

    #[test]
    fn test_policy_table_is_in_priority_order() {
        let points: Vec<u8> = SCORING_POLICY.iter().map(|p| p.points).collect();
        assert_eq!(points, vec![40, 25, 15, 10, 10]);
        assert!(SCORING_POLICY[3].reason.is_none());
        assert!(SCORING_POLICY[4].reason.is_none());
    }

    #[test]
    fn test_first_rule_sets_reason() {
        let candidate = score_evidence(&evidence_with(&[
            ScoringRule::DomainMatch,
            ScoringRule::NameMatch,
        ]));
        assert_eq!(candidate.confidence, 40);
        assert!(candidate.matched);
        assert_eq!(candidate.match_reason, MatchReason::NameMatch);
    }

    #[test]
    fn test_corroborating_rules_carry_no_reason() {
        let candidate = score_evidence(&evidence_with(&[
            ScoringRule::MessageEvidence,
            ScoringRule::CallHistory,
        ]));
        assert_eq!(candidate.confidence, 20);
        assert!(!candidate.matched);
        assert_eq!(candidate.match_reason, MatchReason::None);
    }

    #[test]
    fn test_confidence_bounds_and_monotonicity() {
        let all = [
            ScoringRule::EmailMatch,
            ScoringRule::NameMatch,
            ScoringRule::DomainMatch,
            ScoringRule::MessageEvidence,
            ScoringRule::CallHistory,
        ];
        for mask in 0u32..32 {
            let rules: Vec<ScoringRule> = all
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, r)| *r)
                .collect();
            let base = score_evidence(&evidence_with(&rules));
            assert!(base.confidence <= 100);
            assert_eq!(base.matched, base.confidence >= 40);
            for extra in all.iter() {
                if rules.contains(extra) {
                    continue;
                }
                let mut more = rules.clone();
                more.push(*extra);
                let bigger = score_evidence(&evidence_with(&more));
                assert!(
                    bigger.confidence >= base.confidence,
                    "adding {:?} to {:?} lowered confidence",
                    extra,
                    rules
                );
            }
        }
        assert_eq!(score_evidence(&evidence_with(&all)).confidence, 100);
    }

    #[test]
    fn test_alternatives_exclude_selected_account() {
        let mut evidence = evidence_with(&[ScoringRule::EmailMatch]);
        evidence.domain_accounts = vec![
            sample_account("a1", "Acme Corp", Some("acme.com")),
            sample_account("a2", "Acme Holdings", Some("acme.com")),
        ];
        let candidate = score_evidence(&evidence);
        assert_eq!(candidate.account.as_ref().unwrap().id, "a1");
        assert_eq!(candidate.alternatives.len(), 1);
        assert_eq!(candidate.alternatives[0].account.id, "a2");
        assert_eq!(candidate.alternatives[0].source, "domain_match");
    }

    #[test]
    fn test_fuzzy_tokens_and_suggestions() {
        let tokens = build_fuzzy_tokens("Review: Sales-Force demo");
        assert!(tokens.contains(&"sales force".to_string()));

        let mut candidate = MatchCandidate::unmatched();
        let accounts = vec![
            sample_account("a1", "Globex", None),
            sample_account("a2", "Initech", None),
        ];
        add_fuzzy_suggestions(&mut candidate, "Globx quarterly sync", &accounts);
        assert_eq!(candidate.alternatives.len(), 1);
        assert_eq!(candidate.alternatives[0].account.id, "a1");
        assert_eq!(candidate.alternatives[0].source, "fuzzy_name");
        assert_eq!(candidate.confidence, 0);
        assert!(candidate.needs_confirmation());
    }

    #[tokio::test]
    async fn test_email_and_name_match_clears_threshold() {
        let db = seeded_db();
        let services = fake_services(db);
        let signals = meeting("Acme Corp — Discovery", &["ceo@acme.com"]);
        let candidate = resolve(&services, &signals, None).await;
        assert!(candidate.confidence >= 65);
        assert!(candidate.matched);
        assert_eq!(candidate.match_reason, MatchReason::EmailMatch);
        assert_eq!(candidate.account.as_ref().unwrap().name, "Acme Corp");
        assert_eq!(candidate.contacts[0].email, "ceo@acme.com");
    }

    #[tokio::test]
    async fn test_domain_only_stays_below_threshold() {
        let db = seeded_db();
        let services = fake_services(db);
        let signals = meeting("Quarterly sync", &["someone.new@acme.com"]);
        let candidate = resolve(&services, &signals, None).await;
        assert_eq!(candidate.confidence, 15);
        assert!(!candidate.matched);
        assert_eq!(candidate.match_reason, MatchReason::DomainMatch);
        assert!(candidate.needs_confirmation());
    }

    #[tokio::test]
    async fn test_personal_domains_never_match() {
        let db = seeded_db();
        db.lock()
            .upsert_account(&sample_account("g1", "Gmail Shell Co", Some("gmail.com")))
            .unwrap();
        let services = fake_services(db);
        let signals = meeting("Coffee", &["friend@gmail.com"]);
        let candidate = resolve(&services, &signals, None).await;
        assert_eq!(candidate.confidence, 0);
        assert_eq!(candidate.match_reason, MatchReason::None);
    }

    #[tokio::test]
    async fn test_message_evidence_adds_points() {
        let db = seeded_db();
        let mut services = fake_services(db);
        services.messages = Arc::new(FakeMessages::with_participant("someone.new@acme.com"));
        let signals = meeting("Quarterly sync", &["someone.new@acme.com"]);
        let candidate = resolve(&services, &signals, None).await;
        assert_eq!(candidate.confidence, 25);
        assert_eq!(candidate.match_reason, MatchReason::DomainMatch);
    }

    #[tokio::test]
    async fn test_threads_after_meeting_start_are_not_evidence() {
        let mut services = fake_services(seeded_db());
        services.messages = Arc::new(FakeMessages::with_thread(
            "someone.new@acme.com",
            "2026-03-05T08:00:00Z",
        ));
        let signals = meeting("Quarterly sync", &["someone.new@acme.com"]);
        let candidate = resolve(&services, &signals, None).await;
        assert_eq!(candidate.confidence, 15);
        assert!(candidate
            .details
            .iter()
            .all(|d| d.rule != ScoringRule::MessageEvidence));
    }

    #[tokio::test]
    async fn test_unavailable_store_yields_zero_confidence() {
        let db = seeded_db();
        let mut services = fake_services(db);
        services.relationships = Arc::new(FailingRelationships);
        let signals = meeting("Acme Corp — Discovery", &["ceo@acme.com"]);
        let candidate = resolve(&services, &signals, None).await;
        assert_eq!(candidate.confidence, 0);
        assert!(!candidate.matched);
        assert_eq!(candidate.match_reason, MatchReason::None);
        assert!(candidate.account.is_none());
        assert!(candidate.store_unavailable);
    }
}
