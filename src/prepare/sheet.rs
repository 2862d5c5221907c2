//! Tiered prep-sheet builder.
//!
//! Three tiers, chosen by [`decide_tier`]:
//! - base: pinned notes + objectives, suggested agenda, discovery questions,
//!   next steps (title-aware generic text)
//! - enriched: base plus CRM Insights and Previous Conversations right after
//!   the notes section
//! - emergency: notes only
//!
//! Every sheet starts with the `notes` section, editable and expanded. Every
//! mutation in this module goes through [`PrepSheet::ensure_notes_first`].

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{DbAccount, DbContact, DbOpportunity};

use super::constants::DEFAULT_MEETING_TITLE;
use super::history::CallHistory;
use super::signals::MeetingSignals;

pub const NOTES_SECTION_ID: &str = "notes";
pub const CRM_INSIGHTS_SECTION_ID: &str = "crm_insights";
pub const PREVIOUS_CONVERSATIONS_SECTION_ID: &str = "previous_conversations";

/// Generic sections in display order.
pub const GENERIC_SECTION_IDS: [&str; 4] = [
    "objectives",
    "suggested_agenda",
    "discovery_questions",
    "next_steps",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetMeta {
    pub title: String,
    pub time_range: String,
    pub attendees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub body: String,
    pub editable: bool,
    pub expanded: bool,
    /// Pushed forward by the top-ranked methodologies.
    #[serde(default)]
    pub emphasis: bool,
}

impl Section {
    fn generic(id: &str, title: &str, items: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            items,
            body: String::new(),
            editable: false,
            expanded: true,
            emphasis: false,
        }
    }

    /// The pinned, editable notes section.
    pub fn notes(body: &str) -> Self {
        Self {
            id: NOTES_SECTION_ID.to_string(),
            title: "Notes".to_string(),
            items: Vec::new(),
            body: body.to_string(),
            editable: true,
            expanded: true,
            emphasis: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepSheet {
    pub meta: SheetMeta,
    pub sections: Vec<Section>,
    pub generated_at: String,
}

impl PrepSheet {
    /// Restore the notes invariant: exactly one notes section, first,
    /// editable and expanded.
    pub fn ensure_notes_first(&mut self) {
        let body = self
            .sections
            .iter()
            .find(|s| s.id == NOTES_SECTION_ID)
            .map(|s| s.body.clone())
            .unwrap_or_default();
        self.sections.retain(|s| s.id != NOTES_SECTION_ID);
        self.sections.insert(0, Section::notes(&body));
    }

    pub fn notes_body(&self) -> &str {
        self.sections
            .first()
            .filter(|s| s.id == NOTES_SECTION_ID)
            .map(|s| s.body.as_str())
            .unwrap_or("")
    }

    /// Carry the user's notes into a freshly built sheet.
    pub fn carry_notes(&mut self, body: &str) {
        self.ensure_notes_first();
        self.sections[0].body = body.to_string();
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Flag the given section ids as emphasized.
    pub fn apply_emphasis(&mut self, ids: &[&str]) {
        for section in self.sections.iter_mut() {
            if section.id != NOTES_SECTION_ID && ids.contains(&section.id.as_str()) {
                section.emphasis = true;
            }
        }
    }

    /// Overlay generated sections. Matching ids replace content; unknown ids
    /// are inserted before the generic block; a generated `notes` section is
    /// ignored.
    pub fn apply_generated(&mut self, generated: &[GeneratedSection]) {
        for gen in generated {
            let id = normalize_section_id(&gen.id);
            if id.is_empty() || id == NOTES_SECTION_ID {
                continue;
            }
            if let Some(existing) = self.sections.iter_mut().find(|s| s.id == id) {
                if !gen.title.trim().is_empty() {
                    existing.title = gen.title.trim().to_string();
                }
                existing.items = gen.items.clone();
                existing.body = gen.body.clone();
                continue;
            }
            let insert_at = self
                .sections
                .iter()
                .position(|s| GENERIC_SECTION_IDS.contains(&s.id.as_str()))
                .unwrap_or(self.sections.len());
            let title = if gen.title.trim().is_empty() {
                title_from_id(&id)
            } else {
                gen.title.trim().to_string()
            };
            self.sections.insert(
                insert_at,
                Section {
                    id,
                    title,
                    items: gen.items.clone(),
                    body: gen.body.clone(),
                    editable: false,
                    expanded: true,
                    emphasis: false,
                },
            );
        }
        self.ensure_notes_first();
    }

    /// Plain-text digest used for call-history views.
    pub fn summary(&self) -> String {
        let mut lines = vec![self.meta.title.clone()];
        for section in self.sections.iter().skip(1).take(3) {
            if let Some(first) = section.items.first() {
                lines.push(format!("{}: {}", section.title, first));
            } else if !section.body.trim().is_empty() {
                let body: String = section.body.trim().chars().take(160).collect();
                lines.push(format!("{}: {}", section.title, body));
            }
        }
        lines.join("\n")
    }

    /// Markdown rendering used for the partial-mode prep note.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n", self.meta.title);
        if !self.meta.time_range.is_empty() {
            out.push_str(&format!("_{}_\n", self.meta.time_range));
        }
        for section in self.sections.iter().skip(1) {
            out.push_str(&format!("\n## {}\n", section.title));
            if !section.body.trim().is_empty() {
                out.push_str(section.body.trim());
                out.push('\n');
            }
            for item in &section.items {
                out.push_str(&format!("- {}\n", item));
            }
        }
        out
    }
}

/// A section as produced by the generator.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeneratedSection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct GeneratedSheet {
    #[serde(default)]
    sections: Vec<GeneratedSection>,
}

fn normalize_section_id(raw: &str) -> String {
    let mut id = String::new();
    for c in raw.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c);
        } else if !id.ends_with('_') {
            id.push('_');
        }
    }
    id.trim_matches('_').to_string()
}

fn title_from_id(id: &str) -> String {
    id.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse generator output: JSON `{"sections": [...]}` (optionally fenced),
/// else the whole text as a single "AI Briefing" section. Empty output
/// yields no sections.
pub fn parse_generated(text: &str) -> Vec<GeneratedSection> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<GeneratedSheet>(&trimmed[start..=end]) {
                let sections: Vec<GeneratedSection> = parsed
                    .sections
                    .into_iter()
                    .filter(|s| !s.items.is_empty() || !s.body.trim().is_empty())
                    .collect();
                if !sections.is_empty() {
                    return sections;
                }
            }
        }
    }
    vec![GeneratedSection {
        id: "ai_briefing".to_string(),
        title: "AI Briefing".to_string(),
        items: Vec::new(),
        body: trimmed.to_string(),
    }]
}

// ---------------------------------------------------------------------------
// Tier decision
// ---------------------------------------------------------------------------

/// Which sheet a run produces. `ai` records whether generated content was
/// overlaid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum Tier {
    Emergency,
    Base { ai: bool },
    Enriched { ai: bool },
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Emergency => "emergency",
            Tier::Base { .. } => "base",
            Tier::Enriched { .. } => "enriched",
        }
    }

    pub fn ai_generated(&self) -> bool {
        matches!(self, Tier::Base { ai: true } | Tier::Enriched { ai: true })
    }
}

/// Pure tier decision. A broken pipeline always lands on emergency.
pub fn decide_tier(pipeline_ok: bool, matched: bool, generation_succeeded: bool) -> Tier {
    if !pipeline_ok {
        Tier::Emergency
    } else if matched {
        Tier::Enriched {
            ai: generation_succeeded,
        }
    } else {
        Tier::Base {
            ai: generation_succeeded,
        }
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn meta_for(signals: &MeetingSignals, account: Option<&DbAccount>) -> SheetMeta {
    SheetMeta {
        title: signals.title.clone(),
        time_range: signals.time_range(),
        attendees: signals.attendees.clone(),
        account: account.map(|a| AccountSummary {
            id: a.id.clone(),
            name: a.name.clone(),
            industry: a.industry.clone(),
        }),
    }
}

fn generic_sections(title: &str, attendees: &[String]) -> Vec<Section> {
    let who = match attendees.len() {
        0 => "the attendees".to_string(),
        1 => attendees[0].clone(),
        n => format!("{} and {} others", attendees[0], n - 1),
    };
    vec![
        Section::generic(
            "objectives",
            "Objectives",
            vec![
                format!("Agree on what \"{}\" needs to achieve", title),
                format!("Understand current priorities for {}", who),
                "Leave with a concrete, owned next step".to_string(),
            ],
        ),
        Section::generic(
            "suggested_agenda",
            "Suggested Agenda",
            vec![
                "Introductions and goals for the call (5 min)".to_string(),
                "Current situation and challenges (15 min)".to_string(),
                format!("Discussion: {} (15 min)", title),
                "Recap and next steps (5 min)".to_string(),
            ],
        ),
        Section::generic(
            "discovery_questions",
            "Discovery Questions",
            vec![
                "What prompted this conversation now?".to_string(),
                "How is this handled today, and what does it cost you?".to_string(),
                "Who else is involved in evaluating or deciding?".to_string(),
                "What would a good outcome look like in 90 days?".to_string(),
            ],
        ),
        Section::generic(
            "next_steps",
            "Next Steps",
            vec![
                "Send a recap with agreed actions within 24 hours".to_string(),
                "Confirm owners and dates for each follow-up".to_string(),
                "Schedule the next conversation before hanging up".to_string(),
            ],
        ),
    ]
}

/// Notes plus the four generic sections.
pub fn build_base(signals: &MeetingSignals) -> PrepSheet {
    let mut sections = vec![Section::notes("")];
    sections.extend(generic_sections(&signals.title, &signals.attendees));
    PrepSheet {
        meta: meta_for(signals, None),
        sections,
        generated_at: Utc::now().to_rfc3339(),
    }
}

/// Relationship context for the enriched tier.
#[derive(Debug, Clone)]
pub struct EnrichedContext<'a> {
    pub signals: &'a MeetingSignals,
    pub account: &'a DbAccount,
    pub contacts: &'a [DbContact],
    /// Open opportunities first.
    pub opportunities: &'a [DbOpportunity],
    pub history: &'a CallHistory,
}

fn crm_insights(ctx: &EnrichedContext<'_>) -> Section {
    let account = ctx.account;
    let mut items = vec![format!("Account: {}", account.name)];
    items.push(format!(
        "Industry: {}",
        account.industry.as_deref().unwrap_or("unknown")
    ));
    if let Some(count) = account.employee_count {
        items.push(format!("Company size: {} employees", count));
    }
    if ctx.contacts.is_empty() {
        items.push("Known contacts: none on record".to_string());
    } else {
        let names: Vec<String> = ctx
            .contacts
            .iter()
            .map(|c| match c.title.as_deref() {
                Some(t) if !t.trim().is_empty() => format!("{} ({}, {})", c.name, t.trim(), c.email),
                _ => format!("{} ({})", c.name, c.email),
            })
            .collect();
        items.push(format!("Known contacts: {}", names.join("; ")));
    }
    match ctx.opportunities.first() {
        Some(opp) => {
            let amount = opp
                .amount
                .map(|a| format!(", {:.0}", a))
                .unwrap_or_default();
            items.push(format!(
                "Opportunity: {} ({}{})",
                opp.name,
                opp.stage.as_deref().unwrap_or("no stage"),
                amount
            ));
        }
        None => items.push("Opportunity: none on record".to_string()),
    }
    Section::generic(CRM_INSIGHTS_SECTION_ID, "CRM Insights", items)
}

fn previous_conversations(history: &CallHistory) -> Section {
    let mut items = Vec::new();
    for entry in &history.entries {
        let date = entry
            .scheduled_start
            .as_deref()
            .map(|s| s.chars().take(10).collect::<String>())
            .unwrap_or_else(|| "undated".to_string());
        let mut line = format!("{} — {}", date, entry.title);
        if let Some(summary) = entry.prep_summary.as_deref() {
            if let Some(first) = summary.lines().nth(1).or_else(|| summary.lines().next()) {
                line.push_str(&format!(" ({})", first.trim()));
            }
        }
        items.push(line);
        for note in entry.notes.iter().take(2) {
            let snippet: String = note.trim().chars().take(200).collect();
            items.push(format!("  Note: {}", snippet));
        }
    }
    if items.is_empty() {
        items.push(format!(
            "No prior calls in the last {} days",
            history.lookback_days
        ));
    }
    Section::generic(
        PREVIOUS_CONVERSATIONS_SECTION_ID,
        "Previous Conversations",
        items,
    )
}

/// Base sheet with CRM Insights and Previous Conversations after the notes.
pub fn build_enriched(ctx: &EnrichedContext<'_>) -> PrepSheet {
    let mut sheet = build_base(ctx.signals);
    sheet.meta = meta_for(ctx.signals, Some(ctx.account));
    sheet.sections.insert(1, crm_insights(ctx));
    sheet
        .sections
        .insert(2, previous_conversations(ctx.history));
    sheet
}

/// Notes only. Cannot fail.
pub fn build_emergency() -> PrepSheet {
    PrepSheet {
        meta: SheetMeta {
            title: DEFAULT_MEETING_TITLE.to_string(),
            time_range: String::new(),
            attendees: Vec::new(),
            account: None,
        },
        sections: vec![Section::notes("")],
        generated_at: Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_account, sample_contact, sample_opportunity};
    use crate::prepare::history::CallHistoryEntry;
    use crate::prepare::signals::extract_signals;
    use crate::types::{AttendeeEntry, MeetingRecord};

    fn signals() -> MeetingSignals {
        extract_signals(&MeetingRecord {
            id: "evt-1".into(),
            title: Some("Acme Corp — Discovery".into()),
            start: Some("2026-03-02T15:00:00Z".into()),
            end: Some("2026-03-02T15:45:00Z".into()),
            attendees: vec![AttendeeEntry::address("ceo@acme.com")],
            ..Default::default()
        })
    }

    fn assert_notes_first(sheet: &PrepSheet) {
        let first = &sheet.sections[0];
        assert_eq!(first.id, "notes");
        assert!(first.editable);
        assert!(first.expanded);
        assert_eq!(sheet.sections.iter().filter(|s| s.id == "notes").count(), 1);
    }

    #[test]
    fn test_base_sheet_layout() {
        let sheet = build_base(&signals());
        assert_notes_first(&sheet);
        let ids: Vec<&str> = sheet.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["notes", "objectives", "suggested_agenda", "discovery_questions", "next_steps"]
        );
        assert!(sheet.sections[1].items[0].contains("Acme Corp — Discovery"));
        assert_eq!(sheet.meta.time_range, "2026-03-02 15:00–15:45 UTC");
    }

    #[test]
    fn test_enriched_inserts_crm_after_notes() {
        let account = sample_account("a1", "Acme Corp", Some("acme.com"));
        let contacts = vec![sample_contact("c1", "a1", "Jane", "ceo@acme.com")];
        let opps = vec![sample_opportunity("o1", "a1", "Acme Expansion", "Negotiation/Review", Some(80_000.0))];
        let history = CallHistory {
            lookback_days: 180,
            entries: vec![CallHistoryEntry {
                call_id: "call-0".into(),
                title: "Acme intro".into(),
                scheduled_start: Some("2026-01-05T15:00:00+00:00".into()),
                status: "confirmed".into(),
                account_name: Some("Acme Corp".into()),
                contact_emails: vec!["ceo@acme.com".into()],
                prep_summary: None,
                notes: vec!["Asked about SSO".into()],
            }],
        };
        let signals = signals();
        let sheet = build_enriched(&EnrichedContext {
            signals: &signals,
            account: &account,
            contacts: &contacts,
            opportunities: &opps,
            history: &history,
        });
        assert_notes_first(&sheet);
        assert_eq!(sheet.sections[1].id, "crm_insights");
        assert_eq!(sheet.sections[2].id, "previous_conversations");
        assert_eq!(sheet.sections[3].id, "objectives");
        let crm = &sheet.sections[1].items;
        assert!(crm.contains(&"Account: Acme Corp".to_string()));
        assert!(crm.iter().any(|i| i.contains("Jane (ceo@acme.com)")));
        assert!(crm.iter().any(|i| i.starts_with("Opportunity: Acme Expansion (Negotiation/Review")));
        assert_eq!(sheet.sections[2].items[0], "2026-01-05 — Acme intro");
        assert_eq!(sheet.meta.account.as_ref().unwrap().name, "Acme Corp");
    }

    #[test]
    fn test_emergency_is_notes_only() {
        let sheet = build_emergency();
        assert_notes_first(&sheet);
        assert_eq!(sheet.sections.len(), 1);
    }

    #[test]
    fn test_decide_tier() {
        assert_eq!(decide_tier(false, true, true), Tier::Emergency);
        assert_eq!(decide_tier(true, false, false), Tier::Base { ai: false });
        assert_eq!(decide_tier(true, false, true), Tier::Base { ai: true });
        assert_eq!(decide_tier(true, true, false), Tier::Enriched { ai: false });
        assert!(decide_tier(true, true, true).ai_generated());
        assert!(!Tier::Emergency.ai_generated());
    }

    #[test]
    fn test_generated_overlay_rules() {
        let mut sheet = build_base(&signals());
        sheet.carry_notes("my notes");
        sheet.apply_generated(&[
            GeneratedSection {
                id: "notes".into(),
                title: "Notes".into(),
                items: vec![],
                body: "overwritten?".into(),
            },
            GeneratedSection {
                id: "Discovery Questions".into(),
                title: "".into(),
                items: vec!["What breaks if SSO slips?".into()],
                body: String::new(),
            },
            GeneratedSection {
                id: "risks".into(),
                title: "".into(),
                items: vec!["Budget freeze".into()],
                body: String::new(),
            },
        ]);
        assert_notes_first(&sheet);
        assert_eq!(sheet.notes_body(), "my notes");
        assert_eq!(
            sheet.section("discovery_questions").unwrap().items,
            vec!["What breaks if SSO slips?"]
        );
        assert_eq!(sheet.section("discovery_questions").unwrap().title, "Discovery Questions");
        assert_eq!(sheet.sections[1].id, "risks");
        assert_eq!(sheet.sections[1].title, "Risks");
    }

    #[test]
    fn test_parse_generated_json_and_plain_text() {
        let fenced = "```json\n{\"sections\":[{\"id\":\"objectives\",\"items\":[\"Close SSO gap\"]}]}\n```";
        let parsed = parse_generated(fenced);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "objectives");

        let plain = parse_generated("Focus on the SSO rollout {maybe}.");
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].id, "ai_briefing");

        assert!(parse_generated("   ").is_empty());
    }

    #[test]
    fn test_ensure_notes_first_repairs_order() {
        let mut sheet = build_base(&signals());
        let notes = sheet.sections.remove(0);
        sheet.sections.push(Section {
            editable: false,
            body: "kept".into(),
            ..notes
        });
        sheet.ensure_notes_first();
        assert_notes_first(&sheet);
        assert_eq!(sheet.notes_body(), "kept");
    }

    #[test]
    fn test_emphasis_skips_notes() {
        let mut sheet = build_base(&signals());
        sheet.apply_emphasis(&["discovery_questions", "notes"]);
        assert!(!sheet.sections[0].emphasis);
        assert!(sheet.section("discovery_questions").unwrap().emphasis);
        assert!(!sheet.section("objectives").unwrap().emphasis);
    }
}
