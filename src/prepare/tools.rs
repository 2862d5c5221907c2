//! Context aggregation: the tool registry offered to the generation step.
//!
//! The set of tools is closed. Each tool has a typed, schema-described
//! argument struct; the generator picks tools by name and the registry
//! validates arguments, runs the handler and hands back a JSON payload.
//! Handlers never raise: an unknown tool or invalid arguments yield an
//! `{"error": ...}` payload, and a failing collaborator yields the tool's
//! empty payload with the error attached, so generation continues with less
//! context.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PrepError;
use crate::providers::{
    bounded, GenerationReply, GenerationRequest, MessageQuery, ToolDescriptor, ToolExchange,
    ToolInvocation,
};
use crate::state::PrepServices;

use super::history::{search_call_history, HistoryQuery};

// =============================================================================
// Tool names
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToolName {
    GetCalendarEvent,
    ListUpcomingMeetings,
    LookupContact,
    LookupAccount,
    LookupOpportunities,
    SearchCallHistory,
    SearchNotes,
    SearchMessageThreads,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        ToolName::GetCalendarEvent,
        ToolName::ListUpcomingMeetings,
        ToolName::LookupContact,
        ToolName::LookupAccount,
        ToolName::LookupOpportunities,
        ToolName::SearchCallHistory,
        ToolName::SearchNotes,
        ToolName::SearchMessageThreads,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetCalendarEvent => "get_calendar_event",
            ToolName::ListUpcomingMeetings => "list_upcoming_meetings",
            ToolName::LookupContact => "lookup_contact",
            ToolName::LookupAccount => "lookup_account",
            ToolName::LookupOpportunities => "lookup_opportunities",
            ToolName::SearchCallHistory => "search_call_history",
            ToolName::SearchNotes => "search_notes",
            ToolName::SearchMessageThreads => "search_message_threads",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::GetCalendarEvent => {
                "Fetch one calendar event by id, including attendees, description and location."
            }
            ToolName::ListUpcomingMeetings => "List the owner's next upcoming calendar meetings.",
            ToolName::LookupContact => {
                "Look up a known contact by email address, with the account they belong to."
            }
            ToolName::LookupAccount => {
                "Look up a known account by exact name or website domain, with its contacts."
            }
            ToolName::LookupOpportunities => {
                "List opportunities (stage, amount, close date) for an account by id or name."
            }
            ToolName::SearchCallHistory => {
                "Search prior calls by contact email, account name or domain, with prep notes."
            }
            ToolName::SearchNotes => "Full-text search over the owner's saved notes.",
            ToolName::SearchMessageThreads => {
                "Search recent message threads by text or participant email."
            }
        }
    }

    fn parameters(&self) -> Value {
        let schema = match self {
            ToolName::GetCalendarEvent => schemars::schema_for!(GetCalendarEventArgs),
            ToolName::ListUpcomingMeetings => schemars::schema_for!(ListUpcomingMeetingsArgs),
            ToolName::LookupContact => schemars::schema_for!(LookupContactArgs),
            ToolName::LookupAccount => schemars::schema_for!(LookupAccountArgs),
            ToolName::LookupOpportunities => schemars::schema_for!(LookupOpportunitiesArgs),
            ToolName::SearchCallHistory => schemars::schema_for!(SearchCallHistoryArgs),
            ToolName::SearchNotes => schemars::schema_for!(SearchNotesArgs),
            ToolName::SearchMessageThreads => schemars::schema_for!(SearchMessageThreadsArgs),
        };
        serde_json::to_value(schema).unwrap_or_else(|_| json!({ "type": "object" }))
    }

    /// Payload returned when the tool's collaborator fails.
    fn empty_payload(&self) -> Value {
        match self {
            ToolName::GetCalendarEvent => json!({ "event": null }),
            ToolName::LookupContact => json!({ "contact": null, "account": null }),
            ToolName::LookupAccount => json!({ "account": null, "contacts": [] }),
            ToolName::ListUpcomingMeetings
            | ToolName::LookupOpportunities
            | ToolName::SearchCallHistory
            | ToolName::SearchNotes
            | ToolName::SearchMessageThreads => json!({ "results": [] }),
        }
    }
}

// =============================================================================
// Tool parameter types
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetCalendarEventArgs {
    #[schemars(description = "Calendar event id")]
    pub event_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListUpcomingMeetingsArgs {
    #[schemars(description = "Max meetings (default 5, max 20)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LookupContactArgs {
    #[schemars(description = "Contact email address")]
    pub email: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LookupAccountArgs {
    #[schemars(description = "Exact account name")]
    pub name: Option<String>,
    #[schemars(description = "Website domain, e.g. acme.com")]
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LookupOpportunitiesArgs {
    #[schemars(description = "Account id")]
    pub account_id: Option<String>,
    #[schemars(description = "Exact account name, used when no id is given")]
    pub account_name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchCallHistoryArgs {
    pub contact_email: Option<String>,
    pub account_name: Option<String>,
    pub domain: Option<String>,
    #[schemars(description = "How many days back to search (capped by configuration)")]
    pub lookback_days: Option<u32>,
    #[schemars(description = "Max calls (capped by configuration)")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchNotesArgs {
    #[schemars(description = "Search text")]
    pub query: String,
    #[schemars(description = "Max notes (default 10, max 25)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchMessageThreadsArgs {
    pub query: Option<String>,
    pub participant_email: Option<String>,
    #[schemars(description = "Max threads (default 5, max 20)")]
    pub limit: Option<usize>,
}

// =============================================================================
// Registry
// =============================================================================

/// Request-scoped context handed to every handler.
pub struct ToolContext<'a> {
    pub services: &'a PrepServices,
    /// Reference time for lookback windows (the meeting start).
    pub anchor: DateTime<Utc>,
}

/// Closed name → tool map.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, ToolName>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: ToolName::ALL.iter().map(|t| (t.as_str(), *t)).collect(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<ToolName> {
        self.tools.get(name).copied()
    }

    /// Descriptions advertised to the generator.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|t| ToolDescriptor {
                name: t.as_str().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Execute one invocation. Always returns a payload.
    pub async fn dispatch(&self, ctx: &ToolContext<'_>, invocation: &ToolInvocation) -> Value {
        let Some(tool) = self.lookup(&invocation.name) else {
            log::warn!("tools: unknown tool '{}'", invocation.name);
            return error_payload(json!({}), &PrepError::UnknownTool(invocation.name.clone()));
        };
        log::debug!("tools: dispatching {} ({})", tool.as_str(), invocation.id);

        match execute(ctx, tool, &invocation.arguments).await {
            Ok(payload) => payload,
            Err(e @ PrepError::InvalidToolArguments { .. }) => {
                log::warn!("tools: {}", e);
                error_payload(json!({}), &e)
            }
            Err(e) => {
                log::warn!("tools: {} failed, returning empty result: {}", tool.as_str(), e);
                error_payload(tool.empty_payload(), &e)
            }
        }
    }
}

fn error_payload(mut base: Value, err: &PrepError) -> Value {
    if let Some(obj) = base.as_object_mut() {
        obj.insert("error".to_string(), Value::String(err.to_string()));
        obj.insert("errorKind".to_string(), Value::String(err.kind().to_string()));
    }
    base
}

/// Deserialize arguments for `tool`. A missing/null argument object counts
/// as `{}`.
fn parse_args<T: DeserializeOwned>(tool: ToolName, arguments: &Value) -> Result<T, PrepError> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments).map_err(|e| PrepError::InvalidToolArguments {
        tool: tool.as_str().to_string(),
        message: e.to_string(),
    })
}

fn invalid(tool: ToolName, message: &str) -> PrepError {
    PrepError::InvalidToolArguments {
        tool: tool.as_str().to_string(),
        message: message.to_string(),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn execute(ctx: &ToolContext<'_>, tool: ToolName, arguments: &Value) -> Result<Value, PrepError> {
    match tool {
        ToolName::GetCalendarEvent => get_calendar_event(ctx, parse_args(tool, arguments)?).await,
        ToolName::ListUpcomingMeetings => {
            list_upcoming_meetings(ctx, parse_args(tool, arguments)?).await
        }
        ToolName::LookupContact => lookup_contact(ctx, parse_args(tool, arguments)?).await,
        ToolName::LookupAccount => lookup_account(ctx, parse_args(tool, arguments)?).await,
        ToolName::LookupOpportunities => {
            lookup_opportunities(ctx, parse_args(tool, arguments)?).await
        }
        ToolName::SearchCallHistory => search_history(ctx, parse_args(tool, arguments)?),
        ToolName::SearchNotes => search_notes(ctx, parse_args(tool, arguments)?),
        ToolName::SearchMessageThreads => {
            search_message_threads(ctx, parse_args(tool, arguments)?).await
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn get_calendar_event(ctx: &ToolContext<'_>, args: GetCalendarEventArgs) -> Result<Value, PrepError> {
    let s = ctx.services;
    let event = bounded(
        "calendar",
        s.settings.call_timeout_secs,
        s.calendar.get_event_by_id(&s.owner_id, args.event_id.trim()),
    )
    .await?;
    Ok(json!({ "event": event }))
}

async fn list_upcoming_meetings(
    ctx: &ToolContext<'_>,
    args: ListUpcomingMeetingsArgs,
) -> Result<Value, PrepError> {
    let s = ctx.services;
    let limit = args.limit.unwrap_or(5).clamp(1, 20);
    let events = bounded(
        "calendar",
        s.settings.call_timeout_secs,
        s.calendar.list_upcoming(&s.owner_id, limit),
    )
    .await?;
    Ok(json!({ "results": events }))
}

async fn lookup_contact(ctx: &ToolContext<'_>, args: LookupContactArgs) -> Result<Value, PrepError> {
    let s = ctx.services;
    let secs = s.settings.call_timeout_secs;
    let contact = bounded(
        "relationship store",
        secs,
        s.relationships.contact_by_email(&args.email),
    )
    .await?;
    let account = match contact.as_ref().and_then(|c| c.account_id.as_deref()) {
        Some(account_id) => {
            bounded("relationship store", secs, s.relationships.account(account_id)).await?
        }
        None => None,
    };
    Ok(json!({ "contact": contact, "account": account }))
}

async fn lookup_account(ctx: &ToolContext<'_>, args: LookupAccountArgs) -> Result<Value, PrepError> {
    let s = ctx.services;
    let secs = s.settings.call_timeout_secs;
    let name = non_blank(args.name);
    let domain = non_blank(args.domain);
    if name.is_none() && domain.is_none() {
        return Err(invalid(ToolName::LookupAccount, "one of name or domain is required"));
    }

    let mut account = None;
    if let Some(name) = name.as_deref() {
        account = bounded("relationship store", secs, s.relationships.account_by_name(name)).await?;
    }
    if account.is_none() {
        if let Some(domain) = domain {
            account = bounded(
                "relationship store",
                secs,
                s.relationships.accounts_by_domains(&[domain.to_lowercase()]),
            )
            .await?
            .into_iter()
            .next();
        }
    }
    let contacts = match account.as_ref() {
        Some(a) => {
            bounded("relationship store", secs, s.relationships.contacts_for_account(&a.id)).await?
        }
        None => Vec::new(),
    };
    Ok(json!({ "account": account, "contacts": contacts }))
}

async fn lookup_opportunities(
    ctx: &ToolContext<'_>,
    args: LookupOpportunitiesArgs,
) -> Result<Value, PrepError> {
    let s = ctx.services;
    let secs = s.settings.call_timeout_secs;
    let account_id = match (non_blank(args.account_id), non_blank(args.account_name)) {
        (Some(id), _) => Some(id),
        (None, Some(name)) => bounded("relationship store", secs, s.relationships.account_by_name(&name))
            .await?
            .map(|a| a.id),
        (None, None) => {
            return Err(invalid(
                ToolName::LookupOpportunities,
                "one of account_id or account_name is required",
            ))
        }
    };
    let opportunities = match account_id {
        Some(id) => bounded("relationship store", secs, s.relationships.opportunities_for_account(&id)).await?,
        None => Vec::new(),
    };
    Ok(json!({ "results": opportunities }))
}

fn search_history(ctx: &ToolContext<'_>, args: SearchCallHistoryArgs) -> Result<Value, PrepError> {
    let s = ctx.services;
    let query = HistoryQuery {
        contact_email: non_blank(args.contact_email),
        account_name: non_blank(args.account_name),
        domain: non_blank(args.domain),
        lookback_days: args.lookback_days,
        limit: args.limit,
        ..Default::default()
    };
    if query.contact_email.is_none() && query.account_name.is_none() && query.domain.is_none() {
        return Err(invalid(
            ToolName::SearchCallHistory,
            "one of contact_email, account_name or domain is required",
        ));
    }
    let history = search_call_history(&s.db, &s.owner_id, &s.settings, &query, ctx.anchor)?;
    Ok(json!({ "lookbackDays": history.lookback_days, "results": history.entries }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NoteHit {
    id: String,
    title: String,
    body: String,
    meeting_id: Option<String>,
    updated_at: String,
    score: usize,
}

fn search_notes(ctx: &ToolContext<'_>, args: SearchNotesArgs) -> Result<Value, PrepError> {
    let s = ctx.services;
    if args.query.trim().is_empty() {
        return Err(invalid(ToolName::SearchNotes, "query must not be empty"));
    }
    let limit = args.limit.unwrap_or(10).clamp(1, 25);
    let hits = s.db.lock().search_notes(&s.owner_id, &args.query, limit)?;
    let results: Vec<NoteHit> = hits
        .into_iter()
        .map(|h| NoteHit {
            id: h.note.id,
            title: h.note.title,
            body: h.note.body,
            meeting_id: h.note.meeting_id,
            updated_at: h.note.updated_at,
            score: h.score,
        })
        .collect();
    Ok(json!({ "results": results }))
}

async fn search_message_threads(
    ctx: &ToolContext<'_>,
    args: SearchMessageThreadsArgs,
) -> Result<Value, PrepError> {
    let s = ctx.services;
    let query = MessageQuery {
        query: non_blank(args.query),
        participant_email: non_blank(args.participant_email).map(|e| e.to_lowercase()),
        since: (ctx.anchor - Duration::days(s.settings.message_lookback_days as i64)).to_rfc3339(),
        until: None,
        limit: args.limit.unwrap_or(5).clamp(1, 20),
    };
    if query.query.is_none() && query.participant_email.is_none() {
        return Err(invalid(
            ToolName::SearchMessageThreads,
            "one of query or participant_email is required",
        ));
    }
    let threads = bounded(
        "message search",
        s.settings.call_timeout_secs,
        s.messages.search_threads(&query),
    )
    .await?;
    Ok(json!({ "results": threads }))
}

// =============================================================================
// Bounded tool loop
// =============================================================================

/// Final text from a generation run, with loop bookkeeping.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub text: String,
    pub rounds: usize,
    pub tool_calls: usize,
}

/// Run generation, executing requested tools between rounds.
///
/// With a registry, up to `max_tool_rounds` rounds may request tools; the
/// next request withholds them and must produce final output. Without a
/// registry no tools are offered at all. A generator that still asks for
/// tools when none are offered fails the run with `ToolLoopExhausted`.
pub async fn run_generation(
    ctx: &ToolContext<'_>,
    registry: Option<&ToolRegistry>,
    system: &str,
    prompt: &str,
) -> Result<GenerationOutcome, PrepError> {
    let s = ctx.services;
    let max_rounds = if registry.is_some() {
        s.settings.max_tool_rounds
    } else {
        0
    };
    let descriptors = registry.map(|r| r.descriptors()).unwrap_or_default();
    let mut exchanges: Vec<ToolExchange> = Vec::new();

    for round in 0..=max_rounds {
        let offer_tools = round < max_rounds;
        let request = GenerationRequest {
            system: system.to_string(),
            prompt: prompt.to_string(),
            tools: if offer_tools { descriptors.clone() } else { Vec::new() },
            exchanges: exchanges.clone(),
        };

        let reply = bounded(
            "generation",
            s.settings.generation_timeout_secs,
            s.generator.generate(&request),
        )
        .await?;

        match reply {
            GenerationReply::Final(text) => {
                log::info!(
                    "generation: final output after {} round(s), {} tool call(s)",
                    round + 1,
                    exchanges.len()
                );
                return Ok(GenerationOutcome {
                    text,
                    rounds: round + 1,
                    tool_calls: exchanges.len(),
                });
            }
            GenerationReply::ToolCalls(calls) => {
                let Some(registry) = registry.filter(|_| offer_tools) else {
                    return Err(PrepError::ToolLoopExhausted(max_rounds));
                };
                for invocation in calls {
                    let output = registry.dispatch(ctx, &invocation).await;
                    exchanges.push(ToolExchange { invocation, output });
                }
            }
        }
    }

    Err(PrepError::ToolLoopExhausted(max_rounds))
}
