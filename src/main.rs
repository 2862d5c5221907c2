//! callprep — generate a call prep sheet for a meeting from the command line.
//!
//! Runs the full pipeline against the local SQLite store with offline
//! collaborators: calendar events come from a JSON file, message search is
//! empty, and generation is unavailable, so sheets are built from templates
//! and stored context.
//!
//! Usage:
//!   callprep generate meeting.json [--regenerate]
//!   callprep generate --event evt-123 --calendar events.json
//!   callprep ensure-call meeting.json

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};

use callprep_lib::error::PrepError;
use callprep_lib::prepare::orchestrate::{
    ensure_call_for_meeting, generate_prep_sheet, GenerationMode, MeetingRef, PrepRequest,
};
use callprep_lib::prepare::signals::extract_signals;
use callprep_lib::providers::{
    CalendarService, GenerationReply, GenerationRequest, GenerationService, MessageQuery,
    MessageSearch, MessageThread, SqliteRelationshipStore,
};
use callprep_lib::state::{load_config, load_config_from, open_database, PrepServices};
use callprep_lib::types::MeetingRecord;

#[derive(Debug, Parser)]
#[command(name = "callprep")]
#[command(about = "Turn a calendar meeting into a call prep sheet")]
struct Cli {
    /// Config file (defaults to ~/.callprep/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON array of calendar events served to the pipeline.
    #[arg(long, global = true)]
    calendar: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate a prep sheet and print the result as JSON.
    Generate {
        /// Meeting record JSON file.
        #[arg(required_unless_present_any = ["event", "call"])]
        meeting: Option<PathBuf>,
        /// Calendar event id to look up instead of a file.
        #[arg(long, conflicts_with_all = ["meeting", "call"])]
        event: Option<String>,
        /// Local call id to regenerate from.
        #[arg(long, conflicts_with_all = ["meeting", "event"])]
        call: Option<String>,
        /// Keep the account stored with the previous prep.
        #[arg(long)]
        regenerate: bool,
    },
    /// Map a meeting to its local call record and print the call id.
    EnsureCall {
        /// Meeting record JSON file.
        meeting: PathBuf,
    },
}

// =============================================================================
// Offline collaborators
// =============================================================================

/// Calendar backed by a JSON array of meeting records.
struct FileCalendar {
    events: Vec<MeetingRecord>,
}

impl FileCalendar {
    fn load(path: Option<&Path>) -> Result<Self> {
        let events = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read calendar file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse calendar file {}", path.display()))?
            }
            None => Vec::new(),
        };
        Ok(Self { events })
    }
}

#[async_trait]
impl CalendarService for FileCalendar {
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
        let now = chrono::Utc::now();
        let mut upcoming: Vec<(chrono::DateTime<chrono::Utc>, &MeetingRecord)> = self
            .events
            .iter()
            .filter_map(|e| {
                let start = e
                    .start
                    .as_deref()
                    .and_then(callprep_lib::prepare::signals::parse_meeting_time)?;
                (start >= now).then_some((start, e))
            })
            .collect();
        upcoming.sort_by_key(|(start, _)| *start);
        Ok(upcoming.into_iter().take(limit).map(|(_, e)| e.clone()).collect())
    }
}

struct NoMessages;

#[async_trait]
impl MessageSearch for NoMessages {
    async fn search_threads(&self, _query: &MessageQuery) -> Result<Vec<MessageThread>, PrepError> {
        Ok(Vec::new())
    }
}

struct UnavailableGenerator;

#[async_trait]
impl GenerationService for UnavailableGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationReply, PrepError> {
        Err(PrepError::unavailable("generation", "no generation provider configured"))
    }
}

fn read_meeting(path: &Path) -> Result<MeetingRecord> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read meeting file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse meeting file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .map_err(|e| anyhow!("Failed to load config: {e}"))?;
    let db = open_database(&config)
        .map_err(|e| anyhow!("Failed to open database: {e}"))?
        .into_shared();

    let services = PrepServices {
        owner_id: config.owner_id.clone(),
        relationships: Arc::new(SqliteRelationshipStore::new(db.clone())),
        db,
        calendar: Arc::new(FileCalendar::load(cli.calendar.as_deref())?),
        messages: Arc::new(NoMessages),
        generator: Arc::new(UnavailableGenerator),
        settings: config.pipeline.clone(),
    };

    match cli.command {
        Commands::Generate {
            meeting,
            event,
            call,
            regenerate,
        } => {
            let meeting = match (meeting, event, call) {
                (Some(path), _, _) => MeetingRef::Inline(read_meeting(&path)?),
                (None, Some(event), _) => MeetingRef::Event(event),
                (None, None, Some(call)) => MeetingRef::Call(call),
                (None, None, None) => return Err(anyhow!("No meeting given")),
            };
            let mode = if regenerate {
                GenerationMode::Regenerate
            } else {
                GenerationMode::Auto
            };
            let result = generate_prep_sheet(&services, PrepRequest { meeting, mode }).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::EnsureCall { meeting } => {
            let record = read_meeting(&meeting)?;
            let ensured = ensure_call_for_meeting(&services, &extract_signals(&record))?;
            println!("{}", ensured.call_id);
            log::info!(
                "ensure-call: {} ({})",
                ensured.call_id,
                if ensured.created { "created" } else { "existing" }
            );
        }
    }

    Ok(())
}
