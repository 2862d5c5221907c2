//! Prep store schema.
//!
//! Schema steps are SQL files compiled into the binary. `schema_version`
//! records one row per applied step; opening a store applies whatever it has
//! not seen yet, each step in its own transaction, and refuses a store that a
//! newer callprep has already moved past.

use rusqlite::Connection;

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[SchemaStep {
    version: 1,
    name: "accounts, contacts, calls, mappings, prep records, notes",
    sql: include_str!("migrations/001_baseline.sql"),
}];

fn latest_known() -> u32 {
    SCHEMA_STEPS.iter().map(|s| s.version).max().unwrap_or(0)
}

fn applied_version(conn: &Connection) -> Result<u32, String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to create schema_version table: {}", e))?;
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema version: {}", e))
}

/// Bring the store up to the latest schema. Returns how many steps ran.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    let applied = applied_version(conn)?;
    let latest = latest_known();
    if applied > latest {
        return Err(format!(
            "Prep store is at schema v{} but this callprep only knows up to v{}; upgrade callprep",
            applied, latest
        ));
    }

    let mut ran = 0;
    for step in SCHEMA_STEPS.iter().filter(|s| s.version > applied) {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| format!("Schema v{}: could not start transaction: {}", step.version, e))?;
        tx.execute_batch(step.sql)
            .map_err(|e| format!("Schema v{} ({}) failed: {}", step.version, step.name, e))?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [step.version])
            .map_err(|e| format!("Schema v{}: could not record version: {}", step.version, e))?;
        tx.commit()
            .map_err(|e| format!("Schema v{}: commit failed: {}", step.version, e))?;
        log::info!("prep store: schema v{} applied ({})", step.version, step.name);
        ran += 1;
    }
    Ok(ran)
}
