use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::{PrepDb, SharedDb};
use crate::providers::{CalendarService, GenerationService, MessageSearch, RelationshipStore};
use crate::types::{Config, PipelineSettings};

/// Everything one pipeline run needs: the shared store, the collaborators and
/// the bounds. Cheap to clone; requests share nothing else.
#[derive(Clone)]
pub struct PrepServices {
    pub owner_id: String,
    pub db: SharedDb,
    pub calendar: Arc<dyn CalendarService>,
    pub relationships: Arc<dyn RelationshipStore>,
    pub messages: Arc<dyn MessageSearch>,
    pub generator: Arc<dyn GenerationService>,
    pub settings: PipelineSettings,
}

/// Get the canonical config file path (~/.callprep/config.json)
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".callprep").join("config.json"))
}

/// Load config from the canonical path. A missing file yields defaults.
pub fn load_config() -> Result<Config, String> {
    load_config_from(&config_path()?)
}

/// Load config from an explicit path. A missing file yields defaults; an
/// unreadable or unparsable one is an error.
pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    if config.owner_id.trim().is_empty() {
        return Err("Config ownerId must not be empty".to_string());
    }

    Ok(config)
}

/// Open the database named by the config, or the default location.
pub fn open_database(config: &Config) -> Result<PrepDb, String> {
    let opened = match &config.database_path {
        Some(path) => PrepDb::open_at(PathBuf::from(path)),
        None => PrepDb::open(),
    };
    opened.map_err(|e| format!("Failed to open database: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.owner_id, "local");
        assert_eq!(config.pipeline.generation_timeout_secs, 60);
    }

    #[test]
    fn test_unparsable_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn test_blank_owner_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"ownerId": "  "}"#).unwrap();
        assert!(load_config_from(&path).is_err());
    }

    #[test]
    fn test_open_database_at_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: Some(dir.path().join("nested/prep.db").display().to_string()),
            ..Config::default()
        };
        let db = open_database(&config).unwrap();
        assert!(db.get_all_accounts().unwrap().is_empty());
    }
}
