use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::parser::filter::RuleTable;
use crate::parser::window::{WindowMode, DEFAULT_MARGIN};
use crate::persist::deadletter::ProcessedAction;

const DEFAULT_CONFIG_NAME: &str = "harvester";
const ENV_PREFIX: &str = "HARVEST";

/// Everything a run needs, resolved once at startup and passed down explicitly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Extractor identifiers in dispatch order.
    pub extractors: Vec<String>,
    /// Per-extractor overrides of the built-in boilerplate rules.
    pub rules: BTreeMap<String, RuleTable>,
    pub terms: Vec<String>,
    pub window_margin: usize,
    pub window_mode: WindowMode,
    pub extraction_workers: usize,
    pub persist_workers: usize,
    /// Keep the whole filtered page when no term matched instead of dropping it.
    pub keep_unmatched_pages: bool,
    pub max_title_len: usize,
    pub max_teaser_len: usize,
    pub language: String,
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub processed_on_success: ProcessedAction,
    pub abort_on_persist_failure: bool,
    pub fetch_concurrency: usize,
    pub fetch_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            extractors: crate::parser::registry::DEFAULT_ORDER
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rules: BTreeMap::new(),
            terms: Vec::new(),
            window_margin: DEFAULT_MARGIN,
            window_mode: WindowMode::Verbatim,
            extraction_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            persist_workers: 4,
            keep_unmatched_pages: false,
            max_title_len: 200,
            max_teaser_len: 300,
            language: "de".to_string(),
            db_path: PathBuf::from("data/harvester.sqlite"),
            backup_dir: PathBuf::from("data/backup"),
            processed_dir: PathBuf::from("data/backup/processed"),
            processed_on_success: ProcessedAction::Move,
            abort_on_persist_failure: false,
            fetch_concurrency: 10,
            fetch_retries: 3,
        }
    }
}

impl Settings {
    /// Defaults, then `harvester.toml` (or the explicit `path`), then
    /// `HARVEST__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("extractors")
                    .with_list_parse_key("terms"),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.extraction_workers == 0 || self.persist_workers == 0 {
            return Err(ConfigError::Message(
                "worker pool sizes must be at least 1".to_string(),
            ));
        }
        if self.max_teaser_len == 0 {
            return Err(ConfigError::Message("max_teaser_len must be positive".to_string()));
        }
        Ok(())
    }
}
