use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::default_database_path;
use crate::pipeline::StageSettings;
use crate::queue::QueuePolicy;
use crate::worker::SchedulerConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    /// Falls back to `~/.casepipe/data/casepipe.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Mirroring is disabled when absent.
    #[serde(default)]
    pub mirror_database_path: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub reset_attempts_on_advance: bool,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_similar_cases_limit")]
    pub similar_cases_limit: usize,
    #[serde(default = "default_prediction_history_limit")]
    pub prediction_history_limit: u64,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_stage_timeout_secs() -> u64 {
    300
}

fn default_lease_timeout_secs() -> u64 {
    900
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_similar_cases_limit() -> usize {
    5
}

fn default_prediction_history_limit() -> u64 {
    1500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            database_path: None,
            mirror_database_path: None,
            worker_id: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            reset_attempts_on_advance: false,
            stage_timeout_secs: default_stage_timeout_secs(),
            lease_timeout_secs: default_lease_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            chunking: ChunkingConfig::default(),
            translation: TranslationConfig::default(),
            embedding: EmbeddingConfig::default(),
            similar_cases_limit: default_similar_cases_limit(),
            prediction_history_limit: default_prediction_history_limit(),
        }
    }
}

impl Config {
    /// The pipeline database path, or `None` when no home directory exists
    /// to hold the default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => default_database_path(),
        }
    }

    pub fn mirror_path(&self) -> Option<PathBuf> {
        self.mirror_database_path.as_ref().map(PathBuf::from)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            max_retries: self.max_retries,
            reset_attempts_on_advance: self.reset_attempts_on_advance,
        }
    }

    pub fn stage_settings(&self) -> StageSettings {
        StageSettings {
            chunk_size: self.chunking.size,
            chunk_overlap: self.chunking.overlap,
            target_languages: self.translation.target_languages.clone(),
            similar_cases_limit: self.similar_cases_limit,
            prediction_history_limit: self.prediction_history_limit,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            worker_id: self.worker_id.clone().unwrap_or(defaults.worker_id),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            lease_timeout: Duration::from_secs(self.lease_timeout_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Words per chunk.
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    /// Words shared by consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

fn default_chunk_size() -> usize {
    180
}

fn default_chunk_overlap() -> usize {
    40
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslationConfig {
    #[serde(default = "default_target_languages")]
    pub target_languages: Vec<String>,
}

fn default_target_languages() -> Vec<String> {
    vec!["hi".to_string(), "te".to_string()]
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            target_languages: default_target_languages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_dimension() -> usize {
    384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
        }
    }
}
