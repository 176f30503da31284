use std::path::{Path, PathBuf};
use std::time::Duration;

use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::semantic::ranker::{RankOptions, DEFAULT_TOP_K, NO_SCORE_FLOOR};
use crate::semantic::DEFAULT_MODEL;

const CONFIG_FILE: &str = "config.yaml";

/// Default location of the embeddings artifact
const DEFAULT_EMBEDDINGS_SOURCE: &str = "public/semantic/embeddings.json";
/// Default delay between the last keystroke and query execution
const DEFAULT_DEBOUNCE_MS: u64 = 400;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_PUBLIC_DIR: &str = "public";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHome,

    #[error("config io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Configuration for semantic search functionality
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticSearchConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum number of results per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum cosine score [-1.0, 1.0] a result must reach
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// URL or file path of the embeddings artifact
    #[serde(default = "default_embeddings_source")]
    pub embeddings_source: String,

    /// Keep downloaded model files under `<base>/models`
    #[serde(default = "default_true")]
    pub model_cache: bool,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SemanticSearchConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            top_k: DEFAULT_TOP_K,
            min_score: NO_SCORE_FLOOR,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            embeddings_source: default_embeddings_source(),
            model_cache: true,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

impl SemanticSearchConfig {
    pub fn rank_options(&self) -> RankOptions {
        RankOptions::default()
            .with_top_k(self.top_k)
            .with_min_score(self.min_score)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_min_score() -> f32 {
    NO_SCORE_FLOOR
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_embeddings_source() -> String {
    DEFAULT_EMBEDDINGS_SOURCE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory served as static files (holds `semantic/embeddings.json`)
    #[serde(default = "default_public_dir")]
    pub public_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            public_dir: default_public_dir(),
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_public_dir() -> String {
    DEFAULT_PUBLIC_DIR.to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub semantic_search: SemanticSearchConfig,
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    /// Resolve the base directory: `FOLIO_BASE_PATH` or `~/.local/share/folio`.
    pub fn base_path_from_env() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("FOLIO_BASE_PATH") {
            return Ok(PathBuf::from(path));
        }

        let home = my_home()
            .ok()
            .flatten()
            .ok_or(ConfigError::NoHome)?;
        Ok(home.join(".local/share/folio"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_with(&Self::base_path_from_env()?)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE);
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path).map_err(io_err)?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?).map_err(io_err)?;
        }

        let config_str = std::fs::read_to_string(&path).map_err(io_err)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str).map_err(|source| ConfigError::Io { path, source })
    }

    /// Directory fastembed downloads model files into.
    pub fn model_cache_dir(&self) -> PathBuf {
        self.base_path.join("models")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(source) = std::env::var("FOLIO_EMBEDDINGS_SOURCE") {
            log::debug!("embeddings source overridden: {source}");
            self.semantic_search.embeddings_source = source;
        }
        if let Ok(model) = std::env::var("FOLIO_MODEL") {
            log::debug!("model overridden: {model}");
            self.semantic_search.model = model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sem = &self.semantic_search;

        if sem.model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "semantic_search.model must not be empty".to_string(),
            ));
        }

        if sem.embeddings_source.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "semantic_search.embeddings_source must not be empty".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&sem.min_score) {
            return Err(ConfigError::Invalid(format!(
                "semantic_search.min_score must be between -1.0 and 1.0, got {}",
                sem.min_score
            )));
        }

        if sem.debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "semantic_search.debounce_ms must be greater than 0".to_string(),
            ));
        }

        if sem.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "semantic_search.download_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
