//! Query embedder with lazy, single-flight model loading.
//!
//! - The model is loaded on first use (or an explicit `warmup`) and shared
//!   read-only afterwards
//! - Concurrent callers during a load join the same attempt
//! - A load that fails because the persistent model cache is unusable is
//!   retried exactly once without the cache
//! - A failed load leaves the embedder uninitialised; the next call retries
//! - A load that times out keeps running in the background and is picked up
//!   by the next attempt, so two loads never overlap

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fastembed::{InitOptions, TextEmbedding};
use tokio::task::JoinHandle;

use crate::semantic::single_flight::{FlightAbandoned, FlightState, SingleFlight};

/// Default model load timeout, covering the first download (5 minutes)
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedder operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbedderError {
    #[error("Model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),
}

impl From<FlightAbandoned> for EmbedderError {
    fn from(err: FlightAbandoned) -> Self {
        EmbedderError::ModelLoadFailed(err.to_string())
    }
}

/// Error reported by a [`ModelBackend`] for one load attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// The persistent model cache could not be used
    #[error("model cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("{0}")]
    Failed(String),
}

/// Parameters for one model load attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub model: String,
    /// Keep model weights in the persistent cache
    pub use_cache: bool,
}

/// A loaded sentence-embedding model.
///
/// Implementations must produce mean-pooled, L2-normalised vectors.
pub trait SentenceEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// Loads sentence-embedding models. `load` may block on disk or network.
pub trait ModelBackend: Send + Sync + 'static {
    fn load(&self, options: &LoadOptions) -> Result<Arc<dyn SentenceEncoder>, BackendError>;
}

/// Reports whether the persistent model cache can be used.
pub type CacheProbe = Arc<dyn Fn() -> bool + Send + Sync>;

type SharedEncoder = Arc<dyn SentenceEncoder>;

type LoadTask = JoinHandle<Result<SharedEncoder, BackendError>>;

/// Text embedder owning the model lifecycle.
pub struct Embedder {
    loader: ModelLoader,
    encoder: SingleFlight<SharedEncoder, EmbedderError>,
}

impl Embedder {
    pub fn new(model_name: impl Into<String>, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            loader: ModelLoader {
                model_name: model_name.into(),
                backend,
                cache_probe: Arc::new(|| true),
                load_timeout: DEFAULT_LOAD_TIMEOUT,
                overdue: Arc::new(Mutex::new(None)),
            },
            encoder: SingleFlight::new(),
        }
    }

    /// Embedder backed by fastembed, caching weights under `cache_dir`.
    pub fn fastembed(model_name: impl Into<String>, cache_dir: PathBuf, use_cache: bool) -> Self {
        let probe_dir = cache_dir.clone();
        let backend = Arc::new(FastEmbedBackend::new(cache_dir));
        Self::new(model_name, backend)
            .with_cache_probe(Arc::new(move || use_cache && cache_dir_usable(&probe_dir)))
    }

    pub fn with_cache_probe(mut self, probe: CacheProbe) -> Self {
        self.loader.cache_probe = probe;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.loader.load_timeout = timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.loader.model_name
    }

    pub fn state(&self) -> FlightState {
        self.encoder.state()
    }

    /// Load the model without embedding anything.
    pub async fn warmup(&self) -> Result<(), EmbedderError> {
        self.encoder().await.map(|_| ())
    }

    /// Embed `text`, loading the model first if needed.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let encoder = self.encoder().await?;
        let text = text.to_string();

        let vector = tokio::task::spawn_blocking(move || encoder.encode(&text))
            .await
            .map_err(|e| EmbedderError::EmbeddingFailed(format!("inference task failed: {e}")))?
            .map_err(EmbedderError::EmbeddingFailed)?;

        if vector.is_empty() {
            return Err(EmbedderError::EmbeddingFailed(
                "model returned an empty vector".to_string(),
            ));
        }

        Ok(vector)
    }

    async fn encoder(&self) -> Result<SharedEncoder, EmbedderError> {
        let loader = self.loader.clone();
        self.encoder.get_or_try_init(move || loader.load()).await
    }
}

/// Everything a load attempt needs, detached from the embedder so the
/// attempt can outlive the caller that started it.
#[derive(Clone)]
struct ModelLoader {
    model_name: String,
    backend: Arc<dyn ModelBackend>,
    cache_probe: CacheProbe,
    load_timeout: Duration,
    /// A blocking load that outlived its timeout. The next attempt waits for
    /// it instead of starting another load on the same cache directory.
    overdue: Arc<Mutex<Option<LoadTask>>>,
}

impl ModelLoader {
    async fn load(self) -> Result<SharedEncoder, EmbedderError> {
        let use_cache = (self.cache_probe)();
        log::info!(
            "Loading embedding model '{}' (cache {})",
            self.model_name,
            if use_cache { "enabled" } else { "disabled" }
        );

        let result = match self.attempt(use_cache).await {
            Err(BackendError::CacheUnavailable(reason)) if use_cache => {
                log::warn!("Model cache unavailable ({reason}), retrying without cache");
                self.attempt(false).await
            }
            other => other,
        };

        match result {
            Ok(encoder) => {
                log::info!("Embedding model '{}' ready", self.model_name);
                Ok(encoder)
            }
            Err(e) => {
                log::error!("Failed to load embedding model '{}': {}", self.model_name, e);
                Err(EmbedderError::ModelLoadFailed(e.to_string()))
            }
        }
    }

    async fn attempt(&self, use_cache: bool) -> Result<SharedEncoder, BackendError> {
        let overdue = self
            .overdue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut task = match overdue {
            Some(task) => {
                log::info!("Waiting for the previous model load to finish");
                task
            }
            None => {
                let backend = self.backend.clone();
                let options = LoadOptions {
                    model: self.model_name.clone(),
                    use_cache,
                };
                tokio::task::spawn_blocking(move || backend.load(&options))
            }
        };

        match tokio::time::timeout(self.load_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(BackendError::Failed(format!("load task failed: {e}"))),
            Err(_) => {
                *self.overdue.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
                Err(BackendError::Failed(format!(
                    "timed out after {} seconds",
                    self.load_timeout.as_secs()
                )))
            }
        }
    }
}

/// Check that `dir` exists (creating it if needed) and accepts writes.
pub fn cache_dir_usable(dir: &Path) -> bool {
    prepare_cache_dir(dir).is_ok()
}

fn prepare_cache_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    // a named temp file is removed on drop
    tempfile::NamedTempFile::new_in(dir).map(|_| ())
}

/// fastembed-backed model loader.
pub struct FastEmbedBackend {
    cache_dir: PathBuf,
}

impl FastEmbedBackend {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }
}

impl ModelBackend for FastEmbedBackend {
    fn load(&self, options: &LoadOptions) -> Result<Arc<dyn SentenceEncoder>, BackendError> {
        let model = parse_model_name(&options.model).map_err(BackendError::Failed)?;

        // Without the persistent cache the weights go to a scratch directory
        // that lives as long as the encoder.
        let (cache_dir, scratch) = if options.use_cache {
            prepare_cache_dir(&self.cache_dir).map_err(|e| {
                BackendError::CacheUnavailable(format!("{}: {}", self.cache_dir.display(), e))
            })?;
            (self.cache_dir.clone(), None)
        } else {
            let scratch = tempfile::tempdir().map_err(|e| {
                BackendError::Failed(format!("failed to create scratch model directory: {e}"))
            })?;
            (scratch.path().to_path_buf(), Some(scratch))
        };

        let init = InitOptions::new(model)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(true);

        let embedding =
            TextEmbedding::try_new(init).map_err(|e| BackendError::Failed(e.to_string()))?;

        Ok(Arc::new(FastEmbedEncoder {
            model: Mutex::new(embedding),
            _scratch: scratch,
        }))
    }
}

/// Uses a Mutex because fastembed's embed() requires &mut self.
struct FastEmbedEncoder {
    model: Mutex<TextEmbedding>,
    _scratch: Option<tempfile::TempDir>,
}

impl SentenceEncoder for FastEmbedEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, String> {
        let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);

        let mut vector = model
            .embed(vec![text], None)
            .map_err(|e| e.to_string())?
            .into_iter()
            .next()
            .ok_or_else(|| "No embedding returned".to_string())?;

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// Scale `vector` to unit length. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

/// Parse a model name string to the fastembed enum.
pub fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, String> {
    let lowered = name.trim().to_lowercase();
    let short = lowered
        .strip_prefix("xenova/")
        .or_else(|| lowered.strip_prefix("sentence-transformers/"))
        .unwrap_or(&lowered);

    match short {
        "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
        "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-small-en-v1.5-q" | "bgesmallenv15q" => Ok(fastembed::EmbeddingModel::BGESmallENV15Q),
        "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-base-en-v1.5-q" | "bgebaseenv15q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
        "paraphrase-multilingual-minilm-l12-v2" => {
            Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        _ => Err(format!(
            "Unknown model: {name}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, paraphrase-multilingual-MiniLM-L12-v2 (add -q suffix for quantized)"
        )),
    }
}
