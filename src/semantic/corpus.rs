//! Corpus loading: fetch the embeddings artifact once and keep it in memory.
//!
//! The first fetch asks intermediaries not to store the response. If the
//! artifact comes back empty (a stale cached copy), the loader retries once
//! with a cache-busting query parameter and a forced reload. An artifact that
//! is still empty is an error, never an empty corpus.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::header::{CACHE_CONTROL, PRAGMA};
use url::Url;

use crate::semantic::artifact;
use crate::semantic::single_flight::{FlightAbandoned, FlightState, SingleFlight};
use crate::semantic::types::EmbeddingItem;

/// Errors that can occur while loading the corpus.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CorpusError {
    #[error("Embeddings request failed: {0}")]
    Request(String),

    #[error("Embeddings request failed ({0})")]
    Status(u16),

    #[error("Embeddings file is invalid: {0}")]
    Invalid(String),

    #[error("Embeddings file is empty. Rebuild/regenerate and redeploy {0}")]
    Empty(String),

    #[error("Embeddings load was abandoned")]
    Abandoned,
}

impl From<FlightAbandoned> for CorpusError {
    fn from(_: FlightAbandoned) -> Self {
        CorpusError::Abandoned
    }
}

impl From<artifact::ArtifactError> for CorpusError {
    fn from(err: artifact::ArtifactError) -> Self {
        CorpusError::Invalid(err.to_string())
    }
}

/// Cache behaviour requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDirective {
    /// Do not store the response
    NoStore,
    /// Revalidate end to end, ignoring cached copies
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub cache: CacheDirective,
    /// Value of the cache-busting `v` query parameter, if any
    pub cache_bust: Option<String>,
}

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<EmbeddingItem>, CorpusError>> + Send + 'a>>;

/// Retrieves the embeddings artifact from wherever it is published.
pub trait CorpusFetcher: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> FetchFuture<'_>;

    /// Human readable location, used in error messages
    fn location(&self) -> String;
}

/// Fetches the artifact over HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
    url: Url,
}

impl HttpFetcher {
    pub fn new(url: Url) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    pub fn with_client(url: Url, client: reqwest::Client) -> Self {
        Self { client, url }
    }

    fn request_url(&self, request: &FetchRequest) -> Url {
        let mut url = self.url.clone();
        if let Some(stamp) = &request.cache_bust {
            url.query_pairs_mut().append_pair("v", stamp);
        }
        url
    }
}

impl CorpusFetcher for HttpFetcher {
    fn fetch(&self, request: FetchRequest) -> FetchFuture<'_> {
        Box::pin(async move {
            let url = self.request_url(&request);
            log::debug!("fetching embeddings from {url}");

            let builder = match request.cache {
                CacheDirective::NoStore => self.client.get(url).header(CACHE_CONTROL, "no-store"),
                CacheDirective::Reload => self
                    .client
                    .get(url)
                    .header(CACHE_CONTROL, "no-cache")
                    .header(PRAGMA, "no-cache"),
            };

            let response = builder
                .send()
                .await
                .map_err(|e| CorpusError::Request(e.to_string()))?;

            if !response.status().is_success() {
                return Err(CorpusError::Status(response.status().as_u16()));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| CorpusError::Request(e.to_string()))?;

            Ok(artifact::decode(&bytes)?)
        })
    }

    fn location(&self) -> String {
        self.url.to_string()
    }
}

/// Reads the artifact from the local filesystem. Cache directives do not
/// apply to local reads.
pub struct FileFetcher {
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CorpusFetcher for FileFetcher {
    fn fetch(&self, _request: FetchRequest) -> FetchFuture<'_> {
        Box::pin(async move {
            let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
                CorpusError::Request(format!("{}: {}", self.path.display(), e))
            })?;
            Ok::<_, CorpusError>(artifact::decode(&bytes)?)
        })
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Pick a fetcher for `source`: http(s) URLs go over the network, anything
/// else is a file path.
pub fn fetcher_for_source(source: &str) -> Result<Arc<dyn CorpusFetcher>, CorpusError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let url = Url::parse(source)
            .map_err(|e| CorpusError::Request(format!("invalid embeddings url '{source}': {e}")))?;
        Ok(Arc::new(HttpFetcher::new(url)))
    } else {
        Ok(Arc::new(FileFetcher::new(PathBuf::from(source))))
    }
}

/// Session-scoped corpus cache.
pub struct CorpusLoader {
    fetcher: Arc<dyn CorpusFetcher>,
    items: SingleFlight<Arc<Vec<EmbeddingItem>>, CorpusError>,
}

impl CorpusLoader {
    pub fn new(fetcher: Arc<dyn CorpusFetcher>) -> Self {
        Self {
            fetcher,
            items: SingleFlight::new(),
        }
    }

    pub fn state(&self) -> FlightState {
        self.items.state()
    }

    pub fn location(&self) -> String {
        self.fetcher.location()
    }

    /// Number of loaded items, 0 if not loaded yet.
    pub fn len(&self) -> usize {
        self.items.get().map(|items| items.len()).unwrap_or(0)
    }

    /// Return the cached corpus, fetching it on first use.
    pub async fn load(&self) -> Result<Arc<Vec<EmbeddingItem>>, CorpusError> {
        let fetcher = self.fetcher.clone();
        self.items.get_or_try_init(move || fetch_fresh(fetcher)).await
    }
}

async fn fetch_fresh(
    fetcher: Arc<dyn CorpusFetcher>,
) -> Result<Arc<Vec<EmbeddingItem>>, CorpusError> {
    let mut items = fetcher
        .fetch(FetchRequest {
            cache: CacheDirective::NoStore,
            cache_bust: None,
        })
        .await?;

    if items.is_empty() {
        log::warn!(
            "Embeddings from {} are empty, retrying with cache busting",
            fetcher.location()
        );
        items = fetcher
            .fetch(FetchRequest {
                cache: CacheDirective::Reload,
                cache_bust: Some(chrono::Utc::now().timestamp_millis().to_string()),
            })
            .await?;
    }

    if items.is_empty() {
        return Err(CorpusError::Empty(fetcher.location()));
    }

    log::info!("Loaded {} embeddings from {}", items.len(), fetcher.location());
    Ok(Arc::new(items))
}
