//! Semantic search service.
//!
//! Owns the corpus cache and the embedder for one search session:
//! - Loads the corpus and warms up the model concurrently on `open`
//! - Embeds each query and ranks it against the corpus
//! - Stamps every query with a sequence number so callers can drop results
//!   that were overtaken by a newer query
//! - Debounces bursts of queries without relying on timer cancellation

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::semantic::corpus::{CorpusError, CorpusLoader};
use crate::semantic::embeddings::{Embedder, EmbedderError};
use crate::semantic::highlight::{highlight, query_tokens, Segment};
use crate::semantic::ranker::{rank, RankOptions};
use crate::semantic::single_flight::FlightState;
use crate::semantic::types::{ItemKind, RankedResult};

/// Default delay before a typed query is executed
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(400);

/// Errors that can occur during semantic search operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    #[error("Search index unavailable: {0}")]
    Corpus(#[from] CorpusError),

    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

/// What the search feature is currently busy with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchStatus {
    Searching,
    LoadingIndex,
    LoadingModel,
    Ready,
}

impl std::fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SearchStatus::Searching => "SEARCHING",
            SearchStatus::LoadingIndex => "LOADING_INDEX",
            SearchStatus::LoadingModel => "LOADING_MODEL",
            SearchStatus::Ready => "READY",
        };
        f.write_str(label)
    }
}

/// Results of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Sequence number assigned when the query was issued
    pub seq: u64,
    /// The trimmed query text
    pub query: String,
    pub results: Vec<RankedResult>,
    /// False when a newer query was issued while this one ran
    pub fresh: bool,
}

/// Fate of a debounced query.
#[derive(Debug, Clone, PartialEq)]
pub enum Debounced {
    /// A newer query was issued before this one started
    Superseded { seq: u64 },
    /// A newer query was issued while this one ran
    Stale { seq: u64 },
    Fresh(SearchOutcome),
}

impl Debounced {
    pub fn into_fresh(self) -> Option<SearchOutcome> {
        match self {
            Debounced::Fresh(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Presentation of a ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub title: String,
    pub summary: String,
    pub path: Option<String>,
    pub score: f32,
    pub title_segments: Vec<Segment>,
    pub summary_segments: Vec<Segment>,
}

impl ResultView {
    /// Title falls back to the id and summary to the embedded text when the
    /// corresponding meta attribute is missing or not a string.
    pub fn new(result: &RankedResult, tokens: &[String]) -> Self {
        let item = &result.item;
        let title = item.meta_str("title").unwrap_or(&item.id).to_string();
        let summary = item.meta_str("summary").unwrap_or(&item.text).to_string();

        Self {
            id: item.id.clone(),
            kind: item.kind,
            title_segments: highlight(&title, tokens),
            summary_segments: highlight(&summary, tokens),
            title,
            summary,
            path: item.meta_str("path").map(str::to_string),
            score: result.score,
        }
    }

    /// Views for all results of `outcome`, highlighted with its query tokens.
    pub fn from_outcome(outcome: &SearchOutcome) -> Vec<Self> {
        let tokens = query_tokens(&outcome.query);
        outcome
            .results
            .iter()
            .map(|result| Self::new(result, &tokens))
            .collect()
    }
}

/// Decrements the in-flight counter when a query finishes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SearchService {
    corpus: CorpusLoader,
    embedder: Arc<Embedder>,
    options: RankOptions,
    debounce: Duration,
    issued: AtomicU64,
    in_flight: AtomicUsize,
}

impl SearchService {
    pub fn new(corpus: CorpusLoader, embedder: Arc<Embedder>) -> Self {
        Self {
            corpus,
            embedder,
            options: RankOptions::default(),
            debounce: DEFAULT_DEBOUNCE,
            issued: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_options(mut self, options: RankOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn options(&self) -> RankOptions {
        self.options
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn corpus(&self) -> &CorpusLoader {
        &self.corpus
    }

    pub fn status(&self) -> SearchStatus {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            SearchStatus::Searching
        } else if self.corpus.state() == FlightState::Loading {
            SearchStatus::LoadingIndex
        } else if self.embedder.state() == FlightState::Loading {
            SearchStatus::LoadingModel
        } else {
            SearchStatus::Ready
        }
    }

    /// Sequence number of the most recently issued query (0 before any).
    pub fn latest_seq(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, seq: u64) -> bool {
        self.latest_seq() == seq
    }

    fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Load the corpus and warm up the model concurrently.
    pub async fn open(&self) -> Result<(), SearchError> {
        let corpus = async { self.corpus.load().await.map_err(SearchError::from) };
        let model = async { self.embedder.warmup().await.map_err(SearchError::from) };

        tokio::try_join!(corpus, model)?;
        Ok(())
    }

    /// Run a query with the service's rank options.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome, SearchError> {
        self.search_with(query, self.options).await
    }

    /// Run a query with explicit rank options.
    ///
    /// A blank query yields no results without touching the model.
    pub async fn search_with(
        &self,
        query: &str,
        options: RankOptions,
    ) -> Result<SearchOutcome, SearchError> {
        let seq = self.issue();
        self.run(seq, query.trim(), options).await
    }

    /// Wait for the debounce interval, then run the query unless a newer one
    /// was issued in the meantime.
    ///
    /// Only [`Debounced::Fresh`] outcomes should be presented. A query that
    /// was overtaken while running reports `Stale` even when it failed.
    pub async fn search_debounced(&self, query: &str) -> Result<Debounced, SearchError> {
        let seq = self.issue();

        tokio::time::sleep(self.debounce).await;
        if !self.is_current(seq) {
            log::debug!("query #{seq} superseded before running");
            return Ok(Debounced::Superseded { seq });
        }

        let result = self.run(seq, query.trim(), self.options).await;
        if !self.is_current(seq) {
            log::debug!("query #{seq} went stale while running, dropping result");
            return Ok(Debounced::Stale { seq });
        }

        result.map(Debounced::Fresh)
    }

    async fn run(
        &self,
        seq: u64,
        query: &str,
        options: RankOptions,
    ) -> Result<SearchOutcome, SearchError> {
        if query.is_empty() {
            return Ok(SearchOutcome {
                seq,
                query: String::new(),
                results: Vec::new(),
                fresh: self.is_current(seq),
            });
        }

        let _in_flight = InFlight::enter(&self.in_flight);

        let corpus = async { self.corpus.load().await.map_err(SearchError::from) };
        let vector = async { self.embedder.embed(query).await.map_err(SearchError::from) };
        let (items, vector) = tokio::try_join!(corpus, vector)?;

        let results = rank(&vector, &items, options);
        log::debug!("query #{seq} '{query}' -> {} results", results.len());

        Ok(SearchOutcome {
            seq,
            query: query.to_string(),
            results,
            fresh: self.is_current(seq),
        })
    }
}
