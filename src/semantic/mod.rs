//! Semantic search over the portfolio corpus.
//!
//! Precomputed item embeddings are fetched once, the query is embedded in
//! process with a sentence-embedding model, and items are ranked by cosine
//! similarity.
//!
//! # Architecture
//!
//! - `types`: Corpus item and ranked result records
//! - `similarity`: Cosine similarity between two vectors
//! - `ranker`: Scores, filters, orders and truncates the corpus for a query
//! - `single_flight`: Lazy, retryable, shared initialisation cell
//! - `embeddings`: Model loading and query embedding via fastembed
//! - `corpus`: Fetches and caches the embeddings artifact
//! - `artifact`: JSON / gzip codec for the embeddings artifact
//! - `preprocess`: Maps portfolio content to embeddable source items
//! - `highlight`: Keyword highlighting of result text
//! - `service`: High-level search session

pub mod artifact;
pub mod corpus;
pub mod embeddings;
pub mod highlight;
pub mod preprocess;
pub mod ranker;
pub mod service;
pub mod similarity;
pub mod single_flight;
pub mod types;

pub use corpus::{fetcher_for_source, CorpusError, CorpusLoader};
pub use embeddings::{Embedder, EmbedderError};
pub use ranker::RankOptions;
pub use service::{Debounced, ResultView, SearchError, SearchService, SearchStatus};
pub use types::{EmbeddingItem, ItemKind};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
