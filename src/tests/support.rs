//! Test doubles for the corpus fetcher and the model backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Map};

use crate::semantic::corpus::{CorpusError, CorpusFetcher, FetchFuture, FetchRequest};
use crate::semantic::embeddings::{BackendError, LoadOptions, ModelBackend, SentenceEncoder};
use crate::semantic::{CorpusLoader, Embedder, EmbeddingItem, ItemKind, SearchService};

pub fn item(id: &str, kind: ItemKind, embedding: Vec<f32>) -> EmbeddingItem {
    let mut meta = Map::new();
    meta.insert("title".to_string(), json!(id.to_uppercase()));
    meta.insert("path".to_string(), json!(format!("/projects/demo/{id}")));

    EmbeddingItem {
        id: id.to_string(),
        kind,
        text: format!("{} | {id} summary", kind.as_str()),
        embedding,
        meta,
    }
}

/// x, y and z along the classic three-vector fixture.
pub fn xyz_corpus() -> Vec<EmbeddingItem> {
    vec![
        item("x", ItemKind::Project, vec![1.0, 0.0, 0.0]),
        item("y", ItemKind::Experience, vec![0.0, 1.0, 0.0]),
        item("z", ItemKind::Project, vec![0.7, 0.7, 0.0]),
    ]
}

/// Serves a fixed corpus, or fails, after an optional delay.
pub struct StubFetcher {
    response: Mutex<Result<Vec<EmbeddingItem>, CorpusError>>,
    delay: Duration,
    fetches: AtomicUsize,
}

impl StubFetcher {
    pub fn new(items: Vec<EmbeddingItem>) -> Arc<Self> {
        Self::with_response(Ok(items), Duration::ZERO)
    }

    pub fn with_response(
        response: Result<Vec<EmbeddingItem>, CorpusError>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(response),
            delay,
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn set_response(&self, response: Result<Vec<EmbeddingItem>, CorpusError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl CorpusFetcher for StubFetcher {
    fn fetch(&self, _request: FetchRequest) -> FetchFuture<'_> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.lock().unwrap().clone()
        })
    }

    fn location(&self) -> String {
        "/semantic/embeddings.json".to_string()
    }
}

/// Encoder that looks query vectors up in a table.
struct TableEncoder(HashMap<String, Vec<f32>>);

impl SentenceEncoder for TableEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, String> {
        self.0
            .get(text)
            .cloned()
            .ok_or_else(|| format!("no vector for '{text}'"))
    }
}

pub struct StubBackend {
    vectors: HashMap<String, Vec<f32>>,
    failure: Mutex<Option<BackendError>>,
    loads: AtomicUsize,
}

impl StubBackend {
    pub fn new(vectors: &[(&str, Vec<f32>)]) -> Arc<Self> {
        Arc::new(Self {
            vectors: vectors
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
            failure: Mutex::new(None),
            loads: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: BackendError) -> Arc<Self> {
        let backend = Self::new(&[]);
        *backend.failure.lock().unwrap() = Some(error);
        backend
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelBackend for StubBackend {
    fn load(&self, _options: &LoadOptions) -> Result<Arc<dyn SentenceEncoder>, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(Arc::new(TableEncoder(self.vectors.clone())))
    }
}

/// Backend answering the queries used across the scenarios.
pub fn query_backend() -> Arc<StubBackend> {
    StubBackend::new(&[
        ("x", vec![1.0, 0.0, 0.0]),
        ("rust backend", vec![1.0, 0.0, 0.0]),
        ("older", vec![1.0, 0.0, 0.0]),
        ("newer", vec![0.0, 1.0, 0.0]),
    ])
}

pub fn service_with(fetcher: Arc<StubFetcher>, backend: Arc<StubBackend>) -> SearchService {
    SearchService::new(
        CorpusLoader::new(fetcher),
        Arc::new(Embedder::new("stub-model", backend)),
    )
}
