use std::time::Duration;

use crate::semantic::embeddings::BackendError;
use crate::semantic::single_flight::FlightState;
use crate::semantic::{
    CorpusError, Debounced, EmbedderError, RankOptions, ResultView, SearchError, SearchStatus,
};

use super::support::{query_backend, service_with, xyz_corpus, StubBackend, StubFetcher};

#[tokio::test]
async fn test_open_loads_corpus_and_model() {
    let fetcher = StubFetcher::new(xyz_corpus());
    let backend = query_backend();
    let service = service_with(fetcher.clone(), backend.clone());

    assert_eq!(service.status(), SearchStatus::Ready);
    service.open().await.unwrap();

    assert_eq!(service.corpus().state(), FlightState::Ready);
    assert_eq!(service.embedder().state(), FlightState::Ready);
    assert_eq!(service.corpus().len(), 3);

    service.open().await.unwrap();
    assert_eq!(fetcher.fetches(), 1);
    assert_eq!(backend.loads(), 1);
}

#[tokio::test]
async fn test_search_ranks_corpus() {
    let service = service_with(StubFetcher::new(xyz_corpus()), query_backend())
        .with_options(RankOptions::default().with_top_k(2));

    let outcome = service.search("  x  ").await.unwrap();

    assert_eq!(outcome.seq, 1);
    assert_eq!(outcome.query, "x");
    assert!(outcome.fresh);

    let ids: Vec<_> = outcome.results.iter().map(|r| r.item.id.as_str()).collect();
    assert_eq!(ids, vec!["x", "z"]);
    assert!((outcome.results[0].score - 1.0).abs() < 1e-6);
    assert!((outcome.results[1].score - 0.70710677).abs() < 1e-5);

    let views = ResultView::from_outcome(&outcome);
    assert_eq!(views[0].title, "X");
    assert_eq!(views[0].path.as_deref(), Some("/projects/demo/x"));
}

#[tokio::test]
async fn test_search_applies_score_floor() {
    let service = service_with(StubFetcher::new(xyz_corpus()), query_backend());

    let outcome = service
        .search_with("x", RankOptions::default().with_min_score(0.8))
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].item.id, "x");
}

#[tokio::test]
async fn test_blank_query_skips_model_and_corpus() {
    let fetcher = StubFetcher::new(xyz_corpus());
    let backend = query_backend();
    let service = service_with(fetcher.clone(), backend.clone());

    let outcome = service.search("   ").await.unwrap();

    assert!(outcome.results.is_empty());
    assert_eq!(outcome.seq, 1);
    assert_eq!(fetcher.fetches(), 0);
    assert_eq!(backend.loads(), 0);
    assert_eq!(service.latest_seq(), 1);
}

#[tokio::test]
async fn test_corpus_failure_is_not_cached() {
    let fetcher = StubFetcher::with_response(Err(CorpusError::Status(404)), Duration::ZERO);
    let service = service_with(fetcher.clone(), query_backend());

    let err = service.search("x").await.unwrap_err();
    assert_eq!(err, SearchError::Corpus(CorpusError::Status(404)));

    fetcher.set_response(Ok(xyz_corpus()));
    let outcome = service.search("x").await.unwrap();

    assert_eq!(outcome.results.len(), 3);
    assert_eq!(fetcher.fetches(), 2);
}

#[tokio::test]
async fn test_empty_corpus_is_reported_distinctly() {
    let fetcher = StubFetcher::new(vec![]);
    let service = service_with(fetcher.clone(), query_backend());

    let err = service.search("x").await.unwrap_err();

    assert!(matches!(err, SearchError::Corpus(CorpusError::Empty(_))));
    // first fetch plus the cache-busting retry
    assert_eq!(fetcher.fetches(), 2);
}

#[tokio::test]
async fn test_model_failure_surfaces_from_open_and_search() {
    let backend = StubBackend::failing(BackendError::Failed("offline".to_string()));
    let service = service_with(StubFetcher::new(xyz_corpus()), backend.clone());

    assert!(matches!(
        service.open().await,
        Err(SearchError::Embedder(EmbedderError::ModelLoadFailed(_)))
    ));
    assert!(matches!(
        service.search("x").await,
        Err(SearchError::Embedder(EmbedderError::ModelLoadFailed(_)))
    ));
    assert_eq!(backend.loads(), 2);
}

#[tokio::test]
async fn test_inference_failure_is_an_embedding_error() {
    let service = service_with(StubFetcher::new(xyz_corpus()), query_backend());

    let err = service.search("unknown words").await.unwrap_err();

    assert!(matches!(
        err,
        SearchError::Embedder(EmbedderError::EmbeddingFailed(_))
    ));
    assert_eq!(service.embedder().state(), FlightState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_status_reflects_work_in_progress() {
    let fetcher = StubFetcher::with_response(Ok(xyz_corpus()), Duration::from_secs(1));
    let service = service_with(fetcher, query_backend());

    let (loaded, status) = tokio::join!(service.corpus().load(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.status()
    });
    loaded.unwrap();
    assert_eq!(status, SearchStatus::LoadingIndex);

    let (outcome, status) = tokio::join!(service.search("x"), async {
        tokio::task::yield_now().await;
        service.status()
    });
    outcome.unwrap();
    assert_eq!(status, SearchStatus::Searching);
    assert_eq!(service.status(), SearchStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_drops_superseded_query() {
    let service = service_with(StubFetcher::new(xyz_corpus()), query_backend());

    let (first, second) = tokio::join!(service.search_debounced("older"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.search_debounced("newer").await
    });

    assert_eq!(first.unwrap(), Debounced::Superseded { seq: 1 });

    let second = second.unwrap().into_fresh().unwrap();
    assert_eq!(second.seq, 2);
    assert_eq!(second.query, "newer");
}

#[tokio::test(start_paused = true)]
async fn test_result_of_overtaken_query_is_stale() {
    let fetcher = StubFetcher::with_response(Ok(xyz_corpus()), Duration::from_secs(1));
    let service = service_with(fetcher, query_backend());

    let (first, second) = tokio::join!(service.search_debounced("older"), async {
        // the first query is already running when this one is issued
        tokio::time::sleep(Duration::from_millis(600)).await;
        service.search("newer").await
    });

    assert_eq!(first.unwrap(), Debounced::Stale { seq: 1 });

    let second = second.unwrap();
    assert_eq!(second.seq, 2);
    assert!(second.fresh);
    assert_eq!(second.results[0].item.id, "y");
}

#[tokio::test(start_paused = true)]
async fn test_overtaken_failure_is_stale_not_error() {
    let fetcher =
        StubFetcher::with_response(Err(CorpusError::Status(500)), Duration::from_secs(1));
    let service = service_with(fetcher, query_backend());

    let (first, _) = tokio::join!(service.search_debounced("older"), async {
        tokio::time::sleep(Duration::from_millis(600)).await;
        service.search("   ").await
    });

    assert_eq!(first.unwrap(), Debounced::Stale { seq: 1 });
}
