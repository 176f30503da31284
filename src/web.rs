use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal;
use tower_http::services::ServeDir;

use crate::{
    cli::{build_service, override_options},
    config::Config,
    semantic::{
        single_flight::FlightState, EmbedderError, ResultView, SearchError, SearchService,
        SearchStatus,
    },
};

#[derive(Clone)]
struct SharedState {
    service: Arc<SearchService>,
}

pub fn router(service: Arc<SearchService>, public_dir: &Path) -> Router {
    let shared_state = Arc::new(SharedState { service });

    Router::new()
        .route("/api/search", post(search))
        .route("/api/warmup", post(warmup))
        .route("/api/status", get(status))
        .fallback_service(ServeDir::new(public_dir))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(build_service(config)?);

    // load the corpus and model in the background so the first query is fast
    let warm = service.clone();
    tokio::spawn(async move {
        if let Err(err) = warm.open().await {
            log::warn!("warmup failed: {err}");
        }
    });

    let app = router(service, Path::new(&config.server.public_dir));

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    log::info!("listening on {}", config.server.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Debug)]
enum HttpError {
    BadRequest(String),
    Search(SearchError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self {
            HttpError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": message})),
            ),
            HttpError::Search(err @ SearchError::Embedder(EmbedderError::EmbeddingFailed(_))) => {
                log::error!("{err:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": err.to_string()})),
                )
            }
            HttpError::Search(err) => {
                log::error!("{err:?}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"error": err.to_string()})),
                )
            }
        }
        .into_response()
    }
}

impl From<SearchError> for HttpError {
    fn from(err: SearchError) -> Self {
        Self::Search(err)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub seq: u64,
    pub status: SearchStatus,
    pub results: Vec<ResultView>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let service = &state.service;
    let options = override_options(service.options(), payload.top_k, payload.min_score)
        .map_err(|err| HttpError::BadRequest(err.to_string()))?;

    let outcome = service.search_with(&payload.query, options).await?;

    Ok(Json(SearchResponse {
        seq: outcome.seq,
        status: service.status(),
        results: ResultView::from_outcome(&outcome),
    }))
}

async fn warmup(State(state): State<Arc<SharedState>>) -> Result<Json<StatusResponse>, HttpError> {
    state.service.open().await?;
    Ok(Json(StatusResponse::of(&state.service)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: SearchStatus,
    pub model: String,
    pub model_state: FlightState,
    pub corpus_state: FlightState,
    pub corpus_source: String,
    pub items: usize,
}

impl StatusResponse {
    fn of(service: &SearchService) -> Self {
        Self {
            status: service.status(),
            model: service.embedder().model_name().to_string(),
            model_state: service.embedder().state(),
            corpus_state: service.corpus().state(),
            corpus_source: service.corpus().location(),
            items: service.corpus().len(),
        }
    }
}

async fn status(State(state): State<Arc<SharedState>>) -> Json<StatusResponse> {
    Json(StatusResponse::of(&state.service))
}
