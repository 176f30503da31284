use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::semantic::{
    artifact,
    highlight::render,
    preprocess::{source_items, PortfolioContent},
    fetcher_for_source, CorpusLoader, Embedder, EmbeddingItem, RankOptions, ResultView,
    SearchService,
};

/// Embedder configured from `semantic_search`.
pub fn build_embedder(config: &Config) -> Embedder {
    let sem = &config.semantic_search;
    Embedder::fastembed(&sem.model, config.model_cache_dir(), sem.model_cache)
        .with_load_timeout(sem.download_timeout())
}

/// Search session configured from `semantic_search`.
pub fn build_service(config: &Config) -> Result<SearchService> {
    let sem = &config.semantic_search;
    let fetcher = fetcher_for_source(&sem.embeddings_source)?;

    Ok(
        SearchService::new(CorpusLoader::new(fetcher), Arc::new(build_embedder(config)))
            .with_options(sem.rank_options())
            .with_debounce(sem.debounce()),
    )
}

pub async fn handle_search(
    config: &Config,
    query: Vec<String>,
    top_k: Option<usize>,
    min_score: Option<f32>,
    json: bool,
) -> Result<()> {
    let service = build_service(config)?;

    let options = override_options(service.options(), top_k, min_score)?;

    let outcome = service.search_with(&query.join(" "), options).await?;
    let views = ResultView::from_outcome(&outcome);

    if json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if views.is_empty() {
        println!("No matches");
        return Ok(());
    }

    for view in views {
        println!(
            "{:.3}  [{}] {}",
            view.score,
            view.kind,
            render(&view.title_segments, "*", "*")
        );
        if let Some(path) = &view.path {
            println!("       {path}");
        }
        println!("       {}", render(&view.summary_segments, "*", "*"));
    }

    Ok(())
}

pub async fn handle_warmup(config: &Config) -> Result<()> {
    let embedder = build_embedder(config);
    embedder
        .warmup()
        .await
        .with_context(|| format!("failed to load model '{}'", embedder.model_name()))?;

    println!("Model '{}' is ready", embedder.model_name());
    Ok(())
}

pub async fn handle_build(config: &Config, content: &Path, output: Option<PathBuf>) -> Result<()> {
    let raw = tokio::fs::read_to_string(content)
        .await
        .with_context(|| format!("failed to read {}", content.display()))?;
    let content: PortfolioContent =
        serde_json::from_str(&raw).context("portfolio content is malformed")?;

    let sources = source_items(&content);
    if sources.is_empty() {
        bail!("portfolio content has no projects or experience entries");
    }

    let embedder = build_embedder(config);
    embedder
        .warmup()
        .await
        .with_context(|| format!("failed to load model '{}'", embedder.model_name()))?;

    let pb = ProgressBar::new(sources.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} items | Embedding {msg}")?
            .progress_chars("##."),
    );

    let mut items = Vec::with_capacity(sources.len());
    for source in sources {
        pb.set_message(source.id.clone());
        let embedding = embedder
            .embed(&source.text)
            .await
            .with_context(|| format!("failed to embed {}", source.id))?;

        items.push(EmbeddingItem {
            id: source.id,
            kind: source.kind,
            text: source.text,
            embedding,
            meta: source.meta,
        });
        pb.inc(1);
    }
    pb.finish_and_clear();

    let output = output.unwrap_or_else(|| default_artifact_path(config));
    artifact::write(&output, &items)
        .with_context(|| format!("failed to write {}", output.display()))?;

    log::info!("Wrote {} embeddings to {}", items.len(), output.display());
    println!("{} items embedded -> {}", items.len(), output.display());
    Ok(())
}

pub fn default_artifact_path(config: &Config) -> PathBuf {
    Path::new(&config.server.public_dir).join("semantic/embeddings.json")
}

pub fn validate_min_score(min_score: f32) -> Result<()> {
    if !(-1.0..=1.0).contains(&min_score) {
        bail!("min score must be between -1.0 and 1.0, got {min_score}");
    }
    Ok(())
}

/// Rank options with per-request overrides applied on top of `base`.
pub fn override_options(
    base: RankOptions,
    top_k: Option<usize>,
    min_score: Option<f32>,
) -> Result<RankOptions> {
    let mut options = base;
    if let Some(top_k) = top_k {
        options = options.with_top_k(top_k);
    }
    if let Some(min_score) = min_score {
        validate_min_score(min_score)?;
        options = options.with_min_score(min_score);
    }
    Ok(options)
}
