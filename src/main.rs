use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use config::Config;

fn main() -> anyhow::Result<()> {
    // FOLIO_LOG=debug folio search "query"
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FOLIO_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let config = Config::load().context("failed to load config")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(async {
        match args.command {
            cli::Command::Search {
                query,
                top_k,
                min_score,
                json,
            } => cli::handle_search(&config, query, top_k, min_score, json).await,
            cli::Command::Warmup {} => cli::handle_warmup(&config).await,
            cli::Command::Build { content, output } => {
                cli::handle_build(&config, &content, output).await
            }
            cli::Command::Serve {} => web::serve(&config).await,
        }
    })
}
