use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod handlers;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search projects and experience by meaning
    Search {
        /// Query text
        #[clap(required = true, trailing_var_arg = true)]
        query: Vec<String>,

        /// Maximum number of results
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Drop results scoring below this value [-1.0, 1.0]
        #[clap(short, long, allow_hyphen_values = true)]
        min_score: Option<f32>,

        /// Print results as json
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Download and load the embedding model
    Warmup {},

    /// Build the embeddings artifact from a portfolio content file
    Build {
        /// Portfolio content document (json)
        #[clap(short, long)]
        content: PathBuf,

        /// Output file; a `.gz` suffix writes gzip.
        /// Defaults to `<public_dir>/semantic/embeddings.json`
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Start folio as a service.
    Serve {},
}
