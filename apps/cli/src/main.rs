//! paperpipe CLI: scholarly-document ingestion.
//!
//! Fetches papers, chunks them by section, extracts keywords, references
//! and summaries with an LLM, and stores the results in libSQL.

mod commands;
mod progress;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
