//! autopress CLI: scheduled scrape, generate and publish pipeline.
//!
//! Runs the scheduler daemon, triggers jobs by hand and exposes the review
//! queue and run history of the local store.

mod commands;

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
