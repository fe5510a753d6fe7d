//! moltdigest CLI: fetch posts and publish a daily bilingual digest.
//!
//! Fetches candidate posts from the source API, filters and ranks them, and
//! writes one markdown digest per calendar date.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
