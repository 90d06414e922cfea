//! a11yscan CLI: crawl websites and audit them for accessibility.
//!
//! Runs scans on an in-process job queue, prints a summary per site, and
//! keeps a local history of results.

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
