//! Playbook docs CLI. Keeps a verified local copy of the AI Playbook.
//!
//! Refreshes the publication from its content API, converts each section to
//! Markdown, and serves the last validated cache when the source is down.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = commands::resolve_config(&cli)?;
    commands::init_tracing(&config.logging, cli.verbose);
    commands::run(cli, config).await
}
