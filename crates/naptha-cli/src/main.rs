//! naptha: command-line client for Naptha nodes and the module hub.

use std::process::ExitCode;

use clap::Parser;
use naptha_core::{ClientConfig, NodeAddress};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod context;
mod output;

use cli::Cli;
use commands::Exit;
use context::AppContext;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries results only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            Exit::Failed.into()
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<Exit> {
    let mut config = ClientConfig::from_env(&cli.data_dir)?;
    if let Some(node) = &cli.node {
        config.node_url = NodeAddress::new(node)?;
    }
    let ctx = AppContext::new(config)?;
    commands::dispatch(&ctx, cli.command).await
}
