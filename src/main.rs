mod cli;
mod config;
mod error;
mod monitor;
mod orchestrator;
mod output;
mod plan;
mod server;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    output::print_banner();

    info!("Starting runjenkins");
    cli.execute().await
}
