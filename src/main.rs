use anyhow::Context;
use clap::Parser;
use tempmap::cli::{run, Cli};
use tempmap::config::AppConfig;
use tempmap::utils::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let log_file = cli.log_file.clone().or_else(|| config.logging.file.clone());
    let _log_guard = init_logging(cli.verbose, &config.logging, log_file.as_deref())?;

    run(cli, config).await?;
    Ok(())
}
