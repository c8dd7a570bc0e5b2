use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use crawly::cli::{Cli, CliContext};
use crawly::scraper::{ChromeDriver, PageFetcher};
use crawly::{telemetry, AppConfig, SqliteStore, TaskExecutor};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    let _log_guard = telemetry::init_tracing(&config.logging).context("Failed to initialize logging")?;

    if config.metrics.enabled {
        telemetry::install_metrics_exporter(&config.metrics).context("Failed to start metrics exporter")?;
    }

    info!("Starting Crawly v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(
        SqliteStore::connect(&config.database)
            .await
            .with_context(|| format!("Failed to open price store at {}", config.database.url))?,
    );

    let driver = Arc::new(ChromeDriver::new(config.scraper.clone()));
    let fetcher = Arc::new(PageFetcher::new(driver, &config.scraper));
    let executor = Arc::new(TaskExecutor::new(
        store.clone(),
        fetcher,
        config.scraper.default_pattern.clone(),
    ));

    let context = CliContext::new(store.clone(), executor, config);
    let output = context.execute(cli.command).await;
    store.close().await;

    println!("{}", output?.render(cli.json)?);
    info!("Shutting down...");

    Ok(())
}
