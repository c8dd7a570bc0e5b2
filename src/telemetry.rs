use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LoggingConfig, MetricsConfig};
use crate::utils::error::AppError;
use crate::Result;

const LOG_FILE_PREFIX: &str = "crawly.log";

/// Installs the global subscriber. `RUST_LOG` wins over `logging.level`.
///
/// When `logging.directory` is set, events are also written to a daily
/// rolling file; the returned guard must be held until exit so buffered
/// lines get flushed.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::Validation(format!("invalid log level '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .map_err(|e| AppError::Internal(format!("failed to install tracing subscriber: {}", e)))?;
            Ok(Some(guard))
        }
        None => {
            registry
                .try_init()
                .map_err(|e| AppError::Internal(format!("failed to install tracing subscriber: {}", e)))?;
            Ok(None)
        }
    }
}

/// Serves `/metrics` in Prometheus format. Must run inside the tokio runtime.
pub fn install_metrics_exporter(config: &MetricsConfig) -> Result<SocketAddr> {
    let address = SocketAddr::from(([0, 0, 0, 0], config.port));

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| AppError::Internal(format!("failed to start metrics exporter: {}", e)))?;

    describe_metrics();
    tracing::info!("Prometheus metrics exposed on {}", address);
    Ok(address)
}

fn describe_metrics() {
    metrics::describe_counter!(
        "crawly_extractions_total",
        "Extraction attempts, labelled by outcome"
    );
    metrics::describe_histogram!(
        "crawly_extraction_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of one extraction attempt"
    );
    metrics::describe_counter!("crawly_job_firings_total", "Scheduled firings dispatched");
    metrics::describe_gauge!("crawly_jobs_in_flight", "Firings currently running");
}
