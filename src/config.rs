use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

use crate::normalizer::DEFAULT_PRICE_PATTERN;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub user_agent: String,
    /// Seconds to wait for the element, per lookup strategy.
    pub element_timeout: u64,
    pub navigation_timeout: u64,
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub default_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    /// Upper bound for one firing, in seconds.
    pub job_timeout: u64,
    /// Seconds between re-reads of the target list; 0 disables it.
    pub resync_interval_secs: u64,
    /// Minutes, used when a new target does not name an interval.
    pub default_interval: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://pricetracker.db".to_string(),
                max_connections: 8,
                acquire_timeout: 30,
            },
            scraper: ScraperConfig {
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
                element_timeout: 20,
                navigation_timeout: 30,
                chrome_path: None,
                headless: true,
                default_pattern: DEFAULT_PRICE_PATTERN.to_string(),
            },
            scheduler: SchedulerConfig {
                tick_interval_ms: 1000,
                job_timeout: 300,
                resync_interval_secs: 60,
                default_interval: 60,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                directory: None,
            },
            metrics: MetricsConfig {
                enabled: false,
                port: 9001,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Built-in defaults, so no config file is required
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // e.g. CRAWLY__SCHEDULER__TICK_INTERVAL_MS=500
            .add_source(
                Environment::with_prefix("CRAWLY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Message("Database url must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        if self.scraper.element_timeout == 0 {
            return Err(ConfigError::Message("Scraper element_timeout must be greater than 0".into()));
        }

        if self.scraper.navigation_timeout == 0 {
            return Err(ConfigError::Message("Scraper navigation_timeout must be greater than 0".into()));
        }

        if let Err(e) = regex::Regex::new(&self.scraper.default_pattern) {
            return Err(ConfigError::Message(format!("Invalid scraper default_pattern: {}", e)));
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::Message("Scheduler tick_interval_ms must be greater than 0".into()));
        }

        if self.scheduler.job_timeout == 0 {
            return Err(ConfigError::Message("Scheduler job_timeout must be greater than 0".into()));
        }

        if self.scheduler.default_interval < 1 {
            return Err(ConfigError::Message("Scheduler default_interval must be at least 1 minute".into()));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }
}
