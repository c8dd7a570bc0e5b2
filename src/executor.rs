use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

use crate::database::PriceStore;
use crate::models::{TargetId, TrackedTarget};
use crate::normalizer::{parse_price, PricePattern};
use crate::scraper::{FetchOutcome, PageFetcher};
use crate::utils::error::AppError;

/// Why a firing produced no usable price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NoPriceReason {
    TargetMissing,
    ElementNotFound,
    Fetch(String),
    NoMatch,
    Parse(String),
    Persistence(String),
    /// Another stored target with a different definition owns this name.
    NameTaken(String),
    /// The firing did not finish within the scheduler's job timeout.
    TimedOut(u64),
}

impl fmt::Display for NoPriceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoPriceReason::TargetMissing => f.write_str("target no longer exists"),
            NoPriceReason::ElementNotFound => f.write_str("element not found"),
            NoPriceReason::Fetch(msg) => write!(f, "fetch failed: {}", msg),
            NoPriceReason::NoMatch => f.write_str("pattern did not match the element text"),
            NoPriceReason::Parse(msg) => write!(f, "not a number: {}", msg),
            NoPriceReason::Persistence(msg) => write!(f, "could not store result: {}", msg),
            NoPriceReason::NameTaken(name) => write!(f, "a different target named '{}' already exists", name),
            NoPriceReason::TimedOut(secs) => write!(f, "timed out after {}s", secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ExtractionOutcome {
    Price {
        target_id: TargetId,
        price: f64,
        observed_at: DateTime<Utc>,
    },
    NoPrice(NoPriceReason),
}

impl ExtractionOutcome {
    pub fn price(&self) -> Option<f64> {
        match self {
            ExtractionOutcome::Price { price, .. } => Some(*price),
            ExtractionOutcome::NoPrice(_) => None,
        }
    }

    pub fn is_price(&self) -> bool {
        matches!(self, ExtractionOutcome::Price { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExtractionOutcome::Price { .. } => "price",
            ExtractionOutcome::NoPrice(NoPriceReason::TargetMissing) => "target_missing",
            ExtractionOutcome::NoPrice(NoPriceReason::ElementNotFound) => "element_not_found",
            ExtractionOutcome::NoPrice(NoPriceReason::Fetch(_)) => "fetch_error",
            ExtractionOutcome::NoPrice(NoPriceReason::NoMatch) => "no_match",
            ExtractionOutcome::NoPrice(NoPriceReason::Parse(_)) => "parse_error",
            ExtractionOutcome::NoPrice(NoPriceReason::Persistence(_)) => "persistence_error",
            ExtractionOutcome::NoPrice(NoPriceReason::NameTaken(_)) => "name_taken",
            ExtractionOutcome::NoPrice(NoPriceReason::TimedOut(_)) => "timeout",
        }
    }
}

/// Runs one extraction attempt for one target.
#[async_trait]
pub trait PriceExtractor: Send + Sync {
    /// With `inline` set, that definition is used as is; otherwise the target
    /// is loaded from the store by id.
    async fn execute(&self, target_id: TargetId, inline: Option<TrackedTarget>) -> ExtractionOutcome;
}

pub struct TaskExecutor {
    store: Arc<dyn PriceStore>,
    fetcher: Arc<PageFetcher>,
    default_pattern: String,
}

impl TaskExecutor {
    pub fn new(store: Arc<dyn PriceStore>, fetcher: Arc<PageFetcher>, default_pattern: impl Into<String>) -> Self {
        Self {
            store,
            fetcher,
            default_pattern: default_pattern.into(),
        }
    }

    async fn resolve(
        &self,
        target_id: TargetId,
        inline: Option<TrackedTarget>,
    ) -> Result<TrackedTarget, NoPriceReason> {
        if let Some(mut target) = inline {
            target.id = target_id;
            return Ok(target);
        }

        match self.store.get_target(target_id).await {
            Ok(Some(target)) => Ok(target),
            Ok(None) => Err(NoPriceReason::TargetMissing),
            Err(e) => Err(NoPriceReason::Persistence(e.to_string())),
        }
    }

    async fn fetch_text(&self, target: &TrackedTarget) -> Result<String, NoPriceReason> {
        let fetcher = Arc::clone(&self.fetcher);
        let url = target.url.clone();
        let selector = target.selector.clone();

        let fetched = tokio::task::spawn_blocking(move || fetcher.fetch(&url, &selector))
            .await
            .map_err(|e| NoPriceReason::Fetch(format!("browser worker failed: {}", e)))?;

        match fetched {
            Ok(FetchOutcome::Found { text, .. }) => Ok(text),
            Ok(FetchOutcome::NotFound) => Err(NoPriceReason::ElementNotFound),
            Err(e) => Err(NoPriceReason::Fetch(e.to_string())),
        }
    }

    fn extract(&self, target: &TrackedTarget, text: &str) -> Result<f64, NoPriceReason> {
        let pattern = PricePattern::compile(&target.pattern, &self.default_pattern)
            .map_err(|e| NoPriceReason::Parse(e.to_string()))?;
        let normalized = pattern.normalize(text).ok_or(NoPriceReason::NoMatch)?;
        parse_price(&normalized).map_err(|e| match e {
            AppError::Parse { message } => NoPriceReason::Parse(message),
            other => NoPriceReason::Parse(other.to_string()),
        })
    }

    /// An unsaved target is committed in the same transaction as its first
    /// observation, so a failed write leaves nothing behind.
    async fn record(&self, target: &TrackedTarget, price: f64) -> crate::Result<(TargetId, DateTime<Utc>)> {
        let observed_at = Utc::now();
        if target.is_persisted() {
            self.store.insert_observation(target.id, price, observed_at).await?;
            return Ok((target.id, observed_at));
        }

        let target_id = self
            .store
            .insert_target_with_observation(target, price, observed_at)
            .await?;
        tracing::info!("Committed target '{}' as {}", target.name, target_id);
        Ok((target_id, observed_at))
    }

    async fn run(&self, target_id: TargetId, inline: Option<TrackedTarget>) -> ExtractionOutcome {
        let target = match self.resolve(target_id, inline).await {
            Ok(target) => target,
            Err(reason) => return ExtractionOutcome::NoPrice(reason),
        };

        tracing::info!("Grabbing '{}' from {}", target.name, target.url);

        let text = match self.fetch_text(&target).await {
            Ok(text) => text,
            Err(reason) => return ExtractionOutcome::NoPrice(reason),
        };

        let price = match self.extract(&target, &text) {
            Ok(price) => price,
            Err(reason) => {
                tracing::info!("No price in {:?} for '{}': {}", text, target.name, reason);
                return ExtractionOutcome::NoPrice(reason);
            }
        };

        match self.record(&target, price).await {
            Ok((target_id, observed_at)) => {
                tracing::info!("Price for '{}' ({}): {}", target.name, target_id, price);
                ExtractionOutcome::Price {
                    target_id,
                    price,
                    observed_at,
                }
            }
            Err(AppError::Conflict(message)) => {
                tracing::warn!("Not committing '{}': {}", target.name, message);
                ExtractionOutcome::NoPrice(NoPriceReason::NameTaken(target.name.clone()))
            }
            Err(e) => {
                tracing::error!("Failed to store price {} for '{}': {}", price, target.name, e);
                ExtractionOutcome::NoPrice(NoPriceReason::Persistence(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl PriceExtractor for TaskExecutor {
    async fn execute(&self, target_id: TargetId, inline: Option<TrackedTarget>) -> ExtractionOutcome {
        let start_time = Instant::now();
        let outcome = self.run(target_id, inline).await;

        if let ExtractionOutcome::NoPrice(reason) = &outcome {
            tracing::warn!("No price for target {}: {}", target_id, reason);
        }
        metrics::counter!("crawly_extractions_total", "outcome" => outcome.label()).increment(1);
        metrics::histogram!("crawly_extraction_duration_seconds").record(start_time.elapsed().as_secs_f64());

        outcome
    }
}
