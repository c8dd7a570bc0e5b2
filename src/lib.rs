pub mod cli;
pub mod config;
pub mod database;
pub mod element_finder;
pub mod executor;
pub mod models;
pub mod normalizer;
pub mod scheduler;
pub mod scraper;
pub mod telemetry;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use database::{PriceStore, SqliteStore};
pub use executor::{ExtractionOutcome, NoPriceReason, PriceExtractor, TaskExecutor};
pub use models::{PriceObservation, TargetId, TrackedTarget, UNSAVED_TARGET_ID};
pub use scheduler::{JobInfo, JobStatus, PriceScheduler, SchedulerStats};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
