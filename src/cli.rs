use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use validator::Validate;

use crate::config::AppConfig;
use crate::database::PriceStore;
use crate::executor::{ExtractionOutcome, NoPriceReason, PriceExtractor};
use crate::models::{PriceObservation, TargetId, TrackedTarget, UpdateTarget, UNSAVED_TARGET_ID};
use crate::scheduler::PriceScheduler;
use crate::utils::error::AppError;
use crate::Result;

#[derive(Parser, Debug)]
#[command(name = "crawly")]
#[command(version, about = "Watches page elements and records their prices over time")]
pub struct Cli {
    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Start the scheduler and keep extracting until Ctrl-C
    Run,
    /// Try a new target once; it is saved only if a price is found
    Trial(TrialArgs),
    /// Run one extraction for a stored target right now
    Check { id: TargetId },
    /// List stored targets
    List,
    /// Show recorded prices for one or more targets
    History {
        #[arg(required = true)]
        ids: Vec<TargetId>,
    },
    /// Change a stored target
    Update(UpdateArgs),
    /// Delete targets together with their price history
    Delete {
        #[arg(required = true)]
        ids: Vec<TargetId>,
    },
}

#[derive(Args, Debug, PartialEq)]
pub struct TrialArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub url: String,
    /// XPath expression or CSS selector of the price element
    #[arg(long)]
    pub selector: String,
    /// Extraction regex; the configured default is used when omitted
    #[arg(long, default_value = "")]
    pub pattern: String,
    /// Minutes between scheduled extractions
    #[arg(long)]
    pub interval: Option<i64>,
}

#[derive(Args, Debug, PartialEq)]
pub struct UpdateArgs {
    pub id: TargetId,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub selector: Option<String>,
    #[arg(long)]
    pub pattern: Option<String>,
    #[arg(long)]
    pub interval: Option<i64>,
    #[arg(long)]
    pub active: Option<bool>,
}

impl From<UpdateArgs> for UpdateTarget {
    fn from(args: UpdateArgs) -> Self {
        Self {
            name: args.name,
            url: args.url,
            selector: args.selector,
            pattern: args.pattern,
            update_interval: args.interval,
            is_active: args.active,
        }
    }
}

/// What a command produced, rendered as text or JSON by [`CommandOutput::render`].
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CommandOutput {
    Targets(Vec<TrackedTarget>),
    History(Vec<PriceObservation>),
    Extraction(ExtractionOutcome),
    Target(TrackedTarget),
    Deleted { deleted: Vec<TargetId>, missing: Vec<TargetId> },
    Stopped,
}

impl CommandOutput {
    pub fn render(&self, json: bool) -> Result<String> {
        if json {
            return Ok(serde_json::to_string_pretty(self)?);
        }

        let mut out = String::new();
        match self {
            CommandOutput::Targets(targets) if targets.is_empty() => out.push_str("No targets."),
            CommandOutput::Targets(targets) => {
                for target in targets {
                    let _ = writeln!(
                        out,
                        "{:>4}  {:<30}  every {:>4} min  {:<8}  {}",
                        target.id,
                        target.name,
                        target.update_interval,
                        if target.is_active { "active" } else { "inactive" },
                        target.url
                    );
                }
            }
            CommandOutput::History(rows) if rows.is_empty() => out.push_str("No prices recorded."),
            CommandOutput::History(rows) => {
                for row in rows {
                    let _ = writeln!(
                        out,
                        "{:>4}  {}  {:.2}",
                        row.target_id,
                        row.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        row.price
                    );
                }
            }
            CommandOutput::Extraction(ExtractionOutcome::Price { target_id, price, observed_at }) => {
                let _ = write!(
                    out,
                    "Target {}: {:.2} at {}",
                    target_id,
                    price,
                    observed_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            CommandOutput::Extraction(ExtractionOutcome::NoPrice(reason)) => {
                let _ = write!(out, "No price: {}", reason);
            }
            CommandOutput::Target(target) => {
                let _ = write!(out, "Target {} ('{}') saved", target.id, target.name);
            }
            CommandOutput::Deleted { deleted, missing } => {
                let _ = write!(out, "Deleted {} target(s)", deleted.len());
                if !missing.is_empty() {
                    let _ = write!(out, "; not found: {:?}", missing);
                }
            }
            CommandOutput::Stopped => out.push_str("Stopped."),
        }
        Ok(out.trim_end().to_string())
    }
}

/// Everything the commands need, wired up once by the binary.
pub struct CliContext {
    store: Arc<dyn PriceStore>,
    extractor: Arc<dyn PriceExtractor>,
    config: AppConfig,
}

impl CliContext {
    pub fn new(store: Arc<dyn PriceStore>, extractor: Arc<dyn PriceExtractor>, config: AppConfig) -> Self {
        Self {
            store,
            extractor,
            config,
        }
    }

    pub async fn execute(&self, command: Command) -> Result<CommandOutput> {
        match command {
            Command::Run => self.run().await,
            Command::Trial(args) => self.trial(args).await,
            Command::Check { id } => self.check(id).await,
            Command::List => Ok(CommandOutput::Targets(self.store.list_targets().await?)),
            Command::History { ids } => Ok(CommandOutput::History(self.store.price_history(&ids).await?)),
            Command::Update(args) => self.update(args).await,
            Command::Delete { ids } => self.delete(ids).await,
        }
    }

    async fn run(&self) -> Result<CommandOutput> {
        let scheduler = PriceScheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.extractor),
            self.config.scheduler.clone(),
        );
        scheduler.load_targets().await?;
        scheduler.start().await?;

        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl-C, shutting down");
        scheduler.shutdown().await;

        Ok(CommandOutput::Stopped)
    }

    /// The target is committed by the executor together with the first price
    /// it yields; any other outcome leaves the store untouched and is reported
    /// as an error. The name check here is advisory, the store enforces it.
    async fn trial(&self, args: TrialArgs) -> Result<CommandOutput> {
        let target = TrackedTarget::unsaved(
            args.name,
            args.url,
            args.selector,
            args.pattern,
            args.interval.unwrap_or(self.config.scheduler.default_interval),
        );
        target.validate()?;
        self.ensure_name_is_free(&target.name, None).await?;

        let selector = target.selector.clone();
        match self.extractor.execute(UNSAVED_TARGET_ID, Some(target)).await {
            outcome @ ExtractionOutcome::Price { .. } => Ok(CommandOutput::Extraction(outcome)),
            ExtractionOutcome::NoPrice(NoPriceReason::ElementNotFound) => {
                Err(AppError::ElementNotFound { selector })
            }
            ExtractionOutcome::NoPrice(reason @ NoPriceReason::NameTaken(_)) => {
                Err(AppError::Validation(reason.to_string()))
            }
            ExtractionOutcome::NoPrice(reason) => Err(AppError::Validation(format!(
                "trial run found no price, target not saved: {}",
                reason
            ))),
        }
    }

    async fn check(&self, id: TargetId) -> Result<CommandOutput> {
        if self.store.get_target(id).await?.is_none() {
            return Err(AppError::NotFound {
                resource: format!("target {}", id),
            });
        }
        Ok(CommandOutput::Extraction(self.extractor.execute(id, None).await))
    }

    async fn update(&self, args: UpdateArgs) -> Result<CommandOutput> {
        let id = args.id;
        let mut target = self.store.get_target(id).await?.ok_or_else(|| AppError::NotFound {
            resource: format!("target {}", id),
        })?;

        let update = UpdateTarget::from(args);
        if let Some(name) = &update.name {
            self.ensure_name_is_free(name, Some(id)).await?;
        }

        target.apply(update);
        target.validate()?;

        if !self.store.update_target(&target).await? {
            return Err(AppError::NotFound {
                resource: format!("target {}", id),
            });
        }
        tracing::info!("Updated target {} ('{}')", id, target.name);
        Ok(CommandOutput::Target(target))
    }

    async fn delete(&self, ids: Vec<TargetId>) -> Result<CommandOutput> {
        let mut deleted = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            if self.store.delete_target(id).await? {
                deleted.push(id);
            } else {
                tracing::warn!("Target {} does not exist", id);
                missing.push(id);
            }
        }
        Ok(CommandOutput::Deleted { deleted, missing })
    }

    async fn ensure_name_is_free(&self, name: &str, own_id: Option<TargetId>) -> Result<()> {
        match self.store.find_target_by_name(name).await? {
            Some(existing) if Some(existing.id) != own_id => Err(AppError::Validation(format!(
                "a target named '{}' already exists (id {})",
                name, existing.id
            ))),
            _ => Ok(()),
        }
    }
}
