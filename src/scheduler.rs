use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::database::PriceStore;
use crate::executor::{ExtractionOutcome, NoPriceReason, PriceExtractor};
use crate::models::{TargetId, TrackedTarget};
use crate::utils::error::AppError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    /// Registration id; changes every time the target is registered again.
    pub id: Uuid,
    pub target_id: TargetId,
    pub target_name: String,
    pub interval_secs: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    #[serde(skip)]
    last_fired: Option<Instant>,
}

impl JobInfo {
    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    fn is_due(&self, now: Instant) -> bool {
        if self.status != JobStatus::Active {
            return false;
        }
        match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Active,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub paused_jobs: usize,
    pub running_jobs: usize,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub average_run_time_ms: f64,
    pub uptime_seconds: u64,
}

/// A job picked for firing by [`PriceScheduler::take_due_jobs`].
#[derive(Debug, Clone, PartialEq)]
pub struct DueJob {
    pub registration: Uuid,
    pub target_id: TargetId,
}

/// Fires one extraction per registered target every time its interval elapses.
///
/// Cloning is cheap and every clone drives the same job table.
#[derive(Clone)]
pub struct PriceScheduler {
    store: Arc<dyn PriceStore>,
    extractor: Arc<dyn PriceExtractor>,
    jobs: Arc<RwLock<HashMap<TargetId, JobInfo>>>,
    running_jobs: Arc<AtomicUsize>,
    total_run_time_ms: Arc<AtomicU64>,
    timing_loop: Arc<Mutex<Option<JoinHandle<()>>>>,
    config: SchedulerConfig,
    start_time: DateTime<Utc>,
}

impl PriceScheduler {
    pub fn new(store: Arc<dyn PriceStore>, extractor: Arc<dyn PriceExtractor>, config: SchedulerConfig) -> Self {
        Self {
            store,
            extractor,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            running_jobs: Arc::new(AtomicUsize::new(0)),
            total_run_time_ms: Arc::new(AtomicU64::new(0)),
            timing_loop: Arc::new(Mutex::new(None)),
            config,
            start_time: Utc::now(),
        }
    }

    /// Registers every active target in the store. Returns how many were registered.
    pub async fn load_targets(&self) -> Result<usize> {
        let targets = self.store.list_targets().await?;
        let mut registered = 0;
        for target in targets.iter().filter(|t| t.is_active) {
            self.register(target).await?;
            registered += 1;
        }
        tracing::info!("Loaded {} of {} targets into the scheduler", registered, targets.len());
        Ok(registered)
    }

    /// Adds a job for the target or replaces the existing one. An inactive
    /// target is unregistered instead.
    pub async fn register(&self, target: &TrackedTarget) -> Result<()> {
        if !target.is_persisted() {
            return Err(AppError::Validation(format!(
                "cannot schedule unsaved target '{}'",
                target.name
            )));
        }
        if !target.is_active {
            self.unregister(target.id).await;
            return Ok(());
        }

        let mut jobs = self.jobs.write().await;
        let mut job_info = JobInfo {
            id: Uuid::new_v4(),
            target_id: target.id,
            target_name: target.name.clone(),
            interval_secs: target.interval().as_secs(),
            status: JobStatus::Active,
            created_at: Utc::now(),
            last_run: None,
            run_count: 0,
            success_count: 0,
            error_count: 0,
            last_error: None,
            last_fired: None,
        };

        // Keep history so a changed interval does not trigger an extra firing
        if let Some(previous) = jobs.remove(&target.id) {
            job_info.status = previous.status;
            job_info.created_at = previous.created_at;
            job_info.last_run = previous.last_run;
            job_info.run_count = previous.run_count;
            job_info.success_count = previous.success_count;
            job_info.error_count = previous.error_count;
            job_info.last_error = previous.last_error;
            job_info.last_fired = previous.last_fired;
        }

        tracing::info!(
            "Scheduled target {} ('{}') every {} minute(s) (job: {})",
            target.id,
            target.name,
            target.update_interval,
            job_info.id
        );
        jobs.insert(target.id, job_info);
        Ok(())
    }

    /// Removes the job. In-flight firings of it are left to finish.
    pub async fn unregister(&self, target_id: TargetId) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.remove(&target_id) {
            Some(job_info) => {
                tracing::info!("Unscheduled target {} (job: {})", target_id, job_info.id);
                true
            }
            None => false,
        }
    }

    /// Returns every active job whose interval has elapsed, stamping it as
    /// fired at `now`.
    pub async fn take_due_jobs(&self, now: Instant) -> Vec<DueJob> {
        let mut jobs = self.jobs.write().await;
        jobs.values_mut()
            .filter(|job| job.is_due(now))
            .map(|job| {
                job.last_fired = Some(now);
                DueJob {
                    registration: job.id,
                    target_id: job.target_id,
                }
            })
            .collect()
    }

    pub async fn get_job_info(&self, target_id: TargetId) -> Option<JobInfo> {
        let jobs = self.jobs.read().await;
        jobs.get(&target_id).cloned()
    }

    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<JobInfo> = jobs.values().cloned().collect();
        list.sort_by_key(|job| job.target_id);
        list
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        let jobs = self.jobs.read().await;

        let total_jobs = jobs.len();
        let active_jobs = jobs.values().filter(|j| j.status == JobStatus::Active).count();
        let paused_jobs = jobs.values().filter(|j| j.status == JobStatus::Paused).count();

        let total_runs: u64 = jobs.values().map(|j| j.run_count).sum();
        let completed_runs: u64 = jobs.values().map(|j| j.success_count).sum();
        let failed_runs: u64 = jobs.values().map(|j| j.error_count).sum();

        let average_run_time_ms = if total_runs > 0 {
            self.total_run_time_ms.load(Ordering::Relaxed) as f64 / total_runs as f64
        } else {
            0.0
        };

        let uptime = Utc::now().signed_duration_since(self.start_time);

        SchedulerStats {
            total_jobs,
            active_jobs,
            paused_jobs,
            running_jobs: self.running_jobs.load(Ordering::SeqCst),
            completed_runs,
            failed_runs,
            average_run_time_ms,
            uptime_seconds: uptime.num_seconds().max(0) as u64,
        }
    }

    /// A paused job stays registered but is skipped until resumed.
    pub async fn pause_job(&self, target_id: TargetId) -> Result<()> {
        self.set_status(target_id, JobStatus::Paused).await?;
        tracing::info!("Paused job for target: {}", target_id);
        Ok(())
    }

    pub async fn resume_job(&self, target_id: TargetId) -> Result<()> {
        self.set_status(target_id, JobStatus::Active).await?;
        tracing::info!("Resumed job for target: {}", target_id);
        Ok(())
    }

    async fn set_status(&self, target_id: TargetId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job_info = jobs.get_mut(&target_id).ok_or_else(|| AppError::NotFound {
            resource: format!("job for target {}", target_id),
        })?;
        job_info.status = status;
        Ok(())
    }

    /// Re-reads the store: new or changed active targets are (re-)registered,
    /// deleted or deactivated ones are unregistered.
    ///
    /// The job table is read before the store, so a job registered while the
    /// store is being listed is left alone until the next sync.
    pub async fn sync_with_store(&self) -> Result<()> {
        let current: HashMap<TargetId, (String, u64)> = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .map(|j| (j.target_id, (j.target_name.clone(), j.interval_secs)))
                .collect()
        };

        let targets = self.store.list_targets().await?;
        let wanted: HashMap<TargetId, &TrackedTarget> = targets
            .iter()
            .filter(|t| t.is_active)
            .map(|t| (t.id, t))
            .collect();

        for (id, target) in &wanted {
            let changed = match current.get(id) {
                Some((name, interval_secs)) => {
                    *name != target.name || *interval_secs != target.interval().as_secs()
                }
                None => true,
            };
            if changed {
                self.register(target).await?;
            }
        }

        for id in current.keys().filter(|id| !wanted.contains_key(*id)) {
            self.unregister(*id).await;
        }

        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        let mut timing_loop = self.timing_loop.lock().await;
        if timing_loop.is_some() {
            return Err(AppError::Internal("scheduler is already running".to_string()));
        }

        let scheduler = self.clone();
        *timing_loop = Some(tokio::spawn(async move { scheduler.run_timing_loop().await }));

        tracing::info!(
            "Price scheduler started (tick: {} ms, job timeout: {} s)",
            self.config.tick_interval_ms,
            self.config.job_timeout
        );
        Ok(())
    }

    /// Stops the timing loop. Firings already dispatched run to completion.
    pub async fn shutdown(&self) {
        let mut timing_loop = self.timing_loop.lock().await;
        if let Some(handle) = timing_loop.take() {
            handle.abort();
            tracing::info!(
                "Price scheduler shutdown ({} firings still in flight)",
                self.running_jobs.load(Ordering::SeqCst)
            );
        }
    }

    pub async fn is_running(&self) -> bool {
        self.timing_loop.lock().await.is_some()
    }

    async fn run_timing_loop(self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let resync_every = (self.config.resync_interval_secs > 0)
            .then(|| Duration::from_secs(self.config.resync_interval_secs));
        let mut last_resync = Instant::now();

        loop {
            // The first tick completes immediately
            let now = ticker.tick().await;

            for job in self.take_due_jobs(now).await {
                self.dispatch(job);
            }

            if let Some(every) = resync_every {
                if now.saturating_duration_since(last_resync) >= every {
                    last_resync = now;
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = scheduler.sync_with_store().await {
                            tracing::warn!("Failed to re-sync targets with the store: {}", e);
                        }
                    });
                }
            }
        }
    }

    fn dispatch(&self, job: DueJob) {
        tracing::debug!("Firing job {} for target {}", job.registration, job.target_id);
        metrics::counter!("crawly_job_firings_total").increment(1);

        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.execute_job(job).await });
    }

    async fn execute_job(&self, job: DueJob) {
        let in_flight = self.running_jobs.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("crawly_jobs_in_flight").set(in_flight as f64);

        let start_time = Instant::now();
        let timeout = Duration::from_secs(self.config.job_timeout);
        let outcome = match tokio::time::timeout(timeout, self.extractor.execute(job.target_id, None)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    "Firing for target {} exceeded {}s and was abandoned",
                    job.target_id,
                    self.config.job_timeout
                );
                ExtractionOutcome::NoPrice(NoPriceReason::TimedOut(self.config.job_timeout))
            }
        };
        let elapsed = start_time.elapsed();

        let in_flight = self.running_jobs.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!("crawly_jobs_in_flight").set(in_flight as f64);

        self.update_job_stats(job.target_id, &outcome, elapsed).await;
    }

    async fn update_job_stats(&self, target_id: TargetId, outcome: &ExtractionOutcome, duration: Duration) {
        self.total_run_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);

        let mut jobs = self.jobs.write().await;
        if let Some(job_info) = jobs.get_mut(&target_id) {
            job_info.last_run = Some(Utc::now());
            job_info.run_count += 1;

            match outcome {
                ExtractionOutcome::Price { .. } => {
                    job_info.success_count += 1;
                    job_info.last_error = None;
                }
                ExtractionOutcome::NoPrice(reason) => {
                    job_info.error_count += 1;
                    job_info.last_error = Some(reason.to_string());
                }
            }
        }
    }
}
