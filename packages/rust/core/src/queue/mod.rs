//! In-process scan job queue.
//!
//! Jobs are kept in a mutex-guarded map and dispatched through an mpsc
//! channel to a worker pool bounded by a semaphore. Each attempt runs in its
//! own task so an `Err` or a panic is caught at the job boundary and drives
//! the retry policy:
//!
//! ```text
//! submit ─► Queued ─► Active ─► Completed
//!                       │  ▲
//!                       │  └── Retrying ◄─ backoff: base × 2^(n−1)
//!                       ▼
//!                     Failed (non-retryable, cancelled, or max attempts)
//! ```

mod limiter;

pub use limiter::StartRateLimiter;

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use a11yscan_crawler::ProgressSink;
use a11yscan_shared::{
    A11yScanError, AppConfig, DefaultsConfig, JobId, JobState, JobStatusView, QueueConfig,
    QueueStats, Result, ScanJob, ScanLimits, ScanProfilesConfig, ScanRequest, ScanResult,
    Standard,
};

/// Reason recorded on jobs that were cancelled.
pub const CANCELLED_REASON: &str = "cancelled";

/// Runs one attempt of a scan job.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(
        &self,
        job: ScanJob,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ScanResult>;
}

struct JobEntry {
    job: ScanJob,
    cancel: CancellationToken,
}

struct QueueInner {
    config: QueueConfig,
    defaults: DefaultsConfig,
    profiles: ScanProfilesConfig,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    /// Signalled whenever a job reaches a terminal state.
    settled: Notify,
    sender: mpsc::UnboundedSender<JobId>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<JobId>>>,
    shutdown: CancellationToken,
}

/// Handle to the job queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

/// Stops the dispatcher and the retention sweeper started by [`JobQueue::start`].
pub struct QueueHandle {
    shutdown: CancellationToken,
    dispatcher: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl QueueHandle {
    /// Stop accepting work and wait for the background tasks to exit.
    /// Attempts already running are left to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.dispatcher.await {
            warn!(error = %e, "dispatcher task ended abnormally");
        }
        if let Err(e) = self.sweeper.await {
            warn!(error = %e, "sweeper task ended abnormally");
        }
    }
}

impl JobQueue {
    /// Create an idle queue. Jobs are accepted right away but only run once
    /// [`JobQueue::start`] is called.
    pub fn new(config: &AppConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                config: config.queue.clone(),
                defaults: config.defaults.clone(),
                profiles: config.scan_profiles.clone(),
                jobs: Mutex::new(HashMap::new()),
                settled: Notify::new(),
                sender,
                receiver: Mutex::new(Some(receiver)),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Submission and queries
    // -----------------------------------------------------------------------

    /// Validate a request and enqueue it as a new job.
    #[instrument(skip_all, fields(url = %request.url))]
    pub fn submit(&self, request: ScanRequest) -> Result<JobId> {
        if self.inner.shutdown.is_cancelled() {
            return Err(A11yScanError::QueueClosed);
        }

        let target = validate_target(&request.url)?;
        let limits = self.resolve_limits(&request)?;
        let standards: BTreeSet<Standard> = match request.standards {
            Some(s) if !s.is_empty() => s,
            _ => self.inner.defaults.standards.clone(),
        };
        let id = match request.job_id.as_deref() {
            Some(raw) => raw.parse::<JobId>().map_err(A11yScanError::invalid_spec)?,
            None => JobId::new(),
        };

        let job = ScanJob {
            id: id.clone(),
            target_url: target.to_string(),
            limits,
            standards,
            wcag_level: request.wcag_level,
            scan_type: request.scan_type,
            tenant_id: request.tenant_id,
            state: JobState::Queued,
            attempts: 0,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            failed_reason: None,
            result: None,
        };

        {
            let mut jobs = self.jobs();
            if jobs.contains_key(&id) {
                return Err(A11yScanError::invalid_spec(format!("job id {id} already exists")));
            }
            jobs.insert(
                id.clone(),
                JobEntry {
                    job,
                    cancel: CancellationToken::new(),
                },
            );
        }

        if self.inner.sender.send(id.clone()).is_err() {
            self.jobs().remove(&id);
            return Err(A11yScanError::QueueClosed);
        }

        info!(job_id = %id, max_depth = limits.max_depth, max_pages = limits.max_pages, "job submitted");
        Ok(id)
    }

    fn resolve_limits(&self, request: &ScanRequest) -> Result<ScanLimits> {
        let profile = self.inner.profiles.limits_for(request.scan_type);
        let limits = ScanLimits {
            max_depth: request.max_depth.unwrap_or(profile.max_depth),
            max_pages: request.max_pages.unwrap_or(profile.max_pages),
        };
        if limits.max_pages == 0 {
            return Err(A11yScanError::invalid_spec("maxPages must be at least 1"));
        }
        Ok(limits)
    }

    /// Snapshot of a job, or `NotFound`.
    pub fn get_job(&self, id: &JobId) -> Result<ScanJob> {
        self.jobs()
            .get(id)
            .map(|e| e.job.clone())
            .ok_or_else(|| A11yScanError::NotFound(id.to_string()))
    }

    pub fn status(&self, id: &JobId) -> Result<JobStatusView> {
        self.get_job(id).map(|job| JobStatusView::from(&job))
    }

    /// Job counts by state.
    pub fn stats(&self) -> QueueStats {
        let jobs = self.jobs();
        let mut stats = QueueStats {
            total: jobs.len(),
            ..QueueStats::default()
        };
        for entry in jobs.values() {
            match entry.job.state {
                JobState::Queued => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Retrying => stats.delayed += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Record progress for an active job. Progress never decreases.
    pub fn update_progress(&self, id: &JobId, percent: u8) -> Result<()> {
        let mut jobs = self.jobs();
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| A11yScanError::NotFound(id.to_string()))?;
        let job = &mut entry.job;

        if job.state != JobState::Active {
            return Err(A11yScanError::NotActive {
                job_id: id.to_string(),
                state: job.state.to_string(),
            });
        }
        if percent > 100 || percent < job.progress {
            return Err(A11yScanError::ProgressRegression {
                job_id: id.to_string(),
                previous: job.progress,
                requested: percent,
            });
        }
        job.progress = percent;
        Ok(())
    }

    /// Resolve once the job is `Completed` or `Failed`.
    pub async fn wait_for(&self, id: &JobId) -> Result<ScanJob> {
        loop {
            // Created before the check so a settle in between is not missed.
            let settled = self.inner.settled.notified();
            let job = self.get_job(id)?;
            if job.state.is_terminal() {
                return Ok(job);
            }
            settled.await;
        }
    }

    /// Cancel a job. Running attempts observe the token; a job waiting for
    /// its retry fails right away.
    pub fn cancel(&self, id: &JobId) -> Result<()> {
        let mut jobs = self.jobs();
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| A11yScanError::NotFound(id.to_string()))?;
        if entry.job.state.is_terminal() {
            return Ok(());
        }

        entry.cancel.cancel();
        info!(job_id = %id, state = %entry.job.state, "job cancellation requested");

        if entry.job.state == JobState::Retrying {
            fail(&mut entry.job, CANCELLED_REASON.to_string());
            drop(jobs);
            self.inner.settled.notify_waiters();
        }
        Ok(())
    }

    /// Drop terminal jobs older than their retention period. Returns the
    /// number of jobs removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let completed_ttl = retention(self.inner.config.completed_retention_secs);
        let failed_ttl = retention(self.inner.config.failed_retention_secs);

        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, entry| match (entry.job.state, entry.job.finished_at) {
            (JobState::Completed, Some(finished)) => now - finished < completed_ttl,
            (JobState::Failed, Some(finished)) => now - finished < failed_ttl,
            _ => true,
        });
        before - jobs.len()
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    /// Start the worker pool and the retention sweeper.
    pub fn start(&self, processor: Arc<dyn JobProcessor>) -> Result<QueueHandle> {
        let receiver = self
            .inner
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| A11yScanError::config("job queue already started"))?;

        let shutdown = self.inner.shutdown.clone();
        let dispatcher = tokio::spawn(self.clone().dispatch(receiver, processor, shutdown.clone()));
        let sweeper = tokio::spawn(self.clone().sweep(shutdown.clone()));

        Ok(QueueHandle {
            shutdown,
            dispatcher,
            sweeper,
        })
    }

    async fn dispatch(
        self,
        mut receiver: mpsc::UnboundedReceiver<JobId>,
        processor: Arc<dyn JobProcessor>,
        shutdown: CancellationToken,
    ) {
        let config = &self.inner.config;
        let pool = Arc::new(Semaphore::new(config.pool_size.max(1)));
        let mut limiter = StartRateLimiter::new(
            config.rate_limit_max_starts,
            Duration::from_secs(config.rate_limit_window_secs),
        );

        info!(
            pool_size = config.pool_size,
            rate_limit_max_starts = config.rate_limit_max_starts,
            rate_limit_window_secs = config.rate_limit_window_secs,
            "job dispatcher started"
        );

        loop {
            let id = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            if !self.dispatchable(&id) {
                continue;
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = pool.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = limiter.acquire() => {}
            }

            let Some((job, cancel)) = self.activate(&id) else {
                continue;
            };

            let queue = self.clone();
            let processor = processor.clone();
            tokio::spawn(async move {
                queue.run_attempt(job, cancel, processor).await;
                drop(permit);
            });
        }

        info!("job dispatcher stopped");
    }

    async fn sweep(self, shutdown: CancellationToken) {
        let period = Duration::from_secs(self.inner.config.sweep_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        // First tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("retention sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    let purged = self.purge_expired();
                    if purged > 0 {
                        info!(purged, "expired jobs purged");
                    }
                }
            }
        }
    }

    /// Whether `id` still waits for an attempt. Stale ids are dropped and
    /// jobs cancelled while waiting are settled here, before they hold a
    /// worker or a start slot.
    fn dispatchable(&self, id: &JobId) -> bool {
        let cancelled = match self.jobs().get(id) {
            Some(entry) if matches!(entry.job.state, JobState::Queued | JobState::Retrying) => {
                entry.cancel.is_cancelled()
            }
            _ => {
                debug!(job_id = %id, "stale dispatch ignored");
                return false;
            }
        };
        if cancelled {
            // Fails the job without starting an attempt.
            let _ = self.activate(id);
            return false;
        }
        true
    }

    /// Queued/Retrying → Active, atomically under the job lock.
    fn activate(&self, id: &JobId) -> Option<(ScanJob, CancellationToken)> {
        let mut jobs = self.jobs();
        let entry = jobs.get_mut(id)?;

        if !matches!(entry.job.state, JobState::Queued | JobState::Retrying) {
            debug!(job_id = %id, state = %entry.job.state, "stale dispatch ignored");
            return None;
        }
        transition(&mut entry.job, JobState::Active);

        if entry.cancel.is_cancelled() {
            fail(&mut entry.job, CANCELLED_REASON.to_string());
            drop(jobs);
            self.inner.settled.notify_waiters();
            return None;
        }

        entry.job.attempts += 1;
        entry.job.started_at.get_or_insert_with(Utc::now);
        Some((entry.job.clone(), entry.cancel.clone()))
    }

    #[instrument(skip_all, fields(job_id = %job.id, attempt = job.attempts))]
    async fn run_attempt(
        &self,
        job: ScanJob,
        cancel: CancellationToken,
        processor: Arc<dyn JobProcessor>,
    ) {
        let id = job.id.clone();
        info!(url = %job.target_url, "attempt started");

        let progress: Arc<dyn ProgressSink> = Arc::new(JobProgress {
            queue: self.clone(),
            job_id: id.clone(),
        });
        let attempt = tokio::spawn(async move { processor.process(job, progress, cancel).await });

        let outcome = match attempt.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(A11yScanError::Worker(format!(
                "attempt panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(e) => Err(A11yScanError::Worker(e.to_string())),
        };

        self.settle(&id, outcome);
    }

    /// Apply the outcome of an attempt: complete, retry, or fail.
    fn settle(&self, id: &JobId, outcome: Result<ScanResult>) {
        let retry_after = {
            let mut jobs = self.jobs();
            let Some(entry) = jobs.get_mut(id) else {
                warn!(job_id = %id, "attempt finished for unknown job");
                return;
            };
            let job = &mut entry.job;

            if entry.cancel.is_cancelled() {
                fail(job, CANCELLED_REASON.to_string());
                None
            } else {
                match outcome {
                    Ok(result) => {
                        transition(job, JobState::Completed);
                        job.progress = 100;
                        job.finished_at = Some(Utc::now());
                        job.failed_reason = None;
                        info!(
                            job_id = %id,
                            pages = result.pages.len(),
                            compliance_score = result.compliance_score,
                            "job completed"
                        );
                        job.result = Some(result);
                        None
                    }
                    Err(A11yScanError::Cancelled) => {
                        fail(job, CANCELLED_REASON.to_string());
                        None
                    }
                    Err(e) if !e.is_retryable() => {
                        fail(job, e.to_string());
                        None
                    }
                    Err(e) if job.attempts >= self.inner.config.max_attempts => {
                        let exhausted = A11yScanError::RetryExhausted {
                            attempts: job.attempts,
                            reason: e.to_string(),
                        };
                        fail(job, exhausted.to_string());
                        None
                    }
                    Err(e) => {
                        transition(job, JobState::Retrying);
                        job.failed_reason = Some(e.to_string());
                        let delay = self.inner.config.backoff_delay(job.attempts);
                        warn!(
                            job_id = %id,
                            attempt = job.attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "attempt failed, retrying"
                        );
                        Some(delay)
                    }
                }
            }
        };

        match retry_after {
            Some(delay) => self.schedule_retry(id.clone(), delay),
            None => self.inner.settled.notify_waiters(),
        }
    }

    fn schedule_retry(&self, id: JobId, delay: Duration) {
        let sender = self.inner.sender.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if sender.send(id).is_err() {
                        debug!("queue closed before retry");
                    }
                }
            }
        });
    }
}

/// Feeds crawl progress into the job store.
struct JobProgress {
    queue: JobQueue,
    job_id: JobId,
}

impl ProgressSink for JobProgress {
    fn report(&self, percent: u8) {
        if let Err(e) = self.queue.update_progress(&self.job_id, percent) {
            debug!(job_id = %self.job_id, error = %e, "progress update ignored");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_target(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| A11yScanError::invalid_spec(format!("invalid url {raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(A11yScanError::invalid_spec(format!(
            "url must use http or https, got {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(A11yScanError::invalid_spec(format!("url {raw:?} has no host")));
    }
    Ok(url)
}

fn transition(job: &mut ScanJob, to: JobState) {
    if !job.state.can_transition_to(to) {
        error!(job_id = %job.id, from = %job.state, to = %to, "invalid job transition");
    }
    job.state = to;
}

fn fail(job: &mut ScanJob, reason: String) {
    transition(job, JobState::Failed);
    job.finished_at = Some(Utc::now());
    warn!(job_id = %job.id, attempts = job.attempts, reason = %reason, "job failed");
    job.failed_reason = Some(reason);
}

fn retention(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
