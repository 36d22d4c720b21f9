//! Asynchronous diff/aggregate jobs with pollable status.
//!
//! A job moves `PENDING -> RUNNING -> DONE | FAILED` and never leaves a
//! terminal state. Submissions with the same inputs share one job, except
//! that a failure, once reported by a poll, is recomputed on resubmission.
//! Finished jobs stay in the table until nobody has polled them for the
//! retention window; after that a poll reports `NotFound` and the caller
//! resubmits.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::{aggregate, MergeStats};
use crate::diff::diff;
use crate::error::{CovError, Result};
use crate::store::CoverageStore;
use crate::tree::CoverageTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = CovError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|e| CovError::Parse(format!("invalid job id '{s}': {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobKind {
    Diff,
    Aggregate,
}

/// What a job computes. Also the de-duplication key: aggregate inputs are
/// kept sorted and unique, diff inputs keep their order because a diff is
/// not symmetric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobInputs {
    Diff { baseline: Option<i64>, target: i64 },
    Aggregate(Vec<i64>),
}

impl JobInputs {
    pub fn diff(baseline: Option<i64>, target: i64) -> Self {
        JobInputs::Diff { baseline, target }
    }

    pub fn aggregate(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        JobInputs::Aggregate(ids)
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobInputs::Diff { .. } => JobKind::Diff,
            JobInputs::Aggregate(_) => JobKind::Aggregate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// The computed tree of a finished job.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub tree: Arc<CoverageTree>,
    /// Present for aggregate jobs.
    pub merge_stats: Option<MergeStats>,
}

/// Point-in-time view of a job, as returned by [`JobRunner::poll`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub inputs: JobInputs,
    pub status: JobStatus,
    #[serde(skip)]
    pub output: Option<JobOutput>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

struct Job {
    id: JobId,
    inputs: JobInputs,
    status: JobStatus,
    output: Option<JobOutput>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    /// Completion, most recent poll or reuse; drives eviction.
    touched: Instant,
    /// A poll has returned this job's failure to a caller.
    failure_reported: bool,
}

impl Job {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            kind: self.inputs.kind(),
            inputs: self.inputs.clone(),
            status: self.status,
            output: self.output.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, Job>,
    by_inputs: HashMap<JobInputs, JobId>,
}

impl JobTable {
    fn evict_expired(&mut self, now: Instant, retention: Duration) -> usize {
        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| {
                job.status.is_terminal() && now.saturating_duration_since(job.touched) > retention
            })
            .map(|job| job.id)
            .collect();

        for id in &expired {
            if let Some(job) = self.jobs.remove(id) {
                if self.by_inputs.get(&job.inputs) == Some(id) {
                    self.by_inputs.remove(&job.inputs);
                }
                debug!(job = %id, "evicted job");
            }
        }
        expired.len()
    }
}

/// Job runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Worker threads; 0 lets rayon pick one per CPU.
    pub workers: usize,
    /// How long a finished job survives without being polled.
    pub retention: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            retention: Duration::from_secs(600),
        }
    }
}

struct Shared {
    table: Mutex<JobTable>,
    store: Arc<dyn CoverageStore>,
    retention: Duration,
    computations: AtomicU64,
}

/// Owns the job table and the worker pool. Build one per process and pass it
/// by reference.
pub struct JobRunner {
    shared: Arc<Shared>,
    pool: rayon::ThreadPool,
}

impl JobRunner {
    pub fn new(store: Arc<dyn CoverageStore>, config: RunnerConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("covmanager-job-{i}"))
            .build()
            .map_err(|e| CovError::Other(format!("failed to start job workers: {e}")))?;

        Ok(Self {
            shared: Arc::new(Shared {
                table: Mutex::new(JobTable::default()),
                store,
                retention: config.retention,
                computations: AtomicU64::new(0),
            }),
            pool,
        })
    }

    pub fn store(&self) -> &Arc<dyn CoverageStore> {
        &self.shared.store
    }

    /// Enqueue `inputs` and return the job handle without waiting.
    ///
    /// A pending, running or finished job with the same inputs is reused. A
    /// failed one is reused until a poll has reported its error; after that
    /// the next submission starts a fresh computation, so resubmitting is
    /// how a caller retries.
    pub fn submit(&self, inputs: JobInputs) -> Result<JobId> {
        if matches!(&inputs, JobInputs::Aggregate(ids) if ids.is_empty()) {
            return Err(CovError::EmptyAggregateInput);
        }

        let id = {
            let mut table = self.shared.table.lock();
            let now = Instant::now();
            table.evict_expired(now, self.shared.retention);

            if let Some(existing) = table.by_inputs.get(&inputs).copied() {
                if let Some(job) = table.jobs.get_mut(&existing) {
                    if !(job.status == JobStatus::Failed && job.failure_reported) {
                        if job.status.is_terminal() {
                            job.touched = now;
                        }
                        debug!(job = %existing, "reusing job with identical inputs");
                        return Ok(existing);
                    }
                    debug!(job = %existing, "replacing failed job");
                }
            }

            let id = JobId::new();
            table.jobs.insert(
                id,
                Job {
                    id,
                    inputs: inputs.clone(),
                    status: JobStatus::Pending,
                    output: None,
                    error: None,
                    created_at: Utc::now(),
                    completed_at: None,
                    touched: now,
                    failure_reported: false,
                },
            );
            table.by_inputs.insert(inputs.clone(), id);
            id
        };

        info!(job = %id, kind = ?inputs.kind(), inputs = ?inputs, "job submitted");
        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || shared.run(id, inputs));
        Ok(id)
    }

    /// Current state of a job. Never blocks on computation.
    pub fn poll(&self, id: JobId) -> Result<JobSnapshot> {
        let now = Instant::now();
        let mut table = self.shared.table.lock();
        table.evict_expired(now, self.shared.retention);

        let job = table.jobs.get_mut(&id).ok_or(CovError::NotFound(id))?;
        if job.status.is_terminal() {
            job.touched = now;
        }
        if job.status == JobStatus::Failed {
            job.failure_reported = true;
        }
        Ok(job.snapshot())
    }

    /// Drop finished jobs not polled within the retention window, as of now.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    /// Drop finished jobs not polled within the retention window, as of
    /// `now`.
    pub fn evict_expired_at(&self, now: Instant) -> usize {
        self.shared
            .table
            .lock()
            .evict_expired(now, self.shared.retention)
    }

    /// Number of computations started since the runner was created.
    pub fn computations(&self) -> u64 {
        self.shared.computations.load(Ordering::SeqCst)
    }

    pub fn job_count(&self) -> usize {
        self.shared.table.lock().jobs.len()
    }
}

impl Shared {
    fn run(&self, id: JobId, inputs: JobInputs) {
        {
            let mut table = self.table.lock();
            match table.jobs.get_mut(&id) {
                Some(job) => job.status = JobStatus::Running,
                None => return,
            }
        }
        self.computations.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.compute(&inputs)))
            .unwrap_or_else(|_| Err(CovError::Other("job computation panicked".to_string())));

        let mut table = self.table.lock();
        let Some(job) = table.jobs.get_mut(&id) else {
            return;
        };
        match result {
            Ok(output) => {
                info!(
                    job = %id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    lines_total = output.tree.root().totals.lines_total,
                    "job finished"
                );
                job.output = Some(output);
                job.status = JobStatus::Done;
            }
            Err(e) => {
                warn!(job = %id, error = %e, "job failed");
                job.error = Some(e.to_string());
                job.status = JobStatus::Failed;
            }
        }
        job.completed_at = Some(Utc::now());
        job.touched = Instant::now();
    }

    fn compute(&self, inputs: &JobInputs) -> Result<JobOutput> {
        match inputs {
            JobInputs::Diff { baseline, target } => {
                let base = baseline.map(|id| self.store.load_tree(id)).transpose()?;
                let tgt = self.store.load_tree(*target)?;
                let tree = diff(base.as_deref(), &tgt)?;
                Ok(JobOutput {
                    tree: Arc::new(tree),
                    merge_stats: None,
                })
            }
            JobInputs::Aggregate(ids) => {
                let trees = ids
                    .iter()
                    .map(|&id| self.store.load_tree(id))
                    .collect::<Result<Vec<_>>>()?;
                let merged = aggregate(&trees)?;
                Ok(JobOutput {
                    tree: Arc::new(merged.tree),
                    merge_stats: Some(merged.stats),
                })
            }
        }
    }
}
