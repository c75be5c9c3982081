use async_trait::async_trait;
use domain::{Job, JobId, JobMeta, JobStatus, Priority, Queue};

#[derive(Debug, thiserror::Error, Clone)]
pub enum SchedulerError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("dependency {0} not found")]
    DependencyNotFound(JobId),
}

/// Arguments for `JobScheduler::enqueue` — `fn, args, depends_on=...,
/// job_id=..., meta=...` (§4.H).
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub queue: Queue,
    pub function: String,
    pub args: serde_json::Value,
    pub priority: Priority,
    pub dependency_ids: Vec<JobId>,
    pub timeout_secs: u64,
    pub result_ttl_secs: u64,
    pub description: Option<String>,
    pub meta: JobMeta,
    pub max_retries: u32,
    /// If set, used as the job's id instead of a freshly generated one —
    /// lets a caller pass a stable `job_id` so a controller can look its
    /// own record up later (the zombie check, §4.G.a).
    pub job_id: Option<JobId>,
}

impl Default for EnqueueRequest {
    fn default() -> Self {
        Self {
            queue: Queue::Default,
            function: String::new(),
            args: serde_json::Value::Null,
            priority: Priority::Normal,
            dependency_ids: Vec::new(),
            timeout_secs: 600,
            result_ttl_secs: 24 * 3600,
            description: None,
            meta: JobMeta::default(),
            max_retries: 0,
            job_id: None,
        }
    }
}

/// A handle a long-running job/controller holds onto itself, so it can do
/// the zombie check (§4.G.a) and push meta updates without round-tripping
/// through the scheduler's enqueue path again.
#[async_trait]
pub trait JobHandle: Send + Sync {
    fn job_id(&self) -> JobId;

    /// Returns `false` once the scheduler has purged this job's record —
    /// e.g. an operator cancelled it, or it was garbage-collected after
    /// `result_ttl`. Long-running jobs call this every loop tick.
    async fn is_alive(&self) -> Result<bool, SchedulerError>;

    /// Atomically merge `meta` into the job's stored metadata (§4.G.e).
    async fn update_meta(&self, meta: JobMeta) -> Result<(), SchedulerError>;
}

/// Job Scheduler contract (§4.H).
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Enqueue a job. Runnable immediately if `dependency_ids` is empty or
    /// all dependencies have already finished; otherwise the job is held as
    /// `Deferred` until its dependencies resolve.
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, SchedulerError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, SchedulerError>;

    async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>, SchedulerError>;

    /// Pop the next runnable job from `queue`, marking it `Running`. Returns
    /// `None` if nothing is ready.
    async fn dequeue(&self, queue: Queue) -> Result<Option<Job>, SchedulerError>;

    /// Record a successful result, persist it for `result_ttl_secs`, and
    /// release any dependents whose last unmet dependency this was.
    async fn mark_finished(&self, job_id: JobId, result: serde_json::Value) -> Result<(), SchedulerError>;

    /// Record a failure. If the job has retries remaining, it is
    /// re-enqueued with `retry_count` incremented; otherwise it is marked
    /// `Failed` and every dependent (transitively) is marked
    /// `DeferredForever` (§4.H default fail-fast policy).
    async fn mark_failed(&self, job_id: JobId, error: String) -> Result<(), SchedulerError>;

    async fn update_meta(&self, job_id: JobId, meta: JobMeta) -> Result<(), SchedulerError>;

    /// Cancel a job: its dependents never become runnable. In-flight work
    /// observes this the next time it calls `is_alive`.
    async fn cancel(&self, job_id: JobId) -> Result<(), SchedulerError>;

    async fn is_alive(&self, job_id: JobId) -> Result<bool, SchedulerError>;

    async fn get_result(&self, job_id: JobId) -> Result<Option<serde_json::Value>, SchedulerError>;
}
