use async_trait::async_trait;
use domain::{Job, JobId, JobMeta, JobStatus, Priority, Queue};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

use super::ports::{EnqueueRequest, JobScheduler, SchedulerError};

/// Redis-backed `JobScheduler` (§4.H). Job records are hashes
/// (`job:{id}`); each queue's runnable set is a sorted set scored by
/// priority tier and enqueue order, so `ZPOPMAX` yields the
/// highest-priority, oldest-enqueued runnable job in one round trip.
/// Dependency edges live in `job:{id}:dependents` sets, the same shape
/// RQ uses for its `Job.dependents_key`, just re-expressed over raw Redis
/// commands instead of the `rq` library.
#[derive(Clone)]
pub struct RedisJobScheduler {
    conn: ConnectionManager,
}

fn job_key(id: JobId) -> String {
    format!("job:{id}")
}

fn dependents_key(id: JobId) -> String {
    format!("job:{id}:dependents")
}

fn ready_key(queue: Queue) -> String {
    format!("queue:{}:ready", queue.as_str())
}

fn counter_key(queue: Queue) -> String {
    format!("queue:{}:counter", queue.as_str())
}

fn result_key(id: JobId) -> String {
    format!("job:{id}:result")
}

fn priority_weight(priority: Priority) -> f64 {
    match priority {
        Priority::Low => 0.0,
        Priority::Normal => 1.0,
        Priority::High => 2.0,
        Priority::Urgent => 3.0,
    }
}

impl RedisJobScheduler {
    pub async fn connect(redis_url: &str) -> Result<Self, SchedulerError> {
        let client = redis::Client::open(redis_url).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }

    async fn write_job(conn: &mut ConnectionManager, job: &Job) -> Result<(), SchedulerError> {
        let encoded = serde_json::to_string(job).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let _: () = conn
            .hset(job_key(job.id), "record", encoded)
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn read_job(conn: &mut ConnectionManager, id: JobId) -> Result<Option<Job>, SchedulerError> {
        let raw: Option<String> = conn
            .hget(job_key(id), "record")
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| SchedulerError::Backend(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn push_ready(conn: &mut ConnectionManager, job: &Job) -> Result<(), SchedulerError> {
        let counter: i64 = conn
            .incr(counter_key(job.queue), 1)
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let score = priority_weight(job.priority) * 1e12 - counter as f64;
        let _: () = conn
            .zadd(ready_key(job.queue), job.id.to_string(), score)
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Recursively defer every transitive dependent of `job_id` forever.
    async fn defer_forever(&self, job_id: JobId) -> Result<(), SchedulerError> {
        let mut conn = self.conn.clone();
        let waiting: Vec<String> = conn
            .smembers(dependents_key(job_id))
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let _: () = conn
            .del(dependents_key(job_id))
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;

        for raw_id in waiting {
            let Ok(dependent_id) = Uuid::parse_str(&raw_id) else {
                continue;
            };
            if let Some(mut job) = Self::read_job(&mut conn, dependent_id).await? {
                if job.status != JobStatus::Finished && job.status != JobStatus::Failed {
                    job.status = JobStatus::DeferredForever;
                    Self::write_job(&mut conn, &job).await?;
                }
            }
            Box::pin(self.defer_forever(dependent_id)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobScheduler for RedisJobScheduler {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, SchedulerError> {
        let mut conn = self.conn.clone();
        let job_id = request.job_id.unwrap_or_else(Uuid::new_v4);

        let mut unfinished = Vec::new();
        for dep in &request.dependency_ids {
            let dep_job = Self::read_job(&mut conn, *dep).await?.ok_or(SchedulerError::DependencyNotFound(*dep))?;
            if dep_job.status != JobStatus::Finished {
                unfinished.push(*dep);
            }
        }

        let job = Job {
            id: job_id,
            queue: request.queue,
            function: request.function,
            args: request.args,
            priority: request.priority,
            dependency_ids: request.dependency_ids,
            timeout_secs: request.timeout_secs,
            result_ttl_secs: request.result_ttl_secs,
            meta: request.meta,
            status: if unfinished.is_empty() { JobStatus::Queued } else { JobStatus::Deferred },
            description: request.description,
            retry_count: 0,
            max_retries: request.max_retries,
        };

        Self::write_job(&mut conn, &job).await?;

        if unfinished.is_empty() {
            Self::push_ready(&mut conn, &job).await?;
        } else {
            for dep in &unfinished {
                let _: () = conn
                    .sadd(dependents_key(*dep), job_id.to_string())
                    .await
                    .map_err(|e| SchedulerError::Backend(e.to_string()))?;
            }
        }

        debug!(job_id = %job_id, queue = job.queue.as_str(), "enqueued job");
        Ok(job_id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, SchedulerError> {
        let mut conn = self.conn.clone();
        Self::read_job(&mut conn, job_id).await
    }

    async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>, SchedulerError> {
        Ok(self.get(job_id).await?.map(|j| j.status))
    }

    async fn dequeue(&self, queue: Queue) -> Result<Option<Job>, SchedulerError> {
        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = conn
            .zpopmax(ready_key(queue), 1)
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let Some((raw_id, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };
        let job_id = Uuid::parse_str(&raw_id).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let Some(mut job) = Self::read_job(&mut conn, job_id).await? else {
            return Ok(None);
        };
        job.status = JobStatus::Running;
        Self::write_job(&mut conn, &job).await?;
        Ok(Some(job))
    }

    async fn mark_finished(&self, job_id: JobId, result: serde_json::Value) -> Result<(), SchedulerError> {
        let mut conn = self.conn.clone();
        let mut job = Self::read_job(&mut conn, job_id).await?.ok_or(SchedulerError::NotFound(job_id))?;
        job.status = JobStatus::Finished;
        let ttl = job.result_ttl_secs;
        Self::write_job(&mut conn, &job).await?;

        let encoded = serde_json::to_string(&result).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let _: () = conn
            .set_ex(result_key(job_id), encoded, ttl)
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;

        let waiting: Vec<String> = conn
            .smembers(dependents_key(job_id))
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let _: () = conn
            .del(dependents_key(job_id))
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;

        for raw_id in waiting {
            let Ok(dependent_id) = Uuid::parse_str(&raw_id) else {
                continue;
            };
            let Some(mut dependent) = Self::read_job(&mut conn, dependent_id).await? else {
                continue;
            };
            let mut still_blocked = false;
            for dep in &dependent.dependency_ids {
                if *dep == job_id {
                    continue;
                }
                if Self::read_job(&mut conn, *dep).await?.map(|j| j.status) != Some(JobStatus::Finished) {
                    still_blocked = true;
                    break;
                }
            }
            if !still_blocked {
                dependent.status = JobStatus::Queued;
                Self::write_job(&mut conn, &dependent).await?;
                Self::push_ready(&mut conn, &dependent).await?;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: JobId, _error: String) -> Result<(), SchedulerError> {
        let mut conn = self.conn.clone();
        let mut job = Self::read_job(&mut conn, job_id).await?.ok_or(SchedulerError::NotFound(job_id))?;

        if job.retry_count < job.max_retries {
            job.retry_count += 1;
            job.status = JobStatus::Queued;
            Self::write_job(&mut conn, &job).await?;
            Self::push_ready(&mut conn, &job).await?;
        } else {
            job.status = JobStatus::Failed;
            Self::write_job(&mut conn, &job).await?;
            self.defer_forever(job_id).await?;
        }
        Ok(())
    }

    async fn update_meta(&self, job_id: JobId, meta: JobMeta) -> Result<(), SchedulerError> {
        let mut conn = self.conn.clone();
        let mut job = Self::read_job(&mut conn, job_id).await?.ok_or(SchedulerError::NotFound(job_id))?;
        job.meta = meta;
        Self::write_job(&mut conn, &job).await
    }

    async fn cancel(&self, job_id: JobId) -> Result<(), SchedulerError> {
        let mut conn = self.conn.clone();
        let mut job = Self::read_job(&mut conn, job_id).await?.ok_or(SchedulerError::NotFound(job_id))?;
        job.status = JobStatus::Cancelled;
        Self::write_job(&mut conn, &job).await?;
        self.defer_forever(job_id).await
    }

    async fn is_alive(&self, job_id: JobId) -> Result<bool, SchedulerError> {
        Ok(matches!(
            self.status(job_id).await?,
            Some(JobStatus::Queued) | Some(JobStatus::Running) | Some(JobStatus::Deferred)
        ))
    }

    async fn get_result(&self, job_id: JobId) -> Result<Option<serde_json::Value>, SchedulerError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(result_key(job_id))
            .await
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| SchedulerError::Backend(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }
}
