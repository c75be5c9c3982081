use async_trait::async_trait;
use domain::{Job, JobId, JobMeta, JobStatus, Priority, Queue};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::ports::{EnqueueRequest, JobScheduler, SchedulerError};

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    /// dependency -> jobs waiting on it, so `mark_finished`/`mark_failed`
    /// don't have to scan every job.
    dependents: HashMap<JobId, Vec<JobId>>,
    ready: HashMap<Queue, Vec<JobId>>,
    results: HashMap<JobId, serde_json::Value>,
}

/// In-memory `JobScheduler` used by tests in place of Redis. Ordering within
/// a queue is insertion order; priority is tracked but, unlike the Redis
/// adapter's sorted-set backing, only used to break ties at dequeue time.
#[derive(Default)]
pub struct InMemoryJobScheduler {
    state: Mutex<MemoryState>,
}

impl InMemoryJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_runnable(state: &mut MemoryState, job_id: JobId) {
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = JobStatus::Queued;
            state.ready.entry(job.queue).or_default().push(job_id);
        }
    }

    /// Recursively mark every transitive dependent as `DeferredForever`
    /// (§4.H fail-fast default).
    fn defer_forever(state: &mut MemoryState, job_id: JobId) {
        let Some(waiting) = state.dependents.remove(&job_id) else {
            return;
        };
        for dependent_id in waiting {
            if let Some(job) = state.jobs.get_mut(&dependent_id) {
                if job.status == JobStatus::Finished || job.status == JobStatus::Failed {
                    continue;
                }
                job.status = JobStatus::DeferredForever;
            }
            Self::defer_forever(state, dependent_id);
        }
    }
}

#[async_trait]
impl JobScheduler for InMemoryJobScheduler {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, SchedulerError> {
        let mut state = self.state.lock().unwrap();

        for dep in &request.dependency_ids {
            if !state.jobs.contains_key(dep) {
                return Err(SchedulerError::DependencyNotFound(*dep));
            }
        }

        let job_id = request.job_id.unwrap_or_else(Uuid::new_v4);
        let unfinished: Vec<JobId> = request
            .dependency_ids
            .iter()
            .copied()
            .filter(|dep| state.jobs.get(dep).map(|j| j.status) != Some(JobStatus::Finished))
            .collect();

        let job = Job {
            id: job_id,
            queue: request.queue,
            function: request.function,
            args: request.args,
            priority: request.priority,
            dependency_ids: request.dependency_ids.clone(),
            timeout_secs: request.timeout_secs,
            result_ttl_secs: request.result_ttl_secs,
            meta: request.meta,
            status: if unfinished.is_empty() {
                JobStatus::Queued
            } else {
                JobStatus::Deferred
            },
            description: request.description,
            retry_count: 0,
            max_retries: request.max_retries,
        };

        if unfinished.is_empty() {
            state.ready.entry(job.queue).or_default().push(job_id);
        } else {
            for dep in &unfinished {
                state.dependents.entry(*dep).or_default().push(job_id);
            }
        }

        state.jobs.insert(job_id, job);
        Ok(job_id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, SchedulerError> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>, SchedulerError> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).map(|j| j.status))
    }

    async fn dequeue(&self, queue: Queue) -> Result<Option<Job>, SchedulerError> {
        let mut state = self.state.lock().unwrap();
        let Some(ready) = state.ready.get_mut(&queue) else {
            return Ok(None);
        };
        if ready.is_empty() {
            return Ok(None);
        }
        // Highest priority first; stable within a priority tier.
        let best_index = ready
            .iter()
            .enumerate()
            .max_by_key(|(i, id)| {
                let priority = state.jobs.get(id).map(|j| j.priority).unwrap_or(Priority::Normal);
                (priority, std::cmp::Reverse(*i))
            })
            .map(|(i, _)| i);
        let Some(best_index) = best_index else {
            return Ok(None);
        };
        let job_id = ready.remove(best_index);
        let job = state.jobs.get_mut(&job_id).ok_or(SchedulerError::NotFound(job_id))?;
        job.status = JobStatus::Running;
        Ok(Some(job.clone()))
    }

    async fn mark_finished(&self, job_id: JobId, result: serde_json::Value) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        {
            let job = state.jobs.get_mut(&job_id).ok_or(SchedulerError::NotFound(job_id))?;
            job.status = JobStatus::Finished;
        }
        state.results.insert(job_id, result);

        let waiting = state.dependents.remove(&job_id).unwrap_or_default();
        for dependent_id in waiting {
            let still_blocked = state
                .jobs
                .get(&dependent_id)
                .map(|job| {
                    job.dependency_ids
                        .iter()
                        .any(|dep| state.jobs.get(dep).map(|j| j.status) != Some(JobStatus::Finished))
                })
                .unwrap_or(false);
            if !still_blocked {
                Self::make_runnable(&mut state, dependent_id);
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: JobId, _error: String) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        let (queue, retryable) = {
            let job = state.jobs.get_mut(&job_id).ok_or(SchedulerError::NotFound(job_id))?;
            let retryable = job.retry_count < job.max_retries;
            if retryable {
                job.retry_count += 1;
            } else {
                job.status = JobStatus::Failed;
            }
            (job.queue, retryable)
        };

        if retryable {
            state.ready.entry(queue).or_default().push(job_id);
            if let Some(job) = state.jobs.get_mut(&job_id) {
                job.status = JobStatus::Queued;
            }
        } else {
            Self::defer_forever(&mut state, job_id);
        }
        Ok(())
    }

    async fn update_meta(&self, job_id: JobId, meta: JobMeta) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(&job_id).ok_or(SchedulerError::NotFound(job_id))?;
        job.meta = meta;
        Ok(())
    }

    async fn cancel(&self, job_id: JobId) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(&job_id).ok_or(SchedulerError::NotFound(job_id))?;
        job.status = JobStatus::Cancelled;
        Self::defer_forever(&mut state, job_id);
        Ok(())
    }

    async fn is_alive(&self, job_id: JobId) -> Result<bool, SchedulerError> {
        let state = self.state.lock().unwrap();
        Ok(matches!(
            state.jobs.get(&job_id).map(|j| j.status),
            Some(JobStatus::Queued) | Some(JobStatus::Running) | Some(JobStatus::Deferred)
        ))
    }

    async fn get_result(&self, job_id: JobId) -> Result<Option<serde_json::Value>, SchedulerError> {
        Ok(self.state.lock().unwrap().results.get(&job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(queue: Queue) -> EnqueueRequest {
        EnqueueRequest {
            queue,
            function: "noop".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn dependent_job_stays_deferred_until_dependency_finishes() {
        let scheduler = InMemoryJobScheduler::new();
        let upstream = scheduler.enqueue(request(Queue::Transcription)).await.unwrap();

        let downstream_request = EnqueueRequest {
            dependency_ids: vec![upstream],
            ..request(Queue::Default)
        };
        let downstream = scheduler.enqueue(downstream_request).await.unwrap();

        assert_eq!(scheduler.status(downstream).await.unwrap(), Some(JobStatus::Deferred));
        assert!(scheduler.dequeue(Queue::Default).await.unwrap().is_none());

        let dequeued_upstream = scheduler.dequeue(Queue::Transcription).await.unwrap().unwrap();
        assert_eq!(dequeued_upstream.id, upstream);
        scheduler.mark_finished(upstream, serde_json::json!({"ok": true})).await.unwrap();

        assert_eq!(scheduler.status(downstream).await.unwrap(), Some(JobStatus::Queued));
        let dequeued_downstream = scheduler.dequeue(Queue::Default).await.unwrap().unwrap();
        assert_eq!(dequeued_downstream.id, downstream);
    }

    #[tokio::test]
    async fn exhausted_retries_defer_dependents_forever() {
        let scheduler = InMemoryJobScheduler::new();
        let upstream_request = EnqueueRequest {
            max_retries: 1,
            ..request(Queue::Transcription)
        };
        let upstream = scheduler.enqueue(upstream_request).await.unwrap();
        let downstream = scheduler
            .enqueue(EnqueueRequest {
                dependency_ids: vec![upstream],
                ..request(Queue::Default)
            })
            .await
            .unwrap();

        scheduler.dequeue(Queue::Transcription).await.unwrap();
        scheduler.mark_failed(upstream, "boom".to_string()).await.unwrap();
        assert_eq!(scheduler.status(upstream).await.unwrap(), Some(JobStatus::Queued));

        scheduler.dequeue(Queue::Transcription).await.unwrap();
        scheduler.mark_failed(upstream, "boom again".to_string()).await.unwrap();
        assert_eq!(scheduler.status(upstream).await.unwrap(), Some(JobStatus::Failed));
        assert_eq!(scheduler.status(downstream).await.unwrap(), Some(JobStatus::DeferredForever));
    }

    #[tokio::test]
    async fn dequeue_prefers_higher_priority() {
        let scheduler = InMemoryJobScheduler::new();
        let low = scheduler
            .enqueue(EnqueueRequest {
                priority: Priority::Low,
                ..request(Queue::Default)
            })
            .await
            .unwrap();
        let urgent = scheduler
            .enqueue(EnqueueRequest {
                priority: Priority::Urgent,
                ..request(Queue::Default)
            })
            .await
            .unwrap();

        let first = scheduler.dequeue(Queue::Default).await.unwrap().unwrap();
        assert_eq!(first.id, urgent);
        let second = scheduler.dequeue(Queue::Default).await.unwrap().unwrap();
        assert_eq!(second.id, low);
    }

    #[tokio::test]
    async fn cancel_propagates_to_dependents() {
        let scheduler = InMemoryJobScheduler::new();
        let upstream = scheduler.enqueue(request(Queue::Transcription)).await.unwrap();
        let downstream = scheduler
            .enqueue(EnqueueRequest {
                dependency_ids: vec![upstream],
                ..request(Queue::Default)
            })
            .await
            .unwrap();

        scheduler.cancel(upstream).await.unwrap();
        assert_eq!(scheduler.status(downstream).await.unwrap(), Some(JobStatus::DeferredForever));
        assert!(!scheduler.is_alive(upstream).await.unwrap());
    }
}
