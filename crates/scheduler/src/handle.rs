//! `JobHandle` (§4.G.a, §9 zombie-job helper) — a long-running controller's
//! grip on its own scheduler record, used for the zombie check and for
//! pushing meta updates without re-deriving an `EnqueueRequest`.

use async_trait::async_trait;
use domain::{JobId, JobMeta};
use std::sync::Arc;

use crate::ports::{JobHandle, JobScheduler, SchedulerError};

/// The only `JobHandle` implementation: thin delegation to whatever
/// `JobScheduler` produced this job, generic over the Redis and in-memory
/// adapters alike.
pub struct SchedulerJobHandle {
    scheduler: Arc<dyn JobScheduler>,
    job_id: JobId,
}

impl SchedulerJobHandle {
    pub fn new(scheduler: Arc<dyn JobScheduler>, job_id: JobId) -> Self {
        Self { scheduler, job_id }
    }
}

#[async_trait]
impl JobHandle for SchedulerJobHandle {
    fn job_id(&self) -> JobId {
        self.job_id
    }

    async fn is_alive(&self) -> Result<bool, SchedulerError> {
        self.scheduler.is_alive(self.job_id).await
    }

    async fn update_meta(&self, meta: JobMeta) -> Result<(), SchedulerError> {
        self.scheduler.update_meta(self.job_id, meta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryJobScheduler;
    use crate::ports::EnqueueRequest;

    #[tokio::test]
    async fn handle_tracks_liveness_of_its_job() {
        let scheduler: Arc<dyn JobScheduler> = Arc::new(InMemoryJobScheduler::new());
        let job_id = scheduler.enqueue(EnqueueRequest::default()).await.unwrap();
        let handle = SchedulerJobHandle::new(scheduler.clone(), job_id);

        assert_eq!(handle.job_id(), job_id);
        assert!(handle.is_alive().await.unwrap());

        scheduler.cancel(job_id).await.unwrap();
        assert!(!handle.is_alive().await.unwrap());
    }
}
