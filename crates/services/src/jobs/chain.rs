//! Shared post-processing chain enqueue (§4.I): `T -> S -> X -> {M, U}`.
//! Factored out of the Conversation Controller so the batch-upload route
//! (§6) and the reprocess endpoints (§7) can enqueue the same chain without
//! duplicating the dependency wiring.

use domain::{ConversationId, JobId, JobMeta, Queue};
use scheduler::EnqueueRequest;
use serde::Serialize;
use tracing::warn;

use super::{CROP, EXTRACT_MEMORY, RECOGNIZE_SPEAKERS, TITLE_SUMMARY, TRANSCRIBE};
use crate::Runtime;

/// Job ids returned to a caller that needs to report them back (the batch
/// upload response, §6) or poll them.
#[derive(Debug, Clone, Serialize)]
pub struct ChainJobIds {
    pub transcript_job_id: JobId,
    pub speaker_job_id: JobId,
    pub crop_job_id: Option<JobId>,
    pub memory_job_id: Option<JobId>,
    pub title_job_id: Option<JobId>,
}

/// Enqueues `T` and chains `S -> X -> {M, U}` behind it. `audio_path` is
/// the basename `T`/`X` will resolve under
/// `storage.chunk_dir` (§6 persisted state layout); `meta` carries
/// `audio_uuid`/`client_id` cascaded from the session, if known.
pub async fn enqueue_post_processing_chain(
    runtime: &Runtime,
    conversation_id: ConversationId,
    audio_path: Option<String>,
    meta: JobMeta,
) -> Result<ChainJobIds, super::JobError> {
    let jobs = &runtime.config.jobs;
    let result_ttl = jobs.result_ttl_secs;

    let mut args = serde_json::json!({"conversation_id": conversation_id});
    if let Some(path) = &audio_path {
        args["audio_path"] = serde_json::Value::String(path.clone());
    }

    let transcript_job_id = runtime
        .scheduler
        .enqueue(EnqueueRequest {
            queue: Queue::Transcription,
            function: TRANSCRIBE.to_string(),
            args,
            timeout_secs: jobs.transcription_secs,
            result_ttl_secs: result_ttl,
            meta: meta.clone(),
            ..Default::default()
        })
        .await
        .map_err(|e| super::JobError::Other(e.into()))?;

    let speaker_job_id = runtime
        .scheduler
        .enqueue(EnqueueRequest {
            queue: Queue::Transcription,
            function: RECOGNIZE_SPEAKERS.to_string(),
            args: serde_json::json!({"conversation_id": conversation_id}),
            timeout_secs: jobs.speaker_recognition_secs,
            result_ttl_secs: result_ttl,
            dependency_ids: vec![transcript_job_id],
            meta: meta.clone(),
            ..Default::default()
        })
        .await
        .map_err(|e| super::JobError::Other(e.into()))?;

    let crop_job_id = match runtime
        .scheduler
        .enqueue(EnqueueRequest {
            queue: Queue::Transcription,
            function: CROP.to_string(),
            args: serde_json::json!({"conversation_id": conversation_id}),
            timeout_secs: jobs.crop_secs,
            result_ttl_secs: result_ttl,
            dependency_ids: vec![speaker_job_id],
            meta: meta.clone(),
            ..Default::default()
        })
        .await
    {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(%conversation_id, error = %e, "post-processing chain: failed to enqueue crop");
            None
        }
    };

    let mut memory_job_id = None;
    let mut title_job_id = None;
    if let Some(x) = crop_job_id {
        memory_job_id = match runtime
            .scheduler
            .enqueue(EnqueueRequest {
                queue: Queue::Memory,
                function: EXTRACT_MEMORY.to_string(),
                args: serde_json::json!({"conversation_id": conversation_id}),
                timeout_secs: jobs.memory_secs,
                result_ttl_secs: result_ttl,
                dependency_ids: vec![x],
                meta: meta.clone(),
                ..Default::default()
            })
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(%conversation_id, error = %e, "post-processing chain: failed to enqueue extract_memory");
                None
            }
        };

        title_job_id = match runtime
            .scheduler
            .enqueue(EnqueueRequest {
                queue: Queue::Default,
                function: TITLE_SUMMARY.to_string(),
                args: serde_json::json!({"conversation_id": conversation_id}),
                timeout_secs: jobs.transcription_secs.max(300),
                result_ttl_secs: result_ttl,
                dependency_ids: vec![x],
                meta: meta.clone(),
                ..Default::default()
            })
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(%conversation_id, error = %e, "post-processing chain: failed to enqueue title_summary");
                None
            }
        };
    }

    Ok(ChainJobIds {
        transcript_job_id,
        speaker_job_id,
        crop_job_id,
        memory_job_id,
        title_job_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::JobStatus;

    #[tokio::test]
    async fn wires_dependency_chain_with_memory_and_title_in_parallel() {
        let runtime = Runtime::for_tests();
        let conversation_id = uuid::Uuid::new_v4();

        let ids = enqueue_post_processing_chain(&runtime, conversation_id, Some("c.wav".to_string()), JobMeta::default())
            .await
            .unwrap();

        let transcribe_job = runtime.scheduler.get(ids.transcript_job_id).await.unwrap().unwrap();
        assert_eq!(transcribe_job.status, JobStatus::Queued);
        assert!(transcribe_job.dependency_ids.is_empty());

        let speaker_job = runtime.scheduler.get(ids.speaker_job_id).await.unwrap().unwrap();
        assert_eq!(speaker_job.dependency_ids, vec![ids.transcript_job_id]);
        assert_eq!(speaker_job.status, JobStatus::Deferred);

        let crop_job_id = ids.crop_job_id.expect("crop enqueued");
        let crop_job = runtime.scheduler.get(crop_job_id).await.unwrap().unwrap();
        assert_eq!(crop_job.dependency_ids, vec![ids.speaker_job_id]);

        let memory_job = runtime.scheduler.get(ids.memory_job_id.unwrap()).await.unwrap().unwrap();
        let title_job = runtime.scheduler.get(ids.title_job_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(memory_job.dependency_ids, vec![crop_job_id]);
        assert_eq!(title_job.dependency_ids, vec![crop_job_id]);
        assert_eq!(memory_job.queue, Queue::Memory);
        assert_eq!(title_job.queue, Queue::Default);
    }
}
