//! Post-processing job chain (§4.I): `T -> S -> X -> {M, U}`. Each handler
//! is a plain async function over `(Runtime, args)`; `dispatch` maps a
//! scheduled job's `function` name to its handler, the way a queue worker
//! resolves a dotted import path and calls it.

pub mod chain;
pub mod crop;
pub mod memory;
pub mod speaker_recognize;
pub mod title_summary;
pub mod transcribe;

pub use chain::{enqueue_post_processing_chain, ChainJobIds};

use domain::Job;
use scheduler::JobScheduler;
use tracing::{error, info, warn};

use crate::conversation_controller::ConversationController;
use crate::speech_detection::SpeechDetectionController;
use crate::Runtime;

pub const CONVERSATION_CONTROLLER: &str = "conversation_controller";
pub const SPEECH_DETECTION: &str = "speech_detection";
pub const TRANSCRIBE: &str = "transcribe";
pub const RECOGNIZE_SPEAKERS: &str = "recognize_speakers";
pub const CROP: &str = "crop";
pub const EXTRACT_MEMORY: &str = "extract_memory";
pub const TITLE_SUMMARY: &str = "title_summary";

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("missing or malformed argument: {0}")]
    BadArgs(String),
    #[error(transparent)]
    Repository(#[from] database::RepositoryError),
    #[error(transparent)]
    Provider(#[from] crate::providers::ProviderError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn conversation_id_arg(args: &serde_json::Value) -> Result<domain::ConversationId, JobError> {
    args.get("conversation_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| JobError::BadArgs("conversation_id".to_string()))
}

fn session_id_arg(args: &serde_json::Value) -> Result<domain::SessionId, JobError> {
    args.get("session_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| JobError::BadArgs("session_id".to_string()))
}

fn uuid_arg(args: &serde_json::Value, field: &str) -> Option<uuid::Uuid> {
    args.get(field).and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
}

/// `speech_detection` and `conversation_controller` are long-running
/// controller tasks dispatched through the same job-function mechanism as
/// the one-shot post-processing jobs, since both need a scheduler record
/// for the zombie check (§4.G.a, §4.F). Unlike `T`/`S`/`X`/`M`/`U`, they run
/// for the lifetime of a session or conversation rather than completing in
/// one call.
async fn run_speech_detection(runtime: &Runtime, job: &Job) -> Result<serde_json::Value, JobError> {
    let session_id = session_id_arg(&job.args)?;
    SpeechDetectionController::new(runtime.clone()).run(session_id, job.id).await;
    Ok(serde_json::json!({"session_id": session_id}))
}

async fn run_conversation_controller(runtime: &Runtime, job: &Job) -> Result<serde_json::Value, JobError> {
    let session_id = session_id_arg(&job.args)?;
    let conversation_id = conversation_id_arg(&job.args)?;
    let upstream_job_id = uuid_arg(&job.args, "speech_job_id");
    let outcome = ConversationController::new(runtime.clone())
        .run(session_id, conversation_id, job.id, upstream_job_id)
        .await;
    serde_json::to_value(&outcome).map_err(|e| JobError::Other(e.into()))
}

/// Runs the handler named by `job.function` and reports the outcome back to
/// the scheduler: `mark_finished` on success, `mark_failed` on a fatal
/// error. `M` and `U` never reach the error branch — they catch their own
/// provider failures and report them in the result payload (§4.I error
/// policy), so a failure there never marks the job `Failed` and never
/// cascades to (nonexistent) dependents.
pub async fn dispatch(runtime: &Runtime, job: &Job) -> Result<(), scheduler::SchedulerError> {
    let result = match job.function.as_str() {
        SPEECH_DETECTION => run_speech_detection(runtime, job).await,
        CONVERSATION_CONTROLLER => run_conversation_controller(runtime, job).await,
        TRANSCRIBE => transcribe::run(runtime, &job.args).await,
        RECOGNIZE_SPEAKERS => speaker_recognize::run(runtime, &job.args).await,
        CROP => crop::run(runtime, &job.args).await,
        EXTRACT_MEMORY => memory::run(runtime, &job.args).await,
        TITLE_SUMMARY => title_summary::run(runtime, &job.args).await,
        other => Err(JobError::BadArgs(format!("unknown job function: {other}"))),
    };

    match result {
        Ok(value) => {
            info!(job_id = %job.id, function = %job.function, "job finished");
            runtime.scheduler.mark_finished(job.id, value).await
        }
        Err(e) => {
            error!(job_id = %job.id, function = %job.function, error = %e, "job failed");
            runtime.scheduler.mark_failed(job.id, e.to_string()).await
        }
    }
}

/// Pops jobs from `queue` and spawns each as its own task until the stream
/// bus/scheduler backend is torn down. A single in-process loop rather than
/// a separate OS process per worker (§9: one native binary, not a fleet of
/// per-queue worker processes). Dispatch runs detached rather than awaited inline
/// — `speech_detection` and `conversation_controller` jobs live for the
/// length of a session/conversation and must not block the rest of the
/// queue behind them (§5 scheduling model).
pub async fn run_worker_loop(runtime: Runtime, queue: domain::Queue) {
    loop {
        match runtime.scheduler.dequeue(queue).await {
            Ok(Some(job)) => {
                let runtime = runtime.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatch(&runtime, &job).await {
                        warn!(error = %e, "failed to report job outcome back to scheduler");
                    }
                });
            }
            Ok(None) => {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
            Err(e) => {
                warn!(error = %e, "job dequeue failed, backing off");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}
