//! Conversation Controller (§4.G) — the core's most intricate state
//! machine. One task per open conversation: opens the conversation record,
//! tracks aggregate transcript progress every tick, decides when the
//! conversation has ended, and on exit enqueues the post-processing chain
//! (§4.I) before tearing down the session's per-conversation signaling keys.

use std::time::{Duration, Instant};

use domain::{
    CompletionReason, ConversationId, DeletionReason, EndReason, JobId, JobMeta, Queue, SessionId, SessionStatus,
};
use scheduler::EnqueueRequest;
use streambus::StreamName;
use tracing::{info, warn};

use crate::jobs;
use crate::speech_detection::is_meaningful_speech;
use crate::Runtime;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationOutcome {
    pub conversation_id: ConversationId,
    pub deleted: bool,
    pub end_reason: Option<EndReason>,
    pub conversation_count: u32,
    pub runtime_seconds: f64,
    pub final_result_count: u64,
}

pub struct ConversationController {
    runtime: Runtime,
}

impl ConversationController {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    /// Runs G's full lifecycle for `conversation_id`. `own_job_id` is this
    /// controller's own scheduler record (the zombie check, §4.G.a).
    /// `upstream_job_id` is the speech-detection job (or a prior
    /// conversation-controller job, for re-enqueues) whose meta we cascade
    /// from (§4.G initial action 3).
    pub async fn run(
        &self,
        session_id: SessionId,
        conversation_id: ConversationId,
        own_job_id: JobId,
        upstream_job_id: Option<JobId>,
    ) -> ConversationOutcome {
        self.initial_actions(session_id, conversation_id, upstream_job_id).await;

        let start = Instant::now();
        let mut last_speech_time = Instant::now();
        let mut last_word_count = 0usize;
        let mut had_meaningful_speech = false;
        let mut end_reason = None;

        loop {
            match self.runtime.scheduler.is_alive(own_job_id).await {
                Ok(true) => {}
                _ => {
                    info!(%conversation_id, "conversation controller: own job no longer alive, exiting");
                    break;
                }
            }

            match self.runtime.session_registry.get(session_id).await {
                Ok(Some(session)) => match session.status {
                    SessionStatus::Finalizing => {
                        end_reason = Some(match session.completion_reason {
                            Some(CompletionReason::WebsocketDisconnect) => EndReason::WebsocketDisconnect,
                            _ => EndReason::UserStopped,
                        });
                        break;
                    }
                    SessionStatus::Complete => {
                        end_reason = Some(EndReason::UserStopped);
                        break;
                    }
                    SessionStatus::Active => {}
                },
                Ok(None) => {
                    end_reason = Some(EndReason::Unknown);
                    break;
                }
                Err(e) => {
                    warn!(%conversation_id, error = %e, "conversation controller: session lookup failed");
                }
            }

            if start.elapsed().as_secs() > self.runtime.config.thresholds.max_runtime_secs {
                end_reason = Some(EndReason::MaxDuration);
                break;
            }

            let aggregate = match crate::aggregator::aggregate(self.runtime.stream_bus.as_ref(), session_id).await {
                Ok(a) => a,
                Err(e) => {
                    warn!(%conversation_id, error = %e, "conversation controller: aggregate read failed");
                    tokio::time::sleep(TICK_INTERVAL).await;
                    continue;
                }
            };

            let word_count = aggregate.word_count();
            if word_count > last_word_count {
                last_speech_time = Instant::now();
                last_word_count = word_count;
            }
            if is_meaningful_speech(&aggregate, &self.runtime.config.thresholds) {
                had_meaningful_speech = true;
            }

            let meta = JobMeta {
                audio_uuid: Some(session_id),
                conversation_id: Some(conversation_id),
                transcript_preview: Some(aggregate.text.chars().take(200).collect()),
                transcript_length: Some(aggregate.text.len()),
                speakers: aggregate.speakers(),
                word_count: Some(word_count),
                duration_seconds: Some(aggregate.duration_seconds()),
                has_speech: Some(had_meaningful_speech),
                chunks_processed: Some(aggregate.chunk_count),
                inactivity_seconds: Some(last_speech_time.elapsed().as_secs()),
                last_update: Some(chrono::Utc::now()),
                ..Default::default()
            };
            if let Err(e) = self.runtime.scheduler.update_meta(own_job_id, meta).await {
                warn!(%conversation_id, error = %e, "conversation controller: meta update failed");
            }

            let inactive_for = last_speech_time.elapsed().as_secs();
            if inactive_for >= self.runtime.config.thresholds.inactivity_threshold_secs {
                let draining = self.runtime.config.test_drain_mode && self.persistence_queue_nonempty(session_id).await;
                if !draining {
                    end_reason = Some(EndReason::InactivityTimeout);
                    break;
                }
            }

            tokio::time::sleep(TICK_INTERVAL).await;
        }

        let runtime_seconds = start.elapsed().as_secs_f64();
        let final_result_count = crate::aggregator::aggregate(self.runtime.stream_bus.as_ref(), session_id)
            .await
            .map(|a| a.chunk_count)
            .unwrap_or(0);

        let deleted = if !had_meaningful_speech {
            self.soft_delete(conversation_id, DeletionReason::NoMeaningfulSpeech).await
        } else if !self.wait_for_audio_file(conversation_id).await {
            self.soft_delete(conversation_id, DeletionReason::AudioFileNotReady).await
        } else {
            self.finish_with_post_processing(session_id, conversation_id).await;
            false
        };

        let conversation_count = self.cleanup(session_id, conversation_id, end_reason).await;

        ConversationOutcome {
            conversation_id,
            deleted,
            end_reason,
            conversation_count,
            runtime_seconds,
            final_result_count,
        }
    }

    async fn initial_actions(&self, session_id: SessionId, conversation_id: ConversationId, upstream_job_id: Option<JobId>) {
        if let Err(e) = self
            .runtime
            .session_registry
            .set_current_conversation(session_id, conversation_id)
            .await
        {
            warn!(%conversation_id, error = %e, "conversation controller: failed to publish conversation.current");
        }

        let Some(upstream_job_id) = upstream_job_id else { return };
        let upstream = match self.runtime.scheduler.get(upstream_job_id).await {
            Ok(Some(job)) => job,
            _ => return,
        };
        let mut meta = upstream.meta.clone();
        meta.conversation_id = Some(conversation_id);
        meta.audio_uuid = Some(session_id);
        if let Err(e) = self.runtime.scheduler.update_meta(upstream_job_id, meta).await {
            warn!(%conversation_id, error = %e, "conversation controller: failed to cascade metadata upstream");
        }
    }

    async fn persistence_queue_nonempty(&self, session_id: SessionId) -> bool {
        let stream = StreamName::AudioBytes(session_id.to_string());
        self.runtime.stream_bus.len(&stream).await.unwrap_or(0) > 0
    }

    async fn wait_for_audio_file(&self, conversation_id: ConversationId) -> bool {
        let deadline = Instant::now() + Duration::from_secs(self.runtime.config.thresholds.audio_file_wait_secs);
        loop {
            match self.runtime.session_registry.audio_file(conversation_id).await {
                Ok(Some(_)) => return true,
                Ok(None) if Instant::now() >= deadline => return false,
                Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
                Err(e) => {
                    warn!(%conversation_id, error = %e, "conversation controller: audio_file lookup failed");
                    return false;
                }
            }
        }
    }

    async fn soft_delete(&self, conversation_id: ConversationId, reason: DeletionReason) -> bool {
        match self.runtime.conversations.soft_delete(conversation_id, reason).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%conversation_id, error = %e, "conversation controller: soft delete failed");
                true
            }
        }
    }

    async fn finish_with_post_processing(&self, session_id: SessionId, conversation_id: ConversationId) {
        let audio_file = self
            .runtime
            .session_registry
            .audio_file(conversation_id)
            .await
            .ok()
            .flatten();
        let basename = audio_file
            .as_deref()
            .and_then(|p| std::path::Path::new(p).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{conversation_id}.wav"));

        if let Err(e) = self.runtime.conversations.set_audio_paths(conversation_id, Some(basename.clone()), None).await {
            warn!(%conversation_id, error = %e, "conversation controller: failed to set audio_path");
        }

        let base_meta = JobMeta {
            audio_uuid: Some(session_id),
            conversation_id: Some(conversation_id),
            ..Default::default()
        };

        if let Err(e) = jobs::enqueue_post_processing_chain(&self.runtime, conversation_id, Some(basename), base_meta).await {
            warn!(%conversation_id, error = %e, "conversation controller: failed to enqueue post-processing chain");
        }
    }

    /// Cleanup (§4.G, always runs): tears down the per-conversation
    /// signaling keys, persists `end_reason`/`completed_at`, bumps the
    /// session's conversation count, and re-spawns F if the session is
    /// still accepting new conversations.
    async fn cleanup(&self, session_id: SessionId, conversation_id: ConversationId, end_reason: Option<EndReason>) -> u32 {
        let result_stream = StreamName::TranscriptionResults(session_id.to_string());
        if let Err(e) = self.runtime.stream_bus.delete(&result_stream).await {
            warn!(%session_id, error = %e, "conversation controller: failed to delete result stream");
        }
        if let Err(e) = self.runtime.session_registry.clear_current_conversation(session_id).await {
            warn!(%session_id, error = %e, "conversation controller: failed to clear conversation.current");
        }
        // Sliding keepalive, not a terminal TTL — the session may still be
        // accepting further conversations (§11.3).
        if let Err(e) = self.runtime.session_registry.expire_after(session_id, 3600).await {
            warn!(%session_id, error = %e, "conversation controller: failed to refresh session TTL");
        }

        let conversation_count = match self.runtime.session_registry.increment_conversation_count(session_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(%session_id, error = %e, "conversation controller: failed to increment conversation count");
                0
            }
        };

        if let Err(e) = self
            .runtime
            .conversations
            .mark_completed(conversation_id, end_reason.unwrap_or(EndReason::Unknown))
            .await
        {
            warn!(%conversation_id, error = %e, "conversation controller: failed to persist end_reason");
        }

        let still_active = matches!(
            self.runtime.session_registry.get(session_id).await,
            Ok(Some(session)) if session.status == SessionStatus::Active
        );
        if still_active {
            let meta = JobMeta {
                audio_uuid: Some(session_id),
                ..Default::default()
            };
            let request = EnqueueRequest {
                queue: Queue::Default,
                function: jobs::SPEECH_DETECTION.to_string(),
                args: serde_json::json!({"session_id": session_id}),
                timeout_secs: self.runtime.config.jobs.speech_detection_secs,
                result_ttl_secs: self.runtime.config.jobs.result_ttl_secs,
                meta,
                ..Default::default()
            };
            if let Err(e) = self.runtime.scheduler.enqueue(request).await {
                warn!(%session_id, error = %e, "conversation controller: failed to re-enqueue speech detection");
            }
        }

        conversation_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Conversation, Session, Word};
    use uuid::Uuid;

    async fn setup_session(runtime: &Runtime, status_finalizing: bool) -> SessionId {
        let session_id = Uuid::new_v4();
        let session = Session::new(session_id, "client-1".to_string(), Uuid::new_v4());
        runtime.session_registry.create(session).await.unwrap();
        if status_finalizing {
            runtime
                .session_registry
                .finalize(session_id, CompletionReason::UserStopped)
                .await
                .unwrap();
        }
        session_id
    }

    async fn own_job(runtime: &Runtime, session_id: SessionId, conversation_id: ConversationId) -> JobId {
        runtime
            .scheduler
            .enqueue(EnqueueRequest {
                queue: Queue::Default,
                function: jobs::CONVERSATION_CONTROLLER.to_string(),
                args: serde_json::json!({"session_id": session_id, "conversation_id": conversation_id}),
                timeout_secs: 10_740,
                result_ttl_secs: 3600,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn no_speech_is_soft_deleted_with_no_meaningful_speech_reason() {
        let runtime = Runtime::for_tests();
        let conversation_id = Uuid::new_v4();
        // Session already finalizing: the main loop breaks on its first
        // tick before any speech could accumulate.
        let session_id = setup_session(&runtime, true).await;
        let user_id = runtime.session_registry.get(session_id).await.unwrap().unwrap().user_id;
        runtime
            .conversations
            .insert(&Conversation::new(conversation_id, session_id, user_id, "client-1".to_string()))
            .await
            .unwrap();
        let own_job_id = own_job(&runtime, session_id, conversation_id).await;

        let controller = ConversationController::new(runtime.clone());
        let outcome = controller.run(session_id, conversation_id, own_job_id, None).await;

        assert!(outcome.deleted);
        let stored = runtime.conversations.find_by_id(conversation_id).await.unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.deletion_reason, Some(DeletionReason::NoMeaningfulSpeech));
        assert!(runtime.session_registry.current_conversation(session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn qualifying_speech_with_audio_ready_enqueues_post_processing() {
        let mut runtime = Runtime::for_tests();
        // Break out of the main loop on the first tick, right after the
        // aggregate read, instead of waiting out a real 60s of wall clock.
        runtime.config.thresholds.inactivity_threshold_secs = 0;
        let conversation_id = Uuid::new_v4();
        let session_id = setup_session(&runtime, false).await;
        let user_id = runtime.session_registry.get(session_id).await.unwrap().unwrap().user_id;
        runtime
            .conversations
            .insert(&Conversation::new(conversation_id, session_id, user_id, "client-1".to_string()))
            .await
            .unwrap();
        let own_job_id = own_job(&runtime, session_id, conversation_id).await;

        // Push a qualifying transcription result before the controller's
        // first tick so it observes meaningful speech immediately.
        let thresholds = &runtime.config.thresholds;
        let words: Vec<Word> = (0..thresholds.w_min)
            .map(|i| Word {
                text: format!("word{i}"),
                start: i as f64 * 3.0,
                end: i as f64 * 3.0 + 0.5,
                confidence: 0.9,
            })
            .collect();
        let result = domain::TranscriptionResult {
            text: "some words spoken here".to_string(),
            words,
            segments: vec![],
            chunk_count_at_emission: 1,
        };
        let stream = streambus::StreamName::TranscriptionResults(session_id.to_string());
        runtime.stream_bus.append(&stream, serde_json::to_vec(&result).unwrap()).await.unwrap();
        runtime.session_registry.set_audio_file(conversation_id, format!("{conversation_id}.wav")).await.unwrap();

        let controller = ConversationController::new(runtime.clone());
        let outcome = controller.run(session_id, conversation_id, own_job_id, None).await;

        assert!(!outcome.deleted);
        assert_eq!(outcome.end_reason, Some(EndReason::InactivityTimeout));

        let stored = runtime.conversations.find_by_id(conversation_id).await.unwrap().unwrap();
        assert!(!stored.deleted);
        assert_eq!(stored.audio_path.as_deref(), Some(format!("{conversation_id}.wav").as_str()));
        assert_eq!(stored.end_reason, Some(EndReason::InactivityTimeout));
        assert!(stored.completed_at.is_some());

        // The default queue now holds this controller's own (spent) job
        // record, the `title_summary` job from the chain, and a fresh
        // speech-detection job re-enqueued since the session is still
        // active.
        let mut default_functions = Vec::new();
        while let Some(job) = runtime.scheduler.dequeue(Queue::Default).await.unwrap() {
            default_functions.push(job.function);
        }
        assert!(default_functions.contains(&jobs::CONVERSATION_CONTROLLER.to_string()));
        assert!(default_functions.contains(&jobs::TITLE_SUMMARY.to_string()));
        assert!(default_functions.contains(&jobs::SPEECH_DETECTION.to_string()));

        let transcription_job = runtime.scheduler.dequeue(Queue::Transcription).await.unwrap();
        assert_eq!(transcription_job.unwrap().function, jobs::TRANSCRIBE);
    }

    #[tokio::test]
    async fn missing_audio_file_is_soft_deleted_as_not_ready() {
        let mut runtime = Runtime::for_tests();
        runtime.config.thresholds.audio_file_wait_secs = 0;
        runtime.config.thresholds.inactivity_threshold_secs = 0;
        let conversation_id = Uuid::new_v4();
        let session_id = setup_session(&runtime, false).await;
        let user_id = runtime.session_registry.get(session_id).await.unwrap().unwrap().user_id;
        runtime
            .conversations
            .insert(&Conversation::new(conversation_id, session_id, user_id, "client-1".to_string()))
            .await
            .unwrap();
        let own_job_id = own_job(&runtime, session_id, conversation_id).await;

        let thresholds = &runtime.config.thresholds;
        let words: Vec<Word> = (0..thresholds.w_min)
            .map(|i| Word {
                text: format!("word{i}"),
                start: i as f64 * 3.0,
                end: i as f64 * 3.0 + 0.5,
                confidence: 0.9,
            })
            .collect();
        let result = domain::TranscriptionResult {
            text: "some words spoken here".to_string(),
            words,
            segments: vec![],
            chunk_count_at_emission: 1,
        };
        let stream = streambus::StreamName::TranscriptionResults(session_id.to_string());
        runtime.stream_bus.append(&stream, serde_json::to_vec(&result).unwrap()).await.unwrap();
        // No `set_audio_file` call: the persistence worker never published
        // the finalized path before `audio_file_wait_secs` elapsed.

        let controller = ConversationController::new(runtime.clone());
        let outcome = controller.run(session_id, conversation_id, own_job_id, None).await;

        assert!(outcome.deleted);
        let stored = runtime.conversations.find_by_id(conversation_id).await.unwrap().unwrap();
        assert_eq!(stored.deletion_reason, Some(DeletionReason::AudioFileNotReady));
    }
}
