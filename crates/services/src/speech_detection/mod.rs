//! Speech-Detection Controller (§4.F): watches a session's aggregate result
//! stream for "meaningful speech" and, once the threshold is crossed, opens
//! a conversation and hands off to the Conversation Controller (§4.G).

use std::time::Duration;

use config::SpeechThresholds;
use domain::{Aggregate, Conversation, JobId, JobMeta, Queue, SessionId, SessionStatus};
use scheduler::EnqueueRequest;
use tracing::{info, warn};
use uuid::Uuid;

use crate::jobs;
use crate::Runtime;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// §4.F qualification test, shared with the Conversation Controller's
/// "never accumulated qualifying speech" check (§4.G post-loop).
///
/// When word-level confidences are available, qualification requires both
/// `W_MIN` words at or above `C_MIN` confidence *and* those words spanning
/// at least `D_MIN` seconds end-to-end — a handful of high-confidence stray
/// words a fraction of a second apart shouldn't open a conversation. With no
/// word-level data (a provider that only emits text), qualification falls
/// back to a raw word-count threshold.
pub fn is_meaningful_speech(aggregate: &Aggregate, thresholds: &SpeechThresholds) -> bool {
    if !aggregate.words.is_empty() {
        let qualifying: Vec<&domain::Word> = aggregate
            .words
            .iter()
            .filter(|w| w.confidence >= thresholds.c_min)
            .collect();
        if qualifying.len() < thresholds.w_min {
            return false;
        }
        let span = qualifying.last().unwrap().end - qualifying.first().unwrap().start;
        span >= thresholds.d_min_secs
    } else {
        aggregate.word_count() >= thresholds.w_min
    }
}

pub struct SpeechDetectionController {
    runtime: Runtime,
}

impl SpeechDetectionController {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    /// Runs until the session stops being active or meaningful speech is
    /// detected and a Conversation Controller job is enqueued. `own_job_id`
    /// is this controller's own scheduler record, checked every tick so an
    /// operator cancellation stops the loop promptly (§4.G.a's zombie check
    /// applies equally here).
    pub async fn run(&self, session_id: SessionId, own_job_id: JobId) {
        loop {
            match self.runtime.scheduler.is_alive(own_job_id).await {
                Ok(true) => {}
                _ => {
                    info!(%session_id, "speech detection: own job no longer alive, exiting");
                    return;
                }
            }

            match self.runtime.session_registry.get(session_id).await {
                Ok(Some(session)) if session.status == SessionStatus::Active => {}
                Ok(_) => {
                    info!(%session_id, "speech detection: session no longer active, exiting");
                    return;
                }
                Err(e) => {
                    warn!(%session_id, error = %e, "speech detection: session lookup failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            }

            let aggregate = match crate::aggregator::aggregate(self.runtime.stream_bus.as_ref(), session_id).await {
                Ok(a) => a,
                Err(e) => {
                    warn!(%session_id, error = %e, "speech detection: aggregate read failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

            if is_meaningful_speech(&aggregate, &self.runtime.config.thresholds) {
                if let Err(e) = self.spawn_conversation(session_id, own_job_id).await {
                    warn!(%session_id, error = %e, "speech detection: failed to open conversation");
                }
                return;
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn spawn_conversation(&self, session_id: SessionId, own_job_id: JobId) -> anyhow::Result<()> {
        let session = self
            .runtime
            .session_registry
            .get(session_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("session {session_id} vanished before conversation could open"))?;

        let conversation_id = Uuid::new_v4();
        let conversation = Conversation::new(conversation_id, session_id, session.user_id, session.client_id.clone());
        self.runtime.conversations.insert(&conversation).await?;
        self.runtime
            .session_registry
            .set_current_conversation(session_id, conversation_id)
            .await?;

        let meta = JobMeta {
            audio_uuid: Some(session_id),
            conversation_id: Some(conversation_id),
            client_id: Some(session.client_id.clone()),
            has_speech: Some(true),
            ..Default::default()
        };
        let request = EnqueueRequest {
            queue: Queue::Default,
            function: jobs::CONVERSATION_CONTROLLER.to_string(),
            args: serde_json::json!({
                "session_id": session_id,
                "conversation_id": conversation_id,
                "user_id": session.user_id,
                "client_id": session.client_id,
                "speech_job_id": own_job_id,
            }),
            timeout_secs: self.runtime.config.jobs.conversation_controller_secs,
            result_ttl_secs: self.runtime.config.jobs.result_ttl_secs,
            meta,
            ..Default::default()
        };
        self.runtime.scheduler.enqueue(request).await?;
        info!(%session_id, %conversation_id, "speech detection: conversation opened");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Word;

    fn thresholds() -> SpeechThresholds {
        SpeechThresholds {
            w_min: 3,
            c_min: 0.5,
            d_min_secs: 2.0,
            inactivity_threshold_secs: 60,
            max_runtime_secs: 3600,
            audio_file_wait_secs: 30,
        }
    }

    fn word(text: &str, start: f64, end: f64, confidence: f32) -> Word {
        Word {
            text: text.to_string(),
            start,
            end,
            confidence,
        }
    }

    #[test]
    fn qualifies_when_enough_high_confidence_words_span_the_minimum_duration() {
        let aggregate = Aggregate {
            text: "one two three".to_string(),
            words: vec![
                word("one", 0.0, 0.5, 0.9),
                word("two", 1.0, 1.5, 0.9),
                word("three", 2.0, 2.5, 0.9),
            ],
            segments: vec![],
            chunk_count: 1,
        };
        assert!(is_meaningful_speech(&aggregate, &thresholds()));
    }

    #[test]
    fn rejects_high_confidence_words_that_are_too_tightly_clustered() {
        let aggregate = Aggregate {
            text: "one two three".to_string(),
            words: vec![
                word("one", 0.0, 0.1, 0.9),
                word("two", 0.1, 0.2, 0.9),
                word("three", 0.2, 0.3, 0.9),
            ],
            segments: vec![],
            chunk_count: 1,
        };
        assert!(!is_meaningful_speech(&aggregate, &thresholds()));
    }

    #[test]
    fn low_confidence_words_do_not_count_toward_w_min() {
        let aggregate = Aggregate {
            text: "one two three".to_string(),
            words: vec![
                word("one", 0.0, 0.5, 0.1),
                word("two", 1.0, 1.5, 0.1),
                word("three", 2.0, 2.5, 0.9),
            ],
            segments: vec![],
            chunk_count: 1,
        };
        assert!(!is_meaningful_speech(&aggregate, &thresholds()));
    }

    #[test]
    fn falls_back_to_raw_word_count_without_word_level_data() {
        let aggregate = Aggregate {
            text: "one two three".to_string(),
            words: vec![],
            segments: vec![],
            chunk_count: 1,
        };
        assert!(is_meaningful_speech(&aggregate, &thresholds()));
    }

    #[tokio::test]
    async fn exits_immediately_when_session_is_not_active() {
        let runtime = Runtime::for_tests();
        let session_id = Uuid::new_v4();
        let session = domain::Session::new(session_id, "client-1".to_string(), Uuid::new_v4());
        runtime.session_registry.create(session).await.unwrap();
        runtime
            .session_registry
            .finalize(session_id, domain::CompletionReason::UserStopped)
            .await
            .unwrap();
        runtime.session_registry.complete(session_id).await.unwrap();

        let controller = SpeechDetectionController::new(runtime.clone());
        controller.run(session_id, Uuid::new_v4()).await;

        assert!(runtime.session_registry.current_conversation(session_id).await.unwrap().is_none());
    }
}
