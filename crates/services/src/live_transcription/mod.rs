//! Live Transcription Worker (§4.D).
//!
//! Drains `audio.bytes[session_id]` independently of the Audio Persistence
//! Worker (its own `transcription` consumer group on the same stream) and
//! forwards chunks to a `StreamingTranscriptionProvider`. Final emissions
//! are appended to `transcription.results[session_id]`; interim results are
//! dropped under backpressure, never finals (§4.D).

use std::sync::Arc;
use std::time::{Duration, Instant};

use domain::{AudioChunkEnvelope, SessionId, SessionStatus, TranscriptionResult};
use streambus::{SessionRegistry, StreamBus, StreamName};
use tracing::warn;

use crate::providers::ports::StreamingTranscriptionProvider;
use crate::Runtime;

const CONSUMER_GROUP: &str = "transcription";
const MAX_BATCH: usize = 64;
const BLOCK_MS: u64 = 1_000;

pub struct LiveTranscriptionWorker {
    stream_bus: Arc<dyn StreamBus>,
    session_registry: Arc<dyn SessionRegistry>,
    provider: Arc<dyn StreamingTranscriptionProvider>,
    claim_interval: Duration,
    fatal_pending_ms: u64,
}

impl LiveTranscriptionWorker {
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            stream_bus: runtime.stream_bus.clone(),
            session_registry: runtime.session_registry.clone(),
            provider: runtime.streaming_transcription.clone(),
            claim_interval: Duration::from_secs(runtime.config.redis.claim_interval_secs),
            fatal_pending_ms: runtime.config.redis.fatal_pending_secs * 1_000,
        }
    }

    pub async fn run(&self, session_id: SessionId, client_id: String, sample_rate: u32, diarize: bool) {
        if let Err(e) = self.provider.start_stream(&client_id, sample_rate, diarize).await {
            warn!(%session_id, error = %e, "live transcription: provider failed to start stream");
            return;
        }

        let consumer = format!("transcription-{session_id}");
        let stream = StreamName::AudioBytes(session_id.to_string());
        let results = StreamName::TranscriptionResults(session_id.to_string());
        let mut last_claim = Instant::now();

        loop {
            let entries = match self
                .stream_bus
                .read(&stream, CONSUMER_GROUP, &consumer, MAX_BATCH, BLOCK_MS)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(%session_id, error = %e, "live transcription: stream read failed, backing off");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            if last_claim.elapsed() >= self.claim_interval {
                self.reap_stuck_entries(session_id, &stream, &consumer).await;
                last_claim = Instant::now();
            }

            if !entries.is_empty() {
                let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
                for entry in &entries {
                    let Ok(envelope) = serde_json::from_slice::<AudioChunkEnvelope>(&entry.payload) else {
                        continue;
                    };
                    match self.provider.process_audio_chunk(&client_id, &envelope.payload).await {
                        Ok(Some(partial)) if partial.is_final => {
                            self.emit(&results, partial.text, partial.words, partial.segments).await;
                        }
                        Ok(_) => {
                            // Interim result: carried opaquely by the provider, never
                            // written to the durable result stream (§4.D backpressure policy).
                        }
                        Err(e) => {
                            warn!(%session_id, error = %e, "live transcription: provider chunk processing failed");
                        }
                    }
                }
                if let Err(e) = self.stream_bus.ack(&stream, CONSUMER_GROUP, &ids).await {
                    warn!(%session_id, error = %e, "live transcription: ack failed");
                }
            }

            match self.session_registry.get(session_id).await {
                Ok(Some(session)) if session.status == SessionStatus::Active => continue,
                _ => break,
            }
        }

        if let Ok(final_result) = self.provider.end_stream(&client_id).await {
            if !final_result.text.is_empty() || !final_result.words.is_empty() {
                self.emit(&results, final_result.text, final_result.words, final_result.segments).await;
            }
        }
    }

    /// §4.A maintenance routine: see `AudioPersistenceWorker::reap_stuck_entries`.
    async fn reap_stuck_entries(&self, session_id: SessionId, stream: &StreamName, consumer: &str) {
        match self.stream_bus.claim_idle(stream, CONSUMER_GROUP, consumer, self.fatal_pending_ms).await {
            Ok(stuck) if !stuck.is_empty() => {
                warn!(%session_id, count = stuck.len(), "live transcription: force-acking stuck pending entries");
                let ids: Vec<String> = stuck.iter().map(|e| e.id.clone()).collect();
                if let Err(e) = self.stream_bus.ack(stream, CONSUMER_GROUP, &ids).await {
                    warn!(%session_id, error = %e, "live transcription: failed to ack stuck entries");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%session_id, error = %e, "live transcription: claim_idle failed"),
        }
    }

    async fn emit(&self, results: &StreamName, text: String, words: Vec<domain::Word>, segments: Vec<domain::Segment>) {
        let chunk_count_at_emission = self.stream_bus.len(results).await.unwrap_or(0);
        let payload = TranscriptionResult {
            text,
            words,
            segments,
            chunk_count_at_emission,
        };
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                if let Err(e) = self.stream_bus.append(results, bytes).await {
                    warn!(error = %e, "live transcription: failed to append result");
                }
            }
            Err(e) => warn!(error = %e, "live transcription: failed to serialize result"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use domain::{CompletionReason, Session};
    use uuid::Uuid;

    #[tokio::test]
    async fn final_partials_land_on_the_result_stream_in_order() {
        let runtime = Runtime::for_tests();
        let worker = LiveTranscriptionWorker::new(&runtime);

        let session_id = Uuid::new_v4();
        let session = Session::new(session_id, "client-1".to_string(), Uuid::new_v4());
        runtime.session_registry.create(session).await.unwrap();

        let stream = StreamName::AudioBytes(session_id.to_string());
        let envelope = AudioChunkEnvelope {
            sample_rate: 16_000,
            width: 2,
            channels: 1,
            payload: vec![0; 32],
        };
        runtime.stream_bus.append(&stream, serde_json::to_vec(&envelope).unwrap()).await.unwrap();
        runtime.session_registry.finalize(session_id, CompletionReason::UserStopped).await.unwrap();

        worker.run(session_id, "client-1".to_string(), 16_000, false).await;

        // The mock streaming provider never emits interim partials and emits a
        // final-but-empty result from `end_stream`, which is intentionally not
        // appended (§4.D: never drop finals, but an empty final carries nothing
        // worth aggregating).
        let merged = aggregate(runtime.stream_bus.as_ref(), session_id).await.unwrap();
        assert_eq!(merged.chunk_count, 0);
    }
}
