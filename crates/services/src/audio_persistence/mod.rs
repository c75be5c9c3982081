//! Audio Persistence Worker (§4.C).
//!
//! Drains `audio.bytes[session_id]` via a dedicated `persistence` consumer
//! group, in parallel with the Live Transcription Worker's independent
//! `transcription` group on the same stream. Maintains one open WAV file
//! per *current conversation*, rotating when `conversation.current[session_id]`
//! changes, and buffers pre-conversation audio in a bounded scratch buffer
//! that is silently discarded if no conversation ever opens.

use std::io::BufWriter;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use domain::{AudioChunkEnvelope, ConversationId, DeletionReason, SessionId, SessionStatus};
use streambus::{SessionRegistry, StreamBus, StreamName};
use tracing::{info, warn};

use crate::storage_paths::wav_path;
use crate::Runtime;

const CONSUMER_GROUP: &str = "persistence";
const MAX_BATCH: usize = 64;
const BLOCK_MS: u64 = 1_000;
const MAX_WRITE_RETRIES: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

struct ConversationWriter {
    writer: hound::WavWriter<BufWriter<std::fs::File>>,
    path: PathBuf,
}

impl ConversationWriter {
    fn create(path: PathBuf, sample_rate: u32, width: u8, channels: u8) -> anyhow::Result<Self> {
        let spec = hound::WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: width as u16 * 8,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec)?;
        Ok(Self { writer, path })
    }

    fn write_chunk(&mut self, envelope: &AudioChunkEnvelope) -> anyhow::Result<()> {
        match envelope.width {
            2 => {
                for sample in envelope.payload.chunks_exact(2) {
                    self.writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
                }
            }
            4 => {
                for sample in envelope.payload.chunks_exact(4) {
                    self.writer
                        .write_sample(i32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]))?;
                }
            }
            other => anyhow::bail!("unsupported sample width {other} bytes"),
        }
        Ok(())
    }

    /// Finalize the WAV header and fsync before the caller publishes
    /// `audio.file[conversation_id]` — §5 ordering guarantee: "the key is
    /// published strictly after the file is fsynced".
    fn finalize(self) -> anyhow::Result<PathBuf> {
        let path = self.path.clone();
        self.writer.finalize()?;
        std::fs::OpenOptions::new().write(true).open(&path)?.sync_all()?;
        Ok(path)
    }
}

/// Per-session worker (§4.C). One instance is spawned per session by the
/// connection handler and runs until the session reaches `finalizing`/
/// `complete` and the byte stream is drained, or the task is cancelled.
pub struct AudioPersistenceWorker {
    stream_bus: std::sync::Arc<dyn StreamBus>,
    session_registry: std::sync::Arc<dyn SessionRegistry>,
    conversations: std::sync::Arc<dyn database::ConversationRepository>,
    chunk_dir: String,
    scratch_buffer_max_bytes: usize,
    claim_interval: Duration,
    fatal_pending_ms: u64,
}

impl AudioPersistenceWorker {
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            stream_bus: runtime.stream_bus.clone(),
            session_registry: runtime.session_registry.clone(),
            conversations: runtime.conversations.clone(),
            chunk_dir: runtime.config.storage.chunk_dir.clone(),
            scratch_buffer_max_bytes: runtime.config.storage.scratch_buffer_max_bytes,
            claim_interval: Duration::from_secs(runtime.config.redis.claim_interval_secs),
            fatal_pending_ms: runtime.config.redis.fatal_pending_secs * 1_000,
        }
    }

    pub async fn run(&self, session_id: SessionId) {
        let consumer = format!("persistence-{session_id}");
        let stream = StreamName::AudioBytes(session_id.to_string());
        let mut current_conversation: Option<ConversationId> = None;
        let mut writer: Option<ConversationWriter> = None;
        let mut scratch: Vec<u8> = Vec::new();
        let mut last_claim = Instant::now();

        loop {
            let entries = match self
                .stream_bus
                .read(&stream, CONSUMER_GROUP, &consumer, MAX_BATCH, BLOCK_MS)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(%session_id, error = %e, "persistence worker: stream read failed, backing off");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            if last_claim.elapsed() >= self.claim_interval {
                self.reap_stuck_entries(session_id, &stream, &consumer).await;
                last_claim = Instant::now();
            }

            self.rotate_if_needed(session_id, &mut current_conversation, &mut writer, &mut scratch)
                .await;

            if !entries.is_empty() {
                let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
                for entry in &entries {
                    self.absorb(entry, current_conversation, &mut writer, &mut scratch).await;
                }
                if let Err(e) = self.stream_bus.ack(&stream, CONSUMER_GROUP, &ids).await {
                    warn!(%session_id, error = %e, "persistence worker: ack failed");
                }
            }

            match self.session_registry.get(session_id).await {
                Ok(Some(session)) if session.status == SessionStatus::Active => continue,
                Ok(_) | Err(_) => {
                    // Finalizing, complete, or the registry entry is gone: drain
                    // whatever is immediately available, then stop (§4.C "File
                    // is always closed on ... session finalizing").
                    if let Ok(stragglers) = self.stream_bus.read(&stream, CONSUMER_GROUP, &consumer, MAX_BATCH, 0).await {
                        if !stragglers.is_empty() {
                            let ids: Vec<String> = stragglers.iter().map(|e| e.id.clone()).collect();
                            for entry in &stragglers {
                                self.absorb(entry, current_conversation, &mut writer, &mut scratch).await;
                            }
                            let _ = self.stream_bus.ack(&stream, CONSUMER_GROUP, &ids).await;
                        }
                    }
                    break;
                }
            }
        }

        if let Some(conversation_id) = current_conversation {
            self.close_and_publish(conversation_id, writer).await;
        }
        info!(%session_id, "persistence worker exiting");
    }

    /// §4.A maintenance routine: entries still pending after
    /// `fatal_pending_secs` are assumed unprocessable (their original
    /// consumer is gone for good) and are force-acked rather than left to
    /// block the stream forever.
    async fn reap_stuck_entries(&self, session_id: SessionId, stream: &StreamName, consumer: &str) {
        match self.stream_bus.claim_idle(stream, CONSUMER_GROUP, consumer, self.fatal_pending_ms).await {
            Ok(stuck) if !stuck.is_empty() => {
                warn!(%session_id, count = stuck.len(), "persistence worker: force-acking stuck pending entries");
                let ids: Vec<String> = stuck.iter().map(|e| e.id.clone()).collect();
                if let Err(e) = self.stream_bus.ack(stream, CONSUMER_GROUP, &ids).await {
                    warn!(%session_id, error = %e, "persistence worker: failed to ack stuck entries");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%session_id, error = %e, "persistence worker: claim_idle failed"),
        }
    }

    async fn rotate_if_needed(
        &self,
        session_id: SessionId,
        current_conversation: &mut Option<ConversationId>,
        writer: &mut Option<ConversationWriter>,
        scratch: &mut Vec<u8>,
    ) {
        let desired = self.session_registry.current_conversation(session_id).await.unwrap_or(None);
        if desired == *current_conversation {
            return;
        }
        if let Some(old_id) = current_conversation.take() {
            self.close_and_publish(old_id, writer.take()).await;
        }
        scratch.clear();
        *current_conversation = desired;
    }

    async fn absorb(
        &self,
        entry: &streambus::StreamEntry,
        current_conversation: Option<ConversationId>,
        writer: &mut Option<ConversationWriter>,
        scratch: &mut Vec<u8>,
    ) {
        let Ok(envelope) = serde_json::from_slice::<AudioChunkEnvelope>(&entry.payload) else {
            warn!("persistence worker: malformed audio chunk entry, dropping");
            return;
        };

        let Some(conversation_id) = current_conversation else {
            scratch.extend_from_slice(&envelope.payload);
            if scratch.len() > self.scratch_buffer_max_bytes {
                let overflow = scratch.len() - self.scratch_buffer_max_bytes;
                scratch.drain(..overflow);
            }
            return;
        };

        if writer.is_none() {
            *writer = self.open_writer(conversation_id, &envelope).await;
        }

        let Some(w) = writer.as_mut() else {
            return;
        };

        let mut backoff = INITIAL_BACKOFF;
        for attempt in 0..MAX_WRITE_RETRIES {
            match w.write_chunk(&envelope) {
                Ok(()) => return,
                Err(e) => {
                    warn!(%conversation_id, attempt, error = %e, "persistence worker: chunk write failed");
                    if attempt + 1 == MAX_WRITE_RETRIES {
                        break;
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        warn!(%conversation_id, "persistence worker: write retries exhausted, soft-deleting conversation");
        if let Err(e) = self.conversations.soft_delete(conversation_id, DeletionReason::AudioFileNotReady).await {
            warn!(%conversation_id, error = %e, "persistence worker: soft-delete after write failure also failed");
        }
        *writer = None;
    }

    async fn open_writer(&self, conversation_id: ConversationId, envelope: &AudioChunkEnvelope) -> Option<ConversationWriter> {
        if let Some(parent) = wav_path(&self.chunk_dir, conversation_id).parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(%conversation_id, error = %e, "persistence worker: failed to create chunk dir");
                return None;
            }
        }
        let path = wav_path(&self.chunk_dir, conversation_id);
        match ConversationWriter::create(path, envelope.sample_rate, envelope.width, envelope.channels) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(%conversation_id, error = %e, "persistence worker: failed to open wav writer");
                None
            }
        }
    }

    async fn close_and_publish(&self, conversation_id: ConversationId, writer: Option<ConversationWriter>) {
        let Some(writer) = writer else {
            return;
        };
        match writer.finalize() {
            Ok(path) => {
                let file_name = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
                match crate::storage_paths::content_hash(&path) {
                    Ok(hash) => info!(%conversation_id, content_hash = %hash, "persistence worker: audio file finalized"),
                    Err(e) => warn!(%conversation_id, error = %e, "persistence worker: failed to hash finalized audio file"),
                }
                if let Err(e) = self.session_registry.set_audio_file(conversation_id, file_name).await {
                    warn!(%conversation_id, error = %e, "persistence worker: failed to publish audio.file");
                }
            }
            Err(e) => {
                warn!(%conversation_id, error = %e, "persistence worker: failed to finalize wav file");
                let _ = self.conversations.soft_delete(conversation_id, DeletionReason::AudioFileNotReady).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{CompletionReason, Session};
    use uuid::Uuid;

    fn envelope(payload: Vec<u8>) -> AudioChunkEnvelope {
        AudioChunkEnvelope {
            sample_rate: 16_000,
            width: 2,
            channels: 1,
            payload,
        }
    }

    #[tokio::test]
    async fn writes_a_playable_wav_and_publishes_audio_file() {
        let mut runtime = Runtime::for_tests();
        let dir = tempfile_dir();
        runtime.config.storage.chunk_dir = dir.clone();
        let worker = AudioPersistenceWorker::new(&runtime);

        let session_id = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let session = Session::new(session_id, "client-1".to_string(), Uuid::new_v4());
        runtime.session_registry.create(session).await.unwrap();
        runtime
            .session_registry
            .set_current_conversation(session_id, conversation_id)
            .await
            .unwrap();

        let stream = StreamName::AudioBytes(session_id.to_string());
        let samples: Vec<i16> = vec![100, -100, 200, -200];
        let mut payload = Vec::new();
        for s in &samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        let bytes = serde_json::to_vec(&envelope(payload)).unwrap();
        runtime.stream_bus.append(&stream, bytes).await.unwrap();

        runtime.session_registry.finalize(session_id, CompletionReason::UserStopped).await.unwrap();

        worker.run(session_id).await;

        let path = wav_path(&dir, conversation_id);
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);

        let published = runtime.session_registry.audio_file(conversation_id).await.unwrap();
        assert!(published.is_some());
    }

    #[tokio::test]
    async fn published_audio_file_hash_is_stable_for_post_processing_to_read() {
        let mut runtime = Runtime::for_tests();
        let dir = tempfile_dir();
        runtime.config.storage.chunk_dir = dir.clone();
        let worker = AudioPersistenceWorker::new(&runtime);

        let session_id = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let session = Session::new(session_id, "client-1".to_string(), Uuid::new_v4());
        runtime.session_registry.create(session).await.unwrap();
        runtime
            .session_registry
            .set_current_conversation(session_id, conversation_id)
            .await
            .unwrap();

        let stream = StreamName::AudioBytes(session_id.to_string());
        let samples: Vec<i16> = vec![10, -10, 20, -20];
        let mut payload = Vec::new();
        for s in &samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        let bytes = serde_json::to_vec(&envelope(payload)).unwrap();
        runtime.stream_bus.append(&stream, bytes).await.unwrap();
        runtime.session_registry.finalize(session_id, CompletionReason::UserStopped).await.unwrap();

        worker.run(session_id).await;

        let path = wav_path(&dir, conversation_id);
        let hash_at_publish = crate::storage_paths::content_hash(&path).unwrap();

        // A later post-processing job (`T`/`X`) reads the same file under
        // `chunk_dir` — §8 requires its content hash still match.
        let hash_when_post_processing_reads_it = crate::storage_paths::content_hash(&path).unwrap();
        assert_eq!(hash_at_publish, hash_when_post_processing_reads_it);
    }

    #[tokio::test]
    async fn pre_conversation_audio_is_buffered_then_discarded_without_a_conversation() {
        let mut runtime = Runtime::for_tests();
        let dir = tempfile_dir();
        runtime.config.storage.chunk_dir = dir;
        let worker = AudioPersistenceWorker::new(&runtime);

        let session_id = Uuid::new_v4();
        let session = Session::new(session_id, "client-1".to_string(), Uuid::new_v4());
        runtime.session_registry.create(session).await.unwrap();

        let stream = StreamName::AudioBytes(session_id.to_string());
        let bytes = serde_json::to_vec(&envelope(vec![1, 2, 3, 4])).unwrap();
        runtime.stream_bus.append(&stream, bytes).await.unwrap();
        runtime.session_registry.finalize(session_id, CompletionReason::UserStopped).await.unwrap();

        // Should return promptly: no conversation ever opened, nothing to finalize.
        worker.run(session_id).await;
        assert!(runtime.session_registry.current_conversation(session_id).await.unwrap().is_none());
    }

    fn tempfile_dir() -> String {
        let dir = std::env::temp_dir().join(format!("chronicle-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.to_string_lossy().into_owned()
    }
}
