//! Provider interfaces (§6) — capabilities consumed by the core. Concrete
//! transcription/diarization/memory/LLM backends are out of scope; only
//! these contracts matter — every backend sits behind one of these traits
//! as a pluggable implementation.

use async_trait::async_trait;
use domain::{Segment, Word};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Clone)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider timed out")]
    Timeout,
    #[error("provider returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Default)]
pub struct BatchTranscription {
    pub text: String,
    pub words: Vec<Word>,
    pub segments: Vec<Segment>,
}

/// `BatchTranscriptionProvider.transcribe` (§6).
#[async_trait]
pub trait BatchTranscriptionProvider: Send + Sync {
    async fn transcribe(
        &self,
        audio_bytes: &[u8],
        sample_rate: u32,
        diarize: bool,
    ) -> Result<BatchTranscription, ProviderError>;

    /// Provider name recorded on `TranscriptVersion.provider`.
    fn name(&self) -> &str;
    fn model(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamingPartial {
    pub text: String,
    pub words: Vec<Word>,
    pub segments: Vec<Segment>,
    pub is_final: bool,
}

/// `StreamingTranscriptionProvider` (§6): `start_stream`/`process_audio_chunk`/`end_stream`.
#[async_trait]
pub trait StreamingTranscriptionProvider: Send + Sync {
    async fn start_stream(&self, client_id: &str, sample_rate: u32, diarize: bool) -> Result<(), ProviderError>;

    /// Returns `None` when the provider has nothing to emit yet (buffered internally).
    async fn process_audio_chunk(&self, client_id: &str, bytes: &[u8]) -> Result<Option<StreamingPartial>, ProviderError>;

    async fn end_stream(&self, client_id: &str) -> Result<StreamingPartial, ProviderError>;
}

/// `DiarizationProvider.diarize` (§6). `Annotation` is a flat segment list —
/// the core treats diarization output opaquely (§4.D).
#[async_trait]
pub trait DiarizationProvider: Send + Sync {
    async fn diarize(&self, audio_bytes: &[u8], sample_rate: u32) -> Result<Vec<Segment>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub memory_id: String,
    pub content: String,
}

/// `MemoryProvider` (§6): `add_memory`, `search`, `get_all`, `count`, `update`, `delete`, `delete_all_user_memories`.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn add_memory(
        &self,
        transcript: &str,
        client_id: &str,
        source_id: Uuid,
        user_id: Uuid,
        user_email: &str,
        allow_update: bool,
    ) -> Result<(bool, Vec<String>), ProviderError>;

    async fn search(&self, user_id: Uuid, query: &str, limit: usize) -> Result<Vec<MemoryRecord>, ProviderError>;
    async fn get_all(&self, user_id: Uuid) -> Result<Vec<MemoryRecord>, ProviderError>;
    async fn count(&self, user_id: Uuid) -> Result<usize, ProviderError>;
    async fn update(&self, memory_id: &str, content: &str) -> Result<(), ProviderError>;
    async fn delete(&self, memory_id: &str) -> Result<(), ProviderError>;
    async fn delete_all_user_memories(&self, user_id: Uuid) -> Result<(), ProviderError>;

    fn name(&self) -> &str;
}

/// `LLMClient.generate` (§6); an async wrapper around what may be a blocking client.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn generate(&self, prompt: &str, model: Option<&str>, temperature: Option<f32>) -> Result<String, ProviderError>;
}

/// `SpeakerRecognitionService` (§6, optional/HTTP): `enrolled_speakers`, `identify`.
#[async_trait]
pub trait SpeakerRecognitionService: Send + Sync {
    async fn enrolled_speakers(&self, user_id: Uuid) -> Result<Vec<String>, ProviderError>;

    /// Returns a speaker-label rename map (`raw label -> enrolled name`); an
    /// empty map means no confident matches.
    async fn identify(
        &self,
        audio_bytes: &[u8],
        segments: &[Segment],
    ) -> Result<std::collections::HashMap<String, String>, ProviderError>;
}
