//! In-process provider stand-ins used by tests and by `Runtime` when no
//! external backend is configured for a capability.

use async_trait::async_trait;
use domain::{Segment, Word};
use std::collections::HashMap;
use uuid::Uuid;

use super::ports::{
    BatchTranscription, BatchTranscriptionProvider, DiarizationProvider, LLMClient, MemoryProvider, MemoryRecord, ProviderError,
    SpeakerRecognitionService, StreamingPartial, StreamingTranscriptionProvider,
};

/// Echoes back a fixed transcript; useful for exercising the post-processing
/// chain's control flow without a real ASR backend.
pub struct MockBatchTranscriptionProvider {
    pub text: String,
}

impl Default for MockBatchTranscriptionProvider {
    fn default() -> Self {
        Self {
            text: "mock transcript".to_string(),
        }
    }
}

#[async_trait]
impl BatchTranscriptionProvider for MockBatchTranscriptionProvider {
    async fn transcribe(&self, _audio_bytes: &[u8], _sample_rate: u32, _diarize: bool) -> Result<BatchTranscription, ProviderError> {
        Ok(BatchTranscription {
            text: self.text.clone(),
            words: self
                .text
                .split_whitespace()
                .enumerate()
                .map(|(i, w)| Word {
                    text: w.to_string(),
                    start: i as f64,
                    end: i as f64 + 0.5,
                    confidence: 1.0,
                })
                .collect(),
            segments: vec![Segment {
                start: 0.0,
                end: self.text.split_whitespace().count() as f64,
                speaker: Some("Speaker 1".to_string()),
                text: self.text.clone(),
                confidence: Some(1.0),
            }],
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Default)]
pub struct MockStreamingTranscriptionProvider;

#[async_trait]
impl StreamingTranscriptionProvider for MockStreamingTranscriptionProvider {
    async fn start_stream(&self, _client_id: &str, _sample_rate: u32, _diarize: bool) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn process_audio_chunk(&self, _client_id: &str, _bytes: &[u8]) -> Result<Option<StreamingPartial>, ProviderError> {
        Ok(None)
    }

    async fn end_stream(&self, _client_id: &str) -> Result<StreamingPartial, ProviderError> {
        Ok(StreamingPartial {
            is_final: true,
            ..Default::default()
        })
    }
}

#[derive(Default)]
pub struct NoopDiarizationProvider;

#[async_trait]
impl DiarizationProvider for NoopDiarizationProvider {
    async fn diarize(&self, _audio_bytes: &[u8], _sample_rate: u32) -> Result<Vec<Segment>, ProviderError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct NoopMemoryProvider;

#[async_trait]
impl MemoryProvider for NoopMemoryProvider {
    async fn add_memory(
        &self,
        _transcript: &str,
        _client_id: &str,
        _source_id: Uuid,
        _user_id: Uuid,
        _user_email: &str,
        _allow_update: bool,
    ) -> Result<(bool, Vec<String>), ProviderError> {
        Ok((true, Vec::new()))
    }

    async fn search(&self, _user_id: Uuid, _query: &str, _limit: usize) -> Result<Vec<MemoryRecord>, ProviderError> {
        Ok(Vec::new())
    }

    async fn get_all(&self, _user_id: Uuid) -> Result<Vec<MemoryRecord>, ProviderError> {
        Ok(Vec::new())
    }

    async fn count(&self, _user_id: Uuid) -> Result<usize, ProviderError> {
        Ok(0)
    }

    async fn update(&self, _memory_id: &str, _content: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn delete(&self, _memory_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn delete_all_user_memories(&self, _user_id: Uuid) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

pub struct MockLLMClient {
    pub response: String,
}

impl Default for MockLLMClient {
    fn default() -> Self {
        Self {
            response: "Untitled conversation".to_string(),
        }
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn generate(&self, _prompt: &str, _model: Option<&str>, _temperature: Option<f32>) -> Result<String, ProviderError> {
        Ok(self.response.clone())
    }
}

/// Spec §4.I: "if service is unavailable, S succeeds as a no-op" — this is
/// the unavailable-by-default adapter `Runtime` wires up when no speaker
/// recognition endpoint is configured.
#[derive(Default)]
pub struct UnavailableSpeakerRecognitionService;

#[async_trait]
impl SpeakerRecognitionService for UnavailableSpeakerRecognitionService {
    async fn enrolled_speakers(&self, _user_id: Uuid) -> Result<Vec<String>, ProviderError> {
        Err(ProviderError::Unavailable("speaker recognition not configured".to_string()))
    }

    async fn identify(&self, _audio_bytes: &[u8], _segments: &[Segment]) -> Result<HashMap<String, String>, ProviderError> {
        Err(ProviderError::Unavailable("speaker recognition not configured".to_string()))
    }
}
