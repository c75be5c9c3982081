//! `S`: speaker recognition (§4.I). Renames raw diarization labels (`Speaker
//! 1`, `Speaker 2`, ...) to enrolled names by calling the external
//! `SpeakerRecognitionService`. Appends a new transcript version with the
//! renamed segments rather than mutating the active one in place, so the
//! Conversation Store's append-only invariant (§3) holds uniformly across
//! every job in the chain. Unavailable service is an explicit no-op (§4.I);
//! any other provider error is fatal, since `X`/`M`/`U` build on these
//! segment labels.

use std::path::Path;

use uuid::Uuid;

use super::{conversation_id_arg, JobError};
use crate::providers::ProviderError;
use crate::Runtime;

pub async fn run(runtime: &Runtime, args: &serde_json::Value) -> Result<serde_json::Value, JobError> {
    let conversation_id = conversation_id_arg(args)?;
    let conversation = runtime
        .conversations
        .find_by_id(conversation_id)
        .await?
        .ok_or(database::RepositoryError::NotFound)?;

    let Some(active) = conversation.active_transcript() else {
        return Ok(serde_json::json!({"skipped": true, "reason": "no active transcript"}));
    };

    let audio_bytes = match &conversation.audio_path {
        Some(path) => tokio::fs::read(Path::new(&runtime.config.storage.chunk_dir).join(path))
            .await
            .map_err(|e| JobError::Other(e.into()))?,
        None => Vec::new(),
    };

    let renames = match runtime.speaker_recognition.identify(&audio_bytes, &active.segments).await {
        Ok(renames) => renames,
        Err(ProviderError::Unavailable(_)) => {
            return Ok(serde_json::json!({"skipped": true, "reason": "speaker recognition unavailable"}));
        }
        Err(e) => return Err(e.into()),
    };

    if renames.is_empty() {
        return Ok(serde_json::json!({"skipped": true, "reason": "no confident matches"}));
    }

    let mut segments = active.segments.clone();
    for segment in &mut segments {
        if let Some(label) = &segment.speaker {
            if let Some(renamed) = renames.get(label) {
                segment.speaker = Some(renamed.clone());
            }
        }
    }

    let version = domain::TranscriptVersion {
        version_id: Uuid::new_v4(),
        transcript: active.transcript.clone(),
        segments,
        provider: active.provider.clone(),
        model: active.model.clone(),
        created_at: chrono::Utc::now(),
        processing_time_seconds: active.processing_time_seconds,
        metadata: active.metadata.clone(),
    };
    runtime.conversations.add_transcript_version(conversation_id, version.clone(), true).await?;

    Ok(serde_json::json!({
        "conversation_id": conversation_id,
        "version_id": version.version_id,
        "renamed": renames.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ports::SpeakerRecognitionService;
    use async_trait::async_trait;
    use domain::{Conversation, Segment, TranscriptVersion};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct MockIdentify(HashMap<String, String>);

    #[async_trait]
    impl SpeakerRecognitionService for MockIdentify {
        async fn enrolled_speakers(&self, _user_id: Uuid) -> Result<Vec<String>, ProviderError> {
            Ok(self.0.values().cloned().collect())
        }

        async fn identify(
            &self,
            _audio_bytes: &[u8],
            _segments: &[Segment],
        ) -> Result<HashMap<String, String>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    async fn conversation_with_transcript(runtime: &Runtime, speaker: &str) -> domain::ConversationId {
        let conversation_id = Uuid::new_v4();
        runtime
            .conversations
            .insert(&Conversation::new(conversation_id, Uuid::new_v4(), Uuid::new_v4(), "client-1".to_string()))
            .await
            .unwrap();
        let version = TranscriptVersion {
            version_id: Uuid::new_v4(),
            transcript: "hi".to_string(),
            segments: vec![Segment {
                start: 0.0,
                end: 1.0,
                speaker: Some(speaker.to_string()),
                text: "hi".to_string(),
                confidence: None,
            }],
            provider: "mock".to_string(),
            model: None,
            created_at: chrono::Utc::now(),
            processing_time_seconds: None,
            metadata: Default::default(),
        };
        runtime.conversations.add_transcript_version(conversation_id, version, true).await.unwrap();
        conversation_id
    }

    #[tokio::test]
    async fn unavailable_service_is_a_no_op() {
        let runtime = Runtime::for_tests();
        let conversation_id = conversation_with_transcript(&runtime, "Speaker 0").await;

        let result = run(&runtime, &serde_json::json!({"conversation_id": conversation_id})).await.unwrap();

        assert_eq!(result["skipped"], serde_json::json!(true));
        let conversation = runtime.conversations.find_by_id(conversation_id).await.unwrap().unwrap();
        assert_eq!(conversation.transcript_versions.len(), 1);
    }

    #[tokio::test]
    async fn renames_append_a_new_transcript_version_without_touching_the_old_one() {
        let mut runtime = Runtime::for_tests();
        let conversation_id = conversation_with_transcript(&runtime, "Speaker 0").await;
        let mut renames = HashMap::new();
        renames.insert("Speaker 0".to_string(), "Alice".to_string());
        runtime.speaker_recognition = Arc::new(MockIdentify(renames));

        let result = run(&runtime, &serde_json::json!({"conversation_id": conversation_id})).await.unwrap();

        assert_eq!(result["renamed"], serde_json::json!(1));
        let conversation = runtime.conversations.find_by_id(conversation_id).await.unwrap().unwrap();
        assert_eq!(conversation.transcript_versions.len(), 2);
        assert_eq!(conversation.transcript_versions[0].segments[0].speaker.as_deref(), Some("Speaker 0"));
        let active = conversation.active_transcript().unwrap();
        assert_eq!(active.segments[0].speaker.as_deref(), Some("Alice"));
    }
}
