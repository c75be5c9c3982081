//! `M`: memory extraction (§4.I). Filters the active transcript by the
//! user's configured *primary speakers* (skipping entirely if none are
//! present), then hands the transcript to the configured `MemoryProvider`.
//! Failure here is non-fatal — it's reported in the result payload, never
//! propagated, so the job always finishes successfully from the
//! scheduler's point of view (§4.I error policy).

use std::time::Instant;

use domain::MemoryVersion;
use uuid::Uuid;

use super::{conversation_id_arg, JobError};
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

    let primary_speakers: Vec<String> = args
        .get("primary_speakers")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    if !primary_speakers.is_empty() {
        let present = active
            .segments
            .iter()
            .filter_map(|s| s.speaker.as_deref())
            .any(|speaker| primary_speakers.iter().any(|p| p == speaker));
        if !present {
            return Ok(serde_json::json!({"skipped": true, "reason": "no primary speaker present"}));
        }
    }

    let Some(provider) = &runtime.memory_provider else {
        return Ok(serde_json::json!({"skipped": true, "reason": "memory provider not configured"}));
    };

    let user_email = args
        .get("user_email")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}@chronicle.local", conversation.user_id));

    let started = Instant::now();
    let outcome = provider
        .add_memory(
            &active.transcript,
            &conversation.client_id,
            conversation_id,
            conversation.user_id,
            &user_email,
            true,
        )
        .await;

    let (updated, memory_ids) = match outcome {
        Ok(result) => result,
        Err(e) => {
            return Ok(serde_json::json!({"skipped": false, "error": e.to_string()}));
        }
    };
    let processing_time_seconds = started.elapsed().as_secs_f64();

    let mut metadata = std::collections::HashMap::new();
    metadata.insert("memory_ids".to_string(), serde_json::json!(memory_ids));
    metadata.insert("updated".to_string(), serde_json::json!(updated));

    let version = MemoryVersion {
        version_id: Uuid::new_v4(),
        memory_count: memory_ids.len() as u32,
        transcript_version_id: active.version_id,
        provider: provider.name().to_string(),
        model: None,
        created_at: chrono::Utc::now(),
        processing_time_seconds: Some(processing_time_seconds),
        metadata,
    };
    runtime.conversations.add_memory_version(conversation_id, version.clone(), true).await?;

    Ok(serde_json::json!({
        "conversation_id": conversation_id,
        "version_id": version.version_id,
        "memory_count": memory_ids.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Conversation, Segment, TranscriptVersion};

    async fn conversation_with_transcript(runtime: &Runtime, speaker: Option<&str>) -> domain::ConversationId {
        let conversation_id = Uuid::new_v4();
        let conversation = Conversation::new(conversation_id, Uuid::new_v4(), Uuid::new_v4(), "client-1".to_string());
        runtime.conversations.insert(&conversation).await.unwrap();
        let version = TranscriptVersion {
            version_id: Uuid::new_v4(),
            transcript: "hello there".to_string(),
            segments: vec![Segment {
                start: 0.0,
                end: 1.0,
                speaker: speaker.map(str::to_string),
                text: "hello there".to_string(),
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
    async fn skips_when_no_primary_speaker_present() {
        let runtime = Runtime::for_tests();
        let conversation_id = conversation_with_transcript(&runtime, Some("Speaker 0")).await;

        let args = serde_json::json!({
            "conversation_id": conversation_id,
            "primary_speakers": ["Speaker 1"],
        });
        let result = run(&runtime, &args).await.unwrap();

        assert_eq!(result["skipped"], serde_json::json!(true));
        let conversation = runtime.conversations.find_by_id(conversation_id).await.unwrap().unwrap();
        assert!(conversation.memory_versions.is_empty());
    }

    #[tokio::test]
    async fn appends_a_memory_version_when_speaker_filter_passes() {
        let runtime = Runtime::for_tests();
        let conversation_id = conversation_with_transcript(&runtime, Some("Speaker 0")).await;

        let args = serde_json::json!({
            "conversation_id": conversation_id,
            "primary_speakers": ["Speaker 0"],
        });
        let result = run(&runtime, &args).await.unwrap();

        assert!(result.get("version_id").is_some());
        let conversation = runtime.conversations.find_by_id(conversation_id).await.unwrap().unwrap();
        assert_eq!(conversation.memory_versions.len(), 1);
        assert_eq!(conversation.active_memory_version, Some(conversation.memory_versions[0].version_id));
    }

    #[tokio::test]
    async fn runs_unconditionally_when_no_primary_speakers_configured() {
        let runtime = Runtime::for_tests();
        let conversation_id = conversation_with_transcript(&runtime, None).await;

        let result = run(&runtime, &serde_json::json!({"conversation_id": conversation_id})).await.unwrap();

        assert!(result.get("version_id").is_some());
    }
}
