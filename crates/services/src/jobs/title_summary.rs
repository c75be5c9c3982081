//! `U`: title/summary (§4.I). Runs three independent LLM calls in parallel —
//! short title, short summary, detailed summary — and writes whichever
//! succeed. Non-fatal: an LLM failure on any of the three still finishes
//! the job, just without that field.

use super::{conversation_id_arg, JobError};
use crate::providers::ports::LLMClient;
use crate::Runtime;

const MAX_SUMMARY_CHARS: usize = 120;

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
    let Some(llm) = &runtime.llm_client else {
        return Ok(serde_json::json!({"skipped": true, "reason": "llm client not configured"}));
    };
    let transcript = active.transcript.clone();

    let title_prompt = format!(
        "Give a short 3-6 word title for this conversation. Topic only, never include speaker names.\n\n{transcript}"
    );
    let summary_prompt = format!("Summarize this conversation in {MAX_SUMMARY_CHARS} characters or fewer.\n\n{transcript}");
    let detailed_prompt = format!("Write a detailed summary of this conversation.\n\n{transcript}");

    let (title_result, summary_result, detailed_result) = tokio::join!(
        llm.generate(&title_prompt, None, None),
        llm.generate(&summary_prompt, None, None),
        llm.generate(&detailed_prompt, None, None),
    );

    let title = extract(&title_result, None);
    let summary = extract(&summary_result, Some(MAX_SUMMARY_CHARS));
    let detailed_summary = extract(&detailed_result, None);

    runtime
        .conversations
        .set_title_summary(conversation_id, title.clone(), summary.clone(), detailed_summary.clone())
        .await?;

    Ok(serde_json::json!({
        "conversation_id": conversation_id,
        "title_set": title.is_some(),
        "summary_set": summary.is_some(),
        "detailed_summary_set": detailed_summary.is_some(),
    }))
}

fn extract(result: &Result<String, crate::providers::ProviderError>, max_chars: Option<usize>) -> Option<String> {
    result.as_ref().ok().map(|text| {
        let trimmed = text.trim();
        match max_chars {
            Some(max) if trimmed.chars().count() > max => trimmed.chars().take(max).collect(),
            _ => trimmed.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use domain::{Conversation, Segment, TranscriptVersion};
    use uuid::Uuid;

    #[test]
    fn extract_truncates_to_the_character_budget() {
        let long = "x".repeat(200);
        let truncated = extract(&Ok(long), Some(MAX_SUMMARY_CHARS));
        assert_eq!(truncated.unwrap().chars().count(), MAX_SUMMARY_CHARS);
    }

    #[test]
    fn extract_trims_whitespace_and_leaves_short_text_untouched() {
        let value = extract(&Ok("  a title  ".to_string()), None);
        assert_eq!(value.as_deref(), Some("a title"));
    }

    #[test]
    fn extract_yields_none_on_provider_failure() {
        let err: Result<String, ProviderError> = Err(ProviderError::Unavailable("down".to_string()));
        assert_eq!(extract(&err, None), None);
    }

    async fn conversation_with_transcript(runtime: &Runtime) -> domain::ConversationId {
        let conversation_id = Uuid::new_v4();
        runtime
            .conversations
            .insert(&Conversation::new(conversation_id, Uuid::new_v4(), Uuid::new_v4(), "client-1".to_string()))
            .await
            .unwrap();
        let version = TranscriptVersion {
            version_id: Uuid::new_v4(),
            transcript: "a long conversation about gardening".to_string(),
            segments: vec![Segment {
                start: 0.0,
                end: 1.0,
                speaker: None,
                text: "a long conversation about gardening".to_string(),
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
    async fn writes_all_three_fields_from_a_successful_llm() {
        let runtime = Runtime::for_tests();
        let conversation_id = conversation_with_transcript(&runtime).await;

        let result = run(&runtime, &serde_json::json!({"conversation_id": conversation_id})).await.unwrap();

        assert_eq!(result["title_set"], serde_json::json!(true));
        assert_eq!(result["summary_set"], serde_json::json!(true));
        assert_eq!(result["detailed_summary_set"], serde_json::json!(true));
        let conversation = runtime.conversations.find_by_id(conversation_id).await.unwrap().unwrap();
        assert!(conversation.title.is_some());
        assert!(conversation.summary.is_some());
        assert!(conversation.detailed_summary.is_some());
    }

    #[tokio::test]
    async fn skips_without_an_active_transcript() {
        let runtime = Runtime::for_tests();
        let conversation_id = Uuid::new_v4();
        runtime
            .conversations
            .insert(&Conversation::new(conversation_id, Uuid::new_v4(), Uuid::new_v4(), "client-1".to_string()))
            .await
            .unwrap();

        let result = run(&runtime, &serde_json::json!({"conversation_id": conversation_id})).await.unwrap();
        assert_eq!(result["skipped"], serde_json::json!(true));
    }
}
