//! `T`: batch transcription (§4.I). Reads the finalized WAV at `audio_path`,
//! calls the configured `BatchTranscriptionProvider`, and appends a new
//! `TranscriptVersion`, activating it. Failure here is fatal for the whole
//! chain — the scheduler marks `S`, `X`, `M`, `U` `deferred_forever`.

use std::path::Path;
use std::time::Instant;

use domain::TranscriptVersion;
use uuid::Uuid;

use super::{conversation_id_arg, JobError};
use crate::Runtime;

pub async fn run(runtime: &Runtime, args: &serde_json::Value) -> Result<serde_json::Value, JobError> {
    let conversation_id = conversation_id_arg(args)?;
    let audio_path = args
        .get("audio_path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| JobError::BadArgs("audio_path".to_string()))?;
    let full_path = Path::new(&runtime.config.storage.chunk_dir).join(audio_path);

    let bytes = tokio::fs::read(&full_path)
        .await
        .map_err(|e| JobError::Other(anyhow::anyhow!("reading {full_path:?}: {e}")))?;
    let sample_rate = wav_sample_rate(&bytes).unwrap_or(16_000);

    let started = Instant::now();
    let transcription = runtime.batch_transcription.transcribe(&bytes, sample_rate, true).await?;
    let processing_time_seconds = started.elapsed().as_secs_f64();

    let version = TranscriptVersion {
        version_id: Uuid::new_v4(),
        transcript: transcription.text,
        segments: transcription.segments,
        provider: runtime.batch_transcription.name().to_string(),
        model: runtime.batch_transcription.model().map(|s| s.to_string()),
        created_at: chrono::Utc::now(),
        processing_time_seconds: Some(processing_time_seconds),
        metadata: Default::default(),
    };

    let conversation = runtime.conversations.add_transcript_version(conversation_id, version.clone(), true).await?;

    Ok(serde_json::json!({
        "conversation_id": conversation_id,
        "version_id": version.version_id,
        "word_count": conversation.active_transcript().map(|v| v.transcript.split_whitespace().count()).unwrap_or(0),
        "processing_time_seconds": processing_time_seconds,
    }))
}

/// Reads the sample rate out of a WAV header without pulling in a full
/// `hound::WavReader` — the provider call only needs the number, not decoded
/// samples.
fn wav_sample_rate(bytes: &[u8]) -> Option<u32> {
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).ok()?;
    Some(reader.spec().sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Conversation;

    fn write_test_wav(dir: &Path, name: &str, sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(dir.join(name), spec).unwrap();
        for i in 0..100 {
            writer.write_sample((i % 100) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn wav_sample_rate_reads_the_header() {
        let dir = std::env::temp_dir();
        let name = format!("transcribe-test-{}.wav", Uuid::new_v4());
        write_test_wav(&dir, &name, 44_100);
        let bytes = std::fs::read(dir.join(&name)).unwrap();
        std::fs::remove_file(dir.join(&name)).ok();

        assert_eq!(wav_sample_rate(&bytes), Some(44_100));
    }

    #[test]
    fn wav_sample_rate_is_none_for_garbage_bytes() {
        assert_eq!(wav_sample_rate(b"not a wav file"), None);
    }

    #[tokio::test]
    async fn appends_and_activates_a_transcript_version() {
        let runtime = Runtime::for_tests();
        let conversation_id = Uuid::new_v4();
        runtime
            .conversations
            .insert(&Conversation::new(conversation_id, Uuid::new_v4(), Uuid::new_v4(), "client-1".to_string()))
            .await
            .unwrap();

        let audio_path = format!("{conversation_id}.wav");
        write_test_wav(Path::new(&runtime.config.storage.chunk_dir), &audio_path, 16_000);

        let args = serde_json::json!({"conversation_id": conversation_id, "audio_path": audio_path});
        let result = run(&runtime, &args).await.unwrap();
        std::fs::remove_file(Path::new(&runtime.config.storage.chunk_dir).join(&audio_path)).ok();

        assert!(result.get("version_id").is_some());
        let conversation = runtime.conversations.find_by_id(conversation_id).await.unwrap().unwrap();
        let active = conversation.active_transcript().unwrap();
        assert_eq!(active.transcript, "mock transcript");
        assert_eq!(active.provider, "mock");
    }
}
