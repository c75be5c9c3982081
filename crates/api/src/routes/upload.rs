//! Batch audio upload (§6 `POST /audio/upload`). Accepts one or more WAV
//! files with no accompanying live session, persists each under its own
//! freshly minted conversation id, and enqueues the post-processing chain
//! starting at `T`.
//!
//! Walks the multipart body with `while let Some(field) = multipart
//! .next_field()`, matching on `field.name()` for each part and returning
//! a boundary-aware error message on a malformed request.

use std::io::Cursor;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{Json as ResponseJson, Response};
use domain::{Conversation, JobMeta};
use uuid::Uuid;

use crate::middleware::Principal;
use crate::models::UploadedConversation;
use crate::routes::common::error_response;
use crate::AppState;

fn multipart_error(e: axum::extract::multipart::MultipartError) -> Response {
    let message = e.to_string();
    let message = if message.contains("boundary") {
        "invalid multipart/form-data: missing or malformed boundary".to_string()
    } else {
        "invalid multipart/form-data".to_string()
    };
    error_response(StatusCode::BAD_REQUEST, message)
}

/// Downmixes interleaved stereo PCM16 to mono by averaging channel pairs
/// (§6: "stereo auto-downmixed").
fn downmix_to_mono(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks_exact(2)
        .map(|pair| (((pair[0] as i32) + (pair[1] as i32)) / 2) as i16)
        .collect()
}

struct DecodedWav {
    samples: Vec<i16>,
    sample_rate: u32,
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedWav, String> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| format!("not a valid WAV file: {e}"))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err("only 16-bit PCM WAV is supported".to_string());
    }
    if spec.channels != 1 && spec.channels != 2 {
        return Err(format!("unsupported channel count: {}", spec.channels));
    }

    let samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    let samples = samples.map_err(|e| format!("failed to decode WAV samples: {e}"))?;

    let samples = if spec.channels == 2 { downmix_to_mono(&samples) } else { samples };

    Ok(DecodedWav {
        samples,
        sample_rate: spec.sample_rate,
    })
}

fn write_mono_wav(path: &std::path::Path, sample_rate: u32, samples: &[i16]) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

pub async fn upload_handler(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> Result<ResponseJson<Vec<UploadedConversation>>, Response> {
    let mut device_name = "upload".to_string();
    let mut uploaded = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "device_name" => {
                device_name = field
                    .text()
                    .await
                    .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("failed to read device_name: {e}")))?;
            }
            "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("failed to read file: {e}")))?;
                let decoded = decode_wav(&bytes).map_err(|msg| error_response(StatusCode::BAD_REQUEST, msg))?;
                let conversation = persist_and_enqueue(&state, &principal, &device_name, decoded)
                    .await
                    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
                uploaded.push(conversation);
            }
            _ => {}
        }
    }

    if uploaded.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "no audio files provided"));
    }

    Ok(ResponseJson(uploaded))
}

async fn persist_and_enqueue(
    state: &AppState,
    principal: &Principal,
    device_name: &str,
    decoded: DecodedWav,
) -> anyhow::Result<UploadedConversation> {
    let conversation_id = Uuid::new_v4();
    let duration_seconds = decoded.samples.len() as f64 / decoded.sample_rate as f64;

    let filename = format!("{conversation_id}.wav");
    let full_path = std::path::Path::new(&state.runtime.config.storage.chunk_dir).join(&filename);
    if let Some(parent) = full_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    write_mono_wav(&full_path, decoded.sample_rate, &decoded.samples)?;

    let conversation = Conversation::new(conversation_id, conversation_id, principal.user_id, device_name.to_string());
    state.runtime.conversations.insert(&conversation).await?;
    state
        .runtime
        .conversations
        .set_audio_paths(conversation_id, Some(filename.clone()), None)
        .await?;

    let meta = JobMeta {
        audio_uuid: Some(conversation_id),
        conversation_id: Some(conversation_id),
        client_id: Some(device_name.to_string()),
        duration_seconds: Some(duration_seconds),
        ..Default::default()
    };
    let chain = services::jobs::enqueue_post_processing_chain(&state.runtime, conversation_id, Some(filename), meta).await?;

    Ok(UploadedConversation {
        conversation_id,
        transcript_job_id: chain.transcript_job_id,
        speaker_job_id: chain.speaker_job_id,
        memory_job_id: chain.memory_job_id,
        duration_seconds,
        status: "queued".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for sample in samples {
                writer.write_sample(*sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn downmix_averages_channel_pairs() {
        let mixed = downmix_to_mono(&[10, -10, 100, 200]);
        assert_eq!(mixed, vec![0, 150]);
    }

    #[test]
    fn decode_wav_accepts_mono_16bit() {
        let bytes = write_wav(1, 16_000, &[1, 2, 3, 4]);
        let decoded = decode_wav(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples, vec![1, 2, 3, 4]);
    }

    #[test]
    fn decode_wav_downmixes_stereo() {
        let bytes = write_wav(2, 16_000, &[10, -10, 100, 200]);
        let decoded = decode_wav(&bytes).unwrap();
        assert_eq!(decoded.samples, vec![0, 150]);
    }

    #[test]
    fn decode_wav_rejects_unsupported_channel_count() {
        let bytes = write_wav(4, 16_000, &[0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(decode_wav(&bytes).is_err());
    }

    #[test]
    fn decode_wav_rejects_garbage() {
        assert!(decode_wav(b"not a wav file").is_err());
    }
}
