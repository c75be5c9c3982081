//! `X`: cropping (§4.I). Builds a minimal "speech-only" WAV by concatenating
//! the active transcript's segments with `CONTEXT_PADDING` on each side,
//! merging segments separated by less than `MIN_SEGMENT_GAP`. Idempotent:
//! re-running overwrites the same `{conversation_id}.cropped.wav` path.

use std::path::Path;

use super::{conversation_id_arg, JobError};
use crate::storage_paths::cropped_wav_path;
use crate::Runtime;

const CONTEXT_PADDING_SECS: f64 = 0.5;
const MIN_SEGMENT_GAP_SECS: f64 = 0.3;

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
    if active.segments.is_empty() {
        return Ok(serde_json::json!({"skipped": true, "reason": "no segments to crop"}));
    }
    let Some(audio_path) = conversation.audio_path.clone() else {
        return Ok(serde_json::json!({"skipped": true, "reason": "no source audio"}));
    };

    let chunk_dir = runtime.config.storage.chunk_dir.clone();
    let source_path = Path::new(&chunk_dir).join(&audio_path);
    let dest_path = cropped_wav_path(&chunk_dir, conversation_id);
    let segments = active.segments.clone();

    let basename = tokio::task::spawn_blocking(move || crop_wav(&source_path, &dest_path, &segments))
        .await
        .map_err(|e| JobError::Other(anyhow::anyhow!("crop task panicked: {e}")))??;

    runtime
        .conversations
        .set_audio_paths(conversation_id, Some(audio_path), Some(basename.clone()))
        .await?;

    Ok(serde_json::json!({
        "conversation_id": conversation_id,
        "cropped_audio_path": basename,
    }))
}

/// Merges `segments` (padded and gap-merged) into a list of sample ranges
/// and concatenates them from `source` into a new WAV at `dest`, returning
/// `dest`'s file name. Runs on a blocking thread pool — `hound` is
/// synchronous I/O.
fn crop_wav(source: &Path, dest: &Path, segments: &[domain::Segment]) -> Result<String, JobError> {
    let reader = hound::WavReader::open(source).map_err(|e| JobError::Other(anyhow::anyhow!("opening {source:?}: {e}")))?;
    let spec = reader.spec();
    let sample_rate = spec.sample_rate as f64;
    let channels = spec.channels as usize;
    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .collect::<Result<_, _>>()
        .map_err(|e| JobError::Other(anyhow::anyhow!("decoding {source:?}: {e}")))?;

    let merged = merged_ranges(segments);

    let mut writer =
        hound::WavWriter::create(dest, spec).map_err(|e| JobError::Other(anyhow::anyhow!("creating {dest:?}: {e}")))?;
    for (start, end) in merged {
        let start_idx = ((start * sample_rate) as usize * channels).min(samples.len());
        let end_idx = ((end * sample_rate) as usize * channels).min(samples.len());
        for &sample in &samples[start_idx..end_idx] {
            writer
                .write_sample(sample)
                .map_err(|e| JobError::Other(anyhow::anyhow!("writing {dest:?}: {e}")))?;
        }
    }
    writer.finalize().map_err(|e| JobError::Other(anyhow::anyhow!("finalizing {dest:?}: {e}")))?;

    Ok(dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default())
}

/// Pads each segment by `CONTEXT_PADDING_SECS` on each side and merges any
/// pair closer than `MIN_SEGMENT_GAP_SECS`, in timestamp order.
fn merged_ranges(segments: &[domain::Segment]) -> Vec<(f64, f64)> {
    let mut ranges: Vec<(f64, f64)> = segments
        .iter()
        .map(|s| ((s.start - CONTEXT_PADDING_SECS).max(0.0), s.end + CONTEXT_PADDING_SECS))
        .collect();
    ranges.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let mut merged: Vec<(f64, f64)> = Vec::new();
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.0 - last.1 < MIN_SEGMENT_GAP_SECS => {
                last.1 = last.1.max(range.1);
            }
            _ => merged.push(range),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64) -> domain::Segment {
        domain::Segment {
            start,
            end,
            speaker: None,
            text: String::new(),
            confidence: None,
        }
    }

    #[test]
    fn padded_segments_with_a_short_gap_are_merged_into_one_range() {
        // [1.0,1.2] and [1.3,1.5] padded by 0.5s each overlap: [0.5,1.7]
        // and [0.8,2.0]. They should collapse to one range.
        let merged = merged_ranges(&[segment(1.0, 1.2), segment(1.3, 1.5)]);
        assert_eq!(merged, vec![(0.5, 2.0)]);
    }

    #[test]
    fn distant_segments_stay_separate() {
        let merged = merged_ranges(&[segment(0.0, 1.0), segment(10.0, 11.0)]);
        assert_eq!(merged, vec![(0.0, 1.5), (9.5, 11.5)]);
    }

    #[test]
    fn padding_never_pushes_a_range_start_before_zero() {
        let merged = merged_ranges(&[segment(0.1, 0.4)]);
        assert_eq!(merged, vec![(0.0, 0.9)]);
    }

    #[test]
    fn out_of_order_segments_are_sorted_before_merging() {
        let merged = merged_ranges(&[segment(10.0, 11.0), segment(0.0, 1.0)]);
        assert_eq!(merged, vec![(0.0, 1.5), (9.5, 11.5)]);
    }
}
