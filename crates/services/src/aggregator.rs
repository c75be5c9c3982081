//! Results Aggregator (§4.E): a pure, read-only function over the result
//! stream. Never acks — it's an idempotent view, re-derivable at any time,
//! unlike the consumer-group reads in `audio_persistence`/`live_transcription`.

use domain::{Aggregate, SessionId, TranscriptionResult};
use streambus::{StreamBus, StreamBusError, StreamName};

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error(transparent)]
    Bus(#[from] StreamBusError),
    #[error("malformed result entry: {0}")]
    MalformedEntry(String),
}

/// `aggregate(session_id) -> {text, words, segments, chunk_count}` (§4.E):
/// concatenates every entry on `transcription.results[session_id]` in
/// stream order.
pub async fn aggregate(bus: &dyn StreamBus, session_id: SessionId) -> Result<Aggregate, AggregateError> {
    let stream = StreamName::TranscriptionResults(session_id.to_string());
    let entries = bus.read_all(&stream).await?;

    let mut merged = Aggregate::default();
    for entry in entries {
        let result: TranscriptionResult =
            serde_json::from_slice(&entry.payload).map_err(|e| AggregateError::MalformedEntry(e.to_string()))?;
        merged.text.push_str(&result.text);
        merged.words.extend(result.words);
        merged.segments.extend(result.segments);
        merged.chunk_count += 1;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Word;
    use streambus::MemoryStreamBus;
    use uuid::Uuid;

    async fn push_result(bus: &MemoryStreamBus, session_id: SessionId, text: &str, word: &str) {
        let stream = StreamName::TranscriptionResults(session_id.to_string());
        let result = TranscriptionResult {
            text: text.to_string(),
            words: vec![Word {
                text: word.to_string(),
                start: 0.0,
                end: 1.0,
                confidence: 0.9,
            }],
            segments: vec![],
            chunk_count_at_emission: 1,
        };
        bus.append(&stream, serde_json::to_vec(&result).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn merges_entries_in_stream_order() {
        let bus = MemoryStreamBus::new();
        let session_id = Uuid::new_v4();
        push_result(&bus, session_id, "hello ", "hello").await;
        push_result(&bus, session_id, "world", "world").await;

        let merged = aggregate(&bus, session_id).await.unwrap();
        assert_eq!(merged.text, "hello world");
        assert_eq!(merged.chunk_count, 2);
        assert_eq!(merged.word_count(), 2);
    }

    #[tokio::test]
    async fn empty_stream_yields_default_aggregate() {
        let bus = MemoryStreamBus::new();
        let merged = aggregate(&bus, Uuid::new_v4()).await.unwrap();
        assert_eq!(merged.chunk_count, 0);
        assert_eq!(merged.word_count(), 0);
    }
}
