use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors that can occur in stream bus operations.
#[derive(Debug, thiserror::Error, Clone)]
pub enum StreamBusError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Which of the two logical streams per session a name refers to (§4.A).
#[derive(Debug, Clone)]
pub enum StreamName {
    /// `audio.bytes[session_id]` — ordered, durable, read by two
    /// independent consumer groups (persistence, transcription).
    AudioBytes(String),
    /// `transcription.results[session_id]` — ordered, durable, single
    /// logical consumer (the aggregator reads all entries per call).
    TranscriptionResults(String),
}

impl StreamName {
    pub fn key(&self) -> String {
        match self {
            StreamName::AudioBytes(session_id) => format!("audio:bytes:{session_id}"),
            StreamName::TranscriptionResults(session_id) => {
                format!("transcription:results:{session_id}")
            }
        }
    }
}

/// One entry read back off a stream: its durable id plus the raw payload
/// bytes the caller serialized when appending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    pub id: String,
    pub payload: Vec<u8>,
}

/// Stream Bus contract (§4.A): an append-only, durable, ordered log with
/// consumer-group semantics. Strict per-stream FIFO; no cross-session
/// ordering guarantee.
#[async_trait]
pub trait StreamBus: Send + Sync {
    /// Append `payload` to `stream`, returning the new entry's id.
    async fn append(&self, stream: &StreamName, payload: Vec<u8>) -> Result<String, StreamBusError>;

    /// Read up to `max_batch` new (or this consumer's still-pending) entries
    /// for `group`/`consumer`, blocking up to `block_ms` if none are
    /// available yet. A chunk is visible to every consumer group
    /// independently — each group acks on its own.
    async fn read(
        &self,
        stream: &StreamName,
        group: &str,
        consumer: &str,
        max_batch: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamBusError>;

    /// Read every entry currently on the stream without creating or
    /// advancing any consumer group — used by the read-only Results
    /// Aggregator (§4.E), which never acks.
    async fn read_all(&self, stream: &StreamName) -> Result<Vec<StreamEntry>, StreamBusError>;

    /// Acknowledge entries so they are not redelivered to this group.
    async fn ack(&self, stream: &StreamName, group: &str, ids: &[String]) -> Result<(), StreamBusError>;

    /// Number of entries currently on the stream.
    async fn len(&self, stream: &StreamName) -> Result<u64, StreamBusError>;

    /// Delete the entire stream (and its consumer groups).
    async fn delete(&self, stream: &StreamName) -> Result<(), StreamBusError>;

    /// Reap entries pending for longer than `idle_ms` in `group`, handing
    /// them to `claimant` so a replacement consumer can pick up stuck work
    /// after a crash.
    async fn claim_idle(
        &self,
        stream: &StreamName,
        group: &str,
        claimant: &str,
        idle_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamBusError>;
}
