use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::ports::{StreamBus, StreamBusError, StreamEntry, StreamName};

struct MemoryStream {
    entries: Vec<StreamEntry>,
    next_ordinal: u64,
    /// group -> set of acked entry ids.
    acked: HashMap<String, HashSet<String>>,
    /// group -> next unread ordinal per consumer group (simple shared cursor;
    /// sufficient for tests, which don't exercise true multi-consumer races).
    cursors: HashMap<String, usize>,
}

impl MemoryStream {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_ordinal: 0,
            acked: HashMap::new(),
            cursors: HashMap::new(),
        }
    }
}

/// In-memory `StreamBus` used by unit and integration tests in place of
/// Redis.
#[derive(Default)]
pub struct MemoryStreamBus {
    streams: Mutex<HashMap<String, MemoryStream>>,
}

impl MemoryStreamBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamBus for MemoryStreamBus {
    async fn append(&self, stream: &StreamName, payload: Vec<u8>) -> Result<String, StreamBusError> {
        let key = stream.key();
        let mut streams = self.streams.lock().unwrap();
        let s = streams.entry(key).or_insert_with(MemoryStream::new);
        let id = format!("{}-0", s.next_ordinal);
        s.next_ordinal += 1;
        s.entries.push(StreamEntry { id: id.clone(), payload });
        Ok(id)
    }

    async fn read(
        &self,
        stream: &StreamName,
        group: &str,
        _consumer: &str,
        max_batch: usize,
        _block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamBusError> {
        let key = stream.key();
        let mut streams = self.streams.lock().unwrap();
        let Some(s) = streams.get_mut(&key) else {
            return Ok(Vec::new());
        };
        let cursor = *s.cursors.get(group).unwrap_or(&0);
        let batch: Vec<StreamEntry> = s.entries[cursor..]
            .iter()
            .take(max_batch)
            .cloned()
            .collect();
        s.cursors.insert(group.to_string(), cursor + batch.len());
        Ok(batch)
    }

    async fn read_all(&self, stream: &StreamName) -> Result<Vec<StreamEntry>, StreamBusError> {
        let key = stream.key();
        let streams = self.streams.lock().unwrap();
        Ok(streams.get(&key).map(|s| s.entries.clone()).unwrap_or_default())
    }

    async fn ack(&self, stream: &StreamName, group: &str, ids: &[String]) -> Result<(), StreamBusError> {
        let key = stream.key();
        let mut streams = self.streams.lock().unwrap();
        if let Some(s) = streams.get_mut(&key) {
            let acked = s.acked.entry(group.to_string()).or_default();
            for id in ids {
                acked.insert(id.clone());
            }
        }
        Ok(())
    }

    async fn len(&self, stream: &StreamName) -> Result<u64, StreamBusError> {
        let key = stream.key();
        let streams = self.streams.lock().unwrap();
        Ok(streams.get(&key).map(|s| s.entries.len() as u64).unwrap_or(0))
    }

    async fn delete(&self, stream: &StreamName) -> Result<(), StreamBusError> {
        let key = stream.key();
        self.streams.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn claim_idle(
        &self,
        _stream: &StreamName,
        _group: &str,
        _claimant: &str,
        _idle_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamBusError> {
        // The in-memory bus has no real consumer crash scenario to reclaim from.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_read_preserves_fifo_order() {
        let bus = MemoryStreamBus::new();
        let stream = StreamName::AudioBytes("session-1".to_string());

        bus.append(&stream, b"chunk-0".to_vec()).await.unwrap();
        bus.append(&stream, b"chunk-1".to_vec()).await.unwrap();
        bus.append(&stream, b"chunk-2".to_vec()).await.unwrap();

        let read = bus.read(&stream, "persistence", "c1", 10, 0).await.unwrap();
        assert_eq!(read.len(), 3);
        assert_eq!(read[0].payload, b"chunk-0");
        assert_eq!(read[2].payload, b"chunk-2");
    }

    #[tokio::test]
    async fn independent_consumer_groups_each_see_every_entry() {
        let bus = MemoryStreamBus::new();
        let stream = StreamName::AudioBytes("session-1".to_string());
        bus.append(&stream, b"chunk-0".to_vec()).await.unwrap();

        let persistence_read = bus.read(&stream, "persistence", "c1", 10, 0).await.unwrap();
        let transcription_read = bus.read(&stream, "transcription", "c1", 10, 0).await.unwrap();

        assert_eq!(persistence_read.len(), 1);
        assert_eq!(transcription_read.len(), 1);
    }

    #[tokio::test]
    async fn delete_clears_the_stream() {
        let bus = MemoryStreamBus::new();
        let stream = StreamName::TranscriptionResults("session-1".to_string());
        bus.append(&stream, b"result".to_vec()).await.unwrap();
        assert_eq!(bus.len(&stream).await.unwrap(), 1);

        bus.delete(&stream).await.unwrap();
        assert_eq!(bus.len(&stream).await.unwrap(), 0);
    }
}
