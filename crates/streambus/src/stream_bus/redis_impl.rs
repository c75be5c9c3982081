use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, warn};

use super::ports::{StreamBus, StreamBusError, StreamEntry, StreamName};

/// Redis Streams adapter for the Stream Bus port (§4.A).
///
/// Uses `XADD`/`XREADGROUP`/`XACK`/`XCLAIM` directly rather than a
/// higher-level queue abstraction — these four commands are the whole of
/// what an append-only, consumer-group-aware stream needs.
#[derive(Clone)]
pub struct RedisStreamBus {
    conn: ConnectionManager,
}

const PAYLOAD_FIELD: &str = "payload";

impl RedisStreamBus {
    pub async fn connect(redis_url: &str) -> Result<Self, StreamBusError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StreamBusError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StreamBusError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }

    async fn ensure_group(&self, key: &str, group: &str) -> Result<(), StreamBusError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn.xgroup_create_mkstream(key, group, "0").await;
        if let Err(e) = result {
            // BUSYGROUP means the group already exists — not an error for us.
            if !e.to_string().contains("BUSYGROUP") {
                return Err(StreamBusError::Backend(e.to_string()));
            }
        }
        Ok(())
    }

    fn decode_reply(reply: StreamReadReply) -> Vec<StreamEntry> {
        let mut entries = Vec::new();
        for stream_key in reply.keys {
            for id in stream_key.ids {
                if let Some(redis::Value::BulkString(bytes)) = id.map.get(PAYLOAD_FIELD) {
                    entries.push(StreamEntry {
                        id: id.id,
                        payload: bytes.clone(),
                    });
                }
            }
        }
        entries
    }
}

#[async_trait]
impl StreamBus for RedisStreamBus {
    async fn append(&self, stream: &StreamName, payload: Vec<u8>) -> Result<String, StreamBusError> {
        let mut conn = self.conn.clone();
        let key = stream.key();
        let id: String = conn
            .xadd(&key, "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(|e| StreamBusError::Backend(e.to_string()))?;
        Ok(id)
    }

    async fn read(
        &self,
        stream: &StreamName,
        group: &str,
        consumer: &str,
        max_batch: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamBusError> {
        let key = stream.key();
        self.ensure_group(&key, group).await?;

        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(max_batch)
            .block(block_ms as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[&key], &[">"], &opts)
            .await
            .map_err(|e| StreamBusError::Backend(e.to_string()))?;

        Ok(Self::decode_reply(reply))
    }

    async fn read_all(&self, stream: &StreamName) -> Result<Vec<StreamEntry>, StreamBusError> {
        let key = stream.key();
        let mut conn = self.conn.clone();
        let reply: StreamReadReply = conn
            .xread_options(&[&key], &["0"], &StreamReadOptions::default())
            .await
            .map_err(|e| StreamBusError::Backend(e.to_string()))?;
        Ok(Self::decode_reply(reply))
    }

    async fn ack(&self, stream: &StreamName, group: &str, ids: &[String]) -> Result<(), StreamBusError> {
        if ids.is_empty() {
            return Ok(());
        }
        let key = stream.key();
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&key, group, ids)
            .await
            .map_err(|e| StreamBusError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn len(&self, stream: &StreamName) -> Result<u64, StreamBusError> {
        let key = stream.key();
        let mut conn = self.conn.clone();
        let len: u64 = conn
            .xlen(&key)
            .await
            .map_err(|e| StreamBusError::Backend(e.to_string()))?;
        Ok(len)
    }

    async fn delete(&self, stream: &StreamName) -> Result<(), StreamBusError> {
        let key = stream.key();
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .del(&key)
            .await
            .map_err(|e| StreamBusError::Backend(e.to_string()))?;
        debug!(stream = %key, "deleted stream");
        Ok(())
    }

    async fn claim_idle(
        &self,
        stream: &StreamName,
        group: &str,
        claimant: &str,
        idle_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamBusError> {
        let key = stream.key();
        let mut conn = self.conn.clone();

        // XAUTOCLAIM replies with [next_cursor, claimed_entries, deleted_ids];
        // the typed StreamReadReply doesn't model that shape, so we parse
        // the raw value ourselves and pull the claimed-entries array out.
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&key)
            .arg(group)
            .arg(claimant)
            .arg(idle_ms)
            .arg("0-0")
            .query_async(&mut conn)
            .await
            .map_err(|e| StreamBusError::Backend(e.to_string()))?;

        let entries = Self::decode_xautoclaim_reply(reply)?;
        if !entries.is_empty() {
            warn!(stream = %key, group, count = entries.len(), "reclaimed idle stream entries");
        }
        Ok(entries)
    }
}

impl RedisStreamBus {
    fn decode_xautoclaim_reply(reply: redis::Value) -> Result<Vec<StreamEntry>, StreamBusError> {
        let top = match reply {
            redis::Value::Array(v) | redis::Value::Set(v) => v,
            other => {
                return Err(StreamBusError::Backend(format!(
                    "unexpected XAUTOCLAIM reply shape: {other:?}"
                )))
            }
        };
        let Some(claimed) = top.get(1) else {
            return Ok(Vec::new());
        };
        let claimed = match claimed {
            redis::Value::Array(v) | redis::Value::Set(v) => v,
            _ => return Ok(Vec::new()),
        };

        let mut entries = Vec::new();
        for item in claimed {
            let redis::Value::Array(pair) = item else {
                continue;
            };
            let (Some(redis::Value::BulkString(id_bytes)), Some(redis::Value::Array(fields))) =
                (pair.first(), pair.get(1))
            else {
                continue;
            };
            let id = String::from_utf8_lossy(id_bytes).to_string();
            let mut field_iter = fields.iter();
            while let (Some(redis::Value::BulkString(name)), Some(redis::Value::BulkString(value))) =
                (field_iter.next(), field_iter.next())
            {
                if name == PAYLOAD_FIELD.as_bytes() {
                    entries.push(StreamEntry {
                        id: id.clone(),
                        payload: value.clone(),
                    });
                }
            }
        }
        Ok(entries)
    }
}
