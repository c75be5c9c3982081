use async_trait::async_trait;
use domain::{CompletionReason, ConversationId, Session, SessionId, SessionStatus};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::str::FromStr;

use super::ports::{SessionRegistry, SessionRegistryError};

/// Conversation-count keys default to a 1-hour TTL after increment (§11.3).
const CONVERSATION_COUNT_TTL_SECS: u64 = 3600;

fn session_key(id: SessionId) -> String {
    format!("audio:session:{id}")
}

fn current_conversation_key(id: SessionId) -> String {
    format!("conversation:current:{id}")
}

fn audio_file_key(id: ConversationId) -> String {
    format!("audio:file:{id}")
}

fn conversation_count_key(id: SessionId) -> String {
    format!("session:conversation_count:{id}")
}

/// Redis-hash-backed adapter for the Audio Session Registry (§4.B).
#[derive(Clone)]
pub struct RedisSessionRegistry {
    conn: ConnectionManager,
}

impl RedisSessionRegistry {
    pub async fn connect(redis_url: &str) -> Result<Self, SessionRegistryError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionRegistry for RedisSessionRegistry {
    async fn create(&self, session: Session) -> Result<(), SessionRegistryError> {
        let mut conn = self.conn.clone();
        let key = session_key(session.session_id);
        let fields: Vec<(&str, String)> = vec![
            ("status", session.status.as_str().to_string()),
            ("completion_reason", String::new()),
            ("client_id", session.client_id),
            ("user_id", session.user_id.to_string()),
            ("current_conversation_id", String::new()),
            ("conversation_count", session.conversation_count.to_string()),
        ];
        conn.hset_multiple(&key, &fields)
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<Session>, SessionRegistryError> {
        let mut conn = self.conn.clone();
        let key = session_key(session_id);
        let map: std::collections::HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        if map.is_empty() {
            return Ok(None);
        }

        let status = SessionStatus::from_str(map.get("status").map(String::as_str).unwrap_or("active"))
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        let completion_reason = map
            .get("completion_reason")
            .filter(|v| !v.is_empty())
            .map(|v| CompletionReason::from_str(v))
            .transpose()
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        let current_conversation_id = map
            .get("current_conversation_id")
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok());
        let user_id = map
            .get("user_id")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| SessionRegistryError::Backend("missing user_id".to_string()))?;
        let conversation_count = map
            .get("conversation_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Ok(Some(Session {
            session_id,
            client_id: map.get("client_id").cloned().unwrap_or_default(),
            user_id,
            status,
            completion_reason,
            current_conversation_id,
            conversation_count,
        }))
    }

    async fn finalize(
        &self,
        session_id: SessionId,
        reason: CompletionReason,
    ) -> Result<bool, SessionRegistryError> {
        // CAS: only write if the current status is still "active". A Lua
        // script keeps the read-check-write atomic against concurrent
        // finalizers (user stop racing a websocket disconnect).
        let script = redis::Script::new(
            r#"
            local key = KEYS[1]
            local status = redis.call('HGET', key, 'status')
            if status == 'active' then
                redis.call('HSET', key, 'status', 'finalizing', 'completion_reason', ARGV[1])
                return 1
            else
                return 0
            end
            "#,
        );
        let mut conn = self.conn.clone();
        let key = session_key(session_id);
        let changed: i32 = script
            .key(&key)
            .arg(reason.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        Ok(changed == 1)
    }

    async fn complete(&self, session_id: SessionId) -> Result<(), SessionRegistryError> {
        let mut conn = self.conn.clone();
        let key = session_key(session_id);
        conn.hset(&key, "status", SessionStatus::Complete.as_str())
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))
    }

    async fn expire_after(&self, session_id: SessionId, ttl_secs: u64) -> Result<(), SessionRegistryError> {
        let mut conn = self.conn.clone();
        let key = session_key(session_id);
        conn.expire(&key, ttl_secs as i64)
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))
    }

    async fn set_current_conversation(
        &self,
        session_id: SessionId,
        conversation_id: ConversationId,
    ) -> Result<(), SessionRegistryError> {
        let mut conn = self.conn.clone();
        conn.set(current_conversation_key(session_id), conversation_id.to_string())
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))
    }

    async fn clear_current_conversation(&self, session_id: SessionId) -> Result<(), SessionRegistryError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .del(current_conversation_key(session_id))
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn current_conversation(
        &self,
        session_id: SessionId,
    ) -> Result<Option<ConversationId>, SessionRegistryError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(current_conversation_key(session_id))
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    async fn set_audio_file(&self, conversation_id: ConversationId, path: String) -> Result<(), SessionRegistryError> {
        let mut conn = self.conn.clone();
        conn.set(audio_file_key(conversation_id), path)
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))
    }

    async fn audio_file(&self, conversation_id: ConversationId) -> Result<Option<String>, SessionRegistryError> {
        let mut conn = self.conn.clone();
        conn.get(audio_file_key(conversation_id))
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))
    }

    async fn increment_conversation_count(&self, session_id: SessionId) -> Result<u32, SessionRegistryError> {
        let mut conn = self.conn.clone();
        let key = conversation_count_key(session_id);
        let count: i64 = conn
            .incr(&key, 1)
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        conn.expire::<_, ()>(&key, CONVERSATION_COUNT_TTL_SECS as i64)
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        Ok(count as u32)
    }

    async fn conversation_count(&self, session_id: SessionId) -> Result<u32, SessionRegistryError> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn
            .get(conversation_count_key(session_id))
            .await
            .map_err(|e| SessionRegistryError::Backend(e.to_string()))?;
        Ok(count.unwrap_or(0) as u32)
    }
}
