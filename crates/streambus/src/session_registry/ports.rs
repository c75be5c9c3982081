use async_trait::async_trait;
use domain::{CompletionReason, ConversationId, Session, SessionId, SessionStatus};

#[derive(Debug, thiserror::Error, Clone)]
pub enum SessionRegistryError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("invalid status transition: {0} -> {1}")]
    InvalidTransition(String, String),
}

/// Audio Session Registry (§4.B): a keyed map `session_id -> session state`
/// plus the signaling keys components use to hand off work to each other.
/// All mutations are single-writer in practice but reads are concurrent;
/// status transitions are compare-and-set (`active -> finalizing` only once).
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn create(&self, session: Session) -> Result<(), SessionRegistryError>;

    async fn get(&self, session_id: SessionId) -> Result<Option<Session>, SessionRegistryError>;

    /// Atomically transition `active -> finalizing`, recording
    /// `completion_reason`. A no-op (returns `Ok(false)`) if the session is
    /// not currently `active` — callers must not stack completion reasons.
    async fn finalize(
        &self,
        session_id: SessionId,
        reason: CompletionReason,
    ) -> Result<bool, SessionRegistryError>;

    async fn complete(&self, session_id: SessionId) -> Result<(), SessionRegistryError>;

    /// TTL the session record after it reaches `complete` (§3).
    async fn expire_after(&self, session_id: SessionId, ttl_secs: u64) -> Result<(), SessionRegistryError>;

    // ---- Signaling keys (§4.B) ----

    /// `conversation.current[session_id] = conversation_id` — set by G when
    /// a conversation opens.
    async fn set_current_conversation(
        &self,
        session_id: SessionId,
        conversation_id: ConversationId,
    ) -> Result<(), SessionRegistryError>;

    /// Deleted by G on conversation close.
    async fn clear_current_conversation(&self, session_id: SessionId) -> Result<(), SessionRegistryError>;

    async fn current_conversation(
        &self,
        session_id: SessionId,
    ) -> Result<Option<ConversationId>, SessionRegistryError>;

    /// `audio.file[conversation_id] = path` — set by C when it finishes
    /// writing a conversation's audio.
    async fn set_audio_file(&self, conversation_id: ConversationId, path: String) -> Result<(), SessionRegistryError>;

    async fn audio_file(&self, conversation_id: ConversationId) -> Result<Option<String>, SessionRegistryError>;

    /// `session.conversation_count[session_id]` — monotonically incremented
    /// by G; returns the post-increment count. Carries a TTL (§11.3).
    async fn increment_conversation_count(&self, session_id: SessionId) -> Result<u32, SessionRegistryError>;

    async fn conversation_count(&self, session_id: SessionId) -> Result<u32, SessionRegistryError>;
}
