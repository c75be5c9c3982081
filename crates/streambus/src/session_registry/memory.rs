use async_trait::async_trait;
use domain::{CompletionReason, ConversationId, Session, SessionId, SessionStatus};
use std::collections::HashMap;
use std::sync::Mutex;

use super::ports::{SessionRegistry, SessionRegistryError};

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<SessionId, Session>,
    current_conversation: HashMap<SessionId, ConversationId>,
    audio_files: HashMap<ConversationId, String>,
    conversation_counts: HashMap<SessionId, u32>,
}

/// In-memory `SessionRegistry` used by tests in place of Redis.
#[derive(Default)]
pub struct MemorySessionRegistry {
    state: Mutex<MemoryState>,
}

impl MemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRegistry for MemorySessionRegistry {
    async fn create(&self, session: Session) -> Result<(), SessionRegistryError> {
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(session.session_id, session);
        Ok(())
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<Session>, SessionRegistryError> {
        Ok(self.state.lock().unwrap().sessions.get(&session_id).cloned())
    }

    async fn finalize(
        &self,
        session_id: SessionId,
        reason: CompletionReason,
    ) -> Result<bool, SessionRegistryError> {
        let mut state = self.state.lock().unwrap();
        let Some(session) = state.sessions.get_mut(&session_id) else {
            return Err(SessionRegistryError::NotFound(session_id));
        };
        if session.status != SessionStatus::Active {
            return Ok(false);
        }
        session.status = SessionStatus::Finalizing;
        session.completion_reason = Some(reason);
        Ok(true)
    }

    async fn complete(&self, session_id: SessionId) -> Result<(), SessionRegistryError> {
        let mut state = self.state.lock().unwrap();
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionRegistryError::NotFound(session_id))?;
        session.status = SessionStatus::Complete;
        Ok(())
    }

    async fn expire_after(&self, _session_id: SessionId, _ttl_secs: u64) -> Result<(), SessionRegistryError> {
        // No-op: the in-memory registry is process-scoped and dies with the test.
        Ok(())
    }

    async fn set_current_conversation(
        &self,
        session_id: SessionId,
        conversation_id: ConversationId,
    ) -> Result<(), SessionRegistryError> {
        let mut state = self.state.lock().unwrap();
        state.current_conversation.insert(session_id, conversation_id);
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.current_conversation_id = Some(conversation_id);
        }
        Ok(())
    }

    async fn clear_current_conversation(&self, session_id: SessionId) -> Result<(), SessionRegistryError> {
        let mut state = self.state.lock().unwrap();
        state.current_conversation.remove(&session_id);
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.current_conversation_id = None;
        }
        Ok(())
    }

    async fn current_conversation(
        &self,
        session_id: SessionId,
    ) -> Result<Option<ConversationId>, SessionRegistryError> {
        Ok(self.state.lock().unwrap().current_conversation.get(&session_id).copied())
    }

    async fn set_audio_file(&self, conversation_id: ConversationId, path: String) -> Result<(), SessionRegistryError> {
        self.state.lock().unwrap().audio_files.insert(conversation_id, path);
        Ok(())
    }

    async fn audio_file(&self, conversation_id: ConversationId) -> Result<Option<String>, SessionRegistryError> {
        Ok(self.state.lock().unwrap().audio_files.get(&conversation_id).cloned())
    }

    async fn increment_conversation_count(&self, session_id: SessionId) -> Result<u32, SessionRegistryError> {
        let mut state = self.state.lock().unwrap();
        let count = state.conversation_counts.entry(session_id).or_insert(0);
        *count += 1;
        let new_count = *count;
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.conversation_count = new_count;
        }
        Ok(new_count)
    }

    async fn conversation_count(&self, session_id: SessionId) -> Result<u32, SessionRegistryError> {
        Ok(self.state.lock().unwrap().conversation_counts.get(&session_id).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn new_session() -> Session {
        Session::new(Uuid::new_v4(), "client-1".to_string(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn finalize_is_cas_active_to_finalizing_only_once() {
        let registry = MemorySessionRegistry::new();
        let session = new_session();
        let id = session.session_id;
        registry.create(session).await.unwrap();

        assert!(registry.finalize(id, CompletionReason::UserStopped).await.unwrap());
        // Second finalize (racing websocket disconnect) must not override.
        assert!(!registry
            .finalize(id, CompletionReason::WebsocketDisconnect)
            .await
            .unwrap());

        let stored = registry.get(id).await.unwrap().unwrap();
        assert_eq!(stored.completion_reason, Some(CompletionReason::UserStopped));
    }

    #[tokio::test]
    async fn current_conversation_signal_round_trips() {
        let registry = MemorySessionRegistry::new();
        let session = new_session();
        let session_id = session.session_id;
        registry.create(session).await.unwrap();

        let conversation_id = Uuid::new_v4();
        registry.set_current_conversation(session_id, conversation_id).await.unwrap();
        assert_eq!(
            registry.current_conversation(session_id).await.unwrap(),
            Some(conversation_id)
        );

        registry.clear_current_conversation(session_id).await.unwrap();
        assert_eq!(registry.current_conversation(session_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn conversation_count_increments_monotonically() {
        let registry = MemorySessionRegistry::new();
        let session = new_session();
        let session_id = session.session_id;
        registry.create(session).await.unwrap();

        assert_eq!(registry.increment_conversation_count(session_id).await.unwrap(), 1);
        assert_eq!(registry.increment_conversation_count(session_id).await.unwrap(), 2);
        assert_eq!(registry.conversation_count(session_id).await.unwrap(), 2);
    }
}
