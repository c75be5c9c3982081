use super::conversation::ConversationRepository;
use super::errors::RepositoryError;
use async_trait::async_trait;
use domain::{Conversation, ConversationId, DeletionReason, EndReason, MemoryVersion, SessionId, TranscriptVersion, VersionId};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory `ConversationRepository` used by service-layer tests in place
/// of Postgres.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: Mutex<HashMap<ConversationId, Conversation>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn insert(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut store = self.conversations.lock().unwrap();
        if store.contains_key(&conversation.conversation_id) {
            return Err(RepositoryError::AlreadyExists);
        }
        store.insert(conversation.conversation_id, conversation.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_audio_uuid(&self, audio_uuid: SessionId) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .values()
            .find(|c| c.audio_uuid == audio_uuid)
            .cloned())
    }

    async fn list_by_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Conversation>, RepositoryError> {
        let store = self.conversations.lock().unwrap();
        let mut matching: Vec<Conversation> = store
            .values()
            .filter(|c| c.user_id == user_id && !c.deleted)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_by_user(&self, user_id: Uuid) -> Result<i64, RepositoryError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.user_id == user_id && !c.deleted)
            .count() as i64)
    }

    async fn add_transcript_version(
        &self,
        id: ConversationId,
        version: TranscriptVersion,
        activate: bool,
    ) -> Result<Conversation, RepositoryError> {
        let mut store = self.conversations.lock().unwrap();
        let conversation = store.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if conversation.deleted {
            return Err(RepositoryError::ConversationDeleted);
        }
        conversation.transcript_versions.push(version.clone());
        if activate {
            conversation.active_transcript_version = Some(version.version_id);
        }
        Ok(conversation.clone())
    }

    async fn add_memory_version(
        &self,
        id: ConversationId,
        version: MemoryVersion,
        activate: bool,
    ) -> Result<Conversation, RepositoryError> {
        let mut store = self.conversations.lock().unwrap();
        let conversation = store.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if conversation.deleted {
            return Err(RepositoryError::ConversationDeleted);
        }
        conversation.memory_versions.push(version.clone());
        if activate {
            conversation.active_memory_version = Some(version.version_id);
        }
        Ok(conversation.clone())
    }

    async fn set_active_transcript_version(
        &self,
        id: ConversationId,
        version_id: VersionId,
    ) -> Result<Conversation, RepositoryError> {
        let mut store = self.conversations.lock().unwrap();
        let conversation = store.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if conversation.deleted {
            return Err(RepositoryError::ConversationDeleted);
        }
        if !conversation.transcript_versions.iter().any(|v| v.version_id == version_id) {
            return Err(RepositoryError::ValidationFailed(format!(
                "transcript version {version_id} does not exist on conversation {id}"
            )));
        }
        conversation.active_transcript_version = Some(version_id);
        Ok(conversation.clone())
    }

    async fn set_active_memory_version(
        &self,
        id: ConversationId,
        version_id: VersionId,
    ) -> Result<Conversation, RepositoryError> {
        let mut store = self.conversations.lock().unwrap();
        let conversation = store.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if conversation.deleted {
            return Err(RepositoryError::ConversationDeleted);
        }
        if !conversation.memory_versions.iter().any(|v| v.version_id == version_id) {
            return Err(RepositoryError::ValidationFailed(format!(
                "memory version {version_id} does not exist on conversation {id}"
            )));
        }
        conversation.active_memory_version = Some(version_id);
        Ok(conversation.clone())
    }

    async fn mark_completed(&self, id: ConversationId, end_reason: EndReason) -> Result<(), RepositoryError> {
        let mut store = self.conversations.lock().unwrap();
        let conversation = store.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        conversation.completed_at = Some(chrono::Utc::now());
        conversation.end_reason = Some(end_reason);
        Ok(())
    }

    async fn set_title_summary(
        &self,
        id: ConversationId,
        title: Option<String>,
        summary: Option<String>,
        detailed_summary: Option<String>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.conversations.lock().unwrap();
        let conversation = store.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        conversation.title = title;
        conversation.summary = summary;
        conversation.detailed_summary = detailed_summary;
        Ok(())
    }

    async fn set_audio_paths(
        &self,
        id: ConversationId,
        audio_path: Option<String>,
        cropped_audio_path: Option<String>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.conversations.lock().unwrap();
        let conversation = store.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        conversation.audio_path = audio_path;
        conversation.cropped_audio_path = cropped_audio_path;
        Ok(())
    }

    async fn soft_delete(&self, id: ConversationId, reason: DeletionReason) -> Result<(), RepositoryError> {
        let mut store = self.conversations.lock().unwrap();
        let conversation = store.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if conversation.deleted {
            return Err(RepositoryError::NotFound);
        }
        conversation.deleted = true;
        conversation.deletion_reason = Some(reason);
        conversation.deleted_at = Some(chrono::Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_conversation() -> Conversation {
        Conversation::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "client-1".to_string())
    }

    #[tokio::test]
    async fn deleted_conversation_rejects_further_writes() {
        let repo = InMemoryConversationRepository::new();
        let conversation = new_conversation();
        let id = conversation.conversation_id;
        repo.insert(&conversation).await.unwrap();
        repo.soft_delete(id, DeletionReason::NoMeaningfulSpeech).await.unwrap();

        let version = TranscriptVersion {
            version_id: Uuid::new_v4(),
            transcript: "late arrival".to_string(),
            segments: vec![],
            provider: "mock".to_string(),
            model: None,
            created_at: chrono::Utc::now(),
            processing_time_seconds: None,
            metadata: Default::default(),
        };
        let result = repo.add_transcript_version(id, version, true).await;
        assert!(matches!(result, Err(RepositoryError::ConversationDeleted)));
    }

    #[tokio::test]
    async fn activating_unknown_version_fails_validation() {
        let repo = InMemoryConversationRepository::new();
        let conversation = new_conversation();
        let id = conversation.conversation_id;
        repo.insert(&conversation).await.unwrap();

        let result = repo.set_active_transcript_version(id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(RepositoryError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn list_by_user_excludes_deleted_and_orders_recent_first() {
        let repo = InMemoryConversationRepository::new();
        let user_id = Uuid::new_v4();
        let mut older = Conversation::new(Uuid::new_v4(), Uuid::new_v4(), user_id, "c".to_string());
        older.created_at = chrono::Utc::now() - chrono::Duration::hours(1);
        let newer = Conversation::new(Uuid::new_v4(), Uuid::new_v4(), user_id, "c".to_string());
        let mut deleted = Conversation::new(Uuid::new_v4(), Uuid::new_v4(), user_id, "c".to_string());
        deleted.deleted = true;
        deleted.deletion_reason = Some(DeletionReason::ValidationFailed);

        repo.insert(&older).await.unwrap();
        repo.insert(&newer).await.unwrap();
        repo.insert(&deleted).await.unwrap();

        let listed = repo.list_by_user(user_id, 10, 0).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].conversation_id, newer.conversation_id);
    }
}
