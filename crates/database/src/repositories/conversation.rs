use super::errors::RepositoryError;
use super::utils::map_db_error;
use crate::pool::DbPool;
use async_trait::async_trait;
use domain::{Conversation, ConversationId, DeletionReason, EndReason, MemoryVersion, SessionId, TranscriptVersion, VersionId};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// Conversation Store port (§4.J). `PgConversationRepository` is the
/// production adapter; `InMemoryConversationRepository` stands in for it in
/// service-layer unit tests the way `streambus`'s in-memory adapters stand
/// in for Redis.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn insert(&self, conversation: &Conversation) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError>;
    async fn find_by_audio_uuid(&self, audio_uuid: SessionId) -> Result<Option<Conversation>, RepositoryError>;
    async fn list_by_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Conversation>, RepositoryError>;
    async fn count_by_user(&self, user_id: Uuid) -> Result<i64, RepositoryError>;

    /// Appends a transcript version and returns the updated conversation.
    /// Rejects the write if the conversation has been soft-deleted.
    async fn add_transcript_version(
        &self,
        id: ConversationId,
        version: TranscriptVersion,
        activate: bool,
    ) -> Result<Conversation, RepositoryError>;

    async fn add_memory_version(
        &self,
        id: ConversationId,
        version: MemoryVersion,
        activate: bool,
    ) -> Result<Conversation, RepositoryError>;

    async fn set_active_transcript_version(
        &self,
        id: ConversationId,
        version_id: VersionId,
    ) -> Result<Conversation, RepositoryError>;

    async fn set_active_memory_version(
        &self,
        id: ConversationId,
        version_id: VersionId,
    ) -> Result<Conversation, RepositoryError>;

    async fn mark_completed(&self, id: ConversationId, end_reason: EndReason) -> Result<(), RepositoryError>;

    /// §4.I `U`: writes title/short-summary/detailed-summary in one call —
    /// the three LLM calls that produce them run in parallel, but the
    /// write lands as a single update so a reader never observes one field
    /// set without the others.
    async fn set_title_summary(
        &self,
        id: ConversationId,
        title: Option<String>,
        summary: Option<String>,
        detailed_summary: Option<String>,
    ) -> Result<(), RepositoryError>;

    async fn set_audio_paths(
        &self,
        id: ConversationId,
        audio_path: Option<String>,
        cropped_audio_path: Option<String>,
    ) -> Result<(), RepositoryError>;

    async fn soft_delete(&self, id: ConversationId, reason: DeletionReason) -> Result<(), RepositoryError>;
}

pub struct PgConversationRepository {
    pool: DbPool,
}

impl PgConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_conversation(row: &tokio_postgres::Row) -> Result<Conversation, RepositoryError> {
        let deletion_reason: Option<String> = row.try_get("deletion_reason").map_err(|e| RepositoryError::DatabaseError(e.into()))?;
        let end_reason: Option<String> = row.try_get("end_reason").map_err(|e| RepositoryError::DatabaseError(e.into()))?;
        let transcript_versions: serde_json::Value =
            row.try_get("transcript_versions").map_err(|e| RepositoryError::DatabaseError(e.into()))?;
        let memory_versions: serde_json::Value =
            row.try_get("memory_versions").map_err(|e| RepositoryError::DatabaseError(e.into()))?;

        Ok(Conversation {
            conversation_id: row.try_get("conversation_id").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            audio_uuid: row.try_get("audio_uuid").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            user_id: row.try_get("user_id").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            client_id: row.try_get("client_id").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            audio_path: row.try_get("audio_path").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            cropped_audio_path: row.try_get("cropped_audio_path").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            created_at: row.try_get("created_at").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            completed_at: row.try_get("completed_at").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            deleted: row.try_get("deleted").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            deletion_reason: deletion_reason
                .map(|r| match r.as_str() {
                    "no_meaningful_speech" => Ok(DeletionReason::NoMeaningfulSpeech),
                    "audio_file_not_ready" => Ok(DeletionReason::AudioFileNotReady),
                    "validation_failed" => Ok(DeletionReason::ValidationFailed),
                    "user_requested" => Ok(DeletionReason::UserRequested),
                    other => Err(RepositoryError::DatabaseError(anyhow::anyhow!(
                        "unknown deletion_reason {other}"
                    ))),
                })
                .transpose()?,
            deleted_at: row.try_get("deleted_at").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            title: row.try_get("title").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            summary: row.try_get("summary").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            detailed_summary: row.try_get("detailed_summary").map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            end_reason: end_reason
                .map(|r| {
                    EndReason::from_str(&r).map_err(|_| RepositoryError::DatabaseError(anyhow::anyhow!("unknown end_reason {r}")))
                })
                .transpose()?,
            transcript_versions: serde_json::from_value(transcript_versions)
                .map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            memory_versions: serde_json::from_value(memory_versions).map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            active_transcript_version: row
                .try_get("active_transcript_version")
                .map_err(|e| RepositoryError::DatabaseError(e.into()))?,
            active_memory_version: row
                .try_get("active_memory_version")
                .map_err(|e| RepositoryError::DatabaseError(e.into()))?,
        })
    }
}

impl FromStr for EndReason {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "user_stopped" => EndReason::UserStopped,
            "websocket_disconnect" => EndReason::WebsocketDisconnect,
            "inactivity_timeout" => EndReason::InactivityTimeout,
            "max_duration" => EndReason::MaxDuration,
            _ => EndReason::Unknown,
        })
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn insert(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let transcript_versions = serde_json::to_value(&conversation.transcript_versions).map_err(|e| RepositoryError::DatabaseError(e.into()))?;
        let memory_versions = serde_json::to_value(&conversation.memory_versions).map_err(|e| RepositoryError::DatabaseError(e.into()))?;

        client
            .execute(
                r#"
                INSERT INTO conversations (
                    conversation_id, audio_uuid, user_id, client_id, created_at,
                    transcript_versions, memory_versions
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
                &[
                    &conversation.conversation_id,
                    &conversation.audio_uuid,
                    &conversation.user_id,
                    &conversation.client_id,
                    &conversation.created_at,
                    &transcript_versions,
                    &memory_versions,
                ],
            )
            .await
            .map_err(map_db_error)?;

        debug!(conversation_id = %conversation.conversation_id, "inserted conversation");
        Ok(())
    }

    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM conversations WHERE conversation_id = $1", &[&id])
            .await
            .map_err(map_db_error)?;
        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn find_by_audio_uuid(&self, audio_uuid: SessionId) -> Result<Option<Conversation>, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM conversations WHERE audio_uuid = $1", &[&audio_uuid])
            .await
            .map_err(map_db_error)?;
        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn list_by_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Conversation>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT * FROM conversations
                WHERE user_id = $1 AND NOT deleted
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
                &[&user_id, &limit, &offset],
            )
            .await
            .map_err(map_db_error)?;
        rows.iter().map(Self::row_to_conversation).collect()
    }

    async fn count_by_user(&self, user_id: Uuid) -> Result<i64, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM conversations WHERE user_id = $1 AND NOT deleted",
                &[&user_id],
            )
            .await
            .map_err(map_db_error)?;
        Ok(row.get(0))
    }

    async fn add_transcript_version(
        &self,
        id: ConversationId,
        version: TranscriptVersion,
        activate: bool,
    ) -> Result<Conversation, RepositoryError> {
        let mut conversation = self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)?;
        if conversation.deleted {
            return Err(RepositoryError::ConversationDeleted);
        }
        conversation.transcript_versions.push(version.clone());
        if activate {
            conversation.active_transcript_version = Some(version.version_id);
        }
        self.persist_versions(&conversation).await?;
        Ok(conversation)
    }

    async fn add_memory_version(
        &self,
        id: ConversationId,
        version: MemoryVersion,
        activate: bool,
    ) -> Result<Conversation, RepositoryError> {
        let mut conversation = self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)?;
        if conversation.deleted {
            return Err(RepositoryError::ConversationDeleted);
        }
        conversation.memory_versions.push(version.clone());
        if activate {
            conversation.active_memory_version = Some(version.version_id);
        }
        self.persist_versions(&conversation).await?;
        Ok(conversation)
    }

    async fn set_active_transcript_version(
        &self,
        id: ConversationId,
        version_id: VersionId,
    ) -> Result<Conversation, RepositoryError> {
        let mut conversation = self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)?;
        if conversation.deleted {
            return Err(RepositoryError::ConversationDeleted);
        }
        if !conversation.transcript_versions.iter().any(|v| v.version_id == version_id) {
            return Err(RepositoryError::ValidationFailed(format!(
                "transcript version {version_id} does not exist on conversation {id}"
            )));
        }
        conversation.active_transcript_version = Some(version_id);
        self.persist_versions(&conversation).await?;
        Ok(conversation)
    }

    async fn set_active_memory_version(
        &self,
        id: ConversationId,
        version_id: VersionId,
    ) -> Result<Conversation, RepositoryError> {
        let mut conversation = self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)?;
        if conversation.deleted {
            return Err(RepositoryError::ConversationDeleted);
        }
        if !conversation.memory_versions.iter().any(|v| v.version_id == version_id) {
            return Err(RepositoryError::ValidationFailed(format!(
                "memory version {version_id} does not exist on conversation {id}"
            )));
        }
        conversation.active_memory_version = Some(version_id);
        self.persist_versions(&conversation).await?;
        Ok(conversation)
    }

    async fn mark_completed(&self, id: ConversationId, end_reason: EndReason) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let now = chrono::Utc::now();
        client
            .execute(
                "UPDATE conversations SET completed_at = $2, end_reason = $3 WHERE conversation_id = $1",
                &[&id, &now, &end_reason.as_str()],
            )
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn set_title_summary(
        &self,
        id: ConversationId,
        title: Option<String>,
        summary: Option<String>,
        detailed_summary: Option<String>,
    ) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE conversations SET title = $2, summary = $3, detailed_summary = $4 WHERE conversation_id = $1",
                &[&id, &title, &summary, &detailed_summary],
            )
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn set_audio_paths(
        &self,
        id: ConversationId,
        audio_path: Option<String>,
        cropped_audio_path: Option<String>,
    ) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE conversations SET audio_path = $2, cropped_audio_path = $3 WHERE conversation_id = $1",
                &[&id, &audio_path, &cropped_audio_path],
            )
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn soft_delete(&self, id: ConversationId, reason: DeletionReason) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let now = chrono::Utc::now();
        let affected = client
            .execute(
                r#"
                UPDATE conversations
                SET deleted = TRUE, deletion_reason = $2, deleted_at = $3
                WHERE conversation_id = $1 AND NOT deleted
                "#,
                &[&id, &reason.as_str(), &now],
            )
            .await
            .map_err(map_db_error)?;
        if affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        debug!(conversation_id = %id, reason = reason.as_str(), "soft-deleted conversation");
        Ok(())
    }
}

impl PgConversationRepository {
    async fn persist_versions(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let transcript_versions =
            serde_json::to_value(&conversation.transcript_versions).map_err(|e| RepositoryError::DatabaseError(e.into()))?;
        let memory_versions =
            serde_json::to_value(&conversation.memory_versions).map_err(|e| RepositoryError::DatabaseError(e.into()))?;

        client
            .execute(
                r#"
                UPDATE conversations
                SET transcript_versions = $2,
                    memory_versions = $3,
                    active_transcript_version = $4,
                    active_memory_version = $5
                WHERE conversation_id = $1
                "#,
                &[
                    &conversation.conversation_id,
                    &transcript_versions,
                    &memory_versions,
                    &conversation.active_transcript_version,
                    &conversation.active_memory_version,
                ],
            )
            .await
            .map_err(map_db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_reason_parses_known_strings_and_defaults_unknown() {
        assert_eq!(EndReason::from_str("user_stopped"), Ok(EndReason::UserStopped));
        assert_eq!(EndReason::from_str("garbage"), Ok(EndReason::Unknown));
    }
}
