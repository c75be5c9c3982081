//! Request/response DTOs for the HTTP surface (§6). Kept separate from
//! `domain`'s types — conversions happen explicitly in each route handler
//! rather than serializing domain structs directly.

use chrono::{DateTime, Utc};
use domain::{Conversation, DeletionReason, EndReason, JobId, MemoryVersion, TranscriptVersion};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: error_type.into(),
            },
        }
    }
}

/// §3 Conversation, trimmed to the fields a list view needs.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: Uuid,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub end_reason: Option<String>,
    pub has_memory: bool,
}

impl From<&Conversation> for ConversationSummary {
    fn from(c: &Conversation) -> Self {
        Self {
            conversation_id: c.conversation_id,
            client_id: c.client_id.clone(),
            created_at: c.created_at,
            completed_at: c.completed_at,
            title: c.title.clone(),
            summary: c.summary.clone(),
            end_reason: c.end_reason.map(|r| r.as_str().to_string()),
            has_memory: c.has_memory(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Full detail view: the active transcript's text and segments plus the
/// version-pointer bookkeeping, but never the on-disk audio paths — those
/// are an implementation detail resolved internally by `GET /audio/get_audio`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub conversation_id: Uuid,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub detailed_summary: Option<String>,
    pub end_reason: Option<String>,
    pub transcript: String,
    pub segments: Vec<domain::Segment>,
    pub memory_count: u32,
    pub active_transcript_version: Option<Uuid>,
    pub active_memory_version: Option<Uuid>,
    pub transcript_version_count: usize,
    pub memory_version_count: usize,
}

impl From<&Conversation> for ConversationDetail {
    fn from(c: &Conversation) -> Self {
        Self {
            conversation_id: c.conversation_id,
            client_id: c.client_id.clone(),
            created_at: c.created_at,
            completed_at: c.completed_at,
            title: c.title.clone(),
            summary: c.summary.clone(),
            detailed_summary: c.detailed_summary.clone(),
            end_reason: c.end_reason.map(|r| r.as_str().to_string()),
            transcript: c.transcript(),
            segments: c.segments(),
            memory_count: c.memory_count(),
            active_transcript_version: c.active_transcript_version,
            active_memory_version: c.active_memory_version,
            transcript_version_count: c.transcript_version_count(),
            memory_version_count: c.memory_version_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptVersionSummary {
    pub version_id: Uuid,
    pub provider: String,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_time_seconds: Option<f64>,
    pub active: bool,
}

impl TranscriptVersionSummary {
    fn from_version(v: &TranscriptVersion, active_id: Option<Uuid>) -> Self {
        Self {
            version_id: v.version_id,
            provider: v.provider.clone(),
            model: v.model.clone(),
            created_at: v.created_at,
            processing_time_seconds: v.processing_time_seconds,
            active: Some(v.version_id) == active_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryVersionSummary {
    pub version_id: Uuid,
    pub memory_count: u32,
    pub transcript_version_id: Uuid,
    pub provider: String,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_time_seconds: Option<f64>,
    pub active: bool,
}

impl MemoryVersionSummary {
    fn from_version(v: &MemoryVersion, active_id: Option<Uuid>) -> Self {
        Self {
            version_id: v.version_id,
            memory_count: v.memory_count,
            transcript_version_id: v.transcript_version_id,
            provider: v.provider.clone(),
            model: v.model.clone(),
            created_at: v.created_at,
            processing_time_seconds: v.processing_time_seconds,
            active: Some(v.version_id) == active_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionsResponse {
    pub transcript_versions: Vec<TranscriptVersionSummary>,
    pub memory_versions: Vec<MemoryVersionSummary>,
}

impl From<&Conversation> for VersionsResponse {
    fn from(c: &Conversation) -> Self {
        Self {
            transcript_versions: c
                .transcript_versions
                .iter()
                .map(|v| TranscriptVersionSummary::from_version(v, c.active_transcript_version))
                .collect(),
            memory_versions: c
                .memory_versions
                .iter()
                .map(|v| MemoryVersionSummary::from_version(v, c.active_memory_version))
                .collect(),
        }
    }
}

/// Response to both `POST /conversations/{id}/reprocess/transcript` and
/// `.../memory` (§7): the job(s) enqueued. Fields are `None` when the
/// corresponding job wasn't part of that reprocess kind.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ReprocessResponse {
    pub transcript_job_id: Option<JobId>,
    pub speaker_job_id: Option<JobId>,
    pub crop_job_id: Option<JobId>,
    pub memory_job_id: Option<JobId>,
    pub title_job_id: Option<JobId>,
}

/// One entry of `POST /audio/upload`'s per-file response array (§6).
#[derive(Debug, Clone, Serialize)]
pub struct UploadedConversation {
    pub conversation_id: Uuid,
    pub transcript_job_id: JobId,
    pub speaker_job_id: JobId,
    pub memory_job_id: Option<JobId>,
    pub duration_seconds: f64,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GetAudioQuery {
    #[serde(default)]
    pub cropped: bool,
}

pub fn deletion_reason_label(reason: &DeletionReason) -> &'static str {
    reason.as_str()
}

pub fn end_reason_label(reason: &EndReason) -> &'static str {
    reason.as_str()
}
