use crate::errors::ChronicleError;
use crate::session::{ConversationId, SessionId};
use crate::transcription::Segment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type VersionId = Uuid;

/// §4.G Conversation Controller end_reason / §3 EndReason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserStopped,
    WebsocketDisconnect,
    InactivityTimeout,
    MaxDuration,
    Unknown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::UserStopped => "user_stopped",
            EndReason::WebsocketDisconnect => "websocket_disconnect",
            EndReason::InactivityTimeout => "inactivity_timeout",
            EndReason::MaxDuration => "max_duration",
            EndReason::Unknown => "unknown",
        }
    }
}

/// §7 soft-delete reasons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    NoMeaningfulSpeech,
    AudioFileNotReady,
    ValidationFailed,
    /// `DELETE /conversations/{id}` (§6) — a principal deleted the
    /// conversation directly, rather than the controller discarding it.
    UserRequested,
}

impl DeletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionReason::NoMeaningfulSpeech => "no_meaningful_speech",
            DeletionReason::AudioFileNotReady => "audio_file_not_ready",
            DeletionReason::ValidationFailed => "validation_failed",
            DeletionReason::UserRequested => "user_requested",
        }
    }
}

/// §3 transcript_versions[] element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptVersion {
    pub version_id: VersionId,
    pub transcript: String,
    pub segments: Vec<Segment>,
    pub provider: String,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_time_seconds: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// §3 memory_versions[] element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryVersion {
    pub version_id: VersionId,
    pub memory_count: u32,
    pub transcript_version_id: VersionId,
    pub provider: String,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_time_seconds: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// §3 Conversation — the versioned document owned by the Conversation Store (§4.J).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: ConversationId,
    pub audio_uuid: SessionId,
    pub user_id: Uuid,
    pub client_id: String,
    pub audio_path: Option<String>,
    pub cropped_audio_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deletion_reason: Option<DeletionReason>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub detailed_summary: Option<String>,
    pub end_reason: Option<EndReason>,
    pub transcript_versions: Vec<TranscriptVersion>,
    pub memory_versions: Vec<MemoryVersion>,
    pub active_transcript_version: Option<VersionId>,
    pub active_memory_version: Option<VersionId>,
}

impl Conversation {
    pub fn new(conversation_id: ConversationId, audio_uuid: SessionId, user_id: Uuid, client_id: String) -> Self {
        Self {
            conversation_id,
            audio_uuid,
            user_id,
            client_id,
            audio_path: None,
            cropped_audio_path: None,
            created_at: Utc::now(),
            completed_at: None,
            deleted: false,
            deletion_reason: None,
            deleted_at: None,
            title: None,
            summary: None,
            detailed_summary: None,
            end_reason: None,
            transcript_versions: Vec::new(),
            memory_versions: Vec::new(),
            active_transcript_version: None,
            active_memory_version: None,
        }
    }

    // ---- Computed projections (§4.J) ----

    pub fn active_transcript(&self) -> Option<&TranscriptVersion> {
        let id = self.active_transcript_version?;
        self.transcript_versions.iter().find(|v| v.version_id == id)
    }

    pub fn active_memory(&self) -> Option<&MemoryVersion> {
        let id = self.active_memory_version?;
        self.memory_versions.iter().find(|v| v.version_id == id)
    }

    pub fn transcript(&self) -> String {
        self.active_transcript()
            .map(|v| v.transcript.clone())
            .unwrap_or_default()
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.active_transcript()
            .map(|v| v.segments.clone())
            .unwrap_or_default()
    }

    pub fn segment_count(&self) -> usize {
        self.active_transcript().map(|v| v.segments.len()).unwrap_or(0)
    }

    pub fn memory_count(&self) -> u32 {
        self.active_memory().map(|v| v.memory_count).unwrap_or(0)
    }

    pub fn has_memory(&self) -> bool {
        self.memory_count() > 0
    }

    pub fn transcript_version_count(&self) -> usize {
        self.transcript_versions.len()
    }

    pub fn memory_version_count(&self) -> usize {
        self.memory_versions.len()
    }

    /// Invariant 1/2 (§3): if an active pointer is set, it must name an
    /// existing version. Invariant 3: every memory version's
    /// transcript_version_id must name an existing (possibly inactive)
    /// transcript version.
    pub fn check_invariants(&self) -> Result<(), ChronicleError> {
        if let Some(id) = self.active_transcript_version {
            if !self.transcript_versions.iter().any(|v| v.version_id == id) {
                return Err(ChronicleError::InvariantViolation(format!(
                    "active_transcript_version {id} names no transcript version"
                )));
            }
        }
        if let Some(id) = self.active_memory_version {
            if !self.memory_versions.iter().any(|v| v.version_id == id) {
                return Err(ChronicleError::InvariantViolation(format!(
                    "active_memory_version {id} names no memory version"
                )));
            }
        }
        for mv in &self.memory_versions {
            if !self
                .transcript_versions
                .iter()
                .any(|tv| tv.version_id == mv.transcript_version_id)
            {
                return Err(ChronicleError::InvariantViolation(format!(
                    "memory version {} names unknown transcript version {}",
                    mv.version_id, mv.transcript_version_id
                )));
            }
        }
        if self.deleted && self.deletion_reason.is_none() {
            return Err(ChronicleError::InvariantViolation(
                "deleted conversation missing deletion_reason".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_conversation() -> Conversation {
        Conversation::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "client-1".to_string())
    }

    fn transcript_version() -> TranscriptVersion {
        TranscriptVersion {
            version_id: Uuid::new_v4(),
            transcript: "hello world".to_string(),
            segments: vec![],
            provider: "mock".to_string(),
            model: None,
            created_at: Utc::now(),
            processing_time_seconds: Some(1.2),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn fresh_conversation_has_no_active_versions() {
        let conv = base_conversation();
        assert!(conv.active_transcript().is_none());
        assert_eq!(conv.transcript(), "");
        assert!(conv.check_invariants().is_ok());
    }

    #[test]
    fn add_transcript_version_round_trips_through_transcript_projection() {
        let mut conv = base_conversation();
        let v = transcript_version();
        conv.active_transcript_version = Some(v.version_id);
        conv.transcript_versions.push(v.clone());
        assert!(conv.check_invariants().is_ok());
        assert_eq!(conv.transcript(), v.transcript);
    }

    #[test]
    fn dangling_active_transcript_pointer_violates_invariant() {
        let mut conv = base_conversation();
        conv.active_transcript_version = Some(Uuid::new_v4());
        assert!(conv.check_invariants().is_err());
    }

    #[test]
    fn memory_version_must_reference_known_transcript_version() {
        let mut conv = base_conversation();
        let tv = transcript_version();
        conv.transcript_versions.push(tv.clone());
        conv.memory_versions.push(MemoryVersion {
            version_id: Uuid::new_v4(),
            memory_count: 3,
            transcript_version_id: Uuid::new_v4(),
            provider: "mock".to_string(),
            model: None,
            created_at: Utc::now(),
            processing_time_seconds: None,
            metadata: HashMap::new(),
        });
        assert!(conv.check_invariants().is_err());

        conv.memory_versions[0].transcript_version_id = tv.version_id;
        assert!(conv.check_invariants().is_ok());
    }

    #[test]
    fn deleted_without_reason_violates_invariant() {
        let mut conv = base_conversation();
        conv.deleted = true;
        assert!(conv.check_invariants().is_err());
        conv.deletion_reason = Some(DeletionReason::NoMeaningfulSpeech);
        assert!(conv.check_invariants().is_ok());
    }
}
