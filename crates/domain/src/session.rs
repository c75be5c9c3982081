use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for the lifetime of one duplex audio connection.
pub type SessionId = Uuid;

/// Opaque identifier for a bounded stretch of meaningful speech.
pub type ConversationId = Uuid;

/// §3 Session.status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Finalizing,
    Complete,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Finalizing => "finalizing",
            SessionStatus::Complete => "complete",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = crate::errors::ChronicleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "finalizing" => Ok(SessionStatus::Finalizing),
            "complete" => Ok(SessionStatus::Complete),
            other => Err(crate::errors::ChronicleError::InvariantViolation(format!(
                "unknown session status: {other}"
            ))),
        }
    }
}

/// §3 Session.completion_reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    UserStopped,
    WebsocketDisconnect,
    InactivityTimeout,
    MaxDuration,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::UserStopped => "user_stopped",
            CompletionReason::WebsocketDisconnect => "websocket_disconnect",
            CompletionReason::InactivityTimeout => "inactivity_timeout",
            CompletionReason::MaxDuration => "max_duration",
        }
    }
}

impl std::str::FromStr for CompletionReason {
    type Err = crate::errors::ChronicleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_stopped" => Ok(CompletionReason::UserStopped),
            "websocket_disconnect" => Ok(CompletionReason::WebsocketDisconnect),
            "inactivity_timeout" => Ok(CompletionReason::InactivityTimeout),
            "max_duration" => Ok(CompletionReason::MaxDuration),
            other => Err(crate::errors::ChronicleError::InvariantViolation(format!(
                "unknown completion reason: {other}"
            ))),
        }
    }
}

/// §3 Session — identified by `session_id`, owned by the connection handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub client_id: String,
    pub user_id: Uuid,
    pub status: SessionStatus,
    pub completion_reason: Option<CompletionReason>,
    pub current_conversation_id: Option<ConversationId>,
    pub conversation_count: u32,
}

impl Session {
    pub fn new(session_id: SessionId, client_id: String, user_id: Uuid) -> Self {
        Self {
            session_id,
            client_id,
            user_id,
            status: SessionStatus::Active,
            completion_reason: None,
            current_conversation_id: None,
            conversation_count: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// §3 AudioChunk — raw PCM bytes with an implicit ordinal in the session
/// byte stream. Append-only.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub width: u8,
    pub channels: u8,
    pub payload: bytes::Bytes,
    pub ordinal: u64,
}

/// Wire envelope for one entry on `audio.bytes[session_id]` (§4.A). Separate
/// from `AudioChunk` because `bytes::Bytes` isn't serde-friendly without
/// pulling in the `serde` feature on `bytes`, and the ordinal is implicit in
/// stream position rather than carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunkEnvelope {
    pub sample_rate: u32,
    pub width: u8,
    pub channels: u8,
    pub payload: Vec<u8>,
}

impl AudioChunkEnvelope {
    pub fn into_chunk(self, ordinal: u64) -> AudioChunk {
        AudioChunk {
            sample_rate: self.sample_rate,
            width: self.width,
            channels: self.channels,
            payload: bytes::Bytes::from(self.payload),
            ordinal,
        }
    }
}

/// §6 audio-start — format advertised at the top of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    Streaming,
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormat {
    pub rate: u32,
    pub width: u8,
    pub channels: u8,
    pub mode: AudioMode,
}

impl AudioFormat {
    /// §4.C: streaming audio is specified as mono PCM at an agreed sample rate.
    pub fn is_canonical_streaming_format(&self) -> bool {
        self.channels == 1 && self.width == 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn session_starts_active_with_no_conversation() {
        let session = Session::new(Uuid::new_v4(), "client-1".to_string(), Uuid::new_v4());
        assert!(session.is_active());
        assert!(session.current_conversation_id.is_none());
        assert_eq!(session.conversation_count, 0);
    }

    #[test]
    fn session_status_round_trips_through_str() {
        for status in [SessionStatus::Active, SessionStatus::Finalizing, SessionStatus::Complete] {
            assert_eq!(SessionStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(SessionStatus::from_str("bogus").is_err());
    }

    #[test]
    fn completion_reason_round_trips_through_str() {
        for reason in [
            CompletionReason::UserStopped,
            CompletionReason::WebsocketDisconnect,
            CompletionReason::InactivityTimeout,
            CompletionReason::MaxDuration,
        ] {
            assert_eq!(CompletionReason::from_str(reason.as_str()).unwrap(), reason);
        }
    }

    #[test]
    fn canonical_streaming_format_requires_mono_16bit() {
        let mono16 = AudioFormat { rate: 16000, width: 2, channels: 1, mode: AudioMode::Streaming };
        assert!(mono16.is_canonical_streaming_format());

        let stereo16 = AudioFormat { rate: 16000, width: 2, channels: 2, mode: AudioMode::Streaming };
        assert!(!stereo16.is_canonical_streaming_format());
    }
}
