use thiserror::Error;

/// The five error kinds of §7, plus the zombie/cancellation kind
/// controllers use to exit promptly. Kept as one enum (rather than one type
/// per crate) because these propagate across the streambus/scheduler/
/// services/api boundary and callers need to match on kind, not on source.
#[derive(Debug, Error, Clone)]
pub enum ChronicleError {
    /// Bad audio format, unknown conversation, missing required fields.
    #[error("validation error: {0}")]
    Validation(String),

    /// The caller is not entitled to the resource. The core never leaks
    /// whether a resource exists when this is returned.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Transcription/memory/LLM provider unavailable or timed out.
    #[error("transient provider error: {0}")]
    TransientProvider(String),

    /// Stream backpressure, disk full, memory pressure.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// An invariant the data model guarantees was found violated.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A job discovered its own scheduler record is gone.
    #[error("zombie job: {0}")]
    Zombie(String),
}

impl ChronicleError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChronicleError::TransientProvider(_) | ChronicleError::ResourceExhaustion(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ChronicleError::TransientProvider("timeout".into()).is_retryable());
        assert!(ChronicleError::ResourceExhaustion("disk full".into()).is_retryable());
        assert!(!ChronicleError::Validation("bad format".into()).is_retryable());
        assert!(!ChronicleError::Authorization("forbidden".into()).is_retryable());
    }

    #[test]
    fn messages() {
        assert_eq!(
            ChronicleError::Zombie("job 1".into()).to_string(),
            "zombie job: job 1"
        );
    }
}
