//! Filesystem layout shared by the Audio Persistence Worker (§4.C) and the
//! cropping job (§4.I `X`): `CHUNK_DIR/<conversation_id>.wav` and
//! `CHUNK_DIR/<conversation_id>.cropped.wav` (§6 persisted state layout).

use domain::ConversationId;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Conversation ids are UUIDs already, so there is no path-traversal
/// surface — this still runs every path component through a whitelist
/// filter rather than trusting the id's `Display` form blindly, since a
/// sanitized filename is an explicit §4.C requirement.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

pub fn wav_path(chunk_dir: &str, conversation_id: ConversationId) -> PathBuf {
    Path::new(chunk_dir).join(format!("{}.wav", sanitize_component(&conversation_id.to_string())))
}

pub fn cropped_wav_path(chunk_dir: &str, conversation_id: ConversationId) -> PathBuf {
    Path::new(chunk_dir).join(format!("{}.cropped.wav", sanitize_component(&conversation_id.to_string())))
}

/// SHA-256 content hash of a file on disk, hex-encoded. The persistence
/// worker logs this when `audio.file[C]` is published; the §8 property it
/// backs is that the same hash still holds whenever a later post-processing
/// job reads the file.
pub fn content_hash(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn paths_are_scoped_under_chunk_dir() {
        let id = Uuid::new_v4();
        let path = wav_path("/data/audio", id);
        assert!(path.starts_with("/data/audio"));
        assert!(path.to_string_lossy().ends_with(".wav"));
        assert!(!path.to_string_lossy().ends_with(".cropped.wav"));
    }

    #[test]
    fn sanitize_strips_non_alphanumeric_except_hyphen() {
        assert_eq!(sanitize_component("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_component("abc-123"), "abc-123");
    }

    #[test]
    fn content_hash_is_deterministic_and_sensitive_to_content() {
        let dir = std::env::temp_dir().join(format!("chronicle-hash-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.wav");
        std::fs::write(&path, b"some audio bytes").unwrap();

        let first = content_hash(&path).unwrap();
        let second = content_hash(&path).unwrap();
        assert_eq!(first, second, "hashing the same unmodified file twice must agree");

        std::fs::write(&path, b"different audio bytes").unwrap();
        let third = content_hash(&path).unwrap();
        assert_ne!(first, third, "changed content must change the hash");
    }
}
