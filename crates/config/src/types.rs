use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level runtime configuration. Constructed once at startup by
/// `ChronicleConfig::load()`; a config reload produces a *new* value rather
/// than mutating this one in place (see `services::runtime::Runtime::reload`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChronicleConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub thresholds: SpeechThresholds,
    pub jobs: JobTimeouts,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Test-affordance switch (§9): when set, the Conversation
    /// Controller does not time out on inactivity while the persistence
    /// queue still has pending chunks. Never enabled in production.
    pub test_drain_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Idle time before a pending stream entry becomes reclaimable by
    /// another consumer in the same group (§4.A).
    pub consumer_pending_idle_ms: u64,
    /// How often the maintenance routine scans for stuck consumer groups.
    pub claim_interval_secs: u64,
    /// Age beyond which a pending entry is considered fatally stuck and is
    /// force-acked by the maintenance routine rather than redelivered.
    pub fatal_pending_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory WAV files are written under: `{chunk_dir}/{conversation_id}.wav`.
    pub chunk_dir: String,
    /// Bound on the pre-conversation scratch buffer (§4.C).
    pub scratch_buffer_max_bytes: usize,
}

/// Speech-detection and conversation-lifetime thresholds (§4.F, §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechThresholds {
    pub w_min: usize,
    pub c_min: f32,
    pub d_min_secs: f64,
    pub inactivity_threshold_secs: u64,
    pub max_runtime_secs: u64,
    pub audio_file_wait_secs: u64,
}

/// Per-function job timeouts (§5), in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTimeouts {
    pub transcription_secs: u64,
    pub speaker_recognition_secs: u64,
    pub crop_secs: u64,
    pub memory_secs: u64,
    pub speech_detection_secs: u64,
    pub conversation_controller_secs: u64,
    pub result_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut modules = HashMap::new();
        modules.insert("api".to_string(), "debug".to_string());
        modules.insert("services".to_string(), "debug".to_string());

        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            modules,
        }
    }
}

