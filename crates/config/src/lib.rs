// Configuration Management
//
// This crate handles all configuration loading and management for chronicle.
// It provides:
// - Configuration structs
// - Environment variable loading
// - Default configuration values
//
// This keeps configuration concerns separate from domain logic.

use thiserror::Error;

pub mod types;

// Re-export all configuration types
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from environment: {0}")]
    EnvError(String),
}

/// Main configuration loading interface
impl ChronicleConfig {
    /// Load configuration from environment variables.
    ///
    /// Attempts to load a `.env` file from the current directory first (missing
    /// is not an error), then reads every field from the environment, falling
    /// back to defaults for anything unset.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Ok(Self::from_env())
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl ChronicleConfig {
    fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env_string("CHRONICLE_HOST", "0.0.0.0"),
                port: env_parse("CHRONICLE_PORT", 8000),
            },
            redis: RedisConfig {
                url: env_string("CHRONICLE_REDIS_URL", "redis://127.0.0.1:6379"),
                consumer_pending_idle_ms: env_parse("CHRONICLE_REDIS_IDLE_MS", 30_000),
                claim_interval_secs: env_parse("CHRONICLE_REDIS_CLAIM_INTERVAL_SECS", 60),
                fatal_pending_secs: env_parse("CHRONICLE_REDIS_FATAL_PENDING_SECS", 3600),
            },
            database: DatabaseConfig {
                host: env_string("CHRONICLE_DB_HOST", "localhost"),
                port: env_parse("CHRONICLE_DB_PORT", 5432),
                database: env_string("CHRONICLE_DB_NAME", "chronicle"),
                username: env_string("CHRONICLE_DB_USER", "chronicle"),
                password: env_string("CHRONICLE_DB_PASSWORD", ""),
                max_connections: env_parse("CHRONICLE_DB_MAX_CONNECTIONS", 16),
            },
            storage: StorageConfig {
                chunk_dir: env_string("CHRONICLE_CHUNK_DIR", "./data/audio"),
                scratch_buffer_max_bytes: env_parse(
                    "CHRONICLE_SCRATCH_BUFFER_MAX_BYTES",
                    5 * 1024 * 1024,
                ),
            },
            thresholds: SpeechThresholds {
                w_min: env_parse("CHRONICLE_SPEECH_W_MIN", 5),
                c_min: env_parse("CHRONICLE_SPEECH_C_MIN", 0.5),
                d_min_secs: env_parse("CHRONICLE_SPEECH_D_MIN_SECS", 10.0),
                inactivity_threshold_secs: env_parse("CHRONICLE_INACTIVITY_SECS", 60),
                max_runtime_secs: env_parse("CHRONICLE_MAX_RUNTIME_SECS", 3 * 3600 - 60),
                audio_file_wait_secs: env_parse("CHRONICLE_AUDIO_FILE_WAIT_SECS", 30),
            },
            jobs: JobTimeouts {
                transcription_secs: env_parse("CHRONICLE_JOB_TIMEOUT_TRANSCRIBE_SECS", 600),
                speaker_recognition_secs: env_parse("CHRONICLE_JOB_TIMEOUT_SPEAKER_SECS", 600),
                crop_secs: env_parse("CHRONICLE_JOB_TIMEOUT_CROP_SECS", 300),
                memory_secs: env_parse("CHRONICLE_JOB_TIMEOUT_MEMORY_SECS", 1800),
                speech_detection_secs: env_parse("CHRONICLE_JOB_TIMEOUT_SPEECH_SECS", 3600),
                conversation_controller_secs: env_parse(
                    "CHRONICLE_JOB_TIMEOUT_CONVERSATION_SECS",
                    10_740,
                ),
                result_ttl_secs: env_parse("CHRONICLE_JOB_RESULT_TTL_SECS", 24 * 3600),
            },
            logging: LoggingConfig {
                level: env_string("CHRONICLE_LOG_LEVEL", "info"),
                format: env_string("CHRONICLE_LOG_FORMAT", "pretty"),
                modules: Default::default(),
            },
            test_drain_mode: env_bool("CHRONICLE_TEST_DRAIN_MODE", false),
        }
    }
}
