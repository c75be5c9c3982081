//! `Runtime` (§9 redesign guidance) — replaces the reference
//! implementation's module-level singletons (config parser, memory service,
//! LLM client, model registry) with one struct, constructed once at startup
//! and threaded explicitly through every component. A config reload
//! produces a *new* `Runtime`; in-flight controller tasks keep whichever
//! `Arc<Runtime>` they were spawned with and run to completion against it
//! (§11.6).

use std::sync::Arc;

use config::ChronicleConfig;
use database::ConversationRepository;
use scheduler::JobScheduler;
use streambus::{SessionRegistry, StreamBus};

use crate::providers::ports::{
    BatchTranscriptionProvider, DiarizationProvider, LLMClient, MemoryProvider, SpeakerRecognitionService,
    StreamingTranscriptionProvider,
};

/// Every capability a component in this crate needs, bundled so constructor
/// signatures don't grow one parameter per collaborator. Cloning a `Runtime`
/// is cheap — every field is an `Arc` or a plain config value.
#[derive(Clone)]
pub struct Runtime {
    pub config: ChronicleConfig,

    pub stream_bus: Arc<dyn StreamBus>,
    pub session_registry: Arc<dyn SessionRegistry>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub conversations: Arc<dyn ConversationRepository>,

    pub batch_transcription: Arc<dyn BatchTranscriptionProvider>,
    pub streaming_transcription: Arc<dyn StreamingTranscriptionProvider>,
    pub diarization: Arc<dyn DiarizationProvider>,
    pub memory_provider: Option<Arc<dyn MemoryProvider>>,
    pub llm_client: Option<Arc<dyn LLMClient>>,
    pub speaker_recognition: Arc<dyn SpeakerRecognitionService>,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ChronicleConfig,
        stream_bus: Arc<dyn StreamBus>,
        session_registry: Arc<dyn SessionRegistry>,
        scheduler: Arc<dyn JobScheduler>,
        conversations: Arc<dyn ConversationRepository>,
        batch_transcription: Arc<dyn BatchTranscriptionProvider>,
        streaming_transcription: Arc<dyn StreamingTranscriptionProvider>,
        diarization: Arc<dyn DiarizationProvider>,
        memory_provider: Option<Arc<dyn MemoryProvider>>,
        llm_client: Option<Arc<dyn LLMClient>>,
        speaker_recognition: Arc<dyn SpeakerRecognitionService>,
    ) -> Self {
        Self {
            config,
            stream_bus,
            session_registry,
            scheduler,
            conversations,
            batch_transcription,
            streaming_transcription,
            diarization,
            memory_provider,
            llm_client,
            speaker_recognition,
        }
    }

    /// Re-read configuration and return a fresh `Runtime` sharing the same
    /// infrastructure handles (stream bus, scheduler, conversation store,
    /// providers) but new threshold/timeout settings. Tasks
    /// already running hold their own `Arc<Runtime>` snapshot and are
    /// unaffected (§9, §11.6).
    pub fn reload(&self) -> Result<Runtime, config::ConfigError> {
        let config = ChronicleConfig::load().map_err(|_| config::ConfigError::EnvError("reload failed".to_string()))?;
        Ok(Runtime { config, ..self.clone() })
    }

    /// Builds a `Runtime` entirely out of in-memory/mock adapters, for unit
    /// and integration tests that exercise the controllers without Redis,
    /// Postgres, or real providers.
    #[cfg(any(test, feature = "test-mocks"))]
    pub fn for_tests() -> Self {
        use crate::providers::mock::{
            MockBatchTranscriptionProvider, MockLLMClient, MockStreamingTranscriptionProvider, NoopDiarizationProvider,
            NoopMemoryProvider, UnavailableSpeakerRecognitionService,
        };
        use database::InMemoryConversationRepository;
        use scheduler::InMemoryJobScheduler;
        use streambus::{MemorySessionRegistry, MemoryStreamBus};

        Self {
            config: test_config(),
            stream_bus: Arc::new(MemoryStreamBus::new()),
            session_registry: Arc::new(MemorySessionRegistry::new()),
            scheduler: Arc::new(InMemoryJobScheduler::new()),
            conversations: Arc::new(InMemoryConversationRepository::new()),
            batch_transcription: Arc::new(MockBatchTranscriptionProvider::default()),
            streaming_transcription: Arc::new(MockStreamingTranscriptionProvider),
            diarization: Arc::new(NoopDiarizationProvider),
            memory_provider: Some(Arc::new(NoopMemoryProvider)),
            llm_client: Some(Arc::new(MockLLMClient::default())),
            speaker_recognition: Arc::new(UnavailableSpeakerRecognitionService),
        }
    }
}

#[cfg(any(test, feature = "test-mocks"))]
fn test_config() -> ChronicleConfig {
    use config::*;
    ChronicleConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        redis: RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
            consumer_pending_idle_ms: 30_000,
            claim_interval_secs: 60,
            fatal_pending_secs: 3600,
        },
        database: DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "chronicle_test".to_string(),
            username: "chronicle".to_string(),
            password: String::new(),
            max_connections: 4,
        },
        storage: StorageConfig {
            chunk_dir: std::env::temp_dir().to_string_lossy().into_owned(),
            scratch_buffer_max_bytes: 1024 * 1024,
        },
        thresholds: SpeechThresholds {
            w_min: 5,
            c_min: 0.5,
            d_min_secs: 10.0,
            inactivity_threshold_secs: 60,
            max_runtime_secs: 3 * 3600 - 60,
            audio_file_wait_secs: 30,
        },
        jobs: JobTimeouts {
            transcription_secs: 600,
            speaker_recognition_secs: 600,
            crop_secs: 300,
            memory_secs: 1800,
            speech_detection_secs: 3600,
            conversation_controller_secs: 10_740,
            result_ttl_secs: 24 * 3600,
        },
        logging: LoggingConfig::default(),
        test_drain_mode: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_preserves_infra_handles_but_rereads_config() {
        let runtime = Runtime::for_tests();
        let stream_bus_ptr = Arc::as_ptr(&runtime.stream_bus) as *const ();
        let reloaded = Runtime { config: runtime.config.clone(), ..runtime.clone() };
        assert_eq!(Arc::as_ptr(&reloaded.stream_bus) as *const (), stream_bus_ptr);
    }
}
