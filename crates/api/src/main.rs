use std::sync::Arc;

use api::routes::build_router;
use api::AppState;
use config::{ChronicleConfig, LoggingConfig};
use database::Database;
use scheduler::{JobScheduler, RedisJobScheduler};
use services::providers::mock::{
    MockBatchTranscriptionProvider, MockLLMClient, MockStreamingTranscriptionProvider, NoopDiarizationProvider,
    NoopMemoryProvider, UnavailableSpeakerRecognitionService,
};
use services::Runtime;
use streambus::{RedisSessionRegistry, RedisStreamBus, SessionRegistry, StreamBus};

#[tokio::main]
async fn main() {
    let config = ChronicleConfig::load().unwrap_or_else(|e| {
        eprintln!("failed to load configuration: {e}");
        std::process::exit(1);
    });

    init_tracing(&config.logging);
    tracing::debug!(?config, "loaded configuration");

    let bind_address = format!("{}:{}", config.server.host, config.server.port);

    let database = Database::from_config(&config.database).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to connect to database");
        std::process::exit(1);
    });
    if let Err(e) = database.run_migrations().await {
        tracing::error!(error = %e, "failed to run database migrations");
        std::process::exit(1);
    }

    let stream_bus = Arc::new(RedisStreamBus::connect(&config.redis.url).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to connect stream bus to redis");
        std::process::exit(1);
    })) as Arc<dyn StreamBus>;
    let session_registry = Arc::new(RedisSessionRegistry::connect(&config.redis.url).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to connect session registry to redis");
        std::process::exit(1);
    })) as Arc<dyn SessionRegistry>;
    let scheduler = Arc::new(RedisJobScheduler::connect(&config.redis.url).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to connect job scheduler to redis");
        std::process::exit(1);
    })) as Arc<dyn JobScheduler>;

    // §1 places concrete ASR/diarization/memory/LLM backends out of
    // scope; the mock/no-op providers `Runtime` otherwise reserves for
    // tests are also the correct production default until a real backend
    // is wired in.
    let runtime = Runtime::new(
        config,
        stream_bus,
        session_registry,
        scheduler,
        Arc::new(database.conversations),
        Arc::new(MockBatchTranscriptionProvider::default()),
        Arc::new(MockStreamingTranscriptionProvider),
        Arc::new(NoopDiarizationProvider),
        Some(Arc::new(NoopMemoryProvider)),
        Some(Arc::new(MockLLMClient::default())),
        Arc::new(UnavailableSpeakerRecognitionService),
    );

    for queue in [domain::Queue::Default, domain::Queue::Transcription, domain::Queue::Memory] {
        let runtime = runtime.clone();
        tokio::spawn(async move { services::jobs::run_worker_loop(runtime, queue).await });
    }

    let app = build_router(AppState::new(runtime));

    let listener = tokio::net::TcpListener::bind(&bind_address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, address = %bind_address, "failed to bind listener");
        std::process::exit(1);
    });
    tracing::info!(address = %bind_address, "chronicle started");
    axum::serve(listener, app).await.unwrap();
}

fn init_tracing(logging_config: &LoggingConfig) {
    let mut filter = logging_config.level.clone();
    for (module, level) in &logging_config.modules {
        filter.push_str(&format!(",{module}={level}"));
    }

    match logging_config.format.as_str() {
        "json" => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
        "compact" => {
            tracing_subscriber::fmt().compact().with_env_filter(filter).init();
        }
        _ => {
            tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
        }
    }
}
