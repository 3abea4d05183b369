use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use persona_pipeline::cache::InterviewCache;
use persona_pipeline::config::Settings;
use persona_pipeline::gateway::{GeminiBackend, LlmGateway};
use persona_pipeline::http::{self, AppState};
use persona_pipeline::orchestrator::OrchestratorFactory;
use persona_pipeline::registry::JobRegistry;
use persona_pipeline::store::SqliteStore;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env()?;
    if settings.enable_clerk_validation {
        tracing::warn!("ENABLE_CLERK_VALIDATION set but no auth middleware is wired in");
    }

    let backend = Arc::new(GeminiBackend::new(settings.api_key.clone()));
    let gateway = LlmGateway::new(backend, GEMINI_BASE_URL);
    let store = Arc::new(SqliteStore::open(&settings.database_path)?);
    let cache = Arc::new(InterviewCache::new());
    let factory = Arc::new(OrchestratorFactory::new(gateway, store, cache));

    let state = AppState {
        registry: Arc::new(JobRegistry::new(factory.clone())),
        orchestrator: Arc::new(factory.build(None)),
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "persona pipeline listening");
    axum::serve(listener, app).await?;
    Ok(())
}
