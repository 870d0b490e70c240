use finqa_planrag::{
    agent::Backends,
    api::{start_server, ApiState},
    config::Settings,
    dataset::{index_by_id, load_records},
    execution::ExecutionConfig,
    memory::SessionMemoryStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;

    info!("FinQA PlanRAG - API Server");
    info!(port = settings.port, dataset = %settings.dataset_path, "Configuration loaded");

    let records = index_by_id(load_records(&settings.dataset_path)?);
    let backends = Backends::from_settings(&settings)?;
    let store = SessionMemoryStore::connect(settings.database_url.as_deref());

    let state = ApiState::new(
        records,
        backends,
        ExecutionConfig::from_settings(&settings),
        store,
    );

    info!("Starting API server...");
    start_server(state, settings.port).await?;

    Ok(())
}
