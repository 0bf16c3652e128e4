use std::sync::Arc;

use portico::backends::Backends;
use portico::bootstrap::Bootstrap;
use portico::configstore::{fetch_global_document, ConfigStore};
use portico::context::{spawn_log_forwarder, ContextBuilder, HttpCapability, LogLevel};
use portico::engine::{RuntimeLimits, WasmEngine};
use portico::loader::ArtifactLoader;
use portico::pipeline::RequestPipeline;
use portico::sandbox::SandboxPolicy;
use portico::server::start_server;
use portico::{init_tracing, AppConfig, Result, APP_NAME, VERSION};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; only surface unexpected failures.
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let app_config = AppConfig::from_env()?;
    init_tracing(&app_config.startup_log_level, app_config.json_logging)?;

    info!(
        app_name = APP_NAME,
        version = VERSION,
        config_repository = %app_config.config_repository_url,
        "Starting Portico edge-function gateway"
    );

    let http = reqwest::Client::new();
    let global = fetch_global_document(&http, &app_config.config_repository_url).await?;
    info!(
        bind_address = %global.config.bind_address(),
        code_repository = %global.config.code_repository_url,
        storage = %global.config.storage_url,
        request_timeout_secs = global.config.request_timeout_seconds,
        "Loaded global configuration"
    );

    let backends = Backends::from_storage_url(&global.config.storage_url)?;
    let engine = Arc::new(WasmEngine::new(RuntimeLimits::default())?);
    let policy = Arc::new(SandboxPolicy::new());
    let loader = Arc::new(ArtifactLoader::new(
        engine.clone(),
        policy,
        http.clone(),
        &global.config.code_repository_url,
    ));
    let forwarder = spawn_log_forwarder(http.clone());
    let contexts = Arc::new(ContextBuilder::new(
        backends.clone(),
        LogLevel::parse(&global.config.log_level),
        Arc::new(HttpCapability::new(http.clone())),
        forwarder,
    ));
    let store = Arc::new(ConfigStore::new(http.clone(), &app_config.config_repository_url));

    // Functional-core registrations: failures are logged and skipped inside.
    let bootstrap = Bootstrap::new(
        http.clone(),
        &app_config.config_repository_url,
        loader.clone(),
        contexts.clone(),
        engine.clone(),
        backends.stream.clone(),
        global.config.request_timeout_ms(),
    );
    bootstrap.run_init_functions().await;
    bootstrap.register_stream_consumers().await;

    let pipeline = Arc::new(RequestPipeline::new(
        global.clone(),
        store,
        loader,
        contexts,
        engine,
    ));

    start_server(&global.config, pipeline).await?;

    info!("Gateway shutdown completed");
    Ok(())
}
