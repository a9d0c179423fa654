//! Server setup and initialization
//!
//! Wires together all components: database, registry, collaborators, engine,
//! background jobs and HTTP routes.

use crate::{
    api::{create_event_routes, create_execution_routes, create_workflow_routes, AppState},
    clock::{Clock, SystemClock},
    collaborators::{
        Collaborators, LogMailer, ReqwestHttpClient, SqliteTargetAccessor, SqliteTemplateRenderer, TargetAccessors,
    },
    config::Config,
    database,
    runtime::{BackgroundJobs, Engine},
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage, types::TargetType},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build the router around an already assembled engine
pub fn router(engine: Engine) -> Router {
    let state = AppState { engine };

    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_event_routes())
        .merge(create_execution_routes())
        .with_state(state)
}

/// Open the database, load workflows and assemble the engine with the
/// default collaborators
pub async fn create_engine(config: &Config) -> Result<Engine> {
    let pool = database::connect(&config.database.path).await?;

    tracing::info!("📋 Initializing schema");
    database::init_schema(&pool).await?;

    let templates = SqliteTemplateRenderer::new(pool.clone());
    templates.init_schema().await?;

    let applications = SqliteTargetAccessor::new(pool.clone(), &config.database.applications_table)?;
    applications.ensure_table().await?;
    let contracts = SqliteTargetAccessor::new(pool.clone(), &config.database.contracts_table)?;
    contracts.ensure_table().await?;

    let collaborators = Collaborators {
        templates: Arc::new(templates),
        mailer: Arc::new(LogMailer),
        http: Arc::new(ReqwestHttpClient::new(config.engine.timeouts.webhook)?),
        targets: TargetAccessors::new()
            .with(TargetType::Application, Arc::new(applications))
            .with(TargetType::Contract, Arc::new(contracts)),
    };

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(WorkflowStorage::new(pool.clone())));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Ok(Engine::assemble(pool, registry, collaborators, clock, &config.engine))
}

/// Start the HTTP server and background jobs with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting statusflow server...");

    let engine = create_engine(&config).await?;

    let mut jobs = BackgroundJobs::new(
        Arc::clone(&engine.scanner),
        Arc::clone(&engine.continuations),
        config.engine.scan_interval,
        config.engine.sweep_interval,
    )
    .await?;
    jobs.start().await?;

    let app = router(engine);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    jobs.stop().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
