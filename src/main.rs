//! statusflow server entry point
//!
//! Initializes configuration from `STATUSFLOW_*` environment variables and
//! starts the HTTP server plus the scan and sweep jobs.

use statusflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Status-change intake at /api/events/status-changed
/// - Execution inspection at /api/executions/* and /api/targets/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
