//! agentflow HTTP server binary.
//!
//! Starts an axum HTTP server exposing the orchestrator as an agent.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8080)
//! - `AGENTFLOW_CONFIG` — Path to a YAML/JSON configuration file
//! - `AGENTFLOW_REGISTRY_URL`, `AGENTFLOW_CONCURRENCY`, `AGENTFLOW_TIMEOUT_MS`,
//!   `AGENTFLOW_RETRIES`, `AGENTFLOW_MODE` — Configuration overrides
//! - `RUST_LOG` — Tracing filter (default: "info,agentflow=debug")
//!
//! # Usage
//!
//! ```bash
//! AGENTFLOW_CONFIG=agentflow.yaml cargo run --bin server
//! ```

use agentflow::config::OrchestratorConfig;
use agentflow::orchestrator::Orchestrator;
use agentflow::server::{app_router, AppState};
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,agentflow=debug".into()),
        )
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{}", port);

    let config = OrchestratorConfig::from_env().context("loading configuration")?;
    if config.workflow.is_empty() {
        tracing::warn!("No workflow configured; POST /execute will fail until one is set");
    }
    if config.registry.is_none() && config.default_agents.is_empty() {
        tracing::warn!("Neither a registry nor default agents are configured");
    }
    tracing::info!(
        registry = config.registry.as_deref().unwrap_or("<none>"),
        default_agents = config.default_agents.len(),
        steps = config.workflow.len(),
        mode = ?config.mode,
        "configuration loaded"
    );

    let orchestrator = Orchestrator::new(config).context("building orchestrator")?;
    let app = app_router(AppState::new(orchestrator));

    tracing::info!("agentflow server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health       — liveness probe");
    tracing::info!("  GET  /capabilities — capability query");
    tracing::info!("  POST /negotiate    — negotiation handshake");
    tracing::info!("  POST /execute      — run the configured workflow");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server failed")?;
    Ok(())
}
