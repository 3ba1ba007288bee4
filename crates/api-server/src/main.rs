//! API server for the assistants run engine
//!
//! Serves the OpenAI-compatible assistants API under `/api/openai/v1` and
//! delegates agent turns to a remote worker over HTTP.

mod auth;
mod config;
mod routes;
mod state;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_runner::{HttpExecutor, RunEngine};
use assistants_core::InstanceStore;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "api_server=debug,agent_runner=debug,assistants_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    if config.jwt_secret_defaulted {
        tracing::warn!("ASST_JWT_SECRET is not set, using the development secret");
        match auth::issue_jwt(&config.jwt_secret, "dev", 24) {
            Ok((token, _)) => tracing::info!("Development bearer token: {}", token),
            Err(err) => tracing::warn!("{}", err),
        }
    }

    let auth = Authenticator::from_config(&config);
    if auth.is_disabled() {
        tracing::warn!("Authentication is disabled, every request is accepted");
    }

    let store = InstanceStore::shared();
    let executor = Arc::new(HttpExecutor::new(&config.worker_url));
    let engine = RunEngine::new(store, executor, config.engine_config());
    tracing::info!("Using agent worker at {}", config.worker_url);

    let _sweeper = engine.spawn_expiry_sweeper(config.expiry_sweep_interval);
    spawn_event_logger(&engine);

    let state = AppState::new(engine, auth, config.worker_url.clone());
    let app = routes::router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("REST API listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

/// Log every run status change
fn spawn_event_logger(engine: &RunEngine) {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.is_terminal() => {
                    tracing::info!("Run {} finished as {}", event.run_id, event.status)
                }
                Ok(event) => tracing::debug!("Run {} is now {}", event.run_id, event.status),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Run event logger skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
