use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pricehound_client::HttpLauncher;
use pricehound_core::{Engine, EngineConfig, EventBus, register_default_handlers};
use pricehound_db::{Database, DatabaseConfig};
use pricehound_server::routes;
use pricehound_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pricehound=info".parse()?))
        .with_target(false)
        .init();

    let admin_token = std::env::var("PRICEHOUND_ADMIN_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty());
    if admin_token.is_none() {
        tracing::warn!("PRICEHOUND_ADMIN_TOKEN not set, /v1 endpoints will answer 403");
    }
    let port = std::env::var("PRICEHOUND_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");
    let run_scheduler = std::env::var("PRICEHOUND_RUN_SCHEDULER")
        .is_ok_and(|v| matches!(v.trim(), "1" | "true" | "yes"));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let config = EngineConfig::from_env()?;
    let bus = EventBus::with_history_capacity(config.event_history);
    register_default_handlers(&bus);
    let launcher = HttpLauncher::with_timeout(config.navigation_timeout)?;
    let engine = Engine::build(config, launcher, db.store(), bus);

    let cancel = CancellationToken::new();
    let scheduler = run_scheduler.then(|| {
        let scheduler = engine.scheduler();
        let token = cancel.clone();
        tokio::spawn(async move { scheduler.run(token).await })
    });

    let state = Arc::new(AppState {
        db,
        engine,
        admin_token,
        metrics,
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    if let Some(task) = scheduler {
        task.await.context("Scheduler task panicked")?;
    }

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
