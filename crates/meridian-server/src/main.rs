//! Binary entrypoint: load config, connect to Postgres, build the
//! router, and serve with graceful shutdown — grounded on
//! `fraiseql-server`'s `main.rs` bootstrap sequence (tracing init, pool
//! connect, router build, `axum::serve().with_graceful_shutdown`).

use std::sync::Arc;

use axum::routing::get;
use meridian_observability::TracingMetricsObservability;
use meridian_server::config::ServerConfig;
use meridian_server::lifecycle::{shutdown_signal, ShutdownCoordinator};
use meridian_server::state::AppState;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = ServerConfig::load()?;
    TracingMetricsObservability::describe_metrics();

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let database_url = config.database_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&database_url)
        .await?;

    let shutdown = ShutdownCoordinator::new(config.shutdown.drain_timeout(), config.shutdown.delay());
    let state = AppState::new(pool, &config, Arc::clone(&shutdown));

    let metrics_path = config.http.metrics_path.clone();
    let app = meridian_server::build_app(state, &config.http, &config.cors)?
        .route(&metrics_path, get(move || async move { prometheus_handle.render() }))
        .fallback(fallback_handler);

    let listener = tokio::net::TcpListener::bind(&config.http.bind_addr).await?;
    tracing::info!(addr = %config.http.bind_addr, "meridian-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful_shutdown(shutdown))
        .await?;

    Ok(())
}

async fn graceful_shutdown(coordinator: Arc<ShutdownCoordinator>) {
    shutdown_signal().await;
    coordinator.shutdown().await;
}

async fn fallback_handler() -> axum::http::StatusCode {
    axum::http::StatusCode::NOT_FOUND
}
