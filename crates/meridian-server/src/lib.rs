//! HTTP command surface, configuration, and lifecycle for the Meridian
//! CQRS write side (spec §6), grounded on `fraiseql-server`'s crate
//! layout: a thin `main.rs` over a library crate exposing config,
//! middleware, routes, and lifecycle as separate modules.

pub mod config;
pub mod lifecycle;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::Router;

use crate::middleware::{build_compression_layer, build_cors_layer, build_trace_layer, MiddlewareError};
use crate::state::AppState;

/// Assemble the full application router: command routes plus the
/// CORS/trace/compression middleware stack, grounded on
/// `fraiseql-runtime::server::router::RuntimeRouter::build`'s layering
/// order (trace outermost, then CORS, then compression).
pub fn build_app(state: AppState, http: &config::HttpConfig, cors: &config::CorsConfig) -> Result<Router, MiddlewareError> {
    let cors_layer = build_cors_layer(cors)?;

    Ok(routes::build_router(state, http)
        .layer(build_trace_layer())
        .layer(cors_layer)
        .layer(build_compression_layer()))
}
