//! CORS, tracing, and compression layers, grounded on
//! `fraiseql-runtime::middleware::cors`'s `build_cors_layer` shape —
//! adapted from the teacher's wildcard-predicate matching to this
//! crate's simpler origin-list config.

use std::str::FromStr;
use std::time::Duration;

use axum::http::{HeaderName, Method};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::CorsConfig;

/// Errors raised while building middleware from configuration.
#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError {
    #[error("cannot use wildcard origin together with credentials=true")]
    WildcardWithCredentials,
    #[error("at least one valid HTTP method is required in cors.methods")]
    NoValidMethods,
}

/// Build the CORS layer from configuration.
pub fn build_cors_layer(config: &CorsConfig) -> Result<CorsLayer, MiddlewareError> {
    let mut layer = CorsLayer::new();

    if config.origins.iter().any(|o| o == "*") {
        if config.credentials {
            return Err(MiddlewareError::WildcardWithCredentials);
        }
        layer = layer.allow_origin(AllowOrigin::any());
    } else {
        let origins: Vec<_> = config
            .origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer = layer.allow_origin(origins);
    }

    let methods: Vec<Method> = config.methods.iter().filter_map(|m| Method::from_str(m).ok()).collect();
    if methods.is_empty() {
        return Err(MiddlewareError::NoValidMethods);
    }
    layer = layer.allow_methods(methods);

    let headers: Vec<HeaderName> = config.headers.iter().filter_map(|h| HeaderName::from_str(h).ok()).collect();
    layer = layer.allow_headers(AllowHeaders::list(headers));
    layer = layer.allow_credentials(config.credentials);
    layer = layer.max_age(Duration::from_secs(config.max_age_secs));

    Ok(layer)
}

/// Request tracing layer: one span per request, tagged with method/path/status.
#[must_use]
pub fn build_trace_layer() -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

/// Gzip response compression for the JSON command surface.
#[must_use]
pub fn build_compression_layer() -> CompressionLayer {
    CompressionLayer::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_origin_with_credentials_is_rejected() {
        let config = CorsConfig {
            origins: vec!["*".to_string()],
            credentials: true,
            ..CorsConfig::default()
        };
        assert!(matches!(build_cors_layer(&config), Err(MiddlewareError::WildcardWithCredentials)));
    }

    #[test]
    fn empty_methods_list_is_rejected() {
        let config = CorsConfig {
            methods: vec!["NOT-A-METHOD".to_string()],
            ..CorsConfig::default()
        };
        assert!(matches!(build_cors_layer(&config), Err(MiddlewareError::NoValidMethods)));
    }

    #[test]
    fn default_config_builds_successfully() {
        assert!(build_cors_layer(&CorsConfig::default()).is_ok());
    }
}
