//! Server configuration: TOML file + environment variable overrides,
//! grounded on `fraiseql-runtime::config::env`'s `${VAR}`/`${VAR:-default}`
//! resolution idiom and `fraiseql-server::config::loader`'s
//! file-then-env loading order.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub rate_limit: RateLimitSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetrySettings,
    pub shutdown: ShutdownSettings,
    pub idempotency_ttl_hours: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            cors: CorsConfig::default(),
            rate_limit: RateLimitSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            shutdown: ShutdownSettings::default(),
            idempotency_ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub health_path: String,
    pub ready_path: String,
    pub metrics_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            health_path: "/health/live".to_string(),
            ready_path: "/health/ready".to_string(),
            metrics_path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Name of the environment variable holding the Postgres connection
    /// string (never the connection string itself, per
    /// `fraiseql-runtime::state`'s `url_env` convention).
    pub url_env: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url_env: "DATABASE_URL".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
    pub credentials: bool,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_string()],
            methods: vec!["GET".into(), "POST".into(), "PUT".into(), "PATCH".into(), "DELETE".into()],
            headers: vec!["content-type".into(), "idempotency-key".into()],
            credentials: false,
            max_age_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { capacity: 100.0, refill_per_sec: 50.0 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub window_size: usize,
    pub min_calls: usize,
    pub failure_rate_threshold: f64,
    pub slow_call_duration_secs: u64,
    pub open_wait_secs: u64,
    pub half_open_probes: usize,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_calls: 5,
            failure_rate_threshold: 0.5,
            slow_call_duration_secs: 2,
            open_wait_secs: 5,
            half_open_probes: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, initial_delay_ms: 500, multiplier: 2.0, max_delay_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    pub drain_timeout_secs: u64,
    pub delay_secs: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self { drain_timeout_secs: 30, delay_secs: 5 }
    }
}

impl ShutdownSettings {
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// Errors raised while locating or parsing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing environment variable: {0}")]
    MissingVar(String),
}

impl ServerConfig {
    /// Load from an explicit TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from `MERIDIAN_CONFIG`, falling back to `./meridian.toml`, or
    /// defaults if neither is present (spec's ambient config concern,
    /// grounded on `fraiseql-server::config::loader::RuntimeConfig::load`).
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = env::var("MERIDIAN_CONFIG") {
            return Self::from_file(path);
        }

        let local = Path::new("./meridian.toml");
        if local.exists() {
            return Self::from_file(local);
        }

        Ok(Self::default())
    }

    /// Resolve the database connection string from the configured
    /// environment variable.
    pub fn database_url(&self) -> Result<String, ConfigError> {
        env::var(&self.database.url_env).map_err(|_| ConfigError::MissingVar(self.database.url_env.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = ServerConfig::default();
        assert_eq!(config.http.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.idempotency_ttl_hours, 24);
    }

    #[test]
    fn parses_a_minimal_toml_override() {
        let toml = r#"
            [http]
            bind_addr = "127.0.0.1:9000"
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.http.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.http.health_path, "/health/live");
    }
}
