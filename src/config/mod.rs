use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use thiserror::Error;

/// Signing key of the development preset; rejected in every other environment
const DEVELOPMENT_JWT_SECRET: &str = "development-only-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub anomaly: AnomalyConfig,
    pub store: StoreConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub max_request_size_bytes: usize,
}

/// Limits for one endpoint class. `per_hour: None` disables the hourly window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimits {
    pub per_minute: u32,
    pub per_hour: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub auth: WindowLimits,
    pub api: WindowLimits,
    /// How long to stay on local counters after a store failure
    pub degrade_secs: u64,
    pub degraded_log_interval_secs: u64,
    pub auth_endpoints: Vec<String>,
    pub protected_prefixes: Vec<String>,
    pub skip_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub failure_window_secs: u64,
    pub medium_threshold: u32,
    pub high_threshold: u32,
    pub critical_threshold: u32,
    pub brute_force_threshold: u32,
    pub suspicious_window_secs: u64,
    pub suspicious_threshold: u32,
    pub alert_channel_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub acquire_timeout_ms: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub trusted_proxies: Vec<String>,
}

impl AppConfig {
    /// Preset for `APP_ENV`, then the YAML file named by `WARDEN_CONFIG`, then
    /// individual env var overrides
    pub fn load() -> Result<Self, ConfigError> {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        let mut config = Self::preset(environment);
        if let Ok(path) = env::var("WARDEN_CONFIG") {
            config = config.with_file(Path::new(&path))?;
        }
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn preset(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
    }

    /// Overlay a YAML document onto this config. Keys missing from the file
    /// keep their current values.
    pub fn with_file(self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.with_yaml(&text)
    }

    pub fn with_yaml(self, text: &str) -> Result<Self, ConfigError> {
        let overlay: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mut base = serde_yaml::to_value(&self)?;
        merge_yaml(&mut base, overlay);
        Ok(serde_yaml::from_value(base)?)
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Ok(v) = env::var("PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("SERVER_MAX_REQUEST_SIZE_BYTES") {
            self.server.max_request_size_bytes = v.parse().unwrap_or(self.server.max_request_size_bytes);
        }

        // Rate limit overrides
        if let Ok(v) = env::var("RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = v.parse().unwrap_or(self.rate_limit.enabled);
        }
        if let Ok(v) = env::var("RATE_LIMIT_AUTH_PER_MINUTE") {
            self.rate_limit.auth.per_minute = v.parse().unwrap_or(self.rate_limit.auth.per_minute);
        }
        if let Ok(v) = env::var("RATE_LIMIT_AUTH_PER_HOUR") {
            self.rate_limit.auth.per_hour = parse_optional_limit(&v, self.rate_limit.auth.per_hour);
        }
        if let Ok(v) = env::var("RATE_LIMIT_API_PER_MINUTE") {
            self.rate_limit.api.per_minute = v.parse().unwrap_or(self.rate_limit.api.per_minute);
        }
        if let Ok(v) = env::var("RATE_LIMIT_API_PER_HOUR") {
            self.rate_limit.api.per_hour = parse_optional_limit(&v, self.rate_limit.api.per_hour);
        }
        if let Ok(v) = env::var("RATE_LIMIT_DEGRADE_SECS") {
            self.rate_limit.degrade_secs = v.parse().unwrap_or(self.rate_limit.degrade_secs);
        }

        // Anomaly overrides
        if let Ok(v) = env::var("ANOMALY_FAILURE_WINDOW_SECS") {
            self.anomaly.failure_window_secs = v.parse().unwrap_or(self.anomaly.failure_window_secs);
        }
        if let Ok(v) = env::var("ANOMALY_BRUTE_FORCE_THRESHOLD") {
            self.anomaly.brute_force_threshold = v.parse().unwrap_or(self.anomaly.brute_force_threshold);
        }
        if let Ok(v) = env::var("ANOMALY_SUSPICIOUS_WINDOW_SECS") {
            self.anomaly.suspicious_window_secs = v.parse().unwrap_or(self.anomaly.suspicious_window_secs);
        }
        if let Ok(v) = env::var("ANOMALY_SUSPICIOUS_THRESHOLD") {
            self.anomaly.suspicious_threshold = v.parse().unwrap_or(self.anomaly.suspicious_threshold);
        }

        // Store overrides
        if let Ok(v) = env::var("STORE_BACKEND") {
            match v.as_str() {
                "memory" => self.store.backend = StoreBackend::Memory,
                "postgres" => self.store.backend = StoreBackend::Postgres,
                _ => {}
            }
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.store.database_url = Some(v);
        }
        if let Ok(v) = env::var("STORE_ACQUIRE_TIMEOUT_MS") {
            self.store.acquire_timeout_ms = v.parse().unwrap_or(self.store.acquire_timeout_ms);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = split_list(&v);
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("SECURITY_TRUSTED_PROXIES") {
            self.security.trusted_proxies = split_list(&v);
        }

        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (class, limits) in [("auth", &self.rate_limit.auth), ("api", &self.rate_limit.api)] {
            if limits.per_minute == 0 {
                return Err(ConfigError::Invalid(format!("{} per_minute must be positive", class)));
            }
            if limits.per_hour == Some(0) {
                return Err(ConfigError::Invalid(format!("{} per_hour must be positive", class)));
            }
        }

        let a = &self.anomaly;
        if !(a.medium_threshold <= a.high_threshold && a.high_threshold <= a.critical_threshold) {
            return Err(ConfigError::Invalid(
                "risk thresholds must satisfy medium <= high <= critical".to_string(),
            ));
        }
        if a.failure_window_secs == 0 || a.suspicious_window_secs == 0 {
            return Err(ConfigError::Invalid("anomaly windows must be positive".to_string()));
        }

        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            return Err(ConfigError::Invalid(
                "postgres store requires DATABASE_URL".to_string(),
            ));
        }

        if self.environment != Environment::Development {
            let secret = self.security.jwt_secret.trim();
            if secret.is_empty() || secret == DEVELOPMENT_JWT_SECRET {
                return Err(ConfigError::Invalid(format!(
                    "JWT_SECRET must be set in {:?}",
                    self.environment
                )));
            }
        }
        if self.anomaly.alert_channel_capacity == 0 {
            return Err(ConfigError::Invalid("alert_channel_capacity must be positive".to_string()));
        }
        Ok(())
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 9001,
                max_request_size_bytes: 1024 * 1024, // 1MB
            },
            rate_limit: RateLimitConfig::standard(),
            anomaly: AnomalyConfig::standard(),
            store: StoreConfig {
                backend: StoreBackend::Memory,
                database_url: None,
                acquire_timeout_ms: 2_000,
                sweep_interval_secs: 60,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                jwt_secret: DEVELOPMENT_JWT_SECRET.to_string(),
                jwt_expiry_hours: 24,
                trusted_proxies: default_trusted_proxies(),
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                port: 9001,
                max_request_size_bytes: 512 * 1024,
            },
            rate_limit: RateLimitConfig::standard(),
            anomaly: AnomalyConfig::standard(),
            store: StoreConfig {
                backend: StoreBackend::Memory,
                database_url: None,
                acquire_timeout_ms: 1_000,
                sweep_interval_secs: 60,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_expiry_hours: 8,
                trusted_proxies: default_trusted_proxies(),
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                port: 8080,
                max_request_size_bytes: 256 * 1024,
            },
            rate_limit: RateLimitConfig::standard(),
            anomaly: AnomalyConfig::standard(),
            store: StoreConfig {
                backend: StoreBackend::Postgres,
                database_url: None,
                acquire_timeout_ms: 500,
                sweep_interval_secs: 30,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                trusted_proxies: default_trusted_proxies(),
            },
        }
    }
}

impl RateLimitConfig {
    pub fn standard() -> Self {
        Self {
            enabled: true,
            auth: WindowLimits {
                per_minute: 5,
                per_hour: Some(20),
            },
            api: WindowLimits {
                per_minute: 60,
                per_hour: Some(1000),
            },
            degrade_secs: 300,
            degraded_log_interval_secs: 30,
            auth_endpoints: ["/auth/login", "/auth/signup", "/auth/logout"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            protected_prefixes: ["/medication-record", "/medication-schedule", "/side-effect", "/mood-diary"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            skip_prefixes: ["/health", "/static", "/favicon.ico"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl AnomalyConfig {
    pub fn standard() -> Self {
        Self {
            failure_window_secs: 15 * 60,
            medium_threshold: 3,
            high_threshold: 5,
            critical_threshold: 10,
            brute_force_threshold: 10,
            suspicious_window_secs: 5 * 60,
            suspicious_threshold: 20,
            alert_channel_capacity: 1024,
        }
    }
}

fn default_trusted_proxies() -> Vec<String> {
    vec!["127.0.0.1/32".to_string(), "::1/128".to_string()]
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// "none" / "off" / "" disables an optional limit; garbage keeps the current value
fn parse_optional_limit(v: &str, current: Option<u32>) -> Option<u32> {
    match v.trim() {
        "" | "none" | "off" => None,
        other => other.parse().ok().or(current),
    }
}

fn merge_yaml(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// Global singleton config - loaded once at startup. A rejected configuration
// stays an error; callers must not substitute defaults.
pub static CONFIG: Lazy<Result<AppConfig, ConfigError>> = Lazy::new(AppConfig::load);

// Convenience function for accessing config
pub fn config() -> Result<&'static AppConfig, &'static ConfigError> {
    CONFIG.as_ref()
}
