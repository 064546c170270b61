use config::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// Completed records never outlive a year.
const MAX_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Tuning for the idempotency mediation layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencySettings {
    /// Lifetime of a completed record (default: 24 hours)
    pub ttl_seconds: u64,
    /// How long a pending record may stay unresolved before it counts as abandoned
    pub pending_lease_seconds: u64,
    /// How long a duplicate caller waits for the original request
    pub wait_timeout_ms: u64,
    pub sweep_interval_seconds: u64,
    pub max_records: usize,
    pub max_key_length: usize,
    pub max_body_bytes: usize,
    pub max_response_bytes: usize,
    pub protected_methods: Vec<String>,
    pub protected_paths: Vec<String>,
    pub replay_headers: Vec<String>,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 86400, // 24 hours
            pending_lease_seconds: 300,
            wait_timeout_ms: 10_000,
            sweep_interval_seconds: 60,
            max_records: 100_000,
            max_key_length: 255,
            max_body_bytes: 64 * 1024,
            max_response_bytes: 1024 * 1024,
            protected_methods: vec!["POST".to_string(), "PUT".to_string(), "PATCH".to_string()],
            protected_paths: vec![
                "/accounts/*/deposit".to_string(),
                "/accounts/*/withdraw".to_string(),
            ],
            replay_headers: vec!["content-type".to_string()],
        }
    }
}

impl IdempotencySettings {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Rejects values the record store cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_seconds == 0 || self.ttl_seconds > MAX_TTL_SECONDS {
            return Err(ConfigError::Message(format!(
                "idempotency.ttl_seconds must be between 1 and {}",
                MAX_TTL_SECONDS
            )));
        }
        if self.pending_lease_seconds == 0 || self.pending_lease_seconds > self.ttl_seconds {
            return Err(ConfigError::Message(
                "idempotency.pending_lease_seconds must be positive and not exceed ttl_seconds"
                    .to_string(),
            ));
        }
        if self.wait_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "idempotency.wait_timeout_ms must be positive".to_string(),
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "idempotency.sweep_interval_seconds must be positive".to_string(),
            ));
        }
        if self.max_records == 0 || self.max_key_length == 0 {
            return Err(ConfigError::Message(
                "idempotency.max_records and idempotency.max_key_length must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("idempotency.protected_methods")
                    .with_list_parse_key("idempotency.protected_paths")
                    .with_list_parse_key("idempotency.replay_headers"),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.idempotency.validate()?;
        Ok(settings)
    }
}
