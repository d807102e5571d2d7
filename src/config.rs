//! Configuration management with validation and defaults
//!
//! Values come from an optional TOML file, are overridden by `CRASH_*`
//! environment variables, and are validated before the engine starts.

use crate::errors::{ConfigurationError, EngineResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub game: GameConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Round timing, fairness and bet limits
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub waiting_ms: u64,
    pub cooldown_ms: u64,
    pub tick_ms: u64,
    /// Multiplier = growth_base ^ elapsed_seconds
    pub growth_base: f64,
    pub history_capacity: usize,
    /// One in `instant_bust_modulus` rounds busts at exactly 1.00
    pub instant_bust_modulus: u64,
    pub min_bet: Decimal,
    pub max_bet: Option<Decimal>,
    pub persist_attempts: u32,
    pub persist_backoff_ms: u64,
    pub persist_timeout_ms: u64,
    pub mailbox_capacity: usize,
    pub broadcast_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            waiting_ms: 7_000,
            cooldown_ms: 3_000,
            tick_ms: 100,
            growth_base: 1.06,
            history_capacity: 20,
            instant_bust_modulus: 25,
            min_bet: Decimal::new(1, 2),
            max_bet: None,
            persist_attempts: 3,
            persist_backoff_ms: 200,
            persist_timeout_ms: 2_000,
            mailbox_capacity: 1_024,
            broadcast_capacity: 256,
        }
    }
}

impl GameConfig {
    pub fn waiting(&self) -> Duration {
        Duration::from_millis(self.waiting_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// HTTP / WebSocket server settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/crash_engine".to_string(),
            clear_on_start: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "crash_engine=info,tower_http=info".to_string(),
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => EngineConfig::default(),
        };

        Self::apply_env_overrides(&mut config, |key| env::var(key).ok())?;
        validate(&config)?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        parse_toml(&content)
    }

    fn apply_env_overrides<F>(config: &mut EngineConfig, lookup: F) -> EngineResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CRASH_WAITING_MS") {
            config.game.waiting_ms = parse_env("CRASH_WAITING_MS", v)?;
        }
        if let Some(v) = lookup("CRASH_COOLDOWN_MS") {
            config.game.cooldown_ms = parse_env("CRASH_COOLDOWN_MS", v)?;
        }
        if let Some(v) = lookup("CRASH_TICK_MS") {
            config.game.tick_ms = parse_env("CRASH_TICK_MS", v)?;
        }
        if let Some(v) = lookup("CRASH_GROWTH_BASE") {
            config.game.growth_base = parse_env("CRASH_GROWTH_BASE", v)?;
        }
        if let Some(v) = lookup("CRASH_HISTORY_CAPACITY") {
            config.game.history_capacity = parse_env("CRASH_HISTORY_CAPACITY", v)?;
        }
        if let Some(v) = lookup("CRASH_INSTANT_BUST_MODULUS") {
            config.game.instant_bust_modulus = parse_env("CRASH_INSTANT_BUST_MODULUS", v)?;
        }
        if let Some(v) = lookup("CRASH_MIN_BET") {
            config.game.min_bet = parse_env("CRASH_MIN_BET", v)?;
        }
        if let Some(v) = lookup("CRASH_API_HOST") {
            config.api.host = v;
        }
        if let Some(v) = lookup("CRASH_API_PORT") {
            config.api.port = parse_env("CRASH_API_PORT", v)?;
        }
        if let Some(v) = lookup("CRASH_DATA_DIR") {
            config.storage.data_directory = v;
        }

        Ok(())
    }
}

/// Parse a TOML document into a configuration (unset fields take defaults)
pub fn parse_toml(content: &str) -> EngineResult<EngineConfig> {
    toml::from_str(content)
        .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
}

fn parse_env<T: FromStr>(field: &str, value: String) -> Result<T, ConfigurationError> {
    value.parse().map_err(|_| ConfigurationError::InvalidValue {
        field: field.to_string(),
        value,
        reason: "could not parse".to_string(),
    })
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Validate configuration values
pub fn validate(config: &EngineConfig) -> Result<(), ConfigurationError> {
    let game = &config.game;

    if game.tick_ms == 0 {
        return Err(invalid("game.tick_ms", game.tick_ms, "tick interval cannot be zero"));
    }
    if game.waiting_ms == 0 {
        return Err(invalid("game.waiting_ms", game.waiting_ms, "waiting phase cannot be zero"));
    }
    if !(game.growth_base.is_finite() && game.growth_base > 1.0) {
        return Err(invalid("game.growth_base", game.growth_base, "must be greater than 1"));
    }
    if game.history_capacity == 0 {
        return Err(invalid("game.history_capacity", game.history_capacity, "must be positive"));
    }
    if game.instant_bust_modulus == 0 {
        return Err(invalid(
            "game.instant_bust_modulus",
            game.instant_bust_modulus,
            "must be positive",
        ));
    }
    if game.min_bet <= Decimal::ZERO {
        return Err(invalid("game.min_bet", game.min_bet, "must be positive"));
    }
    if let Some(max_bet) = game.max_bet {
        if max_bet < game.min_bet {
            return Err(invalid("game.max_bet", max_bet, "must not be below game.min_bet"));
        }
    }
    if game.persist_attempts == 0 {
        return Err(invalid("game.persist_attempts", game.persist_attempts, "must be at least 1"));
    }
    if game.mailbox_capacity == 0 || game.broadcast_capacity == 0 {
        return Err(invalid("game.mailbox_capacity", game.mailbox_capacity, "channels need capacity"));
    }
    if config.api.port == 0 {
        return Err(invalid("api.port", config.api.port, "port cannot be zero"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = parse_toml(
            r#"
            [game]
            growth_base = 1.04
            history_capacity = 50
            max_bet = "100"

            [api]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.game.growth_base, 1.04);
        assert_eq!(config.game.history_capacity, 50);
        assert_eq!(config.game.max_bet, Some(Decimal::new(100, 0)));
        assert_eq!(config.game.waiting_ms, 7_000);
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.storage.data_directory, "./DB/crash_engine");
    }

    #[test]
    fn test_growth_base_must_exceed_one() {
        let mut config = EngineConfig::default();
        config.game.growth_base = 1.0;

        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("game.growth_base"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CRASH_TICK_MS", "50"),
            ("CRASH_GROWTH_BASE", "1.04"),
            ("CRASH_DATA_DIR", "/tmp/crash"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        ConfigLoader::apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.game.tick_ms, 50);
        assert_eq!(config.game.growth_base, 1.04);
        assert_eq!(config.storage.data_directory, "/tmp/crash");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = EngineConfig::default();
        let result = ConfigLoader::apply_env_overrides(&mut config, |key| {
            (key == "CRASH_API_PORT").then(|| "not-a-port".to_string())
        });

        assert!(result.is_err());
    }
}
