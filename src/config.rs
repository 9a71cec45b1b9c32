//! Configuration for the round engine.
//!
//! TOML file with environment variable overrides and explicit validation.
//! All percentages are fractions in (0, 1]; all times are in the unit their
//! field name carries.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub game: GameConfig,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    /// Newline-separated hex seeds, one committed seed per round id.
    pub chain_file: Option<String>,
    /// Broadcast buffer for the outbound event bus.
    pub event_capacity: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "bustline".to_string(),
            chain_file: None,
            event_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Secret HMAC key for the provably-fair outcome. Revealing it lets
    /// anyone verify every past round.
    pub salt: String,
    /// How long the bust value stays on screen before the next round.
    pub round_delay_secs: u64,
    /// Countdown between the round announcement and liftoff.
    pub round_padding_secs: u64,
    /// Number of settled rounds kept in the in-memory history ring.
    pub history: usize,
    /// Bankroll share one wager's payout may consume.
    pub safety_single: f64,
    /// Bankroll share a whole round's payouts may consume.
    pub safety_round: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            salt: "change-me".to_string(),
            round_delay_secs: 5,
            round_padding_secs: 5,
            history: 20,
            safety_single: 0.01,
            safety_round: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Deadline for one outgoing transfer before its debit is rolled back.
    pub withdraw_timeout_ms: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            withdraw_timeout_ms: 10_000,
        }
    }
}

/// Configuration loader with environment variable support.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load from file (when a path was given), apply env overrides, then
    /// validate.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            AppConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;
        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> Result<AppConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) -> Result<(), ConfigError> {
        if let Ok(salt) = env::var("BUSTLINE_SALT") {
            config.game.salt = salt;
        }
        if let Ok(delay) = env::var("BUSTLINE_ROUND_DELAY_SECS") {
            config.game.round_delay_secs = parse_env("BUSTLINE_ROUND_DELAY_SECS", &delay)?;
        }
        if let Ok(padding) = env::var("BUSTLINE_ROUND_PADDING_SECS") {
            config.game.round_padding_secs = parse_env("BUSTLINE_ROUND_PADDING_SECS", &padding)?;
        }
        if let Ok(timeout) = env::var("BUSTLINE_WITHDRAW_TIMEOUT_MS") {
            config.wallet.withdraw_timeout_ms = parse_env("BUSTLINE_WITHDRAW_TIMEOUT_MS", &timeout)?;
        }
        if let Ok(chain) = env::var("BUSTLINE_CHAIN_FILE") {
            config.system.chain_file = Some(chain);
        }
        Ok(())
    }

    fn validate(&self, config: &AppConfig) -> Result<(), ConfigError> {
        if config.game.salt.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "game.salt".to_string(),
                value: String::new(),
                reason: "salt cannot be empty".to_string(),
            });
        }

        if config.game.history == 0 {
            return Err(ConfigError::InvalidValue {
                field: "game.history".to_string(),
                value: "0".to_string(),
                reason: "history ring must hold at least one round".to_string(),
            });
        }

        for (field, value) in [
            ("game.safety_single", config.game.safety_single),
            ("game.safety_round", config.game.safety_round),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be a fraction in (0, 1]".to_string(),
                });
            }
        }

        if config.wallet.withdraw_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "wallet.withdraw_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "a withdrawal needs a positive deadline".to_string(),
            });
        }

        if config.system.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "system.event_capacity".to_string(),
                value: "0".to_string(),
                reason: "the event bus needs a positive buffer".to_string(),
            });
        }

        Ok(())
    }

    pub fn save(&self, config: &AppConfig, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SaveFailed(format!("failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigError::SaveFailed(format!("failed to write to {}: {}", path, e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: "not a valid number".to_string(),
    })
}

/// Generate a sample configuration file with the defaults.
pub fn generate_sample_config(path: &str) -> Result<(), ConfigError> {
    ConfigLoader::new().save(&AppConfig::default(), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(ConfigLoader::new().validate(&config).is_ok());
        assert_eq!(config.game.round_padding_secs, 5);
        assert_eq!(config.game.history, 20);
    }

    #[test]
    fn out_of_range_safety_fraction_is_rejected() {
        let loader = ConfigLoader::new();
        let mut config = AppConfig::default();

        config.game.safety_single = 0.0;
        assert!(loader.validate(&config).is_err());

        config.game.safety_single = 1.5;
        assert!(loader.validate(&config).is_err());
    }

    #[test]
    fn empty_salt_is_rejected() {
        let mut config = AppConfig::default();
        config.game.salt = String::new();
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn save_and_load_round_trips() -> Result<(), ConfigError> {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut original = AppConfig::default();
        original.game.salt = "s3cr3t".to_string();
        original.game.history = 50;

        let loader = ConfigLoader::new();
        loader.save(&original, path)?;
        let loaded = ConfigLoader::new().with_path(path).load()?;

        assert_eq!(loaded.game.salt, "s3cr3t");
        assert_eq!(loaded.game.history, 50);
        assert_eq!(loaded.wallet.withdraw_timeout_ms, original.wallet.withdraw_timeout_ms);
        Ok(())
    }

    #[test]
    fn sample_config_loads_cleanly() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        generate_sample_config(path).unwrap();
        let loaded = ConfigLoader::new().with_path(path).load().unwrap();

        assert_eq!(loaded.system.name, "bustline");
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[game]\nsalt = \"only-this\"\n").unwrap();

        let loaded = ConfigLoader::new()
            .with_path(temp_file.path())
            .load()
            .unwrap();

        assert_eq!(loaded.game.salt, "only-this");
        assert_eq!(loaded.game.round_delay_secs, 5);
    }
}
