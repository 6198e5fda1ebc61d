//! Runtime configuration
//!
//! Read from `config/warden.yaml` when present, then overridden by
//! environment variables.

use crate::moderation::{PipelineSettings, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default configuration file
pub const CONFIG_FILE: &str = "config/warden.yaml";

pub const TOKEN_VAR: &str = "DISCORD_TOKEN";
pub const DATA_DIR_VAR: &str = "WARDEN_DATA_DIR";
pub const TICK_SECS_VAR: &str = "WARDEN_TICK_SECS";
pub const SPAM_SWEEP_SECS_VAR: &str = "WARDEN_SPAM_SWEEP_SECS";
pub const ACTION_TIMEOUT_SECS_VAR: &str = "WARDEN_ACTION_TIMEOUT_SECS";

/// Discord deletes at most 7 days of messages on ban
const MAX_PRUNE_DAYS: u8 = 7;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{name} must be set")]
    MissingVar { name: &'static str },

    #[error("Invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bot configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Directory holding persisted guild state
    pub data_dir: PathBuf,
    /// Seconds between punishment ticks
    pub tick_secs: u64,
    /// Seconds between spam state sweeps
    pub spam_sweep_secs: u64,
    /// Seconds before an outbound Discord call is abandoned
    pub action_timeout_secs: u64,
    /// Days of messages deleted on ban
    pub ban_prune_days: u8,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            tick_secs: 60,
            spam_sweep_secs: 3600,
            action_timeout_secs: 10,
            ban_prune_days: 0,
        }
    }
}

impl BotConfig {
    /// Load the config file (if any) and apply environment overrides
    ///
    /// # Errors
    /// Fails if the file can't be read or parsed, or a value is out of range.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path).await?;
            info!("Loaded configuration from {}", path.display());
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from variables returned by `var`
    ///
    /// # Errors
    /// Fails if a numeric variable doesn't parse.
    pub fn apply_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = var(DATA_DIR_VAR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_var(&var, TICK_SECS_VAR)? {
            self.tick_secs = secs;
        }
        if let Some(secs) = parse_var(&var, SPAM_SWEEP_SECS_VAR)? {
            self.spam_sweep_secs = secs;
        }
        if let Some(secs) = parse_var(&var, ACTION_TIMEOUT_SECS_VAR)? {
            self.action_timeout_secs = secs;
        }
        Ok(())
    }

    /// Check that all intervals are positive and prune days are in range
    ///
    /// # Errors
    /// Returns `Invalid` describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_secs == 0 || self.spam_sweep_secs == 0 || self.action_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "Intervals and timeouts must be at least 1 second".to_string(),
            ));
        }
        if self.ban_prune_days > MAX_PRUNE_DAYS {
            return Err(ConfigError::Invalid(format!(
                "ban_prune_days must be at most {MAX_PRUNE_DAYS}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_secs(self.tick_secs),
            spam_sweep_interval: Duration::from_secs(self.spam_sweep_secs),
        }
    }

    #[must_use]
    pub fn pipeline_settings(&self, bot_user_id: u64) -> PipelineSettings {
        PipelineSettings {
            bot_user_id,
            action_timeout: Duration::from_secs(self.action_timeout_secs),
            ban_prune_days: self.ban_prune_days,
        }
    }
}

fn parse_var(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVar { name, value })
        })
        .transpose()
}

/// Read the bot token from the environment
///
/// # Errors
/// Returns `MissingVar` if `DISCORD_TOKEN` is unset or empty.
pub fn discord_token() -> Result<String, ConfigError> {
    std::env::var(TOKEN_VAR)
        .ok()
        .filter(|token| !token.trim().is_empty())
        .ok_or(ConfigError::MissingVar { name: TOKEN_VAR })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.scheduler_config(), SchedulerConfig::default());
        assert_eq!(
            config.pipeline_settings(5).action_timeout,
            Duration::from_secs(10)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BotConfig::default();
        config
            .apply_overrides(vars(&[
                (DATA_DIR_VAR, "/var/lib/warden"),
                (TICK_SECS_VAR, "30"),
                (ACTION_TIMEOUT_SECS_VAR, " 3 "),
            ]))
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/warden"));
        assert_eq!(config.tick_secs, 30);
        assert_eq!(config.spam_sweep_secs, 3600);
        assert_eq!(config.action_timeout_secs, 3);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = BotConfig::default();
        let err = config
            .apply_overrides(vars(&[(SPAM_SWEEP_SECS_VAR, "hourly")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar {
                name: SPAM_SWEEP_SECS_VAR,
                ..
            }
        ));
    }

    #[test]
    fn test_validation() {
        let config = BotConfig {
            tick_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BotConfig {
            ban_prune_days: 8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("warden.yaml");
        tokio::fs::write(&path, "tick_secs: 15\nban_prune_days: 1\n")
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let config: BotConfig = serde_yaml::from_str(&content).unwrap();
        assert_eq!(config.tick_secs, 15);
        assert_eq!(config.ban_prune_days, 1);
        assert_eq!(config.action_timeout_secs, 10);
    }
}
