use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid value for {var}: '{value}' (expected {expected})")]
    InvalidEnv {
        var: String,
        value: String,
        expected: &'static str,
    },
    #[error("Unknown config field: '{0}'")]
    UnknownField(String),
    #[error("Invalid value for {field}: '{value}' (expected {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: &'static str,
    },
}

/// User preferences persisted as plain JSON in `config.json`.
/// The API key itself is never stored here; `default_key` is a key *name*
/// resolved through the encrypted key store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: u8,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u8,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_retention_days")]
    pub history_retention_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_key: Option<String>,
}

fn default_interval() -> u64 {
    60
}
fn default_warn_threshold() -> u8 {
    80
}
fn default_alert_threshold() -> u8 {
    95
}
fn default_output_format() -> String {
    "table".to_string()
}
fn default_retention_days() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            warn_threshold: default_warn_threshold(),
            alert_threshold: default_alert_threshold(),
            output_format: default_output_format(),
            history_retention_days: default_retention_days(),
            default_key: None,
        }
    }
}

/// Resolve the ormon config directory, respecting ORMON_CONFIG_DIR and
/// XDG_CONFIG_HOME.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ORMON_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join(".config")
        });
    base.join("ormon")
}

impl Config {
    pub fn config_path(dir: &Path) -> PathBuf {
        dir.join("config.json")
    }

    /// Load from the given directory, apply the env overlay, fall back to
    /// defaults if the file does not exist.
    pub fn load_from(dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::config_path(dir);
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env_overlay()?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_dir())
    }

    /// Serialize and write this config into `dir`.
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf, ConfigError> {
        std::fs::create_dir_all(dir)?;
        let path = Self::config_path(dir);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Overlay recognized ORMON_* environment variables. Each variable is
    /// parsed exactly once into its typed field; an unparsable value is a
    /// hard error rather than a silent fallback.
    fn apply_env_overlay(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = read_env("ORMON_INTERVAL") {
            self.interval = parse_env("ORMON_INTERVAL", &v, "a positive integer of seconds")?;
        }
        if let Some(v) = read_env("ORMON_WARN_THRESHOLD") {
            self.warn_threshold = parse_env("ORMON_WARN_THRESHOLD", &v, "a percentage 0-100")?;
        }
        if let Some(v) = read_env("ORMON_ALERT_THRESHOLD") {
            self.alert_threshold = parse_env("ORMON_ALERT_THRESHOLD", &v, "a percentage 0-100")?;
        }
        if let Some(v) = read_env("ORMON_OUTPUT_FORMAT") {
            self.output_format = v;
        }
        if let Some(v) = read_env("ORMON_HISTORY_RETENTION_DAYS") {
            self.history_retention_days =
                parse_env("ORMON_HISTORY_RETENTION_DAYS", &v, "a positive integer of days")?;
        }
        if let Some(v) = read_env("ORMON_DEFAULT_KEY") {
            self.default_key = Some(v);
        }
        Ok(())
    }

    /// Set a field by CLI name, with the same typed validation as the env
    /// overlay.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), ConfigError> {
        match field {
            "interval" => {
                self.interval = parse_field(field, value, "a positive integer of seconds")?
            }
            "warn_threshold" => {
                self.warn_threshold = parse_field(field, value, "a percentage 0-100")?
            }
            "alert_threshold" => {
                self.alert_threshold = parse_field(field, value, "a percentage 0-100")?
            }
            "output_format" => self.output_format = value.to_string(),
            "history_retention_days" => {
                self.history_retention_days =
                    parse_field(field, value, "a positive integer of days")?
            }
            "default_key" => self.default_key = Some(value.to_string()),
            other => return Err(ConfigError::UnknownField(other.to_string())),
        }
        Ok(())
    }

    pub fn get_field(&self, field: &str) -> Option<String> {
        match field {
            "interval" => Some(self.interval.to_string()),
            "warn_threshold" => Some(self.warn_threshold.to_string()),
            "alert_threshold" => Some(self.alert_threshold.to_string()),
            "output_format" => Some(self.output_format.clone()),
            "history_retention_days" => Some(self.history_retention_days.to_string()),
            "default_key" => self.default_key.clone(),
            _ => None,
        }
    }

    /// Validate the loaded config.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.interval == 0 {
            issues.push("interval must be at least 1 second".to_string());
        }
        if self.warn_threshold > 100 {
            issues.push(format!(
                "warn_threshold {} is not a percentage",
                self.warn_threshold
            ));
        }
        if self.alert_threshold > 100 {
            issues.push(format!(
                "alert_threshold {} is not a percentage",
                self.alert_threshold
            ));
        }
        if self.warn_threshold > self.alert_threshold {
            issues.push(format!(
                "warn_threshold ({}) exceeds alert_threshold ({})",
                self.warn_threshold, self.alert_threshold
            ));
        }
        if !["table", "json"].contains(&self.output_format.as_str()) {
            issues.push(format!(
                "Invalid output_format: '{}' (must be 'table' or 'json')",
                self.output_format
            ));
        }
        if self.history_retention_days == 0 {
            issues.push("history_retention_days must be at least 1".to_string());
        }
        issues
    }
}

fn read_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(
    var: &str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        expected,
    })
}

fn parse_field<T: std::str::FromStr>(
    field: &str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        expected,
    })
}
