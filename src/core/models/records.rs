use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::models::snapshot::{HealthStatus, StatusSnapshot, Tier};

/// One polling observation, immutable once written.
///
/// Only a truncated digest of the API key is stored; per-key filtering works
/// without the key ever being recoverable from the history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub api_key_hash: String,
    pub credits_used: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_used: Option<u32>,
    pub rate_limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<u32>,
    pub tier: Tier,
    pub health_status: HealthStatus,
    pub health_percentage: u8,
    pub raw_snapshot: StatusSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Warning,
    Alert,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Alert => write!(f, "alert"),
        }
    }
}

/// A threshold crossing observed by the polling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub api_key_hash: String,
    pub alert_type: AlertType,
    pub message: String,
    pub threshold_value: u8,
    pub actual_value: u8,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub since_days: u32,
    /// Raw API key; hashed before comparison
    pub api_key: Option<String>,
    /// None = default 1000
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub since_days: u32,
    pub api_key: Option<String>,
    pub alert_type: Option<AlertType>,
    /// None = default 100
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ClearOptions {
    /// Only delete records strictly older than this many days
    pub older_than_days: Option<u32>,
    /// Only delete records for this key
    pub api_key: Option<String>,
}

/// Aggregates over a history window.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryStatistics {
    pub total_records: usize,
    pub avg_credits_used: f64,
    pub max_credits_used: f64,
    pub avg_health_percentage: f64,
    pub warning_count: usize,
    pub alert_count: usize,
}
