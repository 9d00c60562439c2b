use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Paid,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "Free"),
            Self::Paid => write!(f, "Paid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierInfo {
    pub is_free: bool,
    pub name: Tier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsUsage {
    /// Credits consumed over the account lifetime (dollars)
    pub credits_used: f64,
    /// Credits purchased (dollars)
    pub total_credits: f64,
    /// Remaining balance, clamped to zero
    pub remaining_credits: f64,
    /// True when the key has no spending limit
    pub unlimited: bool,
    pub note: String,
}

/// Best-effort per-minute rate limit view.
///
/// `used`/`remaining` carry values only when the upstream response included
/// real-time `x-ratelimit-*` counters; otherwise both stay `None` and
/// `has_real_time_data` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitEstimate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<u32>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    pub reset_at: DateTime<Utc>,
    /// Upstream window description, e.g. "60s"
    pub interval: String,
    pub has_real_time_data: bool,
}

/// Policy-derived daily request ceiling. Upstream never reports the daily
/// used count; `local_tracked` is the only source of a concrete number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyLimitEstimate {
    /// None = unlimited (paid accounts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<u32>,
    pub reset_at: DateTime<Utc>,
    pub note: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_tracked: Option<LocalQuota>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyLimitEstimate {
    /// Credits spent against the key's monthly limit (dollars)
    pub used: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<f64>,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Warning => write!(f, "Warning"),
            Self::Critical => write!(f, "Critical"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub percentage: u8,
    pub message: String,
}

/// Daily quota view computed purely from the local request counter,
/// independent of anything upstream reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalQuota {
    pub used: u64,
    pub limit: u32,
    pub remaining: u64,
    pub percentage: u8,
    pub status: HealthStatus,
}

/// One point-in-time computed status for an API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Masked form only; the raw key never leaves the caller
    pub api_key_masked: String,
    pub timestamp: DateTime<Utc>,
    pub usage: CreditsUsage,
    pub tier: TierInfo,
    pub rate_limit: RateLimitEstimate,
    pub daily_limit: DailyLimitEstimate,
    pub monthly_limit: MonthlyLimitEstimate,
    pub health: HealthInfo,
}
