use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::core::error::MonitorError;
use crate::core::models::snapshot::{HealthStatus, LocalQuota};

const RETENTION_DAYS: i64 = 30;
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeyDayCounts {
    total: u64,
    #[serde(default)]
    models: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrackerData {
    /// date -> api key id -> counts
    #[serde(default)]
    daily_requests: BTreeMap<String, HashMap<String, KeyDayCounts>>,
    #[serde(default)]
    total_requests: u64,
    #[serde(default)]
    last_reset: String,
}

impl Default for TrackerData {
    fn default() -> Self {
        Self {
            daily_requests: BTreeMap::new(),
            total_requests: 0,
            last_reset: today_string(),
        }
    }
}

/// Request totals across a trailing window of calendar days.
#[derive(Debug, Clone, Serialize)]
pub struct RequestStats {
    pub total_days: u32,
    pub total_requests: u64,
    /// date -> requests that day, all keys combined
    pub daily_breakdown: BTreeMap<String, u64>,
    pub average_per_day: u64,
}

/// Today's counts broken down by key and by model.
#[derive(Debug, Clone, Serialize)]
pub struct TodayStats {
    pub date: String,
    pub total_requests: u64,
    pub api_keys: HashMap<String, u64>,
    pub models: HashMap<String, u64>,
}

fn today_string() -> String {
    Local::now().date_naive().format(DATE_FORMAT).to_string()
}

/// Per-day, per-key, per-model request counter.
///
/// The only authoritative source of "requests made today": upstream does not
/// report it. Every mutation is flushed straight to disk; request volume is
/// human-driven, so there is no write buffering.
pub struct RequestTracker {
    path: PathBuf,
    data: TrackerData,
}

impl RequestTracker {
    /// Open the counter file, starting fresh if it is missing or unreadable.
    pub fn open(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable request counter file; starting fresh");
                    TrackerData::default()
                }
            },
            Err(_) => TrackerData::default(),
        };
        Self {
            path: path.to_path_buf(),
            data,
        }
    }

    fn save(&self) -> Result<(), MonitorError> {
        let persist = |reason: String| MonitorError::Persistence {
            path: self.path.display().to_string(),
            reason,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| persist(e.to_string()))?;
        }
        let content =
            serde_json::to_string_pretty(&self.data).map_err(|e| persist(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(|e| persist(e.to_string()))
    }

    /// Count one request against today's partition. Each call is a distinct
    /// request event; rapid identical calls are all counted.
    ///
    /// The day partition rolls over lazily here: the first mutation on a new
    /// calendar day moves `last_reset` and prunes partitions older than 30
    /// days. A failed save is a hard error; this path has no fallback.
    pub fn record_request(&mut self, api_key_id: &str, model: &str) -> Result<(), MonitorError> {
        self.record_request_on(Local::now().date_naive(), api_key_id, model)
    }

    fn record_request_on(
        &mut self,
        today: NaiveDate,
        api_key_id: &str,
        model: &str,
    ) -> Result<(), MonitorError> {
        let today_str = today.format(DATE_FORMAT).to_string();
        if self.data.last_reset != today_str {
            self.rollover(today);
        }

        let day = self.data.daily_requests.entry(today_str).or_default();
        let counts = day.entry(api_key_id.to_string()).or_default();
        counts.total += 1;
        *counts.models.entry(model.to_string()).or_insert(0) += 1;
        self.data.total_requests += 1;

        self.save()
    }

    fn rollover(&mut self, today: NaiveDate) {
        self.data.last_reset = today.format(DATE_FORMAT).to_string();
        let cutoff = (today - Duration::days(RETENTION_DAYS))
            .format(DATE_FORMAT)
            .to_string();
        self.data.daily_requests.retain(|date, _| date >= &cutoff);
    }

    pub fn today_count(&self, api_key_id: &str) -> u64 {
        self.count_on(Local::now().date_naive(), api_key_id)
    }

    fn count_on(&self, date: NaiveDate, api_key_id: &str) -> u64 {
        let date_str = date.format(DATE_FORMAT).to_string();
        self.data
            .daily_requests
            .get(&date_str)
            .and_then(|day| day.get(api_key_id))
            .map(|counts| counts.total)
            .unwrap_or(0)
    }

    /// Daily quota view for the given policy limit, computed purely from
    /// local counts.
    pub fn quota_info(&self, daily_limit: u32, api_key_id: &str) -> LocalQuota {
        self.quota_info_on(Local::now().date_naive(), daily_limit, api_key_id)
    }

    fn quota_info_on(&self, date: NaiveDate, daily_limit: u32, api_key_id: &str) -> LocalQuota {
        let used = self.count_on(date, api_key_id);
        let remaining = u64::from(daily_limit).saturating_sub(used);
        let percentage = if daily_limit > 0 {
            (used as f64 / f64::from(daily_limit) * 100.0)
                .round()
                .clamp(0.0, 100.0) as u8
        } else {
            0
        };
        let status = if percentage > 95 {
            HealthStatus::Critical
        } else if percentage > 80 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };
        LocalQuota {
            used,
            limit: daily_limit,
            remaining,
            percentage,
            status,
        }
    }

    /// Totals over the last `days` calendar days ending today inclusive,
    /// summed across all API keys.
    pub fn history_stats(&self, days: u32) -> RequestStats {
        self.history_stats_on(Local::now().date_naive(), days)
    }

    fn history_stats_on(&self, today: NaiveDate, days: u32) -> RequestStats {
        let mut breakdown = BTreeMap::new();
        let mut total = 0u64;
        for offset in 0..days {
            let date = today - Duration::days(i64::from(offset));
            let date_str = date.format(DATE_FORMAT).to_string();
            let day_total: u64 = self
                .data
                .daily_requests
                .get(&date_str)
                .map(|day| day.values().map(|counts| counts.total).sum())
                .unwrap_or(0);
            total += day_total;
            breakdown.insert(date_str, day_total);
        }
        let average = if days > 0 {
            (total as f64 / f64::from(days)).round() as u64
        } else {
            0
        };
        RequestStats {
            total_days: days,
            total_requests: total,
            daily_breakdown: breakdown,
            average_per_day: average,
        }
    }

    /// Today's per-key and per-model breakdown.
    pub fn today_details(&self) -> TodayStats {
        self.today_details_on(Local::now().date_naive())
    }

    fn today_details_on(&self, today: NaiveDate) -> TodayStats {
        let date = today.format(DATE_FORMAT).to_string();
        let mut stats = TodayStats {
            date: date.clone(),
            total_requests: 0,
            api_keys: HashMap::new(),
            models: HashMap::new(),
        };
        if let Some(day) = self.data.daily_requests.get(&date) {
            for (key, counts) in day {
                stats.total_requests += counts.total;
                stats.api_keys.insert(key.clone(), counts.total);
                for (model, count) in &counts.models {
                    *stats.models.entry(model.clone()).or_insert(0) += count;
                }
            }
        }
        stats
    }

    /// Drop all counter data and persist the empty state.
    pub fn clear(&mut self) -> Result<(), MonitorError> {
        self.data = TrackerData::default();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_in(dir: &tempfile::TempDir) -> RequestTracker {
        RequestTracker::open(&dir.path().join("requests.json"))
    }

    #[test]
    fn counts_accumulate_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let today = Local::now().date_naive();
        tracker.record_request_on(today, "k1", "m1").unwrap();
        tracker.record_request_on(today, "k1", "m1").unwrap();
        tracker.record_request_on(today, "k1", "m1").unwrap();
        tracker.record_request_on(today, "k1", "m2").unwrap();
        assert_eq!(tracker.count_on(today, "k1"), 4);
        assert_eq!(tracker.count_on(today, "k2"), 0);
    }

    #[test]
    fn quota_info_matches_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let today = Local::now().date_naive();
        for _ in 0..3 {
            tracker.record_request_on(today, "k1", "m1").unwrap();
        }
        tracker.record_request_on(today, "k1", "m2").unwrap();

        let quota = tracker.quota_info_on(today, 50, "k1");
        assert_eq!(quota.used, 4);
        assert_eq!(quota.remaining, 46);
        assert_eq!(quota.percentage, 8);
        assert_eq!(quota.status, HealthStatus::Healthy);
    }

    #[test]
    fn quota_info_zero_limit_is_zero_percent() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(&dir);
        let quota = tracker.quota_info_on(Local::now().date_naive(), 0, "k1");
        assert_eq!(quota.percentage, 0);
        assert_eq!(quota.remaining, 0);
        assert_eq!(quota.status, HealthStatus::Healthy);
    }

    #[test]
    fn quota_status_uses_strict_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let today = Local::now().date_naive();
        for _ in 0..95 {
            tracker.record_request_on(today, "k1", "m").unwrap();
        }
        // 95/100 is warning, not critical
        assert_eq!(
            tracker.quota_info_on(today, 100, "k1").status,
            HealthStatus::Warning
        );
        tracker.record_request_on(today, "k1", "m").unwrap();
        assert_eq!(
            tracker.quota_info_on(today, 100, "k1").status,
            HealthStatus::Critical
        );
    }

    #[test]
    fn quota_remaining_clamps_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let today = Local::now().date_naive();
        for _ in 0..7 {
            tracker.record_request_on(today, "k1", "m").unwrap();
        }
        let quota = tracker.quota_info_on(today, 5, "k1");
        assert_eq!(quota.remaining, 0);
        assert_eq!(quota.percentage, 100);
    }

    #[test]
    fn rollover_prunes_partitions_older_than_30_days() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let old_day = Local::now().date_naive() - Duration::days(45);
        let recent_day = Local::now().date_naive() - Duration::days(5);
        tracker.record_request_on(old_day, "k1", "m").unwrap();
        tracker.record_request_on(recent_day, "k1", "m").unwrap();

        // First mutation on a later day triggers the rollover
        let today = Local::now().date_naive();
        tracker.record_request_on(today, "k1", "m").unwrap();

        assert_eq!(tracker.count_on(old_day, "k1"), 0);
        assert_eq!(tracker.count_on(recent_day, "k1"), 1);
        assert_eq!(tracker.count_on(today, "k1"), 1);
    }

    #[test]
    fn history_stats_sums_across_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let today = Local::now().date_naive();
        let yesterday = today - Duration::days(1);
        tracker.record_request_on(yesterday, "k1", "m").unwrap();
        tracker.record_request_on(yesterday, "k2", "m").unwrap();
        tracker.record_request_on(today, "k1", "m").unwrap();

        let stats = tracker.history_stats_on(today, 7);
        assert_eq!(stats.total_days, 7);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.daily_breakdown.len(), 7);
        assert_eq!(
            stats.daily_breakdown[&yesterday.format(DATE_FORMAT).to_string()],
            2
        );
        // round(3/7) = 0
        assert_eq!(stats.average_per_day, 0);
    }

    #[test]
    fn history_stats_average_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let today = Local::now().date_naive();
        for _ in 0..10 {
            tracker.record_request_on(today, "k1", "m").unwrap();
        }
        let stats = tracker.history_stats_on(today, 3);
        // round(10/3) = 3
        assert_eq!(stats.average_per_day, 3);
    }

    #[test]
    fn today_details_breaks_down_models() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let today = Local::now().date_naive();
        tracker.record_request_on(today, "k1", "m1").unwrap();
        tracker.record_request_on(today, "k1", "m2").unwrap();
        tracker.record_request_on(today, "k2", "m1").unwrap();

        let details = tracker.today_details_on(today);
        assert_eq!(details.total_requests, 3);
        assert_eq!(details.api_keys["k1"], 2);
        assert_eq!(details.api_keys["k2"], 1);
        assert_eq!(details.models["m1"], 2);
        assert_eq!(details.models["m2"], 1);
    }

    #[test]
    fn counts_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");
        let today = Local::now().date_naive();
        {
            let mut tracker = RequestTracker::open(&path);
            tracker.record_request_on(today, "k1", "m1").unwrap();
            tracker.record_request_on(today, "k1", "m1").unwrap();
        }
        let tracker = RequestTracker::open(&path);
        assert_eq!(tracker.count_on(today, "k1"), 2);
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");
        std::fs::write(&path, "{not json").unwrap();
        let tracker = RequestTracker::open(&path);
        assert_eq!(tracker.count_on(Local::now().date_naive(), "k1"), 0);
    }

    #[test]
    fn clear_resets_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let today = Local::now().date_naive();
        tracker.record_request_on(today, "k1", "m1").unwrap();
        tracker.clear().unwrap();
        assert_eq!(tracker.count_on(today, "k1"), 0);
        assert_eq!(tracker.history_stats_on(today, 7).total_requests, 0);
    }
}
