use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::config::Config;
use crate::core::error::MonitorError;
use crate::core::estimator::attach_local_quota;
use crate::core::fetcher::{KeyTestReport, StatusFetcher};
use crate::core::history::{hash_api_key, HistoryStore};
use crate::core::keys::KeyStore;
use crate::core::models::records::{
    AlertQuery, AlertRecord, ClearOptions, HistoryQuery, HistoryRecord, HistoryStatistics,
};
use crate::core::models::snapshot::StatusSnapshot;
use crate::core::tracker::{RequestStats, RequestTracker, TodayStats};
use crate::core::watch::{StatusCheck, WatchConfig, WatchController, WatchEvents};

const REQUESTS_FILE: &str = ".openrouter-requests.json";

#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    /// Raw API key, taking precedence over everything else
    pub api_key: Option<String>,
    /// Named key from the encrypted store
    pub key_name: Option<String>,
    /// Bypass the fetch cache
    pub refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimitAnalysis {
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimitsReport {
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
    pub analysis: LimitAnalysis,
}

/// Risk assessment over a snapshot's limit views.
pub fn analyze_limits(snapshot: &StatusSnapshot) -> LimitAnalysis {
    let mut analysis = LimitAnalysis {
        risk_level: RiskLevel::Low,
        recommendations: Vec::new(),
    };

    if let Some(used) = snapshot.rate_limit.used {
        if snapshot.rate_limit.limit > 0
            && f64::from(used) / f64::from(snapshot.rate_limit.limit) > 0.8
        {
            analysis.risk_level = RiskLevel::High;
            analysis
                .recommendations
                .push("Slow down or wait for the rate window to reset".to_string());
        }
    }

    if let Some(quota) = &snapshot.daily_limit.local_tracked {
        if quota.limit > 0 && quota.used as f64 / f64::from(quota.limit) > 0.8 {
            analysis.risk_level = RiskLevel::High;
            analysis
                .recommendations
                .push("Daily quota is nearly exhausted; defer bulk requests to tomorrow".to_string());
        }
    }

    analysis
}

fn lock_tracker(tracker: &Mutex<RequestTracker>) -> std::sync::MutexGuard<'_, RequestTracker> {
    tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Merge the locally-tracked daily quota into a fresh snapshot. Only adds
/// the overlay; upstream fields stay as the estimator produced them.
fn apply_local_overlay(tracker: &Mutex<RequestTracker>, snapshot: &mut StatusSnapshot, api_key: &str) {
    if let Some(limit) = snapshot.daily_limit.limit {
        let quota = lock_tracker(tracker).quota_info(limit, &hash_api_key(api_key));
        attach_local_quota(snapshot, quota);
    }
}

/// Options for a monitoring session; unset values fall back to the config.
#[derive(Default)]
pub struct MonitorOptions {
    pub status: StatusOptions,
    pub interval: Option<u64>,
    pub warn_threshold: Option<u8>,
    pub alert_threshold: Option<u8>,
    pub events: WatchEvents,
}

/// Entry point consumed by the CLI layer: owns the fetcher, the key store,
/// the request counter and the history store, all rooted in one directory.
pub struct Monitor {
    config: Config,
    fetcher: Arc<StatusFetcher>,
    history: Arc<HistoryStore>,
    tracker: Arc<Mutex<RequestTracker>>,
    keys: KeyStore,
}

impl Monitor {
    pub fn open(dir: &Path) -> Result<Self, MonitorError> {
        let config = Config::load_from(dir)?;
        let history = Arc::new(HistoryStore::open(dir, config.history_retention_days));
        let tracker = Arc::new(Mutex::new(RequestTracker::open(&dir.join(REQUESTS_FILE))));
        let keys = KeyStore::open(dir)?;
        Ok(Self {
            config,
            fetcher: Arc::new(StatusFetcher::new()?),
            history,
            tracker,
            keys,
        })
    }

    pub fn open_default() -> Result<Self, MonitorError> {
        Self::open(&crate::core::config::config_dir())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Resolve the key to use: explicit raw key, then a named store entry
    /// (`--key` or the configured default), then the environment.
    pub fn resolve_api_key(&self, opts: &StatusOptions) -> Result<String, MonitorError> {
        if let Some(key) = &opts.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }

        let name = opts.key_name.as_ref().or(self.config.default_key.as_ref());
        if let Some(name) = name {
            let entry = self.keys.get(name)?;
            self.keys.touch(name)?;
            return Ok(entry.key);
        }

        match std::env::var("OPENROUTER_API_KEY") {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(MonitorError::MissingApiKey),
        }
    }

    /// Fetch the current status, with the local daily overlay attached.
    pub async fn get_status(&self, opts: &StatusOptions) -> Result<StatusSnapshot, MonitorError> {
        let api_key = self.resolve_api_key(opts)?;
        let mut snapshot = self.fetcher.fetch_status(&api_key, opts.refresh).await?;
        apply_local_overlay(&self.tracker, &mut snapshot, &api_key);
        Ok(snapshot)
    }

    /// Status plus a risk analysis over the limit views.
    pub async fn get_limits(&self, opts: &StatusOptions) -> Result<LimitsReport, MonitorError> {
        let snapshot = self.get_status(opts).await?;
        let analysis = analyze_limits(&snapshot);
        Ok(LimitsReport { snapshot, analysis })
    }

    /// Spawn the polling loop. The returned controller owns its lifecycle;
    /// dropping it does not stop the loop, calling `stop()` does.
    pub fn start_monitoring(&self, opts: MonitorOptions) -> Result<WatchController, MonitorError> {
        let api_key = self.resolve_api_key(&opts.status)?;

        let watch_config = WatchConfig {
            interval: Duration::from_secs(opts.interval.unwrap_or(self.config.interval)),
            warn_threshold: opts.warn_threshold.unwrap_or(self.config.warn_threshold),
            alert_threshold: opts.alert_threshold.unwrap_or(self.config.alert_threshold),
        };

        let fetcher = Arc::clone(&self.fetcher);
        let tracker = Arc::clone(&self.tracker);
        let check_key = api_key.clone();
        let check: StatusCheck = Box::new(move || {
            let fetcher = Arc::clone(&fetcher);
            let tracker = Arc::clone(&tracker);
            let api_key = check_key.clone();
            Box::pin(async move {
                let mut snapshot = fetcher.fetch_status(&api_key, false).await?;
                apply_local_overlay(&tracker, &mut snapshot, &api_key);
                Ok(snapshot)
            })
        });

        Ok(WatchController::start(
            watch_config,
            check,
            Some((Arc::clone(&self.history), api_key)),
            opts.events,
        ))
    }

    pub fn get_history(&self, query: &HistoryQuery) -> Vec<HistoryRecord> {
        self.history.query(query)
    }

    pub fn get_alerts(&self, query: &AlertQuery) -> Vec<AlertRecord> {
        self.history.alert_query(query)
    }

    pub fn clear_history(&self, options: &ClearOptions) -> usize {
        self.history.clear(options)
    }

    pub fn statistics(&self, since_days: u32, api_key: Option<&str>) -> HistoryStatistics {
        self.history.statistics(since_days, api_key)
    }

    /// Probe a key against the live API without touching the stores.
    pub async fn test_api_key(&self, api_key: &str) -> KeyTestReport {
        self.fetcher.test_api_key(api_key).await
    }

    /// Count one local request for the resolved key, returning that key's
    /// total for today.
    pub fn record_request(&self, opts: &StatusOptions, model: &str) -> Result<u64, MonitorError> {
        let api_key = self.resolve_api_key(opts)?;
        let key_id = hash_api_key(&api_key);
        let mut tracker = lock_tracker(&self.tracker);
        tracker.record_request(&key_id, model)?;
        Ok(tracker.today_count(&key_id))
    }

    pub fn request_stats(&self, days: u32) -> RequestStats {
        lock_tracker(&self.tracker).history_stats(days)
    }

    pub fn today_details(&self) -> TodayStats {
        lock_tracker(&self.tracker).today_details()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::estimator::{estimate, RateLimitHeaders, UpstreamData};
    use crate::core::models::snapshot::{HealthStatus, LocalQuota};
    use chrono::Utc;

    fn snapshot_with_rate(used: u32, limit: u32) -> StatusSnapshot {
        estimate(
            &UpstreamData {
                api_key: "sk-or-v1-0123456789abcdef".to_string(),
                monthly_usage: 0.0,
                monthly_limit: None,
                is_free_tier: true,
                rate_limit: None,
                total_credits: 15.0,
                total_usage: 1.0,
                rate_headers: Some(RateLimitHeaders {
                    limit,
                    remaining: limit - used,
                    reset_at: None,
                }),
            },
            Utc::now(),
        )
    }

    #[test]
    fn analysis_is_low_risk_by_default() {
        let analysis = analyze_limits(&snapshot_with_rate(2, 20));
        assert_eq!(analysis.risk_level, RiskLevel::Low);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn analysis_flags_hot_rate_window() {
        let analysis = analyze_limits(&snapshot_with_rate(17, 20));
        assert_eq!(analysis.risk_level, RiskLevel::High);
        assert_eq!(analysis.recommendations.len(), 1);
    }

    #[test]
    fn analysis_flags_exhausted_daily_quota() {
        let mut snapshot = snapshot_with_rate(2, 20);
        attach_local_quota(
            &mut snapshot,
            LocalQuota {
                used: 45,
                limit: 50,
                remaining: 5,
                percentage: 90,
                status: HealthStatus::Warning,
            },
        );
        let analysis = analyze_limits(&snapshot);
        assert_eq!(analysis.risk_level, RiskLevel::High);
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.contains("Daily quota")));
    }

    #[test]
    fn resolve_key_prefers_explicit_raw_key() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Monitor::open(dir.path()).unwrap();
        monitor.keys().add("work", "sk-or-v1-named").unwrap();

        let key = monitor
            .resolve_api_key(&StatusOptions {
                api_key: Some("sk-or-v1-explicit".to_string()),
                key_name: Some("work".to_string()),
                refresh: false,
            })
            .unwrap();
        assert_eq!(key, "sk-or-v1-explicit");
    }

    #[test]
    fn resolve_key_uses_named_store_entry() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Monitor::open(dir.path()).unwrap();
        monitor.keys().add("work", "sk-or-v1-named").unwrap();

        let key = monitor
            .resolve_api_key(&StatusOptions {
                api_key: None,
                key_name: Some("work".to_string()),
                refresh: false,
            })
            .unwrap();
        assert_eq!(key, "sk-or-v1-named");

        // Resolution marks the key as used
        let entry = monitor.keys().get("work").unwrap();
        assert!(entry.last_used.is_some());
    }

    #[test]
    fn resolve_key_unknown_name_errors() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Monitor::open(dir.path()).unwrap();
        let err = monitor
            .resolve_api_key(&StatusOptions {
                api_key: None,
                key_name: Some("nope".to_string()),
                refresh: false,
            })
            .unwrap_err();
        assert!(matches!(err, MonitorError::KeyStore(_)));
    }

    #[test]
    fn record_request_feeds_stats() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Monitor::open(dir.path()).unwrap();
        let opts = StatusOptions {
            api_key: Some("sk-or-v1-0123456789abcdef".to_string()),
            ..Default::default()
        };
        monitor.record_request(&opts, "openai/gpt-4o").unwrap();
        monitor.record_request(&opts, "openai/gpt-4o").unwrap();
        let count = monitor
            .record_request(&opts, "anthropic/claude-sonnet")
            .unwrap();
        assert_eq!(count, 3);

        let stats = monitor.request_stats(7);
        assert_eq!(stats.total_requests, 3);

        let today = monitor.today_details();
        assert_eq!(today.models["openai/gpt-4o"], 2);
        assert_eq!(today.models["anthropic/claude-sonnet"], 1);
    }

    #[test]
    fn tracker_file_contains_no_raw_key() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Monitor::open(dir.path()).unwrap();
        let raw = "sk-or-v1-0123456789abcdef";
        let opts = StatusOptions {
            api_key: Some(raw.to_string()),
            ..Default::default()
        };
        monitor.record_request(&opts, "m").unwrap();

        let content = std::fs::read_to_string(dir.path().join(REQUESTS_FILE)).unwrap();
        assert!(!content.contains(raw));
        assert!(content.contains(&hash_api_key(raw)));
    }

    #[test]
    fn overlay_uses_tracked_counts() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Monitor::open(dir.path()).unwrap();
        let raw = "sk-or-v1-0123456789abcdef";
        let opts = StatusOptions {
            api_key: Some(raw.to_string()),
            ..Default::default()
        };
        for _ in 0..4 {
            monitor.record_request(&opts, "m").unwrap();
        }

        let mut snapshot = snapshot_with_rate(2, 20);
        apply_local_overlay(&monitor.tracker, &mut snapshot, raw);
        let quota = snapshot.daily_limit.local_tracked.unwrap();
        assert_eq!(quota.used, 4);
        assert_eq!(quota.limit, 1000);
        assert_eq!(quota.remaining, 996);
    }
}
