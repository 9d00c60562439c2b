use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::core::models::records::{
    AlertQuery, AlertRecord, AlertType, ClearOptions, HistoryQuery, HistoryStatistics,
    HistoryRecord,
};
use crate::core::models::snapshot::StatusSnapshot;

const DEFAULT_QUERY_LIMIT: usize = 1000;
const DEFAULT_ALERT_QUERY_LIMIT: usize = 100;

/// Deterministic one-way identifier for an API key: SHA-256 digest truncated
/// to 16 hex characters. Enables per-key filtering without recoverability.
pub fn hash_api_key(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Append-only log of polling snapshots and threshold-crossing alerts,
/// persisted as JSON arrays in `history.json` and `alerts.json`.
///
/// Recording never fails the caller: history must not block the status or
/// alerting flow, so write errors are logged and absorbed.
pub struct HistoryStore {
    dir: PathBuf,
    retention_days: u32,
}

impl HistoryStore {
    pub fn open(dir: &Path, retention_days: u32) -> Self {
        Self {
            dir: dir.to_path_buf(),
            retention_days,
        }
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join("history.json")
    }

    fn alerts_path(&self) -> PathBuf {
        self.dir.join("alerts.json")
    }

    fn load<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Vec<T> {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable history file; treating as empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    fn save<T: serde::Serialize>(&self, path: &Path, records: &[T]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string(records)?;
        std::fs::write(path, content)
    }

    /// Append a snapshot observation. Errors are logged, never propagated.
    pub fn record(&self, snapshot: &StatusSnapshot, api_key: &str) {
        let record = HistoryRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: snapshot.timestamp,
            api_key_hash: hash_api_key(api_key),
            credits_used: snapshot.usage.credits_used,
            credits_limit: snapshot.monthly_limit.limit,
            rate_used: snapshot.rate_limit.used,
            rate_limit: snapshot.rate_limit.limit,
            daily_used: snapshot.daily_limit.local_tracked.as_ref().map(|q| q.used),
            daily_limit: snapshot.daily_limit.limit,
            tier: snapshot.tier.name,
            health_status: snapshot.health.status,
            health_percentage: snapshot.health.percentage,
            raw_snapshot: snapshot.clone(),
        };

        let mut records: Vec<HistoryRecord> = self.load(&self.history_path());
        records.push(record);
        if let Err(e) = self.save(&self.history_path(), &records) {
            warn!(error = %e, "Failed to record history entry");
            return;
        }
        self.prune_older_than(self.retention_days);
    }

    /// Append a threshold-crossing alert. Errors are logged, never propagated.
    pub fn record_alert(
        &self,
        api_key: &str,
        alert_type: AlertType,
        message: &str,
        threshold_value: u8,
        actual_value: u8,
    ) {
        let record = AlertRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            api_key_hash: hash_api_key(api_key),
            alert_type,
            message: message.to_string(),
            threshold_value,
            actual_value,
        };

        let mut records: Vec<AlertRecord> = self.load(&self.alerts_path());
        records.push(record);
        if let Err(e) = self.save(&self.alerts_path(), &records) {
            warn!(error = %e, "Failed to record alert entry");
        }
    }

    /// Records within the window, newest first, truncated to the limit.
    pub fn query(&self, query: &HistoryQuery) -> Vec<HistoryRecord> {
        let cutoff = Utc::now() - Duration::days(i64::from(query.since_days));
        let key_hash = query.api_key.as_deref().map(hash_api_key);

        let mut records: Vec<HistoryRecord> = self
            .load::<HistoryRecord>(&self.history_path())
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .filter(|r| key_hash.as_deref().is_none_or(|h| r.api_key_hash == h))
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(query.limit.unwrap_or(DEFAULT_QUERY_LIMIT));
        records
    }

    /// Alerts within the window, newest first.
    pub fn alert_query(&self, query: &AlertQuery) -> Vec<AlertRecord> {
        let cutoff = Utc::now() - Duration::days(i64::from(query.since_days));
        let key_hash = query.api_key.as_deref().map(hash_api_key);

        let mut records: Vec<AlertRecord> = self
            .load::<AlertRecord>(&self.alerts_path())
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .filter(|r| key_hash.as_deref().is_none_or(|h| r.api_key_hash == h))
            .filter(|r| query.alert_type.is_none_or(|t| r.alert_type == t))
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(query.limit.unwrap_or(DEFAULT_ALERT_QUERY_LIMIT));
        records
    }

    /// Drop records strictly older than the cutoff from both logs.
    pub fn prune_older_than(&self, retention_days: u32) {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));

        let records: Vec<HistoryRecord> = self.load(&self.history_path());
        let kept: Vec<HistoryRecord> = records
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .collect();
        if let Err(e) = self.save(&self.history_path(), &kept) {
            warn!(error = %e, "Failed to prune history");
        }

        let alerts: Vec<AlertRecord> = self.load(&self.alerts_path());
        let kept: Vec<AlertRecord> = alerts
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .collect();
        if let Err(e) = self.save(&self.alerts_path(), &kept) {
            warn!(error = %e, "Failed to prune alerts");
        }
    }

    /// Delete matching records from both logs, returning how many went away.
    ///
    /// With `older_than_days`, only records older than the cutoff (and
    /// matching the key, if given) are deleted; without it, everything
    /// matching the key (or simply everything) goes.
    pub fn clear(&self, options: &ClearOptions) -> usize {
        let cutoff = options
            .older_than_days
            .map(|days| Utc::now() - Duration::days(i64::from(days)));
        let key_hash = options.api_key.as_deref().map(hash_api_key);

        let should_delete = |timestamp: chrono::DateTime<Utc>, hash: &str| {
            cutoff.is_none_or(|c| timestamp < c)
                && key_hash.as_deref().is_none_or(|h| hash == h)
        };

        let mut deleted = 0usize;

        let records: Vec<HistoryRecord> = self.load(&self.history_path());
        let kept: Vec<HistoryRecord> = records
            .into_iter()
            .filter(|r| {
                let delete = should_delete(r.timestamp, &r.api_key_hash);
                if delete {
                    deleted += 1;
                }
                !delete
            })
            .collect();
        if let Err(e) = self.save(&self.history_path(), &kept) {
            warn!(error = %e, "Failed to rewrite history during clear");
        }

        let alerts: Vec<AlertRecord> = self.load(&self.alerts_path());
        let kept: Vec<AlertRecord> = alerts
            .into_iter()
            .filter(|r| {
                let delete = should_delete(r.timestamp, &r.api_key_hash);
                if delete {
                    deleted += 1;
                }
                !delete
            })
            .collect();
        if let Err(e) = self.save(&self.alerts_path(), &kept) {
            warn!(error = %e, "Failed to rewrite alerts during clear");
        }

        deleted
    }

    /// Aggregates over the query window.
    pub fn statistics(&self, since_days: u32, api_key: Option<&str>) -> HistoryStatistics {
        let records = self.query(&HistoryQuery {
            since_days,
            api_key: api_key.map(str::to_string),
            limit: Some(usize::MAX),
        });
        let alerts = self.alert_query(&AlertQuery {
            since_days,
            api_key: api_key.map(str::to_string),
            alert_type: None,
            limit: Some(usize::MAX),
        });

        let count = records.len();
        let sum_credits: f64 = records.iter().map(|r| r.credits_used).sum();
        let max_credits = records
            .iter()
            .map(|r| r.credits_used)
            .fold(0.0_f64, f64::max);
        let sum_health: u64 = records
            .iter()
            .map(|r| u64::from(r.health_percentage))
            .sum();

        HistoryStatistics {
            total_records: count,
            avg_credits_used: if count > 0 {
                sum_credits / count as f64
            } else {
                0.0
            },
            max_credits_used: max_credits,
            avg_health_percentage: if count > 0 {
                sum_health as f64 / count as f64
            } else {
                0.0
            },
            warning_count: alerts
                .iter()
                .filter(|a| a.alert_type == AlertType::Warning)
                .count(),
            alert_count: alerts
                .iter()
                .filter(|a| a.alert_type == AlertType::Alert)
                .count(),
        }
    }
}
