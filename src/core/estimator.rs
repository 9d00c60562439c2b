use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::warn;

use crate::core::models::snapshot::{
    CreditsUsage, DailyLimitEstimate, HealthInfo, HealthStatus, LocalQuota, MonthlyLimitEstimate,
    RateLimitEstimate, StatusSnapshot, Tier, TierInfo,
};

/// Documented free-tier ceiling when upstream reports no rate limit.
pub const DEFAULT_RATE_LIMIT: u32 = 20;
pub const DEFAULT_RATE_INTERVAL: &str = "60s";

/// Rate limit object from the auth/key endpoint, e.g. `{requests: 20, interval: "60s"}`.
#[derive(Debug, Clone)]
pub struct UpstreamRateLimit {
    pub requests: u32,
    pub interval: String,
}

/// Real-time counters from `x-ratelimit-*` response headers, when upstream
/// chose to send them.
#[derive(Debug, Clone)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Merged payload of the two upstream endpoints, as handed to the estimator.
#[derive(Debug, Clone)]
pub struct UpstreamData {
    /// Raw key; used for masking only, never stored
    pub api_key: String,
    /// Credits spent against the key's monthly limit (auth/key `usage`)
    pub monthly_usage: f64,
    /// Monthly credit limit (auth/key `limit`); None = unlimited
    pub monthly_limit: Option<f64>,
    pub is_free_tier: bool,
    pub rate_limit: Option<UpstreamRateLimit>,
    /// Credits purchased (credits endpoint `total_credits`)
    pub total_credits: f64,
    /// Credits consumed over the account lifetime (credits endpoint `total_usage`)
    pub total_usage: f64,
    pub rate_headers: Option<RateLimitHeaders>,
}

/// Per-day request ceiling for free-tier accounts. Fixed business knowledge
/// about OpenRouter, not derived from any API field: free accounts that have
/// purchased at least 10 credits get 1000 free-model requests per day,
/// others get 50. Paid accounts have no daily ceiling.
pub fn daily_limit_policy(is_free_tier: bool, total_credits: f64) -> Option<u32> {
    if !is_free_tier {
        return None;
    }
    if total_credits >= 10.0 {
        Some(1000)
    } else {
        Some(50)
    }
}

/// Map a usage percentage onto the health scale.
pub fn health_from_percentage(percentage: u8) -> HealthStatus {
    if percentage >= 95 {
        HealthStatus::Critical
    } else if percentage >= 80 {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

fn health_message(status: HealthStatus, percentage: u8) -> String {
    match status {
        HealthStatus::Healthy => format!("Operating normally ({}% used)", percentage),
        HealthStatus::Warning => format!("Usage is elevated ({}%)", percentage),
        HealthStatus::Critical => format!("Usage is critically high ({}%)", percentage),
        HealthStatus::Unknown => "Status unknown".to_string(),
    }
}

/// Parse an upstream interval string like "10s", "5m", "1h" or "2d".
/// Anything unparsable falls back to one minute.
pub fn parse_interval(interval: &str) -> Duration {
    let fallback = Duration::seconds(60);
    if interval.len() < 2 {
        return fallback;
    }
    let (digits, unit) = interval.split_at(interval.len() - 1);
    let value: i64 = match digits.parse() {
        Ok(v) => v,
        Err(_) => return fallback,
    };
    match unit {
        "s" => Duration::seconds(value),
        "m" => Duration::minutes(value),
        "h" => Duration::hours(value),
        "d" => Duration::days(value),
        _ => fallback,
    }
}

/// First 8 and last 4 characters with the middle masked; keys too short to
/// mask meaningfully collapse to "****".
pub fn mask_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() < 12 {
        return "****".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}

/// Next local midnight, expressed in UTC. Daily quotas roll over on the
/// user's calendar day, not the UTC one.
pub fn next_local_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&Local);
    let next_day = local.date_naive() + Duration::days(1);
    Local
        .from_local_datetime(&next_day.and_time(NaiveTime::MIN))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now + Duration::days(1))
}

/// First instant of the next calendar month, local time, expressed in UTC.
pub fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&Local);
    let (year, month) = if local.month() == 12 {
        (local.year() + 1, 1)
    } else {
        (local.year(), local.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| {
            Local
                .from_local_datetime(&date.and_time(NaiveTime::MIN))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now + Duration::days(30))
}

fn credits_note(total: f64, remaining: f64, is_free_tier: bool) -> String {
    if is_free_tier {
        if total >= 10.0 {
            format!("${:.2} left (free tier, 10+ credits purchased)", remaining)
        } else {
            format!(
                "${:.2} left (free tier; purchase 10 credits to raise limits)",
                remaining
            )
        }
    } else {
        format!("${:.2} left (paid account)", remaining)
    }
}

fn rate_limit_estimate(data: &UpstreamData, now: DateTime<Utc>) -> RateLimitEstimate {
    if let Some(headers) = &data.rate_headers {
        if headers.limit > 0 {
            let used = headers.limit.saturating_sub(headers.remaining);
            return RateLimitEstimate {
                used: Some(used),
                limit: headers.limit,
                remaining: Some(headers.remaining),
                reset_at: headers
                    .reset_at
                    .unwrap_or(now + parse_interval(DEFAULT_RATE_INTERVAL)),
                interval: DEFAULT_RATE_INTERVAL.to_string(),
                has_real_time_data: true,
            };
        }
    }

    let (limit, interval) = match &data.rate_limit {
        Some(rl) if rl.requests > 0 => (rl.requests, rl.interval.clone()),
        _ => (DEFAULT_RATE_LIMIT, DEFAULT_RATE_INTERVAL.to_string()),
    };
    RateLimitEstimate {
        used: None,
        limit,
        remaining: None,
        reset_at: now + parse_interval(&interval),
        interval,
        has_real_time_data: false,
    }
}

fn daily_limit_estimate(
    is_free_tier: bool,
    total_credits: f64,
    now: DateTime<Utc>,
) -> DailyLimitEstimate {
    let limit = daily_limit_policy(is_free_tier, total_credits);
    let note = match limit {
        Some(1000) => "Free tier with 10+ credits: 1000 requests/day".to_string(),
        Some(_) => "Free tier under 10 credits: 50 requests/day".to_string(),
        None => "Paid account: no daily limit".to_string(),
    };
    DailyLimitEstimate {
        limit,
        used: None,
        reset_at: next_local_midnight(now),
        note,
        local_tracked: None,
    }
}

fn monthly_limit_estimate(data: &UpstreamData, now: DateTime<Utc>) -> MonthlyLimitEstimate {
    MonthlyLimitEstimate {
        used: data.monthly_usage,
        limit: data.monthly_limit,
        remaining: data.monthly_limit.map(|limit| limit - data.monthly_usage),
        reset_at: next_month_start(now),
    }
}

fn rounded_percentage(used: f64, limit: f64) -> u8 {
    if limit <= 0.0 {
        return 0;
    }
    (used / limit * 100.0).round().clamp(0.0, 100.0) as u8
}

fn compute_health(rate: &RateLimitEstimate, monthly: &MonthlyLimitEstimate) -> HealthInfo {
    // Real-time rate counters are the primary signal; the key's monthly
    // credit usage stands in when upstream gave us no live numbers.
    let percentage = match rate.used {
        Some(used) if rate.has_real_time_data => {
            rounded_percentage(f64::from(used), f64::from(rate.limit))
        }
        _ => match monthly.limit {
            Some(limit) if limit > 0.0 => rounded_percentage(monthly.used, limit),
            _ => 0,
        },
    };
    let status = health_from_percentage(percentage);
    HealthInfo {
        status,
        percentage,
        message: health_message(status, percentage),
    }
}

/// Combine the merged upstream payload into a status snapshot. Pure; all
/// clock access goes through the `now` argument.
pub fn estimate(data: &UpstreamData, now: DateTime<Utc>) -> StatusSnapshot {
    let raw_remaining = data.total_credits - data.total_usage;
    if raw_remaining < 0.0 {
        warn!(
            total_credits = data.total_credits,
            total_usage = data.total_usage,
            "Upstream reported more usage than purchased credits; clamping remainder to zero"
        );
    }
    let remaining = raw_remaining.max(0.0);

    let usage = CreditsUsage {
        credits_used: data.total_usage,
        total_credits: data.total_credits,
        remaining_credits: remaining,
        unlimited: data.monthly_limit.is_none(),
        note: credits_note(data.total_credits, remaining, data.is_free_tier),
    };

    let tier = TierInfo {
        is_free: data.is_free_tier,
        name: if data.is_free_tier { Tier::Free } else { Tier::Paid },
    };

    let rate_limit = rate_limit_estimate(data, now);
    let daily_limit = daily_limit_estimate(data.is_free_tier, data.total_credits, now);
    let monthly_limit = monthly_limit_estimate(data, now);
    let health = compute_health(&rate_limit, &monthly_limit);

    StatusSnapshot {
        api_key_masked: mask_api_key(&data.api_key),
        timestamp: now,
        usage,
        tier,
        rate_limit,
        daily_limit,
        monthly_limit,
        health,
    }
}

/// Attach the local daily quota overlay. Only adds the adjunct view; the
/// upstream-sourced fields are left untouched.
pub fn attach_local_quota(snapshot: &mut StatusSnapshot, quota: LocalQuota) {
    snapshot.daily_limit.local_tracked = Some(quota);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> UpstreamData {
        UpstreamData {
            api_key: "sk-or-v1-0123456789abcdef".to_string(),
            monthly_usage: 0.0,
            monthly_limit: None,
            is_free_tier: true,
            rate_limit: None,
            total_credits: 15.0,
            total_usage: 3.5,
            rate_headers: None,
        }
    }

    #[test]
    fn daily_policy_is_total() {
        assert_eq!(daily_limit_policy(true, 15.0), Some(1000));
        assert_eq!(daily_limit_policy(true, 10.0), Some(1000));
        assert_eq!(daily_limit_policy(true, 5.0), Some(50));
        assert_eq!(daily_limit_policy(true, 0.0), Some(50));
        assert_eq!(daily_limit_policy(false, 0.0), None);
        assert_eq!(daily_limit_policy(false, 500.0), None);
    }

    #[test]
    fn health_threshold_boundaries() {
        assert_eq!(health_from_percentage(79), HealthStatus::Healthy);
        assert_eq!(health_from_percentage(80), HealthStatus::Warning);
        assert_eq!(health_from_percentage(94), HealthStatus::Warning);
        assert_eq!(health_from_percentage(95), HealthStatus::Critical);
        assert_eq!(health_from_percentage(100), HealthStatus::Critical);
        assert_eq!(health_from_percentage(0), HealthStatus::Healthy);
    }

    #[test]
    fn remaining_credits_never_negative() {
        let mut data = sample_data();
        data.total_credits = 10.0;
        data.total_usage = 15.0;
        let snapshot = estimate(&data, Utc::now());
        assert_eq!(snapshot.usage.remaining_credits, 0.0);
        assert_eq!(snapshot.usage.credits_used, 15.0);
    }

    #[test]
    fn remaining_credits_subtraction() {
        let snapshot = estimate(&sample_data(), Utc::now());
        assert!((snapshot.usage.remaining_credits - 11.5).abs() < 1e-10);
    }

    #[test]
    fn rate_limit_defaults_without_upstream_data() {
        let snapshot = estimate(&sample_data(), Utc::now());
        assert_eq!(snapshot.rate_limit.limit, DEFAULT_RATE_LIMIT);
        assert!(snapshot.rate_limit.used.is_none());
        assert!(snapshot.rate_limit.remaining.is_none());
        assert!(!snapshot.rate_limit.has_real_time_data);
    }

    #[test]
    fn rate_limit_uses_auth_key_object() {
        let mut data = sample_data();
        data.rate_limit = Some(UpstreamRateLimit {
            requests: 50,
            interval: "10s".to_string(),
        });
        let now = Utc::now();
        let snapshot = estimate(&data, now);
        assert_eq!(snapshot.rate_limit.limit, 50);
        assert!(!snapshot.rate_limit.has_real_time_data);
        assert_eq!(snapshot.rate_limit.reset_at, now + Duration::seconds(10));
    }

    #[test]
    fn rate_headers_supply_real_time_counters() {
        let mut data = sample_data();
        data.rate_headers = Some(RateLimitHeaders {
            limit: 20,
            remaining: 8,
            reset_at: None,
        });
        let snapshot = estimate(&data, Utc::now());
        assert!(snapshot.rate_limit.has_real_time_data);
        assert_eq!(snapshot.rate_limit.used, Some(12));
        assert_eq!(snapshot.rate_limit.remaining, Some(8));
        // 12/20 = 60%
        assert_eq!(snapshot.health.percentage, 60);
        assert_eq!(snapshot.health.status, HealthStatus::Healthy);
    }

    #[test]
    fn health_falls_back_to_monthly_credits() {
        let mut data = sample_data();
        data.monthly_usage = 96.0;
        data.monthly_limit = Some(100.0);
        let snapshot = estimate(&data, Utc::now());
        assert_eq!(snapshot.health.percentage, 96);
        assert_eq!(snapshot.health.status, HealthStatus::Critical);
    }

    #[test]
    fn health_defaults_to_healthy_without_limits() {
        let snapshot = estimate(&sample_data(), Utc::now());
        assert_eq!(snapshot.health.percentage, 0);
        assert_eq!(snapshot.health.status, HealthStatus::Healthy);
    }

    #[test]
    fn daily_limit_follows_policy() {
        let mut data = sample_data();
        let snapshot = estimate(&data, Utc::now());
        assert_eq!(snapshot.daily_limit.limit, Some(1000));

        data.total_credits = 2.0;
        let snapshot = estimate(&data, Utc::now());
        assert_eq!(snapshot.daily_limit.limit, Some(50));

        data.is_free_tier = false;
        let snapshot = estimate(&data, Utc::now());
        assert_eq!(snapshot.daily_limit.limit, None);
    }

    #[test]
    fn daily_used_is_never_populated_from_upstream() {
        let snapshot = estimate(&sample_data(), Utc::now());
        assert!(snapshot.daily_limit.used.is_none());
        assert!(snapshot.daily_limit.local_tracked.is_none());
    }

    #[test]
    fn overlay_adds_without_overwriting() {
        let mut snapshot = estimate(&sample_data(), Utc::now());
        let limit_before = snapshot.daily_limit.limit;
        let reset_before = snapshot.daily_limit.reset_at;
        attach_local_quota(
            &mut snapshot,
            LocalQuota {
                used: 12,
                limit: 1000,
                remaining: 988,
                percentage: 1,
                status: HealthStatus::Healthy,
            },
        );
        assert_eq!(snapshot.daily_limit.limit, limit_before);
        assert_eq!(snapshot.daily_limit.reset_at, reset_before);
        assert_eq!(snapshot.daily_limit.used, None);
        assert_eq!(snapshot.daily_limit.local_tracked.as_ref().map(|q| q.used), Some(12));
    }

    #[test]
    fn parse_interval_units() {
        assert_eq!(parse_interval("10s"), Duration::seconds(10));
        assert_eq!(parse_interval("5m"), Duration::minutes(5));
        assert_eq!(parse_interval("1h"), Duration::hours(1));
        assert_eq!(parse_interval("2d"), Duration::days(2));
    }

    #[test]
    fn parse_interval_garbage_falls_back() {
        assert_eq!(parse_interval(""), Duration::seconds(60));
        assert_eq!(parse_interval("x"), Duration::seconds(60));
        assert_eq!(parse_interval("10q"), Duration::seconds(60));
        assert_eq!(parse_interval("ms"), Duration::seconds(60));
    }

    #[test]
    fn mask_api_key_shapes() {
        assert_eq!(
            mask_api_key("sk-or-v1-0123456789abcdef"),
            "sk-or-v1****cdef"
        );
        assert_eq!(mask_api_key("short"), "****");
        assert_eq!(mask_api_key(""), "****");
    }

    #[test]
    fn monthly_estimate_carries_key_limit() {
        let mut data = sample_data();
        data.monthly_usage = 12.5;
        data.monthly_limit = Some(50.0);
        let snapshot = estimate(&data, Utc::now());
        assert_eq!(snapshot.monthly_limit.limit, Some(50.0));
        assert!((snapshot.monthly_limit.remaining.unwrap() - 37.5).abs() < 1e-10);
        assert!(!snapshot.usage.unlimited);
    }

    #[test]
    fn next_month_start_is_first_of_month() {
        let reset = next_month_start(Utc::now());
        assert_eq!(reset.with_timezone(&Local).day(), 1);
        assert!(reset > Utc::now());
    }

    #[test]
    fn next_local_midnight_is_in_the_future() {
        let now = Utc::now();
        let midnight = next_local_midnight(now);
        assert!(midnight > now);
        assert!(midnight <= now + Duration::days(1));
    }

    #[test]
    fn masked_key_appears_in_snapshot() {
        let snapshot = estimate(&sample_data(), Utc::now());
        assert_eq!(snapshot.api_key_masked, "sk-or-v1****cdef");
    }
}
