use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::core::cache::TtlCache;
use crate::core::error::MonitorError;
use crate::core::estimator::{estimate, RateLimitHeaders, UpstreamData, UpstreamRateLimit};
use crate::core::history::hash_api_key;
use crate::core::models::snapshot::StatusSnapshot;

const BASE_URL: &str = "https://openrouter.ai/api/v1";
const CACHE_TTL: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Deserialize)]
struct KeyResponse {
    data: KeyData,
}

#[derive(Deserialize)]
struct KeyData {
    usage: Option<f64>,
    limit: Option<f64>,
    is_free_tier: Option<bool>,
    rate_limit: Option<RateLimitData>,
}

#[derive(Deserialize)]
struct RateLimitData {
    requests: Option<u32>,
    interval: Option<String>,
}

#[derive(Deserialize)]
struct CreditsResponse {
    data: CreditsData,
}

#[derive(Deserialize)]
struct CreditsData {
    total_credits: Option<f64>,
    total_usage: Option<f64>,
}

/// Outcome of probing a key against the live API. Never an error; an invalid
/// key is a result, not a failure.
#[derive(Debug, Serialize)]
pub struct KeyTestReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<StatusSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

/// Real-time counters only exist when upstream sent both the limit and the
/// remaining count; a lone limit header is not live data.
fn parse_rate_headers(headers: &HeaderMap) -> Option<RateLimitHeaders> {
    let limit = header_u32(headers, "x-ratelimit-limit")?;
    let remaining = header_u32(headers, "x-ratelimit-remaining")?;
    let reset_at = header_i64(headers, "x-ratelimit-reset")
        .and_then(DateTime::<Utc>::from_timestamp_millis);
    Some(RateLimitHeaders {
        limit,
        remaining,
        reset_at,
    })
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers.get("retry-after")?.to_str().ok()?.parse().ok()
}

fn classify_transport(err: reqwest::Error) -> MonitorError {
    if err.is_timeout() {
        MonitorError::Timeout(REQUEST_TIMEOUT_SECS)
    } else {
        MonitorError::Network(err.to_string())
    }
}

/// Fetches account status from the two OpenRouter endpoints and serves it
/// through a short-lived cache to bound the upstream call rate.
pub struct StatusFetcher {
    client: reqwest::Client,
    base_url: String,
    cache: Mutex<TtlCache<StatusSnapshot>>,
}

impl StatusFetcher {
    pub fn new() -> Result<Self, MonitorError> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| MonitorError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: Mutex::new(TtlCache::new(CACHE_TTL)),
        })
    }

    /// Current status for the key, served from cache when fresh.
    ///
    /// Both upstream requests must succeed; there is no partial-result path.
    /// A failure propagates to the caller but does not evict a still-valid
    /// cache entry.
    pub async fn fetch_status(
        &self,
        api_key: &str,
        force_refresh: bool,
    ) -> Result<StatusSnapshot, MonitorError> {
        let cache_key = hash_api_key(api_key);
        if !force_refresh {
            if let Some(snapshot) = self.cache_get(&cache_key) {
                debug!(key = %cache_key, "Serving status from cache");
                return Ok(snapshot);
            }
        }

        let (key_data, rate_headers, credits) = self.fetch_upstream(api_key).await?;

        let data = UpstreamData {
            api_key: api_key.to_string(),
            monthly_usage: key_data.usage.unwrap_or(0.0),
            monthly_limit: key_data.limit,
            is_free_tier: key_data.is_free_tier.unwrap_or(true),
            rate_limit: key_data.rate_limit.and_then(|rl| {
                Some(UpstreamRateLimit {
                    requests: rl.requests?,
                    interval: rl.interval.unwrap_or_else(|| "60s".to_string()),
                })
            }),
            total_credits: credits.total_credits.unwrap_or(0.0),
            total_usage: credits.total_usage.unwrap_or(0.0),
            rate_headers,
        };

        let snapshot = estimate(&data, Utc::now());
        self.cache_insert(&cache_key, snapshot.clone());
        Ok(snapshot)
    }

    /// Probe a key with a forced refresh.
    pub async fn test_api_key(&self, api_key: &str) -> KeyTestReport {
        match self.fetch_status(api_key, true).await {
            Ok(snapshot) => KeyTestReport {
                valid: true,
                snapshot: Some(snapshot),
                error: None,
            },
            Err(e) => KeyTestReport {
                valid: false,
                snapshot: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn fetch_upstream(
        &self,
        api_key: &str,
    ) -> Result<(KeyData, Option<RateLimitHeaders>, CreditsData), MonitorError> {
        let (key_result, credits_result) = tokio::try_join!(
            self.get_auth_key(api_key),
            self.get_credits(api_key)
        )?;
        let (key_data, rate_headers) = key_result;
        Ok((key_data, rate_headers, credits_result))
    }

    async fn get_auth_key(
        &self,
        api_key: &str,
    ) -> Result<(KeyData, Option<RateLimitHeaders>), MonitorError> {
        let response = self
            .client
            .get(format!("{}/auth/key", self.base_url))
            .bearer_auth(api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(classify_transport)?;

        let response = Self::check_status(response).await?;
        let rate_headers = parse_rate_headers(response.headers());
        let body: KeyResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::Network(format!("bad auth/key response: {}", e)))?;
        Ok((body.data, rate_headers))
    }

    async fn get_credits(&self, api_key: &str) -> Result<CreditsData, MonitorError> {
        let response = self
            .client
            .get(format!("{}/credits", self.base_url))
            .bearer_auth(api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(classify_transport)?;

        let response = Self::check_status(response).await?;
        let body: CreditsResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::Network(format!("bad credits response: {}", e)))?;
        Ok(body.data)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, MonitorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let message = response.text().await.unwrap_or_default();
        let message = if message.is_empty() {
            status.to_string()
        } else {
            message
        };

        Err(match status {
            StatusCode::UNAUTHORIZED => MonitorError::Unauthorized(message),
            StatusCode::TOO_MANY_REQUESTS => MonitorError::RateLimited {
                message,
                retry_after_secs: retry_after,
            },
            s if s.is_server_error() => MonitorError::ServerError {
                status: s.as_u16(),
                message,
            },
            s => MonitorError::UnexpectedStatus {
                status: s.as_u16(),
                message,
            },
        })
    }

    fn cache_get(&self, cache_key: &str) -> Option<StatusSnapshot> {
        let cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.get(cache_key).cloned()
    }

    fn cache_insert(&self, cache_key: &str, snapshot: StatusSnapshot) {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.insert(cache_key, snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn deserialize_auth_key_response() {
        let json = r#"{
            "data": {
                "usage": 12.5,
                "limit": 50.0,
                "is_free_tier": true,
                "rate_limit": { "requests": 20, "interval": "10s" }
            }
        }"#;
        let resp: KeyResponse = serde_json::from_str(json).unwrap();
        assert!((resp.data.usage.unwrap() - 12.5).abs() < 1e-10);
        assert!((resp.data.limit.unwrap() - 50.0).abs() < 1e-10);
        assert_eq!(resp.data.is_free_tier, Some(true));
        let rl = resp.data.rate_limit.unwrap();
        assert_eq!(rl.requests, Some(20));
        assert_eq!(rl.interval.as_deref(), Some("10s"));
    }

    #[test]
    fn deserialize_auth_key_response_partial() {
        let resp: KeyResponse = serde_json::from_str(r#"{ "data": {} }"#).unwrap();
        assert!(resp.data.usage.is_none());
        assert!(resp.data.limit.is_none());
        assert!(resp.data.is_free_tier.is_none());
        assert!(resp.data.rate_limit.is_none());
    }

    #[test]
    fn deserialize_credits_response() {
        let json = r#"{
            "data": {
                "total_credits": 100.0,
                "total_usage": 37.50
            }
        }"#;
        let resp: CreditsResponse = serde_json::from_str(json).unwrap();
        assert!((resp.data.total_credits.unwrap() - 100.0).abs() < 1e-10);
        assert!((resp.data.total_usage.unwrap() - 37.50).abs() < 1e-10);
    }

    #[test]
    fn deserialize_credits_response_partial() {
        let resp: CreditsResponse = serde_json::from_str(r#"{ "data": {} }"#).unwrap();
        assert!(resp.data.total_credits.is_none());
        assert!(resp.data.total_usage.is_none());
    }

    #[test]
    fn parse_rate_headers_needs_both_counters() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("20"));
        assert!(parse_rate_headers(&headers).is_none());

        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("8"));
        let parsed = parse_rate_headers(&headers).unwrap();
        assert_eq!(parsed.limit, 20);
        assert_eq!(parsed.remaining, 8);
        assert!(parsed.reset_at.is_none());
    }

    #[test]
    fn parse_rate_headers_reads_reset_millis() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("20"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("8"));
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from_static("1754524800000"),
        );
        let parsed = parse_rate_headers(&headers).unwrap();
        let reset = parsed.reset_at.unwrap();
        assert_eq!(reset.timestamp_millis(), 1754524800000);
    }

    #[test]
    fn parse_rate_headers_ignores_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("lots"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("8"));
        assert!(parse_rate_headers(&headers).is_none());
    }

    #[test]
    fn parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(30));

        let empty = HeaderMap::new();
        assert_eq!(parse_retry_after(&empty), None);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let fetcher = StatusFetcher::with_base_url("http://127.0.0.1:9/api/v1").unwrap();
        let err = fetcher.fetch_status("sk-or-v1-test", true).await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Network(_) | MonitorError::Timeout(_)
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn failed_fetch_never_errors_key_test() {
        let fetcher = StatusFetcher::with_base_url("http://127.0.0.1:9/api/v1").unwrap();
        let report = fetcher.test_api_key("sk-or-v1-test").await;
        assert!(!report.valid);
        assert!(report.snapshot.is_none());
        assert!(report.error.is_some());
    }
}
