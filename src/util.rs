use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

/// Poll interval used when the configured one is missing or unusable.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3 * 60);

const JST_OFFSET_SECS: i32 = 9 * 60 * 60;

static INTERVAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+)(ms|s|m|h)$").expect("should never happen"));

pub struct HttpClient {
    pub client: ClientWithMiddleware,
}

#[derive(thiserror::Error, Debug)]
pub enum HttpError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("reqwest middleware error: {0}")]
    ReqwestMiddlewareError(#[from] reqwest_middleware::Error),
}

impl HttpClient {
    pub fn new(timeout: Duration) -> reqwest::Result<HttpClient> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let client = reqwest_middleware::ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(HttpClient { client })
    }

    pub async fn fetch_json<T>(&self, url: &str, query: &[(&str, &str)]) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        self.client
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| e.into())
    }
}

/// Parses intervals such as `500ms`, `30s`, `3m` or `1h`.
///
/// Anything else, including zero or negative counts, yields
/// [`DEFAULT_INTERVAL`].
pub fn parse_interval(text: &str) -> Duration {
    let Some(caps) = INTERVAL_RE.captures(text) else {
        return DEFAULT_INTERVAL;
    };

    let count: i64 = match caps[1].parse() {
        Ok(n) if n > 0 => n,
        _ => return DEFAULT_INTERVAL,
    };
    let count = count as u64;

    let duration = match &caps[2] {
        "ms" => Some(Duration::from_millis(count)),
        "s" => Some(Duration::from_secs(count)),
        "m" => count.checked_mul(60).map(Duration::from_secs),
        "h" => count.checked_mul(60 * 60).map(Duration::from_secs),
        _ => None,
    };

    duration.unwrap_or(DEFAULT_INTERVAL)
}

/// Renders a UTC time in +09:00 for log lines.
pub fn format_jst(time: &DateTime<Utc>) -> String {
    match FixedOffset::east_opt(JST_OFFSET_SECS) {
        Some(tz) => time.with_timezone(&tz).format("%m/%d %H:%M:%S").to_string(),
        None => time.format("%m/%d %H:%M:%S UTC").to_string(),
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn interval_units() {
        assert_eq!(parse_interval("500ms"), Duration::from_millis(500));
        assert_eq!(parse_interval("45s"), Duration::from_secs(45));
        assert_eq!(parse_interval("3m"), Duration::from_secs(180));
        assert_eq!(parse_interval("2h"), Duration::from_secs(7200));
        assert_eq!(parse_interval("1m"), Duration::from_secs(60));
    }

    #[test]
    fn interval_fallback() {
        for text in ["", "3", "m", "3d", "0s", "-5m", "1.5m", " 3m", "3 m", "abcms"] {
            assert_eq!(parse_interval(text), DEFAULT_INTERVAL, "input {:?}", text);
        }

        // Too large for an i64
        assert_eq!(
            parse_interval("99999999999999999999s"),
            DEFAULT_INTERVAL
        );
    }

    #[test]
    fn jst_display() {
        let time = DateTime::<Utc>::from_str("2024-02-15T20:15:00Z").unwrap();
        assert_eq!(format_jst(&time), "02/16 05:15:00");
    }

    #[test]
    fn url() {
        assert_eq!(
            watch_url("dQw4w9WgXcQ"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }
}
