//! Backoff and retry classification for provider HTTP calls.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

pub(crate) const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_SHIFT: usize = 6;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);
static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn should_retry_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

pub(crate) fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

pub(crate) fn backoff_ms(attempt: usize) -> u64 {
    BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(MAX_BACKOFF_SHIFT))
}

/// Jittered backoff in `[base / 2, base]`.
pub(crate) fn backoff_ms_with_jitter(attempt: usize, jitter: bool) -> u64 {
    let base = backoff_ms(attempt);
    if !jitter || base <= 1 {
        return base;
    }
    let low = base / 2;
    let width = base - low;
    let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17);
    low + mixed % (width + 1)
}

pub(crate) fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at
        .signed_duration_since(Utc::now())
        .num_milliseconds();
    Some(u64::try_from(delay_ms).unwrap_or(0))
}

pub(crate) fn retry_delay_ms(attempt: usize, jitter: bool, retry_after_ms: Option<u64>) -> u64 {
    let backoff = backoff_ms_with_jitter(attempt, jitter);
    retry_after_ms.map_or(backoff, |retry_after| backoff.max(retry_after))
}

pub(crate) fn new_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("forkchat-{millis}-{count}")
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::{
        backoff_ms, backoff_ms_with_jitter, new_request_id, parse_retry_after_ms, retry_delay_ms,
        should_retry_status,
    };

    #[test]
    fn unit_retry_status_selection() {
        assert!(should_retry_status(429));
        assert!(should_retry_status(502));
        assert!(!should_retry_status(400));
        assert!(!should_retry_status(404));
    }

    #[test]
    fn unit_backoff_doubles_and_caps() {
        assert_eq!(backoff_ms(0), 200);
        assert_eq!(backoff_ms(2), 800);
        assert_eq!(backoff_ms(40), backoff_ms(6));
    }

    #[test]
    fn unit_jittered_backoff_stays_in_range() {
        let base = backoff_ms(3);
        for _ in 0..32 {
            let value = backoff_ms_with_jitter(3, true);
            assert!(value >= base / 2 && value <= base, "value {value}");
        }
    }

    #[test]
    fn functional_retry_after_header_sets_delay_floor() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        let retry_after = parse_retry_after_ms(&headers);
        assert_eq!(retry_after, Some(2_000));
        assert_eq!(retry_delay_ms(0, false, retry_after), 2_000);
        assert_eq!(retry_delay_ms(3, false, Some(100)), 1_600);

        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn unit_request_ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }
}
