//! Shared retry policy: transient status classification and backoff delays.

use std::time::Duration;

/// HTTP statuses retried silently by every layer.
pub const TRANSIENT_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Maximum attempts per layer (first try included).
pub const MAX_RETRIES: usize = 3;

const BASE_DELAYS: [f64; 3] = [1.0, 2.0, 4.0];
const MAX_DELAY_SECS: f64 = 30.0;

pub fn is_transient(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// Exponential backoff with jitter.
///
/// Attempt `i` sleeps `base[i] + U(0, 1)` seconds with `base = [1, 2, 4]`,
/// doubling past the table, capped at 30s.
pub fn retry_delay(attempt: usize) -> Duration {
    let base = if attempt < BASE_DELAYS.len() {
        BASE_DELAYS[attempt]
    } else {
        BASE_DELAYS[BASE_DELAYS.len() - 1]
            * f64::powi(2.0, (attempt - BASE_DELAYS.len() + 1) as i32)
    };
    let jitter: f64 = rand::random();
    Duration::from_secs_f64((base + jitter).min(MAX_DELAY_SECS))
}

/// Parse a `Retry-After` header value as a float number of seconds.
///
/// The HTTP-date form is not supported; anything that fails to parse is
/// ignored and the computed backoff applies unchanged.
pub fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<f64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0)
}

/// Delay before the next attempt: backoff raised to the server's floor.
pub fn next_delay(attempt: usize, retry_after: Option<f64>) -> Duration {
    let computed = retry_delay(attempt);
    match retry_after {
        Some(floor) => computed.max(Duration::from_secs_f64(floor.min(MAX_DELAY_SECS))),
        None => computed,
    }
}
