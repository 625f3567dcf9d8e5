//! Item update intervals and next-check computation.

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

/// Longest accepted update interval (one day short of a year, as seconds).
const MAX_DELAY_SECONDS: i64 = 364 * 86_400;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntervalError {
    #[error("Invalid update interval \"{0}\".")]
    Invalid(String),
    #[error("Update interval \"{0}\" is out of range.")]
    OutOfRange(String),
}

/// Parses a delay such as `30`, `30s`, `5m`, `1h`, `1d` or `1w` into seconds.
pub fn parse_delay(delay: &str) -> Result<i64, IntervalError> {
    let delay = delay.trim();
    let invalid = || IntervalError::Invalid(delay.to_string());

    let (digits, multiplier) = match delay.chars().last() {
        None => return Err(invalid()),
        Some('s') => (&delay[..delay.len() - 1], 1),
        Some('m') => (&delay[..delay.len() - 1], 60),
        Some('h') => (&delay[..delay.len() - 1], 3_600),
        Some('d') => (&delay[..delay.len() - 1], 86_400),
        Some('w') => (&delay[..delay.len() - 1], 7 * 86_400),
        Some(_) => (delay, 1),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: i64 = digits.parse().map_err(|_| invalid())?;
    let seconds = value
        .checked_mul(multiplier)
        .ok_or_else(|| IntervalError::OutOfRange(delay.to_string()))?;
    if seconds <= 0 {
        return Err(invalid());
    }
    if seconds > MAX_DELAY_SECONDS {
        return Err(IntervalError::OutOfRange(delay.to_string()));
    }
    Ok(seconds)
}

/// Computes the next check time strictly after `from` for an item.
///
/// The item id shifts the check inside the interval so that items with the
/// same delay are spread evenly instead of firing together.
pub fn next_check(itemid: u64, delay_seconds: i64, from: DateTime<Utc>) -> DateTime<Utc> {
    let now = from.timestamp();
    let offset = (itemid % delay_seconds as u64) as i64;
    let mut next = delay_seconds * now.div_euclid(delay_seconds) + offset;
    while next <= now {
        next += delay_seconds;
    }
    Utc.timestamp_opt(next, 0).single().unwrap_or(from)
}

/// Computes the next aligned period boundary strictly after `from`.
pub fn next_period(period_seconds: i64, from: DateTime<Utc>) -> DateTime<Utc> {
    let period = period_seconds.max(1);
    let now = from.timestamp();
    let next = now - now.rem_euclid(period) + period;
    Utc.timestamp_opt(next, 0).single().unwrap_or(from)
}
