//! Refresh schedule expressions.
//!
//! | Expression | Meaning                                        |
//! |------------|------------------------------------------------|
//! | `N`        | every N minutes                                |
//! | `:M`       | at minute M of every hour                      |
//! | `/N`       | on every multiple of N minutes past the hour   |
//! | `sN`       | every N seconds                                |
//! | `hN`       | every N hours                                  |

use std::time::Duration;

use chrono::{Local, Timelike};

/// How long to wait before the next poll, given the current minute of the hour.
///
/// Returns `None` for expressions that cannot be understood, including
/// zero-length intervals.
pub fn wait_for(expr: &str, minute: u32) -> Option<Duration> {
    let expr = expr.trim();

    if let Ok(minutes) = expr.parse::<u64>() {
        return (minutes > 0).then(|| from_minutes(minutes)).flatten();
    }

    let mut chars = expr.chars();
    let prefix = chars.next()?;
    let value: u64 = chars.as_str().parse().ok()?;
    let minute = u64::from(minute % 60);

    match prefix {
        ':' if value < 60 => {
            let minutes = if value > minute {
                value - minute
            } else {
                60 - minute + value
            };
            from_minutes(minutes)
        }
        '/' if value > 0 => from_minutes(value - minute % value),
        's' if value > 0 => Some(Duration::from_secs(value)),
        'h' if value > 0 => value.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

/// `None` when the interval does not fit in seconds.
fn from_minutes(minutes: u64) -> Option<Duration> {
    minutes.checked_mul(60).map(Duration::from_secs)
}

/// [`wait_for`] against the local wall clock.
pub fn wait_from_now(expr: &str) -> Option<Duration> {
    wait_for(expr, Local::now().minute())
}
