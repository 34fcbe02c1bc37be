//! Retention arithmetic and retention-curve windows.

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::model::AnalyticsMetrics;

/// Width of one retention-curve window.
pub const PERIOD_DAYS: i64 = 7;

/// Default number of retention-curve windows.
pub const DEFAULT_CURVE_PERIODS: u32 = 12;

/// Largest number of windows a curve may request (two years of weeks).
pub const MAX_CURVE_PERIODS: u32 = 104;

/// Integer retention percentage, rounded half up.
///
/// Returns 0 for an empty population.
pub fn retention_rate(active: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let active = active.min(total) as u128;
    let total = total as u128;
    ((active * 200 + total) / (total * 2)) as u8
}

/// Builds the metrics payload for one period, checking population bounds.
pub fn build_metrics(
    total_users: u64,
    active_users: u64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<AnalyticsMetrics> {
    if active_users > total_users {
        return Err(Error::invariant(format!(
            "active users {} exceed cohort size {}",
            active_users, total_users
        )));
    }
    Ok(AnalyticsMetrics {
        total_users,
        active_users,
        churned_users: total_users - active_users,
        retention_rate: retention_rate(active_users, total_users),
        period_start,
        period_end,
    })
}

/// One fixed window of a retention curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    pub period: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Consecutive 7-day windows starting at `origin`.
///
/// Bounds are inclusive like every other window in the engine, so window `i`
/// and window `i + 1` share the instant `origin + (i + 1) * 7d`. An event at
/// exactly that instant counts toward both periods.
///
/// Fails with a validation error when a window would end past the largest
/// representable timestamp.
pub fn curve_windows(origin: DateTime<Utc>, periods: u32) -> Result<Vec<PeriodWindow>> {
    let width = Duration::days(PERIOD_DAYS);
    (0..periods)
        .map(|period| {
            let overflow = || {
                Error::validation(format!(
                    "retention period {} starting from {} is out of range",
                    period,
                    origin.to_rfc3339()
                ))
            };
            let start = origin
                .checked_add_signed(Duration::days(PERIOD_DAYS * i64::from(period)))
                .ok_or_else(overflow)?;
            let end = start.checked_add_signed(width).ok_or_else(overflow)?;
            Ok(PeriodWindow { period, start, end })
        })
        .collect()
}

/// Validates a requested curve length.
pub fn validate_periods(periods: u32) -> Result<u32> {
    if periods == 0 || periods > MAX_CURVE_PERIODS {
        return Err(Error::validation(format!(
            "periods must be between 1 and {}, got {}",
            MAX_CURVE_PERIODS, periods
        )));
    }
    Ok(periods)
}
