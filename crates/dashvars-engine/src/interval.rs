//! Interval strings (`5m`, `1h`, `>10s`) and the auto-interval sizing used by
//! interval variables and `$__interval`.

use dashvars_common::{TimeRange, VariableError, VariableErrorKind};
use once_cell::sync::Lazy;
use regex::Regex;

static INTERVAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)(ms|[Mwdhmsy])").expect("interval pattern is valid")
});

/// Floor used when no lower limit is given.
const DEFAULT_LOW_LIMIT_MS: f64 = 1.0;

/// `(upper bound, step)` pairs: a raw interval below the bound is rounded to
/// the step. Everything above the last bound rounds to a year.
const ROUNDING_STEPS: &[(f64, f64)] = &[
    (15.0, 10.0),
    (35.0, 20.0),
    (75.0, 50.0),
    (150.0, 100.0),
    (350.0, 200.0),
    (750.0, 500.0),
    (1_500.0, 1_000.0),
    (3_500.0, 2_000.0),
    (7_500.0, 5_000.0),
    (12_500.0, 10_000.0),
    (17_500.0, 15_000.0),
    (25_000.0, 20_000.0),
    (45_000.0, 30_000.0),
    (90_000.0, 60_000.0),
    (210_000.0, 120_000.0),
    (450_000.0, 300_000.0),
    (750_000.0, 600_000.0),
    (1_050_000.0, 900_000.0),
    (1_500_000.0, 1_200_000.0),
    (2_700_000.0, 1_800_000.0),
    (5_400_000.0, 3_600_000.0),
    (9_000_000.0, 7_200_000.0),
    (16_200_000.0, 10_800_000.0),
    (32_400_000.0, 21_600_000.0),
    (86_400_000.0, 43_200_000.0),
    (604_800_000.0, 86_400_000.0),
    (1_814_400_000.0, 604_800_000.0),
    (3_628_800_000.0, 2_592_000_000.0),
];

const YEAR_MS: f64 = 31_536_000_000.0;

/// An interval picked for a time range.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalResult {
    pub interval_ms: f64,
    /// Compact rendering, e.g. `30s`.
    pub interval: String,
}

fn unit_seconds(unit: &str) -> Option<f64> {
    Some(match unit {
        "y" => 31_536_000.0,
        "M" => 2_592_000.0,
        "w" => 604_800.0,
        "d" => 86_400.0,
        "h" => 3_600.0,
        "m" => 60.0,
        "s" => 1.0,
        "ms" => 0.001,
        _ => return None,
    })
}

/// Seconds in an interval string such as `5m` or `1.5h`.
pub fn interval_to_seconds(interval: &str) -> Result<f64, VariableError> {
    let caps = INTERVAL_RE.captures(interval).ok_or_else(|| {
        VariableError::new(VariableErrorKind::Interval)
            .with_message(format!("invalid interval string '{interval}'"))
    })?;
    let count: f64 = caps[1].parse().map_err(|_| {
        VariableError::new(VariableErrorKind::Interval)
            .with_message(format!("invalid interval count in '{interval}'"))
    })?;
    let seconds = unit_seconds(&caps[2]).unwrap_or(1.0);
    Ok(count * seconds)
}

pub fn interval_to_ms(interval: &str) -> Result<f64, VariableError> {
    interval_to_seconds(interval).map(|s| s * 1000.0)
}

/// Snap a raw interval to the nearest "nice" step.
pub fn round_interval(interval_ms: f64) -> f64 {
    ROUNDING_STEPS
        .iter()
        .find(|(bound, _)| interval_ms < *bound)
        .map(|(_, step)| *step)
        .unwrap_or(YEAR_MS)
}

/// Compact form of a second count: the largest unit that fits, or
/// `less than a millisecond`.
pub fn seconds_to_hms(seconds: f64) -> String {
    fn whole(value: f64) -> i64 {
        value.floor() as i64
    }

    let years = whole(seconds / 31_536_000.0);
    if years > 0 {
        return format!("{years}y");
    }
    let days = whole((seconds % 31_536_000.0) / 86_400.0);
    if days > 0 {
        return format!("{days}d");
    }
    let hours = whole((seconds % 86_400.0) / 3_600.0);
    if hours > 0 {
        return format!("{hours}h");
    }
    let minutes = whole((seconds % 3_600.0) / 60.0);
    if minutes > 0 {
        return format!("{minutes}m");
    }
    let secs = whole(seconds % 60.0);
    if secs > 0 {
        return format!("{secs}s");
    }
    let millis = whole(seconds * 1000.0);
    if millis > 0 {
        return format!("{millis}ms");
    }
    "less than a millisecond".to_string()
}

/// Size the interval for `range` split into roughly `resolution` steps,
/// never going below `low_limit` (a leading `>` is accepted and ignored).
pub fn calculate_interval(
    range: &TimeRange,
    resolution: u32,
    low_limit: Option<&str>,
) -> Result<IntervalResult, VariableError> {
    let low_limit_ms = match low_limit.map(|l| l.trim_start_matches('>')) {
        Some(limit) if !limit.is_empty() => interval_to_ms(limit)?,
        _ => DEFAULT_LOW_LIMIT_MS,
    };

    let raw = range.duration_ms() as f64 / f64::from(resolution.max(1));
    let mut interval_ms = round_interval(raw);
    if low_limit_ms > interval_ms {
        interval_ms = low_limit_ms;
    }

    Ok(IntervalResult {
        interval_ms,
        interval: seconds_to_hms(interval_ms / 1000.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn range_of(duration: Duration) -> TimeRange {
        let to = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        TimeRange::absolute(to - duration, to)
    }

    #[test]
    fn parses_units() {
        assert_eq!(interval_to_ms("10s").unwrap(), 10_000.0);
        assert_eq!(interval_to_ms("1.5h").unwrap(), 5_400_000.0);
        assert_eq!(interval_to_ms("250ms").unwrap(), 250.0);
        assert_eq!(interval_to_seconds("2M").unwrap(), 5_184_000.0);
        assert!(interval_to_ms("soon").is_err());
    }

    #[test]
    fn rounds_to_table_steps() {
        assert_eq!(round_interval(12.0), 10.0);
        assert_eq!(round_interval(40_000.0), 30_000.0);
        assert_eq!(round_interval(80_000_000.0), 43_200_000.0);
        assert_eq!(round_interval(1e13), YEAR_MS);
    }

    #[test]
    fn hms_picks_largest_unit() {
        assert_eq!(seconds_to_hms(30.0), "30s");
        assert_eq!(seconds_to_hms(7_200.0), "2h");
        assert_eq!(seconds_to_hms(0.05), "50ms");
        assert_eq!(seconds_to_hms(0.0), "less than a millisecond");
    }

    #[test]
    fn auto_interval_for_six_hours() {
        let result = calculate_interval(&range_of(Duration::hours(6)), 30, Some("10s")).unwrap();
        // 6h / 30 = 720s -> rounds to 10m
        assert_eq!(result.interval, "10m");
        assert_eq!(result.interval_ms, 600_000.0);
    }

    #[test]
    fn low_limit_wins_for_short_ranges() {
        let result =
            calculate_interval(&range_of(Duration::minutes(5)), 30, Some(">1m")).unwrap();
        assert_eq!(result.interval, "1m");
    }
}
