//! Relative date expressions: `now`, `now-6h`, `now/d`, `now-1M/M`, and
//! absolute anchors such as `2024-01-01||+1d`.
//!
//! Units are `s m h d w M y`. Rounding (`/unit`) happens in the dashboard
//! timezone; weeks start on Monday.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, TimeZone,
    Timelike, Utc,
};
use dashvars_common::{TimeZoneSpec, VariableError, VariableErrorKind};

fn err(text: &str, detail: &str) -> VariableError {
    VariableError::new(VariableErrorKind::DateMath).with_message(format!("{detail} in '{text}'"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Unit {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            's' => Unit::Second,
            'm' => Unit::Minute,
            'h' => Unit::Hour,
            'd' => Unit::Day,
            'w' => Unit::Week,
            'M' => Unit::Month,
            'y' => Unit::Year,
            _ => return None,
        })
    }
}

/// True when `text` is a relative expression anchored at `now`.
pub fn is_relative(text: &str) -> bool {
    text.trim_start().starts_with("now")
}

/// Evaluate `text` against `now`.
///
/// With `round_up`, `/unit` moves to the last millisecond of the unit instead
/// of its start (used for the upper bound of a range).
pub fn parse(
    text: &str,
    now: DateTime<Utc>,
    timezone: &TimeZoneSpec,
    round_up: bool,
) -> Result<DateTime<Utc>, VariableError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(err(text, "empty expression"));
    }

    let (anchor, math) = if let Some(rest) = trimmed.strip_prefix("now") {
        (now, rest)
    } else if let Some((anchor, math)) = trimmed.split_once("||") {
        (parse_anchor(anchor, timezone).ok_or_else(|| err(text, "unparseable date"))?, math)
    } else {
        let anchor = parse_anchor(trimmed, timezone).ok_or_else(|| err(text, "unparseable date"))?;
        return Ok(anchor);
    };

    let mut local = timezone.localize(&anchor);
    let chars: Vec<char> = math.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let op = chars[i];
        i += 1;
        match op {
            '/' => {
                let unit = chars
                    .get(i)
                    .copied()
                    .and_then(Unit::from_char)
                    .ok_or_else(|| err(text, "missing rounding unit"))?;
                i += 1;
                local = round(local, unit, round_up).ok_or_else(|| err(text, "date out of range"))?;
            }
            '+' | '-' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let count: i64 = if start == i {
                    1
                } else {
                    chars[start..i]
                        .iter()
                        .collect::<String>()
                        .parse()
                        .map_err(|_| err(text, "invalid count"))?
                };
                let unit = chars
                    .get(i)
                    .copied()
                    .and_then(Unit::from_char)
                    .ok_or_else(|| err(text, "missing unit"))?;
                i += 1;
                let signed = if op == '-' { -count } else { count };
                local = shift(local, unit, signed).ok_or_else(|| err(text, "date out of range"))?;
            }
            c if c.is_whitespace() => {}
            _ => return Err(err(text, "unexpected character")),
        }
    }

    Ok(local.with_timezone(&Utc))
}

fn parse_anchor(text: &str, timezone: &TimeZoneSpec) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        return text
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis);
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    from_local(timezone, naive)
}

/// Interpret a wall-clock time in `timezone`.
fn from_local(timezone: &TimeZoneSpec, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    // the offset is looked up at the same wall-clock instant read as UTC,
    // which is exact for fixed offsets and off by at most a DST shift otherwise
    let guess = Utc.from_utc_datetime(&naive);
    let offset = timezone.offset_at(&guess);
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn shift(
    local: DateTime<FixedOffset>,
    unit: Unit,
    count: i64,
) -> Option<DateTime<FixedOffset>> {
    let by_duration = |d: Duration| local.checked_add_signed(d);
    match unit {
        Unit::Second => by_duration(Duration::try_seconds(count)?),
        Unit::Minute => by_duration(Duration::try_minutes(count)?),
        Unit::Hour => by_duration(Duration::try_hours(count)?),
        Unit::Day => by_duration(Duration::try_days(count)?),
        Unit::Week => by_duration(Duration::try_weeks(count)?),
        Unit::Month | Unit::Year => {
            let months = if unit == Unit::Year {
                count.checked_mul(12)?
            } else {
                count
            };
            let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
            if months >= 0 {
                local.checked_add_months(magnitude)
            } else {
                local.checked_sub_months(magnitude)
            }
        }
    }
}

fn round(
    local: DateTime<FixedOffset>,
    unit: Unit,
    round_up: bool,
) -> Option<DateTime<FixedOffset>> {
    let naive = local.naive_local();
    let date = naive.date();
    let start: NaiveDateTime = match unit {
        Unit::Second => naive.with_nanosecond(0)?,
        Unit::Minute => date.and_hms_opt(naive.hour(), naive.minute(), 0)?,
        Unit::Hour => date.and_hms_opt(naive.hour(), 0, 0)?,
        Unit::Day => date.and_hms_opt(0, 0, 0)?,
        Unit::Week => {
            let back = i64::from(date.weekday().num_days_from_monday());
            (date - Duration::days(back)).and_hms_opt(0, 0, 0)?
        }
        Unit::Month => date.with_day(1)?.and_hms_opt(0, 0, 0)?,
        Unit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_hms_opt(0, 0, 0)?,
    };
    let start = local.offset().from_local_datetime(&start).single()?;
    if !round_up {
        return Some(start);
    }
    let next = shift(start, unit, 1)?;
    next.checked_sub_signed(Duration::milliseconds(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 13, 15, 42, 10).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn now_and_offsets() {
        let utc = TimeZoneSpec::Utc;
        assert_eq!(parse("now", now(), &utc, false).unwrap(), now());
        assert_eq!(parse("now-6h", now(), &utc, false).unwrap(), at(2024, 3, 13, 9, 42, 10));
        assert_eq!(parse("now+1M", now(), &utc, false).unwrap(), at(2024, 4, 13, 15, 42, 10));
        assert_eq!(parse("now-d", now(), &utc, false).unwrap(), at(2024, 3, 12, 15, 42, 10));
    }

    #[test]
    fn rounding_down_and_up() {
        let utc = TimeZoneSpec::Utc;
        assert_eq!(parse("now/d", now(), &utc, false).unwrap(), at(2024, 3, 13, 0, 0, 0));
        let end_of_day = parse("now/d", now(), &utc, true).unwrap();
        assert_eq!(end_of_day, at(2024, 3, 14, 0, 0, 0) - Duration::milliseconds(1));
        // 2024-03-13 is a Wednesday
        assert_eq!(parse("now/w", now(), &utc, false).unwrap(), at(2024, 3, 11, 0, 0, 0));
        assert_eq!(parse("now-1M/M", now(), &utc, false).unwrap(), at(2024, 2, 1, 0, 0, 0));
        assert_eq!(parse("now/y", now(), &utc, false).unwrap(), at(2024, 1, 1, 0, 0, 0));
    }

    #[test]
    fn rounding_uses_the_dashboard_timezone() {
        let plus_two = TimeZoneSpec::Fixed(FixedOffset::east_opt(2 * 3600).unwrap());
        // 15:42 UTC is 17:42 at +02:00; local midnight is 22:00 UTC the day before
        assert_eq!(
            parse("now/d", now(), &plus_two, false).unwrap(),
            at(2024, 3, 12, 22, 0, 0)
        );
    }

    #[test]
    fn absolute_anchors() {
        let utc = TimeZoneSpec::Utc;
        assert_eq!(
            parse("2024-01-01||+1d", now(), &utc, false).unwrap(),
            at(2024, 1, 2, 0, 0, 0)
        );
        assert_eq!(
            parse("2024-01-05T10:00:00Z", now(), &utc, false).unwrap(),
            at(2024, 1, 5, 10, 0, 0)
        );
        assert_eq!(parse("0", now(), &utc, false).unwrap(), at(1970, 1, 1, 0, 0, 0));
    }

    #[test]
    fn malformed_expressions_fail() {
        let utc = TimeZoneSpec::Utc;
        for bad in ["", "now-", "now-5q", "now/", "yesterday", "now*2d"] {
            let error = parse(bad, now(), &utc, false).unwrap_err();
            assert_eq!(error.kind, VariableErrorKind::DateMath, "{bad}");
        }
    }
}
