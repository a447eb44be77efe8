/// Time range and timezone support for interval sizing and date math
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The raw (user-facing) form of a time range, e.g. `now-6h` .. `now`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawTimeRange {
    pub from: String,
    pub to: String,
}

/// The dashboard time range: resolved instants plus the raw expressions
/// they were computed from.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub raw: RawTimeRange,
}

impl TimeRange {
    /// Range with absolute bounds; the raw form is the RFC 3339 rendering.
    pub fn absolute(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            raw: RawTimeRange {
                from: from.to_rfc3339(),
                to: to.to_rfc3339(),
            },
        }
    }

    /// Range with resolved bounds and the relative expressions behind them.
    pub fn relative(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        raw_from: impl Into<String>,
        raw_to: impl Into<String>,
    ) -> Self {
        Self {
            from,
            to,
            raw: RawTimeRange {
                from: raw_from.into(),
                to: raw_to.into(),
            },
        }
    }

    /// Length of the range in milliseconds (never negative).
    pub fn duration_ms(&self) -> i64 {
        (self.to - self.from).num_milliseconds().max(0)
    }
}

/// Timezone of a dashboard.
///
/// Dashboards store `"browser"` (follow the viewer), `"utc"`, or a fixed
/// offset such as `"+02:00"`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum TimeZoneSpec {
    /// Use the local timezone of the process (the viewer's browser).
    #[default]
    Browser,
    /// Use UTC timezone
    Utc,
    /// A fixed offset east of UTC.
    Fixed(FixedOffset),
}

impl TimeZoneSpec {
    /// Get the current datetime in the specified timezone
    pub fn now(&self) -> NaiveDateTime {
        match self {
            TimeZoneSpec::Browser => Local::now().naive_local(),
            TimeZoneSpec::Utc => Utc::now().naive_utc(),
            TimeZoneSpec::Fixed(offset) => offset.from_utc_datetime(&Utc::now().naive_utc()).naive_local(),
        }
    }

    /// Offset in effect at `instant`.
    pub fn offset_at(&self, instant: &DateTime<Utc>) -> FixedOffset {
        match self {
            TimeZoneSpec::Browser => Local.from_utc_datetime(&instant.naive_utc()).offset().fix(),
            TimeZoneSpec::Utc => Utc.fix(),
            TimeZoneSpec::Fixed(offset) => *offset,
        }
    }

    /// Express `instant` in this timezone.
    pub fn localize(&self, instant: &DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset_at(instant))
    }

    /// The name published through `$__timezone`.
    pub fn name(&self) -> String {
        match self {
            TimeZoneSpec::Browser => "browser".to_string(),
            TimeZoneSpec::Utc => "utc".to_string(),
            TimeZoneSpec::Fixed(offset) => offset.to_string(),
        }
    }
}

impl fmt::Display for TimeZoneSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for TimeZoneSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "browser" => Ok(TimeZoneSpec::Browser),
            "utc" | "UTC" => Ok(TimeZoneSpec::Utc),
            other => other
                .parse::<FixedOffset>()
                .map(TimeZoneSpec::Fixed)
                .map_err(|_| format!("unsupported timezone '{other}'")),
        }
    }
}

#[cfg(feature = "serde")]
impl Serialize for TimeZoneSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for TimeZoneSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
