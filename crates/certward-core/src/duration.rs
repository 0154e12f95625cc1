//! Durations and relative times
//!
//! Durations use the compact unit notation common in CA tooling (`"5m"`,
//! `"1h30m"`, `"-10s"`, `"1.5h"`). A [`TimeDuration`] is either an absolute
//! RFC 3339 time or such a duration interpreted relative to "now", which is
//! how certificate validity bounds are expressed in requests and tokens.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Parse a duration such as `"16h"`, `"1h30m"`, `"-5m"` or `"250ms"`.
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare
/// `"0"` is the only value allowed without a unit.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || CoreError::InvalidTimeDuration(format!("invalid duration {:?}", input));

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(Duration::zero());
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: i128 = 0;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(invalid());
        }
        let number = &rest[..number_end];
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        let scale: i128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SECOND,
            "m" => 60 * NANOS_PER_SECOND,
            "h" => 3_600 * NANOS_PER_SECOND,
            "" => {
                return Err(CoreError::InvalidTimeDuration(format!(
                    "missing unit in duration {:?}",
                    input
                )))
            }
            other => {
                return Err(CoreError::InvalidTimeDuration(format!(
                    "unknown unit {:?} in duration {:?}",
                    other, input
                )))
            }
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }

        let whole: i128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut value = whole.checked_mul(scale).ok_or_else(invalid)?;

        if !fraction.is_empty() {
            let fraction = &fraction[..fraction.len().min(18)];
            let digits: i128 = fraction.parse().map_err(|_| invalid())?;
            let denominator = 10i128.pow(fraction.len() as u32);
            value = value
                .checked_add(digits * scale / denominator)
                .ok_or_else(invalid)?;
        }

        total = total.checked_add(value).ok_or_else(invalid)?;
    }

    let nanos = i64::try_from(if negative { -total } else { total }).map_err(|_| invalid())?;
    Ok(Duration::nanoseconds(nanos))
}

/// Format a duration in the notation accepted by [`parse_duration`].
pub fn format_duration(duration: Duration) -> String {
    let nanos = match duration.num_nanoseconds() {
        Some(n) => i128::from(n),
        None => i128::from(duration.num_seconds()) * NANOS_PER_SECOND,
    };
    if nanos == 0 {
        return "0s".to_string();
    }

    let sign = if nanos < 0 { "-" } else { "" };
    let nanos = nanos.abs();

    if nanos < NANOS_PER_SECOND {
        return if nanos % 1_000_000 == 0 {
            format!("{}{}ms", sign, nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}{}us", sign, nanos / 1_000)
        } else {
            format!("{}{}ns", sign, nanos)
        };
    }

    let hours = nanos / (3_600 * NANOS_PER_SECOND);
    let minutes = (nanos / (60 * NANOS_PER_SECOND)) % 60;
    let seconds = (nanos / NANOS_PER_SECOND) % 60;
    let sub_second = nanos % NANOS_PER_SECOND;

    let seconds = if sub_second == 0 {
        seconds.to_string()
    } else {
        let fraction = format!("{:09}", sub_second);
        format!("{}.{}", seconds, fraction.trim_end_matches('0'))
    };

    if hours > 0 {
        format!("{}{}h{}m{}s", sign, hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}{}m{}s", sign, minutes, seconds)
    } else {
        format!("{}{}s", sign, seconds)
    }
}

/// An absolute time or a duration relative to the moment it is resolved.
///
/// The zero value means "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeDuration {
    time: Option<DateTime<Utc>>,
    duration: Option<Duration>,
}

impl TimeDuration {
    /// An unset value
    pub fn zero() -> Self {
        Self::default()
    }

    /// An absolute point in time
    pub fn from_time(time: DateTime<Utc>) -> Self {
        Self {
            time: Some(time),
            duration: None,
        }
    }

    /// A duration resolved against "now" when used
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            time: None,
            duration: Some(duration),
        }
    }

    /// Parse an RFC 3339 time or a duration. The empty string is zero.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Ok(Self::zero());
        }
        if let Ok(time) = DateTime::parse_from_rfc3339(input) {
            return Ok(Self::from_time(time.with_timezone(&Utc)));
        }
        parse_duration(input).map(Self::from_duration)
    }

    /// True if neither a time nor a duration is set
    pub fn is_zero(&self) -> bool {
        self.time.is_none() && self.duration.is_none()
    }

    /// Resolve against `now`. Returns `None` for the zero value.
    pub fn relative_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (self.time, self.duration) {
            (Some(time), _) => Some(time),
            (None, Some(duration)) => Some(now + duration),
            (None, None) => None,
        }
    }

    /// Resolve against `now` as unix seconds, `0` when unset or before the epoch.
    pub fn unix(&self, now: DateTime<Utc>) -> u64 {
        self.relative_time(now)
            .and_then(|t| u64::try_from(t.timestamp()).ok())
            .unwrap_or(0)
    }
}

impl FromStr for TimeDuration {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.time, self.duration) {
            (Some(time), _) => write!(f, "{}", time.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            (None, Some(duration)) => write!(f, "{}", format_duration(duration)),
            (None, None) => Ok(()),
        }
    }
}

impl Serialize for TimeDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        match value {
            None => Ok(Self::zero()),
            Some(s) => Self::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Serde adapter for `chrono::Duration` fields written as `"16h"`-style strings.
pub mod serde_duration {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_duration("16h").unwrap(), Duration::hours(16));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::milliseconds(250));
        assert_eq!(parse_duration("0").unwrap(), Duration::zero());
    }

    #[test]
    fn test_parse_compound_and_signed() {
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::minutes(90)
        );
        assert_eq!(parse_duration("-10s").unwrap(), Duration::seconds(-10));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::minutes(90));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("-").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::hours(16)), "16h0m0s");
        assert_eq!(format_duration(Duration::minutes(5)), "5m0s");
        assert_eq!(format_duration(Duration::seconds(-30)), "-30s");
        assert_eq!(format_duration(Duration::milliseconds(1500)), "1.5s");
        assert_eq!(format_duration(Duration::zero()), "0s");
    }

    #[test]
    fn test_time_duration_relative() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let td = TimeDuration::parse("1h").unwrap();
        assert_eq!(td.relative_time(now), Some(now + Duration::hours(1)));

        let td = TimeDuration::parse("2024-02-01T00:00:00Z").unwrap();
        assert_eq!(
            td.relative_time(now),
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );

        let td = TimeDuration::parse("").unwrap();
        assert!(td.is_zero());
        assert_eq!(td.relative_time(now), None);
        assert_eq!(td.unix(now), 0);
    }

    #[test]
    fn test_time_duration_serde() {
        let td: TimeDuration = serde_json::from_str("\"-5m\"").unwrap();
        assert_eq!(td, TimeDuration::from_duration(Duration::minutes(-5)));
        assert_eq!(serde_json::to_string(&td).unwrap(), "\"-5m0s\"");

        let td: TimeDuration = serde_json::from_str("null").unwrap();
        assert!(td.is_zero());

        assert!(serde_json::from_str::<TimeDuration>("\"tomorrow\"").is_err());
    }
}
