//! Prometheus duration strings (`1h30m`, `5m`, `90s`, `500ms`)
//!
//! Durations are kept as parsed values and always rendered back in the
//! canonical Prometheus form, so `60s` and `1m` compare equal.

use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: u64 = 7 * MS_PER_DAY;
const MS_PER_YEAR: u64 = 365 * MS_PER_DAY;

lazy_static::lazy_static! {
    static ref DURATION_RE: Regex = Regex::new(
        r"^(([0-9]+)y)?(([0-9]+)w)?(([0-9]+)d)?(([0-9]+)h)?(([0-9]+)m)?(([0-9]+)s)?(([0-9]+)ms)?$"
    ).expect("duration pattern is valid");
}

/// A duration with millisecond precision, in Prometheus notation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PromDuration(Duration);

impl PromDuration {
    pub fn from_millis(ms: u64) -> Self {
        PromDuration(Duration::from_millis(ms))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for PromDuration {
    fn from(d: Duration) -> Self {
        PromDuration::from_millis(d.as_millis() as u64)
    }
}

impl FromStr for PromDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "0" {
            return Ok(PromDuration::default());
        }
        if s.is_empty() {
            return Err(Error::ValidationError("empty duration string".to_string()));
        }

        let caps = DURATION_RE
            .captures(s)
            .ok_or_else(|| Error::ValidationError(format!("not a valid duration string: {:?}", s)))?;

        let units = [
            (2, MS_PER_YEAR),
            (4, MS_PER_WEEK),
            (6, MS_PER_DAY),
            (8, MS_PER_HOUR),
            (10, MS_PER_MINUTE),
            (12, MS_PER_SECOND),
            (14, 1),
        ];

        let mut total: u64 = 0;
        for (group, mult) in units {
            if let Some(m) = caps.get(group) {
                let value: u64 = m.as_str().parse().map_err(|_| {
                    Error::ValidationError(format!("duration out of range: {:?}", s))
                })?;
                total = value
                    .checked_mul(mult)
                    .and_then(|v| total.checked_add(v))
                    .ok_or_else(|| {
                        Error::ValidationError(format!("duration out of range: {:?}", s))
                    })?;
            }
        }

        Ok(PromDuration::from_millis(total))
    }
}

impl fmt::Display for PromDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ms = self.0.as_millis() as u64;
        if ms == 0 {
            return f.write_str("0s");
        }

        // Years and weeks are only used when they divide the duration exactly.
        let units: [(&str, u64, bool); 7] = [
            ("y", MS_PER_YEAR, true),
            ("w", MS_PER_WEEK, true),
            ("d", MS_PER_DAY, false),
            ("h", MS_PER_HOUR, false),
            ("m", MS_PER_MINUTE, false),
            ("s", MS_PER_SECOND, false),
            ("ms", 1, false),
        ];

        for (unit, mult, exact) in units {
            if exact && ms % mult != 0 {
                continue;
            }
            let v = ms / mult;
            if v > 0 {
                write!(f, "{}{}", v, unit)?;
                ms -= v * mult;
            }
        }
        Ok(())
    }
}

impl Serialize for PromDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PromDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> PromDuration {
        s.parse().unwrap()
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse("1h30m").as_duration(), Duration::from_secs(5400));
        assert_eq!(parse("500ms").as_duration(), Duration::from_millis(500));
        assert_eq!(parse("2w").as_duration(), Duration::from_secs(14 * 86400));
        assert_eq!(parse("0").as_duration(), Duration::ZERO);
    }

    #[test]
    fn renders_canonical_form() {
        assert_eq!(parse("60s").to_string(), "1m");
        assert_eq!(parse("90s").to_string(), "1m30s");
        assert_eq!(parse("7d").to_string(), "1w");
        assert_eq!(parse("8d").to_string(), "8d");
        assert_eq!(parse("1500ms").to_string(), "1s500ms");
        assert_eq!(parse("0").to_string(), "0s");
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<PromDuration>().is_err());
        assert!("1x".parse::<PromDuration>().is_err());
        assert!("m1".parse::<PromDuration>().is_err());
        assert!("1m1h".parse::<PromDuration>().is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let d: PromDuration = serde_yaml::from_str("120s").unwrap();
        assert_eq!(serde_yaml::to_string(&d).unwrap().trim(), "2m");
    }
}
