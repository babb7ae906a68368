//! Civil-time handling at a single fixed offset, plus an injectable clock.
//!
//! Timestamp strings on the wire carry no zone. They are interpreted in the
//! configured `CivilZone` and rendered back in the same zone; the platform's
//! local zone is never consulted.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

use crate::error::AnalysisError;

/// Rendered form of every outgoing timestamp.
pub const CIVIL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// A fixed UTC offset used for all civil timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilZone {
    offset: FixedOffset,
}

impl Default for CivilZone {
    fn default() -> Self {
        // UTC+3, the convention the dashboard assumes for zone-less strings.
        FixedOffset::east_opt(3 * 3600)
            .map(Self::new)
            .unwrap_or_else(Self::utc)
    }
}

impl CivilZone {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Parse an offset such as `+03:00`, `-0530`, `+3`, `Z` or `UTC`.
    pub fn parse_offset(raw: &str) -> Result<Self, AnalysisError> {
        let s = raw.trim();
        if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
            return Ok(Self::utc());
        }

        let bad = || AnalysisError::invalid(format!("unrecognised UTC offset '{raw}'"));
        let (sign, rest) = match s.chars().next() {
            Some('+') => (1, &s[1..]),
            Some('-') => (-1, &s[1..]),
            _ => return Err(bad()),
        };

        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(bad());
        }
        let (hours, minutes) = match digits.len() {
            1 | 2 => (digits.parse::<i32>().map_err(|_| bad())?, 0),
            4 => (
                digits[..2].parse::<i32>().map_err(|_| bad())?,
                digits[2..].parse::<i32>().map_err(|_| bad())?,
            ),
            _ => return Err(bad()),
        };
        if hours > 23 || minutes > 59 {
            return Err(bad());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self::new)
            .ok_or_else(bad)
    }

    /// Parse a civil timestamp. Strings with an explicit offset are honoured
    /// as-is; zone-less strings are read in this zone.
    pub fn parse(&self, raw: &str) -> Result<DateTime<Utc>, AnalysisError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(AnalysisError::invalid("timestamp must not be empty"));
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        let naive = NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(|| AnalysisError::invalid(format!("unrecognised timestamp '{raw}'")))?;

        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| AnalysisError::invalid(format!("ambiguous timestamp '{raw}'")))
    }

    pub fn format(&self, ts: DateTime<Utc>) -> String {
        ts.with_timezone(&self.offset).format(CIVIL_FORMAT).to_string()
    }
}

/// Source of "now". Injected so request handling never reads ambient time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_zone_is_plus_three() {
        assert_eq!(CivilZone::default().offset().local_minus_utc(), 3 * 3600);
    }

    #[test]
    fn test_parse_offset_variants() {
        assert_eq!(
            CivilZone::parse_offset("+03:00").unwrap().offset().local_minus_utc(),
            10800
        );
        assert_eq!(
            CivilZone::parse_offset("-0530").unwrap().offset().local_minus_utc(),
            -(5 * 3600 + 30 * 60)
        );
        assert_eq!(
            CivilZone::parse_offset("+3").unwrap().offset().local_minus_utc(),
            10800
        );
        assert_eq!(CivilZone::parse_offset("Z").unwrap(), CivilZone::utc());
        assert!(CivilZone::parse_offset("03:00").is_err());
        assert!(CivilZone::parse_offset("+25:00").is_err());
        assert!(CivilZone::parse_offset("+ab").is_err());
    }

    #[test]
    fn test_zone_less_strings_use_configured_offset() {
        let zone = CivilZone::default();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();

        assert_eq!(zone.parse("2024-05-01T12:30").unwrap(), expected);
        assert_eq!(zone.parse("2024-05-01 12:30:00").unwrap(), expected);
        assert_eq!(zone.parse("2024-05-01T12:30:00").unwrap(), expected);
        assert_eq!(
            zone.parse("2024-05-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 30, 21, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_explicit_offset_wins() {
        let zone = CivilZone::default();
        assert_eq!(
            zone.parse("2024-05-01T12:30:00Z").unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_format_round_trip() {
        let zone = CivilZone::default();
        let ts = zone.parse("2024-12-31 23:59:59").unwrap();
        assert_eq!(zone.format(ts), "2024-12-31 23:59:59");
    }

    #[test]
    fn test_garbage_is_invalid_parameter() {
        let zone = CivilZone::default();
        assert!(matches!(
            zone.parse("yesterday"),
            Err(AnalysisError::InvalidParameter(_))
        ));
        assert!(matches!(zone.parse("  "), Err(AnalysisError::InvalidParameter(_))));
    }

    #[test]
    fn test_fixed_clock() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(FixedClock(t).now(), t);
    }
}
