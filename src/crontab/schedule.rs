//! Five unordered integer sets (§3 `Schedule`) parsed from the classic
//! Unix 5-field cron grammar (§4.1).

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleParseError {
    #[error("field is empty")]
    EmptyField,
    #[error("list item is empty")]
    EmptyItem,
    #[error("more than two '/'-separated parts in {0:?}")]
    TooManySlashParts(String),
    #[error("more than two '-'-separated parts in {0:?}")]
    TooManyDashParts(String),
    #[error("step must be a positive integer, got {0:?}")]
    InvalidStep(String),
    #[error("value {0:?} is not a valid integer or name for this field")]
    InvalidValue(String),
    #[error("range start {0} is greater than range end {1}")]
    WrappingRange(u32, u32),
    #[error("value {0} is outside the allowed range {1}..={2}")]
    OutOfRange(u32, u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub minutes: BTreeSet<u32>,
    pub hours: BTreeSet<u32>,
    pub days_of_month: BTreeSet<u32>,
    pub months: BTreeSet<u32>,
    pub days_of_week: BTreeSet<u32>,
}

const MONTH_NAMES: &[(&str, u32)] = &[
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

const DOW_NAMES: &[(&str, u32)] = &[
    ("sun", 0),
    ("mon", 1),
    ("tue", 2),
    ("wed", 3),
    ("thu", 4),
    ("fri", 5),
    ("sat", 6),
];

#[derive(Clone, Copy)]
struct FieldSpec {
    min: u32,
    max: u32,
    names: Option<&'static [(&'static str, u32)]>,
    /// Day-of-week only: normalise the literal value 7 to 0 before any
    /// range/order validation (§4.1).
    normalise_seven_to_zero: bool,
}

impl Schedule {
    pub fn parse(
        minute_field: &str,
        hour_field: &str,
        dom_field: &str,
        month_field: &str,
        dow_field: &str,
    ) -> Result<Schedule, ScheduleParseError> {
        let minutes = parse_field(
            minute_field,
            FieldSpec {
                min: 0,
                max: 59,
                names: None,
                normalise_seven_to_zero: false,
            },
        )?;
        let hours = parse_field(
            hour_field,
            FieldSpec {
                min: 0,
                max: 23,
                names: None,
                normalise_seven_to_zero: false,
            },
        )?;
        let days_of_month = parse_field(
            dom_field,
            FieldSpec {
                min: 1,
                max: 31,
                names: None,
                normalise_seven_to_zero: false,
            },
        )?;
        let months = parse_field(
            month_field,
            FieldSpec {
                min: 1,
                max: 12,
                names: Some(MONTH_NAMES),
                normalise_seven_to_zero: false,
            },
        )?;
        let days_of_week = parse_field(
            dow_field,
            FieldSpec {
                min: 0,
                max: 7,
                names: Some(DOW_NAMES),
                normalise_seven_to_zero: true,
            },
        )?;

        Ok(Schedule {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
        })
    }

    /// Whether the local date/time `t` satisfies every component of the
    /// schedule, with Sunday normalised to 0 (chrono's `Weekday::num_days_from_sunday`
    /// already yields that numbering).
    pub fn contains<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        use chrono::{Datelike, Timelike};
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.days_of_month.contains(&t.day())
            && self.months.contains(&t.month())
            && self
                .days_of_week
                .contains(&t.weekday().num_days_from_sunday())
    }
}

fn parse_field(field: &str, spec: FieldSpec) -> Result<BTreeSet<u32>, ScheduleParseError> {
    if field.is_empty() {
        return Err(ScheduleParseError::EmptyField);
    }

    let mut result = BTreeSet::new();
    for item in field.split(',') {
        if item.is_empty() {
            return Err(ScheduleParseError::EmptyItem);
        }
        let slash_parts: Vec<&str> = item.split('/').collect();
        if slash_parts.len() > 2 {
            return Err(ScheduleParseError::TooManySlashParts(item.to_string()));
        }
        let range_part = slash_parts[0];
        let step: u32 = match slash_parts.get(1) {
            Some(step_str) => step_str
                .parse::<u32>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ScheduleParseError::InvalidStep(step_str.to_string()))?,
            None => 1,
        };

        let (low, high) = if range_part == "*" {
            (spec.min, spec.max)
        } else if range_part.contains('-') {
            let dash_parts: Vec<&str> = range_part.split('-').collect();
            if dash_parts.len() != 2 {
                return Err(ScheduleParseError::TooManyDashParts(range_part.to_string()));
            }
            let a = parse_value(dash_parts[0], &spec)?;
            let b = parse_value(dash_parts[1], &spec)?;
            if a > b {
                return Err(ScheduleParseError::WrappingRange(a, b));
            }
            (a, b)
        } else {
            let v = parse_value(range_part, &spec)?;
            (v, v)
        };

        if low < spec.min || high > spec.max {
            return Err(ScheduleParseError::OutOfRange(low, spec.min, spec.max));
        }

        let mut m = low;
        while m <= high {
            if (m - low) % step == 0 {
                result.insert(if spec.normalise_seven_to_zero && m == 7 { 0 } else { m });
            }
            m += 1;
        }
    }

    if result.is_empty() {
        return Err(ScheduleParseError::EmptyField);
    }
    Ok(result)
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, ScheduleParseError> {
    if let Ok(n) = raw.parse::<u32>() {
        return Ok(if spec.normalise_seven_to_zero && n == 7 { 0 } else { n });
    }
    if let Some(names) = spec.names {
        let lower = raw.to_ascii_lowercase();
        if let Some(&(_, v)) = names.iter().find(|(name, _)| *name == lower) {
            return Ok(v);
        }
    }
    Err(ScheduleParseError::InvalidValue(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wildcard_every_field() {
        let s = Schedule::parse("*", "*", "*", "*", "*").unwrap();
        assert_eq!(s.minutes.len(), 60);
        assert_eq!(s.hours.len(), 24);
        assert_eq!(s.days_of_month.len(), 31);
        assert_eq!(s.months.len(), 12);
        assert_eq!(s.days_of_week, BTreeSet::from([0, 1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn step_range_matches_invariant() {
        // 1-7/7 -> only {1}, per the base spec's end-to-end scenario #2.
        let s = Schedule::parse("1-7/7", "*", "*", "*", "*").unwrap();
        assert_eq!(s.minutes, BTreeSet::from([1]));
    }

    #[test]
    fn every_other_minute() {
        let s = Schedule::parse("*/2", "*", "*", "*", "*").unwrap();
        assert!(s.minutes.contains(&0));
        assert!(!s.minutes.contains(&1));
        assert!(s.minutes.contains(&10));
    }

    #[test]
    fn named_months_and_days_case_insensitive() {
        let s = Schedule::parse("0", "0", "1", "Jan,DEC", "mon-fri").unwrap();
        assert_eq!(s.months, BTreeSet::from([1, 12]));
        assert_eq!(s.days_of_week, BTreeSet::from([1, 2, 3, 4, 5]));
    }

    #[test]
    fn day_of_week_seven_normalises_to_zero() {
        let s = Schedule::parse("0", "0", "1", "1", "7").unwrap();
        assert_eq!(s.days_of_week, BTreeSet::from([0]));
    }

    #[test]
    fn wrapping_range_is_rejected() {
        // 6-7 normalises to 6-0, which wraps and must be rejected.
        let err = Schedule::parse("0", "0", "1", "1", "6-7").unwrap_err();
        assert!(matches!(err, ScheduleParseError::WrappingRange(6, 0)));
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(Schedule::parse("5-1", "*", "*", "*", "*").is_err());
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert!(Schedule::parse("60", "*", "*", "*", "*").is_err());
        assert!(Schedule::parse("*", "*", "32", "*", "*").is_err());
    }

    #[test]
    fn zero_or_negative_step_is_rejected() {
        assert!(Schedule::parse("*/0", "*", "*", "*", "*").is_err());
        assert!(Schedule::parse("*/-1", "*", "*", "*", "*").is_err());
    }

    #[test]
    fn too_many_slash_or_dash_parts_rejected() {
        assert!(Schedule::parse("1/2/3", "*", "*", "*", "*").is_err());
        assert!(Schedule::parse("1-2-3", "*", "*", "*", "*").is_err());
    }

    #[test]
    fn empty_field_rejected() {
        assert!(Schedule::parse("", "*", "*", "*", "*").is_err());
        assert!(Schedule::parse("1,,2", "*", "*", "*", "*").is_err());
    }

    #[test]
    fn contains_matches_every_component() {
        let s = Schedule::parse("*/2", "*", "*", "*", "*").unwrap();
        let t = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 10, 0).unwrap();
        assert!(s.contains(&t));
        let t = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 11, 0).unwrap();
        assert!(!s.contains(&t));
    }
}
