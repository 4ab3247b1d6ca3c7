use crate::error::{Result, VigilError};
use chrono::{DateTime, Datelike, TimeZone, Timelike};
use std::fmt;
use std::str::FromStr;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Bounds and naming rules for one cron field
struct FieldSpec {
    label: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// First value the `names` table maps to
    names_base: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    label: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_base: 0,
};

const HOUR: FieldSpec = FieldSpec {
    label: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_base: 0,
};

const DAY_OF_MONTH: FieldSpec = FieldSpec {
    label: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    names_base: 0,
};

const MONTH: FieldSpec = FieldSpec {
    label: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    names_base: 1,
};

// 7 is accepted as an alias for Sunday and folded onto 0 after parsing.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    label: "day-of-week",
    min: 0,
    max: 7,
    names: &DAY_NAMES,
    names_base: 0,
};

/// A parsed five-field cron expression (minute, hour, day-of-month, month, day-of-week)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a cron expression, failing with `ScheduleParseError` when malformed
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(VigilError::ScheduleParseError(format!(
                "'{}': expected 5 fields, found {}",
                expr,
                fields.len()
            )));
        }

        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: expr.trim().to_string(),
            minutes: parse_field(fields[0], &MINUTE)?,
            hours: parse_field(fields[1], &HOUR)?,
            days_of_month: parse_field(fields[2], &DAY_OF_MONTH)?,
            months: parse_field(fields[3], &MONTH)?,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    /// Whether the minute containing `time` matches the schedule
    pub fn matches<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> bool {
        if !bit(self.minutes, time.minute())
            || !bit(self.hours, time.hour())
            || !bit(self.months, time.month())
        {
            return false;
        }

        let dom = bit(self.days_of_month, time.day());
        let dow = bit(self.days_of_week, time.weekday().num_days_from_sunday());

        // Classic cron: restricting both day fields means either may match.
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// The expression this schedule was parsed from
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for CronSchedule {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn parse_field(text: &str, spec: &FieldSpec) -> Result<u64> {
    let mut mask = 0u64;

    for part in text.split(',') {
        if part.is_empty() {
            return Err(field_error(spec, text, "empty list element"));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| field_error(spec, text, "step is not a number"))?;
                if step == 0 {
                    return Err(field_error(spec, text, "step must be positive"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, spec, text)?, parse_value(hi, spec, text)?)
        } else {
            let value = parse_value(range, spec, text)?;
            // `a/n` means "from a to the end of the range, every n"
            if step.is_some() {
                (value, spec.max)
            } else {
                (value, value)
            }
        };

        if start > end {
            return Err(field_error(spec, text, "range start exceeds end"));
        }

        let step = step.unwrap_or(1) as usize;
        for value in (start..=end).step_by(step) {
            mask |= 1u64 << value;
        }
    }

    Ok(mask)
}

fn parse_value(token: &str, spec: &FieldSpec, text: &str) -> Result<u32> {
    let value = match token.parse::<u32>() {
        Ok(value) => value,
        Err(_) => spec
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token))
            .map(|idx| idx as u32 + spec.names_base)
            .ok_or_else(|| field_error(spec, text, &format!("invalid value '{}'", token)))?,
    };

    if value < spec.min || value > spec.max {
        return Err(field_error(
            spec,
            text,
            &format!("{} is outside {}-{}", value, spec.min, spec.max),
        ));
    }

    Ok(value)
}

fn field_error(spec: &FieldSpec, text: &str, reason: &str) -> VigilError {
    VigilError::ScheduleParseError(format!("{} field '{}': {}", spec.label, text, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_parse_daily_schedule() {
        let schedule = CronSchedule::parse("12 01 * * *").unwrap();
        assert!(schedule.matches(&at(2024, 3, 5, 1, 12)));
        assert!(!schedule.matches(&at(2024, 3, 5, 1, 13)));
        assert!(!schedule.matches(&at(2024, 3, 5, 13, 12)));
    }

    #[test]
    fn test_step_expression() {
        let schedule = CronSchedule::parse("*/3 * * * *").unwrap();
        assert!(schedule.matches(&at(2024, 1, 1, 0, 0)));
        assert!(schedule.matches(&at(2024, 1, 1, 0, 57)));
        assert!(!schedule.matches(&at(2024, 1, 1, 0, 58)));
    }

    #[test]
    fn test_ranges_lists_and_names() {
        let schedule = CronSchedule::parse("0,30 9-17 * jan-mar MON-FRI").unwrap();
        // 2024-01-03 is a Wednesday
        assert!(schedule.matches(&at(2024, 1, 3, 9, 30)));
        // 2024-01-06 is a Saturday
        assert!(!schedule.matches(&at(2024, 1, 6, 9, 30)));
        assert!(!schedule.matches(&at(2024, 4, 3, 9, 30)));
        assert!(!schedule.matches(&at(2024, 1, 3, 18, 0)));
    }

    #[test]
    fn test_sunday_alias() {
        let schedule = CronSchedule::parse("0 0 * * 7").unwrap();
        // 2024-01-07 is a Sunday
        assert!(schedule.matches(&at(2024, 1, 7, 0, 0)));
        assert!(!schedule.matches(&at(2024, 1, 8, 0, 0)));
    }

    #[test]
    fn test_day_fields_either_match_when_both_restricted() {
        let schedule = CronSchedule::parse("0 0 1 * 1").unwrap();
        // 1st of the month (a Thursday)
        assert!(schedule.matches(&at(2024, 2, 1, 0, 0)));
        // a Monday that is not the 1st
        assert!(schedule.matches(&at(2024, 2, 5, 0, 0)));
        assert!(!schedule.matches(&at(2024, 2, 6, 0, 0)));
    }

    #[test]
    fn test_offset_step() {
        let schedule = CronSchedule::parse("5/20 * * * *").unwrap();
        assert!(schedule.matches(&at(2024, 1, 1, 0, 5)));
        assert!(schedule.matches(&at(2024, 1, 1, 0, 25)));
        assert!(schedule.matches(&at(2024, 1, 1, 0, 45)));
        assert!(!schedule.matches(&at(2024, 1, 1, 0, 0)));
    }

    #[test]
    fn test_malformed_expressions() {
        for expr in [
            "",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "*/0 * * * *",
            "5-1 * * * *",
            "a * * * *",
            "1,,2 * * * *",
        ] {
            assert!(
                matches!(
                    CronSchedule::parse(expr),
                    Err(VigilError::ScheduleParseError(_))
                ),
                "expected parse error for '{}'",
                expr
            );
        }
    }

    #[test]
    fn test_display_round_trips_source() {
        let schedule: CronSchedule = " 12 1 * * * ".parse().unwrap();
        assert_eq!(schedule.to_string(), "12 1 * * *");
    }
}
