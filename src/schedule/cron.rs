// src/schedule/cron.rs

//! Five-field cron expressions and deterministic next-fire computation.
//!
//! Supported syntax per field: `*`, single values, `a-b` ranges, `a,b,c`
//! lists and `/n` steps on either. Months accept `JAN`..`DEC`, weekdays accept
//! `SUN`..`SAT`, and weekday `7` is Sunday. The `@hourly`, `@daily`
//! (`@midnight`), `@weekly`, `@monthly` and `@yearly` (`@annually`) macros
//! are expanded before parsing. All times are UTC with minute resolution.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// How far ahead `next_after` searches before giving up (e.g. `0 0 30 2 *`).
const SEARCH_HORIZON_YEARS: i32 = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("unknown macro '{0}'")]
    UnknownMacro(String),

    #[error("empty {0} field")]
    EmptyField(&'static str),

    #[error("invalid {field} value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid step '{0}'")]
    InvalidStep(String),
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
};
// 0-7 so that `7` parses; folded onto Sunday afterwards.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
};

/// A parsed cron expression. Each field is a bitmask of allowed values.
#[derive(Debug, Clone)]
pub struct CronExpr {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_any: bool,
    dow_any: bool,
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.minutes == other.minutes
            && self.hours == other.hours
            && self.days_of_month == other.days_of_month
            && self.months == other.months
            && self.days_of_week == other.days_of_week
            && self.dom_any == other.dom_any
            && self.dow_any == other.dow_any
    }
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let trimmed = expr.trim();
        let expanded = if trimmed.starts_with('@') {
            expand_macro(trimmed)?
        } else {
            trimmed
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let minutes = parse_field(fields[0], MINUTE)?;
        let hours = parse_field(fields[1], HOUR)?;
        let days_of_month = parse_field(fields[2], DAY_OF_MONTH)?;
        let months = parse_field(fields[3], MONTH)?;
        let mut days_of_week = parse_field(fields[4], DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: trimmed.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_any: fields[2].starts_with('*'),
            dow_any: fields[4].starts_with('*'),
        })
    }

    /// The expression as written in the config.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First fire time strictly after `after`, or `None` if the expression
    /// never matches within the search horizon.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after
            .naive_utc()
            .with_second(0)?
            .with_nanosecond(0)?
            .checked_add_signed(TimeDelta::minutes(1))?;
        let horizon = start.year() + SEARCH_HORIZON_YEARS;

        let mut t = start;
        while t.year() <= horizon {
            if !bit(self.months, t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.with_minute(0)?.checked_add_signed(TimeDelta::hours(1))?;
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t = t.checked_add_signed(TimeDelta::minutes(1))?;
                continue;
            }
            return Some(t.and_utc());
        }

        None
    }

    /// Whether `at` (truncated to the minute) is a fire time.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let t = at.naive_utc();
        bit(self.months, t.month())
            && self.day_matches(t.date())
            && bit(self.hours, t.hour())
            && bit(self.minutes, t.minute())
    }

    /// Vixie-cron day rule: when both day fields are restricted, either may
    /// match; otherwise both must.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        if !self.dom_any && !self.dow_any {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for CronExpr {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronExpr::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for CronExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn expand_macro(m: &str) -> Result<&'static str, CronError> {
    match m.to_lowercase().as_str() {
        "@hourly" => Ok("0 * * * *"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@monthly" => Ok("0 0 1 * *"),
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        _ => Err(CronError::UnknownMacro(m.to_string())),
    }
}

fn parse_field(field: &str, spec: FieldSpec) -> Result<u64, CronError> {
    if field.is_empty() {
        return Err(CronError::EmptyField(spec.name));
    }

    let mut mask = 0u64;
    for part in field.split(',') {
        if part.is_empty() {
            return Err(CronError::EmptyField(spec.name));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| CronError::InvalidStep(part.to_string()))?;
                if step == 0 {
                    return Err(CronError::InvalidStep(part.to_string()));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, spec)?, parse_value(b, spec)?)
        } else {
            let v = parse_value(range, spec)?;
            // `a/n` means "from a to the end in steps of n".
            if step.is_some() { (v, spec.max) } else { (v, v) }
        };

        if lo > hi {
            return Err(CronError::InvalidValue {
                field: spec.name,
                value: range.to_string(),
            });
        }

        let step = step.unwrap_or(1);
        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step;
        }
    }

    Ok(mask)
}

fn parse_value(raw: &str, spec: FieldSpec) -> Result<u32, CronError> {
    let upper = raw.to_ascii_uppercase();
    let value = if let Some(idx) = spec.names.iter().position(|n| *n == upper) {
        // Names are 1-based for months and 0-based for weekdays.
        idx as u32 + if spec.min == 1 { 1 } else { 0 }
    } else {
        raw.parse::<u32>().map_err(|_| CronError::InvalidValue {
            field: spec.name,
            value: raw.to_string(),
        })?
    };

    if value < spec.min || value > spec.max {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}

fn bit(mask: u64, v: u32) -> bool {
    mask & (1 << v) != 0
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)
}
