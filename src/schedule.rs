//! Five-field cron expressions and next-fire computation.
//!
//! Job schedules use the Unix form `minute hour day-of-month month
//! day-of-week` with Sunday = 0. The `cron` crate expects a leading
//! seconds field and numbers days of the week from 1, so expressions
//! are normalized before parsing.

use std::str::FromStr;

use chrono::{DateTime, Local};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("expected 5 cron fields (minute hour day month weekday), got {0}")]
    FieldCount(usize),
    #[error("cron step values must be at least 1")]
    ZeroStep,
    #[error("invalid cron expression: {0}")]
    Parse(String),
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed job schedule.
#[derive(Debug, Clone)]
pub struct JobSchedule {
    expression: String,
    inner: cron::Schedule,
}

impl JobSchedule {
    /// Parse a five-field cron expression.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }
        for field in &fields {
            check_step(field)?;
        }

        let weekday = remap_weekday_field(fields[4]);
        let normalized = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], weekday
        );
        let inner = cron::Schedule::from_str(&normalized)
            .map_err(|e| ScheduleError::Parse(e.to_string()))?;

        Ok(Self {
            expression: expression.to_string(),
            inner,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The smallest fire instant strictly after `after`, in the host's
    /// local zone.
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        self.inner.after(&after).next()
    }

    /// The next fire instant from now.
    pub fn upcoming(&self) -> Option<DateTime<Local>> {
        self.inner.upcoming(Local).next()
    }
}

/// Reject `*/0`-style steps before the underlying parser sees them.
fn check_step(field: &str) -> Result<(), ScheduleError> {
    for part in field.split(',') {
        if let Some((_, step)) = part.split_once('/') {
            if step.parse::<u32>().map_or(false, |n| n == 0) {
                return Err(ScheduleError::ZeroStep);
            }
        }
    }
    Ok(())
}

/// Rewrite numeric day-of-week values (0-7, Sunday = 0 or 7) to day
/// names, which mean the same thing in every cron dialect. Step
/// divisors and non-numeric tokens pass through untouched.
fn remap_weekday_field(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let remapped = range
                .split('-')
                .map(remap_weekday_number)
                .collect::<Vec<_>>()
                .join("-");
            match step {
                Some(step) => format!("{remapped}/{step}"),
                None => remapped,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn remap_weekday_number(token: &str) -> String {
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => DAY_NAMES[n % 7].to_string(),
        _ => token.to_string(),
    }
}
