//! Trigger resolution and next fire time calculation.
//!
//! A task describes when it should run through a handful of wire-level
//! fields (a crontab expression, a frequency with its unit, start and end
//! dates). [`Trigger::from_spec`] turns those fields into one of three
//! concrete triggers:
//!
//! - a cron rule, whenever a crontab expression is present,
//! - a fixed interval bounded by optional start and end dates, when the
//!   frequency is positive,
//! - a single fire at the start date (or immediately) otherwise.
//!
//! Everything here is a pure function of its inputs.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use super::task::Task;

/// Wire format of task dates.
pub const WIRE_DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Sortable form dates are converted to before use.
pub const SORTABLE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MAX_OCCURRENCES: usize = 1000;

/// Errors that can occur when resolving triggers.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Date string not in `DD/MM/YYYY HH:MM:SS` form.
    #[error("invalid date '{0}': expected DD/MM/YYYY HH:MM:SS")]
    InvalidDate(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// The interval window is empty.
    #[error("end date {end} is before start date {start}")]
    EmptyWindow { start: String, end: String },
}

/// How a task is scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    #[default]
    Standard,
    Cron,
}

/// Unit of a task frequency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyUnit {
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl FrequencyUnit {
    /// Number of seconds in one unit.
    pub fn seconds(self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3600,
            Self::Days => 86400,
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Trigger fields of a task as they arrive from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(default)]
    pub scheduling_mode: SchedulingMode,
    #[serde(default)]
    pub frequency: u64,
    #[serde(default)]
    pub frequency_unit: FrequencyUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crontab_expression: Option<String>,
    /// `DD/MM/YYYY HH:MM:SS`, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// `DD/MM/YYYY HH:MM:SS`, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl TriggerSpec {
    /// A one-shot trigger firing immediately.
    pub fn immediate() -> Self {
        Self {
            timezone: default_timezone(),
            ..Default::default()
        }
    }

    /// A fixed-interval trigger with no bounds.
    pub fn every(frequency: u64, unit: FrequencyUnit) -> Self {
        Self {
            frequency,
            frequency_unit: unit,
            ..Self::immediate()
        }
    }

    /// A cron trigger.
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            scheduling_mode: SchedulingMode::Cron,
            crontab_expression: Some(expression.into()),
            ..Self::immediate()
        }
    }

    pub fn starting(mut self, start_date: impl Into<String>) -> Self {
        self.start_date = Some(start_date.into());
        self
    }

    pub fn ending(mut self, end_date: impl Into<String>) -> Self {
        self.end_date = Some(end_date.into());
        self
    }

    /// Whether these fields describe a recurring trigger.
    pub fn is_periodic(&self) -> bool {
        self.crontab_expression.is_some() || self.frequency > 0
    }

    /// Effective scheduling mode; a crontab expression forces cron.
    pub fn effective_mode(&self) -> SchedulingMode {
        if self.crontab_expression.is_some() {
            SchedulingMode::Cron
        } else {
            self.scheduling_mode
        }
    }
}

/// A concrete trigger handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire once.
    Date { run_date: DateTime<Utc> },
    /// Fire every `seconds`, starting at `start`, never after `end`.
    Interval {
        seconds: u64,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    },
    /// Fire according to a cron rule evaluated in `timezone`.
    Cron { expression: String, timezone: String },
}

impl Trigger {
    /// Resolve the trigger of a task at instant `now`.
    pub fn from_task(task: &Task, now: DateTime<Utc>) -> Result<Self, TriggerError> {
        Self::from_spec(&task.trigger, now)
    }

    /// Resolve a task's trigger fields at instant `now`.
    ///
    /// An interval without a start date is anchored one interval after
    /// `now`; a one-shot without a start date fires at `now`.
    pub fn from_spec(spec: &TriggerSpec, now: DateTime<Utc>) -> Result<Self, TriggerError> {
        let tz = parse_timezone(&spec.timezone)?;

        if let Some(expression) = &spec.crontab_expression {
            parse_cron(expression)?;
            return Ok(Self::Cron {
                expression: expression.clone(),
                timezone: spec.timezone.clone(),
            });
        }

        let start = spec
            .start_date
            .as_deref()
            .map(|s| parse_date(s, tz))
            .transpose()?;

        if spec.frequency > 0 {
            let seconds = spec.frequency * spec.frequency_unit.seconds();
            let start = start.unwrap_or_else(|| now + Duration::seconds(seconds as i64));
            let end = spec
                .end_date
                .as_deref()
                .map(|s| parse_date(s, tz))
                .transpose()?;
            if let Some(end) = end {
                if end < start {
                    return Err(TriggerError::EmptyWindow {
                        start: start.to_string(),
                        end: end.to_string(),
                    });
                }
            }
            return Ok(Self::Interval {
                seconds,
                start,
                end,
            });
        }

        Ok(Self::Date {
            run_date: start.unwrap_or(now),
        })
    }

    /// Whether the trigger fires more than once.
    pub fn is_periodic(&self) -> bool {
        !matches!(self, Self::Date { .. })
    }

    /// Next fire time given the previous one (if any) and the current time.
    ///
    /// Returns `None` once the trigger is exhausted.
    pub fn next_fire(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, TriggerError> {
        match self {
            Self::Date { run_date } => Ok(match previous {
                None => Some(*run_date),
                Some(_) => None,
            }),
            Self::Interval {
                seconds,
                start,
                end,
            } => {
                let step = Duration::seconds(*seconds as i64);
                let next = match previous {
                    Some(prev) => prev + step,
                    None if now <= *start => *start,
                    None => {
                        let step_us = *seconds as i64 * MICROS_PER_SECOND;
                        let elapsed = micros_between(*start, now);
                        let steps = elapsed / step_us + i64::from(elapsed % step_us != 0);
                        *start + Duration::microseconds(steps * step_us)
                    }
                };
                Ok(match end {
                    Some(end) if next > *end => None,
                    _ => Some(next),
                })
            }
            Self::Cron {
                expression,
                timezone,
            } => {
                let tz = parse_timezone(timezone)?;
                let schedule = parse_cron(expression)?;
                let after = previous.unwrap_or(now - Duration::seconds(1));
                Ok(schedule
                    .after(&after.with_timezone(&tz))
                    .next()
                    .map(|dt| dt.with_timezone(&Utc)))
            }
        }
    }

    /// Newest fire in `[first, now]` and the number of fires in that range.
    ///
    /// `first` must be a fire time of this trigger. Intervals are resolved
    /// on their grid without walking it; cron rules are walked without
    /// keeping the missed fires.
    pub fn latest_fire(
        &self,
        first: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, u64), TriggerError> {
        if now <= first {
            return Ok((first, 1));
        }
        match self {
            Self::Date { .. } => Ok((first, 1)),
            Self::Interval { seconds, end, .. } => {
                let limit = match end {
                    Some(end) if *end < now => (*end).max(first),
                    _ => now,
                };
                let step_us = *seconds as i64 * MICROS_PER_SECOND;
                let steps = micros_between(first, limit) / step_us;
                Ok((
                    first + Duration::microseconds(steps * step_us),
                    steps as u64 + 1,
                ))
            }
            Self::Cron {
                expression,
                timezone,
            } => {
                let tz = parse_timezone(timezone)?;
                let schedule = parse_cron(expression)?;
                let mut latest = first;
                let mut count = 1;
                for fire in schedule.after(&first.with_timezone(&tz)) {
                    let fire = fire.with_timezone(&Utc);
                    if fire > now {
                        break;
                    }
                    latest = fire;
                    count += 1;
                }
                Ok((latest, count))
            }
        }
    }

    /// The next `n` fire times strictly after `after`.
    pub fn next_n_after(
        &self,
        after: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<DateTime<Utc>>, TriggerError> {
        let mut fires = Vec::with_capacity(n.min(MAX_OCCURRENCES));
        let mut previous = None;
        while fires.len() < n.min(MAX_OCCURRENCES) {
            let Some(next) = self.next_fire(previous, after)? else {
                break;
            };
            previous = Some(next);
            if next > after {
                fires.push(next);
            }
        }
        Ok(fires)
    }

    /// Every fire time in `(after, until]`, capped to a bounded count.
    pub fn fires_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, TriggerError> {
        let mut fires = Vec::new();
        let mut previous = Some(after);
        while let Some(next) = self.next_fire(previous, after)? {
            if next > until || fires.len() >= MAX_OCCURRENCES {
                break;
            }
            fires.push(next);
            previous = Some(next);
        }
        Ok(fires)
    }
}

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Microseconds from `from` to `to`, saturating on overflow.
fn micros_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_microseconds().unwrap_or(i64::MAX)
}

/// Convert a `DD/MM/YYYY HH:MM:SS` date to the sortable form.
pub fn convert_date(date: &str) -> Result<String, TriggerError> {
    NaiveDateTime::parse_from_str(date.trim(), WIRE_DATE_FORMAT)
        .map(|dt| dt.format(SORTABLE_DATE_FORMAT).to_string())
        .map_err(|_| TriggerError::InvalidDate(date.to_string()))
}

/// Parse a wire date into a UTC instant, reading it in `tz`.
pub fn parse_date(date: &str, tz: Tz) -> Result<DateTime<Utc>, TriggerError> {
    let sortable = convert_date(date)?;
    let naive = NaiveDateTime::parse_from_str(&sortable, SORTABLE_DATE_FORMAT)
        .map_err(|_| TriggerError::InvalidDate(date.to_string()))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| TriggerError::InvalidDate(date.to_string()))
}

pub fn parse_timezone(timezone: &str) -> Result<Tz, TriggerError> {
    timezone
        .parse::<Tz>()
        .map_err(|_| TriggerError::InvalidTimezone(timezone.to_string()))
}

/// Parse a crontab expression.
///
/// Accepts standard 5-field crontab, 6/7-field expressions with seconds,
/// and the `@hourly`-style shortcuts.
pub fn parse_cron(expression: &str) -> Result<CronSchedule, TriggerError> {
    let trimmed = expression.trim();
    let expanded = match trimmed.to_lowercase().as_str() {
        "@yearly" | "@annually" => "0 0 1 1 *".to_string(),
        "@monthly" => "0 0 1 * *".to_string(),
        "@weekly" => "0 0 * * SUN".to_string(),
        "@daily" | "@midnight" => "0 0 * * *".to_string(),
        "@hourly" => "0 * * * *".to_string(),
        s if s.starts_with('@') => {
            return Err(TriggerError::InvalidCron(format!(
                "unknown shortcut: {}",
                trimmed
            )));
        }
        _ => trimmed.to_string(),
    };

    let fields = expanded.split_whitespace().count();
    let cron_expr = match fields {
        5 => format!("0 {}", expanded),
        6 | 7 => expanded,
        n => {
            return Err(TriggerError::InvalidCron(format!(
                "expected 5 to 7 fields, got {}",
                n
            )));
        }
    };

    CronSchedule::from_str(&cron_expr).map_err(|e| TriggerError::InvalidCron(e.to_string()))
}
