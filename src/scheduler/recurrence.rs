//! Trigger shapes for once/daily/weekly/custom reminders.
//!
//! A reminder's `run_time` is the literal fire instant for one-shots and an
//! *anchor* for everything else: its time-of-day (and weekday, for weekly)
//! defines the repeating schedule, and it also bounds the first occurrence
//! from below.

use crate::reminder::RepeatType;
use chrono::{Datelike, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shortest interval a custom rule may use.
pub const MIN_CUSTOM_INTERVAL_SECS: u64 = 60;

/// Longest interval a custom rule may use (ten years of days).
pub const MAX_CUSTOM_INTERVAL_SECS: u64 = 3650 * 86_400;

/// Errors turning a reminder's recurrence into a trigger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecurrenceError {
    #[error("custom recurrence requires a repeat payload")]
    MissingPayload,

    #[error("invalid custom recurrence payload: {0}")]
    InvalidPayload(String),

    #[error("custom interval of {0}s is below the {MIN_CUSTOM_INTERVAL_SECS}s minimum")]
    IntervalTooShort(u64),

    #[error("custom interval of {0}s is above the {MAX_CUSTOM_INTERVAL_SECS}s maximum")]
    IntervalTooLong(u64),

    #[error("next occurrence is outside the supported calendar")]
    OutOfRange,

    #[error("custom weekday rule lists no days")]
    NoWeekdays,

    #[error("unknown weekday '{0}'")]
    UnknownWeekday(String),
}

/// Custom recurrence rule stored as JSON in `repeat_payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustomRule {
    /// Every `secs` seconds, starting at the anchor.
    Interval { secs: u64 },
    /// At the anchor's time-of-day on each listed weekday (`"mon"`, `"friday"`, ...).
    Weekdays { days: Vec<String> },
}

impl CustomRule {
    pub fn from_payload(payload: Option<&str>) -> Result<Self, RecurrenceError> {
        let raw = payload
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(RecurrenceError::MissingPayload)?;
        serde_json::from_str(raw).map_err(|e| RecurrenceError::InvalidPayload(e.to_string()))
    }
}

/// When a registration fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// A single fire.
    Once { at: NaiveDateTime },
    /// Every day at `time`, not before `start`.
    Daily { start: NaiveDateTime, time: NaiveTime },
    /// Every week on `weekday` at `time`, not before `start`.
    Weekly {
        start: NaiveDateTime,
        weekday: Weekday,
        time: NaiveTime,
    },
    /// Fixed interval from `start`.
    Interval { start: NaiveDateTime, every_secs: i64 },
    /// Several weekdays at one time-of-day, not before `start`.
    Weekdays {
        start: NaiveDateTime,
        days: Vec<Weekday>,
        time: NaiveTime,
    },
}

impl TriggerSpec {
    /// `true` when the trigger can fire more than once.
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::Once { .. })
    }

    /// First fire instant for a fresh registration armed at `now`.
    ///
    /// One-shots report their instant even when it has already passed; the
    /// misfire check at dispatch time decides whether it still fires.
    pub fn first_fire(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Self::Once { at } => Some(*at),
            _ => self.at_or_after(now),
        }
    }

    /// Next fire strictly after `after`, or `None` when exhausted.
    pub fn next_fire_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Self::Once { at } => (*at > after).then_some(*at),
            _ => self.at_or_after(after.checked_add_signed(TimeDelta::nanoseconds(1))?),
        }
    }

    fn at_or_after(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Self::Once { at } => (*at >= t).then_some(*at),
            Self::Daily { start, time } => daily_at_or_after(t.max(*start), *time),
            Self::Weekly {
                start,
                weekday,
                time,
            } => weekly_at_or_after(t.max(*start), *weekday, *time),
            Self::Interval { start, every_secs } => {
                if t <= *start {
                    return Some(*start);
                }
                let every = (*every_secs).max(1);
                let periods = (t - *start).num_seconds() / every;
                let offset = |n: i64| {
                    n.checked_mul(every)
                        .and_then(TimeDelta::try_seconds)
                        .and_then(|d| start.checked_add_signed(d))
                };
                let candidate = offset(periods)?;
                if candidate < t {
                    offset(periods.checked_add(1)?)
                } else {
                    Some(candidate)
                }
            }
            Self::Weekdays { start, days, time } => days
                .iter()
                .filter_map(|day| weekly_at_or_after(t.max(*start), *day, *time))
                .min(),
        }
    }
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once { at } => write!(f, "once at {at}"),
            Self::Daily { time, .. } => write!(f, "daily at {}", time.format("%H:%M:%S")),
            Self::Weekly { weekday, time, .. } => {
                write!(f, "weekly on {weekday} at {}", time.format("%H:%M:%S"))
            }
            Self::Interval { every_secs, .. } => {
                if *every_secs >= 3600 && every_secs % 3600 == 0 {
                    write!(f, "every {} hours", every_secs / 3600)
                } else if every_secs % 60 == 0 {
                    write!(f, "every {} minutes", every_secs / 60)
                } else {
                    write!(f, "every {every_secs} seconds")
                }
            }
            Self::Weekdays { days, time, .. } => {
                let names: Vec<String> = days.iter().map(ToString::to_string).collect();
                write!(f, "on {} at {}", names.join(","), time.format("%H:%M:%S"))
            }
        }
    }
}

/// Build the trigger for a reminder anchored at `anchor`.
pub fn trigger_for(
    anchor: NaiveDateTime,
    repeat: RepeatType,
    payload: Option<&str>,
) -> Result<TriggerSpec, RecurrenceError> {
    let anchor = truncate_subsec(anchor);
    let time = anchor.time();
    match repeat {
        RepeatType::Once => Ok(TriggerSpec::Once { at: anchor }),
        RepeatType::Daily => Ok(TriggerSpec::Daily {
            start: anchor,
            time,
        }),
        RepeatType::Weekly => Ok(TriggerSpec::Weekly {
            start: anchor,
            weekday: anchor.weekday(),
            time,
        }),
        RepeatType::Custom => match CustomRule::from_payload(payload)? {
            CustomRule::Interval { secs } => {
                if secs < MIN_CUSTOM_INTERVAL_SECS {
                    return Err(RecurrenceError::IntervalTooShort(secs));
                }
                if secs > MAX_CUSTOM_INTERVAL_SECS {
                    return Err(RecurrenceError::IntervalTooLong(secs));
                }
                let every_secs =
                    i64::try_from(secs).map_err(|_| RecurrenceError::IntervalTooLong(secs))?;
                Ok(TriggerSpec::Interval {
                    start: anchor,
                    every_secs,
                })
            }
            CustomRule::Weekdays { days } => {
                let mut parsed = days
                    .iter()
                    .map(|d| {
                        d.trim()
                            .parse::<Weekday>()
                            .map_err(|_| RecurrenceError::UnknownWeekday(d.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                parsed.sort_by_key(Weekday::num_days_from_monday);
                parsed.dedup();
                if parsed.is_empty() {
                    return Err(RecurrenceError::NoWeekdays);
                }
                Ok(TriggerSpec::Weekdays {
                    start: anchor,
                    days: parsed,
                    time,
                })
            }
        },
    }
}

/// Result of completing a reminder by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advancement {
    /// One-shot: the reminder is finished.
    Terminal,
    /// Recurring: the reminder continues from this new anchor.
    Next(NaiveDateTime),
}

/// Advance a reminder's anchor after a manual completion.
///
/// Daily moves one day, weekly one week, custom to the rule's next
/// occurrence after the anchor. A result at or before `now` is clamped to
/// `now + catch_up`: one catch-up fire, never a backlog of missed ones.
pub fn advance_anchor(
    anchor: NaiveDateTime,
    repeat: RepeatType,
    payload: Option<&str>,
    now: NaiveDateTime,
    catch_up: TimeDelta,
) -> Result<Advancement, RecurrenceError> {
    let next = match repeat {
        RepeatType::Once => return Ok(Advancement::Terminal),
        RepeatType::Daily => anchor
            .checked_add_signed(TimeDelta::days(1))
            .ok_or(RecurrenceError::OutOfRange)?,
        RepeatType::Weekly => anchor
            .checked_add_signed(TimeDelta::weeks(1))
            .ok_or(RecurrenceError::OutOfRange)?,
        RepeatType::Custom => match trigger_for(anchor, repeat, payload)?.next_fire_after(anchor) {
            Some(next) => next,
            None => return Ok(Advancement::Terminal),
        },
    };

    if next <= now {
        let clamped = now
            .checked_add_signed(catch_up)
            .ok_or(RecurrenceError::OutOfRange)?;
        return Ok(Advancement::Next(truncate_subsec(clamped)));
    }
    Ok(Advancement::Next(next))
}

fn daily_at_or_after(t: NaiveDateTime, time: NaiveTime) -> Option<NaiveDateTime> {
    let candidate = t.date().and_time(time);
    if candidate >= t {
        Some(candidate)
    } else {
        candidate.checked_add_signed(TimeDelta::days(1))
    }
}

fn weekly_at_or_after(t: NaiveDateTime, weekday: Weekday, time: NaiveTime) -> Option<NaiveDateTime> {
    let ahead = (i64::from(weekday.num_days_from_monday())
        - i64::from(t.weekday().num_days_from_monday()))
    .rem_euclid(7);
    let candidate = t
        .date()
        .checked_add_signed(TimeDelta::days(ahead))?
        .and_time(time);
    if candidate >= t {
        Some(candidate)
    } else {
        candidate.checked_add_signed(TimeDelta::weeks(1))
    }
}

fn truncate_subsec(at: NaiveDateTime) -> NaiveDateTime {
    at.with_nanosecond(0).unwrap_or(at)
}
