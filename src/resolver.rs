//! Turning free text into a task and a fire instant.
//!
//! [`TemporalResolver`] is the seam; [`KeywordResolver`] is a small
//! rule-based implementation covering the phrases people actually type:
//! "in 10 minutes", "at 5pm", "tomorrow at 9am", "every day at 7:30",
//! "on friday". Everything is computed relative to the `now` the caller
//! passes in, which is normally the client's clock, not the server's.

use crate::reminder::RepeatType;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Weekday};
use regex::{Captures, Regex};
use serde::Serialize;

/// Task text used when nothing is left after stripping the time phrase.
pub const DEFAULT_TASK: &str = "Reminder";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("I couldn't quite catch the time. Try something like 'at 5pm' or 'tomorrow'.")]
    NoTimeFound,

    #[error("nothing to schedule")]
    EmptyInput,

    #[error("that time is too far away to schedule")]
    OutOfRange,

    #[error("invalid resolver pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// What the resolver understood.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub task: String,
    /// Target instant on the clock of the `now` passed to `resolve`.
    pub run_time: NaiveDateTime,
    pub repeat_type: RepeatType,
    /// The time came from a loose phrase like "later" or "tonight".
    pub is_vague: bool,
    /// The exact text that produced `run_time`.
    pub matched: String,
}

pub trait TemporalResolver: Send + Sync {
    fn resolve(&self, text: &str, now: NaiveDateTime) -> Result<Resolution, ResolveError>;
}

/// Byte range of the input consumed by a time or recurrence phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn of(caps: &Captures<'_>) -> Option<Self> {
        caps.get(0).map(|m| Self {
            start: m.start(),
            end: m.end(),
        })
    }
}

enum DayWord {
    Today,
    Tomorrow,
    Weekday(Weekday),
}

/// Rule-based resolver.
pub struct KeywordResolver {
    daily: Regex,
    weekly: Regex,
    relative: Regex,
    half_hour: Regex,
    clock_12h: Regex,
    clock_24h: Regex,
    at_hour: Regex,
    noon: Regex,
    day: Regex,
    weekday: Regex,
    vague: Regex,
    lead_in: Regex,
    trailing: Regex,
    spaces: Regex,
}

impl KeywordResolver {
    pub fn new() -> Result<Self, ResolveError> {
        Ok(Self {
            daily: Regex::new(r"(?i)\b(?:every\s+day|daily)\b")?,
            weekly: Regex::new(r"(?i)\b(?:every\s+week|weekly)\b")?,
            relative: Regex::new(
                r"(?i)\bin\s+(\d+|an?|one|two|three|four|five|six|seven|eight|nine|ten|fifteen|twenty|thirty)\s+(seconds?|secs?|minutes?|mins?|hours?|hrs?|days?|weeks?)\b",
            )?,
            half_hour: Regex::new(r"(?i)\bin\s+half\s+an?\s+hour\b")?,
            clock_12h: Regex::new(r"(?i)\b(?:at\s+)?(\d{1,2})(?::(\d{2}))?\s*([ap])\.?m\b\.?")?,
            clock_24h: Regex::new(r"(?i)\b(?:at\s+)?(\d{1,2}):(\d{2})\b")?,
            at_hour: Regex::new(r"(?i)\bat\s+(\d{1,2})\b")?,
            noon: Regex::new(r"(?i)\b(?:at\s+)?(noon|midday|midnight)\b")?,
            day: Regex::new(r"(?i)\b(today|tomorrow)\b")?,
            weekday: Regex::new(
                r"(?i)\b(?:on\s+)?(?:next\s+)?(mon|tues|wednes|thurs|fri|satur|sun)day\b",
            )?,
            vague: Regex::new(r"(?i)\b(later|soon|tonight|this\s+evening)\b")?,
            lead_in: Regex::new(r"(?i)^\s*(?:remind\s+me(?:\s+(?:to|at))?|remind|me)\b\s*")?,
            trailing: Regex::new(r"(?i)\s*\b(?:to|on|at)\s*$")?,
            spaces: Regex::new(r"\s+")?,
        })
    }

    /// A matched offset phrase. The delta is `None` when the amount does not
    /// fit in a `TimeDelta`.
    fn relative_offset(&self, text: &str) -> Option<(Option<TimeDelta>, Span)> {
        if let Some(caps) = self.half_hour.captures(text) {
            return Some((Some(TimeDelta::minutes(30)), Span::of(&caps)?));
        }
        let caps = self.relative.captures(text)?;
        let amount = number_word(caps.get(1)?.as_str())?;
        let unit = caps.get(2)?.as_str().to_ascii_lowercase();
        let offset = match unit.trim_end_matches('s') {
            "second" | "sec" => TimeDelta::try_seconds(amount),
            "minute" | "min" => TimeDelta::try_minutes(amount),
            "hour" | "hr" => TimeDelta::try_hours(amount),
            "day" => TimeDelta::try_days(amount),
            "week" => TimeDelta::try_weeks(amount),
            _ => return None,
        };
        Some((offset, Span::of(&caps)?))
    }

    fn clock_time(&self, text: &str) -> Option<(NaiveTime, Span)> {
        for caps in self.clock_12h.captures_iter(text) {
            let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
            let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
            if !(1..=12).contains(&hour) {
                continue;
            }
            let pm = caps.get(3)?.as_str().eq_ignore_ascii_case("p");
            let hour = match (hour, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, true) => h + 12,
                (h, false) => h,
            };
            if let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) {
                return Some((time, Span::of(&caps)?));
            }
        }
        for caps in self.clock_24h.captures_iter(text) {
            let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
            let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
            if let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) {
                return Some((time, Span::of(&caps)?));
            }
        }
        if let Some(caps) = self.noon.captures(text) {
            let hour = if caps.get(1)?.as_str().eq_ignore_ascii_case("midnight") {
                0
            } else {
                12
            };
            return Some((NaiveTime::from_hms_opt(hour, 0, 0)?, Span::of(&caps)?));
        }
        for caps in self.at_hour.captures_iter(text) {
            let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
            if let Some(time) = NaiveTime::from_hms_opt(hour, 0, 0) {
                return Some((time, Span::of(&caps)?));
            }
        }
        None
    }

    fn day_word(&self, text: &str) -> Option<(DayWord, Span)> {
        if let Some(caps) = self.day.captures(text) {
            let word = if caps.get(1)?.as_str().eq_ignore_ascii_case("tomorrow") {
                DayWord::Tomorrow
            } else {
                DayWord::Today
            };
            return Some((word, Span::of(&caps)?));
        }
        let caps = self.weekday.captures(text)?;
        let weekday = match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
            "mon" => Weekday::Mon,
            "tues" => Weekday::Tue,
            "wednes" => Weekday::Wed,
            "thurs" => Weekday::Thu,
            "fri" => Weekday::Fri,
            "satur" => Weekday::Sat,
            _ => Weekday::Sun,
        };
        Some((DayWord::Weekday(weekday), Span::of(&caps)?))
    }

    fn vague_time(&self, text: &str, now: NaiveDateTime) -> Option<(NaiveDateTime, Span)> {
        let caps = self.vague.captures(text)?;
        let word = caps.get(1)?.as_str().to_ascii_lowercase();
        let at = match word.as_str() {
            "soon" => now.checked_add_signed(TimeDelta::minutes(15))?,
            "later" => now.checked_add_signed(TimeDelta::hours(1))?,
            "tonight" => roll_forward(now.date().and_hms_opt(20, 0, 0)?, now)?,
            _ => roll_forward(now.date().and_hms_opt(19, 0, 0)?, now)?,
        };
        Some((at, Span::of(&caps)?))
    }

    fn clean_task(&self, text: &str, spans: &mut Vec<Span>) -> String {
        spans.sort();
        let mut kept = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in spans.iter() {
            if span.start > cursor {
                kept.push_str(&text[cursor..span.start]);
                kept.push(' ');
            }
            cursor = cursor.max(span.end);
        }
        if cursor < text.len() {
            kept.push_str(&text[cursor..]);
        }

        let collapsed = self.spaces.replace_all(kept.trim(), " ");
        let without_lead = self.lead_in.replace(&collapsed, "");
        let mut task = without_lead.into_owned();
        loop {
            let trimmed = self.trailing.replace(&task, "").into_owned();
            if trimmed == task {
                break;
            }
            task = trimmed;
        }
        let task = task.trim();
        if task.is_empty() {
            DEFAULT_TASK.to_owned()
        } else {
            task.to_owned()
        }
    }
}

impl TemporalResolver for KeywordResolver {
    fn resolve(&self, text: &str, now: NaiveDateTime) -> Result<Resolution, ResolveError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ResolveError::EmptyInput);
        }
        let now = now.with_nanosecond(0).unwrap_or(now);

        let mut spans = Vec::new();
        let repeat_type = if let Some(m) = self.daily.find(text) {
            spans.push(Span {
                start: m.start(),
                end: m.end(),
            });
            RepeatType::Daily
        } else if let Some(m) = self.weekly.find(text) {
            spans.push(Span {
                start: m.start(),
                end: m.end(),
            });
            RepeatType::Weekly
        } else {
            RepeatType::Once
        };

        let mut time_spans = Vec::new();
        let mut is_vague = false;

        let run_time = if let Some((offset, span)) = self.relative_offset(text) {
            time_spans.push(span);
            offset
                .and_then(|offset| now.checked_add_signed(offset))
                .ok_or(ResolveError::OutOfRange)?
        } else {
            let clock = self.clock_time(text);
            let day = self.day_word(text);
            match (clock, day) {
                (None, None) => {
                    let (at, span) = self
                        .vague_time(text, now)
                        .ok_or(ResolveError::NoTimeFound)?;
                    time_spans.push(span);
                    is_vague = true;
                    at
                }
                (clock, day) => {
                    let time = match &clock {
                        Some((time, span)) => {
                            time_spans.push(*span);
                            *time
                        }
                        None => now.time(),
                    };
                    match day {
                        Some((DayWord::Tomorrow, span)) => {
                            time_spans.push(span);
                            now.date()
                                .succ_opt()
                                .ok_or(ResolveError::OutOfRange)?
                                .and_time(time)
                        }
                        Some((DayWord::Today, span)) => {
                            time_spans.push(span);
                            now.date().and_time(time)
                        }
                        Some((DayWord::Weekday(weekday), span)) => {
                            time_spans.push(span);
                            next_weekday(now, weekday, time).ok_or(ResolveError::OutOfRange)?
                        }
                        None => roll_forward(now.date().and_time(time), now)
                            .ok_or(ResolveError::OutOfRange)?,
                    }
                }
            }
        };

        time_spans.sort();
        let matched = time_spans
            .iter()
            .map(|s| text[s.start..s.end].trim())
            .collect::<Vec<_>>()
            .join(" ");
        spans.extend(time_spans);
        let task = self.clean_task(text, &mut spans);

        Ok(Resolution {
            task,
            run_time,
            repeat_type,
            is_vague,
            matched,
        })
    }
}

/// Push a time already past today to tomorrow. `None` past the calendar's end.
fn roll_forward(candidate: NaiveDateTime, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if candidate <= now {
        candidate.checked_add_signed(TimeDelta::days(1))
    } else {
        Some(candidate)
    }
}

fn next_weekday(now: NaiveDateTime, weekday: Weekday, time: NaiveTime) -> Option<NaiveDateTime> {
    let ahead = (i64::from(weekday.num_days_from_monday())
        - i64::from(now.weekday().num_days_from_monday()))
    .rem_euclid(7);
    let date: NaiveDate = now.date().checked_add_signed(TimeDelta::days(ahead))?;
    let candidate = date.and_time(time);
    if candidate <= now {
        candidate.checked_add_signed(TimeDelta::weeks(1))
    } else {
        Some(candidate)
    }
}

fn number_word(word: &str) -> Option<i64> {
    if let Ok(n) = word.parse::<i64>() {
        return Some(n);
    }
    let n = match word.to_ascii_lowercase().as_str() {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "fifteen" => 15,
        "twenty" => 20,
        "thirty" => 30,
        _ => return None,
    };
    Some(n)
}
