//! Reminder records and the enums shared by the store and the scheduler.
//!
//! All instants are naive wall-clock values on the server's own clock. The
//! persisted text form is `YYYY-MM-DD HH:MM:SS`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage format for instants.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Stable integer identity of a persisted reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReminderId(pub i64);

impl ReminderId {
    /// Scheduler job identifier for this reminder.
    pub fn job_id(self) -> String {
        format!("reminder_{}", self.0)
    }
}

impl fmt::Display for ReminderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a reminder repeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatType {
    #[default]
    Once,
    Daily,
    Weekly,
    /// Rule carried in the reminder's `repeat_payload`.
    Custom,
}

impl RepeatType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Custom => "custom",
        }
    }

    /// `true` for everything except [`RepeatType::Once`].
    pub fn is_recurring(self) -> bool {
        !matches!(self, Self::Once)
    }
}

impl fmt::Display for RepeatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepeatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Self::Once),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown repeat type '{other}'")),
        }
    }
}

/// Durable lifecycle state of a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Active,
    Snoozed,
    Done,
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Snoozed => "snoozed",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses that must have a live trigger registration.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Snoozed)
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "snoozed" => Ok(Self::Snoozed),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown reminder status '{other}'")),
        }
    }
}

/// A persisted reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Next fire instant for one-shots; the recurrence anchor otherwise.
    pub run_time: NaiveDateTime,
    pub repeat_type: RepeatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_payload: Option<String>,
    pub status: ReminderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snooze_until: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub priority: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Fields supplied when creating a reminder.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReminder {
    pub task: String,
    pub description: Option<String>,
    pub run_time: NaiveDateTime,
    pub repeat_type: RepeatType,
    pub repeat_payload: Option<String>,
    pub priority: i32,
}

impl NewReminder {
    pub fn new(task: impl Into<String>, run_time: NaiveDateTime, repeat_type: RepeatType) -> Self {
        Self {
            task: task.into(),
            description: None,
            run_time,
            repeat_type,
            repeat_payload: None,
            priority: 0,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.repeat_payload = Some(payload.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An unread (or read) fired-reminder notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub message: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

/// Format an instant in the storage format.
pub fn format_time(at: NaiveDateTime) -> String {
    at.format(TIME_FORMAT).to_string()
}

/// Parse a stored instant.
///
/// Accepts the storage format with an optional fractional-seconds tail and
/// the ISO `T` separator; fractional seconds are truncated.
pub fn parse_stored_time(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let trimmed = raw.trim();
    let whole = trimmed.split('.').next().unwrap_or(trimmed);
    NaiveDateTime::parse_from_str(whole, TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(whole, "%Y-%m-%dT%H:%M:%S"))
}
