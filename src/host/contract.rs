//! Versioned request/response envelopes for the `chimed` JSON protocol.

use crate::reminder::ReminderId;
use serde::{Deserialize, Serialize};

/// Contract version stamped on every response.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
    #[serde(rename = "reminder.schedule")]
    ReminderSchedule,
    #[serde(rename = "reminder.cancel")]
    ReminderCancel,
    #[serde(rename = "reminder.complete")]
    ReminderComplete,
    #[serde(rename = "reminder.snooze")]
    ReminderSnooze,
    #[serde(rename = "reminder.list")]
    ReminderList,
    #[serde(rename = "notification.list")]
    NotificationList,
    #[serde(rename = "notification.read")]
    NotificationRead,
    #[serde(rename = "scheduler.snapshot")]
    SchedulerSnapshot,
}

/// One request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default = "default_version")]
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Payload of `reminder.schedule`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchedulePayload {
    pub text: String,
    /// Client wall clock, e.g. `2024-03-01T10:00:00` or RFC 3339.
    #[serde(default)]
    pub client_now: Option<String>,
    #[serde(default)]
    pub preview: bool,
}

/// Payload of `reminder.cancel` and `reminder.complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ReminderRef {
    pub id: ReminderId,
}

/// Payload of `reminder.snooze`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SnoozePayload {
    pub id: ReminderId,
    #[serde(default)]
    pub minutes: Option<u32>,
}

/// Payload of `notification.read`; no id marks everything read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ReadPayload {
    #[serde(default)]
    pub id: Option<i64>,
}
