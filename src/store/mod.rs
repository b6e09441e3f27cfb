//! Durable reminder state.
//!
//! The scheduler consumes persistence through two narrow contracts:
//! [`NotificationSink`] (record a fired reminder) and [`JobStore`] (read and
//! transition reminders). Both are synchronous; the scheduler runs them on
//! the blocking pool so a slow disk never stalls the timer loop.
//!
//! Sub-modules:
//! - `schema`: SQLite DDL definitions.
//! - `sqlite`: SQLite-backed [`SqliteReminderStore`].

pub(crate) mod schema;
pub mod sqlite;

use crate::reminder::{NewReminder, Notification, Reminder, ReminderId, ReminderStatus};
use chrono::NaiveDateTime;

pub use sqlite::SqliteReminderStore;

/// Errors from the reminder store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("reminder not found: {0}")]
    NotFound(ReminderId),

    #[error("reminder {id} is {status} and can no longer change")]
    NotLive { id: ReminderId, status: ReminderStatus },

    #[error("malformed reminder {}: {}", .0.id, .0.reason)]
    Malformed(MalformedReminder),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

/// A persisted row that could not be turned into a [`Reminder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedReminder {
    pub id: ReminderId,
    pub reason: String,
}

/// One row of a bulk read: either a typed reminder or the reason it is unusable.
///
/// Bulk reads never fail as a whole because of one bad row.
pub type LoadedReminder = std::result::Result<Reminder, MalformedReminder>;

/// Records fired reminders as unread notifications.
pub trait NotificationSink: Send + Sync + 'static {
    fn record(&self, message: &str) -> Result<(), StoreError>;
}

/// Read/write contract the scheduling engine needs from durable storage.
pub trait JobStore: Send + Sync + 'static {
    /// Insert a new `active` reminder.
    fn add_reminder(&self, new: &NewReminder) -> Result<Reminder, StoreError>;

    /// Fetch one reminder by id.
    fn get_reminder(&self, id: ReminderId) -> Result<Reminder, StoreError>;

    /// Reminders with status `active` or `snoozed`, ordered by `run_time`.
    fn get_active_reminders(&self) -> Result<Vec<LoadedReminder>, StoreError>;

    /// `active` reminders whose `run_time` is before `now`.
    fn get_overdue_reminders(&self, now: NaiveDateTime) -> Result<Vec<LoadedReminder>, StoreError>;

    /// Reminders of any status whose `run_time` falls in `[from, to)`.
    fn get_reminders_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<LoadedReminder>, StoreError>;

    /// Set the status. Leaving `snoozed` clears `snooze_until`.
    fn update_status(&self, id: ReminderId, status: ReminderStatus) -> Result<(), StoreError>;

    /// Move the run time (or recurrence anchor) and reactivate the reminder.
    ///
    /// Only `active` or `snoozed` reminders move; others give
    /// [`StoreError::NotLive`].
    fn update_reminder_time(&self, id: ReminderId, run_time: NaiveDateTime)
    -> Result<(), StoreError>;

    /// Mark snoozed until `until`. Same liveness rule as `update_reminder_time`.
    fn snooze_reminder(&self, id: ReminderId, until: NaiveDateTime) -> Result<(), StoreError>;

    /// Mark done, stamping `completion_time`.
    fn complete_reminder(&self, id: ReminderId, at: NaiveDateTime) -> Result<(), StoreError>;

    /// Append an unread notification, returning its id.
    fn add_notification(&self, message: &str) -> Result<i64, StoreError>;

    fn unread_notifications(&self) -> Result<Vec<Notification>, StoreError>;

    /// Returns `true` when the notification existed.
    fn mark_notification_read(&self, id: i64) -> Result<bool, StoreError>;

    /// Returns the number of notifications that were unread.
    fn mark_all_notifications_read(&self) -> Result<usize, StoreError>;
}
