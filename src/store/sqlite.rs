//! SQLite-backed reminder store.
//!
//! A single database file holds reminders, notifications and the schema
//! version stamp. Thread-safe via an internal `Mutex<Connection>`; all
//! statements are serialized.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use super::schema::{apply_schema, read_schema_version};
use super::{JobStore, LoadedReminder, MalformedReminder, NotificationSink, StoreError};
use crate::reminder::{
    NewReminder, Notification, Reminder, ReminderId, ReminderStatus, RepeatType, format_time,
    parse_stored_time,
};
use crate::scheduler::clock::{Clock, SystemClock};

const REMINDER_COLUMNS: &str = "id, task, description, run_time, repeat_type, repeat_payload, \
     status, snooze_until, completion_time, priority, created_at, updated_at";

/// SQLite implementation of [`JobStore`] and [`NotificationSink`].
pub struct SqliteReminderStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteReminderStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        apply_schema(&conn)?;
        info!(path = %path.display(), "reminder store opened");
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    /// Private in-memory database, gone when the store is dropped.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` for `created_at` / `updated_at` / notification stamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn stamp(&self) -> String {
        format_time(self.clock.now())
    }

    fn query_reminders(
        &self,
        where_clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<LoadedReminder>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE {where_clause} ORDER BY run_time ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, row_to_reminder)?;

        let mut reminders = Vec::new();
        for r in rows {
            reminders.push(r?);
        }
        Ok(reminders)
    }

    fn update_one(
        &self,
        id: ReminderId,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(sql, args)?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Like `update_one`, for statements that only touch live reminders.
    /// A miss is resolved into `NotFound` or `NotLive`.
    fn update_live(
        &self,
        id: ReminderId,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        if conn.execute(sql, args)? > 0 {
            return Ok(());
        }
        let status_raw: Option<String> = conn
            .query_row(
                "SELECT status FROM reminders WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        let Some(status_raw) = status_raw else {
            return Err(StoreError::NotFound(id));
        };
        match status_raw.parse::<ReminderStatus>() {
            Ok(status) => Err(StoreError::NotLive { id, status }),
            Err(_) => Err(StoreError::Malformed(MalformedReminder {
                id,
                reason: format!("unknown status '{status_raw}'"),
            })),
        }
    }
}

impl JobStore for SqliteReminderStore {
    fn add_reminder(&self, new: &NewReminder) -> Result<Reminder, StoreError> {
        let id = {
            let conn = self.lock()?;
            let now = self.stamp();
            conn.execute(
                "INSERT INTO reminders \
                 (task, description, run_time, repeat_type, repeat_payload, status, priority, \
                  created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?7)",
                params![
                    new.task,
                    new.description,
                    format_time(new.run_time),
                    new.repeat_type.as_str(),
                    new.repeat_payload,
                    new.priority,
                    now
                ],
            )?;
            ReminderId(conn.last_insert_rowid())
        };
        debug!(%id, task = %new.task, "reminder inserted");
        self.get_reminder(id)
    }

    fn get_reminder(&self, id: ReminderId) -> Result<Reminder, StoreError> {
        let conn = self.lock()?;
        let loaded = conn
            .query_row(
                &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"),
                params![id.0],
                row_to_reminder,
            )
            .optional()?;
        match loaded {
            Some(Ok(reminder)) => Ok(reminder),
            Some(Err(malformed)) => Err(StoreError::Malformed(malformed)),
            None => Err(StoreError::NotFound(id)),
        }
    }

    fn get_active_reminders(&self) -> Result<Vec<LoadedReminder>, StoreError> {
        self.query_reminders("status IN ('active', 'snoozed')", params![])
    }

    fn get_overdue_reminders(&self, now: NaiveDateTime) -> Result<Vec<LoadedReminder>, StoreError> {
        let now = format_time(now);
        self.query_reminders("status = 'active' AND run_time < ?1", params![now])
    }

    fn get_reminders_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<LoadedReminder>, StoreError> {
        let from = format_time(from);
        let to = format_time(to);
        self.query_reminders("run_time >= ?1 AND run_time < ?2", params![from, to])
    }

    fn update_status(&self, id: ReminderId, status: ReminderStatus) -> Result<(), StoreError> {
        let now = self.stamp();
        let sql = if status == ReminderStatus::Snoozed {
            "UPDATE reminders SET status = ?1, updated_at = ?2 WHERE id = ?3"
        } else {
            "UPDATE reminders SET status = ?1, snooze_until = NULL, updated_at = ?2 WHERE id = ?3"
        };
        self.update_one(id, sql, params![status.as_str(), now, id.0])?;
        debug!(%id, %status, "reminder status updated");
        Ok(())
    }

    fn update_reminder_time(
        &self,
        id: ReminderId,
        run_time: NaiveDateTime,
    ) -> Result<(), StoreError> {
        let now = self.stamp();
        let run_time = format_time(run_time);
        self.update_live(
            id,
            "UPDATE reminders SET run_time = ?1, status = 'active', snooze_until = NULL, \
             updated_at = ?2 WHERE id = ?3 AND status IN ('active', 'snoozed')",
            params![run_time, now, id.0],
        )?;
        debug!(%id, %run_time, "reminder rescheduled");
        Ok(())
    }

    fn snooze_reminder(&self, id: ReminderId, until: NaiveDateTime) -> Result<(), StoreError> {
        let now = self.stamp();
        let until = format_time(until);
        self.update_live(
            id,
            "UPDATE reminders SET status = 'snoozed', snooze_until = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status IN ('active', 'snoozed')",
            params![until, now, id.0],
        )
    }

    fn complete_reminder(&self, id: ReminderId, at: NaiveDateTime) -> Result<(), StoreError> {
        let now = self.stamp();
        let at = format_time(at);
        self.update_one(
            id,
            "UPDATE reminders SET status = 'done', completion_time = ?1, snooze_until = NULL, \
             updated_at = ?2 WHERE id = ?3",
            params![at, now, id.0],
        )
    }

    fn add_notification(&self, message: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notifications (message, is_read, created_at) VALUES (?1, 0, ?2)",
            params![message, self.stamp()],
        )?;
        let id = conn.last_insert_rowid();
        info!(notification_id = id, message, "notification added");
        Ok(id)
    }

    fn unread_notifications(&self) -> Result<Vec<Notification>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, message, is_read, created_at FROM notifications \
             WHERE is_read = 0 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let created_raw: String = row.get(3)?;
            let created_at = parse_stored_time(&created_raw).unwrap_or_else(|e| {
                warn!(
                    notification_id = id,
                    created_at = %created_raw,
                    "unreadable notification timestamp: {e}"
                );
                NaiveDateTime::default()
            });
            Ok(Notification {
                id,
                message: row.get(1)?,
                is_read: row.get::<_, i64>(2)? != 0,
                created_at,
            })
        })?;

        let mut notifications = Vec::new();
        for n in rows {
            notifications.push(n?);
        }
        Ok(notifications)
    }

    fn mark_notification_read(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }

    fn mark_all_notifications_read(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute("UPDATE notifications SET is_read = 1 WHERE is_read = 0", [])?;
        Ok(changed)
    }
}

impl NotificationSink for SqliteReminderStore {
    fn record(&self, message: &str) -> Result<(), StoreError> {
        self.add_notification(message).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

/// Decode a row; SQL-level failures are errors, content problems are
/// reported as [`MalformedReminder`] so one bad row never hides the rest.
fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<LoadedReminder> {
    let id = ReminderId(row.get(0)?);
    let run_time_raw: String = row.get(3)?;
    let repeat_raw: String = row.get(4)?;
    let status_raw: String = row.get(6)?;
    let snooze_raw: Option<String> = row.get(7)?;
    let completion_raw: Option<String> = row.get(8)?;
    let created_raw: String = row.get(10)?;
    let updated_raw: String = row.get(11)?;

    let malformed = |reason: String| MalformedReminder { id, reason };

    let run_time = match parse_stored_time(&run_time_raw) {
        Ok(t) => t,
        Err(e) => return Ok(Err(malformed(format!("bad run_time '{run_time_raw}': {e}")))),
    };
    let repeat_type = match repeat_raw.parse::<RepeatType>() {
        Ok(r) => r,
        Err(e) => return Ok(Err(malformed(e))),
    };
    let status = match status_raw.parse::<ReminderStatus>() {
        Ok(s) => s,
        Err(e) => return Ok(Err(malformed(e))),
    };
    let snooze_until = match snooze_raw.as_deref().map(parse_stored_time).transpose() {
        Ok(t) => t,
        Err(e) => return Ok(Err(malformed(format!("bad snooze_until: {e}")))),
    };
    let completion_time = match completion_raw.as_deref().map(parse_stored_time).transpose() {
        Ok(t) => t,
        Err(e) => return Ok(Err(malformed(format!("bad completion_time: {e}")))),
    };

    Ok(Ok(Reminder {
        id,
        task: row.get(1)?,
        description: row.get(2)?,
        run_time,
        repeat_type,
        repeat_payload: row.get(5)?,
        status,
        snooze_until,
        completion_time,
        priority: row.get(9)?,
        created_at: parse_stored_time(&created_raw).unwrap_or(run_time),
        updated_at: parse_stored_time(&updated_raw).unwrap_or(run_time),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
