//! Request-level operations composed from the store, the scheduler handle and
//! the temporal resolver.
//!
//! Store calls are synchronous, so every one of them is pushed onto the
//! blocking pool; the scheduler is only ever touched through its handle.

use crate::config::ChimeConfig;
use crate::error::{ChimeError, Result};
use crate::reminder::{NewReminder, Notification, Reminder, ReminderId, ReminderStatus, RepeatType};
use crate::resolver::{Resolution, TemporalResolver};
use crate::scheduler::clock::{Clock, SystemClock, parse_client_time, reconcile};
use crate::scheduler::recurrence::{Advancement, RecurrenceError, advance_anchor, trigger_for};
use crate::scheduler::registry::ScheduleRequest;
use crate::scheduler::runner::SchedulerHandle;
use crate::store::{JobStore, StoreError};
use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Messages that acknowledge notifications instead of scheduling anything.
const SILENCERS: &[&str] = &["done", "ok", "okay", "stop", "thanks", "thank you"];

/// Result of [`ReminderService::schedule_text`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// The text was an acknowledgement; unread notifications were cleared.
    Silenced { cleared: usize },
    /// Nothing persisted; what would have been scheduled.
    Preview {
        resolution: Resolution,
        server_target: NaiveDateTime,
    },
    Scheduled {
        reminder: Reminder,
        resolution: Resolution,
        next_fire: Option<NaiveDateTime>,
    },
}

/// Outcome of [`ReminderService::complete`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completion {
    /// One-shot finished.
    Done,
    /// Recurring reminder moved to its next anchor.
    Advanced { next_run: NaiveDateTime },
}

#[derive(Clone)]
pub struct ReminderService {
    store: Arc<dyn JobStore>,
    scheduler: SchedulerHandle,
    resolver: Arc<dyn TemporalResolver>,
    clock: Arc<dyn Clock>,
    catch_up: TimeDelta,
    default_snooze_mins: u32,
}

impl ReminderService {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: SchedulerHandle,
        resolver: Arc<dyn TemporalResolver>,
        config: &ChimeConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            resolver,
            clock: Arc::new(SystemClock),
            catch_up: config.scheduler.catch_up(),
            default_snooze_mins: config.notifications.default_snooze_mins,
        }
    }

    /// Must be the same clock the scheduler runs on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Interpret free text and schedule it.
    ///
    /// `client_now_hint` is the caller's idea of "now"; relative phrases are
    /// resolved against it and the result is shifted onto the server clock.
    /// With `preview` set nothing is persisted or registered.
    pub async fn schedule_text(
        &self,
        text: &str,
        client_now_hint: Option<&str>,
        preview: bool,
    ) -> Result<ScheduleOutcome> {
        if is_silencer(text) {
            let cleared = self.mark_all_read().await?;
            info!(cleared, "notifications silenced");
            return Ok(ScheduleOutcome::Silenced { cleared });
        }

        let server_now = self.clock.now();
        let base = client_now_hint
            .and_then(parse_client_time)
            .unwrap_or(server_now);
        let resolution = self.resolver.resolve(text, base)?;
        let server_target = reconcile(client_now_hint, resolution.run_time, server_now).server_target;

        if preview {
            return Ok(ScheduleOutcome::Preview {
                resolution,
                server_target,
            });
        }

        let (reminder, next_fire) = self
            .schedule(
                &resolution.task,
                server_target,
                resolution.repeat_type,
                None,
            )
            .await?;
        Ok(ScheduleOutcome::Scheduled {
            reminder,
            resolution,
            next_fire,
        })
    }

    /// Persist a reminder and arm it.
    ///
    /// The recurrence rule is validated first, so an invalid custom payload
    /// never leaves an unregistered row behind.
    pub async fn schedule(
        &self,
        task: &str,
        run_time: NaiveDateTime,
        repeat_type: RepeatType,
        repeat_payload: Option<String>,
    ) -> Result<(Reminder, Option<NaiveDateTime>)> {
        trigger_for(run_time, repeat_type, repeat_payload.as_deref())?;

        let mut new = NewReminder::new(task, run_time, repeat_type);
        new.repeat_payload = repeat_payload;
        let reminder = self.blocking(move |store| store.add_reminder(&new)).await?;
        let next_fire = self
            .scheduler
            .register(ScheduleRequest::from_reminder(&reminder))
            .await?;
        info!(
            job_id = %reminder.id.job_id(),
            task = %reminder.task,
            repeat = %reminder.repeat_type,
            ?next_fire,
            "reminder scheduled"
        );
        Ok((reminder, next_fire))
    }

    /// Cancel a reminder. Deregistration of an already idle reminder is fine.
    pub async fn cancel(&self, id: ReminderId) -> Result<()> {
        self.blocking(move |store| store.update_status(id, ReminderStatus::Cancelled))
            .await?;
        self.scheduler.cancel(id).await?;
        info!(job_id = %id.job_id(), "reminder cancelled");
        Ok(())
    }

    /// Complete by hand. One-shots finish; recurring reminders move their
    /// anchor forward and are re-armed from it.
    ///
    /// Cancelled and done reminders are left alone.
    pub async fn complete(&self, id: ReminderId) -> Result<Completion> {
        let reminder = self.blocking(move |store| store.get_reminder(id)).await?;
        if !reminder.status.is_live() {
            return Err(StoreError::NotLive {
                id,
                status: reminder.status,
            }
            .into());
        }
        let now = self.clock.now();

        match advance_anchor(
            reminder.run_time,
            reminder.repeat_type,
            reminder.repeat_payload.as_deref(),
            now,
            self.catch_up,
        )? {
            Advancement::Terminal => {
                self.blocking(move |store| store.complete_reminder(id, now))
                    .await?;
                self.scheduler.cancel(id).await?;
                info!(job_id = %id.job_id(), "reminder completed");
                Ok(Completion::Done)
            }
            Advancement::Next(next_run) => {
                let updated = self
                    .blocking(move |store| {
                        store.update_reminder_time(id, next_run)?;
                        store.get_reminder(id)
                    })
                    .await?;
                self.scheduler
                    .register(ScheduleRequest::from_reminder(&updated))
                    .await?;
                info!(job_id = %id.job_id(), %next_run, "recurring reminder advanced");
                Ok(Completion::Advanced { next_run })
            }
        }
    }

    /// Snooze for `minutes` (the configured default when `None`).
    ///
    /// Only live reminders can be snoozed.
    pub async fn snooze(&self, id: ReminderId, minutes: Option<u32>) -> Result<Reminder> {
        let minutes = minutes.unwrap_or(self.default_snooze_mins);
        let until = self
            .clock
            .now()
            .checked_add_signed(TimeDelta::minutes(i64::from(minutes)))
            .ok_or(RecurrenceError::OutOfRange)?;
        let snoozed = self
            .blocking(move |store| {
                store.snooze_reminder(id, until)?;
                store.get_reminder(id)
            })
            .await?;
        self.scheduler
            .register(ScheduleRequest::from_reminder(&snoozed))
            .await?;
        info!(job_id = %id.job_id(), %until, "reminder snoozed");
        Ok(snoozed)
    }

    /// Live reminders; unreadable rows are logged and left out.
    pub async fn active_reminders(&self) -> Result<Vec<Reminder>> {
        let loaded = self.blocking(|store| store.get_active_reminders()).await?;
        Ok(loaded
            .into_iter()
            .filter_map(|r| match r {
                Ok(reminder) => Some(reminder),
                Err(bad) => {
                    warn!(id = %bad.id, reason = %bad.reason, "unreadable reminder hidden");
                    None
                }
            })
            .collect())
    }

    pub async fn notifications(&self) -> Result<Vec<Notification>> {
        self.blocking(|store| store.unread_notifications()).await
    }

    pub async fn mark_notification_read(&self, id: i64) -> Result<bool> {
        self.blocking(move |store| store.mark_notification_read(id))
            .await
    }

    pub async fn mark_all_read(&self) -> Result<usize> {
        self.blocking(|store| store.mark_all_notifications_read())
            .await
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn JobStore) -> std::result::Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| ChimeError::Scheduler(format!("store task failed: {e}")))?
            .map_err(ChimeError::from)
    }
}

fn is_silencer(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase();
    SILENCERS.contains(&normalized.as_str())
}
