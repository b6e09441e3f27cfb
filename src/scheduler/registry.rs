//! In-memory trigger registry.
//!
//! Holds at most one live [`Registration`] per reminder id. Every insert
//! bumps a generation counter; due events carry the generation they were
//! produced for, so an event for a superseded or cancelled registration is
//! recognised as stale and never fires.

use crate::reminder::{Reminder, ReminderId, RepeatType};
use crate::scheduler::recurrence::{RecurrenceError, TriggerSpec, trigger_for};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;

/// Everything needed to arm a reminder.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    pub id: ReminderId,
    pub task: String,
    /// Fire instant for one-shots, anchor for recurring reminders.
    pub run_time: NaiveDateTime,
    pub repeat_type: RepeatType,
    pub repeat_payload: Option<String>,
    /// When set, the reminder fires once at this instant first; a recurring
    /// reminder then resumes its normal schedule.
    pub snooze_until: Option<NaiveDateTime>,
}

impl ScheduleRequest {
    pub fn new(
        id: ReminderId,
        task: impl Into<String>,
        run_time: NaiveDateTime,
        repeat_type: RepeatType,
    ) -> Self {
        Self {
            id,
            task: task.into(),
            run_time,
            repeat_type,
            repeat_payload: None,
            snooze_until: None,
        }
    }

    pub fn with_payload(mut self, payload: Option<String>) -> Self {
        self.repeat_payload = payload;
        self
    }

    pub fn snoozed_until(mut self, until: NaiveDateTime) -> Self {
        self.snooze_until = Some(until);
        self
    }

    /// Request matching a persisted reminder's current state.
    pub fn from_reminder(reminder: &Reminder) -> Self {
        Self {
            id: reminder.id,
            task: reminder.task.clone(),
            run_time: reminder.run_time,
            repeat_type: reminder.repeat_type,
            repeat_payload: reminder.repeat_payload.clone(),
            snooze_until: reminder.snooze_until,
        }
    }
}

/// A live trigger registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub reminder_id: ReminderId,
    pub job_id: String,
    pub task: String,
    pub repeat_type: RepeatType,
    pub trigger: TriggerSpec,
    /// Recurring trigger to restore after a snoozed fire.
    pub resume: Option<TriggerSpec>,
    /// Armed at a snooze instant rather than the natural schedule.
    pub snoozed: bool,
    pub next_fire: NaiveDateTime,
    pub generation: u64,
}

/// Serializable view of a registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationInfo {
    pub job_id: String,
    pub reminder_id: ReminderId,
    pub task: String,
    pub repeat_type: RepeatType,
    pub trigger: TriggerSpec,
    pub next_fire: NaiveDateTime,
    pub snoozed: bool,
}

/// "This registration is due" message consumed by the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueEvent {
    pub reminder_id: ReminderId,
    pub generation: u64,
    pub due_at: NaiveDateTime,
}

#[derive(Debug, Default)]
pub struct TriggerRegistry {
    entries: HashMap<ReminderId, Registration>,
    next_generation: u64,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `request`, replacing any existing registration for the same id.
    ///
    /// Returns the first fire instant, or `None` when the trigger can never
    /// fire (the old registration is still removed in that case).
    pub fn insert(
        &mut self,
        request: &ScheduleRequest,
        now: NaiveDateTime,
    ) -> Result<Option<NaiveDateTime>, RecurrenceError> {
        let base = trigger_for(
            request.run_time,
            request.repeat_type,
            request.repeat_payload.as_deref(),
        )?;

        let (trigger, resume) = match request.snooze_until {
            Some(until) => {
                let resume = base.is_recurring().then_some(base);
                (TriggerSpec::Once { at: until }, resume)
            }
            None => (base, None),
        };

        self.entries.remove(&request.id);
        let Some(next_fire) = trigger.first_fire(now) else {
            return Ok(None);
        };

        let generation = self.bump_generation();
        self.entries.insert(
            request.id,
            Registration {
                reminder_id: request.id,
                job_id: request.id.job_id(),
                task: request.task.clone(),
                repeat_type: request.repeat_type,
                trigger,
                resume,
                snoozed: request.snooze_until.is_some(),
                next_fire,
                generation,
            },
        );
        Ok(Some(next_fire))
    }

    /// Remove the registration for `id`; `None` if there was none.
    pub fn remove(&mut self, id: ReminderId) -> Option<Registration> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: ReminderId) -> Option<&Registration> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: ReminderId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest pending fire instant.
    pub fn earliest(&self) -> Option<NaiveDateTime> {
        self.entries.values().map(|r| r.next_fire).min()
    }

    /// Due events for every registration whose fire instant is at or before
    /// `now`, oldest first.
    pub fn due(&self, now: NaiveDateTime) -> Vec<DueEvent> {
        let mut due: Vec<DueEvent> = self
            .entries
            .values()
            .filter(|r| r.next_fire <= now)
            .map(|r| DueEvent {
                reminder_id: r.reminder_id,
                generation: r.generation,
                due_at: r.next_fire,
            })
            .collect();
        due.sort_by_key(|e| (e.due_at, e.reminder_id));
        due
    }

    /// Due event for `id` at its current generation, regardless of time.
    pub fn due_now(&self, id: ReminderId) -> Option<DueEvent> {
        self.entries.get(&id).map(|r| DueEvent {
            reminder_id: id,
            generation: r.generation,
            due_at: r.next_fire,
        })
    }

    /// Move a recurring registration to its next occurrence after `after`.
    ///
    /// The generation is unchanged; the registration stays the same one.
    /// Removes the entry and returns `None` if the trigger is exhausted.
    pub fn rearm(&mut self, id: ReminderId, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let next = self
            .entries
            .get(&id)
            .and_then(|r| r.trigger.next_fire_after(after));
        match next {
            Some(next) => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.next_fire = next;
                }
                Some(next)
            }
            None => {
                self.entries.remove(&id);
                None
            }
        }
    }

    /// Swap a fired snooze registration back to its recurring trigger.
    pub fn resume(
        &mut self,
        registration: Registration,
        now: NaiveDateTime,
    ) -> Option<NaiveDateTime> {
        let trigger = registration.resume?;
        let next_fire = trigger.first_fire(now)?;
        let generation = self.bump_generation();
        self.entries.insert(
            registration.reminder_id,
            Registration {
                trigger,
                resume: None,
                snoozed: false,
                next_fire,
                generation,
                ..registration
            },
        );
        Some(next_fire)
    }

    /// Live registrations ordered by next fire.
    pub fn snapshot(&self) -> Vec<RegistrationInfo> {
        let mut infos: Vec<RegistrationInfo> = self
            .entries
            .values()
            .map(|r| RegistrationInfo {
                job_id: r.job_id.clone(),
                reminder_id: r.reminder_id,
                task: r.task.clone(),
                repeat_type: r.repeat_type,
                trigger: r.trigger.clone(),
                next_fire: r.next_fire,
                snoozed: r.snoozed,
            })
            .collect();
        infos.sort_by_key(|i| (i.next_fire, i.reminder_id));
        infos
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}
