//! Boot-time reconstruction of the trigger registry from the store.

use crate::reminder::{Reminder, ReminderStatus};
use crate::scheduler::registry::{ScheduleRequest, TriggerRegistry};
use crate::store::{JobStore, StoreError};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Outcome counts of one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Reminders armed in the registry.
    pub registered: usize,
    /// Reminders whose only fire had already passed; marked done silently.
    pub expired: usize,
    /// Reminders that could not be read, written, or armed.
    pub skipped: usize,
}

/// Reads every live reminder and arms it as the live path would.
pub struct RecoveryLoader<'a> {
    store: &'a dyn JobStore,
    now: NaiveDateTime,
}

enum Outcome {
    Registered,
    Expired,
}

impl<'a> RecoveryLoader<'a> {
    pub fn new(store: &'a dyn JobStore, now: NaiveDateTime) -> Self {
        Self { store, now }
    }

    /// Run one pass over the store.
    ///
    /// Only failing to list reminders aborts the pass; every per-reminder
    /// problem is logged and counted as skipped.
    pub fn run(&self, registry: &mut TriggerRegistry) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();

        for loaded in self.store.get_active_reminders()? {
            let reminder = match loaded {
                Ok(reminder) => reminder,
                Err(bad) => {
                    warn!(id = %bad.id, reason = %bad.reason, "skipping malformed reminder");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.recover_one(&reminder, registry) {
                Ok(Outcome::Registered) => report.registered += 1,
                Ok(Outcome::Expired) => report.expired += 1,
                Err(reason) => {
                    warn!(job_id = %reminder.id.job_id(), "recovery skipped reminder: {reason}");
                    report.skipped += 1;
                }
            }
        }

        info!(
            registered = report.registered,
            expired = report.expired,
            skipped = report.skipped,
            "recovered reminders"
        );
        Ok(report)
    }

    fn recover_one(
        &self,
        reminder: &Reminder,
        registry: &mut TriggerRegistry,
    ) -> Result<Outcome, String> {
        let recurring = reminder.repeat_type.is_recurring();
        let mut request = ScheduleRequest::from_reminder(reminder);

        match (reminder.status, reminder.snooze_until) {
            (ReminderStatus::Snoozed, Some(until)) if until < self.now => {
                if !recurring {
                    return self.expire(reminder);
                }
                // Missed snooze of a recurring reminder: back on its schedule.
                self.store
                    .update_status(reminder.id, ReminderStatus::Active)
                    .map_err(|e| e.to_string())?;
                request.snooze_until = None;
            }
            (ReminderStatus::Snoozed, Some(_)) => {}
            (ReminderStatus::Snoozed, None) => {
                debug!(job_id = %reminder.id.job_id(), "snoozed without snooze_until; treating as active");
                if !recurring && reminder.run_time < self.now {
                    return self.expire(reminder);
                }
            }
            _ => {
                if !recurring && reminder.run_time < self.now {
                    return self.expire(reminder);
                }
            }
        }

        match registry.insert(&request, self.now) {
            Ok(Some(next)) => {
                debug!(job_id = %reminder.id.job_id(), %next, "recovered");
                Ok(Outcome::Registered)
            }
            Ok(None) => Err("trigger never fires".to_owned()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn expire(&self, reminder: &Reminder) -> Result<Outcome, String> {
        self.store
            .update_status(reminder.id, ReminderStatus::Done)
            .map_err(|e| e.to_string())?;
        info!(
            job_id = %reminder.id.job_id(),
            run_time = %reminder.run_time,
            "missed one-shot marked done"
        );
        Ok(Outcome::Expired)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::reminder::{NewReminder, RepeatType};
    use crate::scheduler::clock::ManualClock;
    use crate::store::SqliteReminderStore;
    use chrono::{NaiveDate, TimeDelta};
    use std::sync::Arc;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn store(now: NaiveDateTime) -> SqliteReminderStore {
        SqliteReminderStore::open_in_memory()
            .unwrap()
            .with_clock(Arc::new(ManualClock::new(now)))
    }

    #[test]
    fn past_once_is_expired_not_registered() {
        let now = at(12, 0);
        let store = store(now);
        let past = store
            .add_reminder(&NewReminder::new("missed", at(11, 0), RepeatType::Once))
            .unwrap();
        let future = store
            .add_reminder(&NewReminder::new("upcoming", at(13, 0), RepeatType::Once))
            .unwrap();

        let mut registry = TriggerRegistry::new();
        let report = RecoveryLoader::new(&store, now).run(&mut registry).unwrap();

        assert_eq!(
            report,
            RecoveryReport {
                registered: 1,
                expired: 1,
                skipped: 0
            }
        );
        assert_eq!(store.get_reminder(past.id).unwrap().status, ReminderStatus::Done);
        assert!(!registry.contains(past.id));
        assert_eq!(registry.get(future.id).unwrap().next_fire, at(13, 0));
        assert!(store.unread_notifications().unwrap().is_empty());
    }

    #[test]
    fn past_recurring_is_registered_for_next_slot() {
        let now = at(12, 0);
        let store = store(now);
        let daily = store
            .add_reminder(&NewReminder::new("vitamins", at(8, 0), RepeatType::Daily))
            .unwrap();

        let mut registry = TriggerRegistry::new();
        RecoveryLoader::new(&store, now).run(&mut registry).unwrap();
        assert_eq!(
            registry.get(daily.id).unwrap().next_fire,
            at(8, 0) + TimeDelta::days(1)
        );
    }

    #[test]
    fn snoozed_reminders_use_snooze_instant() {
        let now = at(12, 0);
        let store = store(now);
        let once = store
            .add_reminder(&NewReminder::new("call", at(11, 50), RepeatType::Once))
            .unwrap();
        store.snooze_reminder(once.id, at(12, 5)).unwrap();

        let mut registry = TriggerRegistry::new();
        let report = RecoveryLoader::new(&store, now).run(&mut registry).unwrap();
        assert_eq!(report.registered, 1);
        let reg = registry.get(once.id).unwrap();
        assert_eq!(reg.next_fire, at(12, 5));
        assert!(reg.snoozed);
    }

    #[test]
    fn stale_snooze_resolves_by_repeat_type() {
        let now = at(12, 0);
        let store = store(now);
        let once = store
            .add_reminder(&NewReminder::new("once", at(10, 0), RepeatType::Once))
            .unwrap();
        store.snooze_reminder(once.id, at(10, 10)).unwrap();
        let weekly = store
            .add_reminder(&NewReminder::new("weekly", at(10, 0), RepeatType::Weekly))
            .unwrap();
        store.snooze_reminder(weekly.id, at(10, 10)).unwrap();

        let mut registry = TriggerRegistry::new();
        let report = RecoveryLoader::new(&store, now).run(&mut registry).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.registered, 1);

        assert_eq!(store.get_reminder(once.id).unwrap().status, ReminderStatus::Done);
        let weekly_row = store.get_reminder(weekly.id).unwrap();
        assert_eq!(weekly_row.status, ReminderStatus::Active);
        assert_eq!(weekly_row.snooze_until, None);
        let reg = registry.get(weekly.id).unwrap();
        assert!(!reg.snoozed);
        assert_eq!(reg.next_fire, at(10, 0) + TimeDelta::weeks(1));
    }

    #[test]
    fn bad_payload_is_skipped() {
        let now = at(12, 0);
        let store = store(now);
        store
            .add_reminder(
                &NewReminder::new("bad", at(13, 0), RepeatType::Custom)
                    .with_payload(r#"{"type":"interval","secs":5}"#),
            )
            .unwrap();
        let good = store
            .add_reminder(&NewReminder::new("good", at(13, 0), RepeatType::Daily))
            .unwrap();

        let mut registry = TriggerRegistry::new();
        let report = RecoveryLoader::new(&store, now).run(&mut registry).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.registered, 1);
        assert!(registry.contains(good.id));
    }

    #[test]
    fn oversized_interval_is_skipped() {
        let now = at(12, 0);
        let store = store(now);
        let huge = store
            .add_reminder(
                &NewReminder::new("huge", at(11, 0), RepeatType::Custom)
                    .with_payload(r#"{"type":"interval","secs":10000000000000}"#),
            )
            .unwrap();
        let good = store
            .add_reminder(&NewReminder::new("good", at(13, 0), RepeatType::Once))
            .unwrap();

        let mut registry = TriggerRegistry::new();
        let report = RecoveryLoader::new(&store, now).run(&mut registry).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.registered, 1);
        assert!(!registry.contains(huge.id));
        assert!(registry.contains(good.id));
    }

    #[test]
    fn rerun_is_idempotent() {
        let now = at(12, 0);
        let store = store(now);
        store
            .add_reminder(&NewReminder::new("missed", at(9, 0), RepeatType::Once))
            .unwrap();
        store
            .add_reminder(&NewReminder::new("daily", at(9, 0), RepeatType::Daily))
            .unwrap();
        store
            .add_reminder(&NewReminder::new("later", at(15, 0), RepeatType::Once))
            .unwrap();

        let mut registry = TriggerRegistry::new();
        let loader = RecoveryLoader::new(&store, now);
        let first = loader.run(&mut registry).unwrap();
        let snapshot = registry
            .snapshot()
            .into_iter()
            .map(|i| (i.reminder_id, i.next_fire))
            .collect::<Vec<_>>();

        let second = loader.run(&mut registry).unwrap();
        let again = registry
            .snapshot()
            .into_iter()
            .map(|i| (i.reminder_id, i.next_fire))
            .collect::<Vec<_>>();

        assert_eq!(first.registered, 2);
        assert_eq!(first.expired, 1);
        assert_eq!(second.registered, 2);
        assert_eq!(second.expired, 0);
        assert_eq!(snapshot, again);
        assert!(store.unread_notifications().unwrap().is_empty());
    }
}
