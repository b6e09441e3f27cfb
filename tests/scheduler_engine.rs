#![allow(clippy::unwrap_used, clippy::expect_used)]

use chime::config::{ChimeConfig, SchedulerConfig};
use chime::reminder::NewReminder;
use chime::resolver::KeywordResolver;
use chime::scheduler::{Clock, ManualClock, ScheduleRequest, Scheduler, SystemClock};
use chime::service::{Completion, ReminderService, ScheduleOutcome};
use chime::store::{JobStore, SqliteReminderStore};
use chime::{ReminderStatus, RepeatType};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, d)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn open_store(path: &Path, clock: &ManualClock) -> Arc<SqliteReminderStore> {
    Arc::new(
        SqliteReminderStore::open(path)
            .expect("open store")
            .with_clock(Arc::new(clock.clone())),
    )
}

fn scheduler_for(store: &Arc<SqliteReminderStore>, clock: &ManualClock) -> Scheduler {
    Scheduler::new(store.clone(), store.clone(), SchedulerConfig::default())
        .with_clock(Arc::new(clock.clone()))
}

#[tokio::test]
async fn restart_recovers_live_reminders_without_notifying() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("reminders.db");
    let clock = ManualClock::new(at(3, 8, 0));

    let (missed, upcoming, daily) = {
        let store = open_store(&db, &clock);
        let missed = store
            .add_reminder(&NewReminder::new("missed", at(3, 9, 0), RepeatType::Once))
            .unwrap();
        let upcoming = store
            .add_reminder(&NewReminder::new("upcoming", at(3, 18, 0), RepeatType::Once))
            .unwrap();
        let daily = store
            .add_reminder(&NewReminder::new("daily", at(1, 7, 30), RepeatType::Daily))
            .unwrap();
        (missed.id, upcoming.id, daily.id)
    };

    // Process was down through 09:00.
    clock.set(at(3, 12, 0));
    let store = open_store(&db, &clock);
    let mut scheduler = scheduler_for(&store, &clock);
    let report = scheduler.recover().unwrap();
    assert_eq!(report.registered, 2);
    assert_eq!(report.expired, 1);
    assert_eq!(report.skipped, 0);

    let snapshot = scheduler.snapshot();
    let ids: Vec<_> = snapshot.iter().map(|r| r.reminder_id).collect();
    assert_eq!(ids, vec![upcoming, daily]);
    assert_eq!(snapshot[1].next_fire, at(4, 7, 30));

    assert_eq!(store.get_reminder(missed).unwrap().status, ReminderStatus::Done);
    assert!(store.unread_notifications().unwrap().is_empty());

    // Second pass changes nothing.
    let again = scheduler.recover().unwrap();
    assert_eq!(again.registered, 2);
    assert_eq!(again.expired, 0);
    assert_eq!(scheduler.snapshot(), snapshot);

    let running = scheduler.start();
    let handle = running.handle();
    clock.set(at(3, 18, 0));
    assert_eq!(handle.tick().await.unwrap(), 1);
    assert_eq!(store.unread_notifications().unwrap().len(), 1);
    assert!(!handle.is_registered(upcoming).await.unwrap());
    assert!(handle.is_registered(daily).await.unwrap());
    running.stop().await.unwrap();
}

#[tokio::test]
async fn injected_due_events_drive_the_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(at(10, 9, 0));
    let store = open_store(&dir.path().join("r.db"), &clock);
    let running = scheduler_for(&store, &clock).start();
    let service = ReminderService::new(
        store.clone(),
        running.handle(),
        Arc::new(KeywordResolver::new().unwrap()),
        &ChimeConfig::default(),
    )
    .with_clock(Arc::new(clock.clone()));

    let outcome = service
        .schedule_text("water plants every day at 7am", Some("2024-06-10 09:00:00"), false)
        .await
        .unwrap();
    let ScheduleOutcome::Scheduled { reminder, .. } = outcome else {
        panic!("expected scheduled");
    };
    assert_eq!(reminder.repeat_type, RepeatType::Daily);
    assert_eq!(reminder.run_time, at(11, 7, 0));

    let handle = running.handle();
    assert!(handle.fire_now(reminder.id).await.unwrap());
    assert!(handle.fire_now(reminder.id).await.unwrap());
    let unread = service.notifications().await.unwrap();
    assert_eq!(unread.len(), 2);
    assert!(unread.iter().all(|n| n.message == "🔔 Reminder: water plants"));
    assert_eq!(
        store.get_reminder(reminder.id).unwrap().status,
        ReminderStatus::Active
    );

    // Completing advances the anchor one day.
    let completion = service.complete(reminder.id).await.unwrap();
    assert_eq!(
        completion,
        Completion::Advanced {
            next_run: at(12, 7, 0)
        }
    );

    service.cancel(reminder.id).await.unwrap();
    assert!(!handle.fire_now(reminder.id).await.unwrap());
    assert_eq!(service.notifications().await.unwrap().len(), 2);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn once_reminder_fires_on_the_real_clock() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteReminderStore::open(&dir.path().join("r.db")).unwrap());
    let running =
        Scheduler::new(store.clone(), store.clone(), SchedulerConfig::default()).start();
    let handle = running.handle();

    let due = SystemClock.now() + TimeDelta::seconds(1);
    let reminder = store
        .add_reminder(&NewReminder::new("kettle", due, RepeatType::Once))
        .unwrap();
    handle
        .register(ScheduleRequest::from_reminder(&reminder))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = store.get_reminder(reminder.id).unwrap().status;
        if status == ReminderStatus::Done || tokio::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let row = store.get_reminder(reminder.id).unwrap();
    assert_eq!(row.status, ReminderStatus::Done);
    assert!(row.completion_time.is_some());
    assert_eq!(store.unread_notifications().unwrap().len(), 1);
    assert!(!handle.is_registered(reminder.id).await.unwrap());

    running.stop().await.unwrap();
}

#[tokio::test]
async fn reconciliation_uses_server_clock() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(at(10, 10, 0) + TimeDelta::seconds(5));
    let store = open_store(&dir.path().join("r.db"), &clock);
    let running = scheduler_for(&store, &clock).start();
    let service = ReminderService::new(
        store,
        running.handle(),
        Arc::new(KeywordResolver::new().unwrap()),
        &ChimeConfig::default(),
    )
    .with_clock(Arc::new(clock.clone()));

    // Client clock runs five seconds behind the server.
    let outcome = service
        .schedule_text("stretch in 10 minutes", Some("2024-06-10T10:00:00+02:00"), true)
        .await
        .unwrap();
    let ScheduleOutcome::Preview { server_target, .. } = outcome else {
        panic!("expected preview");
    };
    assert_eq!(server_target, at(10, 10, 10) + TimeDelta::seconds(5));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn unusable_stored_interval_does_not_stop_boot() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(at(5, 8, 0));
    let store = open_store(&dir.path().join("r.db"), &clock);
    store
        .add_reminder(
            &NewReminder::new("huge", at(5, 7, 0), RepeatType::Custom)
                .with_payload(r#"{"type":"interval","secs":10000000000000}"#),
        )
        .unwrap();
    let coffee = store
        .add_reminder(&NewReminder::new("coffee", at(5, 9, 0), RepeatType::Once))
        .unwrap();

    let mut scheduler = scheduler_for(&store, &clock);
    let report = scheduler.recover().unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.registered, 1);

    let running = scheduler.start();
    let handle = running.handle();
    clock.set(at(5, 9, 0));
    assert_eq!(handle.tick().await.unwrap(), 1);
    assert_eq!(store.get_reminder(coffee.id).unwrap().status, ReminderStatus::Done);
    running.stop().await.unwrap();
}
