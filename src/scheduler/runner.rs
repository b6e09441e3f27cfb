//! Scheduler background loop.
//!
//! A [`Scheduler`] is built synchronously, optionally primed from the store
//! via [`Scheduler::recover`], and then started. Starting moves the registry
//! into a single tokio task; callers talk to it through a cloneable
//! [`SchedulerHandle`], so registry mutations and dispatches are serialised.
//!
//! The loop sleeps until the earliest pending fire, a command, or shutdown.
//! Fires found on wake go through the same path as events injected with
//! [`SchedulerHandle::fire_now`]. Persistence for each fire runs on the
//! blocking pool under a timeout; [`RunningScheduler::stop`] waits for those
//! in-flight dispatches before returning.

use crate::config::SchedulerConfig;
use crate::error::{ChimeError, Result};
use crate::reminder::{ReminderId, ReminderStatus};
use crate::scheduler::clock::{Clock, SystemClock};
use crate::scheduler::recovery::{RecoveryLoader, RecoveryReport};
use crate::scheduler::recurrence::RecurrenceError;
use crate::scheduler::registry::{
    DueEvent, RegistrationInfo, ScheduleRequest, TriggerRegistry,
};
use crate::store::{JobStore, NotificationSink, StoreError};
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_PREFIX: &str = "🔔 Reminder: ";

/// Scheduler that has not been started yet.
pub struct Scheduler {
    registry: TriggerRegistry,
    store: Arc<dyn JobStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    prefix: String,
}

impl Scheduler {
    /// Create a scheduler over `store` that records fires into `sink`.
    pub fn new(
        store: Arc<dyn JobStore>,
        sink: Arc<dyn NotificationSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry: TriggerRegistry::new(),
            store,
            sink,
            clock: Arc::new(SystemClock),
            config,
            prefix: DEFAULT_PREFIX.to_owned(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Text prepended to the task in each notification.
    pub fn with_notification_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Arm a reminder before the loop starts.
    pub fn register(
        &mut self,
        request: &ScheduleRequest,
    ) -> std::result::Result<Option<NaiveDateTime>, RecurrenceError> {
        self.registry.insert(request, self.clock.now())
    }

    /// Remove a registration before the loop starts. Unknown ids are fine.
    pub fn cancel(&mut self, id: ReminderId) -> bool {
        self.registry.remove(id).is_some()
    }

    pub fn snapshot(&self) -> Vec<RegistrationInfo> {
        self.registry.snapshot()
    }

    /// Rebuild registrations from every live reminder in the store.
    ///
    /// Safe to call repeatedly; each run converges on the same registry.
    pub fn recover(&mut self) -> std::result::Result<RecoveryReport, StoreError> {
        let now = self.clock.now();
        RecoveryLoader::new(self.store.as_ref(), now).run(&mut self.registry)
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn start(self) -> RunningScheduler {
        let (tx, rx) = mpsc::channel(self.config.command_buffer.max(1));
        let cancel = CancellationToken::new();
        info!(
            registrations = self.registry.len(),
            misfire_grace_secs = self.config.misfire_grace_secs,
            "scheduler started"
        );
        let join = tokio::spawn(self.run_loop(rx, cancel.clone()));
        RunningScheduler {
            handle: SchedulerHandle { commands: tx },
            cancel,
            join,
        }
    }

    async fn run_loop(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            let wake_in = self.next_wake();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("scheduler loop cancelled");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut in_flight),
                    None => {
                        debug!("all scheduler handles dropped");
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("dispatch task failed: {e}");
                    }
                }
                _ = tokio::time::sleep(wake_in) => {
                    for event in self.registry.due(self.clock.now()) {
                        self.handle_due(event, None, &mut in_flight);
                    }
                }
            }
        }

        let pending = in_flight.len();
        if pending > 0 {
            info!(pending, "waiting for in-flight dispatches");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("dispatch task failed: {e}");
            }
        }
        info!("scheduler stopped");
    }

    fn next_wake(&self) -> Duration {
        let idle = self.config.idle_poll();
        match self.registry.earliest() {
            Some(at) => (at - self.clock.now())
                .to_std()
                .map_or(Duration::ZERO, |d| d.min(idle)),
            None => idle,
        }
    }

    fn handle_command(&mut self, command: Command, in_flight: &mut JoinSet<()>) {
        match command {
            Command::Register { request, reply } => {
                let result = self.registry.insert(&request, self.clock.now());
                match &result {
                    Ok(Some(next)) => debug!(job_id = %request.id.job_id(), %next, "registered"),
                    Ok(None) => debug!(job_id = %request.id.job_id(), "trigger never fires"),
                    Err(e) => warn!(job_id = %request.id.job_id(), "cannot register: {e}"),
                }
                let _ = reply.send(result);
            }
            Command::Cancel { id, reply } => {
                let removed = self.registry.remove(id).is_some();
                debug!(job_id = %id.job_id(), removed, "cancelled");
                let _ = reply.send(removed);
            }
            Command::FireNow { id, reply } => match self.registry.due_now(id) {
                Some(event) => {
                    let (done_tx, done_rx) = oneshot::channel();
                    let fired = self.handle_due(event, Some(done_tx), in_flight);
                    reply_when_done(vec![done_rx], reply, fired, in_flight);
                }
                None => {
                    let _ = reply.send(false);
                }
            },
            Command::Tick { reply } => {
                let mut waiters = Vec::new();
                for event in self.registry.due(self.clock.now()) {
                    let (done_tx, done_rx) = oneshot::channel();
                    if self.handle_due(event, Some(done_tx), in_flight) {
                        waiters.push(done_rx);
                    }
                }
                let fired = waiters.len();
                reply_when_done(waiters, reply, fired, in_flight);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Contains { id, reply } => {
                let _ = reply.send(self.registry.contains(id));
            }
        }
    }

    /// Apply one due event. Returns `false` for stale events.
    fn handle_due(
        &mut self,
        event: DueEvent,
        done: Option<oneshot::Sender<()>>,
        in_flight: &mut JoinSet<()>,
    ) -> bool {
        let id = event.reminder_id;
        let Some(current) = self.registry.get(id) else {
            debug!(job_id = %id.job_id(), "due event for unregistered reminder dropped");
            return false;
        };
        if current.generation != event.generation {
            debug!(
                job_id = %current.job_id,
                expected = current.generation,
                got = event.generation,
                "stale due event dropped"
            );
            return false;
        }

        let now = self.clock.now();
        let misfire = now - event.due_at > self.config.misfire_grace();
        let job_id = current.job_id.clone();
        let message = (!misfire).then(|| format!("{}{}", self.prefix, current.task));

        let finish = if current.trigger.is_recurring() {
            match self.registry.rearm(id, event.due_at.max(now)) {
                Some(next) => debug!(%job_id, %next, "re-armed"),
                None => debug!(%job_id, "recurring trigger exhausted"),
            }
            Finish::Keep
        } else {
            match self.registry.remove(id) {
                Some(fired) if fired.resume.is_some() => {
                    if let Some(next) = self.registry.resume(fired, now) {
                        debug!(%job_id, %next, "snooze fired, schedule resumed");
                    }
                    Finish::Reactivate
                }
                Some(_) if misfire => Finish::Expire,
                Some(_) => Finish::Complete(now),
                None => return false,
            }
        };

        if misfire {
            warn!(
                %job_id,
                due_at = %event.due_at,
                late_secs = (now - event.due_at).num_seconds(),
                "missed fire skipped"
            );
        } else {
            info!(%job_id, due_at = %event.due_at, "reminder fired");
        }

        self.spawn_dispatch(
            Dispatch {
                reminder_id: id,
                job_id,
                message,
                finish,
            },
            done,
            in_flight,
        );
        true
    }

    fn spawn_dispatch(
        &self,
        dispatch: Dispatch,
        done: Option<oneshot::Sender<()>>,
        in_flight: &mut JoinSet<()>,
    ) {
        let store = Arc::clone(&self.store);
        let sink = Arc::clone(&self.sink);
        let limit = self.config.dispatch_timeout();

        in_flight.spawn(async move {
            let job_id = dispatch.job_id.clone();
            let work =
                tokio::task::spawn_blocking(move || dispatch.apply(store.as_ref(), sink.as_ref()));
            match tokio::time::timeout(limit, work).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(%job_id, "dispatch panicked: {e}"),
                Err(_) => warn!(%job_id, ?limit, "dispatch timed out; persistence left running"),
            }
            if let Some(done) = done {
                let _ = done.send(());
            }
        });
    }
}

/// Reply with `value` once every waiter has resolved, without blocking the loop.
fn reply_when_done<T: Send + 'static>(
    waiters: Vec<oneshot::Receiver<()>>,
    reply: oneshot::Sender<T>,
    value: T,
    in_flight: &mut JoinSet<()>,
) {
    if waiters.is_empty() {
        let _ = reply.send(value);
        return;
    }
    in_flight.spawn(async move {
        for waiter in waiters {
            let _ = waiter.await;
        }
        let _ = reply.send(value);
    });
}

/// What persistence has to do after a fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    /// Recurring: nothing to persist.
    Keep,
    /// One-shot fired: done, stamped with the completion instant.
    Complete(NaiveDateTime),
    /// One-shot missed: done without a completion stamp.
    Expire,
    /// Snooze of a recurring reminder fired: back to active.
    Reactivate,
}

#[derive(Debug)]
struct Dispatch {
    reminder_id: ReminderId,
    job_id: String,
    message: Option<String>,
    finish: Finish,
}

impl Dispatch {
    /// Record the notification, then transition the stored reminder.
    ///
    /// A failed notification does not stop the status transition.
    fn apply(self, store: &dyn JobStore, sink: &dyn NotificationSink) {
        if let Some(message) = &self.message {
            if let Err(e) = sink.record(message) {
                error!(job_id = %self.job_id, "cannot record notification: {e}");
            }
        }

        let result = match self.finish {
            Finish::Keep => Ok(()),
            Finish::Complete(at) => store.complete_reminder(self.reminder_id, at),
            Finish::Expire => store.update_status(self.reminder_id, ReminderStatus::Done),
            Finish::Reactivate => store.update_status(self.reminder_id, ReminderStatus::Active),
        };
        if let Err(e) = result {
            error!(job_id = %self.job_id, finish = ?self.finish, "cannot update reminder: {e}");
        }
    }
}

enum Command {
    Register {
        request: ScheduleRequest,
        reply: oneshot::Sender<std::result::Result<Option<NaiveDateTime>, RecurrenceError>>,
    },
    Cancel {
        id: ReminderId,
        reply: oneshot::Sender<bool>,
    },
    FireNow {
        id: ReminderId,
        reply: oneshot::Sender<bool>,
    },
    Tick {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<RegistrationInfo>>,
    },
    Contains {
        id: ReminderId,
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable client of a running scheduler loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Arm a reminder, replacing any existing registration for its id.
    ///
    /// Returns the first fire instant.
    pub async fn register(&self, request: ScheduleRequest) -> Result<Option<NaiveDateTime>> {
        let result = self
            .request(|reply| Command::Register { request, reply })
            .await?;
        Ok(result?)
    }

    /// Remove a registration. Returns whether one existed; unknown ids are
    /// not an error.
    pub async fn cancel(&self, id: ReminderId) -> Result<bool> {
        self.request(|reply| Command::Cancel { id, reply }).await
    }

    /// Treat the registration for `id` as due right now.
    ///
    /// Resolves after the dispatch has been persisted. Returns `false` when
    /// `id` is not registered.
    pub async fn fire_now(&self, id: ReminderId) -> Result<bool> {
        self.request(|reply| Command::FireNow { id, reply }).await
    }

    /// Process everything due at the scheduler clock's current instant.
    ///
    /// Resolves after the resulting dispatches are persisted, returning how
    /// many registrations fired or were skipped as misfires.
    pub async fn tick(&self) -> Result<usize> {
        self.request(|reply| Command::Tick { reply }).await
    }

    pub async fn snapshot(&self) -> Result<Vec<RegistrationInfo>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn is_registered(&self, id: ReminderId) -> Result<bool> {
        self.request(|reply| Command::Contains { id, reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| ChimeError::Channel("scheduler loop is not running".to_owned()))?;
        rx.await
            .map_err(|_| ChimeError::Channel("scheduler loop dropped the request".to_owned()))
    }
}

/// A started scheduler.
pub struct RunningScheduler {
    handle: SchedulerHandle,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl RunningScheduler {
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop the loop and wait for in-flight dispatches to finish.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.join
            .await
            .map_err(|e| ChimeError::Scheduler(format!("scheduler loop failed: {e}")))
    }
}
