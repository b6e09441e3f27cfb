//! Reminder scheduling engine.
//!
//! - `clock`: server clock abstraction and client-time reconciliation.
//! - `recurrence`: trigger specs and next-fire arithmetic.
//! - `registry`: the in-memory set of armed triggers.
//! - `recovery`: rebuilding the registry from the store at boot.
//! - `runner`: the background loop and its handle.

pub mod clock;
pub mod recovery;
pub mod recurrence;
pub mod registry;
pub mod runner;

pub use clock::{Clock, ManualClock, SystemClock};
pub use recovery::RecoveryReport;
pub use registry::{RegistrationInfo, ScheduleRequest};
pub use runner::{RunningScheduler, Scheduler, SchedulerHandle};
