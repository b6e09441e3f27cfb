//! Chime: reminder scheduling with client/server clock reconciliation.
//!
//! # Architecture
//!
//! - **Resolver**: turns "call bob at 5pm" into a task and an instant on the
//!   client's clock.
//! - **Clock reconciliation**: shifts that instant onto the server clock by
//!   keeping the offset the user meant.
//! - **Store**: SQLite persistence for reminders and notifications.
//! - **Scheduler**: one background task owning every armed trigger; fires
//!   record a notification and advance the reminder's state.
//! - **Service**: the request-level operations tying these together.

pub mod config;
pub mod error;
pub mod host;
pub mod reminder;
pub mod resolver;
pub mod scheduler;
pub mod service;
pub mod store;

pub use config::ChimeConfig;
pub use error::{ChimeError, Result};
pub use reminder::{Reminder, ReminderId, ReminderStatus, RepeatType};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use service::ReminderService;
