//! Host-facing protocol for driving the reminder service over stdio.

pub mod contract;
pub mod stdio;
