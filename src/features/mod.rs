//! # Features Module
//!
//! The user-facing behaviors: stored routines and scheduled reminders.

pub mod reminders;
pub mod routines;

pub use reminders::{Reminder, ReminderScheduler};
pub use routines::{MatchMode, Routine};
