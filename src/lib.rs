//! # Steward
//!
//! A per-guild record keeper for Discord. Guild facts (routines, reminders,
//! color roles, welcome settings) live as pinned messages in a hidden
//! storage channel, so the bot needs no database and a restart rebuilds
//! everything from the guild itself.

pub mod commands;
pub mod core;
pub mod features;
pub mod guild;
pub mod platform;
pub mod storage;

pub use crate::commands::Dispatcher;
pub use crate::core::{BotError, Config, ValidationError};
pub use crate::features::reminders::{Reminder, ReminderScheduler};
pub use crate::features::routines::{MatchMode, Routine};
pub use crate::guild::{GuildRegistry, GuildState};
pub use crate::platform::{ChatPlatform, DiscordPlatform};
pub use crate::storage::RecordStore;
