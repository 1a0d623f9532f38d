//! # Core Module
//!
//! Configuration and the error taxonomy shared by every layer.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{BotError, ValidationError};
