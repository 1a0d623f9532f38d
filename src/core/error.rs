//! Error taxonomy.
//!
//! Three failure classes cross module boundaries:
//! - [`ValidationError`]: malformed user input. Reported back to the
//!   requester as plain text, never fatal.
//! - Platform failures: a chat-platform call failed (network, permission,
//!   not-found). Carried as `anyhow::Error`, logged, and the single
//!   operation aborted; the process continues.
//! - Bootstrap failures: a guild whose storage scaffold cannot be resolved
//!   is left out of the registry. Other guilds are unaffected.
//!
//! Single-record faults (a malformed stored record, one failed reminder
//! delivery) are logged where they occur and never abort the surrounding
//! scan or scheduler pass.

use thiserror::Error;

/// Malformed user input during routine/reminder creation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError(message.into())
    }
}

/// Failure surfaced by a guild-state operation.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A chat-platform call failed while carrying out the operation.
    #[error("{0}")]
    Platform(anyhow::Error),
}

impl From<anyhow::Error> for BotError {
    fn from(e: anyhow::Error) -> Self {
        BotError::Platform(e)
    }
}
