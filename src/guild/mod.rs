//! # Guild Module
//!
//! Per-guild state and the registry that holds it.

pub mod registry;
pub mod state;

pub use registry::GuildRegistry;
pub use state::GuildState;
