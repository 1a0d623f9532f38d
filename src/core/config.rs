//! Bot configuration, loaded from the environment (optionally via a `.env`
//! file, see the `bot` binary).

use anyhow::{Context, Result};

pub struct Config {
    /// Discord bot token.
    pub discord_token: String,
    /// Default log filter handed to `env_logger` when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let discord_token =
            std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN must be set")?;
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Config {
            discord_token,
            log_level,
        })
    }
}
