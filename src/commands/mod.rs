//! # Command Dispatcher
//!
//! Routes incoming messages to guild-state operations. Commands are plain
//! chat messages whose first token is a `:word:` command; anything else is
//! run through the guild's routines.
//!
//! Validation problems go back to the requester as plain text. Platform
//! failures are logged and answered with a generic apology so the error
//! detail never leaks into chat.

use std::sync::Arc;

use log::{error, warn};
use serenity::model::id::{ChannelId, GuildId, UserId};

use crate::core::BotError;
use crate::guild::GuildRegistry;
use crate::platform::ChatPlatform;
use crate::storage::records::{parse_bool, JoinMessageSetting};

pub const HELP_TEXT: &str = "\
Here's everything I can do:
:addnew: <triggers> <whole phrase: true|false> <user ids or none> <tts: true|false> <response> (admins)
:remindme: <HH:MM> <AM|PM> <Month> <DD,> <YYYY> <mention: true|false> <event>
:colors: lists the color roles
:setcolor: <name> gives you a color (ask again to take it off)
:addcolor: <name> <r> <g> <b> adds a color role
:removecolor: <name> deletes an unused color role
:setcolorpermrole: <role id> sets who can manage colors (admins)
:setjoinmessage: <enabled: true|false> <mention: true|false> <message> (admins)
:help: or :?: shows this message";

const APOLOGY: &str = "Something went wrong on my end; please try again";
const NOT_ALLOWED: &str = "You don't have permission to do that";

pub struct Dispatcher {
    registry: Arc<GuildRegistry>,
    platform: Arc<dyn ChatPlatform>,
}

impl Dispatcher {
    pub fn new(registry: Arc<GuildRegistry>, platform: Arc<dyn ChatPlatform>) -> Self {
        Dispatcher { registry, platform }
    }

    /// Handles one incoming message. Never returns an error; every
    /// failure path ends in a log line, a reply, or both.
    pub async fn handle_message(
        &self,
        guild: Option<GuildId>,
        channel: ChannelId,
        author: UserId,
        content: &str,
    ) {
        let trimmed = content.trim();
        let command = trimmed.split(' ').next().unwrap_or("");

        if command == ":help:" || command == ":?:" {
            self.send(channel, HELP_TEXT, false).await;
            return;
        }

        let Some(guild) = guild else {
            // Everything else needs guild state; direct messages get a
            // pointer to the help text instead of silence.
            self.send(channel, "I only work inside a server. Try :help: there!", false)
                .await;
            return;
        };
        let Some(state) = self.registry.get(guild) else {
            warn!("guild {guild}: message received before state is ready, ignoring");
            return;
        };

        match command {
            ":remindme:" => {
                let result = state.add_reminder(trimmed, author, channel).await;
                self.reply(channel, result).await;
            }
            ":addnew:" => {
                if self.ensure(state.is_admin(author).await, channel).await {
                    let result = state.add_routine(trimmed).await;
                    self.reply(channel, result).await;
                }
            }
            ":colors:" => {
                let listing = state.list_colors().await;
                self.send(channel, &listing, false).await;
            }
            ":setcolor:" => match rest(trimmed, ":setcolor:") {
                Some(name) => {
                    let result = state.toggle_color(author, name).await;
                    self.reply(channel, result).await;
                }
                None => self.send(channel, "Usage: :setcolor: <name>", false).await,
            },
            ":addcolor:" => {
                if self
                    .ensure(state.may_manage_colors(author).await, channel)
                    .await
                {
                    match parse_color_args(trimmed) {
                        Some((name, rgb)) => {
                            let result = state.add_color(name, rgb).await;
                            self.reply(channel, result).await;
                        }
                        None => {
                            self.send(channel, "Usage: :addcolor: <name> <r> <g> <b>", false)
                                .await
                        }
                    }
                }
            }
            ":removecolor:" => {
                if self
                    .ensure(state.may_manage_colors(author).await, channel)
                    .await
                {
                    match rest(trimmed, ":removecolor:") {
                        Some(name) => {
                            let result = state.remove_color(name).await;
                            self.reply(channel, result).await;
                        }
                        None => {
                            self.send(channel, "Usage: :removecolor: <name>", false).await
                        }
                    }
                }
            }
            ":setcolorpermrole:" => {
                if self.ensure(state.is_admin(author).await, channel).await {
                    match parse_role_arg(trimmed) {
                        Some(role) => {
                            let result = state.set_color_perm_role(role).await;
                            self.reply(channel, result).await;
                        }
                        None => {
                            self.send(channel, "Usage: :setcolorpermrole: <role id>", false)
                                .await
                        }
                    }
                }
            }
            ":setjoinmessage:" => {
                if self.ensure(state.is_admin(author).await, channel).await {
                    match parse_join_args(trimmed) {
                        Some(setting) => {
                            let result = state.set_join_message(setting).await;
                            self.reply(channel, result).await;
                        }
                        None => {
                            self.send(
                                channel,
                                "Usage: :setjoinmessage: <enabled: true|false> \
<mention: true|false> <message>",
                                false,
                            )
                            .await
                        }
                    }
                }
            }
            _ => {
                for (response, tts) in state.responses(trimmed, author).await {
                    self.send(channel, &response, tts).await;
                }
            }
        }
    }

    /// Greets a newcomer in the guild's system channel.
    pub async fn handle_member_join(&self, guild: GuildId, user: UserId) {
        let Some(state) = self.registry.get(guild) else {
            return;
        };
        let Some(greeting) = state.welcome(user).await else {
            return;
        };
        match self.platform.system_channel(guild).await {
            Ok(Some(channel)) => self.send(channel, &greeting, false).await,
            Ok(None) => warn!("guild {guild}: no system channel, skipping welcome"),
            Err(e) => error!("guild {guild}: resolving system channel failed: {e:#}"),
        }
    }

    async fn reply(&self, channel: ChannelId, result: Result<String, BotError>) {
        match result {
            Ok(text) => self.send(channel, &text, false).await,
            Err(BotError::Validation(e)) => self.send(channel, &e.0, false).await,
            Err(BotError::Platform(e)) => {
                error!("platform failure while handling a command: {e:#}");
                self.send(channel, APOLOGY, false).await;
            }
        }
    }

    /// Permission gate: replies and returns false unless `allowed`.
    async fn ensure(&self, allowed: Result<bool, BotError>, channel: ChannelId) -> bool {
        match allowed {
            Ok(true) => true,
            Ok(false) => {
                self.send(channel, NOT_ALLOWED, false).await;
                false
            }
            Err(e) => {
                error!("permission check failed: {e}");
                self.send(channel, APOLOGY, false).await;
                false
            }
        }
    }

    async fn send(&self, channel: ChannelId, text: &str, tts: bool) {
        if let Err(e) = self.platform.send_message(channel, text, tts).await {
            error!("failed to send to channel {channel}: {e:#}");
        }
    }
}

fn rest<'a>(content: &'a str, command: &str) -> Option<&'a str> {
    let rest = content.strip_prefix(command)?.trim();
    (!rest.is_empty()).then_some(rest)
}

fn parse_role_arg(content: &str) -> Option<serenity::model::id::RoleId> {
    rest(content, ":setcolorpermrole:")?
        .parse::<u64>()
        .ok()
        .map(serenity::model::id::RoleId)
}

fn parse_color_args(content: &str) -> Option<(&str, (u8, u8, u8))> {
    let mut parts = rest(content, ":addcolor:")?.split(' ').filter(|p| !p.is_empty());
    let name = parts.next()?;
    let r = parts.next()?.parse().ok()?;
    let g = parts.next()?.parse().ok()?;
    let b = parts.next()?.parse().ok()?;
    Some((name, (r, g, b)))
}

fn parse_join_args(content: &str) -> Option<JoinMessageSetting> {
    let rest = rest(content, ":setjoinmessage:")?;
    let mut parts = rest.splitn(3, ' ');
    let enabled = parse_bool(parts.next()?).ok()?;
    let mention = parse_bool(parts.next()?).ok()?;
    let message = parts.next().unwrap_or("").to_string();
    if enabled && message.is_empty() {
        return None;
    }
    Some(JoinMessageSetting {
        enabled,
        mention,
        message,
    })
}
