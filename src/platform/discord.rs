//! Serenity-backed [`ChatPlatform`] implementation over the HTTP API.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use log::debug;
use serenity::http::Http;
use serenity::model::channel::{ChannelType, PermissionOverwrite};
use serenity::model::guild::Role;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serenity::model::permissions::Permissions;
use serenity::utils::Colour;

use super::{ChannelInfo, ChatPlatform, PinnedMessage, RoleInfo};

pub struct DiscordPlatform {
    http: Arc<Http>,
    bot_user: UserId,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, bot_user: UserId) -> Self {
        DiscordPlatform { http, bot_user }
    }
}

impl From<&Role> for RoleInfo {
    fn from(role: &Role) -> Self {
        RoleInfo {
            id: role.id,
            name: role.name.clone(),
            permissions: role.permissions,
            colour: role.colour,
            position: role.position,
        }
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    fn bot_user(&self) -> UserId {
        self.bot_user
    }

    async fn guild_channels(&self, guild: GuildId) -> Result<Vec<ChannelInfo>> {
        let channels = guild
            .channels(&self.http)
            .await
            .context("listing guild channels")?;
        Ok(channels
            .into_iter()
            .filter(|(_, c)| c.kind == ChannelType::Text)
            .map(|(id, c)| ChannelInfo { id, name: c.name })
            .collect())
    }

    async fn create_channel(
        &self,
        guild: GuildId,
        name: &str,
        topic: &str,
        overwrites: Vec<PermissionOverwrite>,
        reason: &str,
    ) -> Result<ChannelId> {
        // The channel-create endpoint has no audit-reason support in this
        // serenity release; the reason is kept in our own logs instead.
        debug!("guild {guild}: creating channel #{name} ({reason})");
        let channel = guild
            .create_channel(&self.http, |c| {
                c.name(name)
                    .kind(ChannelType::Text)
                    .topic(topic)
                    .permissions(overwrites)
            })
            .await
            .with_context(|| format!("creating channel #{name}"))?;
        Ok(channel.id)
    }

    async fn guild_roles(&self, guild: GuildId) -> Result<Vec<RoleInfo>> {
        let roles = guild
            .roles(&self.http)
            .await
            .context("listing guild roles")?;
        Ok(roles.values().map(RoleInfo::from).collect())
    }

    async fn create_role(
        &self,
        guild: GuildId,
        name: &str,
        permissions: Permissions,
        colour: Option<Colour>,
        reason: &str,
    ) -> Result<RoleInfo> {
        debug!("guild {guild}: creating role {name} ({reason})");
        let role = guild
            .create_role(&self.http, |r| {
                r.name(name).permissions(permissions);
                if let Some(colour) = colour {
                    r.colour(colour.0 as u64);
                }
                r
            })
            .await
            .with_context(|| format!("creating role {name}"))?;
        Ok(RoleInfo::from(&role))
    }

    async fn delete_role(&self, guild: GuildId, role: RoleId) -> Result<()> {
        self.http
            .delete_role(guild.0, role.0)
            .await
            .context("deleting role")
    }

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        let mut member = guild.member(&self.http, user).await.context("resolving member")?;
        member
            .add_role(&self.http, role)
            .await
            .context("assigning role")
    }

    async fn remove_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        let mut member = guild.member(&self.http, user).await.context("resolving member")?;
        member
            .remove_role(&self.http, role)
            .await
            .context("removing role")
    }

    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Vec<RoleId>> {
        let member = guild.member(&self.http, user).await.context("resolving member")?;
        Ok(member.roles)
    }

    async fn role_has_members(&self, guild: GuildId, role: RoleId) -> Result<bool> {
        let members = guild
            .members(&self.http, None, None)
            .await
            .context("listing guild members")?;
        Ok(members.iter().any(|m| m.roles.contains(&role)))
    }

    async fn guild_owner(&self, guild: GuildId) -> Result<UserId> {
        let partial = guild
            .to_partial_guild(&self.http)
            .await
            .context("resolving guild")?;
        Ok(partial.owner_id)
    }

    async fn system_channel(&self, guild: GuildId) -> Result<Option<ChannelId>> {
        let partial = guild
            .to_partial_guild(&self.http)
            .await
            .context("resolving guild")?;
        Ok(partial.system_channel_id)
    }

    async fn send_message(&self, channel: ChannelId, text: &str, tts: bool) -> Result<MessageId> {
        let message = channel
            .send_message(&self.http, |m| m.content(text).tts(tts))
            .await
            .context("sending message")?;
        Ok(message.id)
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        text: &str,
    ) -> Result<()> {
        channel
            .edit_message(&self.http, message, |m| m.content(text))
            .await
            .context("editing message")?;
        Ok(())
    }

    async fn pin_message(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        channel
            .pin(&self.http, message)
            .await
            .context("pinning message")
    }

    async fn pinned_messages(&self, channel: ChannelId) -> Result<Vec<PinnedMessage>> {
        let pins = channel
            .pins(&self.http)
            .await
            .context("listing pinned messages")?;
        Ok(pins
            .into_iter()
            .map(|m| PinnedMessage {
                id: m.id,
                content: m.content,
            })
            .collect())
    }
}
