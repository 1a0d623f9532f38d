//! # Chat Platform Layer
//!
//! Capability interface over the chat platform. Everything above this layer
//! (record store, guild state, scheduler, dispatcher) talks to Discord
//! exclusively through [`ChatPlatform`], so the domain logic runs unchanged
//! against the in-memory implementation used by the unit tests.
//!
//! Serenity's model id types are the shared vocabulary; only the transport
//! lives behind the trait.

pub mod discord;
#[cfg(test)]
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::channel::PermissionOverwrite;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serenity::model::permissions::Permissions;
use serenity::utils::Colour;

pub use discord::DiscordPlatform;

/// A text channel as seen by the domain layer.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
}

/// A guild role as seen by the domain layer.
#[derive(Debug, Clone)]
pub struct RoleInfo {
    pub id: RoleId,
    pub name: String,
    pub permissions: Permissions,
    pub colour: Colour,
    pub position: i64,
}

/// A pinned message: backing identifier plus raw text content.
#[derive(Debug, Clone)]
pub struct PinnedMessage {
    pub id: MessageId,
    pub content: String,
}

/// The chat-platform operations the bot consumes. All calls are fallible
/// network operations; none are assumed atomic, so callers that create
/// resources re-check for existence before creating.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// The bot's own user id.
    fn bot_user(&self) -> UserId;

    /// Text channels of a guild.
    async fn guild_channels(&self, guild: GuildId) -> Result<Vec<ChannelInfo>>;

    async fn create_channel(
        &self,
        guild: GuildId,
        name: &str,
        topic: &str,
        overwrites: Vec<PermissionOverwrite>,
        reason: &str,
    ) -> Result<ChannelId>;

    async fn guild_roles(&self, guild: GuildId) -> Result<Vec<RoleInfo>>;

    async fn create_role(
        &self,
        guild: GuildId,
        name: &str,
        permissions: Permissions,
        colour: Option<Colour>,
        reason: &str,
    ) -> Result<RoleInfo>;

    async fn delete_role(&self, guild: GuildId, role: RoleId) -> Result<()>;

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()>;

    async fn remove_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()>;

    /// Role ids carried by a member.
    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Vec<RoleId>>;

    /// Whether at least one member still carries the role.
    async fn role_has_members(&self, guild: GuildId, role: RoleId) -> Result<bool>;

    async fn guild_owner(&self, guild: GuildId) -> Result<UserId>;

    async fn system_channel(&self, guild: GuildId) -> Result<Option<ChannelId>>;

    async fn send_message(&self, channel: ChannelId, text: &str, tts: bool) -> Result<MessageId>;

    async fn edit_message(&self, channel: ChannelId, message: MessageId, text: &str)
        -> Result<()>;

    async fn pin_message(&self, channel: ChannelId, message: MessageId) -> Result<()>;

    async fn pinned_messages(&self, channel: ChannelId) -> Result<Vec<PinnedMessage>>;
}
