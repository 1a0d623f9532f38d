//! In-memory [`ChatPlatform`] used by the unit tests. Mirrors the small
//! slice of Discord semantics the domain layer relies on: channels, roles,
//! members, and (pinnable, editable) messages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serenity::model::channel::PermissionOverwrite;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serenity::model::permissions::Permissions;
use serenity::utils::Colour;

use super::{ChannelInfo, ChatPlatform, PinnedMessage, RoleInfo};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    content: String,
    pinned: bool,
    tts: bool,
}

#[derive(Default)]
struct State {
    channels: HashMap<GuildId, Vec<ChannelInfo>>,
    messages: HashMap<ChannelId, Vec<StoredMessage>>,
    roles: HashMap<GuildId, Vec<RoleInfo>>,
    member_roles: HashMap<(GuildId, UserId), Vec<RoleId>>,
    owners: HashMap<GuildId, UserId>,
    system_channels: HashMap<GuildId, ChannelId>,
}

pub struct MemoryPlatform {
    bot: UserId,
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl MemoryPlatform {
    pub fn new(bot: UserId) -> Self {
        MemoryPlatform {
            bot,
            next_id: AtomicU64::new(1000),
            state: Mutex::new(State::default()),
        }
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn seed_guild(&self, guild: GuildId, owner: UserId) {
        let mut state = self.state.lock().unwrap();
        state.owners.insert(guild, owner);
        state.channels.entry(guild).or_default();
        state.roles.entry(guild).or_default();
    }

    pub fn seed_role(
        &self,
        guild: GuildId,
        name: &str,
        permissions: Permissions,
        position: i64,
    ) -> RoleId {
        let id = RoleId(self.next());
        self.state
            .lock()
            .unwrap()
            .roles
            .entry(guild)
            .or_default()
            .push(RoleInfo {
                id,
                name: name.to_string(),
                permissions,
                colour: Colour::default(),
                position,
            });
        id
    }

    pub fn seed_member_role(&self, guild: GuildId, user: UserId, role: RoleId) {
        self.state
            .lock()
            .unwrap()
            .member_roles
            .entry((guild, user))
            .or_default()
            .push(role);
    }

    pub fn seed_system_channel(&self, guild: GuildId, channel: ChannelId) {
        self.state
            .lock()
            .unwrap()
            .system_channels
            .insert(guild, channel);
    }

    /// Inserts a pinned message directly, bypassing send/pin bookkeeping.
    pub fn seed_pinned(&self, channel: ChannelId, content: &str) -> MessageId {
        let id = MessageId(self.next());
        self.state
            .lock()
            .unwrap()
            .messages
            .entry(channel)
            .or_default()
            .push(StoredMessage {
                id,
                content: content.to_string(),
                pinned: true,
                tts: false,
            });
        id
    }

    /// Texts of every message sent to a channel, in send order.
    pub fn sent(&self, channel: ChannelId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .get(&channel)
            .map(|m| m.iter().map(|m| m.content.clone()).collect())
            .unwrap_or_default()
    }

    /// Texts of messages sent with the text-to-speech flag.
    pub fn sent_tts(&self, channel: ChannelId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .get(&channel)
            .map(|m| {
                m.iter()
                    .filter(|m| m.tts)
                    .map(|m| m.content.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn channel_named(&self, guild: GuildId, name: &str) -> Option<ChannelId> {
        self.state
            .lock()
            .unwrap()
            .channels
            .get(&guild)
            .and_then(|c| c.iter().find(|c| c.name == name).map(|c| c.id))
    }

    pub fn channel_count(&self, guild: GuildId) -> usize {
        self.state
            .lock()
            .unwrap()
            .channels
            .get(&guild)
            .map_or(0, |c| c.len())
    }

    pub fn roles_named(&self, guild: GuildId, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .roles
            .get(&guild)
            .map_or(0, |r| r.iter().filter(|r| r.name == name).count())
    }

    pub fn member_has_role(&self, guild: GuildId, user: UserId, role: RoleId) -> bool {
        self.state
            .lock()
            .unwrap()
            .member_roles
            .get(&(guild, user))
            .map_or(false, |r| r.contains(&role))
    }
}

#[async_trait]
impl ChatPlatform for MemoryPlatform {
    fn bot_user(&self) -> UserId {
        self.bot
    }

    async fn guild_channels(&self, guild: GuildId) -> Result<Vec<ChannelInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .channels
            .get(&guild)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_channel(
        &self,
        guild: GuildId,
        name: &str,
        _topic: &str,
        _overwrites: Vec<PermissionOverwrite>,
        _reason: &str,
    ) -> Result<ChannelId> {
        let id = ChannelId(self.next());
        let mut state = self.state.lock().unwrap();
        state.channels.entry(guild).or_default().push(ChannelInfo {
            id,
            name: name.to_string(),
        });
        state.messages.entry(id).or_default();
        Ok(id)
    }

    async fn guild_roles(&self, guild: GuildId) -> Result<Vec<RoleInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .roles
            .get(&guild)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_role(
        &self,
        guild: GuildId,
        name: &str,
        permissions: Permissions,
        colour: Option<Colour>,
        _reason: &str,
    ) -> Result<RoleInfo> {
        let id = RoleId(self.next());
        let mut state = self.state.lock().unwrap();
        let roles = state.roles.entry(guild).or_default();
        let role = RoleInfo {
            id,
            name: name.to_string(),
            permissions,
            colour: colour.unwrap_or_default(),
            position: roles.len() as i64,
        };
        roles.push(role.clone());
        Ok(role)
    }

    async fn delete_role(&self, guild: GuildId, role: RoleId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(roles) = state.roles.get_mut(&guild) {
            roles.retain(|r| r.id != role);
        }
        Ok(())
    }

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        self.seed_member_role(guild, user, role);
        Ok(())
    }

    async fn remove_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(roles) = state.member_roles.get_mut(&(guild, user)) {
            roles.retain(|r| *r != role);
        }
        Ok(())
    }

    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Vec<RoleId>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .member_roles
            .get(&(guild, user))
            .cloned()
            .unwrap_or_default())
    }

    async fn role_has_members(&self, guild: GuildId, role: RoleId) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .member_roles
            .iter()
            .any(|((g, _), roles)| *g == guild && roles.contains(&role)))
    }

    async fn guild_owner(&self, guild: GuildId) -> Result<UserId> {
        match self.state.lock().unwrap().owners.get(&guild) {
            Some(owner) => Ok(*owner),
            None => bail!("unknown guild {guild}"),
        }
    }

    async fn system_channel(&self, guild: GuildId) -> Result<Option<ChannelId>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .system_channels
            .get(&guild)
            .copied())
    }

    async fn send_message(&self, channel: ChannelId, text: &str, tts: bool) -> Result<MessageId> {
        let id = MessageId(self.next());
        self.state
            .lock()
            .unwrap()
            .messages
            .entry(channel)
            .or_default()
            .push(StoredMessage {
                id,
                content: text.to_string(),
                pinned: false,
                tts,
            });
        Ok(id)
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        text: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .messages
            .get_mut(&channel)
            .and_then(|m| m.iter_mut().find(|m| m.id == message));
        match stored {
            Some(stored) => {
                stored.content = text.to_string();
                Ok(())
            }
            None => bail!("unknown message {message} in channel {channel}"),
        }
    }

    async fn pin_message(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .messages
            .get_mut(&channel)
            .and_then(|m| m.iter_mut().find(|m| m.id == message));
        match stored {
            Some(stored) => {
                stored.pinned = true;
                Ok(())
            }
            None => bail!("unknown message {message} in channel {channel}"),
        }
    }

    async fn pinned_messages(&self, channel: ChannelId) -> Result<Vec<PinnedMessage>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .get(&channel)
            .map(|m| {
                m.iter()
                    .filter(|m| m.pinned)
                    .map(|m| PinnedMessage {
                        id: m.id,
                        content: m.content.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
