//! # Record Store
//!
//! Per-guild persistence backed by pinned messages in a hidden storage
//! channel. Each record is one pinned message; a `RECORD INDEX:` pin maps
//! record tags to message ids so startup reads the index plus the pin list
//! and nothing else.
//!
//! [`RecordStore::bootstrap`] is idempotent: every resource is looked up
//! before it is created, so a crash between steps or a double
//! guild-create event converges on the same scaffold.

pub mod records;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use log::{info, warn};
use serenity::model::channel::{PermissionOverwrite, PermissionOverwriteType};
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId};
use serenity::model::permissions::Permissions;
use tokio::sync::Mutex;

use crate::platform::{ChatPlatform, PinnedMessage};
use records::{RecordIndex, RecordKind};

pub const STORAGE_CHANNEL: &str = "steward-storage";
pub const STORAGE_TOPIC: &str = "Where Steward keeps this server's records";
pub const DEFAULT_ADMIN_ROLE: &str = "Steward Admin";

/// A stored record: backing message id plus tag-stripped payload.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub id: MessageId,
    pub body: String,
}

/// Handle on one guild's storage channel. All record reads and writes for
/// the guild go through this; the index mutex serializes writers so the
/// index pin never loses an entry.
pub struct RecordStore {
    platform: Arc<dyn ChatPlatform>,
    guild: GuildId,
    channel: ChannelId,
    index_message: MessageId,
    index: Mutex<RecordIndex>,
}

impl RecordStore {
    /// Finds or creates the storage scaffold for a guild and returns the
    /// store together with the resolved admin role.
    ///
    /// Order matters: the admin role must exist before the channel is
    /// created, because the channel's permission overwrites reference it.
    pub async fn bootstrap(
        platform: Arc<dyn ChatPlatform>,
        guild: GuildId,
    ) -> Result<(RecordStore, RoleId)> {
        let channels = platform
            .guild_channels(guild)
            .await
            .context("listing channels during bootstrap")?;
        let existing = channels.iter().find(|c| c.name == STORAGE_CHANNEL);

        let (channel, admin_role) = match existing {
            Some(channel) => {
                let admin_role = match recover_admin_role(&platform, guild, channel.id).await? {
                    Some(role) => role,
                    None => {
                        // Pin lost or role deleted since the record was
                        // written. Re-resolve and let ensure_admin_record
                        // repair the pin.
                        warn!("guild {guild}: admin role record unusable, re-resolving");
                        find_or_create_admin_role(&platform, guild).await?
                    }
                };
                (channel.id, admin_role)
            }
            None => {
                let admin_role = find_or_create_admin_role(&platform, guild).await?;
                let channel = create_storage_channel(&platform, guild, admin_role).await?;
                info!("guild {guild}: created storage channel {channel}");
                (channel, admin_role)
            }
        };

        let pins = platform
            .pinned_messages(channel)
            .await
            .context("listing storage pins during bootstrap")?;
        let (index_message, index) = match pins
            .iter()
            .find(|p| p.content.starts_with(RecordIndex::TAG))
        {
            Some(pin) => (pin.id, RecordIndex::parse(&pin.content)),
            None => {
                let index = RecordIndex::new();
                let id = platform
                    .send_message(channel, &index.encode(), false)
                    .await
                    .context("creating record index")?;
                platform
                    .pin_message(channel, id)
                    .await
                    .context("pinning record index")?;
                (id, index)
            }
        };

        let store = RecordStore {
            platform,
            guild,
            channel,
            index_message,
            index: Mutex::new(index),
        };
        store.reconcile_index(&pins).await?;
        store.ensure_admin_record(admin_role).await?;
        Ok((store, admin_role))
    }

    /// Adopts tagged pins the index does not list, such as a record
    /// stranded by a crash between the pin and the index update.
    async fn reconcile_index(&self, pins: &[PinnedMessage]) -> Result<()> {
        let mut index = self.index.lock().await;
        let mut adopted = false;
        for pin in pins {
            let Some(kind) = pin.content.lines().next().and_then(RecordKind::from_tag) else {
                continue;
            };
            if index.contains(pin.id) {
                continue;
            }
            warn!(
                "guild {}: adopting unindexed {} record {}",
                self.guild,
                kind.tag(),
                pin.id
            );
            index.append(kind, pin.id);
            adopted = true;
        }
        if adopted {
            self.platform
                .edit_message(self.channel, self.index_message, &index.encode())
                .await
                .context("updating record index")?;
        }
        Ok(())
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Writes the admin-role record when it is missing or stale (fresh
    /// guild, pin deleted by hand, or the recorded role no longer exists).
    async fn ensure_admin_record(&self, admin_role: RoleId) -> Result<()> {
        let encoded = records::encode_role_record(admin_role);
        let current = self.find_by_tag(RecordKind::AdminRole).await?;
        if current.last().map(|r| r.body.as_str()) != Some(encoded.as_str()) {
            self.upsert(RecordKind::AdminRole, &encoded).await?;
        }
        Ok(())
    }

    /// Every pinned record of a kind, tag line stripped. The pin scan is
    /// authoritative; the index only supplies append order. Tagged pins
    /// the index missed are returned after the indexed ones.
    pub async fn find_by_tag(&self, kind: RecordKind) -> Result<Vec<RawRecord>> {
        let pins = self
            .platform
            .pinned_messages(self.channel)
            .await
            .context("listing storage pins")?;
        let order = self.index.lock().await.ids(kind);
        let mut out = Vec::new();
        for id in &order {
            let Some(pin) = pins.iter().find(|p| p.id == *id) else {
                warn!(
                    "guild {}: indexed {} record {id} is gone, skipping",
                    self.guild,
                    kind.tag()
                );
                continue;
            };
            match strip_tag(&pin.content, kind) {
                Some(body) => out.push(RawRecord {
                    id: *id,
                    body: body.to_string(),
                }),
                None => warn!(
                    "guild {}: message {id} does not carry tag {}, skipping",
                    self.guild,
                    kind.tag()
                ),
            }
        }
        for pin in &pins {
            if order.contains(&pin.id) {
                continue;
            }
            if let Some(body) = strip_tag(&pin.content, kind) {
                warn!(
                    "guild {}: loading unindexed {} record {}",
                    self.guild,
                    kind.tag(),
                    pin.id
                );
                out.push(RawRecord {
                    id: pin.id,
                    body: body.to_string(),
                });
            }
        }
        Ok(out)
    }

    /// Appends a new record: send, pin, then index. The index entry goes
    /// last; a crash mid-append leaves an orphan pin that the next
    /// bootstrap adopts, never a dangling index entry.
    pub async fn append(&self, kind: RecordKind, payload: &str) -> Result<MessageId> {
        let mut index = self.index.lock().await;
        self.append_locked(&mut index, kind, payload).await
    }

    /// Writes a singleton record, editing the existing message in place
    /// when one is indexed. The index lock is held for the whole
    /// operation so concurrent upserts of one kind cannot both append.
    pub async fn upsert(&self, kind: RecordKind, payload: &str) -> Result<MessageId> {
        debug_assert!(kind.is_singleton());
        let mut index = self.index.lock().await;
        match index.latest(kind) {
            Some(id) => {
                let content = format!("{}\n{payload}", kind.tag());
                self.platform
                    .edit_message(self.channel, id, &content)
                    .await
                    .with_context(|| format!("rewriting {} record", kind.tag()))?;
                Ok(id)
            }
            None => self.append_locked(&mut index, kind, payload).await,
        }
    }

    async fn append_locked(
        &self,
        index: &mut RecordIndex,
        kind: RecordKind,
        payload: &str,
    ) -> Result<MessageId> {
        let content = format!("{}\n{payload}", kind.tag());
        let id = self
            .platform
            .send_message(self.channel, &content, false)
            .await
            .with_context(|| format!("writing {} record", kind.tag()))?;
        self.platform
            .pin_message(self.channel, id)
            .await
            .with_context(|| format!("pinning {} record", kind.tag()))?;
        index.append(kind, id);
        self.platform
            .edit_message(self.channel, self.index_message, &index.encode())
            .await
            .context("updating record index")?;
        Ok(id)
    }
}

fn strip_tag(content: &str, kind: RecordKind) -> Option<&str> {
    content.strip_prefix(kind.tag())?.strip_prefix('\n')
}

/// Reads the admin-role record out of an existing storage channel and
/// checks the role still exists in the guild.
async fn recover_admin_role(
    platform: &Arc<dyn ChatPlatform>,
    guild: GuildId,
    channel: ChannelId,
) -> Result<Option<RoleId>> {
    let pins = platform
        .pinned_messages(channel)
        .await
        .context("listing storage pins")?;
    let Some(pin) = pins
        .iter()
        .find(|p| p.content.starts_with(RecordKind::AdminRole.tag()))
    else {
        return Ok(None);
    };
    let Some(body) = strip_tag(&pin.content, RecordKind::AdminRole) else {
        return Ok(None);
    };
    let role = match records::parse_role_record(body) {
        Ok(role) => role,
        Err(e) => {
            warn!("guild {guild}: malformed admin role record: {e}");
            return Ok(None);
        }
    };
    let roles = platform
        .guild_roles(guild)
        .await
        .context("listing roles during bootstrap")?;
    Ok(roles.iter().find(|r| r.id == role).map(|r| r.id))
}

/// Picks the least-privileged role that can manage the guild, or creates a
/// dedicated admin role and hands it to the owner.
async fn find_or_create_admin_role(
    platform: &Arc<dyn ChatPlatform>,
    guild: GuildId,
) -> Result<RoleId> {
    let mut roles = platform
        .guild_roles(guild)
        .await
        .context("listing roles during bootstrap")?;
    roles.sort_by_key(|r| r.permissions.bits());
    if let Some(role) = roles
        .iter()
        .find(|r| r.permissions.contains(Permissions::MANAGE_GUILD))
    {
        return Ok(role.id);
    }

    let role = platform
        .create_role(
            guild,
            DEFAULT_ADMIN_ROLE,
            Permissions::MANAGE_GUILD,
            None,
            "no existing role may manage the guild",
        )
        .await?;
    let owner = platform.guild_owner(guild).await?;
    platform
        .add_member_role(guild, owner, role.id)
        .await
        .context("assigning admin role to owner")?;
    info!("guild {guild}: created admin role {} for owner {owner}", role.id);
    Ok(role.id)
}

/// Creates the hidden storage channel: invisible to @everyone, visible to
/// the admin role and the bot itself.
async fn create_storage_channel(
    platform: &Arc<dyn ChatPlatform>,
    guild: GuildId,
    admin_role: RoleId,
) -> Result<ChannelId> {
    let everyone = RoleId(guild.0);
    let overwrites = vec![
        PermissionOverwrite {
            allow: Permissions::empty(),
            deny: Permissions::VIEW_CHANNEL,
            kind: PermissionOverwriteType::Role(everyone),
        },
        PermissionOverwrite {
            allow: Permissions::VIEW_CHANNEL,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Role(admin_role),
        },
        PermissionOverwrite {
            allow: Permissions::VIEW_CHANNEL,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Member(platform.bot_user()),
        },
    ];
    platform
        .create_channel(
            guild,
            STORAGE_CHANNEL,
            STORAGE_TOPIC,
            overwrites,
            "record storage",
        )
        .await
        .context("creating storage channel")
}
