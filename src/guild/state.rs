//! Per-guild working state.
//!
//! One [`GuildState`] exists per registered guild. It owns the guild's
//! record store plus in-memory mirrors of everything the store holds, so
//! message handling and scheduler passes never touch the platform for
//! reads. Writes go record-first: a fact is persisted before the mirror
//! is updated, so a crash can lose at most the acknowledgement.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::NaiveDateTime;
use log::{info, warn};
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
use serenity::model::permissions::Permissions;
use serenity::utils::Colour;
use tokio::sync::{Mutex, RwLock};

use crate::core::{BotError, ValidationError};
use crate::features::reminders::Reminder;
use crate::features::routines::Routine;
use crate::platform::{ChatPlatform, RoleInfo};
use crate::storage::records::{JoinMessageSetting, RecordKind};
use crate::storage::{records, RecordStore};

pub struct GuildState {
    guild: GuildId,
    platform: Arc<dyn ChatPlatform>,
    store: RecordStore,
    admin_role: RoleId,
    color_perm_role: RwLock<RoleId>,
    color_roles: RwLock<Vec<RoleInfo>>,
    routines: RwLock<Vec<Routine>>,
    reminders: Mutex<Vec<Reminder>>,
    join_message: RwLock<JoinMessageSetting>,
}

impl GuildState {
    /// Bootstraps storage and loads every stored record into memory.
    ///
    /// A storage-scaffold failure is fatal for the guild (it stays out of
    /// the registry); a single malformed or unresolvable record is logged
    /// and skipped.
    pub async fn initialize(
        platform: Arc<dyn ChatPlatform>,
        guild: GuildId,
    ) -> Result<Arc<GuildState>> {
        let (store, admin_role) = RecordStore::bootstrap(platform.clone(), guild)
            .await
            .with_context(|| format!("bootstrapping storage for guild {guild}"))?;

        let routines = load_routines(&store, guild).await?;
        let reminders = load_reminders(&store, guild).await?;
        let color_roles = load_color_roles(&store, &platform, guild).await?;
        let color_perm_role = load_color_perm_role(&store, &platform, guild, admin_role).await?;
        let join_message = load_join_message(&store, guild).await?;

        info!(
            "guild {guild}: ready with {} routine(s), {} reminder(s), {} color role(s)",
            routines.len(),
            reminders.len(),
            color_roles.len()
        );

        Ok(Arc::new(GuildState {
            guild,
            platform,
            store,
            admin_role,
            color_perm_role: RwLock::new(color_perm_role),
            color_roles: RwLock::new(color_roles),
            routines: RwLock::new(routines),
            reminders: Mutex::new(reminders),
            join_message: RwLock::new(join_message),
        }))
    }

    pub fn guild(&self) -> GuildId {
        self.guild
    }

    // ---- routines ----

    /// Parses and stores a new routine, returning the confirmation text.
    pub async fn add_routine(&self, body: &str) -> Result<String, BotError> {
        let routine = Routine::parse_command(body)?;
        self.store
            .append(RecordKind::Routine, &routine.encode_command())
            .await?;
        let summary = routine.summary();
        self.routines.write().await.push(routine);
        Ok(summary)
    }

    /// Responses fired by a message: `(text, tts)` per matching routine.
    pub async fn responses(&self, message: &str, sender: UserId) -> Vec<(String, bool)> {
        self.routines
            .read()
            .await
            .iter()
            .filter(|r| r.matches(message, sender))
            .map(|r| (r.response.clone(), r.tts))
            .collect()
    }

    // ---- reminders ----

    pub async fn add_reminder(
        &self,
        body: &str,
        user: UserId,
        channel: ChannelId,
    ) -> Result<String, BotError> {
        let reminder = Reminder::parse_command(body, user, channel)?;
        self.store
            .append(RecordKind::Reminder, &reminder.encode_record())
            .await?;
        let confirmation = reminder.confirmation();
        self.reminders.lock().await.push(reminder);
        Ok(confirmation)
    }

    /// Removes and returns every reminder due at or before `now`.
    pub async fn due_reminders(&self, now: NaiveDateTime) -> Vec<Reminder> {
        let mut reminders = self.reminders.lock().await;
        let (due, remaining): (Vec<_>, Vec<_>) =
            reminders.drain(..).partition(|r| r.due <= now);
        *reminders = remaining;
        due
    }

    /// Whole minutes until the nearest pending reminder, if any.
    pub async fn minutes_until_next(&self, now: NaiveDateTime) -> Option<i64> {
        self.reminders
            .lock()
            .await
            .iter()
            .map(|r| (r.due - now).num_minutes())
            .min()
    }

    // ---- welcome message ----

    /// Text to greet a newcomer with, or `None` when greeting is off.
    pub async fn welcome(&self, user: UserId) -> Option<String> {
        let setting = self.join_message.read().await;
        if !setting.enabled {
            return None;
        }
        Some(if setting.mention {
            format!("<@{}> {}", user.0, setting.message)
        } else {
            setting.message.clone()
        })
    }

    pub async fn set_join_message(
        &self,
        setting: JoinMessageSetting,
    ) -> Result<String, BotError> {
        self.store
            .upsert(RecordKind::JoinMessage, &setting.encode_record())
            .await?;
        *self.join_message.write().await = setting;
        Ok("Updated the welcome message".to_string())
    }

    // ---- color roles ----

    pub async fn list_colors(&self) -> String {
        let colors = self.color_roles.read().await;
        if colors.is_empty() {
            return "There are no color roles yet".to_string();
        }
        let mut out = String::from("Available colors:");
        for role in colors.iter() {
            let c = role.colour;
            out.push_str(&format!("\n{} ({} {} {})", role.name, c.r(), c.g(), c.b()));
        }
        out
    }

    pub async fn add_color(&self, name: &str, rgb: (u8, u8, u8)) -> Result<String, BotError> {
        let colour = Colour::from_rgb(rgb.0, rgb.1, rgb.2);
        {
            let colors = self.color_roles.read().await;
            if colors.iter().any(|r| r.name.eq_ignore_ascii_case(name)) {
                return Err(ValidationError::new(format!(
                    "A color named \"{name}\" already exists"
                ))
                .into());
            }
            if let Some(existing) = colors.iter().find(|r| r.colour == colour) {
                return Err(ValidationError::new(format!(
                    "That color value is already taken by \"{}\"",
                    existing.name
                ))
                .into());
            }
        }
        let role = self
            .platform
            .create_role(
                self.guild,
                name,
                Permissions::empty(),
                Some(colour),
                "new color role",
            )
            .await?;
        self.store
            .append(RecordKind::ColorRole, &records::encode_role_record(role.id))
            .await?;
        let confirmation = format!("Added the color \"{}\"", role.name);
        self.color_roles.write().await.push(role);
        Ok(confirmation)
    }

    /// Deletes a color role. Refused while any member still wears it.
    /// The backing record stays behind; it no longer resolves to a role
    /// and is dropped on the next load.
    pub async fn remove_color(&self, name: &str) -> Result<String, BotError> {
        let target = self
            .find_color(name)
            .await
            .ok_or_else(|| ValidationError::new(format!("No color named \"{name}\"")))?;
        if self.platform.role_has_members(self.guild, target.id).await? {
            return Err(ValidationError::new(format!(
                "\"{}\" is still in use; members must drop it first",
                target.name
            ))
            .into());
        }
        self.platform.delete_role(self.guild, target.id).await?;
        self.color_roles.write().await.retain(|r| r.id != target.id);
        Ok(format!("Removed the color \"{}\"", target.name))
    }

    /// Gives the member the named color, swapping out any color they
    /// already wear; asking for the color they have takes it off.
    pub async fn toggle_color(&self, user: UserId, name: &str) -> Result<String, BotError> {
        let target = self
            .find_color(name)
            .await
            .ok_or_else(|| ValidationError::new(format!("No color named \"{name}\"")))?;
        let worn = self.platform.member_roles(self.guild, user).await?;
        if worn.contains(&target.id) {
            self.platform
                .remove_member_role(self.guild, user, target.id)
                .await?;
            return Ok(format!("Took off the color \"{}\"", target.name));
        }
        let other_colors: Vec<RoleId> = self
            .color_roles
            .read()
            .await
            .iter()
            .filter(|r| worn.contains(&r.id))
            .map(|r| r.id)
            .collect();
        for role in other_colors {
            self.platform
                .remove_member_role(self.guild, user, role)
                .await?;
        }
        self.platform
            .add_member_role(self.guild, user, target.id)
            .await?;
        Ok(format!("You now wear the color \"{}\"", target.name))
    }

    pub async fn set_color_perm_role(&self, role: RoleId) -> Result<String, BotError> {
        let roles = self.platform.guild_roles(self.guild).await?;
        let Some(info) = roles.iter().find(|r| r.id == role) else {
            return Err(ValidationError::new("That role doesn't exist in this server").into());
        };
        self.store
            .upsert(RecordKind::ColorPermRole, &records::encode_role_record(role))
            .await?;
        *self.color_perm_role.write().await = role;
        Ok(format!(
            "Members at or above \"{}\" can now manage colors",
            info.name
        ))
    }

    async fn find_color(&self, name: &str) -> Option<RoleInfo> {
        self.color_roles
            .read()
            .await
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    // ---- permissions ----

    pub async fn is_admin(&self, user: UserId) -> Result<bool, BotError> {
        Ok(self.outranks(user, self.admin_role).await?)
    }

    pub async fn may_manage_colors(&self, user: UserId) -> Result<bool, BotError> {
        let gate = *self.color_perm_role.read().await;
        Ok(self.outranks(user, gate).await?)
    }

    /// Owner always outranks; otherwise the member's highest role must sit
    /// at or above the gate role in the hierarchy.
    async fn outranks(&self, user: UserId, gate: RoleId) -> Result<bool> {
        if self.platform.guild_owner(self.guild).await? == user {
            return Ok(true);
        }
        let worn = self.platform.member_roles(self.guild, user).await?;
        if worn.contains(&gate) {
            return Ok(true);
        }
        let roles = self.platform.guild_roles(self.guild).await?;
        let Some(gate_position) = roles.iter().find(|r| r.id == gate).map(|r| r.position) else {
            return Ok(false);
        };
        let highest = roles
            .iter()
            .filter(|r| worn.contains(&r.id))
            .map(|r| r.position)
            .max();
        Ok(highest.map_or(false, |h| h >= gate_position))
    }
}

async fn load_routines(store: &RecordStore, guild: GuildId) -> Result<Vec<Routine>> {
    let mut routines = Vec::new();
    for record in store.find_by_tag(RecordKind::Routine).await? {
        match Routine::parse_command(&record.body) {
            Ok(routine) => routines.push(routine),
            Err(e) => warn!("guild {guild}: skipping malformed routine record {}: {e}", record.id),
        }
    }
    Ok(routines)
}

async fn load_reminders(store: &RecordStore, guild: GuildId) -> Result<Vec<Reminder>> {
    let mut reminders = Vec::new();
    for record in store.find_by_tag(RecordKind::Reminder).await? {
        match Reminder::parse_record(&record.body) {
            Ok(reminder) => reminders.push(reminder),
            Err(e) => warn!(
                "guild {guild}: skipping malformed reminder record {}: {e}",
                record.id
            ),
        }
    }
    Ok(reminders)
}

async fn load_color_roles(
    store: &RecordStore,
    platform: &Arc<dyn ChatPlatform>,
    guild: GuildId,
) -> Result<Vec<RoleInfo>> {
    let records = store.find_by_tag(RecordKind::ColorRole).await?;
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let roles = platform.guild_roles(guild).await?;
    let mut colors = Vec::new();
    for record in records {
        let id = match records::parse_role_record(&record.body) {
            Ok(id) => id,
            Err(e) => {
                warn!("guild {guild}: skipping malformed color record {}: {e}", record.id);
                continue;
            }
        };
        match roles.iter().find(|r| r.id == id) {
            Some(role) => colors.push(role.clone()),
            None => warn!("guild {guild}: color role {id} no longer exists, skipping"),
        }
    }
    Ok(colors)
}

async fn load_color_perm_role(
    store: &RecordStore,
    platform: &Arc<dyn ChatPlatform>,
    guild: GuildId,
    admin_role: RoleId,
) -> Result<RoleId> {
    let records = store.find_by_tag(RecordKind::ColorPermRole).await?;
    if let Some(record) = records.last() {
        match records::parse_role_record(&record.body) {
            Ok(id) => {
                let roles = platform.guild_roles(guild).await?;
                if roles.iter().any(|r| r.id == id) {
                    return Ok(id);
                }
                warn!("guild {guild}: color perm role {id} no longer exists, falling back");
            }
            Err(e) => warn!("guild {guild}: malformed color perm record: {e}"),
        }
    }
    // Default gate is the admin role; persisted so the choice is visible
    // in the storage channel.
    store
        .upsert(RecordKind::ColorPermRole, &records::encode_role_record(admin_role))
        .await?;
    Ok(admin_role)
}

async fn load_join_message(store: &RecordStore, guild: GuildId) -> Result<JoinMessageSetting> {
    let records = store.find_by_tag(RecordKind::JoinMessage).await?;
    if let Some(record) = records.last() {
        match JoinMessageSetting::parse_record(&record.body) {
            Ok(setting) => return Ok(setting),
            Err(e) => warn!("guild {guild}: malformed join message record: {e}"),
        }
    }
    Ok(JoinMessageSetting::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryPlatform;
    use crate::storage::{DEFAULT_ADMIN_ROLE, STORAGE_CHANNEL};
    use chrono::NaiveDate;

    const GUILD: GuildId = GuildId(77);
    const OWNER: UserId = UserId(205);
    const CHANNEL: ChannelId = ChannelId(400);

    async fn new_state() -> (Arc<GuildState>, Arc<MemoryPlatform>) {
        let platform = Arc::new(MemoryPlatform::new(UserId(1)));
        platform.seed_guild(GUILD, OWNER);
        let state = GuildState::initialize(platform.clone(), GUILD).await.unwrap();
        (state, platform)
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2027, 7, 4)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_builds_scaffold_once() {
        let (_, platform) = new_state().await;
        let again = GuildState::initialize(platform.clone(), GUILD).await;
        assert!(again.is_ok());
        assert_eq!(platform.channel_count(GUILD), 1);
        assert_eq!(platform.roles_named(GUILD, DEFAULT_ADMIN_ROLE), 1);
        assert!(platform.channel_named(GUILD, STORAGE_CHANNEL).is_some());
    }

    #[tokio::test]
    async fn test_routine_survives_restart() {
        let (state, platform) = new_state().await;
        state
            .add_routine(":addnew: hello false none false hi there")
            .await
            .unwrap();

        let reloaded = GuildState::initialize(platform.clone(), GUILD).await.unwrap();
        let responses = reloaded.responses("well hello!", UserId(3)).await;
        assert_eq!(responses, vec![("hi there".to_string(), false)]);
    }

    #[tokio::test]
    async fn test_reserved_trigger_rejected() {
        let (state, _) = new_state().await;
        let err = state
            .add_routine(":addnew: :remindme: false none false gotcha")
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reminder_survives_restart() {
        let (state, platform) = new_state().await;
        state
            .add_reminder(
                ":remindme: 10:05 AM July 04, 2027 false water the plants",
                UserId(9),
                CHANNEL,
            )
            .await
            .unwrap();

        let reloaded = GuildState::initialize(platform.clone(), GUILD).await.unwrap();
        let due = reloaded.due_reminders(at(10, 5)).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].event, "water the plants");
        assert_eq!(due[0].user, UserId(9));
        assert_eq!(due[0].channel, CHANNEL);
    }

    #[tokio::test]
    async fn test_due_reminders_drains_once() {
        let (state, _) = new_state().await;
        state
            .add_reminder(":remindme: 10:00 AM July 04, 2027 false a", UserId(9), CHANNEL)
            .await
            .unwrap();
        state
            .add_reminder(":remindme: 11:00 AM July 04, 2027 false b", UserId(9), CHANNEL)
            .await
            .unwrap();

        let due = state.due_reminders(at(10, 30)).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].event, "a");
        assert!(state.due_reminders(at(10, 30)).await.is_empty());
        assert_eq!(state.minutes_until_next(at(10, 30)).await, Some(30));
    }

    #[tokio::test]
    async fn test_invalid_reminder_is_validation_error() {
        let (state, _) = new_state().await;
        let err = state
            .add_reminder(":remindme: 13:00 PM Jul 4, 2027 false x", UserId(9), CHANNEL)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
    }

    #[tokio::test]
    async fn test_owner_is_admin() {
        let (state, _) = new_state().await;
        assert!(state.is_admin(OWNER).await.unwrap());
        assert!(!state.is_admin(UserId(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_higher_role_outranks_admin_gate() {
        let platform = Arc::new(MemoryPlatform::new(UserId(1)));
        platform.seed_guild(GUILD, OWNER);
        platform.seed_role(GUILD, "Mods", Permissions::MANAGE_GUILD, 3);
        let lofty = platform.seed_role(GUILD, "Elders", Permissions::empty(), 8);
        platform.seed_member_role(GUILD, UserId(3), lofty);

        let state = GuildState::initialize(platform.clone(), GUILD).await.unwrap();
        assert!(state.is_admin(UserId(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_color_lifecycle() {
        let (state, _platform) = new_state().await;
        state.add_color("Crimson", (220, 20, 60)).await.unwrap();

        let listing = state.list_colors().await;
        assert!(listing.contains("Crimson"));

        // Same name and same value are both rejected.
        assert!(matches!(
            state.add_color("crimson", (1, 2, 3)).await.unwrap_err(),
            BotError::Validation(_)
        ));
        assert!(matches!(
            state.add_color("Scarlet", (220, 20, 60)).await.unwrap_err(),
            BotError::Validation(_)
        ));

        state.toggle_color(UserId(9), "Crimson").await.unwrap();
        assert!(matches!(
            state.remove_color("Crimson").await.unwrap_err(),
            BotError::Validation(_)
        ));

        state.toggle_color(UserId(9), "crimson").await.unwrap();
        state.remove_color("Crimson").await.unwrap();
        assert_eq!(state.list_colors().await, "There are no color roles yet");
    }

    #[tokio::test]
    async fn test_toggle_swaps_colors() {
        let (state, platform) = new_state().await;
        state.add_color("Red", (255, 0, 0)).await.unwrap();
        state.add_color("Blue", (0, 0, 255)).await.unwrap();

        state.toggle_color(UserId(9), "Red").await.unwrap();
        state.toggle_color(UserId(9), "Blue").await.unwrap();

        let red = state.find_color("Red").await.unwrap().id;
        let blue = state.find_color("Blue").await.unwrap().id;
        assert!(!platform.member_has_role(GUILD, UserId(9), red));
        assert!(platform.member_has_role(GUILD, UserId(9), blue));
    }

    #[tokio::test]
    async fn test_colors_survive_restart_but_deleted_roles_drop() {
        let (state, platform) = new_state().await;
        state.add_color("Red", (255, 0, 0)).await.unwrap();
        state.add_color("Blue", (0, 0, 255)).await.unwrap();
        state.remove_color("Blue").await.unwrap();

        let reloaded = GuildState::initialize(platform.clone(), GUILD).await.unwrap();
        let listing = reloaded.list_colors().await;
        assert!(listing.contains("Red"));
        assert!(!listing.contains("Blue"));
    }

    #[tokio::test]
    async fn test_welcome_message_defaults_and_updates() {
        let (state, platform) = new_state().await;
        let greeting = state.welcome(UserId(9)).await.unwrap();
        assert_eq!(greeting, "<@9> Welcome to the server!");

        state
            .set_join_message(JoinMessageSetting {
                enabled: true,
                mention: false,
                message: "Greetings.".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(state.welcome(UserId(9)).await.unwrap(), "Greetings.");

        let reloaded = GuildState::initialize(platform.clone(), GUILD).await.unwrap();
        assert_eq!(reloaded.welcome(UserId(9)).await.unwrap(), "Greetings.");

        state
            .set_join_message(JoinMessageSetting {
                enabled: false,
                mention: false,
                message: String::new(),
            })
            .await
            .unwrap();
        assert!(state.welcome(UserId(9)).await.is_none());
    }

    #[tokio::test]
    async fn test_color_perm_role_gate() {
        let (state, platform) = new_state().await;
        let gate = platform.seed_role(GUILD, "Painters", Permissions::empty(), 1);

        assert!(!state.may_manage_colors(UserId(9)).await.unwrap());
        state.set_color_perm_role(gate).await.unwrap();
        platform.seed_member_role(GUILD, UserId(9), gate);
        assert!(state.may_manage_colors(UserId(9)).await.unwrap());

        let reloaded = GuildState::initialize(platform.clone(), GUILD).await.unwrap();
        assert!(reloaded.may_manage_colors(UserId(9)).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_color_perm_role_requires_existing_role() {
        let (state, _) = new_state().await;
        assert!(matches!(
            state.set_color_perm_role(RoleId(999999)).await.unwrap_err(),
            BotError::Validation(_)
        ));
    }
}
