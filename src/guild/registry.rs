//! Registry of guilds the bot is serving.
//!
//! Populated on guild-create events, pruned on guild departure. A slot is
//! claimed before bootstrap starts, so duplicate guild-create events
//! (gateway reconnects, racing shards) never bootstrap one guild twice.
//! A guild whose bootstrap failed is simply absent; its messages are
//! ignored until the next successful bootstrap.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serenity::model::id::GuildId;

use super::GuildState;

enum Slot {
    /// Claimed; bootstrap is running.
    Pending,
    Ready(Arc<GuildState>),
}

#[derive(Default)]
pub struct GuildRegistry {
    states: DashMap<GuildId, Slot>,
}

impl GuildRegistry {
    pub fn new() -> Self {
        GuildRegistry::default()
    }

    /// Atomically claims the guild's slot ahead of bootstrap. Returns
    /// false when the guild is already pending or ready.
    pub fn begin(&self, guild: GuildId) -> bool {
        match self.states.entry(guild) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Slot::Pending);
                true
            }
        }
    }

    /// Frees a claimed slot after a failed bootstrap. Ready guilds are
    /// left alone.
    pub fn release(&self, guild: GuildId) {
        self.states.remove_if(&guild, |_, slot| matches!(slot, Slot::Pending));
    }

    pub fn insert(&self, guild: GuildId, state: Arc<GuildState>) {
        self.states.insert(guild, Slot::Ready(state));
    }

    pub fn get(&self, guild: GuildId) -> Option<Arc<GuildState>> {
        self.states.get(&guild).and_then(|slot| match slot.value() {
            Slot::Ready(state) => Some(Arc::clone(state)),
            Slot::Pending => None,
        })
    }

    pub fn remove(&self, guild: GuildId) -> bool {
        self.states.remove(&guild).is_some()
    }

    /// Snapshot of every ready guild. Taken by the scheduler so a pass
    /// never holds map shards across awaits.
    pub fn states(&self) -> Vec<Arc<GuildState>> {
        self.states
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Ready(state) => Some(Arc::clone(state)),
                Slot::Pending => None,
            })
            .collect()
    }
}
