//! Store of per-guild moderation state
//!
//! Each guild's state sits behind its own async mutex. The map itself is a
//! [`DashMap`], so guilds never contend with each other. Callers clone the
//! guild's `Arc` out of the map and drop the map guard before awaiting the lock.

use crate::moderation::{GuildModerationState, ModerationError, ModerationResult};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Shared handle to one guild's state
pub type GuildHandle = Arc<Mutex<GuildModerationState>>;

/// Store for moderation state of every loaded guild
#[derive(Debug, Clone, Default)]
pub struct ModerationStore {
    guilds: Arc<DashMap<u64, GuildHandle>>,
    /// Held from snapshot to write so saves of a guild land in order
    save_locks: Arc<DashMap<u64, Arc<Mutex<()>>>>,
    paused: Arc<AtomicBool>,
}

impl ModerationStore {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle of a loaded guild
    pub fn guild(&self, guild_id: u64) -> Option<GuildHandle> {
        self.guilds.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Get the handle of a loaded guild or fail with `GuildNotLoaded`
    ///
    /// # Errors
    /// Returns `GuildNotLoaded` if the guild has no state.
    pub fn require(&self, guild_id: u64) -> ModerationResult<GuildHandle> {
        self.guild(guild_id)
            .ok_or(ModerationError::GuildNotLoaded(guild_id))
    }

    /// Insert a guild's state, replacing any previous state
    pub fn insert(&self, state: GuildModerationState) -> GuildHandle {
        let guild_id = state.guild_id;
        let handle = Arc::new(Mutex::new(state));
        self.guilds.insert(guild_id, Arc::clone(&handle));
        handle
    }

    /// Get a guild's handle, inserting `state` only if it isn't loaded yet
    pub fn get_or_insert(&self, guild_id: u64, state: GuildModerationState) -> GuildHandle {
        Arc::clone(
            self.guilds
                .entry(guild_id)
                .or_insert_with(|| Arc::new(Mutex::new(state)))
                .value(),
        )
    }

    /// Remove a guild's state
    pub fn remove(&self, guild_id: u64) -> Option<GuildHandle> {
        self.guilds.remove(&guild_id).map(|(_, handle)| handle)
    }

    /// Lock serializing saves of a guild. Outlives the guild's state, so a
    /// final save on unload still waits for saves already in flight.
    pub fn save_lock(&self, guild_id: u64) -> Arc<Mutex<()>> {
        Arc::clone(self.save_locks.entry(guild_id).or_default().value())
    }

    /// Whether a guild is loaded
    pub fn contains(&self, guild_id: u64) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    /// IDs of all loaded guilds
    pub fn guild_ids(&self) -> Vec<u64> {
        self.guilds.iter().map(|entry| *entry.key()).collect()
    }

    /// Handles of all loaded guilds
    pub fn handles(&self) -> Vec<(u64, GuildHandle)> {
        self.guilds
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    /// Number of loaded guilds
    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    /// Whether no guild is loaded
    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    /// Pause or resume enforcement in every guild
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Whether enforcement is paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = ModerationStore::new();
        store.insert(GuildModerationState::new(7));

        assert!(store.contains(7));
        assert_eq!(store.guild_ids(), vec![7]);
        let handle = store.require(7).unwrap();
        assert_eq!(handle.lock().await.guild_id, 7);

        assert!(matches!(
            store.require(8),
            Err(ModerationError::GuildNotLoaded(8))
        ));
    }

    #[tokio::test]
    async fn test_get_or_insert_keeps_existing_state() {
        let store = ModerationStore::new();
        let mut first = GuildModerationState::new(7);
        first.add_banned_string("spoiler").unwrap();
        store.insert(first);

        let handle = store.get_or_insert(7, GuildModerationState::new(7));
        assert!(handle.lock().await.has_banned_phrases());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_handles_share_state() {
        let store = ModerationStore::new();
        store.insert(GuildModerationState::new(7));

        store
            .guild(7)
            .unwrap()
            .lock()
            .await
            .add_banned_string("x")
            .unwrap();
        assert!(store.guild(7).unwrap().lock().await.has_banned_phrases());

        assert!(store.remove(7).is_some());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_save_lock_is_shared_per_guild() {
        let store = ModerationStore::new();
        let first = store.save_lock(1);
        let _held = first.lock().await;

        assert!(store.save_lock(1).try_lock().is_err());
        assert!(store.save_lock(2).try_lock().is_ok());
        store.remove(1);
        assert!(store.clone().save_lock(1).try_lock().is_err());
    }

    #[test]
    fn test_pause_is_shared_between_clones() {
        let store = ModerationStore::new();
        let clone = store.clone();
        assert!(!store.is_paused());
        clone.set_paused(true);
        assert!(store.is_paused());
    }
}
