//! Guild state persistence
//!
//! [`YamlPersistence`] keeps one YAML file per guild under
//! `{data_dir}/guilds/`. [`MemoryPersistence`] keeps snapshots in memory.

use crate::moderation::{GuildModerationState, ModerationPersistence, ModerationResult};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Directory under the data directory that holds guild files
pub const GUILDS_DIR: &str = "guilds";

/// One YAML file per guild
#[derive(Debug, Clone)]
pub struct YamlPersistence {
    dir: PathBuf,
}

impl YamlPersistence {
    /// Persist guild files under `{data_dir}/guilds`
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join(GUILDS_DIR),
        }
    }

    /// Path of a guild's file
    #[must_use]
    pub fn guild_path(&self, guild_id: u64) -> PathBuf {
        self.dir.join(format!("{guild_id}.yaml"))
    }
}

#[async_trait::async_trait]
impl ModerationPersistence for YamlPersistence {
    async fn load_guild(&self, guild_id: u64) -> ModerationResult<Option<GuildModerationState>> {
        let path = self.guild_path(guild_id);
        if !tokio::fs::try_exists(&path).await? {
            debug!("No saved moderation state for guild {guild_id}");
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let mut state: GuildModerationState = serde_yaml::from_str(&content)?;
        state.guild_id = guild_id;
        info!("Loaded moderation state for guild {guild_id} from {}", path.display());
        Ok(Some(state))
    }

    async fn save_guild(
        &self,
        guild_id: u64,
        state: &GuildModerationState,
    ) -> ModerationResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let yaml = serde_yaml::to_string(state)?;
        let path = self.guild_path(guild_id);
        // Write then rename so a crash never leaves a half-written file.
        // Concurrent saves each get their own temp file.
        let tmp = path.with_extension(format!("yaml.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, yaml).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Saved moderation state for guild {guild_id}");
        Ok(())
    }
}

/// Snapshots kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    guilds: Arc<DashMap<u64, GuildModerationState>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last saved snapshot of a guild
    pub fn snapshot(&self, guild_id: u64) -> Option<GuildModerationState> {
        self.guilds.get(&guild_id).map(|entry| entry.value().clone())
    }
}

#[async_trait::async_trait]
impl ModerationPersistence for MemoryPersistence {
    async fn load_guild(&self, guild_id: u64) -> ModerationResult<Option<GuildModerationState>> {
        Ok(self.snapshot(guild_id))
    }

    async fn save_guild(
        &self,
        guild_id: u64,
        state: &GuildModerationState,
    ) -> ModerationResult<()> {
        self.guilds.insert(guild_id, state.clone());
        Ok(())
    }
}
