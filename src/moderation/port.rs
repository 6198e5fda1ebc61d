//! Ports to the chat platform and to storage
//!
//! The engine never talks to Discord directly. Everything it does to the
//! outside world goes through [`ActionPort`], and guild state is loaded and
//! saved through [`ModerationPersistence`].

use crate::moderation::{ActionResult, GuildModerationState, ModerationResult};

/// Moderation actions the engine can issue
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ActionPort: Send + Sync {
    /// Delete a message
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> ActionResult<()>;

    /// Post a message in a channel
    async fn send_message(&self, channel_id: u64, content: &str) -> ActionResult<()>;

    /// Kick a member from a guild
    async fn kick_user(&self, guild_id: u64, user_id: u64) -> ActionResult<()>;

    /// Ban a user, deleting `prune_days` days of their messages
    async fn ban_user(&self, guild_id: u64, user_id: u64, prune_days: u8) -> ActionResult<()>;

    /// Lift a ban
    async fn unban_user(&self, guild_id: u64, user_id: u64) -> ActionResult<()>;

    /// Grant a role to a member
    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> ActionResult<()>;

    /// Remove a role from a member
    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> ActionResult<()>;

    /// Server-mute or unmute a member in voice
    async fn set_mute(&self, guild_id: u64, user_id: u64, muted: bool) -> ActionResult<()>;

    /// Server-deafen or undeafen a member in voice
    async fn set_deafen(&self, guild_id: u64, user_id: u64, deafened: bool) -> ActionResult<()>;

    /// Position of a role in the guild hierarchy
    async fn get_role_position(&self, guild_id: u64, role_id: u64) -> ActionResult<i64>;

    /// Position of the highest role a member holds (0 for no roles)
    async fn get_user_top_role_position(&self, guild_id: u64, user_id: u64) -> ActionResult<i64>;
}

/// Storage for per-guild moderation state
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ModerationPersistence: Send + Sync {
    /// Load the saved state of a guild, if any
    async fn load_guild(&self, guild_id: u64) -> ModerationResult<Option<GuildModerationState>>;

    /// Save the state of a guild
    async fn save_guild(&self, guild_id: u64, state: &GuildModerationState)
    -> ModerationResult<()>;
}
