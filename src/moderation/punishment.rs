//! Punishment types, escalation rules and pending reversals
//!
//! Every consequence the engine can issue is a [`Punishment`]. Applying and
//! reversing a punishment goes through [`apply`] and [`reverse`], which are
//! shared by banned-phrase escalation, spam resolution, administrative
//! punishments and the expiry scheduler.

use crate::moderation::{ActionPort, ActionResult};
use chrono::{DateTime, Duration, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Type of punishment, without parameters
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PunishmentType {
    /// No action
    None,
    /// Grant a role
    #[display("Role Grant")]
    RoleGrant,
    /// Server kick
    Kick,
    /// Server ban
    Ban,
    /// Voice mute
    Mute,
    /// Voice deafen
    Deafen,
}

/// A consequence that can be issued to a user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Punishment {
    /// No action
    #[default]
    None,
    /// Grant a role (usually a restricted "muted" role)
    RoleGrant { role_id: u64 },
    /// Server kick
    Kick,
    /// Server ban
    Ban,
    /// Voice mute
    Mute,
    /// Voice deafen
    Deafen,
}

impl Punishment {
    /// Get the type of this punishment
    #[must_use]
    pub fn get_type(&self) -> PunishmentType {
        match self {
            Self::None => PunishmentType::None,
            Self::RoleGrant { .. } => PunishmentType::RoleGrant,
            Self::Kick => PunishmentType::Kick,
            Self::Ban => PunishmentType::Ban,
            Self::Mute => PunishmentType::Mute,
            Self::Deafen => PunishmentType::Deafen,
        }
    }

    /// Whether a timed instance of this punishment can be reversed later
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        match self {
            Self::RoleGrant { .. } | Self::Ban | Self::Mute | Self::Deafen => true,
            Self::None | Self::Kick => false,
        }
    }

    /// Whether the bot must outrank the target before issuing this punishment
    #[must_use]
    pub fn requires_outranking(&self) -> bool {
        matches!(self, Self::Kick | Self::Ban)
    }

    /// Whether punishment rules may use this punishment
    #[must_use]
    pub fn is_rule_type(&self) -> bool {
        match self {
            Self::None | Self::RoleGrant { .. } | Self::Kick | Self::Ban => true,
            Self::Mute | Self::Deafen => false,
        }
    }

    /// Create a new `RoleGrant` punishment
    pub fn role_grant(role_id: u64) -> Self {
        Self::RoleGrant { role_id }
    }
}

/// Apply a punishment through the action port
///
/// # Errors
/// Returns the port's error if the outbound call fails.
pub async fn apply(
    port: &dyn ActionPort,
    guild_id: u64,
    user_id: u64,
    punishment: &Punishment,
    ban_prune_days: u8,
) -> ActionResult<()> {
    match punishment {
        Punishment::None => {
            info!("No-op punishment for user {user_id} in guild {guild_id}");
            Ok(())
        }
        Punishment::RoleGrant { role_id } => port.add_role(guild_id, user_id, *role_id).await,
        Punishment::Kick => port.kick_user(guild_id, user_id).await,
        Punishment::Ban => port.ban_user(guild_id, user_id, ban_prune_days).await,
        Punishment::Mute => port.set_mute(guild_id, user_id, true).await,
        Punishment::Deafen => port.set_deafen(guild_id, user_id, true).await,
    }
}

/// Reverse a previously applied punishment through the action port
///
/// # Errors
/// Returns the port's error if the outbound call fails.
pub async fn reverse(
    port: &dyn ActionPort,
    guild_id: u64,
    user_id: u64,
    punishment: &Punishment,
) -> ActionResult<()> {
    match punishment {
        Punishment::RoleGrant { role_id } => port.remove_role(guild_id, user_id, *role_id).await,
        Punishment::Ban => port.unban_user(guild_id, user_id).await,
        Punishment::Mute => port.set_mute(guild_id, user_id, false).await,
        Punishment::Deafen => port.set_deafen(guild_id, user_id, false).await,
        // Kicks can't be reversed
        Punishment::None | Punishment::Kick => {
            info!(
                "{} doesn't need reversal for user {user_id} in guild {guild_id}",
                punishment.get_type()
            );
            Ok(())
        }
    }
}

/// Escalation rule: fires when a user's violation count exactly equals `trigger_count`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentRule {
    /// Violation count that fires this rule
    pub trigger_count: u32,
    /// What to do when the rule fires
    pub punishment: Punishment,
    /// Minutes until reversal, 0 for permanent
    pub duration_minutes: u32,
}

impl PunishmentRule {
    /// Create a new punishment rule
    pub fn new(trigger_count: u32, punishment: Punishment, duration_minutes: u32) -> Self {
        Self {
            trigger_count,
            punishment,
            duration_minutes,
        }
    }

    /// Whether the punishment stays until manually lifted
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.duration_minutes == 0
    }
}

/// Key of a pending punishment inside a guild
///
/// Role grants include the role, so grants of different roles to one user
/// are tracked separately.
#[must_use]
pub fn pending_key(user_id: u64, punishment: &Punishment) -> String {
    match punishment {
        Punishment::RoleGrant { role_id } => format!("{user_id}:RoleGrant:{role_id}"),
        other => format!("{user_id}:{:?}", other.get_type()),
    }
}

/// A timed punishment waiting to be reversed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPunishment {
    /// Unique ID of this pending punishment
    pub id: String,
    /// ID of the guild where the punishment applies
    pub guild_id: u64,
    /// ID of the punished user
    pub user_id: u64,
    /// The punishment to reverse
    pub punishment: Punishment,
    /// When the punishment was issued
    pub created_at: DateTime<Utc>,
    /// When to reverse the punishment
    pub expires_at: DateTime<Utc>,
}

impl PendingPunishment {
    /// Create a pending reversal `duration_minutes` after `now`
    pub fn new(
        guild_id: u64,
        user_id: u64,
        punishment: Punishment,
        duration_minutes: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            guild_id,
            user_id,
            punishment,
            created_at: now,
            expires_at: now + Duration::minutes(i64::from(duration_minutes)),
        }
    }

    /// Map key of this entry
    #[must_use]
    pub fn key(&self) -> String {
        pending_key(self.user_id, &self.punishment)
    }

    /// Check if this punishment is due for reversal
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
