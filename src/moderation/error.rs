//! Error types for the moderation engine
//!
//! Validation failures are returned to the command layer. Action port failures
//! are logged at the pipeline and scheduler boundaries and never escape event
//! processing.

use crate::moderation::PunishmentType;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by calls through the action port
#[derive(Debug, Error)]
pub enum ActionError {
    /// The call did not finish within the configured timeout
    #[error("Action timed out after {0:?}")]
    Timeout(Duration),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<poise::serenity_prelude::Error>),

    /// Failed to get guild or member
    #[error("Failed to get guild or member: {0}")]
    GuildOrMemberNotFound(String),

    /// Generic error
    #[error("Action error: {0}")]
    Other(String),
}

impl From<poise::serenity_prelude::Error> for ActionError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// A rule with this trigger count already exists
    #[error("A punishment rule already exists for trigger count {0}")]
    DuplicateTriggerCount(u32),

    /// A rule of this punishment type already exists
    #[error("A punishment rule of type {0} already exists")]
    DuplicatePunishmentType(PunishmentType),

    /// The referenced role does not exist in the guild
    #[error("Invalid role reference: {0}")]
    InvalidRole(u64),

    /// Punishment rules cannot use this type
    #[error("Punishment type {0} cannot be used in a rule")]
    UnsupportedRuleType(PunishmentType),

    /// A banned regex failed to compile
    #[error("Invalid banned pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Slowmode parameters are out of range
    #[error("Invalid slowmode settings: {0}")]
    InvalidSlowmode(String),

    /// Generic rejected input
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// No rule exists for this trigger count
    #[error("No punishment rule for trigger count {0}")]
    RuleNotFound(u32),

    /// No pending punishment matches
    #[error("No pending {punishment_type} punishment for user {user_id}")]
    PendingNotFound {
        user_id: u64,
        punishment_type: PunishmentType,
    },

    /// Guild state has not been loaded
    #[error("Guild not loaded: {0}")]
    GuildNotLoaded(u64),

    /// The bot does not outrank the target
    #[error("Insufficient role position to act on user {user_id} in guild {guild_id}")]
    PermissionDenied { guild_id: u64, user_id: u64 },

    /// Outbound action failed
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Loading or saving guild state failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The background scheduler is no longer running
    #[error("Scheduler stopped: {0}")]
    SchedulerStopped(String),
}

impl ModerationError {
    /// Whether this error was caused by rejected input
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTriggerCount(_)
                | Self::DuplicatePunishmentType(_)
                | Self::InvalidRole(_)
                | Self::UnsupportedRuleType(_)
                | Self::InvalidPattern(_)
                | Self::InvalidSlowmode(_)
                | Self::ValidationFailed(_)
        )
    }
}

impl From<serde_yaml::Error> for ModerationError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<std::io::Error> for ModerationError {
    fn from(error: std::io::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

/// Result type for action port calls
pub type ActionResult<T> = Result<T, ActionError>;

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ModerationError::DuplicateTriggerCount(3);
        assert_eq!(
            error.to_string(),
            "A punishment rule already exists for trigger count 3"
        );

        let error = ModerationError::DuplicatePunishmentType(PunishmentType::Kick);
        assert_eq!(
            error.to_string(),
            "A punishment rule of type Kick already exists"
        );

        let error = ModerationError::from(ActionError::Other("boom".to_string()));
        assert_eq!(error.to_string(), "Action error: boom");
    }

    #[test]
    fn test_validation_classification() {
        assert!(ModerationError::InvalidRole(1).is_validation());
        assert!(ModerationError::DuplicateTriggerCount(1).is_validation());
        assert!(!ModerationError::GuildNotLoaded(1).is_validation());
        assert!(
            !ModerationError::PermissionDenied {
                guild_id: 1,
                user_id: 2
            }
            .is_validation()
        );
        assert!(
            !ModerationError::Action(ActionError::Timeout(Duration::from_secs(1))).is_validation()
        );
    }
}
