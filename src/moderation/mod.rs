//! Moderation enforcement engine
//!
//! Watches per-guild message and member events and decides when to throttle,
//! delete, punish or remove a user. State lives in a [`ModerationStore`], all
//! outside effects go through an [`ActionPort`], and a background
//! [`PunishmentScheduler`] reverses timed punishments.

pub mod banned_phrase;
mod error;
mod persistence;
mod pipeline;
mod port;
pub mod punishment;
mod scheduler;
mod serenity_port;
pub mod slowmode;
pub mod spam;
mod state;
mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use banned_phrase::{BannedMatch, Violation};
pub use error::{ActionError, ActionResult, ModerationError, ModerationResult};
pub use persistence::{MemoryPersistence, YamlPersistence};
pub use pipeline::{
    MessageEvent, MessageReport, ModerationPipeline, PipelineSettings, TickReport, UserJoinEvent,
};
#[cfg(test)]
pub use port::{MockActionPort, MockModerationPersistence};
pub use port::{ActionPort, ModerationPersistence};
pub use punishment::{PendingPunishment, Punishment, PunishmentRule, PunishmentType, pending_key};
pub use scheduler::{PunishmentScheduler, SchedulerConfig, SchedulerHandle, SchedulerRequest};
pub use serenity_port::SerenityActionPort;
pub use slowmode::SlowmodeVerdict;
pub use spam::{Resolution, SpamFlag};
pub use state::{
    BannedPattern, BannedPhraseUserState, GuildModerationState, SlowmodeConfig, SlowmodeUserState,
    SpamCheckType, SpamConfig, SpamThreshold, SpamUserState,
};
pub use store::{GuildHandle, ModerationStore};
