pub mod commands;
pub mod config;
pub mod data;
pub mod handlers;
pub mod logging;
pub mod moderation;
pub mod status;

// Log targets
pub const BOT_NAME: &str = "warden_daemon";
pub const COMMAND_TARGET: &str = "warden_daemon::command";
pub const ERROR_TARGET: &str = "warden_daemon::error";
pub const EVENT_TARGET: &str = "warden_daemon::handlers";
pub const CONSOLE_TARGET: &str = "warden_daemon";
pub const MODERATION_TARGET: &str = "warden_daemon::moderation";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
