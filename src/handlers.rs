use crate::logging::log_message_report;
use crate::moderation::{MessageEvent, ModerationPipeline, UserJoinEvent};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, Guild, GuildId, Member, Message, Ready,
    UnavailableGuild,
};
use tracing::{debug, error, info, warn};

/// Feeds gateway events into the moderation pipeline
pub struct Handler {
    pipeline: ModerationPipeline,
}

impl Handler {
    pub fn new(pipeline: ModerationPipeline) -> Self {
        Self { pipeline }
    }
}

/// Convert serenity IDs to raw snowflakes
fn snowflakes<T: Copy + Into<u64>>(ids: &[T]) -> Vec<u64> {
    ids.iter().map(|id| (*id).into()).collect()
}

/// Engine view of a guild message, `None` for DMs
fn message_event(msg: &Message) -> Option<MessageEvent> {
    let guild_id = msg.guild_id?;
    Some(MessageEvent {
        guild_id: guild_id.get(),
        channel_id: msg.channel_id.get(),
        message_id: msg.id.get(),
        author_id: msg.author.id.get(),
        author_is_bot: msg.author.bot,
        author_roles: msg
            .member
            .as_ref()
            .map(|member| snowflakes(&member.roles))
            .unwrap_or_default(),
        content: msg.content.clone(),
        mentioned_users: msg.mentions.iter().map(|user| user.id.get()).collect(),
    })
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!("Cache ready! The bot is in {guild_count} guild(s)");
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        if let Err(e) = self.pipeline.load_guild(guild.id.get()).await {
            error!(guild_id = guild.id.get(), "Failed to load moderation state: {e}");
        }
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // An outage also reports the guild as deleted; keep its state
        if incomplete.unavailable {
            debug!(guild_id = incomplete.id.get(), "Guild became unavailable");
            return;
        }
        if let Err(e) = self.pipeline.unload_guild(incomplete.id.get()).await {
            error!(
                guild_id = incomplete.id.get(),
                "Failed to save moderation state on removal: {e}"
            );
        }
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let Some(event) = message_event(&msg) else {
            return;
        };
        let report = self.pipeline.process_message(&event).await;
        log_message_report(&event, &report);
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        let event = UserJoinEvent {
            guild_id: new_member.guild_id.get(),
            user_id: new_member.user.id.get(),
            is_bot: new_member.user.bot,
            roles: snowflakes(&new_member.roles),
        };
        let registered = self.pipeline.process_user_join(&event).await;
        if registered > 0 {
            debug!(
                guild_id = event.guild_id,
                user_id = event.user_id,
                registered,
                "New member placed under slowmode"
            );
        }
    }
}
