use crate::moderation::{
    ModerationError, ModerationResult, Punishment, PunishmentRule, PunishmentType,
    SlowmodeConfig, SpamCheckType, SpamThreshold,
};
use crate::status::{create_status_embed, format_guild_status, format_punishment, format_rule};
use crate::{Context, Error};
use chrono::Utc;
use poise::command;
use poise::serenity_prelude as serenity;
use std::collections::BTreeSet;

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Punishment a rule can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum RuleKind {
    #[name = "None"]
    Nothing,
    #[name = "Role Grant"]
    RoleGrant,
    Kick,
    Ban,
}

/// Punishment that can be issued for a limited time
#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum TimedKind {
    #[name = "Role Grant"]
    RoleGrant,
    Ban,
    Mute,
    Deafen,
}

impl TimedKind {
    fn punishment_type(self) -> PunishmentType {
        match self {
            Self::RoleGrant => PunishmentType::RoleGrant,
            Self::Ban => PunishmentType::Ban,
            Self::Mute => PunishmentType::Mute,
            Self::Deafen => PunishmentType::Deafen,
        }
    }
}

/// Spam signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum SpamKind {
    #[name = "Message Burst"]
    MessageBurst,
    #[name = "Mention Burst"]
    MentionBurst,
    #[name = "Link Burst"]
    LinkBurst,
    #[name = "Long Message Burst"]
    LongMessageBurst,
}

impl From<SpamKind> for SpamCheckType {
    fn from(kind: SpamKind) -> Self {
        match kind {
            SpamKind::MessageBurst => Self::MessageBurst,
            SpamKind::MentionBurst => Self::MentionBurst,
            SpamKind::LinkBurst => Self::LinkBurst,
            SpamKind::LongMessageBurst => Self::LongMessageBurst,
        }
    }
}

/// Build the punishment for a choice, requiring a role for role grants
fn punishment_for(
    punishment_type: PunishmentType,
    role: Option<&serenity::Role>,
) -> ModerationResult<Punishment> {
    Ok(match punishment_type {
        PunishmentType::None => Punishment::None,
        PunishmentType::RoleGrant => {
            let role = role.ok_or_else(|| {
                ModerationError::ValidationFailed("Role Grant needs a role".to_string())
            })?;
            Punishment::role_grant(role.id.get())
        }
        PunishmentType::Kick => Punishment::Kick,
        PunishmentType::Ban => Punishment::Ban,
        PunishmentType::Mute => Punishment::Mute,
        PunishmentType::Deafen => Punishment::Deafen,
    })
}

fn rule_type(kind: RuleKind) -> PunishmentType {
    match kind {
        RuleKind::Nothing => PunishmentType::None,
        RuleKind::RoleGrant => PunishmentType::RoleGrant,
        RuleKind::Kick => PunishmentType::Kick,
        RuleKind::Ban => PunishmentType::Ban,
    }
}

fn guild_id(ctx: Context<'_>) -> Result<u64, Error> {
    ctx.guild_id()
        .map(serenity::GuildId::get)
        .ok_or_else(|| "This command only works in a server".into())
}

/// Reply with the outcome; errors the caller can fix become replies, others propagate
async fn respond<T>(
    ctx: Context<'_>,
    result: ModerationResult<T>,
    success: impl FnOnce(T) -> String,
) -> Result<(), Error> {
    match result {
        Ok(value) => {
            ctx.say(success(value)).await?;
        }
        Err(e @ (ModerationError::RuleNotFound(_)
        | ModerationError::PendingNotFound { .. }
        | ModerationError::PermissionDenied { .. })) => {
            ctx.say(format!("❌ {e}")).await?;
        }
        Err(e) if e.is_validation() => {
            ctx.say(format!("❌ {e}")).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Manage banned phrases
#[command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    default_member_permissions = "MANAGE_GUILD",
    subcommands(
        "banned_add",
        "banned_remove",
        "banned_add_pattern",
        "banned_remove_pattern",
        "banned_list"
    ),
    subcommand_required
)]
pub async fn banned(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Ban a phrase (case-insensitive)
#[command(slash_command, rename = "add")]
pub async fn banned_add(
    ctx: Context<'_>,
    #[description = "Phrase to ban"] phrase: String,
) -> Result<(), Error> {
    let result = ctx
        .data()
        .pipeline
        .add_banned_phrase(guild_id(ctx)?, &phrase)
        .await;
    respond(ctx, result, |added| {
        if added {
            format!("Banned phrase `{phrase}`")
        } else {
            format!("`{phrase}` was already banned")
        }
    })
    .await
}

/// Unban a phrase
#[command(slash_command, rename = "remove")]
pub async fn banned_remove(
    ctx: Context<'_>,
    #[description = "Phrase to unban"] phrase: String,
) -> Result<(), Error> {
    let result = ctx
        .data()
        .pipeline
        .remove_banned_phrase(guild_id(ctx)?, &phrase)
        .await;
    respond(ctx, result, |removed| {
        if removed {
            format!("Removed banned phrase `{phrase}`")
        } else {
            format!("`{phrase}` wasn't banned")
        }
    })
    .await
}

/// Ban a regular expression (case-insensitive)
#[command(slash_command, rename = "add_pattern")]
pub async fn banned_add_pattern(
    ctx: Context<'_>,
    #[description = "Regular expression to ban"] pattern: String,
) -> Result<(), Error> {
    let result = ctx
        .data()
        .pipeline
        .add_banned_pattern(guild_id(ctx)?, &pattern)
        .await;
    respond(ctx, result, |added| {
        if added {
            format!("Banned pattern `{pattern}`")
        } else {
            format!("`{pattern}` was already banned")
        }
    })
    .await
}

/// Unban a regular expression
#[command(slash_command, rename = "remove_pattern")]
pub async fn banned_remove_pattern(
    ctx: Context<'_>,
    #[description = "Regular expression to unban"] pattern: String,
) -> Result<(), Error> {
    let result = ctx
        .data()
        .pipeline
        .remove_banned_pattern(guild_id(ctx)?, &pattern)
        .await;
    respond(ctx, result, |removed| {
        if removed {
            format!("Removed banned pattern `{pattern}`")
        } else {
            format!("`{pattern}` wasn't banned")
        }
    })
    .await
}

/// List banned phrases and patterns
#[command(slash_command, rename = "list", ephemeral)]
pub async fn banned_list(ctx: Context<'_>) -> Result<(), Error> {
    let result = ctx.data().pipeline.banned_phrases(guild_id(ctx)?).await;
    respond(ctx, result, |(strings, patterns)| {
        if strings.is_empty() && patterns.is_empty() {
            return "No banned phrases".to_string();
        }
        let mut lines: Vec<String> = strings.iter().map(|s| format!("- `{s}`")).collect();
        lines.extend(patterns.iter().map(|p| format!("- `/{p}/`")));
        lines.join("\n")
    })
    .await
}

/// Manage banned-phrase punishment rules
#[command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    default_member_permissions = "MANAGE_GUILD",
    subcommands("rule_add", "rule_remove", "rule_list"),
    subcommand_required
)]
pub async fn rule(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Punish users whose violation count reaches exactly this number
#[command(slash_command, rename = "add")]
pub async fn rule_add(
    ctx: Context<'_>,
    #[description = "Violation count that fires the rule"]
    #[min = 1]
    trigger_count: u32,
    #[description = "What to do"] kind: RuleKind,
    #[description = "Role to grant (Role Grant only)"] role: Option<serenity::Role>,
    #[description = "Minutes until reversal, 0 for permanent"] duration_minutes: Option<u32>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let result = match punishment_for(rule_type(kind), role.as_ref()) {
        Ok(punishment) => {
            let rule = PunishmentRule::new(trigger_count, punishment, duration_minutes.unwrap_or(0));
            ctx.data()
                .pipeline
                .set_punishment_rule(guild_id, rule.clone())
                .await
                .map(|()| rule)
        }
        Err(e) => Err(e),
    };
    respond(ctx, result, |rule| format!("Added rule: {}", format_rule(&rule))).await
}

/// Remove the rule for a violation count
#[command(slash_command, rename = "remove")]
pub async fn rule_remove(
    ctx: Context<'_>,
    #[description = "Violation count of the rule"] trigger_count: u32,
) -> Result<(), Error> {
    let result = ctx
        .data()
        .pipeline
        .remove_punishment_rule(guild_id(ctx)?, trigger_count)
        .await;
    respond(ctx, result, |rule| format!("Removed rule: {}", format_rule(&rule))).await
}

/// List punishment rules
#[command(slash_command, rename = "list", ephemeral)]
pub async fn rule_list(ctx: Context<'_>) -> Result<(), Error> {
    let result = ctx.data().pipeline.punishment_rules(guild_id(ctx)?).await;
    respond(ctx, result, |rules| {
        if rules.is_empty() {
            "No punishment rules".to_string()
        } else {
            rules
                .iter()
                .map(|rule| format!("- {}", format_rule(rule)))
                .collect::<Vec<_>>()
                .join("\n")
        }
    })
    .await
}

/// Limit how many messages members can send
#[command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    default_member_permissions = "MANAGE_GUILD",
    subcommands("slowmode_enable", "slowmode_disable"),
    subcommand_required
)]
pub async fn slowmode(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Enable slowmode for the server or one channel
#[command(slash_command, rename = "enable")]
pub async fn slowmode_enable(
    ctx: Context<'_>,
    #[description = "Messages allowed per window"]
    #[min = 1]
    messages: u32,
    #[description = "Window length in seconds"]
    #[min = 1]
    window_seconds: u32,
    #[description = "Only this channel"] channel: Option<serenity::GuildChannel>,
    #[description = "Members with this role are not limited"] immune_role: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let config = SlowmodeConfig {
        base_messages: messages,
        window_seconds,
        immune_roles: immune_role
            .iter()
            .map(|role| role.id.get())
            .collect::<BTreeSet<_>>(),
    };
    // Cache guard must be gone before awaiting
    let members: Vec<(u64, Vec<u64>)> = ctx
        .guild()
        .map(|guild| {
            guild
                .members
                .values()
                .filter(|member| !member.user.bot)
                .map(|member| {
                    (
                        member.user.id.get(),
                        member.roles.iter().map(|role| role.get()).collect(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let channel_id = channel.as_ref().map(|channel| channel.id.get());
    let result = ctx
        .data()
        .pipeline
        .enable_slowmode(guild_id, channel_id, config, &members)
        .await;
    respond(ctx, result, |throttled| {
        let scope = channel_id.map_or_else(|| "the server".to_string(), |id| format!("<#{id}>"));
        format!("Slowmode enabled in {scope}: {messages} messages per {window_seconds}s ({throttled} members limited)")
    })
    .await
}

/// Disable slowmode for the server or one channel
#[command(slash_command, rename = "disable")]
pub async fn slowmode_disable(
    ctx: Context<'_>,
    #[description = "Only this channel"] channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let channel_id = channel.as_ref().map(|channel| channel.id.get());
    let result = ctx
        .data()
        .pipeline
        .disable_slowmode(guild_id(ctx)?, channel_id)
        .await;
    respond(ctx, result, |disabled| {
        if disabled {
            "Slowmode disabled".to_string()
        } else {
            "Slowmode wasn't enabled there".to_string()
        }
    })
    .await
}

/// Configure spam detection and vote-to-kick
#[command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    default_member_permissions = "MANAGE_GUILD",
    subcommands("spam_set", "spam_unset"),
    subcommand_required
)]
pub async fn spam(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Flag members when a spam signal reaches a limit
#[command(slash_command, rename = "set")]
pub async fn spam_set(
    ctx: Context<'_>,
    #[description = "Spam signal"] check: SpamKind,
    #[description = "Count that flags the member"]
    #[min = 1]
    limit: u32,
    #[description = "Distinct votes needed to remove them"]
    #[min = 1]
    votes_required: u32,
    #[description = "Characters that make a message long"] long_message_length: Option<usize>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let pipeline = &ctx.data().pipeline;
    let result = match pipeline.spam_config(guild_id).await {
        Ok(mut config) => {
            config.thresholds.insert(
                check.into(),
                SpamThreshold {
                    limit,
                    votes_required,
                },
            );
            if let Some(length) = long_message_length {
                config.long_message_length = length;
            }
            pipeline.configure_spam_thresholds(guild_id, config).await
        }
        Err(e) => Err(e),
    };
    respond(ctx, result, |()| {
        format!(
            "{}: flag at {limit}, {votes_required} votes to remove",
            SpamCheckType::from(check)
        )
    })
    .await
}

/// Stop tracking a spam signal
#[command(slash_command, rename = "unset")]
pub async fn spam_unset(
    ctx: Context<'_>,
    #[description = "Spam signal"] check: SpamKind,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let pipeline = &ctx.data().pipeline;
    let result = match pipeline.spam_config(guild_id).await {
        Ok(mut config) => {
            config.thresholds.remove(&SpamCheckType::from(check));
            pipeline.configure_spam_thresholds(guild_id, config).await
        }
        Err(e) => Err(e),
    };
    respond(ctx, result, |()| {
        format!("{} is no longer tracked", SpamCheckType::from(check))
    })
    .await
}

/// Show or reset a member's banned-phrase violations
#[command(
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS",
    default_member_permissions = "MODERATE_MEMBERS",
    subcommands("violations_show", "violations_reset"),
    subcommand_required
)]
pub async fn violations(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show a member's violation count
#[command(slash_command, rename = "show", ephemeral)]
pub async fn violations_show(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
) -> Result<(), Error> {
    let result = ctx
        .data()
        .pipeline
        .violation_count(guild_id(ctx)?, user.id.get())
        .await;
    respond(ctx, result, |counters| {
        format!(
            "<@{}> has {} banned-phrase violations",
            user.id, counters.role_violation_count
        )
    })
    .await
}

/// Reset a member's violation count
#[command(slash_command, rename = "reset")]
pub async fn violations_reset(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
) -> Result<(), Error> {
    let result = ctx
        .data()
        .pipeline
        .reset_user_violation_count(guild_id(ctx)?, user.id.get())
        .await;
    respond(ctx, result, |reset| {
        if reset {
            format!("Reset violations for <@{}>", user.id)
        } else {
            format!("<@{}> had no violations", user.id)
        }
    })
    .await
}

/// Issue or lift timed punishments
#[command(
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS",
    default_member_permissions = "MODERATE_MEMBERS",
    subcommands("punish_issue", "punish_revoke", "punish_list"),
    subcommand_required
)]
pub async fn punish(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Punish a member, lifting it automatically after a while
#[command(slash_command, rename = "issue")]
pub async fn punish_issue(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "Punishment"] kind: TimedKind,
    #[description = "Minutes until lifted, 0 for permanent"] minutes: u32,
    #[description = "Role to grant (Role Grant only)"] role: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let result = match punishment_for(kind.punishment_type(), role.as_ref()) {
        Ok(punishment) => {
            ctx.data()
                .pipeline
                .issue_timed_punishment(guild_id, user.id.get(), punishment, minutes, Utc::now())
                .await
        }
        Err(e) => Err(e),
    };
    respond(ctx, result, |pending| match pending {
        Some(pending) => format!(
            "{} issued to <@{}> until <t:{}:f>",
            pending.punishment.get_type(),
            user.id,
            pending.expires_at.timestamp()
        ),
        None => format!("{} issued to <@{}>", kind.punishment_type(), user.id),
    })
    .await
}

/// Lift a timed punishment now
#[command(slash_command, rename = "revoke")]
pub async fn punish_revoke(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "Punishment"] kind: TimedKind,
    #[description = "Granted role (Role Grant only)"] role: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let result = match punishment_for(kind.punishment_type(), role.as_ref()) {
        Ok(punishment) => {
            ctx.data()
                .pipeline
                .revoke_pending_punishment(guild_id, user.id.get(), &punishment)
                .await
        }
        Err(e) => Err(e),
    };
    respond(ctx, result, |pending| {
        format!(
            "Lifted {} from <@{}>",
            format_punishment(&pending.punishment),
            user.id
        )
    })
    .await
}

/// List timed punishments
#[command(slash_command, rename = "list", ephemeral)]
pub async fn punish_list(ctx: Context<'_>) -> Result<(), Error> {
    let result = ctx
        .data()
        .pipeline
        .list_pending_punishments(guild_id(ctx)?)
        .await;
    respond(ctx, result, |pending| {
        if pending.is_empty() {
            return "No timed punishments".to_string();
        }
        pending
            .iter()
            .map(|p| {
                format!(
                    "- <@{}>: {} until <t:{}:f>",
                    p.user_id,
                    p.punishment.get_type(),
                    p.expires_at.timestamp()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
    .await
}

/// Pause automatic enforcement everywhere
#[command(slash_command, owners_only)]
pub async fn pause(ctx: Context<'_>) -> Result<(), Error> {
    ctx.data().pipeline.set_paused(true);
    ctx.say("Enforcement paused").await?;
    Ok(())
}

/// Resume automatic enforcement
#[command(slash_command, owners_only)]
pub async fn resume(ctx: Context<'_>) -> Result<(), Error> {
    ctx.data().pipeline.set_paused(false);
    ctx.say("Enforcement resumed").await?;
    Ok(())
}

/// Show this server's moderation setup
#[command(slash_command, guild_only, ephemeral)]
pub async fn modstatus(
    ctx: Context<'_>,
    #[description = "List every rule, channel and timed punishment"] detailed: Option<bool>,
) -> Result<(), Error> {
    let pipeline = &ctx.data().pipeline;
    let paused = pipeline.is_paused();
    let state = match pipeline.guild_snapshot(guild_id(ctx)?).await {
        Ok(state) => state,
        Err(e) => return respond(ctx, Err::<(), _>(e), |()| String::new()).await,
    };

    let reply = if detailed.unwrap_or(false) {
        poise::CreateReply::default().content(format_guild_status(&state, paused, Utc::now()))
    } else {
        poise::CreateReply::default().embed(create_status_embed(&state, paused))
    };
    ctx.send(reply).await?;
    Ok(())
}

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        ping(),
        banned(),
        rule(),
        slowmode(),
        spam(),
        violations(),
        punish(),
        pause(),
        resume(),
        modstatus(),
    ]
}
