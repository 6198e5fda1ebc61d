//! Human-readable moderation status
//!
//! Formats a guild's moderation state for the `/modstatus` command.

use crate::moderation::{
    GuildModerationState, PendingPunishment, Punishment, PunishmentRule, SlowmodeConfig,
};
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use serenity::builder::CreateEmbed;
use std::fmt::Write as _;

/// Format a punishment with its target role, if any
#[must_use]
pub fn format_punishment(punishment: &Punishment) -> String {
    match punishment {
        Punishment::RoleGrant { role_id } => format!("Grant <@&{role_id}>"),
        other => other.get_type().to_string(),
    }
}

/// Format a rule, e.g. `3 violations: Kick`
#[must_use]
pub fn format_rule(rule: &PunishmentRule) -> String {
    let duration = if rule.is_permanent() || !rule.punishment.is_reversible() {
        String::new()
    } else {
        format!(" for {} minutes", rule.duration_minutes)
    };
    format!(
        "{} violation{}: {}{duration}",
        rule.trigger_count,
        if rule.trigger_count == 1 { "" } else { "s" },
        format_punishment(&rule.punishment)
    )
}

fn format_slowmode(config: &SlowmodeConfig) -> String {
    format!(
        "{} messages per {}s ({} immune roles)",
        config.base_messages,
        config.window_seconds,
        config.immune_roles.len()
    )
}

/// Helper to format the time left until `at`
#[must_use]
pub fn format_time_until(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (at - now).num_seconds();
    if secs <= 0 {
        "now".to_string()
    } else if secs < 60 {
        format!("in {secs} seconds")
    } else if secs < 3600 {
        format!("in {} minutes", secs / 60)
    } else if secs < 86400 {
        format!("in {} hours", secs / 3600)
    } else {
        format!("in {} days", secs / 86400)
    }
}

fn format_pending(pending: &PendingPunishment, now: DateTime<Utc>) -> String {
    format!(
        "- <@{}>: {} - lifted {}",
        pending.user_id,
        format_punishment(&pending.punishment),
        format_time_until(pending.expires_at, now)
    )
}

/// Full status report of a guild
#[must_use]
pub fn format_guild_status(
    state: &GuildModerationState,
    paused: bool,
    now: DateTime<Utc>,
) -> String {
    let mut result = String::new();

    let _ = writeln!(result, "# Moderation Status\n");
    if paused {
        let _ = writeln!(result, "**Enforcement is paused**\n");
    }

    let _ = writeln!(
        result,
        "**Banned Phrases**: {} strings, {} patterns",
        state.banned_strings.len(),
        state.banned_regex.len()
    );
    let _ = writeln!(
        result,
        "**Users With Violations**: {}",
        state.banned_phrase_users.len()
    );

    match &state.guild_slowmode {
        Some(config) => {
            let _ = writeln!(result, "**Slowmode**: {}", format_slowmode(config));
        }
        None => {
            let _ = writeln!(result, "**Slowmode**: off");
        }
    }
    for (channel_id, config) in &state.channel_slowmode {
        let _ = writeln!(result, "- <#{channel_id}>: {}", format_slowmode(config));
    }

    if state.spam_config.is_active() {
        let flagged = state
            .spam_users
            .values()
            .filter(|user| user.potential_kick)
            .count();
        let _ = writeln!(result, "**Spam Detection**: {flagged} users awaiting votes");
        for (check_type, threshold) in &state.spam_config.thresholds {
            let _ = writeln!(
                result,
                "- {check_type}: flag at {}, {} votes to remove",
                threshold.limit, threshold.votes_required
            );
        }
    } else {
        let _ = writeln!(result, "**Spam Detection**: off");
    }

    if !state.punishment_rules.is_empty() {
        let _ = writeln!(result, "\n### Punishment Rules");
        for rule in state.punishment_rules.values() {
            let _ = writeln!(result, "- {}", format_rule(rule));
        }
    }

    if !state.pending_punishments.is_empty() {
        let mut pending: Vec<_> = state.pending_punishments.values().collect();
        pending.sort_by_key(|pending| pending.expires_at);
        let _ = writeln!(result, "\n### Timed Punishments");
        for pending in pending {
            let _ = writeln!(result, "{}", format_pending(pending, now));
        }
    }

    result
}

/// Create an embed summarizing a guild's moderation state
#[must_use]
pub fn create_status_embed(state: &GuildModerationState, paused: bool) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("Moderation Status")
        .description(if paused {
            "Enforcement is paused"
        } else {
            "Enforcement is active"
        })
        .field(
            "Banned Phrases",
            format!(
                "{} strings, {} patterns",
                state.banned_strings.len(),
                state.banned_regex.len()
            ),
            true,
        )
        .field(
            "Slowmode",
            state
                .guild_slowmode
                .as_ref()
                .map_or_else(|| "off".to_string(), format_slowmode),
            true,
        )
        .field(
            "Timed Punishments",
            format!("{} pending", state.pending_punishments.len()),
            true,
        )
        .timestamp(serenity::Timestamp::now());

    if !state.punishment_rules.is_empty() {
        let rules = state
            .punishment_rules
            .values()
            .map(format_rule)
            .collect::<Vec<_>>()
            .join("\n");
        embed = embed.field("Punishment Rules", rules, false);
    }

    embed
}
