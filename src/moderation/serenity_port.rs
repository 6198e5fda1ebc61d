//! [`ActionPort`] over the serenity HTTP client

use crate::moderation::{ActionError, ActionPort, ActionResult};
use poise::serenity_prelude::{
    ChannelId, GuildId, Http, Member, MessageId, PartialGuild, RoleId, UserId,
    builder::EditMember,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Audit log reason for automatic kicks
const KICK_REASON: &str = "Removed by automatic moderation";
/// Audit log reason for automatic bans
const BAN_REASON: &str = "Banned by automatic moderation";
/// Audit log reason for role grants and removals
const ROLE_REASON: &str = "Automatic moderation punishment";

/// Issues moderation actions through Discord's HTTP API
#[derive(Clone)]
pub struct SerenityActionPort {
    http: Arc<Http>,
}

impl SerenityActionPort {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

/// Helper function to get guild and member
async fn get_guild_and_member(
    http: &Http,
    guild_id: GuildId,
    user_id: UserId,
) -> ActionResult<(PartialGuild, Member)> {
    let guild = guild_id.to_partial_guild(http).await.map_err(|e| {
        ActionError::GuildOrMemberNotFound(format!("Failed to get guild {guild_id}: {e}"))
    })?;

    let member = guild.member(http, user_id).await.map_err(|e| {
        ActionError::GuildOrMemberNotFound(format!(
            "Failed to get member {user_id} in guild {guild_id}: {e}"
        ))
    })?;

    Ok((guild, member))
}

/// Highest position among a member's roles, 0 for none
fn top_role_position(guild: &PartialGuild, member: &Member) -> i64 {
    member
        .roles
        .iter()
        .filter_map(|role_id| guild.roles.get(role_id))
        .map(|role| i64::from(role.position))
        .max()
        .unwrap_or(0)
}

impl SerenityActionPort {
    async fn edit_voice(
        &self,
        guild_id: u64,
        user_id: u64,
        builder: EditMember<'_>,
        lifting: bool,
    ) -> ActionResult<()> {
        let http = self.http.as_ref();
        match get_guild_and_member(http, GuildId::new(guild_id), UserId::new(user_id)).await {
            Ok((_, mut member)) => {
                member.edit(http, builder).await?;
                Ok(())
            }
            // The user may have left; nothing left to lift
            Err(e) if lifting => {
                warn!("User {user_id} not found in guild {guild_id} for voice reversal: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl ActionPort for SerenityActionPort {
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> ActionResult<()> {
        ChannelId::new(channel_id)
            .delete_message(self.http.as_ref(), MessageId::new(message_id))
            .await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, content: &str) -> ActionResult<()> {
        ChannelId::new(channel_id)
            .say(self.http.as_ref(), content)
            .await?;
        Ok(())
    }

    async fn kick_user(&self, guild_id: u64, user_id: u64) -> ActionResult<()> {
        info!("Kicking user {user_id} from guild {guild_id}");
        GuildId::new(guild_id)
            .kick_with_reason(self.http.as_ref(), UserId::new(user_id), KICK_REASON)
            .await?;
        info!("Successfully kicked user {user_id}");
        Ok(())
    }

    async fn ban_user(&self, guild_id: u64, user_id: u64, prune_days: u8) -> ActionResult<()> {
        info!("Banning user {user_id} in guild {guild_id}");
        GuildId::new(guild_id)
            .ban_with_reason(self.http.as_ref(), UserId::new(user_id), prune_days, BAN_REASON)
            .await?;
        info!("Successfully banned user {user_id}");
        Ok(())
    }

    async fn unban_user(&self, guild_id: u64, user_id: u64) -> ActionResult<()> {
        info!("Unbanning user {user_id} in guild {guild_id}");
        GuildId::new(guild_id)
            .unban(self.http.as_ref(), UserId::new(user_id))
            .await?;
        info!("Successfully unbanned user {user_id}");
        Ok(())
    }

    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> ActionResult<()> {
        self.http
            .add_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(ROLE_REASON),
            )
            .await?;
        Ok(())
    }

    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> ActionResult<()> {
        self.http
            .remove_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(ROLE_REASON),
            )
            .await?;
        Ok(())
    }

    async fn set_mute(&self, guild_id: u64, user_id: u64, muted: bool) -> ActionResult<()> {
        self.edit_voice(guild_id, user_id, EditMember::new().mute(muted), !muted)
            .await
    }

    async fn set_deafen(&self, guild_id: u64, user_id: u64, deafened: bool) -> ActionResult<()> {
        self.edit_voice(guild_id, user_id, EditMember::new().deafen(deafened), !deafened)
            .await
    }

    async fn get_role_position(&self, guild_id: u64, role_id: u64) -> ActionResult<i64> {
        let guild_id = GuildId::new(guild_id);
        let guild = guild_id.to_partial_guild(self.http.as_ref()).await?;
        guild
            .roles
            .get(&RoleId::new(role_id))
            .map(|role| i64::from(role.position))
            .ok_or_else(|| {
                ActionError::GuildOrMemberNotFound(format!(
                    "Role {role_id} not found in guild {guild_id}"
                ))
            })
    }

    async fn get_user_top_role_position(&self, guild_id: u64, user_id: u64) -> ActionResult<i64> {
        let (guild, member) = get_guild_and_member(
            self.http.as_ref(),
            GuildId::new(guild_id),
            UserId::new(user_id),
        )
        .await?;
        Ok(top_role_position(&guild, &member))
    }
}
