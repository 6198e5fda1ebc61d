//! Moderation pipeline
//!
//! The only entry point the gateway and command layers use. Each message runs
//! through slowmode, then banned phrases, then spam vote counting and spam
//! accumulation. Decisions are made under the guild lock; outbound calls are
//! made after it is released and are bounded by the action timeout.

use crate::MODERATION_TARGET;
use crate::moderation::{
    ActionError, ActionPort, ActionResult, BannedPhraseUserState, GuildModerationState,
    ModerationError, ModerationPersistence, ModerationResult, ModerationStore, PendingPunishment,
    Punishment, PunishmentRule, Resolution, SlowmodeConfig, SlowmodeVerdict,
    SpamConfig, SpamFlag, SpamUserState, Violation, banned_phrase, punishment, slowmode, spam,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A message as seen by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEvent {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub author_id: u64,
    pub author_is_bot: bool,
    pub author_roles: Vec<u64>,
    pub content: String,
    pub mentioned_users: Vec<u64>,
}

/// A member joining a guild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserJoinEvent {
    pub guild_id: u64,
    pub user_id: u64,
    pub is_bot: bool,
    pub roles: Vec<u64>,
}

/// What the pipeline did with one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageReport {
    /// Not processed (bot author, paused, or guild not loaded)
    pub skipped: bool,
    /// Dropped by slowmode
    pub throttled: bool,
    /// The message was deleted
    pub deleted: bool,
    /// Banned-phrase violation, if the message matched
    pub violation: Option<Violation>,
    /// Punishment issued by a fired rule
    pub punishment_applied: Option<Punishment>,
    /// The author was flagged for vote-to-kick
    pub spam_flag: Option<SpamFlag>,
    /// Vote-to-kick resolutions this message completed and executed
    pub resolutions: Vec<Resolution>,
}

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Pending punishments removed and reversed
    pub reversed: usize,
    /// Reversals that failed after removal
    pub failed: usize,
    /// Slowmode windows refilled
    pub slowmode_resets: usize,
}

/// Runtime settings of the pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// This bot's user ID, used for the permission check
    pub bot_user_id: u64,
    /// Upper bound for every outbound call
    pub action_timeout: Duration,
    /// Days of messages deleted when banning
    pub ban_prune_days: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bot_user_id: 0,
            action_timeout: Duration::from_secs(10),
            ban_prune_days: 0,
        }
    }
}

/// Orchestrates slowmode, banned phrases, spam detection and timed punishments
#[derive(Clone)]
pub struct ModerationPipeline {
    store: ModerationStore,
    port: Arc<dyn ActionPort>,
    persistence: Arc<dyn ModerationPersistence>,
    settings: PipelineSettings,
}

impl std::fmt::Debug for ModerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationPipeline")
            .field("guilds", &self.store.len())
            .field("paused", &self.store.is_paused())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ModerationPipeline {
    pub fn new(
        store: ModerationStore,
        port: Arc<dyn ActionPort>,
        persistence: Arc<dyn ModerationPersistence>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            port,
            persistence,
            settings,
        }
    }

    /// The underlying store
    pub fn store(&self) -> &ModerationStore {
        &self.store
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    /// Load a guild's saved state, or start it empty
    ///
    /// # Errors
    /// Returns a persistence error if saved state exists but can't be read.
    pub async fn load_guild(&self, guild_id: u64) -> ModerationResult<()> {
        if self.store.contains(guild_id) {
            return Ok(());
        }
        let state = self
            .persistence
            .load_guild(guild_id)
            .await?
            .unwrap_or_else(|| GuildModerationState::new(guild_id));
        self.store.get_or_insert(guild_id, state);
        info!(target: MODERATION_TARGET, guild_id, "Guild moderation state loaded");
        Ok(())
    }

    /// Save and drop a guild's state. Returns false if it wasn't loaded.
    ///
    /// # Errors
    /// Returns a persistence error if the final save fails. The state is
    /// dropped either way.
    pub async fn unload_guild(&self, guild_id: u64) -> ModerationResult<bool> {
        let Some(handle) = self.store.remove(guild_id) else {
            return Ok(false);
        };
        let save_lock = self.store.save_lock(guild_id);
        let _saving = save_lock.lock().await;
        let snapshot = handle.lock().await.clone();
        self.persistence.save_guild(guild_id, &snapshot).await?;
        info!(target: MODERATION_TARGET, guild_id, "Guild moderation state unloaded");
        Ok(true)
    }

    /// Pause or resume enforcement everywhere
    pub fn set_paused(&self, paused: bool) {
        self.store.set_paused(paused);
        info!(target: MODERATION_TARGET, paused, "Enforcement pause changed");
    }

    pub fn is_paused(&self) -> bool {
        self.store.is_paused()
    }

    /// Process a message at the current time
    pub async fn process_message(&self, event: &MessageEvent) -> MessageReport {
        self.process_message_at(event, Utc::now()).await
    }

    /// Process a message as if it arrived at `now`
    ///
    /// Never fails: outbound errors are logged and reflected in the report.
    pub async fn process_message_at(
        &self,
        event: &MessageEvent,
        now: DateTime<Utc>,
    ) -> MessageReport {
        let mut report = MessageReport::default();

        // Includes this bot, so its own notices never count as votes
        if event.author_is_bot || self.store.is_paused() {
            report.skipped = true;
            return report;
        }
        let Some(handle) = self.store.guild(event.guild_id) else {
            debug!(guild_id = event.guild_id, "Message in unloaded guild ignored");
            report.skipped = true;
            return report;
        };

        let (violation, flag, resolutions) = {
            let mut state = handle.lock().await;

            if slowmode::is_active(&state)
                && slowmode::on_message(
                    &mut state,
                    event.channel_id,
                    event.author_id,
                    &event.author_roles,
                    now,
                ) == SlowmodeVerdict::Drop
            {
                report.throttled = true;
                None
            } else {
                let violation = if state.has_banned_phrases() {
                    banned_phrase::evaluate(&mut state, event.author_id, &event.content)
                } else {
                    None
                };
                let resolutions =
                    spam::count_votes(&mut state, event.author_id, &event.mentioned_users);
                let flag = spam::accumulate(
                    &mut state,
                    event.author_id,
                    &event.content,
                    &event.mentioned_users,
                );
                Some((violation, flag, resolutions))
            }
        }
        .unwrap_or_default();

        if report.throttled {
            debug!(
                target: MODERATION_TARGET,
                guild_id = event.guild_id,
                user_id = event.author_id,
                "Message dropped by slowmode"
            );
            report.deleted = self.delete(event).await;
            return report;
        }

        if let Some(violation) = violation {
            info!(
                target: MODERATION_TARGET,
                guild_id = event.guild_id,
                user_id = event.author_id,
                matched = %violation.matched,
                count = violation.violation_count(),
                "Banned phrase violation"
            );
            report.deleted = self.delete(event).await;
            if let Some(rule) = &violation.rule {
                if self
                    .apply_rule(event.guild_id, event.author_id, rule, now)
                    .await
                {
                    report.punishment_applied = Some(rule.punishment.clone());
                }
            }
            report.violation = Some(violation);
            self.persist(event.guild_id).await;
        }

        for resolution in resolutions {
            if self.resolve(event.guild_id, event.channel_id, &resolution).await {
                report.resolutions.push(resolution);
            }
        }

        if let Some(flag) = &flag {
            if let Err(e) = self
                .timed(self.port.send_message(event.channel_id, &flag.notice()))
                .await
            {
                warn!(
                    guild_id = event.guild_id,
                    user_id = flag.user_id,
                    "Failed to post vote-to-kick notice: {e}"
                );
            }
        }
        report.spam_flag = flag;

        report
    }

    /// Register a joining member into active slowmode. Returns how many scopes they joined.
    pub async fn process_user_join(&self, event: &UserJoinEvent) -> usize {
        if event.is_bot {
            return 0;
        }
        let Some(handle) = self.store.guild(event.guild_id) else {
            return 0;
        };
        let mut state = handle.lock().await;
        slowmode::register_member(&mut state, event.user_id, &event.roles)
    }

    /// Reverse due punishments and refill elapsed slowmode windows
    ///
    /// Due entries are removed and saved before reversal, so a failed or
    /// interrupted reversal is never retried.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        for (guild_id, handle) in self.store.handles() {
            let due = {
                let mut state = handle.lock().await;
                report.slowmode_resets += slowmode::reset_elapsed_windows(&mut state, now);
                state.take_due_pending(now)
            };
            if due.is_empty() {
                continue;
            }
            self.persist(guild_id).await;

            for pending in due {
                match self.reverse(&pending).await {
                    Ok(()) => {
                        report.reversed += 1;
                        info!(
                            target: MODERATION_TARGET,
                            guild_id,
                            user_id = pending.user_id,
                            punishment = %pending.punishment.get_type(),
                            "Timed punishment expired and was reversed"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!(
                            target: MODERATION_TARGET,
                            guild_id,
                            user_id = pending.user_id,
                            punishment = %pending.punishment.get_type(),
                            "Failed to reverse expired punishment {}: {e}",
                            pending.id
                        );
                    }
                }
            }
        }

        report
    }

    /// Clear every user's spam progress in every guild. Returns the number of users cleared.
    pub async fn sweep_spam_state(&self) -> usize {
        let mut cleared = 0;
        for (_, handle) in self.store.handles() {
            cleared += spam::clear(&mut *handle.lock().await);
        }
        info!(target: MODERATION_TARGET, cleared, "Spam state swept");
        cleared
    }

    /// Add a literal banned phrase. Returns false if it already existed.
    ///
    /// # Errors
    /// Fails for an unloaded guild or a blank phrase.
    pub async fn add_banned_phrase(&self, guild_id: u64, phrase: &str) -> ModerationResult<bool> {
        self.mutate(guild_id, |state| state.add_banned_string(phrase))
            .await
    }

    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn remove_banned_phrase(&self, guild_id: u64, phrase: &str) -> ModerationResult<bool> {
        self.mutate(guild_id, |state| Ok(state.remove_banned_string(phrase)))
            .await
    }

    /// Add a banned regular expression. Returns false if it already existed.
    ///
    /// # Errors
    /// Fails for an unloaded guild or a pattern that doesn't compile.
    pub async fn add_banned_pattern(&self, guild_id: u64, pattern: &str) -> ModerationResult<bool> {
        self.mutate(guild_id, |state| state.add_banned_pattern(pattern))
            .await
    }

    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn remove_banned_pattern(
        &self,
        guild_id: u64,
        pattern: &str,
    ) -> ModerationResult<bool> {
        self.mutate(guild_id, |state| Ok(state.remove_banned_pattern(pattern)))
            .await
    }

    /// Copy of a guild's full state
    ///
    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn guild_snapshot(&self, guild_id: u64) -> ModerationResult<GuildModerationState> {
        self.read(guild_id, GuildModerationState::clone).await
    }

    /// Banned strings and pattern sources of a guild
    ///
    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn banned_phrases(&self, guild_id: u64) -> ModerationResult<(Vec<String>, Vec<String>)> {
        self.read(guild_id, |state| {
            (
                state.banned_strings.iter().cloned().collect(),
                state
                    .banned_regex
                    .iter()
                    .map(|pattern| pattern.as_str().to_string())
                    .collect(),
            )
        })
        .await
    }

    /// Add a punishment rule
    ///
    /// A `RoleGrant` role must exist in the guild.
    ///
    /// # Errors
    /// Returns a validation error and changes nothing if the rule conflicts
    /// with an existing one or references a missing role.
    pub async fn set_punishment_rule(
        &self,
        guild_id: u64,
        rule: PunishmentRule,
    ) -> ModerationResult<()> {
        self.store.require(guild_id)?;
        self.validate_role(guild_id, &rule.punishment).await?;
        self.mutate(guild_id, |state| state.set_punishment_rule(rule.clone()))
            .await?;
        info!(
            target: MODERATION_TARGET,
            guild_id,
            trigger_count = rule.trigger_count,
            punishment = %rule.punishment.get_type(),
            "Punishment rule added"
        );
        Ok(())
    }

    /// Remove the rule for a trigger count
    ///
    /// # Errors
    /// Returns `RuleNotFound` if no rule has that trigger count.
    pub async fn remove_punishment_rule(
        &self,
        guild_id: u64,
        trigger_count: u32,
    ) -> ModerationResult<PunishmentRule> {
        self.mutate(guild_id, |state| state.remove_punishment_rule(trigger_count))
            .await
    }

    /// Rules ordered by trigger count
    ///
    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn punishment_rules(&self, guild_id: u64) -> ModerationResult<Vec<PunishmentRule>> {
        self.read(guild_id, |state| {
            state.punishment_rules.values().cloned().collect()
        })
        .await
    }

    /// Enable slowmode guild-wide or for one channel
    ///
    /// `members` is the current membership as `(user_id, roles)`. Returns the
    /// number of members now throttled.
    ///
    /// # Errors
    /// Fails for an unloaded guild or a zero allowance or window.
    pub async fn enable_slowmode(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        config: SlowmodeConfig,
        members: &[(u64, Vec<u64>)],
    ) -> ModerationResult<usize> {
        let throttled = self
            .mutate(guild_id, |state| {
                slowmode::enable(state, channel_id, config, members)
            })
            .await?;
        info!(
            target: MODERATION_TARGET,
            guild_id,
            channel_id = ?channel_id,
            throttled,
            "Slowmode enabled"
        );
        Ok(throttled)
    }

    /// Disable slowmode. Returns false if it wasn't active in that scope.
    ///
    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn disable_slowmode(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
    ) -> ModerationResult<bool> {
        self.mutate(guild_id, |state| Ok(slowmode::disable(state, channel_id)))
            .await
    }

    /// Replace the guild's spam thresholds
    ///
    /// # Errors
    /// Fails for an unloaded guild or a zero limit or vote requirement.
    pub async fn configure_spam_thresholds(
        &self,
        guild_id: u64,
        config: SpamConfig,
    ) -> ModerationResult<()> {
        self.mutate(guild_id, |state| spam::configure(state, config))
            .await
    }

    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn spam_config(&self, guild_id: u64) -> ModerationResult<SpamConfig> {
        self.read(guild_id, |state| state.spam_config.clone()).await
    }

    /// Vote-to-kick progress of a user
    ///
    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn spam_state(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> ModerationResult<Option<SpamUserState>> {
        self.read(guild_id, |state| state.spam_users.get(&user_id).cloned())
            .await
    }

    /// Reset a user's banned-phrase counters. Returns false if they had none.
    ///
    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn reset_user_violation_count(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> ModerationResult<bool> {
        self.mutate(guild_id, |state| Ok(state.reset_violations(user_id)))
            .await
    }

    /// Banned-phrase counters of a user
    ///
    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn violation_count(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> ModerationResult<BannedPhraseUserState> {
        self.read(guild_id, |state| {
            state
                .banned_phrase_users
                .get(&user_id)
                .copied()
                .unwrap_or_default()
        })
        .await
    }

    /// Apply a punishment now and schedule its reversal
    ///
    /// With `duration_minutes == 0` the punishment is permanent and nothing
    /// is scheduled. Issuing the same punishment again for the same user
    /// replaces the previous expiry; a grant of another role is tracked
    /// separately.
    ///
    /// # Errors
    /// Fails for `None` or `Kick`, a missing role, a target the bot doesn't
    /// outrank, or a failed action.
    pub async fn issue_timed_punishment(
        &self,
        guild_id: u64,
        user_id: u64,
        punishment: Punishment,
        duration_minutes: u32,
        now: DateTime<Utc>,
    ) -> ModerationResult<Option<PendingPunishment>> {
        self.store.require(guild_id)?;
        if !punishment.is_reversible() {
            return Err(ModerationError::ValidationFailed(format!(
                "{} can't be issued as a timed punishment",
                punishment.get_type()
            )));
        }
        self.validate_role(guild_id, &punishment).await?;
        if punishment.requires_outranking() {
            self.check_outranks(guild_id, user_id).await?;
        }

        self.timed(punishment::apply(
            self.port.as_ref(),
            guild_id,
            user_id,
            &punishment,
            self.settings.ban_prune_days,
        ))
        .await?;
        info!(
            target: MODERATION_TARGET,
            guild_id,
            user_id,
            punishment = %punishment.get_type(),
            duration_minutes,
            "Punishment issued"
        );

        if duration_minutes == 0 {
            return Ok(None);
        }
        let pending = PendingPunishment::new(guild_id, user_id, punishment, duration_minutes, now);
        self.mutate(guild_id, |state| {
            state.insert_pending(pending.clone());
            Ok(())
        })
        .await?;
        Ok(Some(pending))
    }

    /// Remove a pending punishment and reverse it now
    ///
    /// Role grants are matched by role, other punishments by type.
    ///
    /// # Errors
    /// Returns `PendingNotFound` if there is nothing to revoke, or the action
    /// error if the reversal fails (the entry stays removed).
    pub async fn revoke_pending_punishment(
        &self,
        guild_id: u64,
        user_id: u64,
        punishment: &Punishment,
    ) -> ModerationResult<PendingPunishment> {
        let punishment_type = punishment.get_type();
        let pending = self
            .mutate(guild_id, |state| {
                state
                    .take_pending(user_id, punishment)
                    .ok_or(ModerationError::PendingNotFound {
                        user_id,
                        punishment_type,
                    })
            })
            .await?;
        self.reverse(&pending).await?;
        info!(
            target: MODERATION_TARGET,
            guild_id,
            user_id,
            punishment = %punishment_type,
            "Pending punishment revoked"
        );
        Ok(pending)
    }

    /// Pending punishments ordered by expiry
    ///
    /// # Errors
    /// Fails for an unloaded guild.
    pub async fn list_pending_punishments(
        &self,
        guild_id: u64,
    ) -> ModerationResult<Vec<PendingPunishment>> {
        let mut pending = self
            .read(guild_id, |state| {
                state.pending_punishments.values().cloned().collect::<Vec<_>>()
            })
            .await?;
        pending.sort_by_key(|pending| pending.expires_at);
        Ok(pending)
    }

    async fn timed<T>(&self, call: impl Future<Output = ActionResult<T>>) -> ActionResult<T> {
        let limit = self.settings.action_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ActionError::Timeout(limit))?
    }

    async fn delete(&self, event: &MessageEvent) -> bool {
        match self
            .timed(self.port.delete_message(event.channel_id, event.message_id))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    guild_id = event.guild_id,
                    user_id = event.author_id,
                    "Failed to delete message {}: {e}",
                    event.message_id
                );
                false
            }
        }
    }

    async fn reverse(&self, pending: &PendingPunishment) -> ActionResult<()> {
        self.timed(punishment::reverse(
            self.port.as_ref(),
            pending.guild_id,
            pending.user_id,
            &pending.punishment,
        ))
        .await
    }

    /// Fail with `PermissionDenied` unless the bot's top role is strictly above the target's
    async fn check_outranks(&self, guild_id: u64, user_id: u64) -> ModerationResult<()> {
        let bot = self
            .timed(
                self.port
                    .get_user_top_role_position(guild_id, self.settings.bot_user_id),
            )
            .await?;
        let target = self
            .timed(self.port.get_user_top_role_position(guild_id, user_id))
            .await?;
        if bot > target {
            Ok(())
        } else {
            Err(ModerationError::PermissionDenied { guild_id, user_id })
        }
    }

    async fn validate_role(&self, guild_id: u64, punishment: &Punishment) -> ModerationResult<()> {
        let Punishment::RoleGrant { role_id } = punishment else {
            return Ok(());
        };
        if *role_id == 0 {
            return Err(ModerationError::InvalidRole(0));
        }
        self.timed(self.port.get_role_position(guild_id, *role_id))
            .await
            .map(|_| ())
            .map_err(|e| {
                debug!(guild_id, role_id, "Role lookup failed: {e}");
                ModerationError::InvalidRole(*role_id)
            })
    }

    /// Issue a fired rule's punishment. Returns true if it was applied.
    async fn apply_rule(
        &self,
        guild_id: u64,
        user_id: u64,
        rule: &PunishmentRule,
        now: DateTime<Utc>,
    ) -> bool {
        if rule.punishment.requires_outranking() {
            if let Err(e) = self.check_outranks(guild_id, user_id).await {
                warn!(
                    target: MODERATION_TARGET,
                    guild_id,
                    user_id,
                    trigger_count = rule.trigger_count,
                    "Rule not applied: {e}"
                );
                return false;
            }
        }

        if let Err(e) = self
            .timed(punishment::apply(
                self.port.as_ref(),
                guild_id,
                user_id,
                &rule.punishment,
                self.settings.ban_prune_days,
            ))
            .await
        {
            error!(
                target: MODERATION_TARGET,
                guild_id,
                user_id,
                trigger_count = rule.trigger_count,
                "Failed to apply {}: {e}",
                rule.punishment.get_type()
            );
            return false;
        }

        info!(
            target: MODERATION_TARGET,
            guild_id,
            user_id,
            trigger_count = rule.trigger_count,
            punishment = %rule.punishment.get_type(),
            "Punishment rule fired"
        );

        if !rule.is_permanent() && rule.punishment.is_reversible() {
            if let Some(handle) = self.store.guild(guild_id) {
                handle.lock().await.insert_pending(PendingPunishment::new(
                    guild_id,
                    user_id,
                    rule.punishment.clone(),
                    rule.duration_minutes,
                    now,
                ));
            }
        }
        true
    }

    /// Execute a vote-to-kick resolution. Returns true if the user was removed.
    async fn resolve(&self, guild_id: u64, channel_id: u64, resolution: &Resolution) -> bool {
        let user_id = resolution.user_id;
        let outcome = match self.check_outranks(guild_id, user_id).await {
            Ok(()) => self
                .timed(punishment::apply(
                    self.port.as_ref(),
                    guild_id,
                    user_id,
                    &resolution.punishment,
                    self.settings.ban_prune_days,
                ))
                .await
                .map_err(ModerationError::from),
            Err(e) => Err(e),
        };
        let executed = outcome.is_ok();

        if let Some(handle) = self.store.guild(guild_id) {
            spam::finish_resolution(&mut *handle.lock().await, user_id, executed);
        }

        match outcome {
            Ok(()) => {
                info!(
                    target: MODERATION_TARGET,
                    guild_id,
                    user_id,
                    punishment = %resolution.punishment.get_type(),
                    "Vote-to-kick resolved"
                );
                let notice = format!(
                    "<@{user_id}> was removed by vote ({}).",
                    resolution.punishment.get_type()
                );
                if let Err(e) = self.timed(self.port.send_message(channel_id, &notice)).await {
                    debug!(guild_id, "Failed to announce vote-to-kick: {e}");
                }
            }
            Err(e) => warn!(
                target: MODERATION_TARGET,
                guild_id,
                user_id,
                "Vote-to-kick not executed: {e}"
            ),
        }
        executed
    }

    async fn read<T>(
        &self,
        guild_id: u64,
        f: impl FnOnce(&GuildModerationState) -> T,
    ) -> ModerationResult<T> {
        let handle = self.store.require(guild_id)?;
        let state = handle.lock().await;
        Ok(f(&state))
    }

    /// Run `f` under the guild lock and save the guild if it succeeded
    async fn mutate<T>(
        &self,
        guild_id: u64,
        f: impl FnOnce(&mut GuildModerationState) -> ModerationResult<T>,
    ) -> ModerationResult<T> {
        let handle = self.store.require(guild_id)?;
        let result = f(&mut *handle.lock().await)?;
        self.persist(guild_id).await;
        Ok(result)
    }

    /// Save a snapshot of the guild, logging failures
    ///
    /// The save lock is taken before the snapshot, so a later snapshot is
    /// never overwritten by an earlier one.
    async fn persist(&self, guild_id: u64) {
        let Some(handle) = self.store.guild(guild_id) else {
            return;
        };
        let save_lock = self.store.save_lock(guild_id);
        let _saving = save_lock.lock().await;
        let snapshot = handle.lock().await.clone();
        if let Err(e) = self.persistence.save_guild(guild_id, &snapshot).await {
            error!(guild_id, "Failed to save moderation state: {e}");
        }
    }
}
