//! Per-guild moderation state
//!
//! [`GuildModerationState`] holds every piece of mutable enforcement data for
//! one guild. It is only ever touched while holding that guild's lock in the
//! [`ModerationStore`](crate::moderation::ModerationStore).

use crate::moderation::{
    ModerationError, ModerationResult, PendingPunishment, Punishment, PunishmentRule,
    PunishmentType, pending_key,
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A case-insensitive banned regular expression
#[derive(Debug, Clone)]
pub struct BannedPattern(Regex);

impl BannedPattern {
    /// Compile a case-insensitive pattern
    ///
    /// # Errors
    /// Returns the regex error if the pattern does not compile.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(Self)
    }

    /// The pattern source
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether the pattern matches anywhere in `content`
    #[must_use]
    pub fn is_match(&self, content: &str) -> bool {
        self.0.is_match(content)
    }
}

impl PartialEq for BannedPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for BannedPattern {}

impl Serialize for BannedPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BannedPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::new(&source).map_err(serde::de::Error::custom)
    }
}

/// Cumulative banned-phrase violations, one counter per punishment category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedPhraseUserState {
    pub role_violation_count: u32,
    pub kick_violation_count: u32,
    pub ban_violation_count: u32,
}

impl BannedPhraseUserState {
    /// Count one matched-and-deleted message in every category
    pub fn record_violation(&mut self) {
        self.role_violation_count += 1;
        self.kick_violation_count += 1;
        self.ban_violation_count += 1;
    }

    /// Counter tracked for rules of the given type
    #[must_use]
    pub fn count_for(&self, punishment_type: PunishmentType) -> u32 {
        match punishment_type {
            PunishmentType::Kick => self.kick_violation_count,
            PunishmentType::Ban => self.ban_violation_count,
            PunishmentType::None
            | PunishmentType::RoleGrant
            | PunishmentType::Mute
            | PunishmentType::Deafen => self.role_violation_count,
        }
    }
}

/// Kinds of spam signal, each tracked by its own counter
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum SpamCheckType {
    /// Many messages
    #[display("Message Burst")]
    MessageBurst,
    /// Many user mentions
    #[display("Mention Burst")]
    MentionBurst,
    /// Many links
    #[display("Link Burst")]
    LinkBurst,
    /// Many very long messages
    #[display("Long Message Burst")]
    LongMessageBurst,
}

impl SpamCheckType {
    /// All check types in evaluation order
    pub const ALL: [Self; 4] = [
        Self::MessageBurst,
        Self::MentionBurst,
        Self::LinkBurst,
        Self::LongMessageBurst,
    ];
}

/// Threshold configuration for one spam check type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamThreshold {
    /// Counter value that flags the user
    pub limit: u32,
    /// Distinct votes needed to remove a flagged user
    pub votes_required: u32,
}

/// Spam detection configuration for a guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamConfig {
    /// Character count at which a message counts toward `LongMessageBurst`
    pub long_message_length: usize,
    /// Configured thresholds; unconfigured types are not tracked
    pub thresholds: BTreeMap<SpamCheckType, SpamThreshold>,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            long_message_length: 1000,
            thresholds: BTreeMap::new(),
        }
    }
}

impl SpamConfig {
    /// Whether any spam check is configured
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.thresholds.is_empty()
    }
}

/// Vote-to-kick progress for one user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpamUserState {
    pub per_type_counts: HashMap<SpamCheckType, u32>,
    pub votes_required: u32,
    pub votes_received: u32,
    pub voters_already_counted: HashSet<u64>,
    pub potential_kick: bool,
    pub already_kicked: bool,
    /// A kick or ban is in flight for this user
    pub resolving: bool,
}

/// Slowmode settings, guild-wide or for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowmodeConfig {
    /// Messages allowed per window
    pub base_messages: u32,
    /// Window length in seconds
    pub window_seconds: u32,
    /// Members holding any of these roles are never throttled
    pub immune_roles: BTreeSet<u64>,
}

impl SlowmodeConfig {
    /// Whether a member with `roles` is immune
    #[must_use]
    pub fn is_immune(&self, roles: &[u64]) -> bool {
        roles.iter().any(|role| self.immune_roles.contains(role))
    }

    /// Fresh per-user state for this configuration
    #[must_use]
    pub fn user_state(&self) -> SlowmodeUserState {
        SlowmodeUserState {
            messages_left: self.base_messages,
            base_messages: self.base_messages,
            window_seconds: self.window_seconds,
            window_timer_active: false,
            window_ends_at: None,
        }
    }
}

/// Message allowance of one throttled user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowmodeUserState {
    pub messages_left: u32,
    pub base_messages: u32,
    pub window_seconds: u32,
    pub window_timer_active: bool,
    /// When the running window elapses
    pub window_ends_at: Option<DateTime<Utc>>,
}

/// All mutable enforcement data of one guild
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildModerationState {
    pub guild_id: u64,
    /// Lowercased literal phrases
    pub banned_strings: BTreeSet<String>,
    pub banned_regex: Vec<BannedPattern>,
    /// Rules keyed by trigger count
    pub punishment_rules: BTreeMap<u32, PunishmentRule>,
    pub banned_phrase_users: HashMap<u64, BannedPhraseUserState>,
    pub spam_config: SpamConfig,
    #[serde(skip)]
    pub spam_users: HashMap<u64, SpamUserState>,
    pub guild_slowmode: Option<SlowmodeConfig>,
    pub channel_slowmode: HashMap<u64, SlowmodeConfig>,
    pub slowmode_users: HashMap<u64, SlowmodeUserState>,
    /// channel_id -> user_id -> state
    pub channel_slowmode_users: HashMap<u64, HashMap<u64, SlowmodeUserState>>,
    /// Keyed by `pending_key(user_id, punishment)`
    pub pending_punishments: BTreeMap<String, PendingPunishment>,
}

impl GuildModerationState {
    /// Create an empty state for a guild
    #[must_use]
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }

    /// Whether any banned string or pattern is configured
    #[must_use]
    pub fn has_banned_phrases(&self) -> bool {
        !self.banned_strings.is_empty() || !self.banned_regex.is_empty()
    }

    /// Add a literal banned phrase. Returns false if it was already present.
    ///
    /// # Errors
    /// Returns a validation error for a blank phrase.
    pub fn add_banned_string(&mut self, phrase: &str) -> ModerationResult<bool> {
        let phrase = phrase.trim().to_lowercase();
        if phrase.is_empty() {
            return Err(ModerationError::ValidationFailed(
                "Banned phrase cannot be empty".to_string(),
            ));
        }
        Ok(self.banned_strings.insert(phrase))
    }

    /// Remove a literal banned phrase. Returns false if it was not present.
    pub fn remove_banned_string(&mut self, phrase: &str) -> bool {
        self.banned_strings.remove(&phrase.trim().to_lowercase())
    }

    /// Add a banned regular expression. Returns false if it was already present.
    ///
    /// # Errors
    /// Returns `InvalidPattern` if the pattern does not compile.
    pub fn add_banned_pattern(&mut self, pattern: &str) -> ModerationResult<bool> {
        let pattern = BannedPattern::new(pattern)?;
        if self.banned_regex.contains(&pattern) {
            return Ok(false);
        }
        self.banned_regex.push(pattern);
        Ok(true)
    }

    /// Remove a banned regular expression by source. Returns false if it was not present.
    pub fn remove_banned_pattern(&mut self, pattern: &str) -> bool {
        let before = self.banned_regex.len();
        self.banned_regex.retain(|existing| existing.as_str() != pattern);
        self.banned_regex.len() != before
    }

    /// Add a punishment rule
    ///
    /// At most one rule per trigger count and one rule per punishment type.
    ///
    /// # Errors
    /// Returns a validation error and leaves the rules untouched if the rule
    /// conflicts with an existing one or is malformed.
    pub fn set_punishment_rule(&mut self, rule: PunishmentRule) -> ModerationResult<()> {
        if rule.trigger_count == 0 {
            return Err(ModerationError::ValidationFailed(
                "Trigger count must be at least 1".to_string(),
            ));
        }
        if !rule.punishment.is_rule_type() {
            return Err(ModerationError::UnsupportedRuleType(
                rule.punishment.get_type(),
            ));
        }
        if let Punishment::RoleGrant { role_id: 0 } = rule.punishment {
            return Err(ModerationError::InvalidRole(0));
        }
        if self.punishment_rules.contains_key(&rule.trigger_count) {
            return Err(ModerationError::DuplicateTriggerCount(rule.trigger_count));
        }
        let punishment_type = rule.punishment.get_type();
        if self
            .punishment_rules
            .values()
            .any(|existing| existing.punishment.get_type() == punishment_type)
        {
            return Err(ModerationError::DuplicatePunishmentType(punishment_type));
        }

        self.punishment_rules.insert(rule.trigger_count, rule);
        Ok(())
    }

    /// Remove the rule for a trigger count
    ///
    /// # Errors
    /// Returns `RuleNotFound` if no rule has this trigger count.
    pub fn remove_punishment_rule(&mut self, trigger_count: u32) -> ModerationResult<PunishmentRule> {
        self.punishment_rules
            .remove(&trigger_count)
            .ok_or(ModerationError::RuleNotFound(trigger_count))
    }

    /// Reset a user's banned-phrase counters. Returns false if the user had none.
    pub fn reset_violations(&mut self, user_id: u64) -> bool {
        self.banned_phrase_users.remove(&user_id).is_some()
    }

    /// Queue a pending punishment, replacing any entry with the same key
    pub fn insert_pending(&mut self, pending: PendingPunishment) -> Option<PendingPunishment> {
        self.pending_punishments.insert(pending.key(), pending)
    }

    /// Remove and return the pending reversal of `punishment` for a user
    pub fn take_pending(
        &mut self,
        user_id: u64,
        punishment: &Punishment,
    ) -> Option<PendingPunishment> {
        self.pending_punishments
            .remove(&pending_key(user_id, punishment))
    }

    /// Remove and return every pending punishment due at `now`
    pub fn take_due_pending(&mut self, now: DateTime<Utc>) -> Vec<PendingPunishment> {
        let due: Vec<String> = self
            .pending_punishments
            .iter()
            .filter(|(_, pending)| pending.is_due(now))
            .map(|(key, _)| key.clone())
            .collect();

        due.iter()
            .filter_map(|key| self.pending_punishments.remove(key))
            .collect()
    }
}
