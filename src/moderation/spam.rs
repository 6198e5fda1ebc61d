//! Spam detection with peer vote-to-kick
//!
//! Per user: `Clean -> Accumulating -> PotentialKick -> Resolved`.
//! Spam signals feed independent per-type counters. When one reaches its
//! limit the user is flagged and other members vote by mentioning them. Once
//! enough distinct members have voted the user is kicked, or banned if they
//! were already kicked since the last hourly sweep.

use crate::moderation::{
    GuildModerationState, ModerationError, ModerationResult, Punishment, SpamCheckType,
    SpamConfig, SpamUserState,
};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// A user who just crossed a spam threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamFlag {
    pub user_id: u64,
    pub check_type: SpamCheckType,
    pub votes_required: u32,
}

impl SpamFlag {
    /// Text of the vote invitation posted in the channel
    #[must_use]
    pub fn notice(&self) -> String {
        format!(
            "⚠️ <@{}> has been flagged for {}. Mention them to vote for their removal ({} vote{} needed).",
            self.user_id,
            self.check_type,
            self.votes_required,
            if self.votes_required == 1 { "" } else { "s" }
        )
    }
}

/// A flagged user who collected enough votes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub user_id: u64,
    /// `Kick` on a first offense, `Ban` when already kicked
    pub punishment: Punishment,
}

/// Signal strength of one message per configured check type
#[must_use]
pub fn signals(
    config: &SpamConfig,
    author_id: u64,
    content: &str,
    mentioned_users: &[u64],
) -> BTreeMap<SpamCheckType, u32> {
    config
        .thresholds
        .keys()
        .filter_map(|check_type| {
            let amount = match check_type {
                SpamCheckType::MessageBurst => 1,
                SpamCheckType::MentionBurst => {
                    let distinct: HashSet<&u64> = mentioned_users
                        .iter()
                        .filter(|user_id| **user_id != author_id)
                        .collect();
                    u32::try_from(distinct.len()).unwrap_or(u32::MAX)
                }
                SpamCheckType::LinkBurst => {
                    let links = content.matches("http://").count() + content.matches("https://").count();
                    u32::try_from(links).unwrap_or(u32::MAX)
                }
                SpamCheckType::LongMessageBurst => {
                    u32::from(content.chars().count() >= config.long_message_length)
                }
            };
            (amount > 0).then_some((*check_type, amount))
        })
        .collect()
}

/// Add a message's signals to its author's counters
///
/// Returns a flag when one counter reaches its limit. Already flagged users
/// are not counted again until they are resolved or swept.
pub fn accumulate(
    state: &mut GuildModerationState,
    author_id: u64,
    content: &str,
    mentioned_users: &[u64],
) -> Option<SpamFlag> {
    if !state.spam_config.is_active() {
        return None;
    }
    let signals = signals(&state.spam_config, author_id, content, mentioned_users);
    if signals.is_empty() {
        return None;
    }

    let thresholds = &state.spam_config.thresholds;
    let user = state.spam_users.entry(author_id).or_default();
    if user.potential_kick {
        return None;
    }

    let mut flag = None;
    for check_type in SpamCheckType::ALL {
        let Some(amount) = signals.get(&check_type) else {
            continue;
        };
        let count = user.per_type_counts.entry(check_type).or_insert(0);
        *count = count.saturating_add(*amount);

        if flag.is_none() {
            if let Some(threshold) = thresholds.get(&check_type) {
                if *count >= threshold.limit {
                    flag = Some(SpamFlag {
                        user_id: author_id,
                        check_type,
                        votes_required: threshold.votes_required,
                    });
                }
            }
        }
    }

    if let Some(flag) = &flag {
        user.potential_kick = true;
        user.votes_required = flag.votes_required;
        user.votes_received = 0;
        user.voters_already_counted.clear();
        info!(
            guild_id = state.guild_id,
            user_id = author_id,
            check_type = %flag.check_type,
            votes_required = flag.votes_required,
            "User flagged for vote-to-kick"
        );
    }
    flag
}

/// Count `voter_id`'s mentions as votes against flagged users
///
/// Self-votes and repeat votes are ignored. Returns the users whose vote
/// count just reached the requirement; they are marked as resolving.
pub fn count_votes(
    state: &mut GuildModerationState,
    voter_id: u64,
    mentioned_users: &[u64],
) -> Vec<Resolution> {
    let mut resolutions = Vec::new();
    let mut seen = HashSet::new();

    for target_id in mentioned_users {
        if *target_id == voter_id || !seen.insert(*target_id) {
            continue;
        }
        let Some(user) = state.spam_users.get_mut(target_id) else {
            continue;
        };
        if !user.potential_kick || user.resolving {
            continue;
        }
        if !user.voters_already_counted.insert(voter_id) {
            continue;
        }
        user.votes_received += 1;
        debug!(
            guild_id = state.guild_id,
            user_id = *target_id,
            voter_id,
            votes = user.votes_received,
            required = user.votes_required,
            "Vote counted"
        );

        if user.votes_received >= user.votes_required {
            user.resolving = true;
            resolutions.push(Resolution {
                user_id: *target_id,
                punishment: if user.already_kicked {
                    Punishment::Ban
                } else {
                    Punishment::Kick
                },
            });
        }
    }

    resolutions
}

/// Settle a resolution after the kick or ban was attempted
///
/// When `executed`, counters and voters are reset and the user is remembered
/// as kicked. Otherwise the user stays flagged and the next vote retries.
pub fn finish_resolution(state: &mut GuildModerationState, user_id: u64, executed: bool) {
    let Some(user) = state.spam_users.get_mut(&user_id) else {
        // Swept while the action was in flight
        return;
    };
    user.resolving = false;
    if executed {
        *user = SpamUserState {
            already_kicked: true,
            ..Default::default()
        };
    }
}

/// Replace the guild's spam thresholds
///
/// # Errors
/// Returns a validation error if any limit or vote requirement is zero.
pub fn configure(state: &mut GuildModerationState, config: SpamConfig) -> ModerationResult<()> {
    if let Some((check_type, _)) = config
        .thresholds
        .iter()
        .find(|(_, threshold)| threshold.limit == 0 || threshold.votes_required == 0)
    {
        return Err(ModerationError::ValidationFailed(format!(
            "{check_type} needs a limit and vote requirement of at least 1"
        )));
    }
    if config.long_message_length == 0 {
        return Err(ModerationError::ValidationFailed(
            "Long message length must be at least 1".to_string(),
        ));
    }
    state.spam_config = config;
    Ok(())
}

/// Drop all spam progress in the guild. Returns the number of users cleared.
pub fn clear(state: &mut GuildModerationState) -> usize {
    let cleared = state.spam_users.len();
    state.spam_users.clear();
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::SpamThreshold;

    fn state_with(check_type: SpamCheckType, limit: u32, votes_required: u32) -> GuildModerationState {
        let mut state = GuildModerationState::new(1);
        let mut config = SpamConfig::default();
        config.thresholds.insert(
            check_type,
            SpamThreshold {
                limit,
                votes_required,
            },
        );
        configure(&mut state, config).unwrap();
        state
    }

    #[test]
    fn test_signals() {
        let mut config = SpamConfig {
            long_message_length: 10,
            ..Default::default()
        };
        for check_type in SpamCheckType::ALL {
            config.thresholds.insert(
                check_type,
                SpamThreshold {
                    limit: 5,
                    votes_required: 1,
                },
            );
        }

        let found = signals(
            &config,
            1,
            "see https://a.example and http://b.example",
            &[2, 2, 3, 1],
        );
        assert_eq!(found[&SpamCheckType::MessageBurst], 1);
        assert_eq!(found[&SpamCheckType::MentionBurst], 2);
        assert_eq!(found[&SpamCheckType::LinkBurst], 2);
        assert_eq!(found[&SpamCheckType::LongMessageBurst], 1);

        let found = signals(&config, 1, "hi", &[]);
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&SpamCheckType::MessageBurst));
    }

    #[test]
    fn test_flags_when_limit_reached() {
        let mut state = state_with(SpamCheckType::MessageBurst, 3, 2);

        assert!(accumulate(&mut state, 10, "a", &[]).is_none());
        assert!(accumulate(&mut state, 10, "b", &[]).is_none());
        let flag = accumulate(&mut state, 10, "c", &[]).unwrap();
        assert_eq!(flag.check_type, SpamCheckType::MessageBurst);
        assert_eq!(flag.votes_required, 2);
        assert!(flag.notice().contains("<@10>"));

        // No second notice while flagged
        assert!(accumulate(&mut state, 10, "d", &[]).is_none());
        assert!(state.spam_users[&10].potential_kick);
    }

    #[test]
    fn test_unconfigured_guild_tracks_nothing() {
        let mut state = GuildModerationState::new(1);
        assert!(accumulate(&mut state, 10, "a", &[2, 3]).is_none());
        assert!(state.spam_users.is_empty());
    }

    #[test]
    fn test_votes_are_distinct_and_not_self() {
        let mut state = state_with(SpamCheckType::MessageBurst, 1, 3);
        accumulate(&mut state, 10, "spam", &[]).unwrap();

        assert!(count_votes(&mut state, 10, &[10]).is_empty());
        assert!(count_votes(&mut state, 20, &[10, 10]).is_empty());
        assert!(count_votes(&mut state, 20, &[10]).is_empty());
        assert!(count_votes(&mut state, 21, &[10]).is_empty());

        let user = &state.spam_users[&10];
        assert_eq!(user.votes_received, 2);
        assert_eq!(user.voters_already_counted.len(), 2);

        let resolutions = count_votes(&mut state, 22, &[10]);
        assert_eq!(
            resolutions,
            vec![Resolution {
                user_id: 10,
                punishment: Punishment::Kick
            }]
        );

        // Resolving: further votes are ignored
        assert!(count_votes(&mut state, 23, &[10]).is_empty());
    }

    #[test]
    fn test_mentions_of_unflagged_users_are_not_votes() {
        let mut state = state_with(SpamCheckType::MessageBurst, 5, 1);
        accumulate(&mut state, 10, "a", &[]);
        assert!(count_votes(&mut state, 20, &[10]).is_empty());
        assert!(state.spam_users[&10].voters_already_counted.is_empty());
    }

    #[test]
    fn test_second_resolution_bans() {
        let mut state = state_with(SpamCheckType::MessageBurst, 1, 1);

        accumulate(&mut state, 10, "a", &[]).unwrap();
        let first = count_votes(&mut state, 20, &[10]);
        assert_eq!(first[0].punishment, Punishment::Kick);
        finish_resolution(&mut state, 10, true);

        let user = &state.spam_users[&10];
        assert!(user.already_kicked);
        assert!(!user.potential_kick);
        assert!(user.per_type_counts.is_empty());
        assert!(user.voters_already_counted.is_empty());

        accumulate(&mut state, 10, "b", &[]).unwrap();
        let second = count_votes(&mut state, 20, &[10]);
        assert_eq!(second[0].punishment, Punishment::Ban);
    }

    #[test]
    fn test_failed_resolution_stays_flagged() {
        let mut state = state_with(SpamCheckType::MessageBurst, 1, 1);
        accumulate(&mut state, 10, "a", &[]).unwrap();
        assert_eq!(count_votes(&mut state, 20, &[10]).len(), 1);
        finish_resolution(&mut state, 10, false);

        let user = &state.spam_users[&10];
        assert!(user.potential_kick);
        assert!(!user.resolving);
        assert!(!user.already_kicked);
        assert_eq!(count_votes(&mut state, 21, &[10]).len(), 1);
    }

    #[test]
    fn test_clear_forgets_already_kicked() {
        let mut state = state_with(SpamCheckType::MessageBurst, 1, 1);
        accumulate(&mut state, 10, "a", &[]).unwrap();
        count_votes(&mut state, 20, &[10]);
        finish_resolution(&mut state, 10, true);

        assert_eq!(clear(&mut state), 1);
        accumulate(&mut state, 10, "b", &[]).unwrap();
        assert_eq!(count_votes(&mut state, 20, &[10])[0].punishment, Punishment::Kick);
    }

    #[test]
    fn test_configure_rejects_zero_values() {
        let mut state = GuildModerationState::new(1);
        let mut config = SpamConfig::default();
        config.thresholds.insert(
            SpamCheckType::LinkBurst,
            SpamThreshold {
                limit: 3,
                votes_required: 0,
            },
        );
        assert!(configure(&mut state, config).unwrap_err().is_validation());
        assert!(!state.spam_config.is_active());
    }
}
