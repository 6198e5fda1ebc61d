//! Banned phrase matching and punishment escalation
//!
//! A message matching any banned phrase is deleted and counts as one
//! violation. A rule fires only when the user's counter for the rule's
//! category lands exactly on the rule's trigger count.

use crate::moderation::{BannedPhraseUserState, GuildModerationState, PunishmentRule};
use std::fmt;

/// What a message matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BannedMatch {
    /// A literal banned string
    Phrase(String),
    /// A banned regular expression, by source
    Pattern(String),
}

impl fmt::Display for BannedMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phrase(phrase) => write!(f, "phrase \"{phrase}\""),
            Self::Pattern(pattern) => write!(f, "pattern /{pattern}/"),
        }
    }
}

/// A matched message and its consequences
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub user_id: u64,
    pub matched: BannedMatch,
    /// Counters after this violation
    pub counters: BannedPhraseUserState,
    /// Rule whose trigger count was hit exactly, if any
    pub rule: Option<PunishmentRule>,
}

impl Violation {
    /// Number of violations including this one
    #[must_use]
    pub fn violation_count(&self) -> u32 {
        self.counters.role_violation_count
    }
}

/// Find the first banned string or pattern in `content`
///
/// Literal strings are checked before patterns.
#[must_use]
pub fn find_match(state: &GuildModerationState, content: &str) -> Option<BannedMatch> {
    let lowered = content.to_lowercase();
    if let Some(phrase) = state
        .banned_strings
        .iter()
        .find(|phrase| lowered.contains(phrase.as_str()))
    {
        return Some(BannedMatch::Phrase(phrase.clone()));
    }

    state
        .banned_regex
        .iter()
        .find(|pattern| pattern.is_match(content))
        .map(|pattern| BannedMatch::Pattern(pattern.as_str().to_string()))
}

/// Rule whose trigger count equals the matching counter exactly
#[must_use]
pub fn rule_for(
    state: &GuildModerationState,
    counters: &BannedPhraseUserState,
) -> Option<PunishmentRule> {
    state
        .punishment_rules
        .values()
        .find(|rule| counters.count_for(rule.punishment.get_type()) == rule.trigger_count)
        .cloned()
}

/// Check a message and, on a match, count the violation
pub fn evaluate(
    state: &mut GuildModerationState,
    user_id: u64,
    content: &str,
) -> Option<Violation> {
    let matched = find_match(state, content)?;

    let counters = {
        let counters = state.banned_phrase_users.entry(user_id).or_default();
        counters.record_violation();
        *counters
    };
    let rule = rule_for(state, &counters);

    Some(Violation {
        user_id,
        matched,
        counters,
        rule,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::Punishment;

    fn state_with_phrases() -> GuildModerationState {
        let mut state = GuildModerationState::new(1);
        state.add_banned_string("free nitro").unwrap();
        state.add_banned_pattern(r"bit\.ly/\w+").unwrap();
        state
    }

    #[test]
    fn test_no_match_leaves_counters_alone() {
        let mut state = state_with_phrases();
        assert!(evaluate(&mut state, 10, "hello there").is_none());
        assert!(state.banned_phrase_users.is_empty());
    }

    #[test]
    fn test_strings_are_checked_before_patterns() {
        let state = state_with_phrases();
        assert_eq!(
            find_match(&state, "FREE NITRO at bit.ly/abc"),
            Some(BannedMatch::Phrase("free nitro".to_string()))
        );
        assert_eq!(
            find_match(&state, "see BIT.LY/abc"),
            Some(BannedMatch::Pattern(r"bit\.ly/\w+".to_string()))
        );
    }

    #[test]
    fn test_counter_increases_by_one_per_match() {
        let mut state = state_with_phrases();
        for expected in 1..=4 {
            let violation = evaluate(&mut state, 10, "free nitro here").unwrap();
            assert_eq!(violation.violation_count(), expected);
        }
        assert_eq!(state.banned_phrase_users[&10].kick_violation_count, 4);
        assert!(!state.banned_phrase_users.contains_key(&11));
    }

    #[test]
    fn test_rules_fire_only_on_exact_count() {
        let mut state = state_with_phrases();
        state
            .set_punishment_rule(PunishmentRule::new(2, Punishment::role_grant(50), 10))
            .unwrap();
        state
            .set_punishment_rule(PunishmentRule::new(4, Punishment::Kick, 0))
            .unwrap();

        let fired: Vec<Option<u32>> = (0..6)
            .map(|_| {
                evaluate(&mut state, 10, "free nitro")
                    .unwrap()
                    .rule
                    .map(|rule| rule.trigger_count)
            })
            .collect();

        assert_eq!(fired, vec![None, Some(2), None, Some(4), None, None]);
    }

    #[test]
    fn test_count_past_a_later_rule_never_fires_it() {
        let mut state = state_with_phrases();
        for _ in 0..3 {
            evaluate(&mut state, 10, "free nitro");
        }
        // Added after the user already passed 2
        state
            .set_punishment_rule(PunishmentRule::new(2, Punishment::Ban, 0))
            .unwrap();

        for _ in 0..5 {
            assert!(evaluate(&mut state, 10, "free nitro").unwrap().rule.is_none());
        }
    }

    #[test]
    fn test_reset_restarts_escalation() {
        let mut state = state_with_phrases();
        state
            .set_punishment_rule(PunishmentRule::new(1, Punishment::Kick, 0))
            .unwrap();

        assert!(evaluate(&mut state, 10, "free nitro").unwrap().rule.is_some());
        assert!(evaluate(&mut state, 10, "free nitro").unwrap().rule.is_none());
        assert!(state.reset_violations(10));
        assert!(evaluate(&mut state, 10, "free nitro").unwrap().rule.is_some());
    }
}
