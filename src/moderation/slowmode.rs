//! Per-user slowmode throttle
//!
//! Each throttled user gets `base_messages` messages per window. The window
//! starts with the first message after a reset and lasts `window_seconds`.
//! Instead of arming a timer per user, the window end is stored and checked
//! against the clock on the next message and on every scheduler tick.

use crate::moderation::{
    GuildModerationState, ModerationError, ModerationResult, SlowmodeConfig, SlowmodeUserState,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Outcome of a message passing through slowmode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowmodeVerdict {
    /// The message may stay
    Allow,
    /// The message must be deleted
    Drop,
}

impl SlowmodeUserState {
    /// Whether the running window has elapsed at `now`
    #[must_use]
    pub fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.window_timer_active && self.window_ends_at.is_some_and(|ends_at| ends_at <= now)
    }

    /// Refill the allowance if the window has elapsed. Returns true if it did.
    pub fn reset_if_elapsed(&mut self, now: DateTime<Utc>) -> bool {
        if !self.window_elapsed(now) {
            return false;
        }
        self.messages_left = self.base_messages;
        self.window_timer_active = false;
        self.window_ends_at = None;
        true
    }

    /// Spend one message from the allowance
    pub fn consume(&mut self, now: DateTime<Utc>) -> SlowmodeVerdict {
        self.reset_if_elapsed(now);

        if self.messages_left == 0 {
            return SlowmodeVerdict::Drop;
        }

        self.messages_left -= 1;
        if self.messages_left + 1 == self.base_messages && !self.window_timer_active {
            self.window_timer_active = true;
            self.window_ends_at = Some(now + Duration::seconds(i64::from(self.window_seconds)));
        }
        SlowmodeVerdict::Allow
    }
}

/// Run a message through slowmode
///
/// Guild-wide state takes precedence over the channel's state. Users that are
/// not tracked yet are registered first if slowmode covers them.
pub fn on_message(
    state: &mut GuildModerationState,
    channel_id: u64,
    user_id: u64,
    roles: &[u64],
    now: DateTime<Utc>,
) -> SlowmodeVerdict {
    register_for_channel(state, channel_id, user_id, roles);

    let user_state = match state.slowmode_users.get_mut(&user_id) {
        Some(user_state) => Some(user_state),
        None => state
            .channel_slowmode_users
            .get_mut(&channel_id)
            .and_then(|users| users.get_mut(&user_id)),
    };

    match user_state {
        Some(user_state) => user_state.consume(now),
        None => SlowmodeVerdict::Allow,
    }
}

/// Whether any slowmode (guild-wide or channel) is active
#[must_use]
pub fn is_active(state: &GuildModerationState) -> bool {
    state.guild_slowmode.is_some() || !state.channel_slowmode.is_empty()
}

/// Activate slowmode guild-wide (`channel_id == None`) or for one channel
///
/// `members` is the membership snapshot as `(user_id, roles)`; immune members
/// are left out. Returns the number of users now throttled.
///
/// # Errors
/// Returns `InvalidSlowmode` if the allowance or window is zero.
pub fn enable(
    state: &mut GuildModerationState,
    channel_id: Option<u64>,
    config: SlowmodeConfig,
    members: &[(u64, Vec<u64>)],
) -> ModerationResult<usize> {
    if config.base_messages == 0 {
        return Err(ModerationError::InvalidSlowmode(
            "Message allowance must be at least 1".to_string(),
        ));
    }
    if config.window_seconds == 0 {
        return Err(ModerationError::InvalidSlowmode(
            "Window must be at least 1 second".to_string(),
        ));
    }

    let users: HashMap<u64, SlowmodeUserState> = members
        .iter()
        .filter(|(_, roles)| !config.is_immune(roles))
        .map(|(user_id, _)| (*user_id, config.user_state()))
        .collect();
    let count = users.len();

    match channel_id {
        None => {
            state.slowmode_users = users;
            state.guild_slowmode = Some(config);
        }
        Some(channel_id) => {
            state.channel_slowmode_users.insert(channel_id, users);
            state.channel_slowmode.insert(channel_id, config);
        }
    }

    Ok(count)
}

/// Deactivate slowmode and drop its user states. Returns false if it was not active.
pub fn disable(state: &mut GuildModerationState, channel_id: Option<u64>) -> bool {
    match channel_id {
        None => {
            state.slowmode_users.clear();
            state.guild_slowmode.take().is_some()
        }
        Some(channel_id) => {
            state.channel_slowmode_users.remove(&channel_id);
            state.channel_slowmode.remove(&channel_id).is_some()
        }
    }
}

/// Register a joining member into every active slowmode. Returns how many scopes they joined.
pub fn register_member(state: &mut GuildModerationState, user_id: u64, roles: &[u64]) -> usize {
    let mut registered = 0;

    if let Some(config) = &state.guild_slowmode {
        if !config.is_immune(roles) && !state.slowmode_users.contains_key(&user_id) {
            state.slowmode_users.insert(user_id, config.user_state());
            registered += 1;
        }
    }

    for (channel_id, config) in &state.channel_slowmode {
        if config.is_immune(roles) {
            continue;
        }
        let users = state.channel_slowmode_users.entry(*channel_id).or_default();
        if !users.contains_key(&user_id) {
            users.insert(user_id, config.user_state());
            registered += 1;
        }
    }

    if registered > 0 {
        debug!(
            guild_id = state.guild_id,
            user_id, registered, "Registered member into slowmode"
        );
    }
    registered
}

fn register_for_channel(
    state: &mut GuildModerationState,
    channel_id: u64,
    user_id: u64,
    roles: &[u64],
) {
    if let Some(config) = &state.guild_slowmode {
        if !config.is_immune(roles) {
            state
                .slowmode_users
                .entry(user_id)
                .or_insert_with(|| config.user_state());
        }
    }

    if let Some(config) = state.channel_slowmode.get(&channel_id) {
        if !config.is_immune(roles) {
            state
                .channel_slowmode_users
                .entry(channel_id)
                .or_default()
                .entry(user_id)
                .or_insert_with(|| config.user_state());
        }
    }
}

/// Refill every elapsed window. Returns the number of users reset.
pub fn reset_elapsed_windows(state: &mut GuildModerationState, now: DateTime<Utc>) -> usize {
    let guild_resets = state
        .slowmode_users
        .values_mut()
        .map(|user| user.reset_if_elapsed(now))
        .filter(|reset| *reset)
        .count();
    let channel_resets = state
        .channel_slowmode_users
        .values_mut()
        .flat_map(|users| users.values_mut())
        .map(|user| user.reset_if_elapsed(now))
        .filter(|reset| *reset)
        .count();
    guild_resets + channel_resets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn config(base_messages: u32, window_seconds: u32) -> SlowmodeConfig {
        SlowmodeConfig {
            base_messages,
            window_seconds,
            immune_roles: BTreeSet::from([900]),
        }
    }

    #[test]
    fn test_drops_message_past_allowance_and_recovers_after_window() {
        let mut state = GuildModerationState::new(1);
        enable(&mut state, None, config(2, 5), &[(10, vec![])]).unwrap();
        let start = Utc::now();

        assert_eq!(on_message(&mut state, 5, 10, &[], start), SlowmodeVerdict::Allow);
        assert_eq!(
            on_message(&mut state, 5, 10, &[], start + Duration::milliseconds(300)),
            SlowmodeVerdict::Allow
        );
        assert_eq!(
            on_message(&mut state, 5, 10, &[], start + Duration::milliseconds(600)),
            SlowmodeVerdict::Drop
        );

        // Still inside the window
        assert_eq!(
            on_message(&mut state, 5, 10, &[], start + Duration::milliseconds(4900)),
            SlowmodeVerdict::Drop
        );

        let later = start + Duration::seconds(5);
        assert_eq!(on_message(&mut state, 5, 10, &[], later), SlowmodeVerdict::Allow);

        // The window restarted at `later`
        let user = &state.slowmode_users[&10];
        assert_eq!(user.messages_left, 1);
        assert!(user.window_timer_active);
        assert_eq!(user.window_ends_at, Some(later + Duration::seconds(5)));
    }

    #[test]
    fn test_window_starts_only_on_first_message() {
        let mut state = GuildModerationState::new(1);
        enable(&mut state, None, config(3, 10), &[(10, vec![])]).unwrap();
        let start = Utc::now();

        on_message(&mut state, 5, 10, &[], start);
        on_message(&mut state, 5, 10, &[], start + Duration::seconds(4));

        let user = &state.slowmode_users[&10];
        assert_eq!(user.window_ends_at, Some(start + Duration::seconds(10)));
    }

    #[test]
    fn test_immune_members_are_not_throttled() {
        let mut state = GuildModerationState::new(1);
        let count = enable(
            &mut state,
            None,
            config(1, 60),
            &[(10, vec![]), (11, vec![900])],
        )
        .unwrap();
        assert_eq!(count, 1);

        let now = Utc::now();
        for _ in 0..5 {
            assert_eq!(
                on_message(&mut state, 5, 11, &[900], now),
                SlowmodeVerdict::Allow
            );
        }
        assert!(!state.slowmode_users.contains_key(&11));
    }

    #[test]
    fn test_untracked_user_without_slowmode_is_allowed() {
        let mut state = GuildModerationState::new(1);
        let now = Utc::now();
        for _ in 0..10 {
            assert_eq!(on_message(&mut state, 5, 10, &[], now), SlowmodeVerdict::Allow);
        }
        assert!(state.slowmode_users.is_empty());
    }

    #[test]
    fn test_guild_state_takes_precedence_over_channel() {
        let mut state = GuildModerationState::new(1);
        enable(&mut state, Some(5), config(1, 60), &[(10, vec![])]).unwrap();
        enable(&mut state, None, config(3, 60), &[(10, vec![])]).unwrap();
        let now = Utc::now();

        // The channel allowance of 1 would drop the second message
        assert_eq!(on_message(&mut state, 5, 10, &[], now), SlowmodeVerdict::Allow);
        assert_eq!(on_message(&mut state, 5, 10, &[], now), SlowmodeVerdict::Allow);
        assert_eq!(on_message(&mut state, 5, 10, &[], now), SlowmodeVerdict::Allow);
        assert_eq!(on_message(&mut state, 5, 10, &[], now), SlowmodeVerdict::Drop);
        assert_eq!(state.channel_slowmode_users[&5][&10].messages_left, 1);
    }

    #[test]
    fn test_channel_slowmode_only_applies_to_its_channel() {
        let mut state = GuildModerationState::new(1);
        enable(&mut state, Some(5), config(1, 60), &[]).unwrap();
        let now = Utc::now();

        assert_eq!(on_message(&mut state, 5, 10, &[], now), SlowmodeVerdict::Allow);
        assert_eq!(on_message(&mut state, 5, 10, &[], now), SlowmodeVerdict::Drop);
        assert_eq!(on_message(&mut state, 6, 10, &[], now), SlowmodeVerdict::Allow);
        assert_eq!(on_message(&mut state, 6, 10, &[], now), SlowmodeVerdict::Allow);
    }

    #[test]
    fn test_joining_member_inherits_active_slowmode() {
        let mut state = GuildModerationState::new(1);
        enable(&mut state, None, config(2, 30), &[]).unwrap();
        enable(&mut state, Some(5), config(1, 30), &[]).unwrap();

        assert_eq!(register_member(&mut state, 20, &[]), 2);
        assert_eq!(register_member(&mut state, 20, &[]), 0);
        assert_eq!(register_member(&mut state, 21, &[900]), 0);
        assert_eq!(state.slowmode_users[&20].base_messages, 2);
        assert_eq!(state.channel_slowmode_users[&5][&20].base_messages, 1);
    }

    #[test]
    fn test_disable_deletes_user_states() {
        let mut state = GuildModerationState::new(1);
        enable(&mut state, None, config(2, 30), &[(10, vec![])]).unwrap();
        assert!(disable(&mut state, None));
        assert!(!disable(&mut state, None));
        assert!(state.slowmode_users.is_empty());
        assert!(!is_active(&state));
    }

    #[test]
    fn test_rejects_zero_allowance_or_window() {
        let mut state = GuildModerationState::new(1);
        assert!(enable(&mut state, None, config(0, 30), &[]).is_err());
        assert!(enable(&mut state, None, config(2, 0), &[]).is_err());
        assert!(!is_active(&state));
    }

    #[test]
    fn test_reset_elapsed_windows() {
        let mut state = GuildModerationState::new(1);
        enable(&mut state, None, config(1, 5), &[(10, vec![]), (11, vec![])]).unwrap();
        let now = Utc::now();
        on_message(&mut state, 5, 10, &[], now);

        assert_eq!(reset_elapsed_windows(&mut state, now + Duration::seconds(4)), 0);
        assert_eq!(reset_elapsed_windows(&mut state, now + Duration::seconds(5)), 1);
        let user = &state.slowmode_users[&10];
        assert_eq!(user.messages_left, 1);
        assert!(!user.window_timer_active);
    }
}
