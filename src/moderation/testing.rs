//! Test doubles shared by the engine's tests

use crate::moderation::{
    ActionError, ActionPort, ActionResult, MemoryPersistence, ModerationPipeline, ModerationStore,
    PipelineSettings,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GUILD: u64 = 1000;
pub const CHANNEL: u64 = 2000;
pub const BOT: u64 = 1;

/// One outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Delete { channel_id: u64, message_id: u64 },
    Send { channel_id: u64, content: String },
    Kick { user_id: u64 },
    Ban { user_id: u64, prune_days: u8 },
    Unban { user_id: u64 },
    AddRole { user_id: u64, role_id: u64 },
    RemoveRole { user_id: u64, role_id: u64 },
    Mute { user_id: u64, muted: bool },
    Deafen { user_id: u64, deafened: bool },
}

/// Port that records every call
///
/// The bot sits at role position 10 and everyone else at 0 unless changed.
#[derive(Debug, Default)]
pub struct RecordingPort {
    calls: Mutex<Vec<Call>>,
    positions: Mutex<HashMap<u64, i64>>,
    pub fail_actions: AtomicBool,
    pub hang_actions: AtomicBool,
}

impl RecordingPort {
    pub fn new() -> Arc<Self> {
        let port = Self::default();
        port.set_position(BOT, 10);
        Arc::new(port)
    }

    pub fn set_position(&self, user_id: u64, position: i64) {
        self.positions
            .lock()
            .expect("positions poisoned")
            .insert(user_id, position);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls poisoned").clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    async fn record(&self, call: Call) -> ActionResult<()> {
        if self.hang_actions.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.calls.lock().expect("calls poisoned").push(call);
        if self.fail_actions.load(Ordering::SeqCst) {
            return Err(ActionError::Other("simulated failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionPort for RecordingPort {
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> ActionResult<()> {
        self.record(Call::Delete {
            channel_id,
            message_id,
        })
        .await
    }

    async fn send_message(&self, channel_id: u64, content: &str) -> ActionResult<()> {
        self.record(Call::Send {
            channel_id,
            content: content.to_string(),
        })
        .await
    }

    async fn kick_user(&self, _guild_id: u64, user_id: u64) -> ActionResult<()> {
        self.record(Call::Kick { user_id }).await
    }

    async fn ban_user(&self, _guild_id: u64, user_id: u64, prune_days: u8) -> ActionResult<()> {
        self.record(Call::Ban {
            user_id,
            prune_days,
        })
        .await
    }

    async fn unban_user(&self, _guild_id: u64, user_id: u64) -> ActionResult<()> {
        self.record(Call::Unban { user_id }).await
    }

    async fn add_role(&self, _guild_id: u64, user_id: u64, role_id: u64) -> ActionResult<()> {
        self.record(Call::AddRole { user_id, role_id }).await
    }

    async fn remove_role(&self, _guild_id: u64, user_id: u64, role_id: u64) -> ActionResult<()> {
        self.record(Call::RemoveRole { user_id, role_id }).await
    }

    async fn set_mute(&self, _guild_id: u64, user_id: u64, muted: bool) -> ActionResult<()> {
        self.record(Call::Mute { user_id, muted }).await
    }

    async fn set_deafen(&self, _guild_id: u64, user_id: u64, deafened: bool) -> ActionResult<()> {
        self.record(Call::Deafen { user_id, deafened }).await
    }

    async fn get_role_position(&self, _guild_id: u64, _role_id: u64) -> ActionResult<i64> {
        Ok(1)
    }

    async fn get_user_top_role_position(&self, _guild_id: u64, user_id: u64) -> ActionResult<i64> {
        Ok(self
            .positions
            .lock()
            .expect("positions poisoned")
            .get(&user_id)
            .copied()
            .unwrap_or(0))
    }
}

/// Pipeline over a recording port and in-memory persistence, with `GUILD` loaded
pub async fn pipeline() -> (ModerationPipeline, Arc<RecordingPort>, MemoryPersistence) {
    let port = RecordingPort::new();
    let persistence = MemoryPersistence::new();
    let pipeline = ModerationPipeline::new(
        ModerationStore::new(),
        port.clone(),
        Arc::new(persistence.clone()),
        PipelineSettings {
            bot_user_id: BOT,
            action_timeout: Duration::from_secs(5),
            ban_prune_days: 1,
        },
    );
    pipeline
        .load_guild(GUILD)
        .await
        .expect("Failed to load guild");
    (pipeline, port, persistence)
}
