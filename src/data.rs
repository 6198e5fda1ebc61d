use std::{ops::Deref, sync::Arc};

use crate::config::BotConfig;
use crate::moderation::ModerationPipeline;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use serenity::prelude::TypeMapKey;

/// Shared bot state handed to commands and event handlers
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("pipeline", &self.pipeline)
            .field("config", &self.config)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    /// Create a new Data instance
    #[must_use]
    pub fn new(pipeline: ModerationPipeline, config: BotConfig) -> Self {
        Self(Arc::new(DataInner {
            pipeline,
            config,
            started_at: Utc::now(),
        }))
    }
}

pub struct DataInner {
    /// The moderation engine
    pub pipeline: ModerationPipeline,
    /// Configuration the bot was started with
    pub config: BotConfig,
    pub started_at: DateTime<Utc>,
}
