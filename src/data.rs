use std::{ops::Deref, sync::Arc};

use crate::config::Config;
use crate::enforcement::{EnforcementEngine, SchedulerHandle};
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use serenity::prelude::TypeMapKey;

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
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
    #[must_use]
    pub fn new(config: Config, scheduler: SchedulerHandle) -> Self {
        Self(Arc::new(DataInner {
            config,
            scheduler,
            started_at: Utc::now(),
        }))
    }

    /// Get the enforcement engine
    #[must_use]
    pub fn engine(&self) -> &Arc<EnforcementEngine> {
        self.0.scheduler.engine()
    }

    /// Display name of the reference guild, as resolved at startup
    #[must_use]
    pub fn reference_name(&self) -> &str {
        &self.engine().settings().reference_name
    }

    /// Display name of the target guild, as resolved at startup
    #[must_use]
    pub fn target_name(&self) -> &str {
        &self.engine().settings().target_name
    }
}

/// Shared state handed to commands and event handlers
pub struct DataInner {
    pub config: Config,
    // Triggers for the enforcement engine
    pub scheduler: SchedulerHandle,
    pub started_at: DateTime<Utc>,
}
