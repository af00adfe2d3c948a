use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::time::Duration;
use tracing::warn;

use super::TaskHandler;
use crate::{Data, Error};

const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Keeps the in-memory settings in step with writes from other processes.
#[derive(Debug, Default)]
pub struct SettingsSyncTask;

impl SettingsSyncTask {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskHandler for SettingsSyncTask {
    fn name(&self) -> &'static str {
        "settings_sync"
    }

    async fn run(&mut self, _ctx: &serenity::Context, data: Data) -> Result<(), Error> {
        loop {
            match data.settings.sync().await {
                Ok(()) => warn!("Settings change stream ended, reopening"),
                Err(e) => warn!("Settings change stream failed: {}", e),
            }
            tokio::time::sleep(RESTART_DELAY).await;
        }
    }
}
