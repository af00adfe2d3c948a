mod cache;
mod coc;
mod commands;
mod config;
mod cwl;
mod database;
mod error;
mod events;
mod reporting;
mod settings;
mod tasks;
mod war;

use anyhow::Context as _;
use cache::{CacheService, KeyValueStore, RedisStore};
use coc::ClashClient;
use config::Config;
use database::Db;
use events::event_handler;
use poise::serenity_prelude as serenity;
use reporting::ErrorReporter;
use settings::{keys, MongoSettingsStore, Settings, SettingsStore, SettingsTarget};
use std::sync::Arc;
use tasks::maintenance::MaintenanceTask;
use tasks::settings_sync::SettingsSyncTask;
use tasks::TaskManager;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_PREFIX: &str = "!";

#[derive(Clone)]
pub struct Data {
    pub settings: Arc<Settings>,
    pub db: Db,
    pub cache: CacheService,
    pub coc: ClashClient,
    pub reporter: ErrorReporter,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

async fn dynamic_prefix(
    ctx: poise::PartialContext<'_, Data, Error>,
) -> Result<Option<String>, Error> {
    let target = ctx
        .guild_id
        .map_or(SettingsTarget::Global, SettingsTarget::Guild);
    let prefix = ctx
        .data
        .settings
        .get_or_global(target, keys::PREFIX, DEFAULT_PREFIX.to_string());
    Ok(Some(prefix))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Config::from_env()?;
    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let db = Db::connect(&config.mongodb_url)
        .await
        .context("failed to connect to MongoDB")?;
    let settings_store: Arc<dyn SettingsStore> = Arc::new(MongoSettingsStore::new(db.database()));
    let settings = Arc::new(Settings::load(settings_store).await?);

    let redis: Arc<dyn KeyValueStore> = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .context("failed to connect to Redis")?,
    );

    let data = Data {
        settings,
        db,
        cache: CacheService::new(redis),
        coc: ClashClient::new(&config.clash_api_url, config.clash_tokens.clone())?,
        reporter: ErrorReporter::new(config.error_webhook_url.clone()),
    };

    let mut task_manager = TaskManager::new();
    task_manager.register_task(SettingsSyncTask::new());
    task_manager.register_task(MaintenanceTask::new());

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(DEFAULT_PREFIX.to_string()),
                dynamic_prefix: Some(|ctx| Box::pin(dynamic_prefix(ctx))),
                ..Default::default()
            },
            on_error: |error| Box::pin(reporting::on_error(error)),
            pre_command: |ctx| {
                Box::pin(async move {
                    tracing::info!(
                        "{} invoked `{}`",
                        ctx.author().name,
                        ctx.command().qualified_name
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    tracing::debug!("Finished `{}`", ctx.command().qualified_name);
                })
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                // Run tasks after framework setup
                task_manager.run_all(ctx, data.clone());

                Ok(data)
            })
        })
        .build();

    serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await?
        .start()
        .await?;

    Ok(())
}
