use poise::serenity_prelude::{self as serenity, CreateEmbed, ExecuteWebhook, Timestamp, Webhook};
use poise::CreateReply;
use tracing::{error, warn};

use crate::error::BotError;
use crate::{Data, Error};

const REPORT_COLOR: u32 = 0xcf0025;

/// Forwards unexpected errors to a Discord webhook, when one is configured.
#[derive(Debug, Clone, Default)]
pub struct ErrorReporter {
    webhook_url: Option<String>,
}

impl ErrorReporter {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self { webhook_url }
    }

    pub async fn report(&self, http: &serenity::Http, origin: &str, details: &str) {
        let Some(url) = &self.webhook_url else {
            return;
        };

        let embed = CreateEmbed::default()
            .title(origin)
            .description(truncate(details, 4000))
            .color(REPORT_COLOR)
            .timestamp(Timestamp::now());

        let result = match Webhook::from_url(http, url).await {
            Ok(webhook) => webhook
                .execute(http, false, ExecuteWebhook::new().embed(embed))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("Failed to report error to webhook: {}", e);
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}…", &text[..index]),
        None => text.to_string(),
    }
}

async fn reply(ctx: crate::Context<'_>, content: String) {
    let reply = CreateReply::default().content(content).ephemeral(true);
    if let Err(e) = ctx.send(reply).await {
        warn!("Failed to send error reply: {}", e);
    }
}

pub async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            let command = ctx.command().qualified_name.clone();
            let bot_error = error.downcast_ref::<BotError>();

            if !bot_error.is_some_and(BotError::is_user_error) {
                error!("Error in command `{}`: {:?}", command, error);
                let origin = match ctx.guild_id() {
                    Some(guild_id) => format!("/{command} in {guild_id}"),
                    None => format!("/{command} in DMs"),
                };
                ctx.data()
                    .reporter
                    .report(ctx.http(), &origin, &format!("{error:?}"))
                    .await;
            }

            let message = bot_error
                .map(BotError::user_message)
                .unwrap_or_else(|| "Something went wrong while running this command.".to_string());
            reply(ctx, message).await;
        }
        poise::FrameworkError::CooldownHit {
            remaining_cooldown,
            ctx,
            ..
        } => {
            reply(
                ctx,
                format!(
                    "You're using this command too fast. Try again in {:.1}s.",
                    remaining_cooldown.as_secs_f32()
                ),
            )
            .await;
        }
        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
            let usage = ctx.command().qualified_name.clone();
            let message = match input {
                Some(input) => format!("Couldn't understand `{input}` for `{usage}`: {error}"),
                None => format!("Missing or invalid arguments for `{usage}`: {error}"),
            };
            reply(ctx, message).await;
        }
        poise::FrameworkError::EventHandler { error, event, .. } => {
            error!("Error in {} event handler: {}", event.snake_case_name(), error);
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}
