use crate::commands::war::WarView;
use crate::error;
use crate::settings::keys;
use crate::{Data, Error, DEFAULT_PREFIX};
use poise::serenity_prelude::{
    self as serenity, ActivityData, ComponentInteraction, ConnectionStage, CreateEmbed,
    CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, EditInteractionResponse, OnlineStatus,
};
use tracing::{debug, info, warn};

#[derive(Debug)]
enum RefreshReply {
    Update(CreateEmbed),
    Notice(String),
}

fn refresh_reply(view: &WarView, rendered: error::Result<CreateEmbed>) -> RefreshReply {
    match rendered {
        Ok(embed) => RefreshReply::Update(embed),
        Err(e) => {
            if !e.is_user_error() {
                warn!("Failed to refresh {:?}: {}", view, e);
            }
            RefreshReply::Notice(e.user_message())
        }
    }
}

/// Re-renders the war view behind a refresh button.
async fn handle_component(
    ctx: &serenity::Context,
    component: &ComponentInteraction,
    data: &Data,
) -> Result<(), Error> {
    let Some(view) = data
        .cache
        .get_custom_id::<WarView>(&component.data.custom_id)
        .await
    else {
        debug!("Unknown or expired custom id {}", component.data.custom_id);
        let response = CreateInteractionResponseMessage::new()
            .content("This button has expired. Run the command again.")
            .ephemeral(true);
        component
            .create_response(&ctx.http, CreateInteractionResponse::Message(response))
            .await?;
        return Ok(());
    };

    // Rendering can take several API calls, longer than Discord waits for a response.
    component
        .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
        .await?;

    match refresh_reply(&view, view.render(data, component.guild_id).await) {
        RefreshReply::Update(embed) => {
            component
                .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
                .await?;
        }
        RefreshReply::Notice(message) => {
            component
                .create_followup(
                    &ctx.http,
                    CreateInteractionResponseFollowup::new()
                        .content(message)
                        .ephemeral(true),
                )
                .await?;
        }
    }
    Ok(())
}

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::InteractionCreate {
            interaction: serenity::Interaction::Component(component),
        } => {
            handle_component(ctx, component, data).await?;
        }
        serenity::FullEvent::Ready { data_about_bot } => {
            info!(
                "{} is ready in {} guilds",
                data_about_bot.user.name,
                data_about_bot.guilds.len()
            );
            ctx.set_presence(
                Some(ActivityData::watching("your clans")),
                OnlineStatus::Online,
            );
        }
        serenity::FullEvent::ShardStageUpdate { event } => {
            if event.new == ConnectionStage::Disconnected {
                warn!("Shard {} disconnected (was {:?})", event.shard_id, event.old);
            } else if event.new == ConnectionStage::Connected {
                info!("Shard {} connected", event.shard_id);
            }
        }
        serenity::FullEvent::Resume { .. } => {
            info!("Gateway session resumed");
        }
        serenity::FullEvent::GuildCreate { guild, is_new } => {
            if is_new.unwrap_or(false) {
                let prefix: String =
                    data.settings.get_or_global(guild, keys::PREFIX, DEFAULT_PREFIX.to_string());
                info!("Joined guild {} ({}), prefix {}", guild.name, guild.id, prefix);
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            if !incomplete.unavailable {
                info!("Left guild {}", incomplete.id);
            }
        }
        _ => {}
    }
    Ok(())
}
