use futures::future::try_join_all;
use poise::serenity_prelude::{
    ButtonStyle, CreateActionRow, CreateButton, CreateEmbed, CreateEmbedFooter, GuildId,
};
use poise::CreateReply;
use serde::{Deserialize, Serialize};

use super::{guild_color, join_within, resolve_clan_tag, DESCRIPTION_LIMIT};
use crate::coc::models::{ClanWar, WarState};
use crate::cwl::{format_leaderboard, summarize_league};
use crate::error::{self, BotError};
use crate::war::{format_attacked, format_remaining, summarize_attacks};
use crate::{Context, Data, Error};

const FIELD_LIMIT: usize = 1024;
const LEADERBOARD_SIZE: usize = 50;

/// A war view that can be re-rendered from a component's custom id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum WarView {
    Attacks { tag: String },
    Cwl { tag: String },
}

impl WarView {
    pub async fn render(&self, data: &Data, guild_id: Option<GuildId>) -> error::Result<CreateEmbed> {
        let color = guild_color(data, guild_id);
        match self {
            Self::Attacks { tag } => {
                let war = data.coc.get_current_war(tag).await?;
                attacks_embed(war, color)
            }
            Self::Cwl { tag } => cwl_embed(data, tag, color).await,
        }
    }

    /// Sends the rendered view with a refresh button attached.
    async fn reply(&self, ctx: Context<'_>) -> error::Result<()> {
        let embed = self.render(ctx.data(), ctx.guild_id()).await?;
        let custom_id = ctx.data().cache.create_custom_id(self).await?;
        let refresh = CreateButton::new(custom_id)
            .label("Refresh")
            .style(ButtonStyle::Secondary);

        ctx.send(
            CreateReply::default()
                .embed(embed)
                .components(vec![CreateActionRow::Buttons(vec![refresh])]),
        )
        .await?;
        Ok(())
    }
}

fn field_value(text: String) -> String {
    let value = join_within(text.lines().map(str::to_string), FIELD_LIMIT);
    if value.is_empty() {
        "None".to_string()
    } else {
        value
    }
}

fn attacks_embed(war: ClanWar, color: u32) -> error::Result<CreateEmbed> {
    let status = match war.state {
        WarState::NotInWar => {
            return Err(BotError::NotFound("The clan is not in a war.".to_string()));
        }
        WarState::Preparation => "Preparation day",
        WarState::InWar => "Battle day",
        WarState::WarEnded => "War ended",
    };

    let summary = summarize_attacks(&war);
    let per_member = summary.attacks_per_member;

    Ok(CreateEmbed::default()
        .title(format!("{} vs {}", war.clan.name, war.opponent.name))
        .color(color)
        .description(format!(
            "{status}\n⭐ {} `{:.2}%` vs ⭐ {} `{:.2}%`",
            war.clan.stars,
            war.clan.destruction_percentage,
            war.opponent.stars,
            war.opponent.destruction_percentage
        ))
        .field(
            format!("Attacked ({})", summary.attacked.len()),
            field_value(format_attacked(&summary.attacked)),
            false,
        )
        .field(
            format!("Remaining ({})", summary.remaining.len()),
            field_value(format_remaining(&summary.remaining, per_member)),
            false,
        )
        .footer(CreateEmbedFooter::new(format!(
            "{} vs {} · {} attacks per member",
            war.team_size, war.team_size, per_member
        ))))
}

async fn cwl_embed(data: &Data, tag: &str, color: u32) -> error::Result<CreateEmbed> {
    let group = data.coc.get_league_group(tag).await?;
    let wars = try_join_all(
        group
            .scheduled_war_tags()
            .map(|war_tag| data.coc.get_league_war(war_tag)),
    )
    .await?;

    let summary = summarize_league(tag, wars);
    let name = group
        .clans
        .iter()
        .find(|c| c.tag == tag)
        .map_or(tag, |c| c.name.as_str());

    let leaderboard = format_leaderboard(&summary.members, LEADERBOARD_SIZE);
    let description = join_within(
        leaderboard.lines().map(str::to_string),
        DESCRIPTION_LIMIT,
    );

    Ok(CreateEmbed::default()
        .title(format!("{name} CWL {}", group.season))
        .color(color)
        .description(if description.is_empty() {
            "No attacks yet.".to_string()
        } else {
            description
        })
        .field(
            "Record",
            format!("{}W {}L {}T", summary.won, summary.lost, summary.tied),
            true,
        )
        .field("Stars", summary.stars.to_string(), true)
        .field("Destruction", format!("{:.2}%", summary.destruction), true)
        .footer(CreateEmbedFooter::new(format!(
            "{} rounds played",
            summary.rounds_played
        ))))
}

/// Show who has and hasn't attacked in the current war
#[poise::command(
    slash_command,
    prefix_command,
    category = "War",
    user_cooldown = 5
)]
pub async fn attacks(
    ctx: Context<'_>,
    #[description = "Clan tag or alias"] tag: String,
) -> Result<(), Error> {
    ctx.defer().await?;
    let tag = resolve_clan_tag(ctx, &tag).await?;
    WarView::Attacks { tag }.reply(ctx).await?;
    Ok(())
}

/// Summarize the clan's war league season
#[poise::command(
    slash_command,
    prefix_command,
    category = "War",
    user_cooldown = 5
)]
pub async fn cwl(
    ctx: Context<'_>,
    #[description = "Clan tag or alias"] tag: String,
) -> Result<(), Error> {
    ctx.defer().await?;
    let tag = resolve_clan_tag(ctx, &tag).await?;
    WarView::Cwl { tag }.reply(ctx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_serialize_into_short_custom_ids() {
        let view = WarView::Attacks {
            tag: "#2PP".to_string(),
        };
        let raw = serde_json::to_string(&view).unwrap();
        assert_eq!(raw, r##"{"cmd":"attacks","tag":"#2PP"}"##);
        assert_eq!(serde_json::from_str::<WarView>(&raw).unwrap(), view);
    }

    #[test]
    fn empty_fields_read_none() {
        assert_eq!(field_value(String::new()), "None");
        assert_eq!(field_value("a\nb".to_string()), "a\nb");
    }

    #[test]
    fn clans_not_in_war_are_rejected() {
        let war: ClanWar = serde_json::from_str(
            r#"{"state": "notInWar", "clan": {}, "opponent": {}}"#,
        )
        .unwrap();
        assert!(matches!(attacks_embed(war, 0), Err(BotError::NotFound(_))));
    }
}
