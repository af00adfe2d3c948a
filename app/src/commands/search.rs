use poise::serenity_prelude::{CreateEmbed, CreateEmbedFooter, User};
use poise::CreateReply;

use super::{embed_color, fetch_clan, fetch_player, resolve_clan_tag};
use crate::coc::models::{Clan, Player};
use crate::coc::tags::normalize_tag;
use crate::error::BotError;
use crate::{Context, Error};

fn war_record(clan: &Clan) -> String {
    match (clan.war_losses, clan.war_ties) {
        (Some(losses), Some(ties)) => format!(
            "{} wins, {} losses, {} ties\nStreak: {}",
            clan.war_wins, losses, ties, clan.war_win_streak
        ),
        _ => format!("{} wins\nStreak: {}", clan.war_wins, clan.war_win_streak),
    }
}

fn clan_embed(clan: &Clan, color: u32) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(format!("{} ({})", clan.name, clan.tag))
        .url(format!(
            "https://link.clashofclans.com/en?action=OpenClanProfile&tag={}",
            clan.tag.trim_start_matches('#')
        ))
        .color(color)
        .description(clan.description.clone().unwrap_or_default())
        .field("Level", clan.clan_level.to_string(), true)
        .field("Members", format!("{}/50", clan.members), true)
        .field("Required Trophies", clan.required_trophies.to_string(), true)
        .field(
            "War League",
            clan.war_league
                .as_ref()
                .map_or("Unranked".to_string(), |l| l.name.clone()),
            true,
        )
        .field("War Log", war_record(clan), true)
        .field(
            "Location",
            clan.location
                .as_ref()
                .map_or("None".to_string(), |l| l.name.clone()),
            true,
        );

    if let Some(badge) = &clan.badge_urls {
        embed = embed.thumbnail(&badge.medium);
    }
    embed
}

/// Show a clan's profile
#[poise::command(
    slash_command,
    prefix_command,
    category = "Search",
    user_cooldown = 3
)]
pub async fn clan(
    ctx: Context<'_>,
    #[description = "Clan tag or alias"] tag: String,
) -> Result<(), Error> {
    ctx.defer().await?;
    let tag = resolve_clan_tag(ctx, &tag).await?;
    let clan = fetch_clan(ctx.data(), &tag).await?;

    ctx.send(CreateReply::default().embed(clan_embed(&clan, embed_color(ctx))))
        .await?;
    Ok(())
}

fn player_embed(player: &Player, color: u32) -> CreateEmbed {
    let clan = match &player.clan {
        Some(clan) => format!(
            "{} ({})\n{}",
            clan.name,
            clan.tag,
            player.role.as_deref().map_or("Member", role_name)
        ),
        None => "Not in a clan".to_string(),
    };

    CreateEmbed::default()
        .title(format!("{} ({})", player.name, player.tag))
        .color(color)
        .field("Town Hall", player.town_hall_level.to_string(), true)
        .field("Experience", player.exp_level.to_string(), true)
        .field(
            "Trophies",
            format!("{} (best {})", player.trophies, player.best_trophies),
            true,
        )
        .field("War Stars", player.war_stars.to_string(), true)
        .field(
            "Attacks / Defenses",
            format!("{} / {}", player.attack_wins, player.defense_wins),
            true,
        )
        .field(
            "Donations",
            format!("{} given, {} received", player.donations, player.donations_received),
            true,
        )
        .field("Clan", clan, false)
        .footer(CreateEmbedFooter::new(
            player
                .league
                .as_ref()
                .map_or("Unranked".to_string(), |l| l.name.clone()),
        ))
}

fn role_name(role: &str) -> &str {
    match role {
        "leader" => "Leader",
        "coLeader" => "Co-Leader",
        "admin" => "Elder",
        _ => "Member",
    }
}

/// Show a player's profile
#[poise::command(
    slash_command,
    prefix_command,
    category = "Search",
    user_cooldown = 3
)]
pub async fn player(
    ctx: Context<'_>,
    #[description = "Player tag"] tag: Option<String>,
    #[description = "Show this user's default linked account"] user: Option<User>,
) -> Result<(), Error> {
    ctx.defer().await?;

    let tag = match tag {
        Some(tag) => normalize_tag(&tag)?,
        None => {
            let user = user.as_ref().unwrap_or_else(|| ctx.author());
            let account = ctx.data().db.find_links(&user.id.get().to_string()).await?;
            account
                .as_ref()
                .and_then(|a| a.default_tag())
                .map(String::from)
                .ok_or_else(|| {
                    BotError::NotFound(format!(
                        "{} has no linked accounts. Use `/link add` first.",
                        user.name
                    ))
                })?
        }
    };

    let player = fetch_player(ctx.data(), &tag).await?;
    ctx.send(CreateReply::default().embed(player_embed(&player, embed_color(ctx))))
        .await?;
    Ok(())
}
