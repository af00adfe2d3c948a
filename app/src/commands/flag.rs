use mongodb::bson::DateTime;
use poise::serenity_prelude::{CreateEmbed, CreateEmbedFooter};
use poise::CreateReply;

use super::{embed_color, fetch_player, join_within, require_guild, DESCRIPTION_LIMIT};
use crate::coc::tags::normalize_tag;
use crate::database::{check_flag_quota, FlaggedUser};
use crate::error::BotError;
use crate::{Context, Error};

/// Flag players your clans shouldn't recruit
#[poise::command(
    slash_command,
    prefix_command,
    category = "Flag",
    guild_only,
    subcommands("add", "remove", "list", "search"),
    subcommand_required
)]
pub async fn flag(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

const MAX_REASON_LEN: usize = 1000;

fn validate_reason(reason: &str) -> Result<String, BotError> {
    let reason = reason.trim();
    if reason.is_empty() || reason.chars().count() > MAX_REASON_LEN {
        return Err(BotError::Rejected(format!(
            "Reasons must be 1 to {MAX_REASON_LEN} characters long."
        )));
    }
    Ok(reason.to_string())
}

fn relative_time(at: DateTime) -> String {
    format!("<t:{}:R>", at.timestamp_millis() / 1000)
}

/// Flag a player
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    user_cooldown = 5
)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Player tag"] tag: String,
    #[description = "Why the player is flagged"]
    #[max_length = 1000]
    #[rest]
    reason: String,
) -> Result<(), Error> {
    let guild = require_guild(ctx)?.get().to_string();
    let tag = normalize_tag(&tag)?;
    let reason = validate_reason(&reason)?;
    let db = &ctx.data().db;

    let existing = db.find_flag(&guild, &tag).await?;
    let count = db.count_flags(&guild).await?;
    let sponsor = db.is_sponsor(&guild).await?;
    check_flag_quota(count, existing.is_some(), sponsor)?;

    let player = fetch_player(ctx.data(), &tag).await?;
    let flag = FlaggedUser {
        guild,
        tag: player.tag.clone(),
        name: player.name.clone(),
        reason,
        user: ctx.author().id.get().to_string(),
        created_at: existing.as_ref().map_or_else(DateTime::now, |f| f.created_at),
    };
    if existing.is_some() {
        db.upsert_flag(&flag).await?;
    } else {
        db.insert_flag(&flag, sponsor).await?;
    }

    ctx.say(format!("Flagged **{}** ({}).", player.name, player.tag))
        .await?;
    Ok(())
}

/// Remove a player's flag
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Player tag"] tag: String,
) -> Result<(), Error> {
    let guild = require_guild(ctx)?.get().to_string();
    let tag = normalize_tag(&tag)?;

    if !ctx.data().db.delete_flag(&guild, &tag).await? {
        return Err(BotError::NotFound(format!("{tag} isn't flagged.")).into());
    }

    ctx.say(format!("Removed the flag on {tag}.")).await?;
    Ok(())
}

fn format_flag_line(flag: &FlaggedUser) -> String {
    format!(
        "`{}` **{}** {}",
        flag.tag,
        flag.name,
        relative_time(flag.created_at)
    )
}

/// List flagged players, newest first
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild = require_guild(ctx)?.get().to_string();
    let flags = ctx.data().db.list_flags(&guild).await?;

    if flags.is_empty() {
        ctx.say("No players are flagged in this server.").await?;
        return Ok(());
    }

    let description = join_within(flags.iter().map(format_flag_line), DESCRIPTION_LIMIT);
    let embed = CreateEmbed::default()
        .title("Flagged players")
        .color(embed_color(ctx))
        .description(description)
        .footer(CreateEmbedFooter::new(format!("{} flagged", flags.len())));
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Check whether a player is flagged
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn search(
    ctx: Context<'_>,
    #[description = "Player tag"] tag: String,
) -> Result<(), Error> {
    let guild = require_guild(ctx)?.get().to_string();
    let tag = normalize_tag(&tag)?;
    let flag = ctx
        .data()
        .db
        .find_flag(&guild, &tag)
        .await?
        .ok_or_else(|| BotError::NotFound(format!("{tag} isn't flagged.")))?;

    let embed = CreateEmbed::default()
        .title(format!("{} ({})", flag.name, flag.tag))
        .color(embed_color(ctx))
        .description(&flag.reason)
        .field("Flagged by", format!("<@{}>", flag.user), true)
        .field("Flagged", relative_time(flag.created_at), true);
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_lines_use_discord_timestamps() {
        let flag = FlaggedUser {
            guild: "1".to_string(),
            tag: "#2PP".to_string(),
            name: "Raider".to_string(),
            reason: "Hopping".to_string(),
            user: "2".to_string(),
            created_at: DateTime::from_millis(1_700_000_000_500),
        };
        assert_eq!(format_flag_line(&flag), "`#2PP` **Raider** <t:1700000000:R>");
    }

    #[test]
    fn reasons_are_trimmed_and_capped() {
        assert_eq!(validate_reason("  Hopping  ").unwrap(), "Hopping");
        assert_eq!(validate_reason(&"é".repeat(MAX_REASON_LEN)).unwrap().chars().count(), MAX_REASON_LEN);
        assert!(matches!(
            validate_reason(&"x".repeat(MAX_REASON_LEN + 1)),
            Err(BotError::Rejected(_))
        ));
        assert!(matches!(validate_reason("   "), Err(BotError::Rejected(_))));
    }
}
