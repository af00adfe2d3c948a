use poise::serenity_prelude::CreateEmbed;
use poise::CreateReply;
use std::collections::HashMap;

use super::{embed_color, fetch_clan, join_within, require_guild, DESCRIPTION_LIMIT};
use crate::coc::tags::{is_tag, normalize_tag};
use crate::database::ClanAlias;
use crate::error::BotError;
use crate::{Context, Error};

const MAX_ALIAS_LEN: usize = 15;

/// Short names for your server's clans
#[poise::command(
    slash_command,
    prefix_command,
    category = "Config",
    guild_only,
    subcommands("add", "remove", "list"),
    subcommand_required
)]
pub async fn alias(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

fn validate_alias(alias: &str) -> Result<String, BotError> {
    let alias = alias.trim().to_lowercase();
    if alias.is_empty() || alias.chars().count() > MAX_ALIAS_LEN {
        return Err(BotError::Rejected(format!(
            "Aliases must be 1 to {MAX_ALIAS_LEN} characters long."
        )));
    }
    if alias.contains(char::is_whitespace) {
        return Err(BotError::Rejected("Aliases can't contain spaces.".to_string()));
    }
    if is_tag(&alias) {
        return Err(BotError::Rejected(format!(
            "`{alias}` looks like a tag and can't be used as an alias."
        )));
    }
    Ok(alias)
}

/// Add or update a clan alias
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Short name for the clan"] alias: String,
    #[description = "Clan tag"] tag: String,
) -> Result<(), Error> {
    let guild = require_guild(ctx)?.get().to_string();
    let alias = validate_alias(&alias)?;
    let clan = fetch_clan(ctx.data(), &normalize_tag(&tag)?).await?;

    ctx.data()
        .db
        .upsert_alias(&ClanAlias {
            guild,
            alias: alias.clone(),
            tag: clan.tag.clone(),
            name: clan.name.clone(),
        })
        .await?;

    ctx.say(format!("`{alias}` now points to **{}** ({}).", clan.name, clan.tag))
        .await?;
    Ok(())
}

/// Remove a clan alias
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Alias to remove"] alias: String,
) -> Result<(), Error> {
    let guild = require_guild(ctx)?.get().to_string();
    let alias = alias.trim().to_lowercase();

    if !ctx.data().db.delete_alias(&guild, &alias).await? {
        return Err(BotError::NotFound(format!("There is no alias `{alias}`.")).into());
    }

    ctx.say(format!("Removed the alias `{alias}`.")).await?;
    Ok(())
}

/// List this server's clan aliases
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild = require_guild(ctx)?.get().to_string();
    let aliases = ctx.data().db.list_aliases(&guild).await?;

    if aliases.is_empty() {
        ctx.say("This server has no clan aliases.").await?;
        return Ok(());
    }

    let tags: Vec<String> = aliases.iter().map(|a| a.tag.clone()).collect();
    let members: HashMap<String, u32> = ctx
        .data()
        .cache
        .get_clans(&tags)
        .await
        .into_iter()
        .map(|c| (c.tag, c.members))
        .collect();

    let lines = aliases.iter().map(|a| match members.get(&a.tag) {
        Some(count) => format!("`{}` **{}** ({}) {}/50", a.alias, a.name, a.tag, count),
        None => format!("`{}` **{}** ({})", a.alias, a.name, a.tag),
    });

    let embed = CreateEmbed::default()
        .title("Clan aliases")
        .color(embed_color(ctx))
        .description(join_within(lines, DESCRIPTION_LIMIT));
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_lowercased() {
        assert_eq!(validate_alias("  Main ").unwrap(), "main");
    }

    #[test]
    fn tags_and_spaces_are_rejected() {
        assert!(matches!(validate_alias("#2PP"), Err(BotError::Rejected(_))));
        assert!(matches!(validate_alias("two words"), Err(BotError::Rejected(_))));
        assert!(matches!(validate_alias(""), Err(BotError::Rejected(_))));
        assert!(matches!(
            validate_alias("a-very-long-alias-name"),
            Err(BotError::Rejected(_))
        ));
    }
}
