use mongodb::bson::Bson;
use poise::serenity_prelude::{CreateEmbed, Role};
use poise::CreateReply;

use super::{embed_color, require_guild};
use crate::error::BotError;
use crate::settings::{keys, SettingsTarget};
use crate::{Context, Error};

const MAX_PREFIX_LEN: usize = 5;

/// Server settings
#[poise::command(
    slash_command,
    prefix_command,
    category = "Config",
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("show", "prefix", "color", "family_role", "reset", "clear"),
    subcommand_required
)]
pub async fn config(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Parses `#5970c1`, `0x5970c1` or `5970c1` into an RGB value.
fn parse_color(input: &str) -> Result<u32, BotError> {
    let hex = input.trim();
    let hex = hex
        .strip_prefix('#')
        .or_else(|| hex.strip_prefix("0x"))
        .unwrap_or(hex);

    match u32::from_str_radix(hex, 16) {
        Ok(value) if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) => Ok(value),
        _ => Err(BotError::Rejected(format!(
            "`{}` isn't a hex color like `#5970c1`.",
            input.trim()
        ))),
    }
}

fn describe_setting(key: &str, value: &Bson) -> String {
    match (key, value) {
        (keys::COLOR, Bson::Int32(v)) => format!("#{v:06x}"),
        (keys::COLOR, Bson::Int64(v)) => format!("#{v:06x}"),
        (keys::FAMILY_ROLE, Bson::String(id)) => format!("<@&{id}>"),
        (_, Bson::String(s)) => format!("`{s}`"),
        (_, other) => other.to_string(),
    }
}

/// Show the current settings
#[poise::command(slash_command, prefix_command, required_permissions = "MANAGE_GUILD")]
pub async fn show(
    ctx: Context<'_>,
    #[description = "Guild id or \"global\" (bot owners only)"] target: Option<String>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let target = match target {
        Some(raw) => {
            let target: SettingsTarget = raw.trim().parse()?;
            let is_owner = ctx
                .framework()
                .options()
                .owners
                .contains(&ctx.author().id);
            if target != SettingsTarget::Guild(guild_id) && !is_owner {
                return Err(BotError::Rejected(
                    "Only bot owners can view other settings.".to_string(),
                )
                .into());
            }
            target
        }
        None => SettingsTarget::Guild(guild_id),
    };

    let entries = ctx.data().settings.entries(target);
    let description = if entries.is_empty() {
        "Nothing is configured; defaults are in use.".to_string()
    } else {
        entries
            .iter()
            .filter(|(key, _)| key.as_str() != "_id")
            .map(|(key, value)| format!("**{key}**: {}", describe_setting(key, value)))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let embed = CreateEmbed::default()
        .title(format!("Settings for {target}"))
        .color(embed_color(ctx))
        .description(description);
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Set the prefix for text commands
#[poise::command(slash_command, prefix_command, required_permissions = "MANAGE_GUILD")]
pub async fn prefix(
    ctx: Context<'_>,
    #[description = "New prefix"] prefix: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let prefix = prefix.trim();
    if prefix.is_empty() || prefix.chars().count() > MAX_PREFIX_LEN {
        return Err(BotError::Rejected(format!(
            "Prefixes must be 1 to {MAX_PREFIX_LEN} characters long."
        ))
        .into());
    }

    ctx.data().settings.set(guild_id, keys::PREFIX, prefix).await?;
    ctx.say(format!("Prefix set to `{prefix}`.")).await?;
    Ok(())
}

/// Set the embed color
#[poise::command(slash_command, prefix_command, required_permissions = "MANAGE_GUILD")]
pub async fn color(
    ctx: Context<'_>,
    #[description = "Hex color, e.g. #5970c1"] color: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let value = parse_color(&color)?;

    ctx.data().settings.set(guild_id, keys::COLOR, value).await?;
    let embed = CreateEmbed::default()
        .description(format!("Embed color set to `#{value:06x}`."))
        .color(value);
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Set the role given to members who link an account in one of your clans
#[poise::command(
    slash_command,
    prefix_command,
    required_permissions = "MANAGE_GUILD",
    rename = "family-role"
)]
pub async fn family_role(
    ctx: Context<'_>,
    #[description = "Role to give"] role: Role,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data()
        .settings
        .set(guild_id, keys::FAMILY_ROLE, role.id.get().to_string())
        .await?;
    ctx.say(format!("Family role set to {}.", role.name)).await?;
    Ok(())
}

/// Reset one setting to its default
#[poise::command(slash_command, prefix_command, required_permissions = "MANAGE_GUILD")]
pub async fn reset(
    ctx: Context<'_>,
    #[description = "Setting name (PREFIX, COLOR, FAMILY_ROLE)"] key: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let key = key.trim().to_uppercase().replace('-', "_");
    let Some(key) = keys::ALL.iter().find(|k| **k == key) else {
        return Err(BotError::Rejected(format!(
            "Unknown setting `{key}`. Known settings: {}.",
            keys::ALL.join(", ")
        ))
        .into());
    };

    ctx.data().settings.delete(guild_id, key).await;
    ctx.say(format!("Reset **{key}**.")).await?;
    Ok(())
}

/// Reset every setting to its default
#[poise::command(slash_command, prefix_command, required_permissions = "MANAGE_GUILD")]
pub async fn clear(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data().settings.clear(guild_id).await;
    ctx.say("All settings were reset.").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_color("#5970c1").unwrap(), 0x5970c1);
        assert_eq!(parse_color("0xFFFFFF").unwrap(), 0xffffff);
        assert_eq!(parse_color(" 000000 ").unwrap(), 0);
    }

    #[test]
    fn rejects_malformed_colors() {
        assert!(parse_color("#fff").is_err());
        assert!(parse_color("blue").is_err());
        assert!(parse_color("#1234567").is_err());
        assert!(parse_color("+12345").is_err());
    }

    #[test]
    fn settings_are_described_readably() {
        assert_eq!(describe_setting(keys::COLOR, &Bson::Int64(0x5970c1)), "#5970c1");
        assert_eq!(
            describe_setting(keys::FAMILY_ROLE, &Bson::String("42".to_string())),
            "<@&42>"
        );
        assert_eq!(describe_setting(keys::PREFIX, &Bson::String("?".to_string())), "`?`");
    }
}
