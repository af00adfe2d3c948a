pub mod alias;
pub mod config;
pub mod flag;
pub mod help;
pub mod link;
pub mod search;
pub mod war;

use poise::serenity_prelude::GuildId;

use crate::coc::models::{Clan, Player};
use crate::coc::tags::{is_tag, normalize_tag};
use crate::error::{BotError, Result};
use crate::settings::{keys, SettingsTarget};
use crate::{Context, Data, Error};

const DEFAULT_EMBED_COLOR: u32 = 0x5970c1;
/// Discord's embed description limit.
pub const DESCRIPTION_LIMIT: usize = 4096;

pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        help::help(),
        search::clan(),
        search::player(),
        war::attacks(),
        war::cwl(),
        link::link(),
        flag::flag(),
        alias::alias(),
        config::config(),
    ]
}

pub fn require_guild(ctx: Context<'_>) -> Result<GuildId> {
    ctx.guild_id()
        .ok_or_else(|| BotError::Rejected("This command only works in a server.".to_string()))
}

pub fn embed_color(ctx: Context<'_>) -> u32 {
    guild_color(ctx.data(), ctx.guild_id())
}

pub fn guild_color(data: &Data, guild_id: Option<GuildId>) -> u32 {
    let target = guild_id.map_or(SettingsTarget::Global, SettingsTarget::Guild);
    data.settings
        .get_or_global(target, keys::COLOR, DEFAULT_EMBED_COLOR)
}

/// Resolves a tag or one of the guild's clan aliases to a clan tag.
pub async fn resolve_clan_tag(ctx: Context<'_>, input: &str) -> Result<String> {
    if is_tag(input) {
        return normalize_tag(input);
    }

    if let Some(guild_id) = ctx.guild_id() {
        let guild = guild_id.get().to_string();
        if let Some(alias) = ctx.data().db.find_alias(&guild, input.trim()).await? {
            return Ok(alias.tag);
        }
    }

    Err(BotError::InvalidTag(input.trim().to_string()))
}

pub async fn fetch_clan(data: &Data, tag: &str) -> Result<Clan> {
    if let Some(clan) = data.cache.get_clan(tag).await {
        return Ok(clan);
    }
    let clan = data.coc.get_clan(tag).await?;
    data.cache.set_clan(&clan).await;
    Ok(clan)
}

pub async fn fetch_player(data: &Data, tag: &str) -> Result<Player> {
    if let Some(player) = data.cache.get_player(tag).await {
        return Ok(player);
    }
    let player = data.coc.get_player(tag).await?;
    data.cache.set_player(&player).await;
    Ok(player)
}

/// Joins lines until the next one would exceed `limit` characters.
pub fn join_within(lines: impl IntoIterator<Item = String>, limit: usize) -> String {
    let mut out = String::new();
    for line in lines {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + line.chars().count() > limit {
            break;
        }
        if extra == 1 {
            out.push('\n');
        }
        out.push_str(&line);
    }
    out
}
