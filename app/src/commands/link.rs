use poise::serenity_prelude::{CreateEmbed, GuildId, RoleId, User, UserId};
use poise::CreateReply;
use std::collections::HashMap;
use tracing::{info, warn};

use super::{embed_color, fetch_player};
use crate::coc::models::Player;
use crate::coc::tags::normalize_tag;
use crate::database::{LinkOutcome, LinkedAccount};
use crate::error::BotError;
use crate::settings::keys;
use crate::{Context, Error};

/// Link Clash of Clans accounts to your Discord account
#[poise::command(
    slash_command,
    prefix_command,
    category = "Link",
    subcommands("add", "remove", "list"),
    subcommand_required
)]
pub async fn link(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Link a player account
#[poise::command(slash_command, prefix_command, user_cooldown = 5)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Player tag"] tag: String,
    #[description = "Make this your default account"] default: Option<bool>,
) -> Result<(), Error> {
    let tag = normalize_tag(&tag)?;
    let user = ctx.author().id.get().to_string();

    if let Some(owner) = ctx.data().db.find_link_owner(&tag).await? {
        if owner.user != user {
            return Err(BotError::Rejected(format!(
                "{tag} is already linked to another user."
            ))
            .into());
        }
    }

    let player = fetch_player(ctx.data(), &tag).await?;

    let outcome = ctx
        .data()
        .db
        .add_link(&user, &player.tag, default.unwrap_or(false))
        .await?;

    if let Some(guild_id) = ctx.guild_id() {
        grant_family_role(ctx, guild_id, ctx.author().id, &player).await;
    }

    let message = match outcome {
        LinkOutcome::Added => format!("Linked **{}** ({}).", player.name, player.tag),
        LinkOutcome::AlreadyLinked => {
            format!("**{}** ({}) is already linked to you.", player.name, player.tag)
        }
    };
    ctx.say(message).await?;
    Ok(())
}

/// Gives the guild's family role when the player is in one of its aliased clans.
async fn grant_family_role(
    ctx: Context<'_>,
    guild_id: GuildId,
    user_id: UserId,
    player: &Player,
) {
    let data = ctx.data();
    let role: String = data.settings.get(guild_id, keys::FAMILY_ROLE, String::new());
    let Ok(role_id) = role.parse::<u64>() else {
        return;
    };
    let Some(clan) = &player.clan else {
        return;
    };

    let guild = guild_id.get().to_string();
    let in_family = match data.db.list_aliases(&guild).await {
        Ok(aliases) => aliases.iter().any(|a| a.tag == clan.tag),
        Err(e) => {
            warn!("Failed to load aliases for {}: {}", guild_id, e);
            return;
        }
    };
    if !in_family || role_id == 0 {
        return;
    }

    match ctx
        .http()
        .add_member_role(guild_id, user_id, RoleId::new(role_id), Some("Linked a family account"))
        .await
    {
        Ok(()) => info!("Gave family role {} to {} in {}", role_id, user_id, guild_id),
        Err(e) => warn!("Failed to give family role in {}: {}", guild_id, e),
    }
}

/// Unlink a player account
#[poise::command(slash_command, prefix_command)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Player tag"] tag: String,
) -> Result<(), Error> {
    let tag = normalize_tag(&tag)?;
    let user = ctx.author().id.get().to_string();

    if !ctx.data().db.remove_link(&user, &tag).await? {
        return Err(BotError::NotFound(format!("{tag} isn't linked to you.")).into());
    }

    ctx.say(format!("Unlinked {tag}.")).await?;
    Ok(())
}

fn format_links(account: &LinkedAccount, names: &HashMap<String, String>) -> String {
    account
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let mut line = format!("`{}`", entry.tag);
            if let Some(name) = names.get(&entry.tag) {
                line.push(' ');
                line.push_str(name);
            }
            if i == 0 {
                line.push_str(" (default)");
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// List linked player accounts
#[poise::command(slash_command, prefix_command)]
pub async fn list(
    ctx: Context<'_>,
    #[description = "User to look up"] user: Option<User>,
) -> Result<(), Error> {
    let user = user.as_ref().unwrap_or_else(|| ctx.author());
    let account = ctx
        .data()
        .db
        .find_links(&user.id.get().to_string())
        .await?
        .filter(|a| !a.entries.is_empty())
        .ok_or_else(|| BotError::NotFound(format!("{} has no linked accounts.", user.name)))?;

    let tags: Vec<String> = account.entries.iter().map(|e| e.tag.clone()).collect();
    let names = ctx
        .data()
        .cache
        .get_players(&tags)
        .await
        .into_iter()
        .map(|p| (p.tag, p.name))
        .collect();

    let embed = CreateEmbed::default()
        .title(format!("Accounts linked to {}", user.name))
        .color(embed_color(ctx))
        .description(format_links(&account, &names));
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::LinkEntry;

    #[test]
    fn first_link_is_marked_default() {
        let account = LinkedAccount {
            user: "1".to_string(),
            entries: vec![
                LinkEntry {
                    tag: "#2PP".to_string(),
                    verified: false,
                },
                LinkEntry {
                    tag: "#8QU".to_string(),
                    verified: true,
                },
            ],
        };
        let names = HashMap::from([("#8QU".to_string(), "Alt".to_string())]);

        assert_eq!(
            format_links(&account, &names),
            "`#2PP` (default)\n`#8QU` Alt"
        );
    }
}
