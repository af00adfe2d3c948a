use crate::{Context, Error};

/// Show the command list or help for one command
#[poise::command(slash_command, prefix_command, category = "Util", track_edits)]
pub async fn help(
    ctx: Context<'_>,
    #[description = "Command to show help for"]
    #[rest]
    command: Option<String>,
) -> Result<(), Error> {
    let config = poise::builtins::HelpConfiguration {
        extra_text_at_bottom: "Commands that take a clan tag also accept one of this server's aliases.",
        ephemeral: true,
        ..Default::default()
    };
    poise::builtins::help(ctx, command.as_deref(), config).await?;
    Ok(())
}
