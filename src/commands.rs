use crate::discord::{render_embed, role_name};
use crate::status::StatusReport;
use crate::{Data, Error, logging};
use chrono::Utc;
use poise::serenity_prelude as serenity;
use poise::{Context, CreateReply, FrameworkError, command};
use tracing::warn;

/// All administrative commands
#[must_use]
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![status(), checkall(), check()]
}

/// Show the current bot status and configuration
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn status(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let data = ctx.data();
    let config = &data.config;
    let required_role_name = config
        .criterion
        .required_role()
        .and_then(|role| role_name(ctx.cache(), config.reference_guild, role));

    let report = StatusReport {
        config,
        reference_name: data.reference_name(),
        target_name: data.target_name(),
        required_role_name,
        warned: data.engine().warned_members().await,
        started_at: data.started_at,
        now: Utc::now(),
    };

    ctx.send(CreateReply::default().embed(render_embed(&report.to_notice())))
        .await?;
    Ok(())
}

/// Check every member of the target server now
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn checkall(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    ctx.say("Starting manual check of all members...").await?;
    let report = ctx.data().scheduler.sweep_now().await?;
    ctx.say(format!("Manual check completed: {report}")).await?;
    Ok(())
}

/// Check a single member of the target server
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn check(
    ctx: Context<'_, Data, Error>,
    #[description = "Member to check"] user: serenity::User,
) -> Result<(), Error> {
    match ctx.data().scheduler.check_member(user.id).await? {
        Some((member, outcome)) => {
            ctx.say(format!("Check result for {}: {outcome}", member.name))
                .await?;
        }
        None => {
            ctx.say(format!(
                "User with ID {} not found in the target server.",
                user.id
            ))
            .await?;
        }
    }
    Ok(())
}

/// Log a framework error and tell the invoker what went wrong
pub async fn on_error(error: FrameworkError<'_, Data, Error>) {
    logging::log_command_error(&error);

    let reply = match error {
        FrameworkError::Command { error, ctx, .. } => {
            ctx.say(format!("Command error: {error}")).await
        }
        FrameworkError::MissingUserPermissions { ctx, .. } => {
            ctx.say("You don't have permission to use this command.")
                .await
        }
        FrameworkError::UnknownCommand { .. } => return,
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                warn!("Failed to report framework error: {e}");
            }
            return;
        }
    };

    if let Err(e) = reply {
        warn!("Failed to send error reply: {e}");
    }
}
