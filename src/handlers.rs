use crate::audit::{AuditLevel, AuditRecord};
use crate::discord::{ChannelReport, PermissionReport, channel_report, permission_report};
use crate::enforcement::{CheckOutcome, Member, SchedulerHandle};
use crate::{Data, EVENT_TARGET, Error};
use poise::serenity_prelude::{self as serenity, Cache, ChannelId, FullEvent, GuildId};
use tracing::{debug, info, warn};

/// Gateway events consumed by the bot
pub async fn event_handler(
    ctx: &serenity::Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        // The cache may not be fully populated yet
        FullEvent::Ready { data_about_bot } => {
            info!(
                target: EVENT_TARGET,
                "Connected as {}, shard {}", data_about_bot.user.name, ctx.shard_id
            );
        }
        FullEvent::CacheReady { guilds } => {
            let guild_count_cache = ctx.cache.guild_count();
            let guild_count = guilds.len();
            if guild_count != guild_count_cache {
                warn!(
                    target: EVENT_TARGET,
                    "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
                );
            }
            info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");

            let findings = permission_findings(&ctx.cache, data);
            let audit = data.engine().audit();
            for record in findings {
                audit.record(record).await;
            }
        }
        FullEvent::GuildMemberAddition { new_member } => {
            member_joined(
                &data.scheduler,
                data.config.target_guild,
                new_member.guild_id,
                Member::from(new_member),
            )
            .await;
        }
        _ => {}
    }
    Ok(())
}

/// Audit records for missing permissions, inaccessible guilds and unusable channels
#[must_use]
pub fn permission_findings(cache: &Cache, data: &Data) -> Vec<AuditRecord> {
    let config = &data.config;
    let guilds = [
        ("reference", config.reference_guild, data.reference_name()),
        ("target", config.target_guild, data.target_name()),
    ];

    let mut findings = Vec::new();
    for (role, guild_id, name) in guilds {
        let report = permission_report(cache, guild_id);
        if let Some(message) = describe_permission_report(role, guild_id, name, &report) {
            findings.push(AuditRecord::new(AuditLevel::Critical, message));
        }
    }
    if !findings.is_empty() {
        findings.push(AuditRecord::new(
            AuditLevel::Warning,
            "Bot is missing required permissions. Some features may not work.",
        ));
    }

    let guild_ids = [config.target_guild, config.reference_guild];
    let channels = [
        ("Warning", config.warning_channel),
        ("Log", config.log_channel),
    ];
    for (kind, channel_id) in channels {
        let Some(channel_id) = channel_id else {
            continue;
        };
        let report = channel_report(cache, &guild_ids, channel_id);
        if let Some(message) = describe_channel_report(kind, channel_id, &report) {
            findings.push(AuditRecord::new(AuditLevel::Warning, message));
        }
    }
    findings
}

/// Operator-facing summary of one channel's report, `None` when the channel is usable
#[must_use]
pub fn describe_channel_report(
    kind: &str,
    channel_id: ChannelId,
    report: &ChannelReport,
) -> Option<String> {
    match report {
        ChannelReport::NotFound => Some(format!("{kind} channel not found (ID: {channel_id})")),
        ChannelReport::Unknown => {
            warn!(
                target: EVENT_TARGET,
                %channel_id,
                "Own member entry not cached, skipping channel permission check"
            );
            None
        }
        ChannelReport::Missing(missing) if missing.is_empty() => None,
        ChannelReport::Missing(missing) => Some(format!(
            "Bot doesn't have required permissions in {} channel (<#{channel_id}>): {}",
            kind.to_lowercase(),
            missing.join(", ")
        )),
    }
}

/// Operator-facing summary of one guild's permission report, `None` when nothing is missing
#[must_use]
pub fn describe_permission_report(
    role: &str,
    guild_id: GuildId,
    name: &str,
    report: &PermissionReport,
) -> Option<String> {
    match report {
        PermissionReport::GuildUnavailable => {
            Some(format!("Cannot access {role} server {name} (ID: {guild_id})"))
        }
        PermissionReport::Unknown => {
            warn!(
                target: EVENT_TARGET,
                %guild_id,
                "Own member entry not cached, skipping permission check"
            );
            None
        }
        PermissionReport::Missing(missing) if missing.is_empty() => None,
        PermissionReport::Missing(missing) => Some(format!(
            "Missing required permissions in {role} server {name}: {}",
            missing.join(", ")
        )),
    }
}

/// Run the join check when `guild_id` is the target guild
pub async fn member_joined(
    scheduler: &SchedulerHandle,
    target_guild: GuildId,
    guild_id: GuildId,
    member: Member,
) -> Option<CheckOutcome> {
    if guild_id != target_guild {
        debug!(target: EVENT_TARGET, %guild_id, "Ignoring join outside the target guild");
        return None;
    }
    let outcome = scheduler.member_joined(&member).await;
    info!(
        target: EVENT_TARGET,
        user_id = %member.id,
        outcome = %outcome,
        "Join check completed for {}", member.name
    );
    Some(outcome)
}
