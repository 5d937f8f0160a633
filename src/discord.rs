//! Discord implementation of the enforcement collaborators
//!
//! `DiscordGateway` reads rosters over HTTP, delivers notices as embeds and
//! kicks members from the target guild. `ChannelAuditSink` mirrors audit
//! records into a log channel.

use crate::audit::{AuditLevel, AuditRecord, AuditSink};
use crate::enforcement::{
    EnforcementError, EnforcementResult, Member, MemberRemover, MembershipSource, Notice,
    NoticeTone, Notifier, ReferenceMembership,
};
use poise::serenity_prelude::{
    self as serenity, Cache, ChannelId, Colour, CreateEmbed, CreateEmbedFooter, CreateMessage,
    GuildId, Http, Permissions, RoleId, Timestamp, UserId,
};
use std::sync::Arc;
use tracing::debug;

/// Page size for roster listing (Discord maximum)
const MEMBER_PAGE_SIZE: u64 = 1000;
/// Discord limit on audit-log reasons
const MAX_AUDIT_REASON: usize = 512;
/// Limit applied to error details in log channel embeds
const MAX_ERROR_DETAILS: usize = 1000;

/// HTTP status code carried by a serenity error, if any
fn status_code(error: &serenity::Error) -> Option<u16> {
    match error {
        serenity::Error::Http(http_error) => http_error.status_code().map(|s| s.as_u16()),
        _ => None,
    }
}

fn is_not_found(error: &serenity::Error) -> bool {
    status_code(error) == Some(404)
}

fn is_forbidden(error: &serenity::Error) -> bool {
    status_code(error) == Some(403)
}

/// Cut a string to at most `max` characters, marking the cut with "..."
#[must_use]
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

/// Render a notice's embed
#[must_use]
pub fn render_embed(notice: &Notice) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&notice.title)
        .colour(Colour::new(notice.tone.rgb()));
    // Discord rejects empty descriptions
    if !notice.description.is_empty() {
        embed = embed.description(&notice.description);
    }

    for field in &notice.fields {
        embed = embed.field(&field.name, &field.value, field.inline);
    }
    if let Some(footer) = &notice.footer {
        embed = embed.footer(CreateEmbedFooter::new(footer));
    }
    if let Some(timestamp) = notice.timestamp {
        if let Ok(timestamp) = Timestamp::from_unix_timestamp(timestamp.timestamp()) {
            embed = embed.timestamp(timestamp);
        }
    }

    embed
}

/// Render a notice as a Discord message
#[must_use]
pub fn render_notice(notice: &Notice) -> CreateMessage {
    let mut message = CreateMessage::new().embed(render_embed(notice));
    if let Some(content) = &notice.content {
        message = message.content(content);
    }
    message
}

/// Reference/target guild access over the Discord HTTP API
#[derive(Clone)]
pub struct DiscordGateway {
    http: Arc<Http>,
    reference_guild: GuildId,
    target_guild: GuildId,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>, reference_guild: GuildId, target_guild: GuildId) -> Self {
        Self {
            http,
            reference_guild,
            target_guild,
        }
    }
}

#[async_trait::async_trait]
impl MembershipSource for DiscordGateway {
    async fn reference_membership(
        &self,
        user_id: UserId,
    ) -> EnforcementResult<Option<ReferenceMembership>> {
        match self.http.get_member(self.reference_guild, user_id).await {
            Ok(member) => Ok(Some(ReferenceMembership::from(&member))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(EnforcementError::lookup(&e)),
        }
    }

    async fn target_members(&self) -> EnforcementResult<Vec<Member>> {
        let mut members = Vec::new();
        let mut after: Option<UserId> = None;

        loop {
            let page = self
                .target_guild
                .members(&self.http, Some(MEMBER_PAGE_SIZE), after)
                .await
                .map_err(|e| EnforcementError::lookup(&e))?;

            let page_len = page.len();
            after = page.last().map(|member| member.user.id);
            members.extend(page.iter().map(Member::from));

            debug!("Fetched {page_len} target members ({} total)", members.len());
            if (page_len as u64) < MEMBER_PAGE_SIZE || after.is_none() {
                break;
            }
        }

        Ok(members)
    }

    async fn target_member(&self, user_id: UserId) -> EnforcementResult<Option<Member>> {
        match self.http.get_member(self.target_guild, user_id).await {
            Ok(member) => Ok(Some(Member::from(&member))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(EnforcementError::lookup(&e)),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordGateway {
    async fn send_direct(&self, user_id: UserId, notice: &Notice) -> EnforcementResult<()> {
        user_id
            .direct_message(self.http.as_ref(), render_notice(notice))
            .await
            .map(|_| ())
            .map_err(|e| EnforcementError::delivery(&e))
    }

    async fn post_to_channel(
        &self,
        channel_id: ChannelId,
        notice: &Notice,
    ) -> EnforcementResult<()> {
        channel_id
            .send_message(self.http.as_ref(), render_notice(notice))
            .await
            .map(|_| ())
            .map_err(|e| EnforcementError::delivery(&e))
    }
}

#[async_trait::async_trait]
impl MemberRemover for DiscordGateway {
    async fn remove_member(&self, user_id: UserId, reason: &str) -> EnforcementResult<()> {
        let reason = truncate(reason, MAX_AUDIT_REASON);
        match self
            .target_guild
            .kick_with_reason(&self.http, user_id, &reason)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_forbidden(&e) => Err(EnforcementError::RemovalDenied(e.to_string())),
            Err(e) => Err(EnforcementError::Removal(e.to_string())),
        }
    }
}

/// Posts audit records as embeds in a log channel
pub struct ChannelAuditSink {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelAuditSink {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

fn level_tone(level: AuditLevel) -> NoticeTone {
    match level {
        AuditLevel::Debug => NoticeTone::Neutral,
        AuditLevel::Info => NoticeTone::Info,
        AuditLevel::Warning => NoticeTone::Warning,
        AuditLevel::Error => NoticeTone::Danger,
        AuditLevel::Critical => NoticeTone::Critical,
    }
}

/// Log channel rendering of an audit record
#[must_use]
pub fn audit_notice(record: &AuditRecord) -> Notice {
    let mut notice = Notice::new(
        format!("{} Log", record.level),
        &record.message,
        level_tone(record.level),
    )
    .timestamp(record.timestamp);

    if let Some(error) = &record.error {
        notice = notice.field(
            "Error Details",
            format!("```\n{}\n```", truncate(error, MAX_ERROR_DETAILS)),
            false,
        );
    }
    notice
}

#[async_trait::async_trait]
impl AuditSink for ChannelAuditSink {
    fn name(&self) -> &'static str {
        "log_channel"
    }

    async fn record(&self, record: &AuditRecord) -> EnforcementResult<()> {
        self.channel_id
            .send_message(self.http.as_ref(), render_notice(&audit_notice(record)))
            .await
            .map(|_| ())
            .map_err(|e| EnforcementError::Audit(e.to_string()))
    }
}

/// Guild-level permissions the bot needs, with their display names
pub const REQUIRED_PERMISSIONS: [(Permissions, &str); 5] = [
    (Permissions::KICK_MEMBERS, "Kick Members"),
    (Permissions::SEND_MESSAGES, "Send Messages"),
    (Permissions::EMBED_LINKS, "Embed Links"),
    (Permissions::READ_MESSAGE_HISTORY, "Read Message History"),
    (Permissions::VIEW_CHANNEL, "View Channels"),
];

/// Names of required permissions not present in `granted`
#[must_use]
pub fn missing_permissions(granted: Permissions) -> Vec<&'static str> {
    if granted.administrator() {
        return Vec::new();
    }
    REQUIRED_PERMISSIONS
        .iter()
        .filter(|(permission, _)| !granted.contains(*permission))
        .map(|(_, name)| *name)
        .collect()
}

/// Outcome of inspecting the bot's own permissions in one guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionReport {
    /// The guild is not in the cache
    GuildUnavailable,
    /// The bot's member entry is not cached, permissions unknown
    Unknown,
    /// Required permissions that are missing (empty when all are granted)
    Missing(Vec<&'static str>),
}

/// Inspect the bot's guild-level permissions from the cache
#[must_use]
pub fn permission_report(cache: &Cache, guild_id: GuildId) -> PermissionReport {
    let bot_id = cache.current_user().id;
    let Some(guild) = cache.guild(guild_id) else {
        return PermissionReport::GuildUnavailable;
    };
    let Some(member) = guild.members.get(&bot_id) else {
        return PermissionReport::Unknown;
    };
    PermissionReport::Missing(missing_permissions(guild.member_permissions(member)))
}

/// Channel permissions the bot needs to post notices, with their display names
pub const REQUIRED_CHANNEL_PERMISSIONS: [(Permissions, &str); 3] = [
    (Permissions::VIEW_CHANNEL, "View Channel"),
    (Permissions::SEND_MESSAGES, "Send Messages"),
    (Permissions::EMBED_LINKS, "Embed Links"),
];

/// Names of required channel permissions not present in `granted`
#[must_use]
pub fn missing_channel_permissions(granted: Permissions) -> Vec<&'static str> {
    if granted.administrator() {
        return Vec::new();
    }
    REQUIRED_CHANNEL_PERMISSIONS
        .iter()
        .filter(|(permission, _)| !granted.contains(*permission))
        .map(|(_, name)| *name)
        .collect()
}

/// Outcome of inspecting the bot's permissions in one configured channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelReport {
    /// No cached guild in `guilds` has the channel
    NotFound,
    /// The bot's member entry is not cached, permissions unknown
    Unknown,
    /// Required permissions that are missing (empty when all are granted)
    Missing(Vec<&'static str>),
}

/// Inspect the bot's permissions in `channel_id`, looked up in `guilds`
#[must_use]
pub fn channel_report(cache: &Cache, guilds: &[GuildId], channel_id: ChannelId) -> ChannelReport {
    let bot_id = cache.current_user().id;
    for guild_id in guilds {
        let Some(guild) = cache.guild(*guild_id) else {
            continue;
        };
        let Some(channel) = guild.channels.get(&channel_id) else {
            continue;
        };
        let Some(member) = guild.members.get(&bot_id) else {
            return ChannelReport::Unknown;
        };
        return ChannelReport::Missing(missing_channel_permissions(
            guild.user_permissions_in(channel, member),
        ));
    }
    ChannelReport::NotFound
}

/// Guild name over HTTP, for use before the cache is populated
///
/// # Errors
///
/// Returns an error if the guild cannot be fetched.
pub async fn fetch_guild_name(http: &Http, guild_id: GuildId) -> Result<String, serenity::Error> {
    guild_id.to_partial_guild(http).await.map(|guild| guild.name)
}

/// Role name from the cache
#[must_use]
pub fn role_name(cache: &Cache, guild_id: GuildId, role_id: RoleId) -> Option<String> {
    cache
        .guild(guild_id)
        .and_then(|guild| guild.roles.get(&role_id).map(|role| role.name.clone()))
}
