//! Warning and removal notices
//!
//! Notices are transport-neutral; the Discord adapter renders them as embeds.

use crate::enforcement::Member;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{Mentionable, RoleId};
use std::fmt::Write as _;

/// Visual tone of a notice, mapped to an embed colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeTone {
    Neutral,
    Info,
    Caution,
    Warning,
    Danger,
    Critical,
}

impl NoticeTone {
    /// RGB colour for this tone
    #[must_use]
    pub const fn rgb(self) -> u32 {
        match self {
            Self::Neutral => 0x0097_9C9F,
            Self::Info => 0x0034_98DB,
            Self::Caution => 0x00FE_E75C,
            Self::Warning => 0x00F1_C40F,
            Self::Danger => 0x00E7_4C3C,
            Self::Critical => 0x0099_2D22,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// A message sent to a member or posted to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Plain text sent alongside the embed (used for mentions)
    pub content: Option<String>,
    pub title: String,
    pub description: String,
    pub fields: Vec<NoticeField>,
    pub footer: Option<String>,
    pub tone: NoticeTone,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Notice {
    pub fn new(title: impl Into<String>, description: impl Into<String>, tone: NoticeTone) -> Self {
        Self {
            content: None,
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
            footer: None,
            tone,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(NoticeField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    #[must_use]
    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

const AUTOMATED_FOOTER: &str = "This is an automated message.";

/// Format a duration in seconds as hours, dropping the fraction when whole
#[must_use]
pub fn format_hours(seconds: u64) -> String {
    if seconds % 3600 == 0 {
        format!("{}", seconds / 3600)
    } else {
        #[allow(clippy::cast_precision_loss)]
        let hours = seconds as f64 / 3600.0;
        format!("{hours:.1}")
    }
}

/// Builds the member-facing and channel-facing notices
#[derive(Debug, Clone)]
pub struct NoticeTemplates {
    /// Invite link to the reference guild
    pub invite_link: String,
    /// Grace period in seconds
    pub grace_period_secs: u64,
    /// Whether the active criterion requires a role
    pub requires_role: bool,
    /// Roles pinged on kick posts
    pub moderator_role_ids: Vec<RoleId>,
}

impl NoticeTemplates {
    fn role_hint(&self) -> &'static str {
        if self.requires_role {
            "And get the required role"
        } else {
            ""
        }
    }

    /// Direct message sent on the first detected violation
    #[must_use]
    pub fn warning_dm(&self, reason: &str) -> Notice {
        Notice::new(
            "Warning: You may be removed from the server",
            format!("You are at risk of being removed because you are {reason}."),
            NoticeTone::Caution,
        )
        .field(
            format!(
                "You have {} hours to comply",
                format_hours(self.grace_period_secs)
            ),
            format!(
                "Join our main server using this link: {}\n{}",
                self.invite_link,
                self.role_hint()
            ),
            false,
        )
        .footer(AUTOMATED_FOOTER)
    }

    /// Post in the warning channel mirroring the warning DM
    #[must_use]
    pub fn warning_post(&self, member: &Member, reason: &str) -> Notice {
        Notice::new(
            format!("⚠️ Member Warning: {}", member.name),
            format!(
                "Member {} has been warned because they are {reason}.",
                member.mention()
            ),
            NoticeTone::Caution,
        )
        .content(format!("Hey {},", member.mention()))
        .field(
            "Action Required",
            format!(
                "User has {} hours to comply or will be removed.",
                format_hours(self.grace_period_secs)
            ),
            false,
        )
    }

    /// Direct message sent right before removal
    #[must_use]
    pub fn kick_dm(&self, reason: &str) -> Notice {
        Notice::new(
            "You have been removed from the server",
            format!("You were removed because you are {reason}."),
            NoticeTone::Danger,
        )
        .field(
            "How to rejoin",
            format!(
                "Join our main server first using this link: {}\n{}\nThen you can rejoin the server you were removed from.",
                self.invite_link,
                self.role_hint()
            ),
            false,
        )
        .footer(AUTOMATED_FOOTER)
    }

    /// Post in the warning channel announcing a removal
    #[must_use]
    pub fn kick_post(&self, member: &Member, reason: &str) -> Notice {
        let mut content = format!("Hey {},", member.mention());
        for role in &self.moderator_role_ids {
            let _ = write!(content, " {}", role.mention());
        }

        Notice::new(
            format!("🔨 Member Kicked: {}", member.name),
            format!(
                "Member {} has been kicked because they are {reason}.",
                member.mention()
            ),
            NoticeTone::Danger,
        )
        .content(content)
    }
}

/// Reason recorded in the guild audit log when removing a member
#[must_use]
pub fn removal_reason(reason: &str) -> String {
    format!("Failed to meet server criteria: {reason}")
}
