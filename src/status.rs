//! Status report for the `status` command

use crate::config::Config;
use crate::enforcement::{NoticeTone, Notice, WarningRecord, format_hours};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::UserId;
use std::fmt::Write as _;

/// Most warned members listed in one report
pub const MAX_LISTED_WARNINGS: usize = 10;

/// Everything the status report shows, gathered at command time
#[derive(Debug, Clone)]
pub struct StatusReport<'a> {
    pub config: &'a Config,
    pub reference_name: &'a str,
    pub target_name: &'a str,
    /// Name of the required role, when the role criterion is active and it is cached
    pub required_role_name: Option<String>,
    pub warned: Vec<(UserId, WarningRecord)>,
    /// When the bot finished setup
    pub started_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// One line per warned member, oldest warning first, capped at [`MAX_LISTED_WARNINGS`]
#[must_use]
pub fn format_warned_members(warned: &[(UserId, WarningRecord)], now: DateTime<Utc>) -> String {
    if warned.is_empty() {
        return "None".to_string();
    }

    let mut sorted: Vec<_> = warned.iter().collect();
    sorted.sort_by_key(|(_, record)| record.warned_at);

    let mut result = String::new();
    for (user_id, record) in sorted.into_iter().take(MAX_LISTED_WARNINGS) {
        let hours = (now - record.warned_at).num_hours().max(0);
        let _ = writeln!(result, "<@{user_id}> - warned {hours}h ago");
    }
    if warned.len() > MAX_LISTED_WARNINGS {
        let _ = write!(result, "...and {} more", warned.len() - MAX_LISTED_WARNINGS);
    }
    result.trim_end().to_string()
}

/// Elapsed time as `<hours>h <minutes>m`
#[must_use]
pub fn format_uptime(started_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - started_at).num_minutes().max(0);
    format!("{}h {}m", minutes / 60, minutes % 60)
}

fn format_exempt_roles(config: &Config) -> String {
    if config.exempt_roles.is_empty() {
        return "None".to_string();
    }
    let mut ids: Vec<u64> = config.exempt_roles.iter().map(|role| role.get()).collect();
    ids.sort_unstable();
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl StatusReport<'_> {
    /// Render the report as an embed notice
    #[must_use]
    pub fn to_notice(&self) -> Notice {
        let config = self.config;
        let mut notice = Notice::new("Member Sentry - Status", "", NoticeTone::Info)
            .field("Active Criteria", config.criterion.to_string(), false)
            .field(
                "Reference Server",
                format!("{} (ID: {})", self.reference_name, config.reference_guild),
                true,
            )
            .field(
                "Target Server",
                format!("{} (ID: {})", self.target_name, config.target_guild),
                true,
            );

        if let Some(role) = config.criterion.required_role() {
            let name = self.required_role_name.as_deref().unwrap_or("Not Found");
            notice = notice.field("Required Role", format!("{name} (ID: {role})"), false);
        }

        notice
            .field(
                "Warning Period",
                format!("{} hours", format_hours(config.grace_period_secs)),
                true,
            )
            .field(
                "Check Interval",
                format!("{} seconds", config.check_interval.as_secs()),
                true,
            )
            .field("Exempt Roles", format_exempt_roles(config), false)
            .field("Uptime", format_uptime(self.started_at, self.now), true)
            .field(
                format!("Currently Warned Users ({})", self.warned.len()),
                format_warned_members(&self.warned, self.now),
                false,
            )
            .timestamp(self.now)
    }
}
