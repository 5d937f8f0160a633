//! Bot configuration
//!
//! Settings come from an optional YAML file and the process environment
//! (after loading `.env`); environment values win. Anything missing or
//! malformed is a [`ConfigError`] and the bot refuses to start.

use crate::audit::AuditLevel;
use crate::enforcement::{ComplianceCriterion, NoticeTemplates};
use poise::serenity_prelude::{ChannelId, GuildId, RoleId};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the YAML config file
pub const CONFIG_PATH_ENV: &str = "MEMBER_SENTRY_CONFIG";
/// Config file used when `MEMBER_SENTRY_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/member_sentry.yaml";

const DEFAULT_CHECK_INTERVAL: u64 = 3600;
const DEFAULT_WARNING_SECONDS: u64 = 16800;
const DEFAULT_STARTUP_DELAY: u64 = 10;
/// Ten years; keeps the grace period representable as a timestamp offset
const MAX_WARNING_SECONDS: u64 = 315_360_000;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Role criterion selected but REQUIRED_ROLE_ID is not set")]
    MissingRequiredRole,

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Unvalidated settings from a single source
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub token: Option<String>,
    pub reference_guild_id: Option<u64>,
    pub target_guild_id: Option<u64>,
    pub active_criteria: Option<String>,
    pub required_role_id: Option<u64>,
    pub exempt_roles: Option<Vec<u64>>,
    pub invite_link: Option<String>,
    pub check_interval: Option<u64>,
    pub warning_seconds: Option<u64>,
    pub startup_delay: Option<u64>,
    pub warning_channel_id: Option<u64>,
    pub log_channel_id: Option<u64>,
    pub log_level: Option<String>,
    pub mod_role_ids: Option<Vec<u64>>,
    pub reference_server_name: Option<String>,
    pub target_server_name: Option<String>,
    pub audit_webhook_url: Option<String>,
    pub audit_webhook_secret: Option<String>,
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_id_list(key: &'static str, value: &str) -> Result<Vec<u64>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_u64(key, part))
        .collect()
}

/// Seconds given as an integer or a float, as older deployments used floats
fn parse_seconds(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::Invalid {
        key,
        value: value.to_string(),
    };
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Ok(seconds);
    }
    let seconds: f64 = value.trim().parse().map_err(|_| invalid())?;
    if !seconds.is_finite() || seconds < 0.0 || seconds > MAX_WARNING_SECONDS as f64 {
        return Err(invalid());
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(seconds.round() as u64)
}

impl RawConfig {
    /// Read settings through `lookup`, usually the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for values that do not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| lookup(*key).filter(|value| !value.trim().is_empty()))
        };

        Ok(Self {
            token: get(&["DISCORD_TOKEN", "TOKEN"]),
            reference_guild_id: get(&["REFERENCE_GUILD_ID", "SERVER_A_ID"])
                .map(|v| parse_u64("REFERENCE_GUILD_ID", &v))
                .transpose()?,
            target_guild_id: get(&["TARGET_GUILD_ID", "SERVER_B_ID"])
                .map(|v| parse_u64("TARGET_GUILD_ID", &v))
                .transpose()?,
            active_criteria: get(&["ACTIVE_CRITERIA"]),
            required_role_id: get(&["REQUIRED_ROLE_ID", "ROLE_X_ID"])
                .map(|v| parse_u64("REQUIRED_ROLE_ID", &v))
                .transpose()?,
            exempt_roles: get(&["EXEMPT_ROLES"])
                .map(|v| parse_id_list("EXEMPT_ROLES", &v))
                .transpose()?,
            invite_link: get(&["INVITE_LINK"]),
            check_interval: get(&["CHECK_INTERVAL"])
                .map(|v| parse_u64("CHECK_INTERVAL", &v))
                .transpose()?,
            warning_seconds: get(&["WARNING_SECONDS"])
                .map(|v| parse_seconds("WARNING_SECONDS", &v))
                .transpose()?,
            startup_delay: get(&["STARTUP_DELAY"])
                .map(|v| parse_u64("STARTUP_DELAY", &v))
                .transpose()?,
            warning_channel_id: get(&["WARNING_CHANNEL_ID"])
                .map(|v| parse_u64("WARNING_CHANNEL_ID", &v))
                .transpose()?,
            log_channel_id: get(&["LOG_CHANNEL_ID"])
                .map(|v| parse_u64("LOG_CHANNEL_ID", &v))
                .transpose()?,
            log_level: get(&["LOG_LEVEL"]),
            mod_role_ids: get(&["MOD_ROLE_IDS"])
                .map(|v| parse_id_list("MOD_ROLE_IDS", &v))
                .transpose()?,
            reference_server_name: get(&["REFERENCE_SERVER_NAME"]),
            target_server_name: get(&["TARGET_SERVER_NAME"]),
            audit_webhook_url: get(&["AUDIT_WEBHOOK_URL"]),
            audit_webhook_secret: get(&["AUDIT_WEBHOOK_SECRET"]),
        })
    }

    /// Parse a YAML document
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] when the document is malformed.
    pub fn from_yaml(path: &str, yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Yaml {
            path: path.to_string(),
            source,
        })
    }

    /// Read a YAML file; a missing file yields empty settings
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        match std::fs::read_to_string(path) {
            Ok(yaml) => Self::from_yaml(&display, &yaml),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: display,
                source,
            }),
        }
    }

    /// Settings from `self`, with any value present in `higher` taking precedence
    #[must_use]
    pub fn overlay(self, higher: Self) -> Self {
        Self {
            token: higher.token.or(self.token),
            reference_guild_id: higher.reference_guild_id.or(self.reference_guild_id),
            target_guild_id: higher.target_guild_id.or(self.target_guild_id),
            active_criteria: higher.active_criteria.or(self.active_criteria),
            required_role_id: higher.required_role_id.or(self.required_role_id),
            exempt_roles: higher.exempt_roles.or(self.exempt_roles),
            invite_link: higher.invite_link.or(self.invite_link),
            check_interval: higher.check_interval.or(self.check_interval),
            warning_seconds: higher.warning_seconds.or(self.warning_seconds),
            startup_delay: higher.startup_delay.or(self.startup_delay),
            warning_channel_id: higher.warning_channel_id.or(self.warning_channel_id),
            log_channel_id: higher.log_channel_id.or(self.log_channel_id),
            log_level: higher.log_level.or(self.log_level),
            mod_role_ids: higher.mod_role_ids.or(self.mod_role_ids),
            reference_server_name: higher.reference_server_name.or(self.reference_server_name),
            target_server_name: higher.target_server_name.or(self.target_server_name),
            audit_webhook_url: higher.audit_webhook_url.or(self.audit_webhook_url),
            audit_webhook_secret: higher.audit_webhook_secret.or(self.audit_webhook_secret),
        }
    }
}

/// Bot token, kept out of debug output
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token(***)")
    }
}

/// Webhook audit sink settings
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    pub url: String,
    pub secret: String,
}

impl Debug for WebhookSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("url", &self.url)
            .field("secret", &"***")
            .finish()
    }
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub token: Token,
    pub reference_guild: GuildId,
    pub target_guild: GuildId,
    pub criterion: ComplianceCriterion,
    pub exempt_roles: HashSet<RoleId>,
    pub invite_link: String,
    pub check_interval: Duration,
    pub grace_period_secs: u64,
    pub startup_delay: Duration,
    pub warning_channel: Option<ChannelId>,
    pub log_channel: Option<ChannelId>,
    pub audit_level: AuditLevel,
    pub moderator_roles: Vec<RoleId>,
    pub reference_name: String,
    pub target_name: String,
    pub audit_webhook: Option<WebhookSettings>,
}

fn guild(key: &'static str, value: Option<u64>) -> Result<GuildId, ConfigError> {
    match value {
        Some(id) if id != 0 => Ok(GuildId::new(id)),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn channel(value: Option<u64>) -> Option<ChannelId> {
    value.filter(|id| *id != 0).map(ChannelId::new)
}

fn roles(values: Option<Vec<u64>>) -> impl Iterator<Item = RoleId> {
    values
        .unwrap_or_default()
        .into_iter()
        .filter(|id| *id != 0)
        .map(RoleId::new)
}

fn criterion(raw: &RawConfig) -> Result<ComplianceCriterion, ConfigError> {
    let selector = raw.active_criteria.as_deref().unwrap_or("1");
    match selector.trim().to_ascii_lowercase().as_str() {
        "1" | "membership" => Ok(ComplianceCriterion::ReferenceMembershipOnly),
        "2" | "role" => match raw.required_role_id {
            Some(role) if role != 0 => Ok(ComplianceCriterion::ReferenceMembershipWithRole(
                RoleId::new(role),
            )),
            _ => Err(ConfigError::MissingRequiredRole),
        },
        _ => Err(ConfigError::Invalid {
            key: "ACTIVE_CRITERIA",
            value: selector.to_string(),
        }),
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let token = raw
            .token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;
        let reference_guild = guild("REFERENCE_GUILD_ID", raw.reference_guild_id)?;
        let target_guild = guild("TARGET_GUILD_ID", raw.target_guild_id)?;
        let criterion = criterion(&raw)?;

        let check_interval = raw.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL);
        if check_interval == 0 {
            return Err(ConfigError::Invalid {
                key: "CHECK_INTERVAL",
                value: "0".to_string(),
            });
        }

        let grace_period_secs = raw.warning_seconds.unwrap_or(DEFAULT_WARNING_SECONDS);
        if grace_period_secs > MAX_WARNING_SECONDS {
            return Err(ConfigError::Invalid {
                key: "WARNING_SECONDS",
                value: grace_period_secs.to_string(),
            });
        }

        let audit_level = match raw.log_level.as_deref() {
            Some(level) => level.parse().map_err(|_| ConfigError::Invalid {
                key: "LOG_LEVEL",
                value: level.to_string(),
            })?,
            None => AuditLevel::Info,
        };

        let audit_webhook = match (raw.audit_webhook_url, raw.audit_webhook_secret) {
            (Some(url), Some(secret)) => Some(WebhookSettings { url, secret }),
            _ => None,
        };

        Ok(Self {
            token: Token(token),
            reference_guild,
            target_guild,
            criterion,
            exempt_roles: roles(raw.exempt_roles).collect(),
            invite_link: raw.invite_link.unwrap_or_default(),
            check_interval: Duration::from_secs(check_interval),
            grace_period_secs,
            startup_delay: Duration::from_secs(raw.startup_delay.unwrap_or(DEFAULT_STARTUP_DELAY)),
            warning_channel: channel(raw.warning_channel_id),
            log_channel: channel(raw.log_channel_id),
            audit_level,
            moderator_roles: roles(raw.mod_role_ids).collect(),
            reference_name: raw
                .reference_server_name
                .unwrap_or_else(|| "Reference Server Name Not Set".to_string()),
            target_name: raw
                .target_server_name
                .unwrap_or_else(|| "Target Server Name Not Set".to_string()),
            audit_webhook,
        })
    }
}

/// The `.env` load error worth reporting, if any
///
/// A missing file is expected and yields `None`.
#[must_use]
pub fn dotenv_problem(
    result: Result<std::path::PathBuf, dotenvy::Error>,
) -> Option<dotenvy::Error> {
    match result {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}

impl Config {
    /// Load the YAML file and the environment, then validate
    ///
    /// Call after `dotenvy` so `.env` values are visible.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any source is unreadable or a required
    /// setting is missing or invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let file = RawConfig::from_file(Path::new(&path))?;
        let env = RawConfig::from_lookup(|key| std::env::var(key).ok())?;
        Self::try_from(file.overlay(env))
    }

    /// Grace period as a timestamp offset
    #[must_use]
    pub fn grace_period(&self) -> chrono::Duration {
        // Bounded by MAX_WARNING_SECONDS during validation
        chrono::Duration::seconds(i64::try_from(self.grace_period_secs).unwrap_or(i64::from(u32::MAX)))
    }

    /// Notice templates derived from these settings
    #[must_use]
    pub fn notice_templates(&self) -> NoticeTemplates {
        NoticeTemplates {
            invite_link: self.invite_link.clone(),
            grace_period_secs: self.grace_period_secs,
            requires_role: self.criterion.required_role().is_some(),
            moderator_role_ids: self.moderator_roles.clone(),
        }
    }
}
