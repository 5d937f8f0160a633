//! Best-effort audit trail
//!
//! Every record goes through `tracing`. Records at or above the configured
//! minimum level are also fanned out to the configured sinks (log channel,
//! webhook). A failing sink is logged and otherwise ignored.

use crate::enforcement::{EnforcementError, EnforcementResult};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::UserId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Target for audit records in the tracing output
pub const AUDIT_TARGET: &str = "member_sentry::audit";

/// Severity of an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuditLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Default for AuditLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl Display for AuditLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for AuditLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// A single audit entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub level: AuditLevel,
    pub message: String,
    pub user_id: Option<UserId>,
    pub user_name: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(level: AuditLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            user_id: None,
            user_name: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn user(mut self, user_id: UserId, user_name: impl Into<String>) -> Self {
        self.user_id = Some(user_id);
        self.user_name = Some(user_name.into());
        self
    }

    #[must_use]
    pub fn error(mut self, error: impl Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Destination for audit records
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// Short name used when reporting sink failures
    fn name(&self) -> &'static str;

    async fn record(&self, record: &AuditRecord) -> EnforcementResult<()>;
}

/// Level-filtered fan-out to the configured sinks
#[derive(Clone, Default)]
pub struct AuditLog {
    min_level: AuditLevel,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("min_level", &self.min_level)
            .field(
                "sinks",
                &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl AuditLog {
    pub fn new(min_level: AuditLevel) -> Self {
        Self {
            min_level,
            sinks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Emit a record. Never fails.
    pub async fn record(&self, record: AuditRecord) {
        trace_record(&record);

        if record.level < self.min_level {
            return;
        }

        for sink in &self.sinks {
            if let Err(e) = sink.record(&record).await {
                warn!(
                    target: AUDIT_TARGET,
                    sink = sink.name(),
                    error = %e,
                    "Audit sink failed (non-critical)"
                );
            }
        }
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.record(AuditRecord::new(AuditLevel::Info, message)).await;
    }
}

fn trace_record(record: &AuditRecord) {
    let user_id = record.user_id.map(|id| id.get()).unwrap_or_default();
    let error = record.error.as_deref().unwrap_or_default();
    match record.level {
        AuditLevel::Debug => debug!(target: AUDIT_TARGET, user_id, "{}", record.message),
        AuditLevel::Info => info!(target: AUDIT_TARGET, user_id, "{}", record.message),
        AuditLevel::Warning => warn!(target: AUDIT_TARGET, user_id, "{}", record.message),
        AuditLevel::Error => {
            error!(target: AUDIT_TARGET, user_id, error, "{}", record.message);
        }
        AuditLevel::Critical => {
            error!(target: AUDIT_TARGET, user_id, error, critical = true, "{}", record.message);
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    secret_key: &'a str,
    level: String,
    message: &'a str,
    user_id: String,
    user_name: &'a str,
    server: &'a str,
    error: &'a str,
}

impl<'a> WebhookPayload<'a> {
    fn new(secret_key: &'a str, server: &'a str, record: &'a AuditRecord) -> Self {
        Self {
            secret_key,
            level: record.level.to_string(),
            message: &record.message,
            user_id: record.user_id.map(|id| id.to_string()).unwrap_or_default(),
            user_name: record.user_name.as_deref().unwrap_or_default(),
            server,
            error: record.error.as_deref().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts audit records as JSON to an external script endpoint
pub struct WebhookAuditSink {
    client: reqwest::Client,
    url: String,
    secret_key: String,
    server: String,
}

impl WebhookAuditSink {
    const TIMEOUT: Duration = Duration::from_secs(5);

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        secret_key: impl Into<String>,
        server: impl Into<String>,
    ) -> EnforcementResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .map_err(|e| EnforcementError::Audit(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            secret_key: secret_key.into(),
            server: server.into(),
        })
    }
}

#[async_trait::async_trait]
impl AuditSink for WebhookAuditSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn record(&self, record: &AuditRecord) -> EnforcementResult<()> {
        let payload = WebhookPayload::new(&self.secret_key, &self.server, record);

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EnforcementError::Audit(e.to_string()))?;

        let status = response.status();
        let body: WebhookResponse = response
            .json()
            .await
            .map_err(|e| EnforcementError::Audit(format!("HTTP {status}: {e}")))?;

        if status.is_success() && body.success {
            Ok(())
        } else {
            Err(EnforcementError::Audit(
                body.error.unwrap_or_else(|| format!("HTTP {status}")),
            ))
        }
    }
}
