//! Error types for the enforcement system
//!
//! Per-member failures are isolated: none of these abort a sweep, they only
//! end the check of the member that produced them.

use poise::serenity_prelude as serenity;
use thiserror::Error;

/// Errors that can occur during enforcement operations
#[derive(Debug, Error)]
pub enum EnforcementError {
    /// The reference or target roster could not be read
    #[error("Membership lookup failed: {0}")]
    Lookup(String),

    /// A direct message or channel post could not be delivered
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    /// The bot lacks the privilege to remove the member
    #[error("Not allowed to remove member: {0}")]
    RemovalDenied(String),

    /// Removal failed for any other reason
    #[error("Failed to remove member: {0}")]
    Removal(String),

    /// An audit sink rejected a record
    #[error("Audit sink failed: {0}")]
    Audit(String),

    /// The scheduler task is not accepting requests
    #[error("Scheduler unavailable: {0}")]
    Scheduler(String),
}

impl EnforcementError {
    /// Wrap a Discord API error raised while reading membership
    pub fn lookup(error: &serenity::Error) -> Self {
        Self::Lookup(error.to_string())
    }

    /// Wrap a Discord API error raised while notifying someone
    pub fn delivery(error: &serenity::Error) -> Self {
        Self::Delivery(error.to_string())
    }
}

/// Result type for enforcement operations
pub type EnforcementResult<T> = Result<T, EnforcementError>;
