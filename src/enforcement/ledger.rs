//! Warning ledger
//!
//! Tracks which members are inside their grace period. An entry exists only
//! while a warning has been issued and enforcement has not concluded.

use crate::enforcement::NonComplianceReason;
use chrono::{DateTime, Duration, Utc};
use poise::serenity_prelude::UserId;
use std::collections::HashMap;

/// An issued warning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningRecord {
    /// When the warning was issued
    pub warned_at: DateTime<Utc>,
    /// The violation the member was warned about
    pub reason: NonComplianceReason,
}

/// A warning whose grace period has elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredWarning {
    pub user_id: UserId,
    pub warned_at: DateTime<Utc>,
    pub reason: NonComplianceReason,
}

/// In-memory map of member id to issued warning
#[derive(Debug, Default)]
pub struct WarningLedger {
    records: HashMap<UserId, WarningRecord>,
}

impl WarningLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning, replacing any earlier one for the same member
    pub fn record_warning(
        &mut self,
        user_id: UserId,
        warned_at: DateTime<Utc>,
        reason: NonComplianceReason,
    ) {
        self.records
            .insert(user_id, WarningRecord { warned_at, reason });
    }

    /// Remove a member's entry, returning it if there was one
    pub fn clear(&mut self, user_id: UserId) -> Option<WarningRecord> {
        self.records.remove(&user_id)
    }

    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<&WarningRecord> {
        self.records.get(&user_id)
    }

    #[must_use]
    pub fn contains(&self, user_id: UserId) -> bool {
        self.records.contains_key(&user_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Entries with `now - warned_at >= grace`, oldest first
    #[must_use]
    pub fn expired_entries(&self, now: DateTime<Utc>, grace: Duration) -> Vec<ExpiredWarning> {
        let mut expired: Vec<ExpiredWarning> = self
            .records
            .iter()
            .filter(|(_, record)| now - record.warned_at >= grace)
            .map(|(user_id, record)| ExpiredWarning {
                user_id: *user_id,
                warned_at: record.warned_at,
                reason: record.reason,
            })
            .collect();
        expired.sort_by_key(|entry| (entry.warned_at, entry.user_id));
        expired
    }

    /// All entries, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<(UserId, WarningRecord)> {
        let mut entries: Vec<(UserId, WarningRecord)> = self
            .records
            .iter()
            .map(|(user_id, record)| (*user_id, *record))
            .collect();
        entries.sort_by_key(|(user_id, record)| (record.warned_at, *user_id));
        entries
    }
}
