//! Collaborator interfaces used by the enforcement engine
//!
//! The engine only talks to the outside world through these traits. The
//! Discord implementation lives in [`crate::discord`].

use crate::enforcement::{EnforcementResult, Member, Notice, ReferenceMembership};
use poise::serenity_prelude::{ChannelId, UserId};

/// Read access to the reference and target rosters
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MembershipSource: Send + Sync {
    /// Look a user up in the reference guild.
    ///
    /// `Ok(None)` means the user is not a member. Transport failures must be
    /// reported as errors, never as `Ok(None)`.
    async fn reference_membership(
        &self,
        user_id: UserId,
    ) -> EnforcementResult<Option<ReferenceMembership>>;

    /// Every current member of the target guild
    async fn target_members(&self) -> EnforcementResult<Vec<Member>>;

    /// A single member of the target guild, if still present
    async fn target_member(&self, user_id: UserId) -> EnforcementResult<Option<Member>>;
}

/// Outbound messages to members and channels
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_direct(&self, user_id: UserId, notice: &Notice) -> EnforcementResult<()>;

    async fn post_to_channel(&self, channel_id: ChannelId, notice: &Notice)
    -> EnforcementResult<()>;
}

/// Removal of members from the target guild
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MemberRemover: Send + Sync {
    /// Remove a member, recording `reason` in the guild audit log
    async fn remove_member(&self, user_id: UserId, reason: &str) -> EnforcementResult<()>;
}
