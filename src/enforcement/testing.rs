//! In-memory guild directory for enforcement tests

use crate::enforcement::{
    EnforcementError, EnforcementResult, Member, MemberRemover, MembershipSource, Notice,
    Notifier, ReferenceMembership,
};
use poise::serenity_prelude::{ChannelId, RoleId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct DirectoryState {
    reference: HashMap<UserId, ReferenceMembership>,
    target: Vec<Member>,
    failing_lookups: HashSet<UserId>,
    failing_target_lookups: HashSet<UserId>,
    roster_fails: bool,
    deny_removals: bool,
    direct: Vec<(UserId, Notice)>,
    posts: Vec<(ChannelId, Notice)>,
    removals: Vec<(UserId, String)>,
    roster_listings: usize,
}

/// Fake reference/target guilds that record every side effect
#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<DirectoryState>,
}

impl FakeDirectory {
    fn state(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap()
    }

    pub fn add_target(&self, member: Member) {
        self.state().target.push(member);
    }

    pub fn leave_target(&self, user_id: UserId) {
        self.state().target.retain(|member| member.id != user_id);
    }

    pub fn join_reference(&self, user_id: UserId, roles: impl IntoIterator<Item = RoleId>) {
        self.state()
            .reference
            .insert(user_id, ReferenceMembership::with_roles(roles));
    }

    pub fn fail_lookup(&self, user_id: UserId) {
        self.state().failing_lookups.insert(user_id);
    }

    pub fn fail_target_lookup(&self, user_id: UserId) {
        self.state().failing_target_lookups.insert(user_id);
    }

    pub fn fail_roster(&self) {
        self.state().roster_fails = true;
    }

    pub fn deny_removals(&self) {
        self.state().deny_removals = true;
    }

    pub fn direct_messages(&self) -> Vec<(UserId, Notice)> {
        self.state().direct.clone()
    }

    pub fn channel_posts(&self) -> Vec<(ChannelId, Notice)> {
        self.state().posts.clone()
    }

    pub fn removals(&self) -> Vec<(UserId, String)> {
        self.state().removals.clone()
    }

    pub fn roster_listings(&self) -> usize {
        self.state().roster_listings
    }
}

#[async_trait::async_trait]
impl MembershipSource for FakeDirectory {
    async fn reference_membership(
        &self,
        user_id: UserId,
    ) -> EnforcementResult<Option<ReferenceMembership>> {
        let state = self.state();
        if state.failing_lookups.contains(&user_id) {
            return Err(EnforcementError::Lookup("connection reset".to_string()));
        }
        Ok(state.reference.get(&user_id).cloned())
    }

    async fn target_members(&self) -> EnforcementResult<Vec<Member>> {
        let mut state = self.state();
        state.roster_listings += 1;
        if state.roster_fails {
            return Err(EnforcementError::Lookup("502 Bad Gateway".to_string()));
        }
        Ok(state.target.clone())
    }

    async fn target_member(&self, user_id: UserId) -> EnforcementResult<Option<Member>> {
        let state = self.state();
        if state.failing_target_lookups.contains(&user_id) {
            return Err(EnforcementError::Lookup("503 Service Unavailable".to_string()));
        }
        Ok(state
            .target
            .iter()
            .find(|member| member.id == user_id)
            .cloned())
    }
}

#[async_trait::async_trait]
impl Notifier for FakeDirectory {
    async fn send_direct(&self, user_id: UserId, notice: &Notice) -> EnforcementResult<()> {
        self.state().direct.push((user_id, notice.clone()));
        Ok(())
    }

    async fn post_to_channel(
        &self,
        channel_id: ChannelId,
        notice: &Notice,
    ) -> EnforcementResult<()> {
        self.state().posts.push((channel_id, notice.clone()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl MemberRemover for FakeDirectory {
    async fn remove_member(&self, user_id: UserId, reason: &str) -> EnforcementResult<()> {
        let mut state = self.state();
        state.removals.push((user_id, reason.to_string()));
        if state.deny_removals {
            return Err(EnforcementError::RemovalDenied("Missing Permissions".to_string()));
        }
        state.target.retain(|member| member.id != user_id);
        Ok(())
    }
}
