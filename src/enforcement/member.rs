//! Member facts as seen by the enforcement core
//!
//! These are fetched fresh for every check and never cached beyond it.

use poise::serenity_prelude::{self as serenity, Mentionable, RoleId, UserId};
use std::collections::HashSet;

/// A member of the target guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Discord user id
    pub id: UserId,
    /// Display handle used in notices and logs
    pub name: String,
    /// Whether the account is a bot
    pub bot: bool,
    /// Roles held in the target guild
    pub roles: HashSet<RoleId>,
}

impl Member {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            bot: false,
            roles: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = RoleId>) -> Self {
        self.roles.extend(roles);
        self
    }

    #[must_use]
    pub fn as_bot(mut self) -> Self {
        self.bot = true;
        self
    }

    /// Mention string (`<@id>`) for channel posts
    #[must_use]
    pub fn mention(&self) -> String {
        self.id.mention().to_string()
    }

    #[must_use]
    pub fn has_any_role(&self, roles: &HashSet<RoleId>) -> bool {
        self.roles.iter().any(|role| roles.contains(role))
    }
}

impl From<&serenity::Member> for Member {
    fn from(member: &serenity::Member) -> Self {
        Self {
            id: member.user.id,
            name: member.user.name.clone(),
            bot: member.user.bot,
            roles: member.roles.iter().copied().collect(),
        }
    }
}

/// Presence of a user in the reference guild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMembership {
    /// Roles held in the reference guild
    pub roles: HashSet<RoleId>,
}

impl ReferenceMembership {
    pub fn with_roles(roles: impl IntoIterator<Item = RoleId>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

impl From<&serenity::Member> for ReferenceMembership {
    fn from(member: &serenity::Member) -> Self {
        Self::with_roles(member.roles.iter().copied())
    }
}
