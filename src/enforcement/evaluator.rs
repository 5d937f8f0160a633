//! Compliance evaluation
//!
//! Decides whether a target-guild member satisfies the active criterion. The
//! only I/O is the reference-guild lookup; everything else is plain logic
//! over the facts supplied.

use crate::enforcement::{EnforcementResult, Member, MembershipSource, ReferenceMembership};
use poise::serenity_prelude::RoleId;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};

/// The policy a target member has to satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceCriterion {
    /// Must be a member of the reference guild
    ReferenceMembershipOnly,
    /// Must be a member of the reference guild and hold the role there
    ReferenceMembershipWithRole(RoleId),
}

impl ComplianceCriterion {
    /// Role the criterion requires, if any
    #[must_use]
    pub const fn required_role(&self) -> Option<RoleId> {
        match self {
            Self::ReferenceMembershipOnly => None,
            Self::ReferenceMembershipWithRole(role) => Some(*role),
        }
    }
}

impl Display for ComplianceCriterion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReferenceMembershipOnly => write!(f, "Criteria 1: Membership Check"),
            Self::ReferenceMembershipWithRole(_) => write!(f, "Criteria 2: Role Check"),
        }
    }
}

/// Why a member fails the active criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonComplianceReason {
    NotReferenceMember,
    MissingRequiredRole(RoleId),
}

impl NonComplianceReason {
    /// User-facing text, completing the sentence "... because you are <reason>"
    #[must_use]
    pub fn describe(&self, reference_name: &str) -> String {
        match self {
            Self::NotReferenceMember => {
                format!("not a member of our main server: {reference_name}")
            }
            Self::MissingRequiredRole(_) => {
                format!("missing the required role in our main server: {reference_name}")
            }
        }
    }
}

/// Why a member is skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExemptReason {
    Bot,
    ExemptRole,
}

/// Result of evaluating one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Exempt(ExemptReason),
    Compliant,
    NonCompliant(NonComplianceReason),
}

/// Evaluates members against the active criterion
#[derive(Debug, Clone)]
pub struct ComplianceEvaluator {
    criterion: ComplianceCriterion,
    exempt_roles: HashSet<RoleId>,
}

impl ComplianceEvaluator {
    pub fn new(criterion: ComplianceCriterion, exempt_roles: HashSet<RoleId>) -> Self {
        Self {
            criterion,
            exempt_roles,
        }
    }

    /// Bots and holders of an exempt role are never enforced against
    #[must_use]
    pub fn exemption(&self, member: &Member) -> Option<ExemptReason> {
        if member.bot {
            Some(ExemptReason::Bot)
        } else if member.has_any_role(&self.exempt_roles) {
            Some(ExemptReason::ExemptRole)
        } else {
            None
        }
    }

    /// Apply the criterion to the member's reference-guild presence
    #[must_use]
    pub fn decide(&self, reference: Option<&ReferenceMembership>) -> Evaluation {
        let Some(reference) = reference else {
            return Evaluation::NonCompliant(NonComplianceReason::NotReferenceMember);
        };

        match self.criterion {
            ComplianceCriterion::ReferenceMembershipOnly => Evaluation::Compliant,
            ComplianceCriterion::ReferenceMembershipWithRole(role) if reference.has_role(role) => {
                Evaluation::Compliant
            }
            ComplianceCriterion::ReferenceMembershipWithRole(role) => {
                Evaluation::NonCompliant(NonComplianceReason::MissingRequiredRole(role))
            }
        }
    }

    /// Evaluate a member, looking them up in the reference guild.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures from the membership source. A user who is
    /// simply not in the reference guild is not an error.
    pub async fn evaluate(
        &self,
        member: &Member,
        source: &dyn MembershipSource,
    ) -> EnforcementResult<Evaluation> {
        if let Some(reason) = self.exemption(member) {
            return Ok(Evaluation::Exempt(reason));
        }

        let reference = source.reference_membership(member.id).await?;
        Ok(self.decide(reference.as_ref()))
    }
}
