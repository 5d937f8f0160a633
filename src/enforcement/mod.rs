//! Cross-server membership enforcement
//!
//! Members of the target server must satisfy a criterion evaluated against
//! the reference server. Non-compliant members are warned, given a grace
//! period, and removed once it runs out.

mod engine;
mod error;
mod evaluator;
mod gateway;
mod ledger;
mod member;
mod notice;
mod scheduler;
#[cfg(test)]
pub(crate) mod testing;

pub use engine::{
    CheckOutcome, Collaborators, ENFORCEMENT_TARGET, EnforcementEngine, EnforcementSettings,
    RemovalCause, SweepReport,
};
pub use error::{EnforcementError, EnforcementResult};
pub use evaluator::{
    ComplianceCriterion, ComplianceEvaluator, Evaluation, ExemptReason, NonComplianceReason,
};
pub use gateway::{MemberRemover, MembershipSource, Notifier};
#[cfg(test)]
pub use gateway::{MockMemberRemover, MockMembershipSource, MockNotifier};
pub use ledger::{ExpiredWarning, WarningLedger, WarningRecord};
pub use member::{Member, ReferenceMembership};
pub use notice::{Notice, NoticeField, NoticeTemplates, NoticeTone, format_hours, removal_reason};
pub use scheduler::{ReconciliationScheduler, SchedulerHandle, SchedulerRequest};
