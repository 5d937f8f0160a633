//! Enforcement engine
//!
//! Runs the evaluator, owns the warning ledger and drives warnings and
//! removals through the collaborators. The ledger lock is held for a member's
//! whole check-and-mutate sequence, so concurrent triggers never interleave
//! inside one member's check. Audit records produced under the lock are
//! delivered after it is released.

use crate::audit::{AuditLevel, AuditLog, AuditRecord};
use crate::enforcement::{
    ComplianceEvaluator, EnforcementError, EnforcementResult, Evaluation, ExpiredWarning, Member,
    MemberRemover, MembershipSource, NonComplianceReason, NoticeTemplates, Notifier,
    WarningLedger, WarningRecord, removal_reason,
};
use chrono::{DateTime, Duration, Utc};
use poise::serenity_prelude::{ChannelId, UserId};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Target for enforcement logs
pub const ENFORCEMENT_TARGET: &str = "member_sentry::enforcement";

/// Result of checking one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Bot or exempt role; not enforced
    Exempt,
    /// Compliant
    Ok,
    /// Newly warned, or still inside the grace period
    Warned,
    /// Removed from the target guild
    Kicked,
    /// The reference lookup failed; nothing was changed
    EvaluationError,
}

impl Display for CheckOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exempt => write!(f, "exempt"),
            Self::Ok => write!(f, "ok"),
            Self::Warned => write!(f, "warned"),
            Self::Kicked => write!(f, "kicked"),
            Self::EvaluationError => write!(f, "error"),
        }
    }
}

/// Why a member is being removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Rechecked on join while already warned
    StillNonCompliant,
    /// Grace period ran out
    GracePeriodExpired,
}

impl Display for RemovalCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StillNonCompliant => write!(f, "still non-compliant after warning"),
            Self::GracePeriodExpired => write!(f, "warning period expired"),
        }
    }
}

/// Counts from one full sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub exempt: usize,
    pub warned: usize,
    pub kicked: usize,
    pub errors: usize,
    /// Ledger entries whose grace period had elapsed
    pub expired: usize,
}

impl SweepReport {
    fn count(&mut self, outcome: CheckOutcome) {
        self.checked += 1;
        match outcome {
            CheckOutcome::Exempt => self.exempt += 1,
            CheckOutcome::Warned => self.warned += 1,
            CheckOutcome::Kicked => self.kicked += 1,
            CheckOutcome::EvaluationError => self.errors += 1,
            CheckOutcome::Ok => {}
        }
    }
}

impl Display for SweepReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} members checked, {} warned, {} kicked, {} exempt, {} errors",
            self.checked, self.warned, self.kicked, self.exempt, self.errors
        )
    }
}

/// Policy knobs the engine needs besides the evaluator
#[derive(Debug, Clone)]
pub struct EnforcementSettings {
    /// Display name of the reference guild, used in reasons
    pub reference_name: String,
    /// Display name of the target guild, used in audit messages
    pub target_name: String,
    pub grace_period: Duration,
    /// Channel receiving warning and kick posts
    pub warning_channel: Option<ChannelId>,
    pub templates: NoticeTemplates,
}

/// The external capabilities the engine acts through
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn MembershipSource>,
    pub notifier: Arc<dyn Notifier>,
    pub remover: Arc<dyn MemberRemover>,
}

impl Collaborators {
    /// Use one implementation for every capability
    pub fn from_shared<T>(shared: Arc<T>) -> Self
    where
        T: MembershipSource + Notifier + MemberRemover + 'static,
    {
        Self {
            source: shared.clone(),
            notifier: shared.clone(),
            remover: shared,
        }
    }
}

pub struct EnforcementEngine {
    evaluator: ComplianceEvaluator,
    collaborators: Collaborators,
    settings: EnforcementSettings,
    audit: AuditLog,
    ledger: Mutex<WarningLedger>,
    sweep_lock: Mutex<()>,
}

impl std::fmt::Debug for EnforcementEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcementEngine")
            .field("evaluator", &self.evaluator)
            .field("settings", &self.settings)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

impl EnforcementEngine {
    pub fn new(
        evaluator: ComplianceEvaluator,
        collaborators: Collaborators,
        settings: EnforcementSettings,
        audit: AuditLog,
        ledger: WarningLedger,
    ) -> Self {
        Self {
            evaluator,
            collaborators,
            settings,
            audit,
            ledger: Mutex::new(ledger),
            sweep_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &EnforcementSettings {
        &self.settings
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Members currently inside their grace period, oldest warning first
    pub async fn warned_members(&self) -> Vec<(UserId, WarningRecord)> {
        self.ledger.lock().await.snapshot()
    }

    /// Check a member now. `immediate` marks a check triggered by a join.
    pub async fn process_member(&self, member: &Member, immediate: bool) -> CheckOutcome {
        self.process_member_at(member, immediate, Utc::now()).await
    }

    /// Look a member up in the target guild and check them as a join would
    ///
    /// Returns `None` when the member is not in the target guild.
    ///
    /// # Errors
    ///
    /// Returns an error if the target guild lookup fails.
    pub async fn process_member_by_id(
        &self,
        user_id: UserId,
    ) -> EnforcementResult<Option<(Member, CheckOutcome)>> {
        let Some(member) = self.collaborators.source.target_member(user_id).await? else {
            return Ok(None);
        };
        let outcome = self.process_member(&member, true).await;
        Ok(Some((member, outcome)))
    }

    /// Check a member as of `now`
    pub async fn process_member_at(
        &self,
        member: &Member,
        immediate: bool,
        now: DateTime<Utc>,
    ) -> CheckOutcome {
        if !member.bot {
            self.audit
                .record(
                    AuditRecord::new(
                        AuditLevel::Info,
                        format!("Checking member {} (ID: {})", member.name, member.id),
                    )
                    .user(member.id, &member.name),
                )
                .await;
        }

        let mut pending = Vec::new();
        let outcome = {
            let mut ledger = self.ledger.lock().await;
            self.check_locked(&mut ledger, member, immediate, now, &mut pending)
                .await
        };
        self.flush(pending).await;
        outcome
    }

    async fn flush(&self, records: Vec<AuditRecord>) {
        for record in records {
            self.audit.record(record).await;
        }
    }

    async fn check_locked(
        &self,
        ledger: &mut WarningLedger,
        member: &Member,
        immediate: bool,
        now: DateTime<Utc>,
        pending: &mut Vec<AuditRecord>,
    ) -> CheckOutcome {
        let evaluation = self
            .evaluator
            .evaluate(member, self.collaborators.source.as_ref())
            .await;

        match evaluation {
            Ok(Evaluation::Exempt(reason)) => {
                debug!(
                    target: ENFORCEMENT_TARGET,
                    user_id = %member.id,
                    ?reason,
                    "Skipping exempt member {}", member.name
                );
                CheckOutcome::Exempt
            }
            Err(e) => {
                pending.push(
                    AuditRecord::new(
                        AuditLevel::Error,
                        format!("Error checking member {} (ID: {})", member.name, member.id),
                    )
                    .user(member.id, &member.name)
                    .error(&e),
                );
                CheckOutcome::EvaluationError
            }
            Ok(Evaluation::Compliant) => {
                if ledger.clear(member.id).is_some() {
                    info!(
                        target: ENFORCEMENT_TARGET,
                        user_id = %member.id,
                        "Member {} complied during grace period, warning cleared", member.name
                    );
                }
                CheckOutcome::Ok
            }
            Ok(Evaluation::NonCompliant(reason)) => {
                if !ledger.contains(member.id) {
                    self.warn_locked(ledger, member, reason, now, pending).await;
                    return CheckOutcome::Warned;
                }

                if immediate {
                    let text = reason.describe(&self.settings.reference_name);
                    self.kick_locked(
                        ledger,
                        member,
                        &text,
                        RemovalCause::StillNonCompliant,
                        pending,
                    )
                    .await;
                    CheckOutcome::Kicked
                } else {
                    CheckOutcome::Warned
                }
            }
        }
    }

    async fn warn_locked(
        &self,
        ledger: &mut WarningLedger,
        member: &Member,
        reason: NonComplianceReason,
        now: DateTime<Utc>,
        pending: &mut Vec<AuditRecord>,
    ) {
        let text = reason.describe(&self.settings.reference_name);
        let templates = &self.settings.templates;

        match self
            .collaborators
            .notifier
            .send_direct(member.id, &templates.warning_dm(&text))
            .await
        {
            Ok(()) => info!(
                target: ENFORCEMENT_TARGET,
                user_id = %member.id,
                "Sent warning DM to {}", member.name
            ),
            Err(e) => warn!(
                target: ENFORCEMENT_TARGET,
                user_id = %member.id,
                error = %e,
                "Failed to send warning DM to {}", member.name
            ),
        }

        if let Some(channel_id) = self.settings.warning_channel {
            if let Err(e) = self
                .collaborators
                .notifier
                .post_to_channel(channel_id, &templates.warning_post(member, &text))
                .await
            {
                warn!(
                    target: ENFORCEMENT_TARGET,
                    channel_id = %channel_id,
                    error = %e,
                    "Failed to post warning for {}", member.name
                );
            }
        }

        ledger.record_warning(member.id, now, reason);

        pending.push(
            AuditRecord::new(
                AuditLevel::Warning,
                format!(
                    "⚠️ Member {} (ID: {}) has been warned: {text}",
                    member.name, member.id
                ),
            )
            .user(member.id, &member.name),
        );
    }

    /// Notify and remove a member. Returns whether the removal succeeded.
    ///
    /// The member's ledger entry is cleared either way.
    pub async fn kick_member(&self, member: &Member, reason: &str, cause: RemovalCause) -> bool {
        let mut pending = Vec::new();
        let removed = {
            let mut ledger = self.ledger.lock().await;
            self.kick_locked(&mut ledger, member, reason, cause, &mut pending)
                .await
        };
        self.flush(pending).await;
        removed
    }

    async fn kick_locked(
        &self,
        ledger: &mut WarningLedger,
        member: &Member,
        reason: &str,
        cause: RemovalCause,
        pending: &mut Vec<AuditRecord>,
    ) -> bool {
        let templates = &self.settings.templates;

        match self
            .collaborators
            .notifier
            .send_direct(member.id, &templates.kick_dm(reason))
            .await
        {
            Ok(()) => info!(
                target: ENFORCEMENT_TARGET,
                user_id = %member.id,
                "Sent kick DM to {}", member.name
            ),
            Err(e) => warn!(
                target: ENFORCEMENT_TARGET,
                user_id = %member.id,
                error = %e,
                "Failed to send kick DM to {}", member.name
            ),
        }

        if let Some(channel_id) = self.settings.warning_channel {
            if let Err(e) = self
                .collaborators
                .notifier
                .post_to_channel(channel_id, &templates.kick_post(member, reason))
                .await
            {
                warn!(
                    target: ENFORCEMENT_TARGET,
                    channel_id = %channel_id,
                    error = %e,
                    "Failed to post kick notice for {}", member.name
                );
            }
        }

        let removal = self
            .collaborators
            .remover
            .remove_member(member.id, &removal_reason(reason))
            .await;
        ledger.clear(member.id);

        let (record, removed) = match removal {
            Ok(()) => (
                AuditRecord::new(
                    AuditLevel::Warning,
                    format!(
                        "🔨 Member {} (ID: {}) has been kicked: {reason} ({cause})",
                        member.name, member.id
                    ),
                ),
                true,
            ),
            Err(e @ EnforcementError::RemovalDenied(_)) => (
                AuditRecord::new(
                    AuditLevel::Critical,
                    format!(
                        "Bot doesn't have permission to kick {} (ID: {})",
                        member.name, member.id
                    ),
                )
                .error(e),
                false,
            ),
            Err(e) => (
                AuditRecord::new(
                    AuditLevel::Error,
                    format!("Error kicking {} (ID: {})", member.name, member.id),
                )
                .error(e),
                false,
            ),
        };
        pending.push(record.user(member.id, &member.name));
        removed
    }

    /// Check every member of the target guild, then expire warnings
    ///
    /// # Errors
    ///
    /// Fails only when the target roster cannot be listed; per-member
    /// failures are counted in the report.
    pub async fn sweep(&self) -> EnforcementResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep as of `now`
    ///
    /// # Errors
    ///
    /// See [`Self::sweep`].
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> EnforcementResult<SweepReport> {
        let _sweep = self.sweep_lock.lock().await;
        let span = info_span!("sweep", run_id = %Uuid::new_v4());
        self.run_sweep(now).instrument(span).await
    }

    async fn run_sweep(&self, now: DateTime<Utc>) -> EnforcementResult<SweepReport> {
        self.audit
            .info(format!(
                "Starting periodic member check for {}",
                self.settings.target_name
            ))
            .await;

        let members = match self.collaborators.source.target_members().await {
            Ok(members) => members,
            Err(e) => {
                self.audit
                    .record(
                        AuditRecord::new(
                            AuditLevel::Error,
                            format!("Could not list members of {}", self.settings.target_name),
                        )
                        .error(&e),
                    )
                    .await;
                return Err(e);
            }
        };

        let mut report = SweepReport::default();
        for member in members.iter().filter(|member| !member.bot) {
            let outcome = self.process_member_at(member, false, now).await;
            report.count(outcome);
        }

        let (expired, kicked) = self.expire_warnings(now).await;
        report.expired = expired;
        report.kicked += kicked;

        info!(target: ENFORCEMENT_TARGET, "Periodic check complete: {report}");
        Ok(report)
    }

    /// Kick every member whose grace period has elapsed as of `now`.
    ///
    /// Returns the number of expired entries and the number of kicks issued.
    /// Every expired entry still current when it is reached is cleared,
    /// whether or not the kick succeeds.
    pub async fn expire_warnings(&self, now: DateTime<Utc>) -> (usize, usize) {
        let expired = self
            .ledger
            .lock()
            .await
            .expired_entries(now, self.settings.grace_period);

        let mut kicked = 0;
        for entry in &expired {
            if self.expire_entry(entry).await {
                kicked += 1;
            }
        }
        (expired.len(), kicked)
    }

    /// Conclude one expired warning. Returns whether a kick was issued.
    async fn expire_entry(&self, entry: &ExpiredWarning) -> bool {
        let mut pending = Vec::new();
        let kicked = {
            let mut ledger = self.ledger.lock().await;
            self.expire_locked(&mut ledger, entry, &mut pending).await
        };
        self.flush(pending).await;
        kicked
    }

    async fn expire_locked(
        &self,
        ledger: &mut WarningLedger,
        entry: &ExpiredWarning,
        pending: &mut Vec<AuditRecord>,
    ) -> bool {
        // A join check may have concluded this entry since it was listed
        if ledger.get(entry.user_id).map(|record| record.warned_at) != Some(entry.warned_at) {
            return false;
        }

        let member = match self.collaborators.source.target_member(entry.user_id).await {
            Ok(Some(member)) => member,
            Ok(None) => {
                ledger.clear(entry.user_id);
                info!(
                    target: ENFORCEMENT_TARGET,
                    user_id = %entry.user_id,
                    "Warned member left before the grace period expired"
                );
                return false;
            }
            // Removal only needs the id
            Err(e) => {
                pending.push(
                    AuditRecord::new(
                        AuditLevel::Warning,
                        format!(
                            "Could not fetch expired member (ID: {}); removing by ID",
                            entry.user_id
                        ),
                    )
                    .error(&e),
                );
                Member::new(entry.user_id, entry.user_id.to_string())
            }
        };

        if self.evaluator.exemption(&member).is_some() {
            ledger.clear(entry.user_id);
            info!(
                target: ENFORCEMENT_TARGET,
                user_id = %entry.user_id,
                "Member {} became exempt during grace period, warning cleared", member.name
            );
            return false;
        }

        let text = entry.reason.describe(&self.settings.reference_name);
        self.kick_locked(
            ledger,
            &member,
            &text,
            RemovalCause::GracePeriodExpired,
            pending,
        )
        .await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::enforcement::testing::FakeDirectory;
    use crate::enforcement::{ComplianceCriterion, MockNotifier};
    use poise::serenity_prelude::RoleId;
    use tokio::sync::Notify;

    const EXEMPT: RoleId = RoleId::new(100);
    const REQUIRED: RoleId = RoleId::new(900);
    const WARNING_CHANNEL: ChannelId = ChannelId::new(555);
    const GRACE_SECS: i64 = 3600;

    fn settings(criterion: ComplianceCriterion) -> EnforcementSettings {
        EnforcementSettings {
            reference_name: "Main".to_string(),
            target_name: "Side".to_string(),
            grace_period: Duration::seconds(GRACE_SECS),
            warning_channel: Some(WARNING_CHANNEL),
            templates: NoticeTemplates {
                invite_link: "https://discord.gg/main".to_string(),
                grace_period_secs: 3600,
                requires_role: criterion.required_role().is_some(),
                moderator_role_ids: Vec::new(),
            },
        }
    }

    fn engine_with(
        criterion: ComplianceCriterion,
        collaborators: Collaborators,
    ) -> EnforcementEngine {
        engine_with_audit(criterion, collaborators, AuditLog::new(AuditLevel::Info))
    }

    fn engine_with_audit(
        criterion: ComplianceCriterion,
        collaborators: Collaborators,
        audit: AuditLog,
    ) -> EnforcementEngine {
        EnforcementEngine::new(
            ComplianceEvaluator::new(criterion, [EXEMPT].into_iter().collect()),
            collaborators,
            settings(criterion),
            audit,
            WarningLedger::new(),
        )
    }

    /// Keeps every record it receives
    #[derive(Default)]
    struct RecordingSink {
        records: std::sync::Mutex<Vec<AuditRecord>>,
    }

    #[async_trait::async_trait]
    impl AuditSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn record(&self, record: &AuditRecord) -> EnforcementResult<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    /// Blocks on Warning and above until the gate opens
    struct StallingSink {
        gate: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl AuditSink for StallingSink {
        fn name(&self) -> &'static str {
            "stalling"
        }

        async fn record(&self, record: &AuditRecord) -> EnforcementResult<()> {
            if record.level >= AuditLevel::Warning {
                self.gate.notified().await;
            }
            Ok(())
        }
    }

    fn setup(criterion: ComplianceCriterion) -> (EnforcementEngine, Arc<FakeDirectory>) {
        let directory = Arc::new(FakeDirectory::default());
        let engine = engine_with(criterion, Collaborators::from_shared(directory.clone()));
        (engine, directory)
    }

    fn member(id: u64, name: &str) -> Member {
        Member::new(UserId::new(id), name)
    }

    #[tokio::test]
    async fn test_exempt_member_never_touches_ledger() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let staff = member(1, "staff").with_roles([EXEMPT]);
        directory.add_target(staff.clone());

        for immediate in [false, true] {
            assert_eq!(
                engine.process_member(&staff, immediate).await,
                CheckOutcome::Exempt
            );
        }
        directory.join_reference(staff.id, []);
        assert_eq!(
            engine.process_member(&staff, false).await,
            CheckOutcome::Exempt
        );

        assert!(engine.warned_members().await.is_empty());
        assert!(directory.direct_messages().is_empty());
        assert!(directory.removals().is_empty());
    }

    #[tokio::test]
    async fn test_first_violation_warns_once_and_records_timestamp() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let alice = member(2, "alice");
        directory.add_target(alice.clone());
        let now = Utc::now();

        let outcome = engine.process_member_at(&alice, false, now).await;
        assert_eq!(outcome, CheckOutcome::Warned);

        let warned = engine.warned_members().await;
        assert_eq!(warned.len(), 1);
        assert_eq!(warned[0].0, alice.id);
        assert_eq!(warned[0].1.warned_at, now);
        assert_eq!(
            warned[0].1.reason,
            NonComplianceReason::NotReferenceMember
        );

        let dms = directory.direct_messages();
        assert_eq!(dms.len(), 1);
        assert_eq!(dms[0].0, alice.id);
        assert!(dms[0].1.description.contains("not a member of our main server: Main"));

        let posts = directory.channel_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, WARNING_CHANNEL);
    }

    #[tokio::test]
    async fn test_recompliance_clears_warning_without_kick() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let bob = member(3, "bob");
        directory.add_target(bob.clone());

        assert_eq!(engine.process_member(&bob, false).await, CheckOutcome::Warned);

        directory.join_reference(bob.id, []);
        let report = engine.sweep().await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.kicked, 0);

        assert!(engine.warned_members().await.is_empty());
        assert!(directory.removals().is_empty());
    }

    #[tokio::test]
    async fn test_recompliance_on_join_check() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let bob = member(3, "bob");
        directory.add_target(bob.clone());
        engine.process_member(&bob, false).await;

        directory.join_reference(bob.id, []);
        assert_eq!(engine.process_member(&bob, true).await, CheckOutcome::Ok);
        assert!(engine.warned_members().await.is_empty());
        assert!(directory.removals().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_sweeps_inside_grace_period_are_idempotent() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let carol = member(4, "carol");
        directory.add_target(carol.clone());
        let start = Utc::now();

        let first = engine.sweep_at(start).await.unwrap();
        assert_eq!(first.warned, 1);

        for minutes in [10, 30, 59] {
            let report = engine
                .sweep_at(start + Duration::minutes(minutes))
                .await
                .unwrap();
            assert_eq!(report.warned, 1);
            assert_eq!(report.kicked, 0);
            assert_eq!(report.expired, 0);
        }

        assert_eq!(directory.direct_messages().len(), 1);
        assert!(directory.removals().is_empty());
        assert_eq!(engine.warned_members().await[0].1.warned_at, start);
    }

    #[tokio::test]
    async fn test_expired_warning_kicks_once_with_role_criterion() {
        let criterion = ComplianceCriterion::ReferenceMembershipWithRole(REQUIRED);
        let (engine, directory) = setup(criterion);
        let dave = member(5, "dave");
        directory.add_target(dave.clone());
        directory.join_reference(dave.id, [RoleId::new(1)]);
        let start = Utc::now();

        assert_eq!(
            engine.process_member_at(&dave, false, start).await,
            CheckOutcome::Warned
        );
        assert_eq!(
            engine.warned_members().await[0].1.reason,
            NonComplianceReason::MissingRequiredRole(REQUIRED)
        );

        let report = engine
            .sweep_at(start + Duration::seconds(GRACE_SECS + 1))
            .await
            .unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.kicked, 1);

        let removals = directory.removals();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].0, dave.id);
        assert_eq!(
            removals[0].1,
            "Failed to meet server criteria: missing the required role in our main server: Main"
        );
        assert!(engine.warned_members().await.is_empty());

        // Warning DM + kick DM
        assert_eq!(directory.direct_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_expiry_is_unconditional_on_live_state() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let erin = member(6, "erin");
        directory.add_target(erin.clone());
        let start = Utc::now();
        engine.process_member_at(&erin, false, start).await;

        // Expiry pass on its own, without a fresh check of the member
        let (expired, kicked) = engine
            .expire_warnings(start + Duration::seconds(GRACE_SECS))
            .await;
        assert_eq!((expired, kicked), (1, 1));
        assert_eq!(directory.removals().len(), 1);
        assert!(engine.warned_members().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_of_already_warned_member_kicks_without_rewarning() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let frank = member(7, "frank");
        directory.add_target(frank.clone());

        assert_eq!(engine.process_member(&frank, false).await, CheckOutcome::Warned);
        assert_eq!(engine.process_member(&frank, true).await, CheckOutcome::Kicked);

        let dms = directory.direct_messages();
        assert_eq!(dms.len(), 2);
        assert_eq!(dms[1].1.title, "You have been removed from the server");
        assert_eq!(directory.removals().len(), 1);
        assert!(engine.warned_members().await.is_empty());
    }

    #[tokio::test]
    async fn test_check_by_id() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        directory.add_target(member(7, "grace"));
        directory.join_reference(UserId::new(7), []);

        let (found, outcome) = engine
            .process_member_by_id(UserId::new(7))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "grace");
        assert_eq!(outcome, CheckOutcome::Ok);

        assert!(
            engine
                .process_member_by_id(UserId::new(8))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_join_of_new_member_warns() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let gina = member(8, "gina");
        directory.add_target(gina.clone());

        assert_eq!(engine.process_member(&gina, true).await, CheckOutcome::Warned);
        assert!(directory.removals().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_error_is_isolated_to_one_member() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let ok = member(10, "ok");
        let broken = member(11, "broken");
        let missing = member(12, "missing");
        directory.add_target(ok.clone());
        directory.add_target(broken.clone());
        directory.add_target(missing.clone());
        directory.join_reference(ok.id, []);
        directory.fail_lookup(broken.id);

        let report = engine.sweep().await.unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.errors, 1);
        assert_eq!(report.warned, 1);

        let warned: Vec<UserId> = engine
            .warned_members()
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(warned, vec![missing.id]);
        assert_eq!(
            engine.process_member(&broken, true).await,
            CheckOutcome::EvaluationError
        );
    }

    #[tokio::test]
    async fn test_lookup_error_keeps_existing_warning() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let hank = member(13, "hank");
        directory.add_target(hank.clone());
        engine.process_member(&hank, false).await;

        directory.fail_lookup(hank.id);
        assert_eq!(
            engine.process_member(&hank, true).await,
            CheckOutcome::EvaluationError
        );
        assert_eq!(engine.warned_members().await.len(), 1);
        assert!(directory.removals().is_empty());
    }

    #[tokio::test]
    async fn test_denied_removal_still_clears_ledger() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let ivy = member(14, "ivy");
        directory.add_target(ivy.clone());
        directory.deny_removals();
        engine.process_member(&ivy, false).await;

        let removed = engine
            .kick_member(&ivy, "not a member", RemovalCause::StillNonCompliant)
            .await;
        assert!(!removed);
        assert!(engine.warned_members().await.is_empty());
        assert_eq!(directory.removals().len(), 1);

        // Still present, so the next sweep warns again
        let report = engine.sweep().await.unwrap();
        assert_eq!(report.warned, 1);
        assert_eq!(engine.warned_members().await.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_member_who_left_is_cleared_without_kick() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let jack = member(15, "jack");
        directory.add_target(jack.clone());
        let start = Utc::now();
        engine.process_member_at(&jack, false, start).await;

        directory.leave_target(jack.id);
        let report = engine
            .sweep_at(start + Duration::seconds(GRACE_SECS * 2))
            .await
            .unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.kicked, 0);
        assert!(directory.removals().is_empty());
        assert!(engine.warned_members().await.is_empty());
    }

    #[tokio::test]
    async fn test_expiry_lookup_failure_still_kicks_by_id() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let otto = member(21, "otto");
        directory.add_target(otto.clone());
        let start = Utc::now();
        engine.process_member_at(&otto, false, start).await;

        directory.fail_target_lookup(otto.id);
        let (expired, kicked) = engine
            .expire_warnings(start + Duration::seconds(GRACE_SECS + 1))
            .await;
        assert_eq!((expired, kicked), (1, 1));

        let removals = directory.removals();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].0, otto.id);
        assert_eq!(
            removals[0].1,
            "Failed to meet server criteria: not a member of our main server: Main"
        );
        assert!(engine.warned_members().await.is_empty());
    }

    #[tokio::test]
    async fn test_expiry_skips_entry_concluded_by_join() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let pia = member(22, "pia");
        directory.add_target(pia.clone());
        let start = Utc::now();
        engine.process_member_at(&pia, false, start).await;

        let expired = engine
            .ledger
            .lock()
            .await
            .expired_entries(start + Duration::seconds(GRACE_SECS), engine.settings.grace_period);
        assert_eq!(expired.len(), 1);

        // The join check kicks and clears before the expiry pass reaches the entry
        assert_eq!(engine.process_member(&pia, true).await, CheckOutcome::Kicked);
        assert_eq!(directory.removals().len(), 1);

        assert!(!engine.expire_entry(&expired[0]).await);
        assert_eq!(directory.removals().len(), 1);
        assert!(engine.warned_members().await.is_empty());
    }

    #[tokio::test]
    async fn test_expiry_skips_entry_replaced_by_newer_warning() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let quinn = member(23, "quinn");
        directory.add_target(quinn.clone());
        let start = Utc::now();
        engine.process_member_at(&quinn, false, start).await;

        let expired = engine
            .ledger
            .lock()
            .await
            .expired_entries(start + Duration::seconds(GRACE_SECS), engine.settings.grace_period);
        let rewarned_at = start + Duration::seconds(GRACE_SECS);
        engine.ledger.lock().await.record_warning(
            quinn.id,
            rewarned_at,
            NonComplianceReason::NotReferenceMember,
        );

        assert!(!engine.expire_entry(&expired[0]).await);
        assert!(directory.removals().is_empty());
        let warned = engine.warned_members().await;
        assert_eq!(warned.len(), 1);
        assert_eq!(warned[0].1.warned_at, rewarned_at);
    }

    #[tokio::test]
    async fn test_slow_audit_sink_does_not_hold_the_ledger() {
        let directory = Arc::new(FakeDirectory::default());
        let gate = Arc::new(Notify::new());
        let audit = AuditLog::new(AuditLevel::Info).with_sink(Arc::new(StallingSink {
            gate: Arc::clone(&gate),
        }));
        let engine = Arc::new(engine_with_audit(
            ComplianceCriterion::ReferenceMembershipOnly,
            Collaborators::from_shared(directory.clone()),
            audit,
        ));
        let rosa = member(24, "rosa");
        directory.add_target(rosa.clone());

        let check = tokio::spawn({
            let engine = Arc::clone(&engine);
            let rosa = rosa.clone();
            async move { engine.process_member(&rosa, false).await }
        });

        // The warning record is stuck in the sink, the ledger stays readable
        let warned = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let warned = engine.warned_members().await;
                if !warned.is_empty() {
                    return warned;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(warned[0].0, rosa.id);
        assert!(!check.is_finished());

        gate.notify_one();
        assert_eq!(check.await.unwrap(), CheckOutcome::Warned);
    }

    #[tokio::test]
    async fn test_member_check_is_audited_at_info() {
        let directory = Arc::new(FakeDirectory::default());
        let sink = Arc::new(RecordingSink::default());
        let engine = engine_with_audit(
            ComplianceCriterion::ReferenceMembershipOnly,
            Collaborators::from_shared(directory.clone()),
            AuditLog::new(AuditLevel::Info).with_sink(sink.clone()),
        );
        let sam = member(25, "sam");
        directory.add_target(sam.clone());
        directory.join_reference(sam.id, []);

        assert_eq!(engine.process_member(&sam, false).await, CheckOutcome::Ok);

        let records = sink.records.lock().unwrap().clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, AuditLevel::Info);
        assert_eq!(records[0].message, "Checking member sam (ID: 25)");
        assert_eq!(records[0].user_id, Some(sam.id));
    }

    #[tokio::test]
    async fn test_sweep_skips_bots() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        directory.add_target(member(16, "helper").as_bot());
        directory.add_target(member(17, "kate"));

        let report = engine.sweep().await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.warned, 1);
    }

    #[tokio::test]
    async fn test_roster_failure_aborts_sweep() {
        let (engine, directory) = setup(ComplianceCriterion::ReferenceMembershipOnly);
        let liam = member(18, "liam");
        directory.add_target(liam.clone());
        let start = Utc::now();
        engine.process_member_at(&liam, false, start).await;

        directory.fail_roster();
        let result = engine
            .sweep_at(start + Duration::seconds(GRACE_SECS * 2))
            .await;
        assert!(matches!(result, Err(EnforcementError::Lookup(_))));
        assert_eq!(engine.warned_members().await.len(), 1);
        assert!(directory.removals().is_empty());
    }

    #[tokio::test]
    async fn test_failed_warning_dm_still_starts_grace_period() {
        let directory = Arc::new(FakeDirectory::default());
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send_direct()
            .times(1)
            .returning(|_, _| Err(EnforcementError::Delivery("Cannot send messages to this user".to_string())));
        notifier
            .expect_post_to_channel()
            .withf(|channel_id, _| *channel_id == WARNING_CHANNEL)
            .times(1)
            .returning(|_, _| Ok(()));

        let collaborators = Collaborators {
            source: directory.clone(),
            notifier: Arc::new(notifier),
            remover: directory.clone(),
        };
        let engine = engine_with(ComplianceCriterion::ReferenceMembershipOnly, collaborators);
        let mia = member(19, "mia");

        assert_eq!(engine.process_member(&mia, false).await, CheckOutcome::Warned);
        assert_eq!(engine.warned_members().await.len(), 1);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(CheckOutcome::Exempt.to_string(), "exempt");
        assert_eq!(CheckOutcome::Kicked.to_string(), "kicked");
        assert_eq!(CheckOutcome::EvaluationError.to_string(), "error");
    }
}
