//! Reconciliation scheduler
//!
//! Two triggers feed the engine: member joins, checked immediately on the
//! caller's task, and the periodic sweep, which runs on a dedicated task
//! after a startup delay. On-demand sweeps are routed through the same task.

use crate::enforcement::{
    CheckOutcome, ENFORCEMENT_TARGET, EnforcementEngine, EnforcementError, EnforcementResult,
    Member, SweepReport,
};
use poise::serenity_prelude::UserId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Requests accepted by the scheduler task
#[derive(Debug)]
pub enum SchedulerRequest {
    /// Run a sweep now, optionally reporting the result
    SweepNow {
        reply: Option<oneshot::Sender<EnforcementResult<SweepReport>>>,
    },
    /// Stop the scheduler task
    Shutdown,
}

/// Periodic sweep driver
pub struct ReconciliationScheduler {
    engine: Arc<EnforcementEngine>,
    startup_delay: Duration,
    interval: Duration,
}

impl ReconciliationScheduler {
    pub fn new(engine: Arc<EnforcementEngine>, startup_delay: Duration, interval: Duration) -> Self {
        Self {
            engine,
            startup_delay,
            interval,
        }
    }

    /// Spawn the scheduler task
    pub fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<SchedulerRequest>(16);
        let handle = SchedulerHandle {
            tx,
            engine: Arc::clone(&self.engine),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(self, mut rx: mpsc::Receiver<SchedulerRequest>) {
        info!(
            target: ENFORCEMENT_TARGET,
            "Starting reconciliation scheduler: first sweep in {}s, then every {}s",
            self.startup_delay.as_secs(),
            self.interval.as_secs()
        );

        let delay = tokio::time::sleep(self.startup_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                () = &mut delay => break,
                request = rx.recv() => {
                    if !self.handle_request(request).await {
                        return;
                    }
                }
            }
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.engine.sweep().await {
                        error!(target: ENFORCEMENT_TARGET, "Error during periodic member check: {e}");
                    }
                },
                request = rx.recv() => {
                    if !self.handle_request(request).await {
                        return;
                    }
                }
            }
        }
    }

    /// Returns false when the task should stop
    async fn handle_request(&self, request: Option<SchedulerRequest>) -> bool {
        match request {
            Some(SchedulerRequest::SweepNow { reply }) => {
                info!(target: ENFORCEMENT_TARGET, "Received request for an on-demand sweep");
                let result = self.engine.sweep().await;
                if let Err(e) = &result {
                    error!(target: ENFORCEMENT_TARGET, "Error during on-demand member check: {e}");
                }
                if let Some(reply) = reply {
                    if reply.send(result).is_err() {
                        warn!(target: ENFORCEMENT_TARGET, "Sweep requester went away before the result");
                    }
                }
                true
            }
            Some(SchedulerRequest::Shutdown) | None => {
                info!(target: ENFORCEMENT_TARGET, "Reconciliation scheduler shut down");
                false
            }
        }
    }
}

/// Cloneable entry point to the triggers
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerRequest>,
    engine: Arc<EnforcementEngine>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    #[must_use]
    pub fn engine(&self) -> &Arc<EnforcementEngine> {
        &self.engine
    }

    /// Join trigger: check a member who just joined the target guild
    pub async fn member_joined(&self, member: &Member) -> CheckOutcome {
        info!(
            target: ENFORCEMENT_TARGET,
            user_id = %member.id,
            "Member joined target server: {}", member.name
        );
        self.engine.process_member(member, true).await
    }

    /// Check one member of the target guild by id
    ///
    /// # Errors
    ///
    /// Returns an error if the target guild lookup fails.
    pub async fn check_member(
        &self,
        user_id: UserId,
    ) -> EnforcementResult<Option<(Member, CheckOutcome)>> {
        self.engine.process_member_by_id(user_id).await
    }

    /// Run a sweep on the scheduler task and wait for its report
    ///
    /// # Errors
    ///
    /// Returns the sweep's error, or `Scheduler` if the task is gone.
    pub async fn sweep_now(&self) -> EnforcementResult<SweepReport> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(SchedulerRequest::SweepNow { reply: Some(reply) })
            .await
            .map_err(|_| EnforcementError::Scheduler("scheduler is not running".to_string()))?;
        response
            .await
            .map_err(|_| EnforcementError::Scheduler("scheduler stopped during sweep".to_string()))?
    }

    /// Ask the scheduler task to stop
    pub async fn shutdown(&self) {
        if self.tx.send(SchedulerRequest::Shutdown).await.is_err() {
            warn!(target: ENFORCEMENT_TARGET, "Scheduler already stopped");
        }
    }
}
