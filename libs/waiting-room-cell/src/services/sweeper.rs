use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::services::fanout::QueueFanout;
use crate::services::queue::QueueStore;
use crate::services::session::SessionStore;
use crate::services::sync::QueueSynchronizer;
use crate::{Session, WaitingRoomError};
use shared_config::AppConfig;

/// Outcome of one expiration pass, mostly for logging and tests.
#[derive(Debug, Default, PartialEq)]
pub struct SweepReport {
    pub expired_visits: usize,
    pub providers_notified: usize,
}

/// Periodic self-healing: a short expiration sweep that evicts overrun
/// visits, and a longer full recompute that re-derives whole provider
/// queues to correct drift from partial failures or out-of-band edits.
pub struct ReconciliationScheduler {
    sessions: Arc<dyn SessionStore>,
    store: Arc<dyn QueueStore>,
    synchronizer: Arc<QueueSynchronizer>,
    fanout: Arc<QueueFanout>,
    grace: ChronoDuration,
    expiration_period: Duration,
    recompute_period: Duration,
    is_shutdown: tokio::sync::RwLock<bool>,
}

impl ReconciliationScheduler {
    pub fn new(
        config: &AppConfig,
        sessions: Arc<dyn SessionStore>,
        store: Arc<dyn QueueStore>,
        synchronizer: Arc<QueueSynchronizer>,
        fanout: Arc<QueueFanout>,
    ) -> Self {
        Self {
            sessions,
            store,
            synchronizer,
            fanout,
            grace: ChronoDuration::minutes(config.queue_grace_minutes),
            expiration_period: Duration::from_secs(config.expiration_sweep_seconds),
            recompute_period: Duration::from_secs(config.recompute_sweep_seconds),
            is_shutdown: tokio::sync::RwLock::new(false),
        }
    }

    /// Spawn both sweep loops. Each loop runs its sweep to completion
    /// before the next tick, so a sweep never overlaps itself; ad hoc
    /// synchronizer calls from connects may interleave freely.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            "Starting reconciliation scheduler (expiration {:?}, recompute {:?})",
            self.expiration_period, self.recompute_period
        );

        let expiration = Arc::clone(&self);
        let expiration_handle = tokio::spawn(async move {
            expiration.expiration_loop().await;
        });

        let recompute = self;
        let recompute_handle = tokio::spawn(async move {
            recompute.recompute_loop().await;
        });

        vec![expiration_handle, recompute_handle]
    }

    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        *is_shutdown = true;
        info!("Reconciliation scheduler shutting down");
    }

    async fn expiration_loop(&self) {
        let mut interval = tokio::time::interval(self.expiration_period);

        loop {
            interval.tick().await;
            if *self.is_shutdown.read().await {
                break;
            }

            match self.run_expiration_sweep().await {
                Ok(report) if report.expired_visits > 0 => {
                    info!(
                        "Expiration sweep evicted {} visit(s) across {} provider(s)",
                        report.expired_visits, report.providers_notified
                    );
                }
                Ok(_) => debug!("Expiration sweep found nothing to evict"),
                Err(e) => error!("Expiration sweep failed: {}", e),
            }
        }
    }

    async fn recompute_loop(&self) {
        let mut interval = tokio::time::interval(self.recompute_period);

        loop {
            interval.tick().await;
            if *self.is_shutdown.read().await {
                break;
            }

            if let Err(e) = self.run_recompute_sweep().await {
                error!("Recompute sweep failed: {}", e);
            }
        }
    }

    /// Evict tracked visits whose end-time passed the grace window. One
    /// provider fanout per affected provider, however many visits expired
    /// there. Per-session failures are logged and never block siblings.
    #[instrument(skip(self))]
    pub async fn run_expiration_sweep(&self) -> Result<SweepReport, WaitingRoomError> {
        let sessions = self.sessions.list_active().await?;
        let now = Utc::now();

        let mut report = SweepReport::default();
        let mut affected_providers: HashSet<Uuid> = HashSet::new();
        let mut affected_patients: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();

        for session in &sessions {
            match self.expire_session_visits(session, now).await {
                Ok(expired) if !expired.is_empty() => {
                    report.expired_visits += expired.len();
                    affected_providers.extend(expired.iter().copied());
                    affected_patients
                        .entry(session.patient_id)
                        .or_default()
                        .extend(session.tracked_providers());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Expiration failed for session {} (patient {}): {}",
                        session.session_id, session.patient_id, e
                    );
                }
            }
        }

        for provider_id in &affected_providers {
            match self.store.list(*provider_id).await {
                Ok(snapshot) => {
                    if let Err(e) = self.fanout.publish_provider(*provider_id, snapshot).await {
                        warn!("Fanout after expiration failed for provider {}: {}", provider_id, e);
                    } else {
                        report.providers_notified += 1;
                    }
                }
                Err(e) => warn!("Snapshot read failed for provider {}: {}", provider_id, e),
            }
        }

        for (patient_id, providers) in affected_patients {
            let providers: Vec<Uuid> = providers.into_iter().collect();
            if let Err(e) = self
                .synchronizer
                .publish_patient_snapshot(patient_id, &providers)
                .await
            {
                warn!("Patient fanout after expiration failed for {}: {}", patient_id, e);
            }
        }

        Ok(report)
    }

    /// Re-derive every provider queue referenced by a live session.
    /// Per-provider failures are logged and skipped.
    #[instrument(skip(self))]
    pub async fn run_recompute_sweep(&self) -> Result<usize, WaitingRoomError> {
        let sessions = self.sessions.list_active().await?;
        let providers: HashSet<Uuid> = sessions
            .iter()
            .flat_map(|s| s.tracked_providers())
            .collect();

        let mut rebuilt = 0;
        for provider_id in providers {
            match self.synchronizer.rebuild_provider(provider_id).await {
                Ok(()) => rebuilt += 1,
                Err(e) => {
                    warn!("Recompute failed for provider {}: {}", provider_id, e);
                }
            }
        }

        if rebuilt > 0 {
            debug!("Recompute sweep rebuilt {} provider queue(s)", rebuilt);
        }
        Ok(rebuilt)
    }

    /// Remove this session's overrun visits from their queues. Returns the
    /// providers that actually lost an entry; already-absent members (a
    /// prior sweep, a concurrent disconnect) are not re-notified.
    async fn expire_session_visits(
        &self,
        session: &Session,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<Uuid>, WaitingRoomError> {
        let mut affected = Vec::new();

        for tracked in &session.tracked_visits {
            if tracked.scheduled_end + self.grace >= now {
                continue;
            }

            let removed = self
                .store
                .remove(tracked.provider_id, session.patient_id)
                .await?;
            if removed {
                debug!(
                    "Expired visit {} for patient {} at provider {}",
                    tracked.visit_id, session.patient_id, tracked.provider_id
                );
                affected.push(tracked.provider_id);
            }
        }

        Ok(affected)
    }
}
