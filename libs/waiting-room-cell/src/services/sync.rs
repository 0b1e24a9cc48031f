use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::services::fanout::QueueFanout;
use crate::services::queue::QueueStore;
use crate::services::visits::VisitDirectory;
use crate::{PatientQueueEntry, QueueEntry, Visit, WaitingRoomError};

/// Derives queue membership from the appointment store. Positions reflect
/// temporal scheduling order, never insertion order, so out-of-order
/// rebuilds (a reconnect, a sweep) land in the same place every time.
pub struct QueueSynchronizer {
    store: Arc<dyn QueueStore>,
    directory: Arc<dyn VisitDirectory>,
    fanout: Arc<QueueFanout>,
    grace: Duration,
}

/// What a per-patient rebuild touched; callers use it to seed session
/// tracking and the initial snapshot without re-querying the directory.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub providers: Vec<Uuid>,
    pub visits: Vec<Visit>,
}

impl QueueSynchronizer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        directory: Arc<dyn VisitDirectory>,
        fanout: Arc<QueueFanout>,
        grace_minutes: i64,
    ) -> Self {
        Self {
            store,
            directory,
            fanout,
            grace: Duration::minutes(grace_minutes),
        }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - self.grace
    }

    /// Rebuild one patient's membership across every provider queue they
    /// belong in. Idempotent: each pass removes the patient's own stale
    /// entry before reinserting, so repeated calls converge.
    #[instrument(skip(self))]
    pub async fn sync_patient(&self, patient_id: Uuid) -> Result<SyncOutcome, WaitingRoomError> {
        let cutoff = self.cutoff();
        let visits = self
            .directory
            .find_active_visits_for_patient(patient_id, cutoff)
            .await?;

        let visits: Vec<Visit> = visits.into_iter().filter(|v| v.is_active()).collect();
        if visits.is_empty() {
            // Exit on status change is handled by the mutation path; an
            // empty rebuild has nothing to place.
            debug!("Patient {} has no active visits to queue", patient_id);
            return Ok(SyncOutcome::default());
        }

        let mut by_provider: BTreeMap<Uuid, Vec<Visit>> = BTreeMap::new();
        for visit in &visits {
            by_provider
                .entry(visit.provider_id)
                .or_default()
                .push(visit.clone());
        }

        let mut providers = Vec::with_capacity(by_provider.len());
        for (provider_id, own_visits) in by_provider {
            self.place_patient(provider_id, patient_id, &own_visits, cutoff)
                .await?;
            providers.push(provider_id);
        }

        info!(
            "Synchronized patient {} across {} provider queue(s)",
            patient_id,
            providers.len()
        );
        Ok(SyncOutcome { providers, visits })
    }

    /// Re-derive one provider's entire queue from the appointment store.
    /// Corrects drift from partial failures, missed events, or out-of-band
    /// appointment edits; never surfaces the inconsistency to callers.
    #[instrument(skip(self))]
    pub async fn rebuild_provider(&self, provider_id: Uuid) -> Result<(), WaitingRoomError> {
        let roster = self
            .directory
            .find_active_visits_for_provider(provider_id, self.cutoff())
            .await?;

        let entries = derive_entries(&roster);
        self.store.replace(provider_id, &entries).await?;
        info!(
            "Rebuilt provider {} queue with {} entries",
            provider_id,
            entries.len()
        );

        self.fanout.publish_provider(provider_id, entries).await?;
        Ok(())
    }

    /// Aggregated view of one patient across the given providers, read
    /// straight from the queue store.
    pub async fn patient_snapshot(
        &self,
        patient_id: Uuid,
        providers: &[Uuid],
    ) -> Result<Vec<PatientQueueEntry>, WaitingRoomError> {
        let mut entries = Vec::new();
        for provider_id in providers {
            let queue = self.store.list(*provider_id).await?;
            if let Some(entry) = queue.into_iter().find(|e| e.patient_id == patient_id) {
                entries.push(PatientQueueEntry {
                    provider_id: *provider_id,
                    visit_id: entry.visit_id,
                    position: entry.position,
                });
            }
        }
        Ok(entries)
    }

    /// Push the aggregated patient view on the patient-scoped channel.
    pub async fn publish_patient_snapshot(
        &self,
        patient_id: Uuid,
        providers: &[Uuid],
    ) -> Result<Vec<PatientQueueEntry>, WaitingRoomError> {
        let entries = self.patient_snapshot(patient_id, providers).await?;
        self.fanout
            .publish_patient(patient_id, entries.clone())
            .await?;
        Ok(entries)
    }

    async fn place_patient(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
        own_visits: &[Visit],
        cutoff: DateTime<Utc>,
    ) -> Result<(), WaitingRoomError> {
        // Idempotent rebuild: drop our own stale entry first. Entries of
        // other patients are left alone; each rebuild only moves its own.
        self.store.remove(provider_id, patient_id).await?;

        let roster = self
            .directory
            .find_active_visits_for_provider(provider_id, cutoff)
            .await?;

        let governing = governing_visit(&roster, patient_id)
            .or_else(|| own_visits.iter().min_by(|a, b| visit_order(a, b)));
        let governing = match governing {
            Some(v) => v,
            None => return Ok(()),
        };

        let position = position_among(&roster, patient_id, governing);
        self.store
            .add(provider_id, patient_id, position, Some(governing.id))
            .await?;

        let snapshot = self.store.list(provider_id).await?;
        if let Err(e) = self.fanout.publish_provider(provider_id, snapshot).await {
            warn!("Fanout after sync failed for provider {}: {}", provider_id, e);
        }
        Ok(())
    }
}

/// Deterministic queue order: ascending start time, visit id as tiebreak.
pub fn visit_order(a: &Visit, b: &Visit) -> Ordering {
    a.scheduled_start
        .cmp(&b.scheduled_start)
        .then_with(|| a.id.cmp(&b.id))
}

/// The patient's earliest active visit at this provider; it carries the
/// position and the visit id for the queue entry.
pub fn governing_visit(roster: &[Visit], patient_id: Uuid) -> Option<&Visit> {
    roster
        .iter()
        .filter(|v| v.patient_id == patient_id && v.is_active())
        .min_by(|a, b| visit_order(a, b))
}

/// Rank = number of distinct other patients with a strictly earlier
/// governing visit. Counting patients rather than raw visits keeps the
/// 0..n-1 run contiguous when someone holds several bookings.
pub fn position_among(roster: &[Visit], patient_id: Uuid, governing: &Visit) -> i64 {
    let ahead: HashSet<Uuid> = roster
        .iter()
        .filter(|v| {
            v.patient_id != patient_id
                && v.is_active()
                && visit_order(v, governing) == Ordering::Less
        })
        .map(|v| v.patient_id)
        .collect();
    ahead.len() as i64
}

/// Full queue derivation for a provider: order every active visit, keep the
/// first occurrence per patient, assign contiguous positions.
pub fn derive_entries(roster: &[Visit]) -> Vec<QueueEntry> {
    let mut ordered: Vec<&Visit> = roster.iter().filter(|v| v.is_active()).collect();
    ordered.sort_by(|a, b| visit_order(a, b));

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for visit in ordered {
        if !seen.insert(visit.patient_id) {
            continue;
        }
        entries.push(QueueEntry {
            patient_id: visit.patient_id,
            visit_id: Some(visit.id),
            position: entries.len() as i64,
        });
    }
    entries
}
