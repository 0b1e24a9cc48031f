#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use shared_config::AppConfig;
pub use waiting_room_cell::*;

pub fn test_config() -> AppConfig {
    AppConfig {
        supabase_url: "http://localhost:54321".to_string(),
        supabase_anon_key: "test-anon-key".to_string(),
        redis_url: None,
        queue_grace_minutes: 20,
        expiration_sweep_seconds: 60,
        recompute_sweep_seconds: 300,
        session_ttl_seconds: 86400,
    }
}

pub fn visit_at(
    patient_id: Uuid,
    provider_id: Uuid,
    start: DateTime<Utc>,
) -> Visit {
    Visit {
        id: Uuid::new_v4(),
        patient_id,
        provider_id,
        scheduled_start: start,
        scheduled_end: start + Duration::minutes(30),
        status: VisitStatus::Scheduled,
    }
}

/// Upcoming visit, safely inside the active window.
pub fn upcoming_visit(patient_id: Uuid, provider_id: Uuid, minutes_ahead: i64) -> Visit {
    visit_at(
        patient_id,
        provider_id,
        Utc::now() + Duration::minutes(minutes_ahead),
    )
}

// =============================================================================
// In-memory queue store: mirrors the Redis semantics, including the atomic
// remove-and-compact, behind a single mutex.
// =============================================================================

#[derive(Debug, Clone)]
struct StoredEntry {
    patient_id: Uuid,
    visit_id: Option<Uuid>,
    position: i64,
}

#[derive(Default)]
pub struct InMemoryQueueStore {
    queues: Mutex<HashMap<Uuid, Vec<StoredEntry>>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn add(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
        position: i64,
        visit_id: Option<Uuid>,
    ) -> Result<(), WaitingRoomError> {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(provider_id).or_default();

        if let Some(existing) = queue.iter_mut().find(|e| e.patient_id == patient_id) {
            existing.position = position;
            existing.visit_id = visit_id;
        } else {
            queue.push(StoredEntry {
                patient_id,
                visit_id,
                position,
            });
        }
        Ok(())
    }

    async fn remove(&self, provider_id: Uuid, patient_id: Uuid) -> Result<bool, WaitingRoomError> {
        let mut queues = self.queues.lock().await;
        let queue = match queues.get_mut(&provider_id) {
            Some(q) => q,
            None => return Ok(false),
        };

        let removed_position = match queue.iter().position(|e| e.patient_id == patient_id) {
            Some(index) => {
                let removed = queue.remove(index);
                removed.position
            }
            None => return Ok(false),
        };

        for entry in queue.iter_mut() {
            if entry.position > removed_position {
                entry.position -= 1;
            }
        }
        Ok(true)
    }

    async fn position(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<i64>, WaitingRoomError> {
        let queues = self.queues.lock().await;
        Ok(queues.get(&provider_id).and_then(|queue| {
            queue
                .iter()
                .find(|e| e.patient_id == patient_id)
                .map(|e| e.position)
        }))
    }

    async fn is_next(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
    ) -> Result<bool, WaitingRoomError> {
        let queues = self.queues.lock().await;
        let queue = match queues.get(&provider_id) {
            Some(q) => q,
            None => return Ok(false),
        };
        let own = match queue.iter().find(|e| e.patient_id == patient_id) {
            Some(e) => e.position,
            None => return Ok(false),
        };
        Ok(own == 0 || !queue.iter().any(|e| e.position < own))
    }

    async fn list(&self, provider_id: Uuid) -> Result<Vec<QueueEntry>, WaitingRoomError> {
        let queues = self.queues.lock().await;
        let mut entries: Vec<QueueEntry> = queues
            .get(&provider_id)
            .map(|queue| {
                queue
                    .iter()
                    .map(|e| QueueEntry {
                        patient_id: e.patient_id,
                        visit_id: e.visit_id,
                        position: e.position,
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by_key(|e| e.position);
        Ok(entries)
    }

    async fn clear(&self, provider_id: Uuid) -> Result<(), WaitingRoomError> {
        let mut queues = self.queues.lock().await;
        queues.remove(&provider_id);
        Ok(())
    }

    async fn replace(
        &self,
        provider_id: Uuid,
        entries: &[QueueEntry],
    ) -> Result<(), WaitingRoomError> {
        let mut queues = self.queues.lock().await;
        queues.insert(
            provider_id,
            entries
                .iter()
                .map(|e| StoredEntry {
                    patient_id: e.patient_id,
                    visit_id: e.visit_id,
                    position: e.position,
                })
                .collect(),
        );
        Ok(())
    }
}

// =============================================================================
// In-memory visit directory with per-call error injection.
// =============================================================================

#[derive(Default)]
pub struct InMemoryVisitDirectory {
    visits: Mutex<Vec<Visit>>,
    patients: Mutex<HashMap<String, Uuid>>,
    fail_provider_fetches: Mutex<bool>,
}

impl InMemoryVisitDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert_visit(&self, visit: Visit) {
        self.visits.lock().await.push(visit);
    }

    pub async fn register_patient(&self, user_id: &str, patient_id: Uuid) {
        self.patients
            .lock()
            .await
            .insert(user_id.to_string(), patient_id);
    }

    pub async fn set_visit_status(&self, visit_id: Uuid, status: VisitStatus) {
        let mut visits = self.visits.lock().await;
        if let Some(visit) = visits.iter_mut().find(|v| v.id == visit_id) {
            visit.status = status;
        }
    }

    pub async fn fail_provider_fetches(&self, fail: bool) {
        *self.fail_provider_fetches.lock().await = fail;
    }
}

#[async_trait]
impl VisitDirectory for InMemoryVisitDirectory {
    async fn find_active_visits_for_patient(
        &self,
        patient_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Visit>, WaitingRoomError> {
        let visits = self.visits.lock().await;
        Ok(visits
            .iter()
            .filter(|v| {
                v.patient_id == patient_id && v.is_active() && v.scheduled_start >= cutoff
            })
            .cloned()
            .collect())
    }

    async fn find_active_visits_for_provider(
        &self,
        provider_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Visit>, WaitingRoomError> {
        if *self.fail_provider_fetches.lock().await {
            return Err(WaitingRoomError::Directory(
                "injected provider fetch failure".to_string(),
            ));
        }

        let visits = self.visits.lock().await;
        let mut matching: Vec<Visit> = visits
            .iter()
            .filter(|v| {
                v.provider_id == provider_id && v.is_active() && v.scheduled_start >= cutoff
            })
            .cloned()
            .collect();
        matching.sort_by_key(|v| v.scheduled_start);
        Ok(matching)
    }

    async fn update_visit_status(
        &self,
        visit_id: Uuid,
        status: VisitStatus,
    ) -> Result<(), WaitingRoomError> {
        self.set_visit_status(visit_id, status).await;
        Ok(())
    }

    async fn resolve_patient(&self, user_id: &str) -> Result<Option<Uuid>, WaitingRoomError> {
        Ok(self.patients.lock().await.get(user_id).copied())
    }
}

// =============================================================================
// In-memory session store.
// =============================================================================

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> Result<(), WaitingRoomError> {
        self.sessions
            .lock()
            .await
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, WaitingRoomError> {
        Ok(self.sessions.lock().await.get(&session_id).cloned())
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool, WaitingRoomError> {
        Ok(self.sessions.lock().await.remove(&session_id).is_some())
    }

    async fn list_active(&self) -> Result<Vec<Session>, WaitingRoomError> {
        Ok(self.sessions.lock().await.values().cloned().collect())
    }
}

// =============================================================================
// Wiring helper
// =============================================================================

pub struct TestCell {
    pub cell: WaitingRoomCell,
    pub store: Arc<InMemoryQueueStore>,
    pub directory: Arc<InMemoryVisitDirectory>,
    pub sessions: Arc<InMemorySessionStore>,
}

pub fn build_test_cell() -> TestCell {
    let store = InMemoryQueueStore::new();
    let directory = InMemoryVisitDirectory::new();
    let sessions = InMemorySessionStore::new();

    let cell = WaitingRoomCell::from_parts(
        &test_config(),
        store.clone(),
        directory.clone(),
        sessions.clone(),
    );

    TestCell {
        cell,
        store,
        directory,
        sessions,
    }
}

/// Positions must form exactly 0..n-1 with no gaps or duplicates.
pub fn assert_gap_free(entries: &[QueueEntry]) {
    let mut positions: Vec<i64> = entries.iter().map(|e| e.position).collect();
    positions.sort_unstable();
    let expected: Vec<i64> = (0..entries.len() as i64).collect();
    assert_eq!(
        positions, expected,
        "queue positions are not a contiguous 0-based run"
    );
}
