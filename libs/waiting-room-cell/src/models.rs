use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// VISITS (read model over the appointment store)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub status: VisitStatus,
}

impl Visit {
    /// Queue-eligible: not in a terminal state. The start-time cutoff is
    /// applied by the directory query, not here.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    Scheduled,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
}

impl VisitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VisitStatus::Completed | VisitStatus::Cancelled)
    }
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisitStatus::Scheduled => write!(f, "scheduled"),
            VisitStatus::CheckedIn => write!(f, "checked_in"),
            VisitStatus::InProgress => write!(f, "in_progress"),
            VisitStatus::Completed => write!(f, "completed"),
            VisitStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ==============================================================================
// QUEUE SNAPSHOTS
// ==============================================================================

/// One member of a provider queue. Derived from the queue store on every
/// read; never persisted as its own record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub patient_id: Uuid,
    /// Absent when the visit mapping could not be resolved, e.g. a racing
    /// status change cleared it between the range read and the hash read.
    pub visit_id: Option<Uuid>,
    pub position: i64,
}

/// A patient's standing in one provider queue, used in the aggregated
/// patient-scoped views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientQueueEntry {
    pub provider_id: Uuid,
    pub visit_id: Option<Uuid>,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderQueueUpdate {
    pub provider_id: Uuid,
    pub entries: Vec<QueueEntry>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientQueueUpdate {
    pub patient_id: Uuid,
    pub entries: Vec<PatientQueueEntry>,
    pub generated_at: DateTime<Utc>,
}

// ==============================================================================
// SESSIONS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// Live-connection bookkeeping. A session points at queue state for cleanup
/// purposes only; deleting it never changes queue membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: String,
    pub patient_id: Uuid,
    pub channel: String,
    pub state: SessionState,
    pub connected_at: DateTime<Utc>,
    pub tracked_visits: Vec<TrackedVisit>,
}

/// The end-time is captured at sync time so the expiration sweep can detect
/// overruns without a round-trip to the appointment store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedVisit {
    pub visit_id: Uuid,
    pub provider_id: Uuid,
    pub scheduled_end: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: String, patient_id: Uuid, channel: String) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            patient_id,
            channel,
            state: SessionState::Active,
            connected_at: Utc::now(),
            tracked_visits: Vec::new(),
        }
    }

    pub fn tracked_providers(&self) -> Vec<Uuid> {
        let mut providers: Vec<Uuid> = self
            .tracked_visits
            .iter()
            .map(|visit| visit.provider_id)
            .collect();
        providers.sort();
        providers.dedup();
        providers
    }
}

// ==============================================================================
// API MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeSessionRequest {
    pub user_id: String,
    pub email: Option<String>,
    pub channel: Option<String>,
}

/// Returned from session initialization and pushed on the patient channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub patient_id: Uuid,
    pub entries: Vec<PatientQueueEntry>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingRoomStats {
    pub active_sessions: usize,
    pub tracked_providers: usize,
}
