use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::{Visit, VisitStatus, WaitingRoomError};
use shared_database::supabase::SupabaseClient;

/// Read/write seam against the appointment store. The queue engine is
/// strictly downstream of it: nothing in this crate ever rolls back or
/// compensates an appointment-store write.
#[async_trait]
pub trait VisitDirectory: Send + Sync {
    /// Visits for one patient starting at or after `cutoff` whose status is
    /// not terminal.
    async fn find_active_visits_for_patient(
        &self,
        patient_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Visit>, WaitingRoomError>;

    /// Same filter across one provider's book, ordered by start time.
    async fn find_active_visits_for_provider(
        &self,
        provider_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Visit>, WaitingRoomError>;

    /// Status-change entry point for collaborators. Deliberately not
    /// transactionally coupled to queue mutation; the caller instructs the
    /// queue store separately.
    async fn update_visit_status(
        &self,
        visit_id: Uuid,
        status: VisitStatus,
    ) -> Result<(), WaitingRoomError>;

    /// Maps a connection principal to a patient record, if one exists.
    async fn resolve_patient(&self, user_id: &str) -> Result<Option<Uuid>, WaitingRoomError>;
}

pub struct SupabaseVisitDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseVisitDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn active_filter(cutoff: DateTime<Utc>) -> String {
        // Use URL-encoded RFC3339 format for Supabase
        let encoded_cutoff = urlencoding::encode(&cutoff.to_rfc3339()).into_owned();
        format!(
            "status=not.in.(completed,cancelled)&scheduled_start=gte.{}&order=scheduled_start.asc",
            encoded_cutoff
        )
    }

    async fn fetch_visits(&self, path: &str) -> Result<Vec<Visit>, WaitingRoomError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, None)
            .await
            .map_err(|e| WaitingRoomError::Directory(e.to_string()))?;

        let visits = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Visit>, _>>()
            .map_err(|e| WaitingRoomError::Directory(format!("Failed to parse visits: {}", e)))?;

        Ok(visits)
    }
}

#[async_trait]
impl VisitDirectory for SupabaseVisitDirectory {
    async fn find_active_visits_for_patient(
        &self,
        patient_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Visit>, WaitingRoomError> {
        debug!("Fetching active visits for patient {}", patient_id);
        let path = format!(
            "/rest/v1/visits?patient_id=eq.{}&{}",
            patient_id,
            Self::active_filter(cutoff)
        );
        self.fetch_visits(&path).await
    }

    async fn find_active_visits_for_provider(
        &self,
        provider_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Visit>, WaitingRoomError> {
        debug!("Fetching active visits for provider {}", provider_id);
        let path = format!(
            "/rest/v1/visits?provider_id=eq.{}&{}",
            provider_id,
            Self::active_filter(cutoff)
        );
        self.fetch_visits(&path).await
    }

    async fn update_visit_status(
        &self,
        visit_id: Uuid,
        status: VisitStatus,
    ) -> Result<(), WaitingRoomError> {
        let path = format!("/rest/v1/visits?id=eq.{}", visit_id);
        self.supabase
            .execute(
                Method::PATCH,
                &path,
                Some(json!({ "status": status.to_string() })),
            )
            .await
            .map_err(|e| WaitingRoomError::Directory(e.to_string()))?;

        debug!("Visit {} status updated to {}", visit_id, status);
        Ok(())
    }

    async fn resolve_patient(&self, user_id: &str) -> Result<Option<Uuid>, WaitingRoomError> {
        let path = format!(
            "/rest/v1/patients?user_id=eq.{}&select=id",
            urlencoding::encode(user_id)
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| WaitingRoomError::Directory(e.to_string()))?;

        let patient_id = rows
            .first()
            .and_then(|row| row.get("id"))
            .and_then(|id| id.as_str())
            .and_then(|raw| Uuid::parse_str(raw).ok());

        Ok(patient_id)
    }
}
