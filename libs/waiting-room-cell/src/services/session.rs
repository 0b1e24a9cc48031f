use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::services::fanout::QueueFanout;
use crate::services::sync::QueueSynchronizer;
use crate::services::visits::VisitDirectory;
use crate::{
    Session, SessionSnapshot, TrackedVisit, WaitingRoomError, WaitingRoomStats,
};
use shared_config::AppConfig;
use shared_models::auth::Principal;

/// Connection-id bookkeeping behind an explicit create/lookup/delete store,
/// not a shared in-process map. Sessions are pointers for cleanup; queue
/// membership never depends on them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), WaitingRoomError>;
    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, WaitingRoomError>;
    /// Returns whether a record was deleted.
    async fn delete(&self, session_id: Uuid) -> Result<bool, WaitingRoomError>;
    async fn list_active(&self) -> Result<Vec<Session>, WaitingRoomError>;
}

const ACTIVE_SET_KEY: &str = "waiting_room:sessions:active";

fn session_key(session_id: Uuid) -> String {
    format!("waiting_room:session:{}", session_id)
}

pub struct RedisSessionStore {
    pool: Pool,
    ttl_seconds: i64,
}

impl RedisSessionStore {
    pub async fn new(config: &AppConfig) -> Result<Self, WaitingRoomError> {
        let redis_url = config
            .redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());
        Self::from_url(&redis_url, config.session_ttl_seconds).await
    }

    pub async fn from_url(redis_url: &str, ttl_seconds: i64) -> Result<Self, WaitingRoomError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| WaitingRoomError::Pool(format!("Pool creation error: {}", e)))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| WaitingRoomError::Pool(format!("Connection error: {}", e)))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis session store initialized successfully");

        Ok(Self { pool, ttl_seconds })
    }

    async fn get_connection(&self) -> Result<Connection, WaitingRoomError> {
        self.pool
            .get()
            .await
            .map_err(|e| WaitingRoomError::Pool(e.to_string()))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: &Session) -> Result<(), WaitingRoomError> {
        let mut conn = self.get_connection().await?;
        let payload = serde_json::to_string(session)?;

        // TTL keeps records from crashed connections from accumulating;
        // a live client reconnects long before it fires.
        let _: () = conn
            .set_ex(
                session_key(session.session_id),
                payload,
                self.ttl_seconds as u64,
            )
            .await?;
        let _: () = conn
            .sadd(ACTIVE_SET_KEY, session.session_id.to_string())
            .await?;

        debug!("Session {} persisted", session.session_id);
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, WaitingRoomError> {
        let mut conn = self.get_connection().await?;
        let payload: Option<String> = conn.get(session_key(session_id)).await?;

        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool, WaitingRoomError> {
        let mut conn = self.get_connection().await?;
        let deleted: i64 = conn.del(session_key(session_id)).await?;
        let _: () = conn.srem(ACTIVE_SET_KEY, session_id.to_string()).await?;

        Ok(deleted > 0)
    }

    async fn list_active(&self) -> Result<Vec<Session>, WaitingRoomError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.smembers(ACTIVE_SET_KEY).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for raw_id in ids {
            let payload: Option<String> = conn.get(format!("waiting_room:session:{}", raw_id)).await?;
            match payload {
                Some(raw) => match serde_json::from_str(&raw) {
                    Ok(session) => sessions.push(session),
                    Err(e) => warn!("Dropping unreadable session record {}: {}", raw_id, e),
                },
                None => {
                    // Record expired; prune the index entry.
                    let _: () = conn.srem(ACTIVE_SET_KEY, &raw_id).await?;
                    debug!("Pruned expired session {} from active set", raw_id);
                }
            }
        }

        Ok(sessions)
    }
}

/// Drives the connect/disconnect lifecycle: resolve the principal, rebuild
/// queue membership, persist the session record, push the initial snapshot.
pub struct SessionRegistry {
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn VisitDirectory>,
    synchronizer: Arc<QueueSynchronizer>,
    fanout: Arc<QueueFanout>,
}

impl SessionRegistry {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn VisitDirectory>,
        synchronizer: Arc<QueueSynchronizer>,
        fanout: Arc<QueueFanout>,
    ) -> Self {
        Self {
            sessions,
            directory,
            synchronizer,
            fanout,
        }
    }

    /// CONNECTING -> ACTIVE. Principal resolution failure leaves no trace:
    /// no session record, no queue mutation, no fanout.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn initialize_session(
        &self,
        principal: &Principal,
        channel: Option<String>,
    ) -> Result<SessionSnapshot, WaitingRoomError> {
        let patient_id = self
            .directory
            .resolve_patient(&principal.user_id)
            .await?
            .ok_or_else(|| WaitingRoomError::PatientResolution(principal.user_id.clone()))?;

        let outcome = self.synchronizer.sync_patient(patient_id).await?;

        let mut session = Session::new(
            principal.user_id.clone(),
            patient_id,
            channel.unwrap_or_else(|| format!("patient:{}", patient_id)),
        );
        session.tracked_visits = outcome
            .visits
            .iter()
            .map(|visit| TrackedVisit {
                visit_id: visit.id,
                provider_id: visit.provider_id,
                scheduled_end: visit.scheduled_end,
            })
            .collect();

        self.sessions.create(&session).await?;
        info!(
            "Session {} active for patient {} ({} tracked visit(s))",
            session.session_id,
            patient_id,
            session.tracked_visits.len()
        );

        let entries = self
            .synchronizer
            .publish_patient_snapshot(patient_id, &outcome.providers)
            .await?;

        Ok(SessionSnapshot {
            session_id: session.session_id,
            patient_id,
            entries,
            generated_at: Utc::now(),
        })
    }

    /// ACTIVE -> CLOSED. Deleting the session never touches queue
    /// membership: position tracks visit status, not connection liveness,
    /// and survives reconnects.
    #[instrument(skip(self))]
    pub async fn teardown_session(&self, session_id: Uuid) -> Result<(), WaitingRoomError> {
        let session = self.sessions.get(session_id).await?;
        let deleted = self.sessions.delete(session_id).await?;

        if !deleted {
            // Double disconnects are routine; nothing to clean up.
            debug!("Session {} already gone", session_id);
            return Ok(());
        }

        if let Some(session) = session {
            self.fanout.prune_patient_channel(session.patient_id).await;
            info!(
                "Session {} closed for patient {}",
                session_id, session.patient_id
            );
        }
        Ok(())
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, WaitingRoomError> {
        self.sessions.get(session_id).await
    }

    pub async fn stats(&self) -> Result<WaitingRoomStats, WaitingRoomError> {
        let sessions = self.sessions.list_active().await?;
        let providers: HashSet<Uuid> = sessions
            .iter()
            .flat_map(|s| s.tracked_providers())
            .collect();

        Ok(WaitingRoomStats {
            active_sessions: sessions.len(),
            tracked_providers: providers.len(),
        })
    }
}
