pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::*;
pub use models::*;
pub use router::create_waiting_room_router;
pub use services::*;

use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

/// Fully wired waiting-room services sharing one fanout and one store.
/// Built once at startup and handed to the router and the scheduler.
pub struct WaitingRoomCell {
    pub store: Arc<dyn QueueStore>,
    pub directory: Arc<dyn VisitDirectory>,
    pub fanout: Arc<QueueFanout>,
    pub synchronizer: Arc<QueueSynchronizer>,
    pub registry: Arc<SessionRegistry>,
    pub scheduler: Arc<ReconciliationScheduler>,
}

impl WaitingRoomCell {
    pub async fn new(config: &AppConfig) -> Result<Self, WaitingRoomError> {
        let supabase = Arc::new(SupabaseClient::new(config));
        let directory: Arc<dyn VisitDirectory> =
            Arc::new(SupabaseVisitDirectory::new(supabase));
        let store: Arc<dyn QueueStore> = Arc::new(RedisQueueStore::new(config).await?);
        let sessions: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(config).await?);

        Ok(Self::from_parts(config, store, directory, sessions))
    }

    /// Assemble from explicit backends; tests inject in-memory doubles here.
    pub fn from_parts(
        config: &AppConfig,
        store: Arc<dyn QueueStore>,
        directory: Arc<dyn VisitDirectory>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let fanout = Arc::new(QueueFanout::new());
        let synchronizer = Arc::new(QueueSynchronizer::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            Arc::clone(&fanout),
            config.queue_grace_minutes,
        ));
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&sessions),
            Arc::clone(&directory),
            Arc::clone(&synchronizer),
            Arc::clone(&fanout),
        ));
        let scheduler = Arc::new(ReconciliationScheduler::new(
            config,
            Arc::clone(&sessions),
            Arc::clone(&store),
            Arc::clone(&synchronizer),
            Arc::clone(&fanout),
        ));

        Self {
            store,
            directory,
            fanout,
            synchronizer,
            registry,
            scheduler,
        }
    }
}
