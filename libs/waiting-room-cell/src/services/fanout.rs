use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{PatientQueueEntry, PatientQueueUpdate, ProviderQueueUpdate, QueueEntry, WaitingRoomError};

pub type FanoutSender = broadcast::Sender<String>;
pub type FanoutReceiver = broadcast::Receiver<String>;

const CHANNEL_CAPACITY: usize = 256;

/// Post-mutation snapshot publisher. Delivery is best-effort, at-most-once:
/// the queue store stays authoritative and a client that misses a push can
/// always re-query on reconnect.
pub struct QueueFanout {
    provider_channels: Arc<RwLock<HashMap<Uuid, FanoutSender>>>,
    patient_channels: Arc<RwLock<HashMap<Uuid, FanoutSender>>>,
    global_sender: FanoutSender,
}

impl QueueFanout {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(1000);

        Self {
            provider_channels: Arc::new(RwLock::new(HashMap::new())),
            patient_channels: Arc::new(RwLock::new(HashMap::new())),
            global_sender,
        }
    }

    pub async fn subscribe_provider(&self, provider_id: Uuid) -> FanoutReceiver {
        let mut channels = self.provider_channels.write().await;
        channels
            .entry(provider_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub async fn subscribe_patient(&self, patient_id: Uuid) -> FanoutReceiver {
        let mut channels = self.patient_channels.write().await;
        channels
            .entry(patient_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_global(&self) -> FanoutReceiver {
        self.global_sender.subscribe()
    }

    pub async fn publish_provider(
        &self,
        provider_id: Uuid,
        entries: Vec<QueueEntry>,
    ) -> Result<(), WaitingRoomError> {
        let update = ProviderQueueUpdate {
            provider_id,
            entries,
            generated_at: Utc::now(),
        };
        let message = serde_json::to_string(&update)?;

        {
            let channels = self.provider_channels.read().await;
            if let Some(sender) = channels.get(&provider_id) {
                if let Err(e) = sender.send(message.clone()) {
                    warn!(
                        "Failed to push queue update for provider {}: {}",
                        provider_id, e
                    );
                    // Channel may have no live receivers; not an error
                }
            }
        }

        self.publish_global("provider_queue", serde_json::to_value(&update)?);
        debug!("Published queue snapshot for provider {}", provider_id);
        Ok(())
    }

    pub async fn publish_patient(
        &self,
        patient_id: Uuid,
        entries: Vec<PatientQueueEntry>,
    ) -> Result<(), WaitingRoomError> {
        let update = PatientQueueUpdate {
            patient_id,
            entries,
            generated_at: Utc::now(),
        };
        let message = serde_json::to_string(&update)?;

        {
            let channels = self.patient_channels.read().await;
            if let Some(sender) = channels.get(&patient_id) {
                if let Err(e) = sender.send(message.clone()) {
                    warn!(
                        "Failed to push aggregated update for patient {}: {}",
                        patient_id, e
                    );
                }
            }
        }

        self.publish_global("patient_queue", serde_json::to_value(&update)?);
        debug!("Published aggregated snapshot for patient {}", patient_id);
        Ok(())
    }

    /// Drop a channel once its audience is gone; senders are recreated on
    /// the next subscribe.
    pub async fn prune_patient_channel(&self, patient_id: Uuid) {
        let mut channels = self.patient_channels.write().await;
        if let Some(sender) = channels.get(&patient_id) {
            if sender.receiver_count() == 0 {
                channels.remove(&patient_id);
                debug!("Pruned idle patient channel {}", patient_id);
            }
        }
    }

    fn publish_global(&self, kind: &str, payload: serde_json::Value) {
        let envelope = serde_json::json!({
            "type": kind,
            "timestamp": Utc::now().to_rfc3339(),
            "data": payload,
        })
        .to_string();

        if let Err(e) = self.global_sender.send(envelope) {
            debug!("No global subscribers for {} update: {}", kind, e);
        }
    }
}

impl Default for QueueFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for QueueFanout {
    fn clone(&self) -> Self {
        Self {
            provider_channels: Arc::clone(&self.provider_channels),
            patient_channels: Arc::clone(&self.patient_channels),
            global_sender: self.global_sender.clone(),
        }
    }
}
