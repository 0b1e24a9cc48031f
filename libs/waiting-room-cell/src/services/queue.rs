use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{QueueEntry, WaitingRoomError};
use shared_config::AppConfig;

/// The per-provider ordered queue. Member = patient, score = position.
/// Positions within one provider form a contiguous 0..n-1 run; `remove`
/// compacts atomically so concurrent removals cannot leave gaps.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Upsert the patient at `position`. Never duplicates a
    /// (provider, patient) membership.
    async fn add(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
        position: i64,
        visit_id: Option<Uuid>,
    ) -> Result<(), WaitingRoomError>;

    /// Remove the patient and shift every later member down by one, as a
    /// single uninterruptible operation. Returns whether a member was
    /// actually removed.
    async fn remove(&self, provider_id: Uuid, patient_id: Uuid) -> Result<bool, WaitingRoomError>;

    async fn position(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<i64>, WaitingRoomError>;

    /// True at position 0, or when no member holds a strictly smaller
    /// position. The second clause tolerates the brief window after a
    /// removal elsewhere before compaction is visible to this reader.
    async fn is_next(&self, provider_id: Uuid, patient_id: Uuid)
        -> Result<bool, WaitingRoomError>;

    /// Ordered snapshot of one provider's queue.
    async fn list(&self, provider_id: Uuid) -> Result<Vec<QueueEntry>, WaitingRoomError>;

    /// Administrative wipe of one provider's queue.
    async fn clear(&self, provider_id: Uuid) -> Result<(), WaitingRoomError>;

    /// Atomic full rewrite, used by the provider-wide recompute.
    async fn replace(
        &self,
        provider_id: Uuid,
        entries: &[QueueEntry],
    ) -> Result<(), WaitingRoomError>;
}

/// Removes a member and closes the gap it leaves, entirely server-side.
/// Two concurrent removals on the same queue each see a consistent view;
/// neither can compact against stale scores.
const REMOVE_AND_COMPACT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not score then
    return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
local tail = redis.call('ZRANGEBYSCORE', KEYS[1], score, '+inf', 'WITHSCORES')
for i = 1, #tail, 2 do
    redis.call('ZADD', KEYS[1], tonumber(tail[i + 1]) - 1, tail[i])
end
return 1
"#;

pub struct RedisQueueStore {
    pool: Pool,
    remove_script: redis::Script,
}

impl RedisQueueStore {
    pub async fn new(config: &AppConfig) -> Result<Self, WaitingRoomError> {
        let redis_url = config
            .redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        Self::from_url(&redis_url).await
    }

    pub async fn from_url(redis_url: &str) -> Result<Self, WaitingRoomError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| WaitingRoomError::Pool(format!("Pool creation error: {}", e)))?;

        // Test connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| WaitingRoomError::Pool(format!("Connection error: {}", e)))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis queue store initialized successfully");

        Ok(Self {
            pool,
            remove_script: redis::Script::new(REMOVE_AND_COMPACT),
        })
    }

    async fn get_connection(&self) -> Result<Connection, WaitingRoomError> {
        self.pool
            .get()
            .await
            .map_err(|e| WaitingRoomError::Pool(e.to_string()))
    }
}

pub fn queue_key(provider_id: Uuid) -> String {
    format!("waiting_room:queue:{}", provider_id)
}

pub fn visit_map_key(provider_id: Uuid) -> String {
    format!("waiting_room:visits:{}", provider_id)
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn add(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
        position: i64,
        visit_id: Option<Uuid>,
    ) -> Result<(), WaitingRoomError> {
        let mut conn = self.get_connection().await?;
        let member = patient_id.to_string();

        let _: () = conn
            .zadd(queue_key(provider_id), &member, position)
            .await?;

        match visit_id {
            Some(visit) => {
                let _: () = conn
                    .hset(visit_map_key(provider_id), &member, visit.to_string())
                    .await?;
            }
            None => {
                // A manual add carries no visit; drop any stale mapping so
                // snapshots do not report a visit that no longer backs the
                // entry.
                let _: () = conn.hdel(visit_map_key(provider_id), &member).await?;
            }
        }

        debug!(
            "Added patient {} to provider {} queue at position {}",
            patient_id, provider_id, position
        );
        Ok(())
    }

    async fn remove(&self, provider_id: Uuid, patient_id: Uuid) -> Result<bool, WaitingRoomError> {
        let mut conn = self.get_connection().await?;

        let removed: i64 = self
            .remove_script
            .key(queue_key(provider_id))
            .key(visit_map_key(provider_id))
            .arg(patient_id.to_string())
            .invoke_async(&mut conn)
            .await?;

        if removed == 1 {
            debug!(
                "Removed patient {} from provider {} queue",
                patient_id, provider_id
            );
        }
        Ok(removed == 1)
    }

    async fn position(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<i64>, WaitingRoomError> {
        let mut conn = self.get_connection().await?;
        let score: Option<f64> = conn
            .zscore(queue_key(provider_id), patient_id.to_string())
            .await?;
        Ok(score.map(|s| s as i64))
    }

    async fn is_next(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
    ) -> Result<bool, WaitingRoomError> {
        let mut conn = self.get_connection().await?;
        let key = queue_key(provider_id);

        let score: Option<f64> = conn.zscore(&key, patient_id.to_string()).await?;
        let score = match score {
            Some(s) => s as i64,
            None => return Ok(false),
        };
        if score == 0 {
            return Ok(true);
        }

        // Post-removal drift can leave the head above zero for a moment;
        // the member is still next if nothing ranks below it.
        let ahead: i64 = conn
            .zcount(&key, "-inf", format!("({}", score))
            .await?;
        Ok(ahead == 0)
    }

    async fn list(&self, provider_id: Uuid) -> Result<Vec<QueueEntry>, WaitingRoomError> {
        let mut conn = self.get_connection().await?;

        let members: Vec<(String, f64)> = conn
            .zrange_withscores(queue_key(provider_id), 0, -1)
            .await?;
        let visit_map: HashMap<String, String> =
            conn.hgetall(visit_map_key(provider_id)).await?;

        let mut entries = Vec::with_capacity(members.len());
        for (member, score) in members {
            let patient_id = match Uuid::parse_str(&member) {
                Ok(id) => id,
                Err(_) => {
                    warn!(
                        "Dropping malformed queue member '{}' for provider {}",
                        member, provider_id
                    );
                    continue;
                }
            };
            let visit_id = visit_map
                .get(&member)
                .and_then(|raw| Uuid::parse_str(raw).ok());

            entries.push(QueueEntry {
                patient_id,
                visit_id,
                position: score as i64,
            });
        }

        Ok(entries)
    }

    async fn clear(&self, provider_id: Uuid) -> Result<(), WaitingRoomError> {
        let mut conn = self.get_connection().await?;
        let _: () = conn
            .del(&[queue_key(provider_id), visit_map_key(provider_id)])
            .await?;
        info!("Cleared waiting queue for provider {}", provider_id);
        Ok(())
    }

    async fn replace(
        &self,
        provider_id: Uuid,
        entries: &[QueueEntry],
    ) -> Result<(), WaitingRoomError> {
        let mut conn = self.get_connection().await?;
        let q_key = queue_key(provider_id);
        let v_key = visit_map_key(provider_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&[q_key.clone(), v_key.clone()]).ignore();
        for entry in entries {
            let member = entry.patient_id.to_string();
            pipe.zadd(&q_key, &member, entry.position).ignore();
            if let Some(visit) = entry.visit_id {
                pipe.hset(&v_key, &member, visit.to_string()).ignore();
            }
        }

        let _: () = pipe.query_async(&mut conn).await?;
        debug!(
            "Rewrote provider {} queue with {} entries",
            provider_id,
            entries.len()
        );
        Ok(())
    }
}
