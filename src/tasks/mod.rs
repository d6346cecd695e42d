use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sqlx::{MySql, Pool};

use crate::database;
use crate::error::ServiceError;

const DELAYED_QUEUE_KEY: &str = "userroom:tasks:delayed";

/// Delayed jobs understood by the queue worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "camelCase")]
pub enum DelayedTask {
    #[serde(rename_all = "camelCase")]
    DeactivateRoomIfEmpty { room_id: String },
}

impl DelayedTask {
    /// Canonical encoding used as the queue member. Identical tasks encode
    /// identically, which is what lets `ZADD NX` collapse a re-schedule into
    /// the already-pending entry.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Fire-and-forget scheduling seam. The dispatcher only ever talks to this
/// trait, so tests can record schedules without a queue or a timer.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn schedule_delayed(&self, task: DelayedTask, delay: Duration) -> Result<(), ServiceError>;
}

/// Redis sorted-set delayed queue. Member is the canonical task encoding,
/// score is the due unix timestamp.
pub struct RedisTaskQueue {
    client: redis::Client,
}

impl RedisTaskQueue {
    pub fn new(redis_url: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }
}

#[async_trait]
impl TaskScheduler for RedisTaskQueue {
    async fn schedule_delayed(&self, task: DelayedTask, delay: Duration) -> Result<(), ServiceError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let member = task.encode()?;
        let due_at = Utc::now().timestamp() + delay.as_secs() as i64;

        // NX keeps the earliest schedule: at most one pending entry per task
        let added: i64 = redis::cmd("ZADD")
            .arg(DELAYED_QUEUE_KEY)
            .arg("NX")
            .arg(due_at)
            .arg(&member)
            .query_async(&mut conn)
            .await?;

        if added == 0 {
            tracing::debug!(task = %member, "task already pending, keeping earlier schedule");
        } else {
            tracing::info!(task = %member, due_at, "delayed task added to the queue");
        }
        Ok(())
    }
}

/// Polls the delayed queue and executes due tasks. Spawned once at startup.
pub struct TaskWorker {
    client: redis::Client,
    pool: Pool<MySql>,
    poll_interval: Duration,
}

impl TaskWorker {
    pub fn new(
        redis_url: &str,
        pool: Pool<MySql>,
        poll_interval: Duration,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            pool,
            poll_interval,
        })
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.drain_due().await {
                tracing::error!(error = %e, "task worker poll failed");
            }
        }
    }

    async fn drain_due(&self) -> Result<(), ServiceError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let now = Utc::now().timestamp();
        let due: Vec<String> = conn.zrangebyscore(DELAYED_QUEUE_KEY, "-inf", now).await?;

        for member in due {
            // Claim the entry; another worker may already have taken it
            let removed: i64 = conn.zrem(DELAYED_QUEUE_KEY, &member).await?;
            if removed == 0 {
                continue;
            }
            match DelayedTask::decode(&member) {
                Ok(task) => {
                    if let Err(e) = self.execute(task).await {
                        tracing::error!(error = %e, task = %member, "delayed task failed");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, task = %member, "unreadable delayed task dropped");
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, task: DelayedTask) -> Result<(), ServiceError> {
        match task {
            DelayedTask::DeactivateRoomIfEmpty { room_id } => {
                let deactivated = database::deactivate_room_if_empty(&self.pool, &room_id).await?;
                if deactivated {
                    tracing::info!(room_id = %room_id, "room deactivated after staying empty");
                } else {
                    tracing::info!(
                        room_id = %room_id,
                        "room no longer empty or already inactive, deactivation skipped"
                    );
                }
            }
        }
        Ok(())
    }
}
