//! Reliable Redis list queues. A dequeue moves the message into a
//! per-queue in-flight list, and only a terminal resolution removes it,
//! so a crash mid-processing leaves the message recoverable.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;

use waybill_common::error::{WaybillError, WaybillResult};

/// Fetch tasks produced by the backfill orchestrator.
pub const FETCH_QUEUE: &str = "backfill:fetch";
/// Downstream queue of order references awaiting full sync.
pub const ORDER_SYNC_QUEUE: &str = "sync:orders";
/// Downstream queue of shipment references awaiting full sync.
pub const SHIPMENT_SYNC_QUEUE: &str = "sync:shipments";

pub fn inflight_key(queue: &str) -> String {
    format!("{queue}:inflight")
}

/// A dequeued message. `raw` is the exact string stored in Redis; the
/// in-flight removal matches on it byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub queue: String,
    pub raw: String,
}

impl QueuedMessage {
    pub fn payload<T: DeserializeOwned>(&self) -> WaybillResult<T> {
        serde_json::from_str(&self.raw)
            .map_err(|e| WaybillError::Queue(format!("malformed payload on {}: {e}", self.queue)))
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, queue: &str, payload: &serde_json::Value) -> WaybillResult<()>;

    /// Atomically moves up to `max` messages from the queue tail into its
    /// in-flight list and returns them in dequeue order.
    async fn dequeue_batch(&self, queue: &str, max: usize) -> WaybillResult<Vec<QueuedMessage>>;

    /// Drops a message from its in-flight list once it is durably resolved.
    async fn remove_inflight(&self, message: &QueuedMessage) -> WaybillResult<()>;
}

#[derive(Clone)]
pub struct RedisTaskQueue {
    manager: ConnectionManager,
}

impl RedisTaskQueue {
    pub async fn connect(redis_url: &str) -> WaybillResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| WaybillError::Queue(format!("invalid redis url: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| WaybillError::Queue(format!("redis connection failed: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, queue: &str, payload: &serde_json::Value) -> WaybillResult<()> {
        let raw = serde_json::to_string(payload)
            .map_err(|e| WaybillError::Queue(format!("payload encoding failed: {e}")))?;
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(queue)
            .arg(&raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| WaybillError::Queue(format!("enqueue to {queue} failed: {e}")))?;
        Ok(())
    }

    async fn dequeue_batch(&self, queue: &str, max: usize) -> WaybillResult<Vec<QueuedMessage>> {
        let inflight = inflight_key(queue);
        let mut conn = self.manager.clone();
        let mut messages = Vec::new();

        for _ in 0..max {
            let raw: Option<String> = redis::cmd("LMOVE")
                .arg(queue)
                .arg(&inflight)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await
                .map_err(|e| WaybillError::Queue(format!("dequeue from {queue} failed: {e}")))?;
            match raw {
                Some(raw) => messages.push(QueuedMessage {
                    queue: queue.to_owned(),
                    raw,
                }),
                None => break,
            }
        }

        Ok(messages)
    }

    async fn remove_inflight(&self, message: &QueuedMessage) -> WaybillResult<()> {
        let inflight = inflight_key(&message.queue);
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(&inflight)
            .arg(1)
            .arg(&message.raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| WaybillError::Queue(format!("inflight removal failed: {e}")))?;
        Ok(())
    }
}
