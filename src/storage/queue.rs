use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::store::{read_json, write_json, KeyValueStore, StorageError};

pub const QUEUE_KEY: &str = "telemetry:pending_positions";
pub const MAX_QUEUE_LEN: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedPosition {
    pub session_id: String,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Bounded FIFO of samples waiting for server acknowledgement.
///
/// Storage failures never escape: a failed write loses one sample, a failed
/// read looks like an empty queue.
pub struct PositionQueue {
    store: Arc<dyn KeyValueStore>,
    max_len: usize,
    // Serializes read-modify-write cycles on the stored list.
    lock: Mutex<()>,
}

impl PositionQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_capacity(store, MAX_QUEUE_LEN)
    }

    pub fn with_capacity(store: Arc<dyn KeyValueStore>, max_len: usize) -> Self {
        Self {
            store,
            max_len,
            lock: Mutex::new(()),
        }
    }

    pub async fn enqueue(&self, position: QueuedPosition) {
        let _guard = self.lock.lock().await;
        let max_len = self.max_len;

        let result = self
            .with_store(move |store| {
                let mut items = load(store)?;
                items.push(position);
                let overflow = items.len().saturating_sub(max_len);
                items.drain(..overflow);
                write_json(store, QUEUE_KEY, &items)?;
                Ok(overflow)
            })
            .await;

        match result {
            Ok(0) => {}
            Ok(evicted) => debug!("Queue full, evicted {} oldest positions", evicted),
            Err(e) => error!("Failed to enqueue position: {}", e),
        }
    }

    /// Snapshot of every pending item, oldest first. Nothing is removed.
    pub async fn drain_all(&self) -> Vec<QueuedPosition> {
        let _guard = self.lock.lock().await;
        match self.with_store(load).await {
            Ok(items) => items,
            Err(e) => {
                error!("Failed to read position queue: {}", e);
                Vec::new()
            }
        }
    }

    /// Removes the first `n` items present now. Items appended after a
    /// snapshot was taken sit behind the snapshot and survive.
    pub async fn remove_n(&self, n: usize) {
        if n == 0 {
            return;
        }
        let _guard = self.lock.lock().await;

        let result = self
            .with_store(move |store| {
                let mut items = load(store)?;
                let n = n.min(items.len());
                items.drain(..n);
                write_json(store, QUEUE_KEY, &items)?;
                Ok(n)
            })
            .await;

        match result {
            Ok(removed) => debug!("Removed {} acknowledged positions", removed),
            Err(e) => error!("Failed to remove acknowledged positions: {}", e),
        }
    }

    pub async fn size(&self) -> usize {
        let _guard = self.lock.lock().await;
        match self.with_store(|store| load(store).map(|items| items.len())).await {
            Ok(len) => len,
            Err(e) => {
                error!("Failed to read position queue: {}", e);
                0
            }
        }
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&dyn KeyValueStore) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn load(store: &dyn KeyValueStore) -> Result<Vec<QueuedPosition>, StorageError> {
    Ok(read_json(store, QUEUE_KEY)?.unwrap_or_default())
}
