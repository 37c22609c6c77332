use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::api::{ApiClient, ApiError, BatchPosition, BatchRequest};
use crate::storage::{PositionQueue, QueuedPosition, MAX_QUEUE_LEN};

/// A full queue fits in one request.
pub const DEFAULT_BATCH_SIZE: usize = MAX_QUEUE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayOutcome {
    pub sent: usize,
    pub remaining: usize,
}

/// Uploads the durable queue to the batch endpoint.
///
/// Only what was snapshotted and acknowledged is removed, so samples
/// enqueued while a request is in flight stay queued.
pub struct QueueReplayer {
    queue: Arc<PositionQueue>,
    api: Arc<ApiClient>,
    batch_size: usize,
    in_flight: Mutex<()>,
}

impl QueueReplayer {
    pub fn new(queue: Arc<PositionQueue>, api: Arc<ApiClient>, batch_size: usize) -> Self {
        Self {
            queue,
            api,
            batch_size: batch_size.max(1),
            in_flight: Mutex::new(()),
        }
    }

    /// Returns `None` when another replay is already running.
    pub async fn replay(&self) -> Option<Result<ReplayOutcome, ApiError>> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Replay already in flight, skipping");
            return None;
        };
        Some(self.replay_snapshot().await)
    }

    async fn replay_snapshot(&self) -> Result<ReplayOutcome, ApiError> {
        let snapshot = self.queue.drain_all().await;
        if snapshot.is_empty() {
            return Ok(ReplayOutcome::default());
        }

        let mut sent = 0;
        for chunk in batches(&snapshot, self.batch_size) {
            let request = BatchRequest {
                session_id: chunk[0].session_id.clone(),
                positions: chunk.iter().map(BatchPosition::from).collect(),
            };
            match self.api.post_batch(&request).await {
                Ok(response) => {
                    if response.inserted != chunk.len() {
                        debug!(
                            "Server inserted {} of {} positions",
                            response.inserted,
                            chunk.len()
                        );
                    }
                    self.queue.remove_n(chunk.len()).await;
                    sent += chunk.len();
                }
                Err(e) => {
                    warn!(
                        "Replay stopped after {} of {} positions: {}",
                        sent,
                        snapshot.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        info!("Replayed {} queued positions", sent);
        Ok(ReplayOutcome {
            sent,
            remaining: snapshot.len() - sent,
        })
    }
}

/// Consecutive runs of at most `size` items sharing one session id.
fn batches(items: &[QueuedPosition], size: usize) -> Vec<&[QueuedPosition]> {
    let mut out = Vec::new();
    let mut start = 0;
    while start < items.len() {
        let session = &items[start].session_id;
        let mut end = start + 1;
        while end < items.len() && end - start < size && &items[end].session_id == session {
            end += 1;
        }
        out.push(&items[start..end]);
        start = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockBackend;
    use crate::storage::MemoryStore;
    use chrono::Utc;
    use std::sync::atomic::Ordering;

    fn position(session: &str, i: usize) -> QueuedPosition {
        QueuedPosition {
            session_id: session.into(),
            lat: i as f64,
            lng: 0.0,
            accuracy: 5.0,
            recorded_at: Utc::now(),
        }
    }

    async fn queue_with(items: &[(&str, usize)]) -> Arc<PositionQueue> {
        let queue = Arc::new(PositionQueue::new(Arc::new(MemoryStore::default())));
        for (session, i) in items {
            queue.enqueue(position(session, *i)).await;
        }
        queue
    }

    #[test]
    fn batches_split_on_size_and_session() {
        let items: Vec<_> = [("a", 1), ("a", 2), ("a", 3), ("b", 4), ("a", 5)]
            .iter()
            .map(|(s, i)| position(s, *i))
            .collect();
        let sizes: Vec<usize> = batches(&items, 2).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1, 1]);
        assert!(batches(&[], 2).is_empty());
    }

    #[tokio::test]
    async fn successful_replay_empties_the_queue() {
        let backend = MockBackend::start().await;
        let api = Arc::new(backend.client("valid-0"));
        let queue = queue_with(&[("s1", 1), ("s1", 2), ("s2", 3)]).await;
        let replayer = QueueReplayer::new(queue.clone(), api, DEFAULT_BATCH_SIZE);

        let outcome = replayer.replay().await.unwrap().unwrap();
        assert_eq!(outcome, ReplayOutcome { sent: 3, remaining: 0 });
        assert_eq!(queue.size().await, 0);

        let batches = backend.state.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].session_id, "s1");
        assert_eq!(batches[0].positions.len(), 2);
        assert_eq!(batches[1].session_id, "s2");
    }

    #[tokio::test]
    async fn full_queue_goes_out_in_one_request() {
        let backend = MockBackend::start().await;
        let api = Arc::new(backend.client("valid-0"));
        let queue = Arc::new(PositionQueue::new(Arc::new(MemoryStore::default())));
        for i in 0..MAX_QUEUE_LEN {
            queue.enqueue(position("s1", i)).await;
        }
        let replayer = QueueReplayer::new(queue.clone(), api, DEFAULT_BATCH_SIZE);

        let outcome = replayer.replay().await.unwrap().unwrap();
        assert_eq!(outcome.sent, MAX_QUEUE_LEN);
        assert_eq!(queue.size().await, 0);
        let batches = backend.state.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].positions.len(), MAX_QUEUE_LEN);
    }

    #[tokio::test]
    async fn partial_success_removes_only_what_was_acknowledged() {
        let backend = MockBackend::start().await;
        *backend.state.accept_batches.lock().unwrap() = Some(1);
        let api = Arc::new(backend.client("valid-0"));
        let queue = queue_with(&[("s1", 1), ("s1", 2), ("s1", 3), ("s1", 4), ("s1", 5)]).await;
        let replayer = QueueReplayer::new(queue.clone(), api, 3);

        assert!(replayer.replay().await.unwrap().is_err());
        assert_eq!(queue.size().await, 2);
        let left: Vec<f64> = queue.drain_all().await.iter().map(|p| p.lat).collect();
        assert_eq!(left, vec![4.0, 5.0]);
    }

    #[tokio::test]
    async fn failure_leaves_the_queue_untouched() {
        let backend = MockBackend::start().await;
        backend.state.fail_batches.store(true, Ordering::SeqCst);
        let api = Arc::new(backend.client("valid-0"));
        let queue = queue_with(&[("s1", 1), ("s1", 2)]).await;
        let replayer = QueueReplayer::new(queue.clone(), api, DEFAULT_BATCH_SIZE);

        assert!(replayer.replay().await.unwrap().is_err());
        assert_eq!(queue.size().await, 2);
    }

    #[tokio::test]
    async fn empty_queue_sends_nothing() {
        let backend = MockBackend::start().await;
        let api = Arc::new(backend.client("valid-0"));
        let queue = queue_with(&[]).await;
        let replayer = QueueReplayer::new(queue, api, DEFAULT_BATCH_SIZE);

        let outcome = replayer.replay().await.unwrap().unwrap();
        assert_eq!(outcome.sent, 0);
        assert!(backend.state.batches.lock().unwrap().is_empty());
    }
}
