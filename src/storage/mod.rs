mod queue;
mod store;

pub use queue::{PositionQueue, QueuedPosition, MAX_QUEUE_LEN};
pub use store::{read_json, write_json, FileStore, KeyValueStore, StorageError};

#[cfg(test)]
pub(crate) use store::tests::{FailingStore, MemoryStore};
