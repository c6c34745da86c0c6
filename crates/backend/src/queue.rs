//! Mutation queue storage.
//!
//! A durable per-directory FIFO of validated updates. Enqueue assigns a
//! strictly increasing sequence number starting at 1; the sequencer reads
//! contiguous ranges and advances a consumed watermark once the revision
//! that incorporated them is log-anchored.
//!
//! The in-memory store retains consumed entries so mutation listings can be
//! served for historical revisions; entries are only dropped when the
//! directory itself is garbage collected.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use lattica_keydir_types::error::Result;
use lattica_keydir_types::types::{DirectoryId, EntryUpdate, QueuedUpdate};
use lattica_keydir_types::KeydirError;
use parking_lot::Mutex;
use tokio::sync::watch;

/// The mutation queue seam.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends an update and returns its sequence number.
    async fn enqueue(&self, directory_id: &DirectoryId, update: EntryUpdate) -> Result<u64>;

    /// Reads up to `max` updates with `seq > after_seq`, in sequence order.
    async fn read_range(
        &self,
        directory_id: &DirectoryId,
        after_seq: u64,
        max: usize,
    ) -> Result<Vec<QueuedUpdate>>;

    /// The largest assigned sequence number (0 when nothing was enqueued).
    async fn high_water_mark(&self, directory_id: &DirectoryId) -> Result<u64>;

    /// Marks all entries with `seq <= up_to` as consumed.
    async fn advance(&self, directory_id: &DirectoryId, up_to: u64) -> Result<()>;

    /// A watch channel carrying the latest assigned sequence number.
    ///
    /// The sequencer subscribes to wake on enqueue instead of polling.
    fn activity(&self, directory_id: &DirectoryId) -> Result<watch::Receiver<u64>>;
}

struct DirectoryQueue {
    entries: BTreeMap<u64, EntryUpdate>,
    next_seq: u64,
    consumed: u64,
    notify: watch::Sender<u64>,
}

impl DirectoryQueue {
    fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self { entries: BTreeMap::new(), next_seq: 1, consumed: 0, notify }
    }
}

/// In-memory reference queue store.
#[derive(Default)]
pub struct InMemoryQueueStore {
    directories: DashMap<DirectoryId, Mutex<DirectoryQueue>>,
}

impl InMemoryQueueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisions an empty queue for a directory.
    pub fn provision(&self, directory_id: &DirectoryId) {
        self.directories.insert(directory_id.clone(), Mutex::new(DirectoryQueue::new()));
    }

    /// Destroys all state for a directory.
    pub fn remove(&self, directory_id: &DirectoryId) {
        self.directories.remove(directory_id);
    }

    /// The consumed watermark (largest `advance`d sequence number).
    pub fn consumed_watermark(&self, directory_id: &DirectoryId) -> Result<u64> {
        let queue = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;
        let guard = queue.lock();
        Ok(guard.consumed)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, directory_id: &DirectoryId, update: EntryUpdate) -> Result<u64> {
        let queue = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;
        let mut guard = queue.lock();

        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard.entries.insert(seq, update);
        let _ = guard.notify.send(seq);
        Ok(seq)
    }

    async fn read_range(
        &self,
        directory_id: &DirectoryId,
        after_seq: u64,
        max: usize,
    ) -> Result<Vec<QueuedUpdate>> {
        let queue = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;
        let guard = queue.lock();

        Ok(guard
            .entries
            .range(after_seq + 1..)
            .take(max)
            .map(|(seq, update)| QueuedUpdate { seq: *seq, update: update.clone() })
            .collect())
    }

    async fn high_water_mark(&self, directory_id: &DirectoryId) -> Result<u64> {
        let queue = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;
        let guard = queue.lock();
        Ok(guard.next_seq - 1)
    }

    async fn advance(&self, directory_id: &DirectoryId, up_to: u64) -> Result<()> {
        let queue = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;
        let mut guard = queue.lock();
        if up_to > guard.consumed {
            guard.consumed = up_to;
        }
        Ok(())
    }

    fn activity(&self, directory_id: &DirectoryId) -> Result<watch::Receiver<u64>> {
        let queue = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;
        let guard = queue.lock();
        Ok(guard.notify.subscribe())
    }
}
