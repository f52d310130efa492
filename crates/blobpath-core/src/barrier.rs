use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use blobpath_types::BlobId;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

type BlobLocks = Mutex<HashMap<BlobId, Arc<RwLock<()>>>>;

/// Drop a blob's entry once nothing but the map refers to it.
fn prune(blobs: &BlobLocks, blob: &BlobId) {
    let mut blobs = blobs.lock().expect("barrier lock poisoned");
    if blobs.get(blob).is_some_and(|lock| Arc::strong_count(lock) == 1) {
        blobs.remove(blob);
    }
}

/// Per-blob barrier separating writes accepted before a flush from those
/// accepted after it.
///
/// Each write holds a shared guard for its whole duration. A flush takes
/// the exclusive guard, which Tokio grants only after every earlier shared
/// guard is released; writes that arrive while a flush waits queue behind it.
/// A blob is tracked only while a write or flush on it is outstanding.
#[derive(Debug, Default)]
pub struct WriteBarrier {
    blobs: Arc<BlobLocks>,
}

/// A write in flight on one blob. Dropping it releases the barrier.
pub struct WriteGuard {
    guard: Option<OwnedRwLockReadGuard<()>>,
    blob: BlobId,
    blobs: Arc<BlobLocks>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.blobs, &self.blob);
    }
}

impl std::fmt::Debug for WriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteGuard").field("blob", &self.blob).finish()
    }
}

impl WriteBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, blob: &BlobId) -> Arc<RwLock<()>> {
        let mut blobs = self.blobs.lock().expect("barrier lock poisoned");
        Arc::clone(blobs.entry(blob.clone()).or_default())
    }

    /// Register a write on `blob`; it counts as in flight until the guard drops.
    pub async fn enter(&self, blob: &BlobId) -> WriteGuard {
        let guard = self.lock_for(blob).read_owned().await;
        WriteGuard {
            guard: Some(guard),
            blob: blob.clone(),
            blobs: Arc::clone(&self.blobs),
        }
    }

    /// Wait for every write on `blob` entered before this call.
    pub async fn flush(&self, blob: &BlobId) {
        let lock = self.lock_for(blob);
        drop(lock.write().await);
        drop(lock);
        prune(&self.blobs, blob);
    }

    /// Number of blobs currently tracked.
    pub fn tracked(&self) -> usize {
        self.blobs.lock().expect("barrier lock poisoned").len()
    }
}
