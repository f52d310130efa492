use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use blobpath_rpc::{BackingStore, RpcError, RpcResult};
use blobpath_types::{BlobDescriptor, BlobId, BlobMetadata, ObjectFetch, ObjectIndex, TxId};
use bytes::Bytes;
use tracing::{debug, trace};

use crate::fault::{CallCounters, CallStats, FaultPlan, FaultState};

struct BlobRecord {
    descriptor: BlobDescriptor,
    objects: BTreeMap<ObjectIndex, Bytes>,
    last_flagged: Option<ObjectIndex>,
}

impl BlobRecord {
    fn new(blob: &BlobId) -> Self {
        Self {
            descriptor: BlobDescriptor::empty(blob.clone()),
            objects: BTreeMap::new(),
            last_flagged: None,
        }
    }

    fn put(&mut self, index: ObjectIndex, payload: Bytes, is_last_in_blob: bool) {
        self.objects.insert(index, payload);
        if is_last_in_blob {
            self.last_flagged = Some(index);
        }
    }
}

struct StagedTx {
    blob: BlobId,
    updates: Vec<(ObjectIndex, Bytes, bool)>,
}

#[derive(Default)]
struct StoreState {
    blobs: HashMap<BlobId, BlobRecord>,
    transactions: HashMap<TxId, StagedTx>,
}

impl StoreState {
    fn blob_mut(&mut self, blob: &BlobId) -> &mut BlobRecord {
        self.blobs
            .entry(blob.clone())
            .or_insert_with(|| BlobRecord::new(blob))
    }
}

/// In-memory, HashMap-based backing store.
///
/// All state lives behind a `RwLock`; payloads are reference-counted
/// [`Bytes`], so reads never copy object data.
pub struct InMemoryBackingStore {
    state: RwLock<StoreState>,
    faults: Mutex<FaultState>,
    calls: CallCounters,
}

impl InMemoryBackingStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            faults: Mutex::new(FaultState::default()),
            calls: CallCounters::default(),
        }
    }

    /// Replace the active fault plan and reset its progress counters.
    pub fn set_faults(&self, plan: FaultPlan) {
        self.faults.lock().expect("fault lock poisoned").install(plan);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.set_faults(FaultPlan::default());
    }

    /// Snapshot of how many times each operation has been called.
    pub fn calls(&self) -> CallStats {
        self.calls.snapshot()
    }

    /// Committed contents of one object, if it exists.
    pub fn object(&self, blob: &BlobId, index: ObjectIndex) -> Option<Bytes> {
        let state = self.state.read().expect("lock poisoned");
        state
            .blobs
            .get(blob)
            .and_then(|record| record.objects.get(&index).cloned())
    }

    /// Number of committed objects stored for a blob.
    pub fn object_count(&self, blob: &BlobId) -> usize {
        let state = self.state.read().expect("lock poisoned");
        state.blobs.get(blob).map_or(0, |record| record.objects.len())
    }

    /// Index of the most recent durable update flagged as last in its blob.
    pub fn last_flagged(&self, blob: &BlobId) -> Option<ObjectIndex> {
        let state = self.state.read().expect("lock poisoned");
        state.blobs.get(blob).and_then(|record| record.last_flagged)
    }

    /// Number of blobs that exist.
    pub fn blob_count(&self) -> usize {
        self.state.read().expect("lock poisoned").blobs.len()
    }

    /// Number of transactions begun but neither committed nor aborted.
    pub fn open_transactions(&self) -> usize {
        self.state.read().expect("lock poisoned").transactions.len()
    }

    async fn write_latency(&self) {
        let latency = self
            .faults
            .lock()
            .expect("fault lock poisoned")
            .plan
            .write_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn injected(op: &str) -> RpcError {
        RpcError::Rejected(format!("injected {op} failure"))
    }
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackingStore")
            .field("blob_count", &self.blob_count())
            .field("open_transactions", &self.open_transactions())
            .finish()
    }
}

#[async_trait]
impl BackingStore for InMemoryBackingStore {
    async fn get_object(
        &self,
        blob: &BlobId,
        index: ObjectIndex,
        _length: u32,
    ) -> RpcResult<ObjectFetch> {
        CallCounters::bump(&self.calls.get_object);
        if self.faults.lock().expect("fault lock poisoned").plan.fail_get {
            return Err(Self::injected("get_object"));
        }
        let state = self.state.read().expect("lock poisoned");
        let record = state
            .blobs
            .get(blob)
            .ok_or_else(|| RpcError::NotFound(format!("blob {blob}")))?;
        Ok(match record.objects.get(&index) {
            Some(data) => ObjectFetch::Present(data.clone()),
            None => ObjectFetch::Absent,
        })
    }

    async fn begin_transaction(&self, blob: &BlobId) -> RpcResult<TxId> {
        CallCounters::bump(&self.calls.begin_transaction);
        let tx = TxId::new();
        let mut state = self.state.write().expect("lock poisoned");
        state.transactions.insert(
            tx,
            StagedTx {
                blob: blob.clone(),
                updates: Vec::new(),
            },
        );
        debug!(%tx, %blob, "transaction begun");
        Ok(tx)
    }

    async fn update_object(
        &self,
        blob: &BlobId,
        tx: Option<TxId>,
        index: ObjectIndex,
        payload: Bytes,
        is_last_in_blob: bool,
    ) -> RpcResult<()> {
        CallCounters::bump(&self.calls.update_object);
        self.write_latency().await;
        let Some(tx) = tx else {
            let mut state = self.state.write().expect("lock poisoned");
            state.blob_mut(blob).put(index, payload, is_last_in_blob);
            return Ok(());
        };
        if self
            .faults
            .lock()
            .expect("fault lock poisoned")
            .tx_update_fails()
        {
            return Err(Self::injected("update_object"));
        }
        let mut state = self.state.write().expect("lock poisoned");
        let staged = state
            .transactions
            .get_mut(&tx)
            .ok_or_else(|| RpcError::NotFound(format!("transaction {tx}")))?;
        if &staged.blob != blob {
            return Err(RpcError::InvalidArgument(format!(
                "transaction {tx} belongs to {}, not {blob}",
                staged.blob
            )));
        }
        staged.updates.push((index, payload, is_last_in_blob));
        trace!(%tx, index, "update staged");
        Ok(())
    }

    async fn commit_transaction(&self, tx: TxId) -> RpcResult<()> {
        CallCounters::bump(&self.calls.commit_transaction);
        self.write_latency().await;
        if self.faults.lock().expect("fault lock poisoned").plan.fail_commit {
            return Err(Self::injected("commit_transaction"));
        }
        let mut state = self.state.write().expect("lock poisoned");
        let staged = state
            .transactions
            .remove(&tx)
            .ok_or_else(|| RpcError::NotFound(format!("transaction {tx}")))?;
        let count = staged.updates.len();
        let record = state.blob_mut(&staged.blob);
        for (index, payload, is_last_in_blob) in staged.updates {
            record.put(index, payload, is_last_in_blob);
        }
        debug!(%tx, updates = count, "transaction committed");
        Ok(())
    }

    async fn abort_transaction(&self, tx: TxId) -> RpcResult<()> {
        CallCounters::bump(&self.calls.abort_transaction);
        if self.faults.lock().expect("fault lock poisoned").abort_fails() {
            return Err(Self::injected("abort_transaction"));
        }
        let mut state = self.state.write().expect("lock poisoned");
        state
            .transactions
            .remove(&tx)
            .ok_or_else(|| RpcError::NotFound(format!("transaction {tx}")))?;
        debug!(%tx, "transaction aborted");
        Ok(())
    }

    async fn update_object_once(
        &self,
        blob: &BlobId,
        index: ObjectIndex,
        payload: Bytes,
    ) -> RpcResult<()> {
        CallCounters::bump(&self.calls.update_object_once);
        self.write_latency().await;
        if self.faults.lock().expect("fault lock poisoned").plan.fail_once {
            return Err(Self::injected("update_object_once"));
        }
        let mut state = self.state.write().expect("lock poisoned");
        state.blob_mut(blob).put(index, payload, false);
        Ok(())
    }

    async fn stat_blob(&self, blob: &BlobId) -> RpcResult<Option<BlobDescriptor>> {
        CallCounters::bump(&self.calls.stat_blob);
        let state = self.state.read().expect("lock poisoned");
        Ok(state.blobs.get(blob).map(|record| record.descriptor.clone()))
    }

    async fn update_blob(
        &self,
        blob: &BlobId,
        byte_count: u64,
        metadata: Option<BlobMetadata>,
    ) -> RpcResult<()> {
        CallCounters::bump(&self.calls.update_blob);
        let mut state = self.state.write().expect("lock poisoned");
        let descriptor = &mut state.blob_mut(blob).descriptor;
        descriptor.byte_count = descriptor.byte_count.max(byte_count);
        if let Some(metadata) = metadata {
            descriptor.metadata = metadata;
        }
        Ok(())
    }
}
