//! Atomic multi-object writes.
//!
//! A [`Transaction`] leaves `Open` exactly once. [`TransactionCoordinator::run`]
//! guarantees that every transaction it begins ends with exactly one commit
//! or abort call, whatever fails in between. A failed commit is never
//! followed by an abort; its outcome is reported as unknown.

use std::sync::Arc;
use std::time::Duration;

use blobpath_rpc::{BackingStore, RpcError};
use blobpath_types::{BlobId, ObjectIndex, TxId, TxState};
use bytes::Bytes;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::config::{ApplyMode, DataPathConfig};
use crate::error::{DataPathError, DataPathResult};

/// One full-object payload destined for `index`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectUpdate {
    pub index: ObjectIndex,
    pub payload: Bytes,
    /// Set on the update for the blob's final object.
    pub is_last_in_blob: bool,
}

#[derive(Clone, Copy, Debug)]
struct AbortPolicy {
    retries: u32,
    backoff: Duration,
}

/// An open backing-store transaction on one blob.
///
/// `commit` and `abort` consume the value. Dropping it while still open
/// leaves the transaction dangling in the backing store and is logged.
pub struct Transaction {
    id: TxId,
    blob: BlobId,
    state: TxState,
    applied: usize,
    last_index: Option<ObjectIndex>,
    store: Arc<dyn BackingStore>,
    policy: AbortPolicy,
}

impl Transaction {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn blob(&self) -> &BlobId {
        &self.blob
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Number of updates accepted so far.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Stage one object update. Indices must strictly ascend across calls.
    pub async fn apply(&mut self, update: ObjectUpdate) -> DataPathResult<()> {
        self.check_order(update.index)?;
        self.store
            .update_object(
                &self.blob,
                Some(self.id),
                update.index,
                update.payload,
                update.is_last_in_blob,
            )
            .await?;
        self.last_index = Some(update.index);
        self.applied += 1;
        Ok(())
    }

    /// Stage a batch of updates with up to `concurrency` in flight.
    ///
    /// Updates are issued in ascending index order. The first failure
    /// cancels whatever has not finished yet and is returned.
    pub async fn apply_concurrent(
        &mut self,
        updates: Vec<ObjectUpdate>,
        concurrency: usize,
    ) -> DataPathResult<()> {
        let mut prev = self.last_index;
        for update in &updates {
            if prev.is_some_and(|p| update.index <= p) {
                return Err(out_of_order(self.id, update.index, prev));
            }
            prev = Some(update.index);
        }

        let mut inflight = JoinSet::new();
        let mut pending = updates.into_iter();
        let mut result = Ok(());
        loop {
            while inflight.len() < concurrency.max(1) {
                let Some(update) = pending.next() else { break };
                let store = Arc::clone(&self.store);
                let blob = self.blob.clone();
                let tx = self.id;
                inflight.spawn(async move {
                    store
                        .update_object(
                            &blob,
                            Some(tx),
                            update.index,
                            update.payload,
                            update.is_last_in_blob,
                        )
                        .await
                        .map(|_| update.index)
                });
            }
            let Some(joined) = inflight.join_next().await else { break };
            match joined {
                Ok(Ok(index)) => {
                    self.applied += 1;
                    self.last_index = self.last_index.max(Some(index));
                }
                Ok(Err(e)) => {
                    result = Err(e.into());
                    break;
                }
                Err(e) => {
                    result = Err(DataPathError::Worker(e.to_string()));
                    break;
                }
            }
        }
        inflight.shutdown().await;
        result
    }

    /// Commit the transaction.
    ///
    /// A failed commit yields `CommitFailed` and leaves the transaction in
    /// `Unknown`: the store may have applied it, so no abort is sent.
    pub async fn commit(mut self) -> DataPathResult<()> {
        if let Err(source) = self.store.commit_transaction(self.id).await {
            self.state = TxState::Unknown;
            error!(tx = %self.id, blob = %self.blob, error = %source, "commit failed, transaction fate unknown");
            return Err(DataPathError::CommitFailed {
                tx: self.id,
                source,
            });
        }
        self.state = TxState::Committed;
        debug!(tx = %self.id, blob = %self.blob, updates = self.applied, "transaction committed");
        Ok(())
    }

    /// Abort the transaction, retrying per the coordinator's policy.
    pub async fn abort(mut self) -> DataPathResult<()> {
        self.abort_with_retry().await.map_err(DataPathError::from)
    }

    /// Abort because of `cause` and return the error to report.
    ///
    /// Yields `TransactionAborted` wrapping `cause` when the abort went
    /// through, or `AbortFailed` when it never did.
    pub async fn abort_with_cause(mut self, cause: DataPathError) -> DataPathError {
        let tx = self.id;
        match self.abort_with_retry().await {
            Ok(()) => DataPathError::TransactionAborted {
                tx,
                source: Box::new(cause),
            },
            Err(abort) => {
                error!(%tx, blob = %self.blob, cause = %cause, error = %abort, "abort failed, transaction fate unknown");
                DataPathError::AbortFailed {
                    tx,
                    cause: Box::new(cause),
                    abort,
                }
            }
        }
    }

    async fn abort_with_retry(&mut self) -> Result<(), RpcError> {
        let mut attempt = 0;
        loop {
            match self.store.abort_transaction(self.id).await {
                Ok(()) => {
                    self.state = TxState::Aborted;
                    debug!(tx = %self.id, blob = %self.blob, "transaction aborted");
                    return Ok(());
                }
                Err(e) if attempt < self.policy.retries => {
                    attempt += 1;
                    warn!(tx = %self.id, attempt, error = %e, "abort failed, retrying");
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => {
                    self.state = TxState::Unknown;
                    return Err(e);
                }
            }
        }
    }

    fn check_order(&self, index: ObjectIndex) -> DataPathResult<()> {
        match self.last_index {
            Some(prev) if index <= prev => Err(out_of_order(self.id, index, Some(prev))),
            _ => Ok(()),
        }
    }
}

fn out_of_order(tx: TxId, index: ObjectIndex, prev: Option<ObjectIndex>) -> DataPathError {
    DataPathError::InvalidArgument(format!(
        "transaction {tx}: object {index} applied after {}",
        prev.unwrap_or_default()
    ))
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Open {
            warn!(tx = %self.id, blob = %self.blob, applied = self.applied, "transaction dropped while open");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("blob", &self.blob)
            .field("state", &self.state)
            .field("applied", &self.applied)
            .finish()
    }
}

/// Sequences object updates into backing-store transactions.
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn BackingStore>,
    apply_mode: ApplyMode,
    apply_concurrency: usize,
    policy: AbortPolicy,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn BackingStore>, config: &DataPathConfig) -> Self {
        Self {
            store,
            apply_mode: config.apply_mode,
            apply_concurrency: config.apply_concurrency,
            policy: AbortPolicy {
                retries: config.abort_retries,
                backoff: config.abort_backoff(),
            },
        }
    }

    pub fn apply_mode(&self) -> ApplyMode {
        self.apply_mode
    }

    /// Open a transaction on `blob`.
    pub async fn begin(&self, blob: &BlobId) -> DataPathResult<Transaction> {
        let id = self.store.begin_transaction(blob).await?;
        debug!(tx = %id, %blob, "transaction begun");
        Ok(Transaction {
            id,
            blob: blob.clone(),
            state: TxState::Open,
            applied: 0,
            last_index: None,
            store: Arc::clone(&self.store),
            policy: self.policy,
        })
    }

    /// Apply `updates` atomically: begin, apply each, commit.
    ///
    /// A failed apply aborts the transaction and is reported as
    /// `TransactionAborted` (or `AbortFailed`) carrying the original error.
    /// A failed commit is reported as `CommitFailed` with no abort.
    pub async fn run(&self, blob: &BlobId, updates: Vec<ObjectUpdate>) -> DataPathResult<TxId> {
        let mut txn = self.begin(blob).await?;
        let applied = match self.apply_mode {
            ApplyMode::Sequential => {
                let mut result = Ok(());
                for update in updates {
                    if let Err(e) = txn.apply(update).await {
                        result = Err(e);
                        break;
                    }
                }
                result
            }
            ApplyMode::Concurrent => txn.apply_concurrent(updates, self.apply_concurrency).await,
        };
        if let Err(cause) = applied {
            return Err(txn.abort_with_cause(cause).await);
        }
        let id = txn.id();
        txn.commit().await?;
        Ok(id)
    }

    /// Apply `updates`, skipping the transaction when there is only one.
    ///
    /// Returns the transaction id if one was used.
    pub async fn submit(
        &self,
        blob: &BlobId,
        mut updates: Vec<ObjectUpdate>,
    ) -> DataPathResult<Option<TxId>> {
        match updates.len() {
            0 => Ok(None),
            1 => {
                let update = updates.remove(0);
                self.store
                    .update_object_once(blob, update.index, update.payload)
                    .await?;
                Ok(None)
            }
            _ => self.run(blob, updates).await.map(Some),
        }
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("apply_mode", &self.apply_mode)
            .field("apply_concurrency", &self.apply_concurrency)
            .field("abort_retries", &self.policy.retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use blobpath_store::{FaultPlan, InMemoryBackingStore};
    use blobpath_types::VolumeId;

    fn blob() -> BlobId {
        BlobId::new(VolumeId::new("d", "v").unwrap(), "t").unwrap()
    }

    fn updates(n: u64) -> Vec<ObjectUpdate> {
        (0..n)
            .map(|i| ObjectUpdate {
                index: i,
                payload: Bytes::from(vec![i as u8 + 1; 8]),
                is_last_in_blob: i + 1 == n,
            })
            .collect()
    }

    fn coordinator(store: &Arc<InMemoryBackingStore>, config: DataPathConfig) -> TransactionCoordinator {
        TransactionCoordinator::new(store.clone(), &config)
    }

    fn quick_aborts() -> DataPathConfig {
        DataPathConfig {
            abort_backoff_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn run_commits_all_updates() {
        let store = Arc::new(InMemoryBackingStore::new());
        let coord = coordinator(&store, DataPathConfig::default());
        coord.run(&blob(), updates(4)).await.unwrap();
        for i in 0..4 {
            assert_eq!(store.object(&blob(), i).unwrap()[0], i as u8 + 1);
        }
        let calls = store.calls();
        assert_eq!(calls.begin_transaction, 1);
        assert_eq!(calls.commit_transaction, 1);
        assert_eq!(calls.abort_transaction, 0);
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn failing_apply_aborts_and_hides_everything() {
        for nth in 1..=4 {
            let store = Arc::new(InMemoryBackingStore::new());
            store.set_faults(FaultPlan::fail_tx_update_at(nth));
            let coord = coordinator(&store, quick_aborts());

            let err = coord.run(&blob(), updates(4)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TransactionAborted);
            assert!(matches!(err, DataPathError::TransactionAborted { .. }));
            assert_eq!(err.root_cause().kind(), ErrorKind::TransportFailure);

            let calls = store.calls();
            assert_eq!(calls.update_object, nth, "applies stop at the failure");
            assert_eq!(calls.abort_transaction, 1);
            assert_eq!(calls.commit_transaction, 0);
            assert_eq!(store.object_count(&blob()), 0);
            assert_eq!(store.open_transactions(), 0);
        }
    }

    #[tokio::test]
    async fn failing_commit_is_not_followed_by_abort() {
        let store = Arc::new(InMemoryBackingStore::new());
        store.set_faults(FaultPlan {
            fail_commit: true,
            ..Default::default()
        });
        let coord = coordinator(&store, quick_aborts());
        let err = coord.run(&blob(), updates(2)).await.unwrap_err();
        assert!(matches!(err, DataPathError::CommitFailed { .. }), "got {err:?}");
        let calls = store.calls();
        assert_eq!(calls.begin_transaction, 1);
        assert_eq!(calls.commit_transaction, 1);
        assert_eq!(calls.abort_transaction, 0);
    }

    #[tokio::test]
    async fn abort_is_retried_before_giving_up() {
        let store = Arc::new(InMemoryBackingStore::new());
        store.set_faults(FaultPlan {
            fail_tx_update_at: Some(1),
            fail_aborts: 2,
            ..Default::default()
        });
        let coord = coordinator(&store, quick_aborts());
        let err = coord.run(&blob(), updates(2)).await.unwrap_err();
        assert!(matches!(err, DataPathError::TransactionAborted { .. }));
        assert_eq!(store.calls().abort_transaction, 3);
    }

    #[tokio::test]
    async fn exhausted_abort_retries_surface_abort_failed() {
        let store = Arc::new(InMemoryBackingStore::new());
        store.set_faults(FaultPlan {
            fail_tx_update_at: Some(2),
            fail_aborts: 10,
            ..Default::default()
        });
        let coord = coordinator(&store, quick_aborts());
        let err = coord.run(&blob(), updates(3)).await.unwrap_err();
        match &err {
            DataPathError::AbortFailed { abort, .. } => {
                assert!(matches!(abort, RpcError::Rejected(_)));
            }
            other => panic!("expected AbortFailed, got {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert_eq!(store.calls().abort_transaction, 3);
    }

    #[tokio::test]
    async fn concurrent_mode_commits_all_updates() {
        let store = Arc::new(InMemoryBackingStore::new());
        let coord = coordinator(
            &store,
            DataPathConfig {
                apply_mode: ApplyMode::Concurrent,
                apply_concurrency: 3,
                ..Default::default()
            },
        );
        coord.run(&blob(), updates(10)).await.unwrap();
        assert_eq!(store.object_count(&blob()), 10);
        assert_eq!(store.calls().update_object, 10);
    }

    #[tokio::test]
    async fn concurrent_mode_aborts_on_failure() {
        let store = Arc::new(InMemoryBackingStore::new());
        store.set_faults(FaultPlan::fail_tx_update_at(5));
        let coord = coordinator(
            &store,
            DataPathConfig {
                apply_mode: ApplyMode::Concurrent,
                apply_concurrency: 2,
                abort_backoff_ms: 1,
                ..Default::default()
            },
        );
        let err = coord.run(&blob(), updates(8)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert_eq!(store.object_count(&blob()), 0);
        assert_eq!(store.calls().commit_transaction, 0);
    }

    #[tokio::test]
    async fn apply_rejects_descending_index() {
        let store = Arc::new(InMemoryBackingStore::new());
        let coord = coordinator(&store, DataPathConfig::default());
        let mut txn = coord.begin(&blob()).await.unwrap();
        let mut batch = updates(3);
        txn.apply(batch.remove(2)).await.unwrap();
        let err = txn.apply(batch.remove(0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(txn.applied(), 1);
        txn.abort().await.unwrap();
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn manual_commit_and_states() {
        let store = Arc::new(InMemoryBackingStore::new());
        let coord = coordinator(&store, DataPathConfig::default());
        let mut txn = coord.begin(&blob()).await.unwrap();
        assert_eq!(txn.state(), TxState::Open);
        for u in updates(2) {
            txn.apply(u).await.unwrap();
        }
        txn.commit().await.unwrap();
        assert_eq!(store.object_count(&blob()), 2);
    }

    #[tokio::test]
    async fn submit_downgrades_single_update() {
        let store = Arc::new(InMemoryBackingStore::new());
        let coord = coordinator(&store, DataPathConfig::default());
        let tx = coord.submit(&blob(), updates(1)).await.unwrap();
        assert!(tx.is_none());
        let calls = store.calls();
        assert_eq!(calls.update_object_once, 1);
        assert_eq!(calls.transactional_calls(), 0);

        let tx = coord.submit(&blob(), updates(2)).await.unwrap();
        assert!(tx.is_some());
    }

    #[tokio::test]
    async fn empty_batch_still_commits() {
        let store = Arc::new(InMemoryBackingStore::new());
        let coord = coordinator(&store, DataPathConfig::default());
        coord.run(&blob(), Vec::new()).await.unwrap();
        assert_eq!(store.calls().commit_transaction, 1);
    }
}
