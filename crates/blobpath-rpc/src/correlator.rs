//! Request/response correlation for one logical async channel.
//!
//! Callers register a [`RequestId`] with [`RequestCorrelator::expect`] before
//! sending, then await the returned [`PendingResult`]. The channel's single
//! delivery path hands each response to [`RequestCorrelator::complete`].
//! Deadlines are enforced twice: lazily by the waiting handle itself, and
//! periodically by [`RequestCorrelator::sweep_expired`]. Whichever path
//! removes the table entry first resolves it; every other path finds nothing
//! and drops its result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blobpath_types::RequestId;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{RpcError, RpcResult};

struct PendingEntry<T> {
    slot: oneshot::Sender<RpcResult<T>>,
    deadline: Instant,
    token: u64,
}

type PendingTable<T> = Mutex<HashMap<RequestId, PendingEntry<T>>>;

/// Remove `id` only if it is still the registration identified by `token`.
fn evict<T>(table: &PendingTable<T>, id: RequestId, token: u64) -> Option<PendingEntry<T>> {
    let mut map = table.lock().expect("pending table lock poisoned");
    match map.get(&id) {
        Some(entry) if entry.token == token => map.remove(&id),
        _ => None,
    }
}

/// Concurrent `RequestId` → single-resolution result table.
pub struct RequestCorrelator<T> {
    pending: Arc<PendingTable<T>>,
    default_timeout: Duration,
    tokens: AtomicU64,
    // Only written with the table lock held.
    closed: AtomicBool,
}

impl<T: Send + 'static> RequestCorrelator<T> {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            default_timeout,
            tokens: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register a request with the default timeout.
    pub fn expect(&self, id: RequestId) -> RpcResult<PendingResult<T>> {
        self.expect_with_timeout(id, self.default_timeout)
    }

    /// Register a request whose deadline is `timeout` from now.
    ///
    /// Fails with `AlreadyRegistered` if `id` is still pending, and with
    /// `Transport` once the correlator has been closed.
    pub fn expect_with_timeout(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> RpcResult<PendingResult<T>> {
        let deadline = Instant::now() + timeout;
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        let (slot, rx) = oneshot::channel();

        let mut map = self.pending.lock().expect("pending table lock poisoned");
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Transport(format!("{id} sent on a closed channel")));
        }
        if map.contains_key(&id) {
            return Err(RpcError::AlreadyRegistered(id));
        }
        map.insert(
            id,
            PendingEntry {
                slot,
                deadline,
                token,
            },
        );
        drop(map);

        trace!(%id, ?timeout, "request registered");
        Ok(PendingResult {
            id,
            deadline,
            token,
            rx,
            table: Arc::clone(&self.pending),
        })
    }

    /// Resolve a pending request. Returns `false` if `id` was unknown or
    /// already resolved, in which case the result is dropped.
    ///
    /// Never blocks on the waiting caller: the hand-off is a oneshot send.
    pub fn complete(&self, id: RequestId, result: RpcResult<T>) -> bool {
        let mut map = self.pending.lock().expect("pending table lock poisoned");
        match map.remove(&id) {
            Some(entry) => {
                // Sent under the lock so a handle that times out concurrently
                // always finds either its entry or its result.
                let _ = entry.slot.send(result);
                true
            }
            None => {
                drop(map);
                debug!(%id, "dropping response for unknown or resolved request");
                false
            }
        }
    }

    /// Resolve every request whose deadline has passed with `Timeout`.
    /// Returns the number of requests evicted.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.pending.lock().expect("pending table lock poisoned");
        let expired: Vec<RequestId> = map
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(entry) = map.remove(id) {
                let _ = entry.slot.send(Err(RpcError::Timeout(*id)));
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired pending requests");
        }
        expired.len()
    }

    /// Resolve every pending request with `err`.
    pub fn fail_all(&self, err: RpcError) -> usize {
        let mut map = self.pending.lock().expect("pending table lock poisoned");
        Self::fail_entries(&mut map, &err)
    }

    /// Fail every pending request with `err` and refuse all later
    /// registrations. Used when the channel dies.
    pub fn close(&self, err: RpcError) -> usize {
        let mut map = self.pending.lock().expect("pending table lock poisoned");
        self.closed.store(true, Ordering::Release);
        Self::fail_entries(&mut map, &err)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn fail_entries(map: &mut HashMap<RequestId, PendingEntry<T>>, err: &RpcError) -> usize {
        let count = map.len();
        for (_, entry) in map.drain() {
            let _ = entry.slot.send(Err(err.clone()));
        }
        if count > 0 {
            debug!(count, error = %err, "failed all pending requests");
        }
        count
    }

    /// Number of requests currently awaiting resolution.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending table lock poisoned").len()
    }

    /// Spawn a task that calls [`sweep_expired`](Self::sweep_expired) every
    /// `interval`. The task ends once the correlator is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(correlator) => {
                        correlator.sweep_expired();
                    }
                    None => break,
                }
            }
        })
    }
}

impl<T> std::fmt::Debug for RequestCorrelator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.pending.lock().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("RequestCorrelator")
            .field("pending", &count)
            .field("default_timeout", &self.default_timeout)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

/// Handle to the eventual result of one registered request.
///
/// Dropping the handle without waiting evicts the registration, so a later
/// response is dropped.
pub struct PendingResult<T> {
    id: RequestId,
    deadline: Instant,
    token: u64,
    rx: oneshot::Receiver<RpcResult<T>>,
    table: Arc<PendingTable<T>>,
}

impl<T> PendingResult<T> {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response, or `Timeout` once the deadline passes.
    pub async fn wait(mut self) -> RpcResult<T> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Transport(format!(
                "{} abandoned by correlator",
                self.id
            ))),
            Err(_) => {
                if evict(&self.table, self.id, self.token).is_some() {
                    debug!(id = %self.id, "request timed out");
                    return Err(RpcError::Timeout(self.id));
                }
                // Someone else resolved it first; their result is already
                // in the slot.
                match self.rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(RpcError::Timeout(self.id)),
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl<T> Drop for PendingResult<T> {
    fn drop(&mut self) {
        if let Ok(mut map) = self.table.lock() {
            if map.get(&self.id).is_some_and(|e| e.token == self.token) {
                map.remove(&self.id);
            }
        }
    }
}
