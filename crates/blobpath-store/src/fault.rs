use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Which calls an [`InMemoryBackingStore`](crate::InMemoryBackingStore) should fail.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    /// Fail the Nth (1-based) transactional `update_object` after the plan
    /// is installed.
    pub fail_tx_update_at: Option<u64>,
    /// Fail every `commit_transaction`.
    pub fail_commit: bool,
    /// Fail this many `abort_transaction` calls before letting one through.
    pub fail_aborts: u32,
    /// Fail every `get_object`.
    pub fail_get: bool,
    /// Fail every `update_object_once`.
    pub fail_once: bool,
    /// Sleep this long inside every write-side call.
    pub write_latency: Option<Duration>,
}

impl FaultPlan {
    /// Fail the Nth transactional object update.
    pub fn fail_tx_update_at(n: u64) -> Self {
        Self {
            fail_tx_update_at: Some(n),
            ..Default::default()
        }
    }

    /// Slow every write-side call down by `latency`.
    pub fn with_write_latency(latency: Duration) -> Self {
        Self {
            write_latency: Some(latency),
            ..Default::default()
        }
    }
}

/// Number of calls made against each store operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallStats {
    pub get_object: u64,
    pub begin_transaction: u64,
    pub update_object: u64,
    pub commit_transaction: u64,
    pub abort_transaction: u64,
    pub update_object_once: u64,
    pub stat_blob: u64,
    pub update_blob: u64,
}

impl CallStats {
    /// Total begin + commit + abort calls.
    pub fn transactional_calls(&self) -> u64 {
        self.begin_transaction + self.commit_transaction + self.abort_transaction
    }
}

#[derive(Debug, Default)]
pub(crate) struct CallCounters {
    pub get_object: AtomicU64,
    pub begin_transaction: AtomicU64,
    pub update_object: AtomicU64,
    pub commit_transaction: AtomicU64,
    pub abort_transaction: AtomicU64,
    pub update_object_once: AtomicU64,
    pub stat_blob: AtomicU64,
    pub update_blob: AtomicU64,
}

impl CallCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CallStats {
        CallStats {
            get_object: self.get_object.load(Ordering::Relaxed),
            begin_transaction: self.begin_transaction.load(Ordering::Relaxed),
            update_object: self.update_object.load(Ordering::Relaxed),
            commit_transaction: self.commit_transaction.load(Ordering::Relaxed),
            abort_transaction: self.abort_transaction.load(Ordering::Relaxed),
            update_object_once: self.update_object_once.load(Ordering::Relaxed),
            stat_blob: self.stat_blob.load(Ordering::Relaxed),
            update_blob: self.update_blob.load(Ordering::Relaxed),
        }
    }
}

/// Installed fault plan plus the progress counters it is evaluated against.
#[derive(Debug, Default)]
pub(crate) struct FaultState {
    pub plan: FaultPlan,
    pub tx_updates_seen: u64,
    pub aborts_failed: u32,
}

impl FaultState {
    pub fn install(&mut self, plan: FaultPlan) {
        self.plan = plan;
        self.tx_updates_seen = 0;
        self.aborts_failed = 0;
    }

    /// Record a transactional update; returns `true` if it should fail.
    pub fn tx_update_fails(&mut self) -> bool {
        self.tx_updates_seen += 1;
        self.plan.fail_tx_update_at == Some(self.tx_updates_seen)
    }

    /// Record an abort; returns `true` if it should fail.
    pub fn abort_fails(&mut self) -> bool {
        if self.aborts_failed < self.plan.fail_aborts {
            self.aborts_failed += 1;
            true
        } else {
            false
        }
    }
}
