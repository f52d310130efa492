use std::future::Future;
use std::sync::Arc;

use blobpath_rpc::BackingStore;
use blobpath_types::{BlobDescriptor, BlobId, Volume};
use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::barrier::WriteBarrier;
use crate::config::DataPathConfig;
use crate::error::{DataPathError, DataPathResult};
use crate::grid::ObjectGrid;
use crate::reader::ChunkedReader;
use crate::txn::TransactionCoordinator;
use crate::writer::ChunkedWriter;

struct Shared {
    store: Arc<dyn BackingStore>,
    volume: Volume,
    grid: ObjectGrid,
    config: DataPathConfig,
    coordinator: TransactionCoordinator,
    permits: Arc<Semaphore>,
    barrier: WriteBarrier,
}

/// Adapter-facing handle to the data path of one volume.
///
/// Cloning is cheap and every clone shares the same worker pool and write
/// barrier. Each read or write takes one of `max_inflight` permits and runs
/// on its own task, so a caller that stops waiting does not cancel a write
/// already accepted.
#[derive(Clone)]
pub struct DataPath {
    shared: Arc<Shared>,
}

impl DataPath {
    pub fn new(
        store: Arc<dyn BackingStore>,
        volume: Volume,
        config: DataPathConfig,
    ) -> DataPathResult<Self> {
        config.validate()?;
        let grid = ObjectGrid::new(volume.object_size())?;
        let coordinator = TransactionCoordinator::new(Arc::clone(&store), &config);
        info!(
            volume = %volume.id(),
            object_size = volume.object_size(),
            max_inflight = config.max_inflight,
            apply_mode = ?config.apply_mode,
            "data path ready"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                grid,
                coordinator,
                permits: Arc::new(Semaphore::new(config.max_inflight)),
                barrier: WriteBarrier::new(),
                volume,
                config,
            }),
        })
    }

    pub fn volume(&self) -> &Volume {
        &self.shared.volume
    }

    pub fn config(&self) -> &DataPathConfig {
        &self.shared.config
    }

    /// Permits not currently held by a read or write.
    pub fn available_permits(&self) -> usize {
        self.shared.permits.available_permits()
    }

    /// Read `[offset, offset + length)` of `blob`. Unwritten ranges read as zeros.
    pub async fn read(&self, blob: &BlobId, offset: u64, length: u32) -> DataPathResult<Bytes> {
        self.check_volume(blob)?;
        let shared = Arc::clone(&self.shared);
        let blob = blob.clone();
        self.spawn(async move {
            let mut reader = ChunkedReader::new(Arc::clone(&shared.store), shared.grid);
            reader.read(&blob, offset, length).await
        })
        .await
    }

    /// Write `data` at `offset` of `blob`.
    ///
    /// Returns once the data and the blob's byte count are durable.
    pub async fn write(&self, blob: &BlobId, offset: u64, data: Bytes) -> DataPathResult<()> {
        self.check_volume(blob)?;
        let accepted = self.shared.barrier.enter(blob).await;
        let shared = Arc::clone(&self.shared);
        let blob = blob.clone();
        self.spawn(async move {
            let _accepted = accepted;
            let mut writer = ChunkedWriter::new(
                Arc::clone(&shared.store),
                &shared.volume,
                shared.coordinator.clone(),
            )?;
            writer.write(&blob, offset, data).await
        })
        .await
    }

    /// Wait until every write to `blob` accepted before this call has finished.
    pub async fn flush(&self, blob: &BlobId) -> DataPathResult<()> {
        self.check_volume(blob)?;
        self.shared.barrier.flush(blob).await;
        debug!(%blob, "flushed");
        Ok(())
    }

    /// Current length and metadata of `blob`.
    pub async fn stat(&self, blob: &BlobId) -> DataPathResult<BlobDescriptor> {
        self.check_volume(blob)?;
        self.shared
            .store
            .stat_blob(blob)
            .await?
            .ok_or_else(|| DataPathError::BlobNotFound(blob.clone()))
    }

    /// Set one metadata key on an existing blob.
    pub async fn set_metadata(
        &self,
        blob: &BlobId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> DataPathResult<()> {
        let mut descriptor = self.stat(blob).await?;
        descriptor.metadata.insert(key.into(), value.into());
        self.shared
            .store
            .update_blob(blob, descriptor.byte_count, Some(descriptor.metadata))
            .await?;
        Ok(())
    }

    fn check_volume(&self, blob: &BlobId) -> DataPathResult<()> {
        if &blob.volume != self.shared.volume.id() {
            return Err(DataPathError::InvalidArgument(format!(
                "blob {blob} is not in volume {}",
                self.shared.volume.id()
            )));
        }
        Ok(())
    }

    /// Run `work` on a pool task once a permit is free.
    async fn spawn<T, F>(&self, work: F) -> DataPathResult<T>
    where
        T: Send + 'static,
        F: Future<Output = DataPathResult<T>> + Send + 'static,
    {
        let permit = Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|e| DataPathError::Worker(e.to_string()))?;
        let task = tokio::spawn(async move {
            let _permit = permit;
            work.await
        });
        task.await
            .map_err(|e| DataPathError::Worker(e.to_string()))?
    }
}

impl std::fmt::Debug for DataPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPath")
            .field("volume", &self.shared.volume)
            .field("available_permits", &self.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApplyMode;
    use crate::error::ErrorKind;
    use blobpath_rpc::loopback;
    use blobpath_store::{FaultPlan, InMemoryBackingStore};
    use blobpath_types::VolumeId;
    use std::time::Duration;

    const OBJ: u32 = 1024;

    fn vid() -> VolumeId {
        VolumeId::new("test", "vol").unwrap()
    }

    fn blob(name: &str) -> BlobId {
        BlobId::new(vid(), name).unwrap()
    }

    fn volume() -> Volume {
        Volume::new(vid(), OBJ, u64::from(OBJ) * 1024).unwrap()
    }

    fn direct(config: DataPathConfig) -> (Arc<InMemoryBackingStore>, DataPath) {
        let store = Arc::new(InMemoryBackingStore::new());
        let path = DataPath::new(store.clone(), volume(), config).unwrap();
        (store, path)
    }

    fn data(len: usize, seed: u8) -> Bytes {
        Bytes::from((0..len).map(|i| (i as u8) ^ seed).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn write_read_round_trip_over_loopback() {
        let store = Arc::new(InMemoryBackingStore::new());
        let config = DataPathConfig::default();
        let client = Arc::new(loopback::serve(store.clone(), config.channel()));
        let path = DataPath::new(client, volume(), config).unwrap();

        let b = blob("remote");
        let payload = data(5 * OBJ as usize + 77, 0x5a);
        path.write(&b, 300, payload.clone()).await.unwrap();
        assert_eq!(
            path.read(&b, 300, payload.len() as u32).await.unwrap(),
            payload
        );
        assert_eq!(path.stat(&b).await.unwrap().byte_count, 300 + payload.len() as u64);
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn concurrent_writers_to_distinct_blobs() {
        let (_store, path) = direct(DataPathConfig {
            max_inflight: 4,
            apply_mode: ApplyMode::Concurrent,
            ..Default::default()
        });
        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let path = path.clone();
            tasks.push(tokio::spawn(async move {
                let b = blob(&format!("b{i}"));
                let payload = data(3 * OBJ as usize, i);
                path.write(&b, u64::from(i) * 10, payload.clone()).await?;
                let got = path.read(&b, u64::from(i) * 10, payload.len() as u32).await?;
                assert_eq!(got, payload);
                Ok::<_, DataPathError>(())
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(path.available_permits(), 4);
    }

    #[tokio::test]
    async fn sparse_read_returns_zeros() {
        let (_store, path) = direct(DataPathConfig::default());
        let b = blob("sparse");
        path.write(&b, 10 * u64::from(OBJ), data(8, 1)).await.unwrap();
        let got = path.read(&b, 0, OBJ).await.unwrap();
        assert_eq!(got.len(), OBJ as usize);
        assert!(got.iter().all(|&x| x == 0));
    }

    #[tokio::test]
    async fn flush_waits_for_in_flight_write() {
        let (store, path) = direct(DataPathConfig::default());
        store.set_faults(FaultPlan::with_write_latency(Duration::from_millis(30)));
        let b = blob("slow");

        let writer = {
            let path = path.clone();
            let b = b.clone();
            tokio::spawn(async move { path.write(&b, 0, data(2 * OBJ as usize, 3)).await })
        };
        while store.calls().stat_blob == 0 {
            tokio::task::yield_now().await;
        }
        path.flush(&b).await.unwrap();
        assert_eq!(store.object_count(&b), 2);
        assert_eq!(path.stat(&b).await.unwrap().byte_count, 2 * u64::from(OBJ));
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unflushed_writes_do_not_accumulate_barrier_state() {
        let (_store, path) = direct(DataPathConfig::default());
        for i in 0..200 {
            path.write(&blob(&format!("n{i}")), 0, data(16, 0)).await.unwrap();
        }
        assert_eq!(path.shared.barrier.tracked(), 0);
    }

    #[tokio::test]
    async fn flush_of_idle_blob_returns_immediately() {
        let (_store, path) = direct(DataPathConfig::default());
        tokio::time::timeout(Duration::from_millis(100), path.flush(&blob("idle")))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn stat_of_unknown_blob_is_not_found() {
        let (_store, path) = direct(DataPathConfig::default());
        let err = path.stat(&blob("ghost")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = path.read(&blob("ghost"), 0, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn metadata_survives_later_writes() {
        let (_store, path) = direct(DataPathConfig::default());
        let b = blob("meta");
        path.write(&b, 0, data(10, 0)).await.unwrap();
        path.set_metadata(&b, "content-type", "text/plain").await.unwrap();
        path.write(&b, 10, data(10, 0)).await.unwrap();

        let desc = path.stat(&b).await.unwrap();
        assert_eq!(desc.byte_count, 20);
        assert_eq!(desc.metadata.get("content-type").map(String::as_str), Some("text/plain"));
    }

    #[tokio::test]
    async fn metadata_set_during_growing_write_is_kept() {
        let (store, path) = direct(DataPathConfig::default());
        let b = blob("meta-race");
        path.write(&b, 0, data(10, 0)).await.unwrap();
        store.set_faults(FaultPlan::with_write_latency(Duration::from_millis(50)));

        let writer = {
            let path = path.clone();
            let b = b.clone();
            tokio::spawn(async move { path.write(&b, 10, data(10, 1)).await })
        };
        while store.calls().stat_blob < 2 {
            tokio::task::yield_now().await;
        }
        path.set_metadata(&b, "content-type", "text/plain").await.unwrap();
        writer.await.unwrap().unwrap();

        let desc = path.stat(&b).await.unwrap();
        assert_eq!(desc.byte_count, 20);
        assert_eq!(desc.metadata.get("content-type").map(String::as_str), Some("text/plain"));
    }

    #[tokio::test]
    async fn set_metadata_on_unknown_blob_fails() {
        let (_store, path) = direct(DataPathConfig::default());
        let err = path.set_metadata(&blob("x"), "k", "v").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn foreign_volume_rejected() {
        let (store, path) = direct(DataPathConfig::default());
        let other = BlobId::new(VolumeId::new("test", "other").unwrap(), "b").unwrap();
        let err = path.write(&other, 0, data(1, 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(store.calls(), Default::default());
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let store = Arc::new(InMemoryBackingStore::new());
        let err = DataPath::new(
            store,
            volume(),
            DataPathConfig {
                max_inflight: 0,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn failed_write_does_not_advance_byte_count() {
        let (store, path) = direct(DataPathConfig {
            abort_backoff_ms: 1,
            ..Default::default()
        });
        let b = blob("fail");
        path.write(&b, 0, data(100, 0)).await.unwrap();
        store.set_faults(FaultPlan::fail_tx_update_at(2));
        let err = path.write(&b, 0, data(3 * OBJ as usize, 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert_eq!(path.stat(&b).await.unwrap().byte_count, 100);
        assert_eq!(path.read(&b, 0, 100).await.unwrap(), data(100, 0));
    }
}
