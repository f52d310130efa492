use std::sync::Arc;

use blobpath_types::{BlobDescriptor, BlobId};
use bytes::Bytes;
use tokio::runtime::{Handle, Runtime};

use crate::datapath::DataPath;
use crate::error::{DataPathError, DataPathResult};

/// Synchronous wrapper around [`DataPath`] for adapter threads that are not
/// async.
///
/// Every call blocks the current thread on the runtime. Calling from inside
/// a Tokio worker thread panics, as with any `block_on`. Dropping the last
/// clone is fine anywhere: an owned runtime shuts down in the background.
#[derive(Clone)]
pub struct BlockingDataPath {
    inner: DataPath,
    handle: Handle,
    // Keeps an owned runtime alive for as long as any clone exists.
    _runtime: Option<Arc<OwnedRuntime>>,
}

struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl BlockingDataPath {
    /// Drive `inner` on an existing runtime.
    pub fn new(inner: DataPath, handle: Handle) -> Self {
        Self {
            inner,
            handle,
            _runtime: None,
        }
    }

    /// Build a dedicated multi-threaded runtime and construct the data path
    /// inside it with `build`.
    pub fn with_runtime<F>(build: F) -> DataPathResult<Self>
    where
        F: FnOnce() -> DataPathResult<DataPath>,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("blobpath-worker")
            .build()
            .map_err(DataPathError::Io)?;
        let inner = {
            let _guard = runtime.enter();
            build()?
        };
        Ok(Self {
            inner,
            handle: runtime.handle().clone(),
            _runtime: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    pub fn data_path(&self) -> &DataPath {
        &self.inner
    }

    pub fn read(&self, blob: &BlobId, offset: u64, length: u32) -> DataPathResult<Bytes> {
        self.handle.block_on(self.inner.read(blob, offset, length))
    }

    pub fn write(&self, blob: &BlobId, offset: u64, data: impl Into<Bytes>) -> DataPathResult<()> {
        self.handle.block_on(self.inner.write(blob, offset, data.into()))
    }

    pub fn flush(&self, blob: &BlobId) -> DataPathResult<()> {
        self.handle.block_on(self.inner.flush(blob))
    }

    pub fn stat(&self, blob: &BlobId) -> DataPathResult<BlobDescriptor> {
        self.handle.block_on(self.inner.stat(blob))
    }

    pub fn set_metadata(&self, blob: &BlobId, key: &str, value: &str) -> DataPathResult<()> {
        self.handle.block_on(self.inner.set_metadata(blob, key, value))
    }
}

impl std::fmt::Debug for BlockingDataPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingDataPath")
            .field("inner", &self.inner)
            .field("owns_runtime", &self._runtime.is_some())
            .finish()
    }
}
