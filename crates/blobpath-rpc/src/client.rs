use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blobpath_types::{
    BlobDescriptor, BlobId, BlobMetadata, ObjectFetch, ObjectIndex, RequestIdGen, TxId,
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::codec::FrameCodec;
use crate::correlator::RequestCorrelator;
use crate::error::{RpcError, RpcResult};
use crate::message::{Frame, RequestBody, RequestFrame, ResponseBody};
use crate::traits::BackingStore;

/// Outbound half of a channel: accepts encoded frames for transmission.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: Bytes) -> RpcResult<()>;
}

/// Timing parameters for a [`ChannelClient`].
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Deadline applied to every request.
    pub request_timeout: Duration,
    /// How often the background sweeper evicts expired requests.
    pub sweep_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(100),
        }
    }
}

/// [`BackingStore`] client multiplexing every call over one logical channel.
///
/// Requests go out through a [`FrameSink`]; responses arrive on an inbound
/// frame stream consumed by a single delivery task, which is the only writer
/// of pending-request state besides timeout expiry.
pub struct ChannelClient {
    sink: Arc<dyn FrameSink>,
    correlator: Arc<RequestCorrelator<ResponseBody>>,
    ids: RequestIdGen,
    delivery: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl ChannelClient {
    /// Connect a client to an established channel.
    ///
    /// Spawns the delivery and sweeper tasks, so this must be called from
    /// within a Tokio runtime.
    pub fn connect(
        sink: Arc<dyn FrameSink>,
        inbound: mpsc::Receiver<Bytes>,
        config: ChannelConfig,
    ) -> Self {
        let correlator = Arc::new(RequestCorrelator::new(config.request_timeout));
        let delivery = tokio::spawn(run_delivery(inbound, Arc::clone(&correlator)));
        let sweeper = correlator.spawn_sweeper(config.sweep_interval);
        info!(
            timeout_ms = config.request_timeout.as_millis() as u64,
            "channel client connected"
        );
        Self {
            sink,
            correlator,
            ids: RequestIdGen::new(),
            delivery,
            sweeper,
        }
    }

    /// Whether the inbound stream has ended. Every call fails once it has.
    pub fn is_closed(&self) -> bool {
        self.correlator.is_closed()
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    async fn call(&self, body: RequestBody) -> RpcResult<ResponseBody> {
        let request_id = self.ids.next_id();
        let kind = body.type_name();
        // Register before sending so a fast response cannot race ahead.
        let pending = self.correlator.expect(request_id)?;
        let frame = FrameCodec::encode(&Frame::Request(RequestFrame { request_id, body }))?;
        trace!(%request_id, kind, bytes = frame.len(), "sending request");
        self.sink.send_frame(Bytes::from(frame)).await?;
        pending.wait().await
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        self.delivery.abort();
        self.sweeper.abort();
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("correlator", &self.correlator)
            .finish()
    }
}

/// Decode inbound frames and hand each response to the correlator.
async fn run_delivery(
    mut inbound: mpsc::Receiver<Bytes>,
    correlator: Arc<RequestCorrelator<ResponseBody>>,
) {
    while let Some(frame) = inbound.recv().await {
        match FrameCodec::decode(&frame) {
            Ok((Frame::Response(response), _)) => {
                let id = response.request_id;
                correlator.complete(id, response.body.map_err(RpcError::from));
            }
            Ok((Frame::Request(request), _)) => {
                warn!(id = %request.request_id, "ignoring request frame on client channel");
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
            }
        }
    }
    debug!("inbound channel closed");
    correlator.close(RpcError::Transport("channel closed".into()));
}

fn unexpected(expected: &'static str, actual: &ResponseBody) -> RpcError {
    RpcError::UnexpectedResponse {
        expected,
        actual: actual.type_name(),
    }
}

fn expect_ack(body: ResponseBody) -> RpcResult<()> {
    match body {
        ResponseBody::Ack => Ok(()),
        other => Err(unexpected("Ack", &other)),
    }
}

#[async_trait]
impl BackingStore for ChannelClient {
    async fn get_object(
        &self,
        blob: &BlobId,
        index: ObjectIndex,
        length: u32,
    ) -> RpcResult<ObjectFetch> {
        let body = self
            .call(RequestBody::GetObject {
                blob: blob.clone(),
                index,
                length,
            })
            .await?;
        match body {
            ResponseBody::Object(fetch) => Ok(fetch),
            other => Err(unexpected("Object", &other)),
        }
    }

    async fn begin_transaction(&self, blob: &BlobId) -> RpcResult<TxId> {
        let body = self
            .call(RequestBody::BeginTransaction { blob: blob.clone() })
            .await?;
        match body {
            ResponseBody::TxBegun(tx) => Ok(tx),
            other => Err(unexpected("TxBegun", &other)),
        }
    }

    async fn update_object(
        &self,
        blob: &BlobId,
        tx: Option<TxId>,
        index: ObjectIndex,
        payload: Bytes,
        is_last_in_blob: bool,
    ) -> RpcResult<()> {
        expect_ack(
            self.call(RequestBody::UpdateObject {
                blob: blob.clone(),
                tx,
                index,
                payload,
                is_last_in_blob,
            })
            .await?,
        )
    }

    async fn commit_transaction(&self, tx: TxId) -> RpcResult<()> {
        expect_ack(self.call(RequestBody::CommitTransaction { tx }).await?)
    }

    async fn abort_transaction(&self, tx: TxId) -> RpcResult<()> {
        expect_ack(self.call(RequestBody::AbortTransaction { tx }).await?)
    }

    async fn update_object_once(
        &self,
        blob: &BlobId,
        index: ObjectIndex,
        payload: Bytes,
    ) -> RpcResult<()> {
        expect_ack(
            self.call(RequestBody::UpdateObjectOnce {
                blob: blob.clone(),
                index,
                payload,
            })
            .await?,
        )
    }

    async fn stat_blob(&self, blob: &BlobId) -> RpcResult<Option<BlobDescriptor>> {
        let body = self
            .call(RequestBody::StatBlob { blob: blob.clone() })
            .await?;
        match body {
            ResponseBody::Blob(desc) => Ok(desc),
            other => Err(unexpected("Blob", &other)),
        }
    }

    async fn update_blob(
        &self,
        blob: &BlobId,
        byte_count: u64,
        metadata: Option<BlobMetadata>,
    ) -> RpcResult<()> {
        expect_ack(
            self.call(RequestBody::UpdateBlob {
                blob: blob.clone(),
                byte_count,
                metadata,
            })
            .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ResponseFrame;
    use blobpath_types::{RequestId, VolumeId};
    use std::sync::Mutex;

    /// Sink that records outbound frames instead of sending them.
    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, frame: Bytes) -> RpcResult<()> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl FrameSink for BrokenSink {
        async fn send_frame(&self, _frame: Bytes) -> RpcResult<()> {
            Err(RpcError::Transport("connection reset".into()))
        }
    }

    fn blob() -> BlobId {
        BlobId::new(VolumeId::new("d", "v").unwrap(), "b").unwrap()
    }

    fn response(id: RequestId, body: ResponseBody) -> Bytes {
        Bytes::from(
            FrameCodec::encode(&Frame::Response(ResponseFrame {
                request_id: id,
                body: Ok(body),
            }))
            .unwrap(),
        )
    }

    fn quick() -> ChannelConfig {
        ChannelConfig {
            request_timeout: Duration::from_millis(50),
            sweep_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn response_resolves_call() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        let client = Arc::new(ChannelClient::connect(sink.clone(), rx, ChannelConfig::default()));

        let c = Arc::clone(&client);
        let b = blob();
        let call = tokio::spawn(async move { c.stat_blob(&b).await });
        while sink.frames.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        let sent = sink.frames.lock().unwrap()[0].clone();
        let (frame, _) = FrameCodec::decode(&sent).unwrap();
        tx.send(response(frame.request_id(), ResponseBody::Blob(None)))
            .await
            .unwrap();
        assert_eq!(call.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn mismatched_response_is_an_error() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        let client = Arc::new(ChannelClient::connect(sink.clone(), rx, ChannelConfig::default()));

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.commit_transaction(TxId::new()).await });
        while sink.frames.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        let sent = sink.frames.lock().unwrap()[0].clone();
        let (frame, _) = FrameCodec::decode(&sent).unwrap();
        tx.send(response(frame.request_id(), ResponseBody::Blob(None)))
            .await
            .unwrap();
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            RpcError::UnexpectedResponse {
                expected: "Ack",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unanswered_call_times_out() {
        let sink = Arc::new(RecordingSink::default());
        let (_tx, rx) = mpsc::channel(8);
        let client = ChannelClient::connect(sink, rx, quick());
        let err = client.stat_blob(&blob()).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn closed_channel_fails_pending_calls() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        let client = Arc::new(ChannelClient::connect(sink.clone(), rx, ChannelConfig::default()));

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.stat_blob(&blob()).await });
        while sink.frames.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        drop(tx);
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn calls_after_close_fail_fast() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        let client = ChannelClient::connect(sink.clone(), rx, ChannelConfig {
            request_timeout: Duration::from_secs(5),
            ..quick()
        });
        drop(tx);
        while !client.is_closed() {
            tokio::task::yield_now().await;
        }

        let started = tokio::time::Instant::now();
        let err = client.stat_blob(&blob()).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(sink.frames.lock().unwrap().is_empty());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn send_failure_is_reported_and_unregistered() {
        let (_tx, rx) = mpsc::channel(8);
        let client = ChannelClient::connect(Arc::new(BrokenSink), rx, ChannelConfig::default());
        let err = client.stat_blob(&blob()).await.unwrap_err();
        assert_eq!(err, RpcError::Transport("connection reset".into()));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn garbage_frames_are_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        let client = Arc::new(ChannelClient::connect(sink.clone(), rx, ChannelConfig::default()));

        tx.send(Bytes::from_static(b"\x00\x00\x00\x02\x09\x01"))
            .await
            .unwrap();

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.stat_blob(&blob()).await });
        while sink.frames.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        let sent = sink.frames.lock().unwrap()[0].clone();
        let (frame, _) = FrameCodec::decode(&sent).unwrap();
        tx.send(response(frame.request_id(), ResponseBody::Blob(None)))
            .await
            .unwrap();
        assert!(call.await.unwrap().is_ok());
    }
}
