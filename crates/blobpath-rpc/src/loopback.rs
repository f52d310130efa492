//! In-process channel between a [`ChannelClient`] and any [`BackingStore`].
//!
//! Every request is dispatched on its own task, so responses come back in
//! completion order rather than request order. This exercises the same
//! framing and correlation path a network transport would.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::client::{ChannelClient, ChannelConfig, FrameSink};
use crate::codec::FrameCodec;
use crate::error::{RemoteError, RpcError, RpcResult};
use crate::message::{Frame, RequestBody, ResponseBody, ResponseFrame};
use crate::traits::BackingStore;

const CHANNEL_DEPTH: usize = 1024;

struct LoopbackSink {
    tx: mpsc::Sender<Bytes>,
}

#[async_trait]
impl FrameSink for LoopbackSink {
    async fn send_frame(&self, frame: Bytes) -> RpcResult<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| RpcError::Transport("loopback server stopped".into()))
    }
}

/// Serve `store` over an in-process channel and return a connected client.
pub fn serve(store: Arc<dyn BackingStore>, config: ChannelConfig) -> ChannelClient {
    let (request_tx, mut request_rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
    let (response_tx, response_rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);

    tokio::spawn(async move {
        while let Some(frame) = request_rx.recv().await {
            let store = Arc::clone(&store);
            let reply = response_tx.clone();
            tokio::spawn(async move {
                if let Some(out) = handle_frame(store.as_ref(), &frame).await {
                    // The client may already be gone; nothing to do then.
                    let _ = reply.send(out).await;
                }
            });
        }
        trace!("loopback server stopped");
    });

    ChannelClient::connect(Arc::new(LoopbackSink { tx: request_tx }), response_rx, config)
}

async fn handle_frame(store: &dyn BackingStore, frame: &[u8]) -> Option<Bytes> {
    let request = match FrameCodec::decode(frame) {
        Ok((Frame::Request(request), _)) => request,
        Ok((Frame::Response(response), _)) => {
            warn!(id = %response.request_id, "ignoring response frame on server channel");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "dropping undecodable request frame");
            return None;
        }
    };
    let body = dispatch(store, request.body).await;
    let response = Frame::Response(ResponseFrame {
        request_id: request.request_id,
        body,
    });
    match FrameCodec::encode(&response) {
        Ok(out) => Some(Bytes::from(out)),
        Err(e) => {
            warn!(id = %request.request_id, error = %e, "failed to encode response");
            None
        }
    }
}

/// Execute one request against a store, producing the response body.
pub async fn dispatch(
    store: &dyn BackingStore,
    body: RequestBody,
) -> Result<ResponseBody, RemoteError> {
    let result = match body {
        RequestBody::GetObject {
            blob,
            index,
            length,
        } => store
            .get_object(&blob, index, length)
            .await
            .map(ResponseBody::Object),
        RequestBody::BeginTransaction { blob } => store
            .begin_transaction(&blob)
            .await
            .map(ResponseBody::TxBegun),
        RequestBody::UpdateObject {
            blob,
            tx,
            index,
            payload,
            is_last_in_blob,
        } => store
            .update_object(&blob, tx, index, payload, is_last_in_blob)
            .await
            .map(|_| ResponseBody::Ack),
        RequestBody::CommitTransaction { tx } => store
            .commit_transaction(tx)
            .await
            .map(|_| ResponseBody::Ack),
        RequestBody::AbortTransaction { tx } => store
            .abort_transaction(tx)
            .await
            .map(|_| ResponseBody::Ack),
        RequestBody::UpdateObjectOnce {
            blob,
            index,
            payload,
        } => store
            .update_object_once(&blob, index, payload)
            .await
            .map(|_| ResponseBody::Ack),
        RequestBody::StatBlob { blob } => store.stat_blob(&blob).await.map(ResponseBody::Blob),
        RequestBody::UpdateBlob {
            blob,
            byte_count,
            metadata,
        } => store
            .update_blob(&blob, byte_count, metadata)
            .await
            .map(|_| ResponseBody::Ack),
    };
    result.map_err(RemoteError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobpath_types::{
        BlobDescriptor, BlobId, BlobMetadata, ObjectFetch, ObjectIndex, TxId, VolumeId,
    };
    use std::time::Duration;

    /// Answers `get_object` after a delay that shrinks with the index, so
    /// later requests finish first.
    struct ReversingStore;

    #[async_trait]
    impl BackingStore for ReversingStore {
        async fn get_object(
            &self,
            _blob: &BlobId,
            index: ObjectIndex,
            length: u32,
        ) -> RpcResult<ObjectFetch> {
            tokio::time::sleep(Duration::from_millis(40 - index * 5)).await;
            Ok(ObjectFetch::Present(Bytes::from(vec![index as u8; length as usize])))
        }

        async fn begin_transaction(&self, _blob: &BlobId) -> RpcResult<TxId> {
            Ok(TxId::new())
        }

        async fn update_object(
            &self,
            _blob: &BlobId,
            _tx: Option<TxId>,
            _index: ObjectIndex,
            _payload: Bytes,
            _is_last_in_blob: bool,
        ) -> RpcResult<()> {
            Ok(())
        }

        async fn commit_transaction(&self, tx: TxId) -> RpcResult<()> {
            Err(RpcError::NotFound(format!("transaction {tx}")))
        }

        async fn abort_transaction(&self, _tx: TxId) -> RpcResult<()> {
            Ok(())
        }

        async fn update_object_once(
            &self,
            _blob: &BlobId,
            _index: ObjectIndex,
            _payload: Bytes,
        ) -> RpcResult<()> {
            Ok(())
        }

        async fn stat_blob(&self, blob: &BlobId) -> RpcResult<Option<BlobDescriptor>> {
            Ok(Some(BlobDescriptor::empty(blob.clone())))
        }

        async fn update_blob(
            &self,
            _blob: &BlobId,
            _byte_count: u64,
            _metadata: Option<BlobMetadata>,
        ) -> RpcResult<()> {
            Err(RpcError::InvalidArgument("byte count".into()))
        }
    }

    fn blob() -> BlobId {
        BlobId::new(VolumeId::new("d", "v").unwrap(), "b").unwrap()
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_callers() {
        let client = Arc::new(serve(Arc::new(ReversingStore), ChannelConfig::default()));
        let mut tasks = Vec::new();
        for index in 0..8u64 {
            let client = Arc::clone(&client);
            tasks.push(tokio::spawn(async move {
                client.get_object(&blob(), index, 4).await
            }));
        }
        for (index, task) in tasks.into_iter().enumerate() {
            let fetch = task.await.unwrap().unwrap();
            assert_eq!(fetch, ObjectFetch::Present(Bytes::from(vec![index as u8; 4])));
        }
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn remote_errors_keep_their_kind() {
        let client = serve(Arc::new(ReversingStore), ChannelConfig::default());
        let err = client.commit_transaction(TxId::new()).await.unwrap_err();
        assert!(matches!(err, RpcError::NotFound(_)));
        let err = client
            .update_blob(&blob(), 1, Some(BlobMetadata::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn slow_store_hits_request_timeout() {
        let config = ChannelConfig {
            request_timeout: Duration::from_millis(5),
            sweep_interval: Duration::from_millis(1),
        };
        let client = serve(Arc::new(ReversingStore), config);
        let err = client.get_object(&blob(), 0, 4).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
        // The late response must not disturb later calls.
        tokio::time::sleep(Duration::from_millis(60)).await;
        let desc = client.stat_blob(&blob()).await.unwrap().unwrap();
        assert_eq!(desc.byte_count, 0);
    }
}
