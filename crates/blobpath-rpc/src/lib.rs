//! Backing-store RPC surface for blobpath.
//!
//! The data path talks to the object store through the [`BackingStore`]
//! trait. The production implementation, [`ChannelClient`], multiplexes
//! every call over one logical connection: requests are framed by
//! [`FrameCodec`], tagged with a [`RequestId`](blobpath_types::RequestId), and
//! their responses are matched back to the waiting caller by a
//! [`RequestCorrelator`] that also enforces per-request deadlines.
//!
//! # Design Rules
//!
//! 1. A request is registered with the correlator before its frame is sent.
//! 2. Every pending request resolves exactly once: response, timeout, or
//!    transport failure.
//! 3. Late and duplicate responses are dropped, never delivered twice.
//! 4. The delivery path never blocks on a caller.
//! 5. No retries happen here; retry belongs to the connection layer.

pub mod client;
pub mod codec;
pub mod correlator;
pub mod error;
pub mod loopback;
pub mod message;
pub mod traits;

pub use client::{ChannelClient, ChannelConfig, FrameSink};
pub use codec::FrameCodec;
pub use correlator::{PendingResult, RequestCorrelator};
pub use error::{RemoteError, RemoteErrorKind, RpcError, RpcResult};
pub use message::{Frame, RequestBody, RequestFrame, ResponseBody, ResponseFrame, MAX_FRAME_SIZE};
pub use traits::BackingStore;
