use blobpath_types::{BlobDescriptor, BlobId, BlobMetadata, ObjectFetch, ObjectIndex, RequestId, TxId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Backing-store calls, one variant per [`BackingStore`](crate::BackingStore) method.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RequestBody {
    GetObject {
        blob: BlobId,
        index: ObjectIndex,
        length: u32,
    },
    BeginTransaction {
        blob: BlobId,
    },
    UpdateObject {
        blob: BlobId,
        tx: Option<TxId>,
        index: ObjectIndex,
        payload: Bytes,
        is_last_in_blob: bool,
    },
    CommitTransaction {
        tx: TxId,
    },
    AbortTransaction {
        tx: TxId,
    },
    UpdateObjectOnce {
        blob: BlobId,
        index: ObjectIndex,
        payload: Bytes,
    },
    StatBlob {
        blob: BlobId,
    },
    UpdateBlob {
        blob: BlobId,
        byte_count: u64,
        metadata: Option<BlobMetadata>,
    },
}

impl RequestBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GetObject { .. } => "GetObject",
            Self::BeginTransaction { .. } => "BeginTransaction",
            Self::UpdateObject { .. } => "UpdateObject",
            Self::CommitTransaction { .. } => "CommitTransaction",
            Self::AbortTransaction { .. } => "AbortTransaction",
            Self::UpdateObjectOnce { .. } => "UpdateObjectOnce",
            Self::StatBlob { .. } => "StatBlob",
            Self::UpdateBlob { .. } => "UpdateBlob",
        }
    }
}

/// Successful response payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseBody {
    Object(ObjectFetch),
    TxBegun(TxId),
    Blob(Option<BlobDescriptor>),
    Ack,
}

impl ResponseBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Object(_) => "Object",
            Self::TxBegun(_) => "TxBegun",
            Self::Blob(_) => "Blob",
            Self::Ack => "Ack",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestFrame {
    pub request_id: RequestId,
    pub body: RequestBody,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub request_id: RequestId,
    pub body: Result<ResponseBody, RemoteError>,
}

/// Everything that travels over a channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Frame {
    Request(RequestFrame),
    Response(ResponseFrame),
}

impl Frame {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Request(_) => 1,
            Self::Response(_) => 2,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Request(f) => f.request_id,
            Self::Response(f) => f.request_id,
        }
    }
}
