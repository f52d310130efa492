use crate::error::{RpcError, RpcResult};
use crate::message::{Frame, MAX_FRAME_SIZE};

const HEADER_SIZE: usize = 5;
const TRAILER_SIZE: usize = 4;

/// Codec for channel frames.
///
/// Layout: `[4 bytes BE len][1 byte tag][payload][4 bytes BE crc32(payload)]`,
/// where `len` counts the tag and the payload.
pub struct FrameCodec;

impl FrameCodec {
    pub fn encode(frame: &Frame) -> RpcResult<Vec<u8>> {
        let payload = bincode::serialize(frame).map_err(|e| RpcError::Codec(e.to_string()))?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let len = (payload.len() + 1) as u32;
        let crc = crc32fast::hash(&payload);
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(frame.type_tag());
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&crc.to_be_bytes());
        Ok(buf)
    }

    /// Decode one frame from the front of `data`. Returns (frame, bytes_consumed).
    pub fn decode(data: &[u8]) -> RpcResult<(Frame, usize)> {
        if data.len() < HEADER_SIZE {
            return Err(RpcError::Codec("frame too short".into()));
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len < 1 {
            return Err(RpcError::Codec("zero-length frame".into()));
        }
        if len - 1 > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge {
                size: len - 1,
                max: MAX_FRAME_SIZE,
            });
        }
        let total = 4 + len + TRAILER_SIZE;
        if data.len() < total {
            return Err(RpcError::Codec(format!(
                "incomplete frame: have {}, need {}",
                data.len(),
                total
            )));
        }
        let tag = data[4];
        let payload = &data[HEADER_SIZE..4 + len];
        let trailer = &data[4 + len..total];
        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(RpcError::Codec(format!(
                "crc mismatch: expected {expected:#010x}, got {actual:#010x}"
            )));
        }
        let frame: Frame =
            bincode::deserialize(payload).map_err(|e| RpcError::Codec(e.to_string()))?;
        if frame.type_tag() != tag {
            return Err(RpcError::Codec(format!(
                "tag {tag} does not match frame kind {}",
                frame.type_tag()
            )));
        }
        Ok((frame, total))
    }
}
