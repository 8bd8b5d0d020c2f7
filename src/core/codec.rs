//! # Frame Codec
//!
//! Length-prefixed framing for the byte stream of one TCP connection.
//!
//! ## Wire Format
//! ```text
//! [Length(4, little-endian)] [Payload(Length)]
//! ```
//!
//! The codec knows nothing about what the payload means; on the wire it is
//! always sealed bytes produced by a [`crate::utils::crypto::FrameCipher`].
//!
//! ## Security
//! A declared length of zero or above the configured ceiling is rejected as
//! soon as the 4-byte prefix is readable, before any buffer is reserved for
//! the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Tokio codec turning a stream of bytes into frames and back.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Codec with a tighter ceiling than [`MAX_FRAME_SIZE`].
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_length(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(len));
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_LEN]);
        let len = u32::from_le_bytes(prefix) as usize;

        // Reject before reserving anything for the payload
        self.check_length(len)?;

        let total = LENGTH_PREFIX_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.check_length(payload.len())?;

        dst.reserve(LENGTH_PREFIX_LEN + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// Encode a single payload into a standalone frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    FrameCodec::new().encode(Bytes::copy_from_slice(payload), &mut buf)?;
    Ok(buf.to_vec())
}

/// Decode the first frame of `bytes`, returning `None` when it is incomplete.
pub fn decode_frame(bytes: &[u8]) -> Result<Option<Bytes>> {
    let mut buf = BytesMut::from(bytes);
    FrameCodec::new().decode(&mut buf)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_is_prefix_plus_payload() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(frame.len(), LENGTH_PREFIX_LEN + 5);
        assert_eq!(&frame[..4], &5u32.to_le_bytes());
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[3u8, 0, 0, 0, 0xAA][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);

        buf.extend_from_slice(&[0xBB, 0xCC]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &[0xAA, 0xBB, 0xCC]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyFrame));
    }

    #[test]
    fn test_oversized_rejected_before_payload_arrives() {
        let declared = (MAX_FRAME_SIZE as u32) + 1;
        let mut buf = BytesMut::from(&declared.to_le_bytes()[..]);
        let capacity_before = buf.capacity();

        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::OversizedFrame(n) if n == declared as usize));
        assert_eq!(buf.capacity(), capacity_before);
    }

    #[test]
    fn test_custom_ceiling() {
        let mut codec = FrameCodec::with_max_frame_size(16);
        let mut buf = BytesMut::new();
        assert!(codec.encode(Bytes::from(vec![1u8; 17]), &mut buf).is_err());
        assert!(codec.encode(Bytes::from(vec![1u8; 16]), &mut buf).is_ok());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"one"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"three"), &mut buf).unwrap();

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"three");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
