// ============================================
// File: crates/snap2p-core/src/protocol/framing.rs
// ============================================
//! # Wire Framing
//!
//! ## Creation Reason
//! Provides the length-prefix framing layer: every frame on the wire is
//! `varint(len) || bytes[len]`, where the varint is an unsigned LEB128.
//!
//! ## Main Functionality
//! - `encode_varint` / `decode_varint`: unsigned LEB128 integers
//! - `frame`: prepend a length prefix to a payload
//! - `FrameBuffer`: incremental reassembly of frames from a byte stream
//!
//! ## Wire Format
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ length (LEB128 varint, ≤ 4 bytes)        │
//! ├──────────────────────────────────────────┤
//! │ payload (length bytes, ≤ 16 MiB)         │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Parsing Strategy
//! The buffer accepts arbitrary byte chunks and yields at most one
//! complete frame per `try_frame` call. An incomplete varint or payload
//! yields `None`; a varint wider than 28 bits or a declared length above
//! 16 MiB is rejected immediately.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Oversize declarations are rejected BEFORE buffering the payload
//! - Keep parsing zero-allocation; frames are split out of the buffer
//!
//! ## Last Modified
//! v0.1.0 - Initial framing implementation

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Maximum payload size of a single frame (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum number of bytes in a length varint (28 bits = 4 groups of 7).
pub const MAX_VARINT_BYTES: usize = 4;

// ============================================
// Varint
// ============================================

/// Appends `value` to `buf` as an unsigned LEB128 varint.
pub fn encode_varint(value: u32, buf: &mut BytesMut) {
    let mut v = value;
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Attempts to decode an unsigned LEB128 varint from the front of `buf`.
///
/// # Returns
/// - `Ok(Some((value, consumed)))` on success
/// - `Ok(None)` if the varint is incomplete
/// - `Err(VarintTooLarge)` if the encoding needs more than 28 bits
pub fn decode_varint(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value: u32 = 0;
    for (i, byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_BYTES {
            return Err(CoreError::VarintTooLarge);
        }
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    // All buffered bytes had continuation bits; if we already saw the
    // maximum width the encoding can never terminate legally.
    if buf.len() >= MAX_VARINT_BYTES {
        return Err(CoreError::VarintTooLarge);
    }
    Ok(None)
}

// ============================================
// Frame Encoding
// ============================================

/// Encodes a payload as a single frame (`varint(len) || payload`).
///
/// # Errors
/// Returns `FrameTooLarge` if the payload exceeds [`MAX_FRAME_SIZE`].
pub fn frame(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(CoreError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut buf = BytesMut::with_capacity(payload.len() + MAX_VARINT_BYTES);
    encode_varint(payload.len() as u32, &mut buf);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

// ============================================
// FrameBuffer
// ============================================

/// Incremental frame reassembly buffer.
///
/// Bytes arrive from the socket in arbitrary chunks; `extend` appends
/// them and `try_frame` yields complete frames in order.
///
/// # Example
/// ```
/// use snap2p_core::protocol::framing::{frame, FrameBuffer};
///
/// let mut buf = FrameBuffer::new();
/// let encoded = frame(b"hello").unwrap();
///
/// // Feed one byte at a time; the frame appears only when complete.
/// for (i, b) in encoded.iter().enumerate() {
///     buf.extend(&[*b]);
///     let got = buf.try_frame().unwrap();
///     if i + 1 == encoded.len() {
///         assert_eq!(got.unwrap().as_ref(), b"hello");
///     } else {
///         assert!(got.is_none());
///     }
/// }
/// ```
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    /// Creates an empty frame buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Appends raw bytes received from the transport.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered, not-yet-consumed bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if no bytes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Attempts to extract one complete frame.
    ///
    /// # Returns
    /// - `Ok(Some(payload))` when a full frame is buffered
    /// - `Ok(None)` when more bytes are needed
    ///
    /// # Errors
    /// - `VarintTooLarge` for a length prefix wider than 28 bits
    /// - `FrameTooLarge` for a declared length above 16 MiB
    pub fn try_frame(&mut self) -> Result<Option<Bytes>> {
        let Some((len, varint_len)) = decode_varint(&self.buf)? else {
            return Ok(None);
        };
        let len = len as usize;
        if len > MAX_FRAME_SIZE {
            return Err(CoreError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        if self.buf.len() < varint_len + len {
            return Ok(None);
        }
        self.buf.advance(varint_len);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u32, 1, 127, 128, 300, 16_383, 16_384, 2_097_151, MAX_FRAME_SIZE as u32] {
            let mut buf = BytesMut::new();
            encode_varint(value, &mut buf);
            let (decoded, consumed) = decode_varint(&buf).unwrap().unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn test_varint_incomplete() {
        // Continuation bit set, no terminating byte yet.
        assert!(decode_varint(&[0x80]).unwrap().is_none());
        assert!(decode_varint(&[0x80, 0x80]).unwrap().is_none());
        assert!(decode_varint(&[]).unwrap().is_none());
    }

    #[test]
    fn test_varint_too_large() {
        // Five continuation bytes can never be a valid 28-bit varint.
        let result = decode_varint(&[0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(matches!(result, Err(CoreError::VarintTooLarge)));

        // Even without the terminator, four continuation bytes are fatal.
        let result = decode_varint(&[0x80, 0x80, 0x80, 0x80]);
        assert!(matches!(result, Err(CoreError::VarintTooLarge)));
    }

    #[test]
    fn test_frame_roundtrip() {
        let payload = b"the quick brown fox";
        let encoded = frame(payload).unwrap();

        let mut buf = FrameBuffer::new();
        buf.extend(&encoded);
        let got = buf.try_frame().unwrap().unwrap();
        assert_eq!(got.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_rejects_oversize_payload() {
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            frame(&payload),
            Err(CoreError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_buffer_rejects_oversize_declaration() {
        // Declared length of 16 MiB + 1, no payload needed to reject.
        let mut prefix = BytesMut::new();
        encode_varint((MAX_FRAME_SIZE + 1) as u32, &mut prefix);

        let mut buf = FrameBuffer::new();
        buf.extend(&prefix);
        assert!(matches!(
            buf.try_frame(),
            Err(CoreError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_buffer_boundary_16mib() {
        // Exactly 16 MiB round-trips.
        let payload = vec![0xabu8; MAX_FRAME_SIZE];
        let encoded = frame(&payload).unwrap();

        let mut buf = FrameBuffer::new();
        buf.extend(&encoded);
        let got = buf.try_frame().unwrap().unwrap();
        assert_eq!(got.len(), MAX_FRAME_SIZE);
    }

    #[test]
    fn test_buffer_multiple_frames() {
        let mut buf = FrameBuffer::new();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&frame(b"one").unwrap());
        wire.extend_from_slice(&frame(b"").unwrap());
        wire.extend_from_slice(&frame(b"three").unwrap());

        buf.extend(&wire);
        assert_eq!(buf.try_frame().unwrap().unwrap().as_ref(), b"one");
        assert_eq!(buf.try_frame().unwrap().unwrap().as_ref(), b"");
        assert_eq!(buf.try_frame().unwrap().unwrap().as_ref(), b"three");
        assert!(buf.try_frame().unwrap().is_none());
    }

    #[test]
    fn test_buffer_split_payload() {
        let encoded = frame(&[0x55u8; 1000]).unwrap();
        let mut buf = FrameBuffer::new();

        buf.extend(&encoded[..500]);
        assert!(buf.try_frame().unwrap().is_none());
        buf.extend(&encoded[500..]);
        assert_eq!(buf.try_frame().unwrap().unwrap().len(), 1000);
    }
}
