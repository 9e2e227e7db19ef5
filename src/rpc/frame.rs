//! Binary frame codec.
//!
//! Wire format (both directions, inside the WebSocket binary frame):
//!
//! ```text
//! [u32 BE: id] [payload bytes…]
//! ```
//!
//! The high bit of the id (`1 << 31`) selects the address space:
//! - set   → terminal id (PTY input/output); an empty payload from the
//!           server means the terminal closed
//! - clear → blob id (per-client binary cache)
//!
//! Stored ids never carry the flag; it exists only on the wire.

use bytes::{BufMut, BytesMut};

/// High bit marking a terminal id on the wire.
pub const TERMINAL_FLAG: u32 = 1 << 31;

/// Largest id either space can use (31 bits).
pub const MAX_ID: u32 = TERMINAL_FLAG - 1;

/// Maximum `fs.pread` payload the server will send in one frame.
pub const MAX_BINARY_PACKET: usize = 16384;

/// Where an inbound frame is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTarget {
    /// Blob cache entry under the sending client.
    Blob(u32),
    /// PTY input for a linked terminal.
    Terminal(u32),
}

/// Encode a blob frame: `[id BE] ‖ payload`.
pub fn encode_blob(id: u32, payload: &[u8]) -> Vec<u8> {
    encode(id, payload)
}

/// Encode a terminal output frame: `[(id | flag) BE] ‖ payload`.
pub fn encode_terminal(id: u32, payload: &[u8]) -> Vec<u8> {
    encode(id | TERMINAL_FLAG, payload)
}

/// Encode the zero-payload frame announcing a terminal close.
pub fn encode_terminal_close(id: u32) -> Vec<u8> {
    encode(id | TERMINAL_FLAG, &[])
}

fn encode(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(id);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Split an inbound frame into its target and payload.
///
/// Returns `None` when the frame is shorter than the 4-byte header.
pub fn decode(data: &[u8]) -> Option<(FrameTarget, &[u8])> {
    let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
    let id = u32::from_be_bytes(header);
    let payload = &data[4..];
    let target = if id & TERMINAL_FLAG != 0 {
        FrameTarget::Terminal(id & !TERMINAL_FLAG)
    } else {
        FrameTarget::Blob(id)
    };
    Some((target, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_frame_roundtrip() {
        let frame = encode_blob(42, b"hello");
        assert_eq!(&frame[..4], &[0, 0, 0, 42]);
        let (target, payload) = decode(&frame).unwrap();
        assert_eq!(target, FrameTarget::Blob(42));
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn terminal_frame_carries_flag() {
        let frame = encode_terminal(7, b"ls\n");
        assert_eq!(&frame[..4], &[0x80, 0, 0, 7]);
        let (target, payload) = decode(&frame).unwrap();
        assert_eq!(target, FrameTarget::Terminal(7));
        assert_eq!(payload, b"ls\n");
    }

    #[test]
    fn close_frame_has_empty_payload() {
        let frame = encode_terminal_close(3);
        assert_eq!(frame.len(), 4);
        let (target, payload) = decode(&frame).unwrap();
        assert_eq!(target, FrameTarget::Terminal(3));
        assert!(payload.is_empty());
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(decode(&[0, 0, 1]).is_none());
        assert!(decode(&[]).is_none());
    }

    #[test]
    fn max_id_does_not_touch_the_flag() {
        let frame = encode_blob(MAX_ID, b"");
        let (target, _) = decode(&frame).unwrap();
        assert_eq!(target, FrameTarget::Blob(MAX_ID));
    }
}
