//! # Mosaic Wire Format
//!
//! Fixed 13-byte big-endian fragment header. Every datagram carries exactly
//! one fragment: the header followed by `ceil(orig_len / k)` payload bytes.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Client ID (32)                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Batch ID (32)                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Index (8)   |     K (8)     |     N (8)     | Orig Len (16) ┆
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ┆ Orig Len cont |
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! No framing delimiters, no trailing bytes. Field widths are enforced by
//! the header's field types, so encoding is infallible; decoding validates
//! length and the `1 ≤ k ≤ n` relationship.

use bytes::{Buf, BufMut, BytesMut};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 13;

/// Maximum application message length (fits the 16-bit `orig_len` field).
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Failures while decoding a received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Datagram shorter than the fixed header.
    #[error("short packet: {0} bytes, need at least {HEADER_LEN}")]
    ShortPacket(usize),
    /// Header fields violate `1 <= k <= n`.
    #[error("inconsistent header: k={k}, n={n}")]
    InconsistentHeader { k: u8, n: u8 },
}

// ─── Batch Identity ──────────────────────────────────────────────────────────

/// Wire-level identity of a batch.
///
/// `client_id` is drawn uniformly at random once per sender instance, so
/// batch-id collisions between senders sharing one receiver stay disjoint.
/// `batch_id` is a per-sender counter wrapping at 2³²; uniqueness within the
/// processed window suffices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub client_id: u32,
    pub batch_id: u32,
}

// ─── Fragment Header ─────────────────────────────────────────────────────────

/// Decoded fragment header — present on every Mosaic datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Random per-sender identifier.
    pub client_id: u32,
    /// Per-sender batch counter (wraps at 2³²).
    pub batch_id: u32,
    /// Fragment index, `0..n`.
    pub idx: u8,
    /// Data-fragment count.
    pub k: u8,
    /// Total-fragment count.
    pub n: u8,
    /// Original message length before padding.
    pub orig_len: u16,
}

impl FragmentHeader {
    /// Encode the header into a buffer. Always writes exactly [`HEADER_LEN`]
    /// bytes; identical inputs produce identical bytes.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.client_id);
        buf.put_u32(self.batch_id);
        buf.put_u8(self.idx);
        buf.put_u8(self.k);
        buf.put_u8(self.n);
        buf.put_u16(self.orig_len);
    }

    /// Decode a header from a received datagram.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < HEADER_LEN {
            return Err(WireError::ShortPacket(buf.remaining()));
        }
        let client_id = buf.get_u32();
        let batch_id = buf.get_u32();
        let idx = buf.get_u8();
        let k = buf.get_u8();
        let n = buf.get_u8();
        let orig_len = buf.get_u16();

        if k == 0 || k > n {
            return Err(WireError::InconsistentHeader { k, n });
        }

        Ok(FragmentHeader {
            client_id,
            batch_id,
            idx,
            k,
            n,
            orig_len,
        })
    }

    /// Batch identity carried by this header.
    pub fn key(&self) -> BatchKey {
        BatchKey {
            client_id: self.client_id,
            batch_id: self.batch_id,
        }
    }

    /// Payload bytes every fragment of this batch carries:
    /// `ceil(orig_len / k)`.
    pub fn block_size(&self) -> usize {
        (self.orig_len as usize).div_ceil(self.k as usize)
    }
}
