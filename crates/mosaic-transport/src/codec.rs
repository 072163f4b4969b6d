//! # Batch Encoder
//!
//! Turns one application message into an erasure-coded batch: pick `(k, n)`
//! from the message length and MTU, zero-pad, slice into `k` equal blocks,
//! and produce `n` fragments through a systematic GF(2⁸) Reed-Solomon code.
//! The first `k` fragments are the data blocks themselves; any `k` of the
//! `n` fragments reconstruct the message.
//!
//! Doubling `k` into `n` (the default redundancy ratio) puts the failure
//! probability under random loss `p` at roughly `C(2k, k-1)·p^(k+1)` — deep
//! enough that per-fragment retransmission is never needed.

use bytes::{Bytes, BytesMut};
use reed_solomon_erasure::galois_8::ReedSolomon;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Failures at the erasure-codec boundary.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// `k`/`n` outside the supported `1 ≤ k ≤ n ≤ 255` range.
    #[error("invalid batch parameters: k={k}, n={n}")]
    BadParameters { k: u8, n: u8 },
    /// Fewer distinct fragments than `k`.
    #[error("need {need} fragments to decode, have {have}")]
    InsufficientFragments { have: usize, need: usize },
    /// Fragment payload sizes disagree.
    #[error("fragment payloads must all be {expected} bytes")]
    UnevenFragments { expected: usize },
    /// Underlying Reed-Solomon failure.
    #[error(transparent)]
    ReedSolomon(#[from] reed_solomon_erasure::Error),
}

// ─── Parameter Planning ──────────────────────────────────────────────────────

/// Per-message encoding knobs accepted by `sendto`.
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    /// Maximum fragment payload bytes; every fragment fits one datagram of
    /// at most `mtu + 13` bytes.
    pub mtu: usize,
    /// Lower bound on the data-fragment count.
    pub min_k: usize,
    /// `n = k · redundancy_ratio` (clamped to 255).
    pub redundancy_ratio: usize,
}

impl Default for SendOptions {
    fn default() -> Self {
        SendOptions {
            mtu: 1400,
            min_k: 4,
            redundancy_ratio: 2,
        }
    }
}

/// Choose `(k, n)` for a message of `len` bytes.
///
/// `k = max(min_k, ceil(len / mtu))` keeps each fragment within one
/// datagram; both counts clamp to the 8-bit header fields.
pub fn plan_params(len: usize, opts: &SendOptions) -> (u8, u8) {
    let mtu = opts.mtu.max(1);
    let min_k = opts.min_k.clamp(1, 255);
    let ratio = opts.redundancy_ratio.max(1);

    let k = len.div_ceil(mtu).max(min_k).min(255);
    let n = k.saturating_mul(ratio).clamp(k, 255);
    (k as u8, n as u8)
}

// ─── Batch Encoding ──────────────────────────────────────────────────────────

/// One message erasure-coded into `n` equal-sized fragments.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub k: u8,
    pub n: u8,
    /// Message length before padding.
    pub orig_len: u16,
    /// `n` fragments of exactly `ceil(orig_len / k)` bytes each; the first
    /// `k` are the systematic data blocks.
    pub fragments: Vec<Bytes>,
}

impl EncodedBatch {
    /// Payload bytes per fragment.
    pub fn block_size(&self) -> usize {
        (self.orig_len as usize).div_ceil(self.k as usize)
    }
}

/// Erasure-code `data` into an `n`-fragment batch.
///
/// A zero-length message yields `n` empty fragments without touching the
/// codec; the receiver short-circuits those on the first fragment.
pub fn encode_message(data: &[u8], k: u8, n: u8) -> Result<EncodedBatch, CodecError> {
    if k == 0 || k > n {
        return Err(CodecError::BadParameters { k, n });
    }
    let k_count = k as usize;
    let n_count = n as usize;
    let orig_len = data.len() as u16;
    let block_size = data.len().div_ceil(k_count);

    if block_size == 0 {
        return Ok(EncodedBatch {
            k,
            n,
            orig_len,
            fragments: vec![Bytes::new(); n_count],
        });
    }

    // Slice into k blocks, zero-padding the tail of the last one.
    let mut shards: Vec<Vec<u8>> = Vec::with_capacity(n_count);
    for i in 0..k_count {
        let start = i * block_size;
        let end = ((i + 1) * block_size).min(data.len());
        let mut shard = vec![0u8; block_size];
        if start < data.len() {
            shard[..end - start].copy_from_slice(&data[start..end]);
        }
        shards.push(shard);
    }

    let parity = n_count - k_count;
    if parity > 0 {
        shards.resize(n_count, vec![0u8; block_size]);
        let rs = ReedSolomon::new(k_count, parity)?;
        rs.encode(&mut shards)?;
    }

    Ok(EncodedBatch {
        k,
        n,
        orig_len,
        fragments: shards.into_iter().map(Bytes::from).collect(),
    })
}

// ─── Batch Decoding ──────────────────────────────────────────────────────────

/// Reconstruct the `k` data blocks from any `≥ k` received fragments.
///
/// `fragments[i]` carries the payload of fragment id `ids[i]`; ids outside
/// `0..n` must have been filtered by the caller.
pub fn decode_blocks(k: u8, n: u8, fragments: &[Bytes], ids: &[u8]) -> Result<Vec<Bytes>, CodecError> {
    if k == 0 || k > n {
        return Err(CodecError::BadParameters { k, n });
    }
    let k_count = k as usize;
    let n_count = n as usize;
    if fragments.len() < k_count || fragments.len() != ids.len() {
        return Err(CodecError::InsufficientFragments {
            have: fragments.len().min(ids.len()),
            need: k_count,
        });
    }

    let block_size = fragments[0].len();
    if fragments.iter().any(|f| f.len() != block_size) {
        return Err(CodecError::UnevenFragments {
            expected: block_size,
        });
    }
    if block_size == 0 {
        return Ok(vec![Bytes::new(); k_count]);
    }

    let mut shards: Vec<Option<Vec<u8>>> = vec![None; n_count];
    for (fragment, &id) in fragments.iter().zip(ids) {
        if (id as usize) >= n_count {
            return Err(CodecError::ReedSolomon(
                reed_solomon_erasure::Error::InvalidIndex,
            ));
        }
        shards[id as usize] = Some(fragment.to_vec());
    }

    let parity = n_count - k_count;
    if parity == 0 {
        // Pure systematic batch: every data block must be present verbatim.
        return shards
            .into_iter()
            .take(k_count)
            .map(|s| {
                s.map(Bytes::from).ok_or(CodecError::InsufficientFragments {
                    have: fragments.len(),
                    need: k_count,
                })
            })
            .collect();
    }

    let rs = ReedSolomon::new(k_count, parity)?;
    rs.reconstruct_data(&mut shards)?;

    shards
        .into_iter()
        .take(k_count)
        .map(|s| {
            s.map(Bytes::from).ok_or(CodecError::InsufficientFragments {
                have: fragments.len(),
                need: k_count,
            })
        })
        .collect()
}

/// Concatenate decoded blocks and strip the padding.
pub fn assemble(blocks: &[Bytes], orig_len: usize) -> Bytes {
    let mut out = BytesMut::with_capacity(blocks.iter().map(|b| b.len()).sum());
    for block in blocks {
        out.extend_from_slice(block);
    }
    out.truncate(orig_len);
    out.freeze()
}
