//! # mosaic-transport
//!
//! Mosaic lossy-link datagram transport.
//!
//! Application messages are wrapped in erasure-coded **batches** of
//! independently transmissible fragments: any `k` of the `n` fragments of a
//! batch reconstruct the original message, so random packet loss is absorbed
//! without retransmission latency. Sending is asynchronous through a bounded
//! queue drained by a dedicated worker thread; receiving is a stateful
//! per-batch reassembler with duplicate suppression and timeout eviction.
//!
//! ## Crate structure
//!
//! - [`wire`] — Fragment header serialization (fixed 13-byte big-endian)
//! - [`codec`] — Batch parameter planning, padding/slicing, Reed-Solomon boundary
//! - [`sender`] — Send-queue entries, batch-id allocation, fragment framing
//! - [`receiver`] — Per-batch reassembly state machine
//! - [`window`] — Processed-batch window for duplicate suppression
//! - [`socket`] — UDP socket, worker thread, lifecycle and configuration
//! - [`stats`] — Transfer statistics counters

pub mod codec;
pub mod receiver;
pub mod sender;
pub mod socket;
pub mod stats;
pub mod window;
pub mod wire;
