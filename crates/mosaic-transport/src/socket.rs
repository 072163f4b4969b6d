//! # Socket & Lifecycle
//!
//! `MosaicSocket` wraps one UDP socket with the full transport pipeline:
//! `sendto` places messages on a bounded queue, a dedicated worker thread
//! erasure-codes and transmits them, and `recvfrom` drives the reassembler
//! until a complete message surfaces.
//!
//! ## Threading contract
//!
//! - `sendto` may be called from any thread; it only touches the queue and
//!   the statistics counters.
//! - The worker thread is the only caller of the socket's send side.
//! - `recvfrom` is cooperative single-threaded: the caller owns the
//!   reassembly table exclusively for the duration of the call.
//! - Worker-side failures never escape the instance; they become counters,
//!   optional hook invocations, and log lines.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use quanta::Instant;
use rand::RngExt;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::codec::{self, CodecError, SendOptions};
use crate::receiver::{IngestOutcome, Reassembler};
use crate::sender::{frame_batch, BatchIdGen, QueueEntry};
use crate::stats::{SocketStats, StatsSnapshot};
use crate::wire::{BatchKey, MAX_MESSAGE_LEN};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Queue poll interval; bounds how long the worker takes to observe a stop.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause between fragment send retries.
const RETRY_PAUSE: Duration = Duration::from_millis(10);

/// Default kernel socket buffer request. Bursty fragment trains overflow
/// the Linux defaults well before the application falls behind.
const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// `sendto` failures surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("socket is closed")]
    Closed,
    #[error("message of {0} bytes exceeds the {MAX_MESSAGE_LEN}-byte limit")]
    MessageTooLarge(usize),
}

/// `recvfrom` failures surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RecvError {
    #[error("socket is closed")]
    Closed,
    #[error("receive timed out")]
    Timeout,
    #[error(transparent)]
    Io(#[from] io::Error),
}

// ─── Observer Hooks ──────────────────────────────────────────────────────────

/// Invoked by the worker when a fragment exhausts its retry budget.
pub type SendErrorHook = Box<dyn Fn(&io::Error, &[u8], SocketAddr) + Send + Sync>;
/// Invoked by `sendto` when a message is dropped on a full queue.
pub type QueueFullHook = Box<dyn Fn(&[u8], SocketAddr) + Send + Sync>;
/// Invoked by `recvfrom` when a batch reaches its threshold but fails to decode.
pub type DecodeErrorHook = Box<dyn Fn(&CodecError, BatchKey) + Send + Sync>;

/// Optional observer callbacks; each fires exactly once per event, from the
/// worker thread (send side) or the calling thread (receive side). When a
/// hook is unset the event is logged instead.
#[derive(Default)]
pub struct EventHooks {
    pub on_send_error: Option<SendErrorHook>,
    pub on_queue_full: Option<QueueFullHook>,
    pub on_decode_error: Option<DecodeErrorHook>,
}

impl fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHooks")
            .field("on_send_error", &self.on_send_error.is_some())
            .field("on_queue_full", &self.on_queue_full.is_some())
            .field("on_decode_error", &self.on_decode_error.is_some())
            .finish()
    }
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Socket construction options.
#[derive(Debug)]
pub struct SocketConfig {
    /// Local address to bind; wildcard with an ephemeral port when unset.
    pub bind_addr: Option<SocketAddr>,
    /// Send-queue capacity in messages.
    pub max_queue_size: usize,
    /// Upper bound on transmitted batches per second, enforced by the worker.
    pub max_send_rate: Option<f64>,
    /// On a full queue: `true` drops the message (non-blocking `sendto`),
    /// `false` blocks the caller until space frees up.
    pub drop_if_full: bool,
    /// Retries per fragment on transient OS send errors.
    pub send_retry: u32,
    /// Capacity of the processed-batch window.
    pub processed_maxlen: usize,
    /// Reassembly expiry for incomplete batches.
    pub batch_timeout: Duration,
    /// Requested kernel receive buffer size.
    pub recv_buffer_size: usize,
    /// Requested kernel send buffer size.
    pub send_buffer_size: usize,
    /// Observer callbacks.
    pub hooks: EventHooks,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            bind_addr: None,
            max_queue_size: 200,
            max_send_rate: None,
            drop_if_full: false,
            send_retry: 0,
            processed_maxlen: 10_000,
            batch_timeout: Duration::from_secs(10),
            recv_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            hooks: EventHooks::default(),
        }
    }
}

// ─── Shared Worker State ─────────────────────────────────────────────────────

struct Shared {
    socket: UdpSocket,
    stats: SocketStats,
    /// Finish draining, then exit (graceful close).
    stop: AtomicBool,
    /// Exit at the next opportunity, discarding queued entries.
    abandon: AtomicBool,
    /// Rejects caller operations after close.
    closed: AtomicBool,
    batch_ids: BatchIdGen,
    client_id: u32,
    send_retry: u32,
    max_send_rate: Option<f64>,
    hooks: EventHooks,
}

// ─── MosaicSocket ────────────────────────────────────────────────────────────

/// A UDP socket delivering erasure-coded message batches.
pub struct MosaicSocket {
    shared: Arc<Shared>,
    queue: Sender<QueueEntry>,
    reassembler: Mutex<Reassembler>,
    worker: Mutex<Option<JoinHandle<()>>>,
    drop_if_full: bool,
}

impl MosaicSocket {
    /// Open a socket with the given configuration.
    pub fn open(config: SocketConfig) -> io::Result<MosaicSocket> {
        let bind_addr = config
            .bind_addr
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));

        let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))?;
        request_buffer_sizes(&socket, config.recv_buffer_size, config.send_buffer_size);
        socket.bind(&bind_addr.into())?;
        let socket: UdpSocket = socket.into();

        let client_id: u32 = rand::rng().random();
        let (queue, worker_rx) = bounded(config.max_queue_size);

        let shared = Arc::new(Shared {
            socket,
            stats: SocketStats::new(),
            stop: AtomicBool::new(false),
            abandon: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            batch_ids: BatchIdGen::new(),
            client_id,
            send_retry: config.send_retry,
            max_send_rate: config.max_send_rate,
            hooks: config.hooks,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("mosaic-send".into())
            .spawn(move || send_worker(worker_shared, worker_rx))?;

        debug!(client_id, "mosaic socket open");
        Ok(MosaicSocket {
            shared,
            queue,
            reassembler: Mutex::new(Reassembler::new(
                config.batch_timeout,
                config.processed_maxlen,
            )),
            worker: Mutex::new(Some(worker)),
            drop_if_full: config.drop_if_full,
        })
    }

    /// Open a receiver-side socket bound to `addr` with default options.
    pub fn bind(addr: SocketAddr) -> io::Result<MosaicSocket> {
        Self::open(SocketConfig {
            bind_addr: Some(addr),
            ..SocketConfig::default()
        })
    }

    /// Queue a message for asynchronous, best-effort delivery to `addr`.
    ///
    /// Non-blocking when `drop_if_full` is set (a full queue drops the
    /// message, counts it, and invokes `on_queue_full`); otherwise the call
    /// blocks until queue space is available.
    pub fn sendto(&self, data: &[u8], addr: SocketAddr, opts: SendOptions) -> Result<(), SendError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        if data.len() > MAX_MESSAGE_LEN {
            return Err(SendError::MessageTooLarge(data.len()));
        }

        let (k, n) = codec::plan_params(data.len(), &opts);
        let entry = QueueEntry {
            data: Bytes::copy_from_slice(data),
            addr,
            k,
            n,
            enqueued_at: Instant::now(),
        };

        if self.drop_if_full {
            match self.queue.try_send(entry) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(entry)) => {
                    SocketStats::incr(&self.shared.stats.queue_full);
                    SocketStats::incr(&self.shared.stats.send_drop);
                    if let Some(hook) = &self.shared.hooks.on_queue_full {
                        hook(&entry.data, entry.addr);
                    } else {
                        warn!(%addr, "send queue full, message dropped");
                    }
                    debug!(
                        dropped = self.shared.stats.send_drop.load(Ordering::Relaxed),
                        "queue full"
                    );
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(SendError::Closed),
            }
        } else {
            self.queue.send(entry).map_err(|_| SendError::Closed)
        }
    }

    /// Block until one complete message is reconstructed, returning it with
    /// the source address of the fragment that completed it.
    ///
    /// `timeout` bounds each underlying socket read; an expired timeout
    /// surfaces [`RecvError::Timeout`] and leaves reassembly state intact
    /// for the next call.
    pub fn recvfrom(&self, timeout: Option<Duration>) -> Result<(Bytes, SocketAddr), RecvError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(RecvError::Closed);
        }
        // Single-threaded cooperative receive: this caller owns the
        // reassembly table for the duration of the call.
        let mut reassembler = self.reassembler.lock().unwrap_or_else(|e| e.into_inner());
        self.shared.socket.set_read_timeout(timeout)?;

        let mut buf = vec![0u8; MAX_MESSAGE_LEN];
        loop {
            reassembler.sweep_expired(Instant::now());

            let (len, src) = match self.shared.socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(RecvError::Timeout);
                }
                Err(e) => {
                    if self.shared.closed.load(Ordering::SeqCst) {
                        return Err(RecvError::Closed);
                    }
                    return Err(RecvError::Io(e));
                }
            };

            match reassembler.ingest(&buf[..len], Instant::now()) {
                IngestOutcome::Delivered(message) => {
                    SocketStats::incr(&self.shared.stats.recv_batch);
                    return Ok((message, src));
                }
                IngestOutcome::DecodeFailed { key, error } => {
                    SocketStats::incr(&self.shared.stats.decode_fail);
                    if let Some(hook) = &self.shared.hooks.on_decode_error {
                        hook(&error, key);
                    } else {
                        error!(?key, %error, "batch decode failed");
                    }
                }
                IngestOutcome::Invalid(error) => {
                    debug!(%error, %src, "dropped undecodable datagram");
                }
                IngestOutcome::Mismatch => {
                    debug!(%src, "dropped inconsistent fragment");
                }
                IngestOutcome::Buffered | IngestOutcome::Duplicate => {}
            }
        }
    }

    /// Close the socket.
    ///
    /// With `wait_queue` the calling thread joins the worker until the queue
    /// has drained (bounded by `timeout` when given); otherwise queued
    /// entries are abandoned. Subsequent `sendto`/`recvfrom` calls fail with
    /// `Closed`. Idempotent.
    pub fn close(&self, wait_queue: bool, timeout: Option<Duration>) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.stop.store(true, Ordering::SeqCst);
        if !wait_queue {
            self.shared.abandon.store(true, Ordering::SeqCst);
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if wait_queue {
                match timeout {
                    None => {
                        let _ = handle.join();
                    }
                    Some(limit) => {
                        let start = Instant::now();
                        while !handle.is_finished() && start.elapsed() < limit {
                            thread::sleep(Duration::from_millis(10));
                        }
                        if handle.is_finished() {
                            let _ = handle.join();
                        }
                    }
                }
            }
        }

        let stats = self.shared.stats.snapshot();
        info!(
            send_batch = stats.send_batch,
            recv_batch = stats.recv_batch,
            send_drop = stats.send_drop,
            send_fail = stats.send_fail,
            queue_full = stats.queue_full,
            decode_fail = stats.decode_fail,
            avg_send_delay = stats.avg_send_delay,
            "mosaic socket closed"
        );
    }

    /// Point-in-time statistics counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// This sender's random 32-bit client identifier.
    pub fn client_id(&self) -> u32 {
        self.shared.client_id
    }
}

impl Drop for MosaicSocket {
    fn drop(&mut self) {
        self.close(false, None);
    }
}

impl fmt::Debug for MosaicSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MosaicSocket")
            .field("client_id", &self.shared.client_id)
            .field("local_addr", &self.shared.socket.local_addr().ok())
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

// ─── Socket Setup ────────────────────────────────────────────────────────────

/// Best-effort kernel buffer sizing; warn when the kernel grants less than
/// half of the request (sysctl `net.core.{r,w}mem_max` caps apply).
fn request_buffer_sizes(socket: &Socket, recv: usize, send: usize) {
    socket.set_recv_buffer_size(recv).ok();
    if let Ok(actual) = socket.recv_buffer_size() {
        if actual < recv / 2 {
            warn!(
                "recv buffer is {}KB (wanted {}KB); raise net.core.rmem_max",
                actual / 1024,
                recv / 1024
            );
        }
    }
    socket.set_send_buffer_size(send).ok();
    if let Ok(actual) = socket.send_buffer_size() {
        if actual < send / 2 {
            warn!(
                "send buffer is {}KB (wanted {}KB); raise net.core.wmem_max",
                actual / 1024,
                send / 1024
            );
        }
    }
}

// ─── Send Worker ─────────────────────────────────────────────────────────────

/// Background loop draining the bounded queue: encode, frame, transmit,
/// pace. Exits once a stop is requested and the queue has drained, or
/// immediately on abandon.
fn send_worker(shared: Arc<Shared>, queue: Receiver<QueueEntry>) {
    let mut last_send: Option<Instant> = None;

    loop {
        if shared.abandon.load(Ordering::SeqCst) {
            break;
        }
        match queue.recv_timeout(POLL_INTERVAL) {
            Ok(entry) => {
                if shared.abandon.load(Ordering::SeqCst) {
                    break;
                }
                process_entry(&shared, entry, &mut last_send);
            }
            Err(RecvTimeoutError::Timeout) => {
                if shared.stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(client_id = shared.client_id, "send worker exiting");
}

/// Encode one queued message as a batch and transmit its fragments in order.
fn process_entry(shared: &Shared, entry: QueueEntry, last_send: &mut Option<Instant>) {
    let batch_id = shared.batch_ids.next();

    let batch = match codec::encode_message(&entry.data, entry.k, entry.n) {
        Ok(batch) => batch,
        Err(error) => {
            SocketStats::incr(&shared.stats.send_fail);
            SocketStats::incr(&shared.stats.send_drop);
            error!(batch_id, %error, "batch encoding failed");
            return;
        }
    };

    let mut failed = false;
    for datagram in frame_batch(shared.client_id, batch_id, &batch) {
        if !send_fragment(shared, &datagram, entry.addr, &entry.data) {
            // Partial batches waste bandwidth and harm nothing; the
            // receiver expires whatever already arrived.
            failed = true;
            break;
        }
    }

    if failed {
        SocketStats::incr(&shared.stats.send_drop);
        debug!(batch_id, "batch abandoned after terminal send failure");
    } else {
        SocketStats::incr(&shared.stats.send_batch);
        let delay = Instant::now().duration_since(entry.enqueued_at);
        shared.stats.add_send_delay_us(delay.as_micros() as u64);
        debug!(
            batch_id,
            k = entry.k,
            n = entry.n,
            delay_us = delay.as_micros() as u64,
            "batch sent"
        );
    }

    // Leaky-bucket pacing: space batch starts by 1/rate, crediting the time
    // already spent encoding and sending.
    if let Some(rate) = shared.max_send_rate {
        if rate > 0.0 {
            let interval = Duration::from_secs_f64(1.0 / rate);
            if let Some(last) = *last_send {
                let since = Instant::now().duration_since(last);
                if since < interval {
                    thread::sleep(interval - since);
                }
            }
            *last_send = Some(Instant::now());
        }
    }
}

/// Transmit one fragment, retrying transient OS errors up to the configured
/// budget. Returns `false` on terminal failure.
fn send_fragment(shared: &Shared, datagram: &[u8], addr: SocketAddr, message: &[u8]) -> bool {
    let mut attempts = 0u32;
    loop {
        match shared.socket.send_to(datagram, addr) {
            Ok(_) => return true,
            Err(error) => {
                if is_transient(&error) && attempts < shared.send_retry {
                    attempts += 1;
                    thread::sleep(RETRY_PAUSE);
                    continue;
                }
                SocketStats::incr(&shared.stats.send_fail);
                if let Some(hook) = &shared.hooks.on_send_error {
                    hook(&error, message, addr);
                } else {
                    error!(%error, %addr, "fragment send failed");
                }
                return false;
            }
        }
    }
}

/// Transient send errors worth retrying: `EAGAIN`/`EWOULDBLOCK`, `EINTR`,
/// and `ENOBUFS` (socket buffer momentarily full).
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || error.raw_os_error() == Some(libc::ENOBUFS)
}
