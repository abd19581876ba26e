// ============================================
// File: crates/snap2p-peer/src/stream.rs
// ============================================
//! # Multiplexed Duplex Streams
//!
//! ## Creation Reason
//! Implements the per-stream duplex contract: ordered chunked writes,
//! a bounded read buffer with await-based backpressure, and one FIN
//! per direction.
//!
//! ## Main Functionality
//! - `Stream`: consumer handle (write / end / read / destroy)
//! - `StreamShared`: state shared with the multiplexer
//! - `ReadBuffer`: bounded buffer, producers and consumers both await
//!
//! ## Duplex Contract
//! ```text
//! write(bytes)  → STREAM_DATA chunks (≤ 16 KiB each, fin=false)
//! end()         → one empty STREAM_DATA with fin=true
//! read()        → payload chunks in arrival order, None after FIN
//! destroy(err)  → both sides closed, CLOSE_STREAM emitted
//! ```
//!
//! ## Backpressure
//! The read buffer has a high-water mark (64 KiB default). When full,
//! the producer (the session read task) awaits buffer space instead of
//! dropping bytes; the consumer's `read` awaits data instead of
//! polling. No byte is ever discarded while the stream is open.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Streams hold an id + a weak handle into the multiplexer map, not
//!   a multiplexer reference: ownership stays strictly hierarchical
//! - Create the `Notify` future BEFORE re-checking state, or wakeups
//!   can be lost
//!
//! ## Last Modified
//! v0.1.0 - Initial stream implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use snap2p_core::protocol::{CloseStream, ErrorCode, Message, StreamData};

use crate::error::{PeerError, Result};
use crate::session::SessionShared;

// ============================================
// Constants
// ============================================

/// Maximum payload per STREAM_DATA frame produced by `write`.
pub const STREAM_CHUNK_SIZE: usize = 16 * 1024;

/// Shared stream table owned by the multiplexer.
pub(crate) type StreamRegistry = Arc<Mutex<HashMap<u64, Arc<StreamShared>>>>;

// ============================================
// ReadBuffer
// ============================================

struct ReadState {
    buf: BytesMut,
    eof: bool,
    error: Option<ErrorCode>,
}

/// Bounded read-side buffer with awaiting producer and consumer.
struct ReadBuffer {
    inner: Mutex<ReadState>,
    readable: Notify,
    writable: Notify,
    high_water: usize,
}

impl ReadBuffer {
    fn new(high_water: usize) -> Self {
        Self {
            inner: Mutex::new(ReadState {
                buf: BytesMut::new(),
                eof: false,
                error: None,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            high_water,
        }
    }

    /// Appends data, awaiting space below the high-water mark.
    /// Data for an already-terminated stream is discarded.
    async fn push(&self, data: &[u8]) {
        loop {
            let notified = self.writable.notified();
            {
                let mut state = self.inner.lock();
                if state.eof || state.error.is_some() {
                    return;
                }
                if state.buf.len() < self.high_water {
                    state.buf.extend_from_slice(data);
                    self.readable.notify_waiters();
                    return;
                }
            }
            notified.await;
        }
    }

    /// Marks end-of-stream (remote FIN).
    fn finish(&self) {
        self.inner.lock().eof = true;
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Marks the stream failed; readers observe the error after
    /// draining buffered bytes.
    fn fail(&self, code: ErrorCode) {
        let mut state = self.inner.lock();
        if state.error.is_none() {
            state.error = Some(code);
        }
        drop(state);
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Awaits the next chunk; `None` after FIN, error after failure.
    async fn read(&self, stream_id: u64) -> Result<Option<Bytes>> {
        loop {
            let notified = self.readable.notified();
            {
                let mut state = self.inner.lock();
                if !state.buf.is_empty() {
                    let out = state.buf.split().freeze();
                    self.writable.notify_waiters();
                    return Ok(Some(out));
                }
                if let Some(code) = state.error {
                    return Err(PeerError::StreamError { stream_id, code });
                }
                if state.eof {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }
}

// ============================================
// StreamShared
// ============================================

/// State shared between a `Stream` handle and the multiplexer.
pub(crate) struct StreamShared {
    id: u64,
    label: Option<String>,
    session: Arc<SessionShared>,
    registry: Weak<Mutex<HashMap<u64, Arc<StreamShared>>>>,
    read: ReadBuffer,
    write_closed: AtomicBool,
    fully_closed: AtomicBool,
}

impl StreamShared {
    pub(crate) fn new(
        id: u64,
        label: Option<String>,
        session: Arc<SessionShared>,
        registry: &StreamRegistry,
        high_water: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            label,
            session,
            registry: Arc::downgrade(registry),
            read: ReadBuffer::new(high_water),
            write_closed: AtomicBool::new(false),
            fully_closed: AtomicBool::new(false),
        })
    }

    /// Inbound DATA from the session read task.
    pub(crate) async fn push_data(&self, data: &Bytes, fin: bool) {
        if !data.is_empty() {
            self.read.push(data).await;
        }
        if fin {
            self.read.finish();
        }
    }

    /// Remote CLOSE_STREAM: the id is released by the caller.
    pub(crate) fn remote_close(&self, code: Option<ErrorCode>) {
        self.fully_closed.store(true, Ordering::SeqCst);
        self.write_closed.store(true, Ordering::SeqCst);
        match code {
            Some(code) => self.read.fail(code),
            None => self.read.finish(),
        }
    }

    /// Owning session closed: EOF if the FIN already arrived, error
    /// otherwise.
    pub(crate) fn session_closed(&self, code: Option<ErrorCode>) {
        self.fully_closed.store(true, Ordering::SeqCst);
        self.write_closed.store(true, Ordering::SeqCst);
        let fin_seen = {
            let state = self.read.inner.lock();
            state.eof || state.error.is_some()
        };
        if fin_seen {
            self.read.finish();
        } else {
            self.read.fail(code.unwrap_or(ErrorCode::ConnectionClosed));
        }
    }

    fn release_id(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.id);
        }
    }
}

// ============================================
// Stream
// ============================================

/// One bidirectional byte channel inside a session.
///
/// Cloneable handle: clones share the same underlying stream, so a
/// reader task and a writer task can each own one.
#[derive(Clone)]
pub struct Stream {
    shared: Arc<StreamShared>,
}

impl Stream {
    pub(crate) fn from_shared(shared: Arc<StreamShared>) -> Self {
        Self { shared }
    }

    /// Stream id (parity matches the opener's role).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Opaque debugging label from OPEN_STREAM.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.shared.label.as_deref()
    }

    /// Returns `true` once both directions are closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.fully_closed.load(Ordering::SeqCst)
    }

    /// Writes bytes to the stream, chunked into STREAM_DATA frames.
    ///
    /// # Errors
    /// - `StreamClosed` after `end`/`destroy`/remote close
    /// - `ConnectionClosed` when the session is gone
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let shared = &self.shared;
        if shared.write_closed.load(Ordering::SeqCst) || shared.fully_closed.load(Ordering::SeqCst)
        {
            return Err(PeerError::StreamClosed(shared.id));
        }
        if shared.session.is_closed() {
            return Err(PeerError::ConnectionClosed);
        }
        for chunk in data.chunks(STREAM_CHUNK_SIZE) {
            shared
                .session
                .send(&Message::StreamData(StreamData {
                    stream_id: shared.id,
                    data: Bytes::copy_from_slice(chunk),
                    fin: false,
                }))
                .await?;
        }
        Ok(())
    }

    /// Closes the write side, sending exactly one FIN.
    ///
    /// # Errors
    /// Propagates transport failures from the FIN frame.
    pub async fn end(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.write_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        shared
            .session
            .send(&Message::StreamData(StreamData {
                stream_id: shared.id,
                data: Bytes::new(),
                fin: true,
            }))
            .await
    }

    /// Awaits the next inbound chunk; `None` means EOF.
    ///
    /// # Errors
    /// `StreamError` when the remote closed with an error code or the
    /// session died before a FIN arrived.
    pub async fn read(&self) -> Result<Option<Bytes>> {
        self.shared.read.read(self.shared.id).await
    }

    /// Reads until EOF, concatenating all chunks.
    ///
    /// # Errors
    /// Same as [`Stream::read`].
    pub async fn read_to_end(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Forces both sides closed and releases the id.
    ///
    /// Emits CLOSE_STREAM carrying `INTERNAL` when `errored`, or no
    /// code for an orderly teardown.
    pub async fn destroy(&self, errored: bool) {
        let shared = &self.shared;
        if shared.fully_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.write_closed.store(true, Ordering::SeqCst);
        let code = errored.then_some(ErrorCode::Internal);
        match code {
            Some(code) => shared.read.fail(code),
            None => shared.read.finish(),
        }
        shared.release_id();

        debug!(stream_id = shared.id, errored, "stream destroyed");
        let _ = shared
            .session
            .send(&Message::CloseStream(CloseStream {
                stream_id: shared.id,
                error_code: code,
            }))
            .await;
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.shared.id)
            .field("label", &self.shared.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}
