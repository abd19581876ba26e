// ============================================
// File: crates/snap2p-peer/src/mux.rs
// ============================================
//! # Stream Multiplexer
//!
//! ## Creation Reason
//! Routes OPEN_STREAM / STREAM_DATA / CLOSE_STREAM between the session
//! and its streams, owns the id space, and enforces the per-session
//! stream cap.
//!
//! ## Main Functionality
//! - `open_stream`: allocate a parity-correct id and announce it
//! - `handle_open` / `handle_data` / `handle_close`: inbound routing
//! - `close_all`: cancellation when the owning session dies
//!
//! ## Id Allocation
//! The initiator opens even ids (0, 2, 4, …), the responder odd
//! (1, 3, …), so concurrent opens from both ends can never collide.
//!
//! ## Routing Errors
//! | Condition | Reply |
//! |-----------|-------|
//! | OPEN for a tracked id | CLOSE_STREAM(id, STREAM_ID_IN_USE) |
//! | OPEN past the cap | CLOSE_STREAM(id, RESOURCE_EXHAUSTED) |
//! | DATA for an unknown id | CLOSE_STREAM(id, STREAM_NOT_FOUND) |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Labels are opaque debugging strings; they MUST NOT influence
//!   routing or policy
//! - `handle_data` may await buffer space; that throttling is local
//!   and deliberate (no byte may be dropped)
//!
//! ## Last Modified
//! v0.1.0 - Initial multiplexer implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use snap2p_core::protocol::{CloseStream, ErrorCode, Message, OpenStream, StreamData};

use crate::error::{PeerError, Result};
use crate::session::SessionShared;
use crate::stream::{Stream, StreamRegistry, StreamShared};

// ============================================
// Multiplexer
// ============================================

/// One multiplexer per session; owns the id→stream map.
pub struct Multiplexer {
    session: Arc<SessionShared>,
    streams: StreamRegistry,
    next_id: AtomicU64,
    max_streams: usize,
    high_water: usize,
    incoming_tx: mpsc::UnboundedSender<Stream>,
}

impl Multiplexer {
    pub(crate) fn new(
        session: Arc<SessionShared>,
        initiator: bool,
        max_streams: usize,
        high_water: usize,
        incoming_tx: mpsc::UnboundedSender<Stream>,
    ) -> Self {
        Self {
            session,
            streams: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(u64::from(!initiator)),
            max_streams,
            high_water,
            incoming_tx,
        }
    }

    /// Number of currently tracked streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Opens an outbound stream with an optional label.
    ///
    /// # Errors
    /// - `ResourceExhausted` at the configured cap
    /// - `ConnectionClosed` when the session is gone
    pub async fn open_stream(&self, label: Option<String>) -> Result<Stream> {
        if self.session.is_closed() {
            return Err(PeerError::ConnectionClosed);
        }

        let (id, shared) = {
            let mut streams = self.streams.lock();
            if streams.len() >= self.max_streams {
                return Err(PeerError::ResourceExhausted {
                    limit: self.max_streams,
                });
            }
            let id = self.next_id.fetch_add(2, Ordering::SeqCst);
            let shared = StreamShared::new(
                id,
                label.clone(),
                Arc::clone(&self.session),
                &self.streams,
                self.high_water,
            );
            streams.insert(id, Arc::clone(&shared));
            (id, shared)
        };

        debug!(stream_id = id, label = ?label, "opening stream");
        self.session
            .send(&Message::OpenStream(OpenStream {
                stream_id: id,
                label,
            }))
            .await?;

        Ok(Stream::from_shared(shared))
    }

    // ========================================
    // Inbound Routing
    // ========================================

    async fn reject(&self, stream_id: u64, code: ErrorCode) -> Result<()> {
        self.session
            .send(&Message::CloseStream(CloseStream {
                stream_id,
                error_code: Some(code),
            }))
            .await
    }

    /// Inbound OPEN_STREAM.
    pub(crate) async fn handle_open(&self, open: OpenStream) -> Result<()> {
        enum Verdict {
            InUse,
            Exhausted,
            Accepted(Arc<StreamShared>),
        }

        let verdict = {
            let mut streams = self.streams.lock();
            if streams.contains_key(&open.stream_id) {
                Verdict::InUse
            } else if streams.len() >= self.max_streams {
                Verdict::Exhausted
            } else {
                let shared = StreamShared::new(
                    open.stream_id,
                    open.label.clone(),
                    Arc::clone(&self.session),
                    &self.streams,
                    self.high_water,
                );
                streams.insert(open.stream_id, Arc::clone(&shared));
                Verdict::Accepted(shared)
            }
        };

        match verdict {
            Verdict::InUse => {
                warn!(stream_id = open.stream_id, "duplicate OPEN_STREAM");
                self.reject(open.stream_id, ErrorCode::StreamIdInUse).await
            }
            Verdict::Exhausted => {
                warn!(stream_id = open.stream_id, "stream cap reached");
                self.reject(open.stream_id, ErrorCode::ResourceExhausted)
                    .await
            }
            Verdict::Accepted(shared) => {
                debug!(stream_id = open.stream_id, label = ?open.label, "inbound stream");
                let _ = self.incoming_tx.send(Stream::from_shared(shared));
                Ok(())
            }
        }
    }

    /// Inbound STREAM_DATA; may await buffer space (local throttling).
    pub(crate) async fn handle_data(&self, data: StreamData) -> Result<()> {
        let stream = self.streams.lock().get(&data.stream_id).cloned();
        match stream {
            None => {
                debug!(stream_id = data.stream_id, "data for unknown stream");
                self.reject(data.stream_id, ErrorCode::StreamNotFound).await
            }
            Some(shared) => {
                shared.push_data(&data.data, data.fin).await;
                Ok(())
            }
        }
    }

    /// Inbound CLOSE_STREAM; releases the id.
    pub(crate) fn handle_close(&self, close: &CloseStream) {
        let removed = self.streams.lock().remove(&close.stream_id);
        if let Some(shared) = removed {
            debug!(
                stream_id = close.stream_id,
                code = ?close.error_code,
                "stream closed by peer"
            );
            shared.remote_close(close.error_code);
        }
    }

    /// Session teardown: every stream observes EOF (if its FIN already
    /// arrived) or an error.
    pub(crate) fn close_all(&self, code: Option<ErrorCode>) {
        let drained: Vec<_> = {
            let mut streams = self.streams.lock();
            streams.drain().map(|(_, shared)| shared).collect()
        };
        for shared in drained {
            shared.session_closed(code);
        }
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("streams", &self.stream_count())
            .field("max_streams", &self.max_streams)
            .finish()
    }
}
