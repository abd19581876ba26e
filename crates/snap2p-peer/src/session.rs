// ============================================
// File: crates/snap2p-peer/src/session.rs
// ============================================
//! # Session
//!
//! ## Creation Reason
//! Wraps an established connection: encrypted framed transport over
//! the socket, keepalive, dispatch to the multiplexer, and idempotent
//! close semantics.
//!
//! ## Main Functionality
//! - `Session`: consumer handle over the shared state
//! - `SessionShared`: write path, close state, stats
//! - read task: frame → decrypt → decode → dispatch
//! - keepalive task: PING/PONG with ack deadline and RTT tracking
//!
//! ## Task Layout
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Session                               │
//! │  ┌───────────────┐   ┌──────────────────┐                    │
//! │  │  Read Task    │   │  Keepalive Task  │                    │
//! │  │  socket →     │   │  PING every 30s  │                    │
//! │  │  FrameBuffer →│   │  PONG within 10s │                    │
//! │  │  recv cipher →│   │  else close      │                    │
//! │  │  dispatch     │   └──────────────────┘                    │
//! │  └──────┬────────┘                                           │
//! │         ▼                                                    │
//! │  PING→PONG reply · PONG→ack · stream msgs→mux · rest→events  │
//! │                                                              │
//! │  Writers: any task → async Mutex(write half + send cipher)   │
//! │  so AEAD nonces increase strictly monotonically.             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Close Semantics
//! Close is idempotent: the first closer records the reason, wakes
//! every waiter, emits exactly one `Closed` event and fails open
//! streams; later sends are silent no-ops. AEAD failures close
//! without sending anything.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Incoming PINGs are answered even when local keepalive is off
//! - Nonce exhaustion must tear the session down, never wrap
//!
//! ## Last Modified
//! v0.1.0 - Initial session implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time;
use tracing::{debug, info, warn};

use snap2p_common::time::{ActivityClock, Timestamp};
use snap2p_common::types::{Principal, SessionId, Visibility};
use snap2p_core::error::CoreError;
use snap2p_core::crypto::transport::TransportCipher;
use snap2p_core::identity::NodeKeyAttestation;
use snap2p_core::protocol::{
    decode_message, encode_message, frame, ErrorCode, FrameBuffer, Hello, Message, Pong,
};

use crate::error::{PeerError, Result};
use crate::handshake::Established;
use crate::mux::Multiplexer;
use crate::stream::Stream;

// ============================================
// Events & Stats
// ============================================

/// Frame-level events delivered to the session consumer, in order.
#[derive(Debug)]
pub enum SessionEvent {
    /// A control message outside the stream/keepalive set.
    Message(Message),
    /// The peer sent an ERROR notification.
    PeerError {
        /// Error classification from the peer.
        code: ErrorCode,
        /// Optional reason string from the peer.
        reason: Option<String>,
    },
    /// The session closed (emitted exactly once).
    Closed {
        /// Local error cause; `None` for an orderly close.
        code: Option<ErrorCode>,
    },
}

/// Monotonic per-session transfer counters.
#[derive(Debug, Default)]
pub struct SessionStats {
    bytes_tx: AtomicU64,
    bytes_rx: AtomicU64,
    frames_tx: AtomicU64,
    frames_rx: AtomicU64,
}

impl SessionStats {
    fn record_tx(&self, bytes: u64) {
        self.bytes_tx.fetch_add(bytes, Ordering::Relaxed);
        self.frames_tx.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rx(&self, bytes: u64) {
        self.bytes_rx.fetch_add(bytes, Ordering::Relaxed);
        self.frames_rx.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_tx: self.bytes_tx.load(Ordering::Relaxed),
            bytes_rx: self.bytes_rx.load(Ordering::Relaxed),
            frames_tx: self.frames_tx.load(Ordering::Relaxed),
            frames_rx: self.frames_rx.load(Ordering::Relaxed),
        }
    }
}

/// Copyable view of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total bytes written to the socket.
    pub bytes_tx: u64,
    /// Total bytes received in frames.
    pub bytes_rx: u64,
    /// Frames sent.
    pub frames_tx: u64,
    /// Frames received.
    pub frames_rx: u64,
}

// ============================================
// SessionShared
// ============================================

struct WriteState {
    half: OwnedWriteHalf,
    cipher: TransportCipher,
}

/// State shared by the session handle, its tasks, the multiplexer and
/// every stream.
pub(crate) struct SessionShared {
    local_principal: Principal,
    remote_principal: Principal,
    remote_attestation: NodeKeyAttestation,
    remote_hello: Hello,
    session_id: SessionId,
    handshake_hash: [u8; 32],
    remote_addr: SocketAddr,
    writer: tokio::sync::Mutex<WriteState>,
    closed: AtomicBool,
    close_code: parking_lot::Mutex<Option<ErrorCode>>,
    close_notify: Notify,
    events: mpsc::UnboundedSender<SessionEvent>,
    pong_tx: mpsc::UnboundedSender<u64>,
    stats: SessionStats,
    last_activity: ActivityClock,
    rtt_micros: AtomicU64,
}

impl SessionShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Encodes, encrypts, frames and writes one message.
    ///
    /// Sends on a closed session are silent no-ops. Transport failures
    /// close the session and propagate.
    pub(crate) async fn send(&self, msg: &Message) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let encoded = encode_message(msg);

        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Ok(());
        }
        let sealed = match writer.cipher.seal(&encoded) {
            Ok(sealed) => sealed,
            Err(e @ CoreError::NonceExhausted) => {
                drop(writer);
                warn!(session_id = %self.session_id, "send nonce exhausted, closing session");
                self.close(Some(ErrorCode::ConnectionClosed));
                return Err(e.into());
            }
            Err(e) => {
                drop(writer);
                self.close(Some(ErrorCode::Internal));
                return Err(e.into());
            }
        };
        let framed = frame(&sealed)?;
        if let Err(e) = writer.half.write_all(&framed).await {
            drop(writer);
            self.close(Some(ErrorCode::ConnectionClosed));
            return Err(PeerError::io("session write", e));
        }
        self.stats.record_tx(framed.len() as u64);
        Ok(())
    }

    /// Idempotent close: records the reason, wakes waiters, emits the
    /// `Closed` event exactly once.
    pub(crate) fn close(&self, code: Option<ErrorCode>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.close_code.lock() = code;
        self.close_notify.notify_waiters();
        let _ = self.events.send(SessionEvent::Closed { code });
        info!(
            session_id = %self.session_id,
            peer = %self.remote_principal,
            code = ?code,
            "session closed"
        );
    }

    /// Resolves once the session is closed.
    pub(crate) async fn wait_closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    fn record_rtt(&self, rtt: Duration) {
        self.rtt_micros
            .store(rtt.as_micros() as u64, Ordering::Relaxed);
    }
}

// ============================================
// Session
// ============================================

/// Consumer handle over an established session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// The authenticated remote principal.
    #[must_use]
    pub fn remote_principal(&self) -> &Principal {
        &self.shared.remote_principal
    }

    /// The local principal.
    #[must_use]
    pub fn local_principal(&self) -> &Principal {
        &self.shared.local_principal
    }

    /// The remote's verified attestation.
    #[must_use]
    pub fn remote_attestation(&self) -> &NodeKeyAttestation {
        &self.shared.remote_attestation
    }

    /// Session identifier agreed during the handshake.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.shared.session_id
    }

    /// Noise transcript hash, for channel binding by upper layers.
    #[must_use]
    pub fn handshake_hash(&self) -> &[u8; 32] {
        &self.shared.handshake_hash
    }

    /// Remote socket address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    /// Visibility the remote advertised in HELLO.
    #[must_use]
    pub fn remote_visibility(&self) -> Visibility {
        self.shared.remote_hello.visibility
    }

    /// Capability strings the remote advertised in HELLO.
    #[must_use]
    pub fn remote_capabilities(&self) -> &[String] {
        &self.shared.remote_hello.capabilities
    }

    /// Transfer counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Most recent keepalive round-trip time, when measured.
    #[must_use]
    pub fn last_rtt(&self) -> Option<Duration> {
        match self.shared.rtt_micros.load(Ordering::Relaxed) {
            0 => None,
            micros => Some(Duration::from_micros(micros)),
        }
    }

    /// Time since the last received frame.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.shared.last_activity.idle()
    }

    /// Returns `true` once the session is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Closes the session (idempotent, orderly).
    pub fn close(&self) {
        self.shared.close(None);
    }

    /// Resolves once the session is closed.
    pub async fn wait_closed(&self) {
        self.shared.wait_closed().await;
    }

    /// Sends an ERROR notification; callers tear down afterwards.
    ///
    /// # Errors
    /// Propagates transport failures.
    pub async fn send_error(&self, code: ErrorCode, reason: Option<String>) -> Result<()> {
        self.shared
            .send(&Message::Error(snap2p_core::protocol::ErrorMessage {
                error_code: code,
                reason,
            }))
            .await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.shared.session_id)
            .field("remote_principal", &self.shared.remote_principal)
            .field("remote_addr", &self.shared.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================
// Setup
// ============================================

/// Everything needed to promote a handshake outcome into a session.
pub(crate) struct SessionSetup {
    pub socket: TcpStream,
    pub established: Established,
    pub initiator: bool,
    pub remote_addr: SocketAddr,
    pub local_principal: Principal,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub max_streams: usize,
    pub stream_high_water: usize,
}

/// Builds the session, wires the multiplexer, and spawns the read and
/// keepalive tasks.
pub(crate) fn spawn(
    setup: SessionSetup,
) -> (
    Session,
    Arc<Multiplexer>,
    mpsc::UnboundedReceiver<SessionEvent>,
    mpsc::UnboundedReceiver<Stream>,
) {
    let SessionSetup {
        socket,
        established,
        initiator,
        remote_addr,
        local_principal,
        keepalive_interval,
        keepalive_timeout,
        max_streams,
        stream_high_water,
    } = setup;

    let (read_half, write_half) = socket.into_split();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let (pong_tx, pong_rx) = mpsc::unbounded_channel();

    let shared = Arc::new(SessionShared {
        local_principal,
        remote_principal: established.remote_principal,
        remote_attestation: established.remote_attestation,
        remote_hello: established.remote_hello,
        session_id: established.session_id,
        handshake_hash: established.transport.handshake_hash,
        remote_addr,
        writer: tokio::sync::Mutex::new(WriteState {
            half: write_half,
            cipher: established.transport.send,
        }),
        closed: AtomicBool::new(false),
        close_code: parking_lot::Mutex::new(None),
        close_notify: Notify::new(),
        events: events_tx,
        pong_tx,
        stats: SessionStats::default(),
        last_activity: ActivityClock::new(),
        rtt_micros: AtomicU64::new(0),
    });

    let mux = Arc::new(Multiplexer::new(
        Arc::clone(&shared),
        initiator,
        max_streams,
        stream_high_water,
        incoming_tx,
    ));

    tokio::spawn(read_task(
        Arc::clone(&shared),
        Arc::clone(&mux),
        read_half,
        established.transport.recv,
        established.framing,
    ));

    if !keepalive_interval.is_zero() {
        tokio::spawn(keepalive_task(
            Arc::clone(&shared),
            keepalive_interval,
            keepalive_timeout,
            pong_rx,
        ));
    }

    (Session { shared }, mux, events_rx, incoming_rx)
}

// ============================================
// Read Task
// ============================================

async fn read_task(
    shared: Arc<SessionShared>,
    mux: Arc<Multiplexer>,
    mut read_half: OwnedReadHalf,
    mut cipher: TransportCipher,
    mut framing: FrameBuffer,
) {
    let mut buf = [0u8; 16 * 1024];

    let close_code: Option<ErrorCode> = 'outer: loop {
        // Drain complete frames before touching the socket again.
        loop {
            match framing.try_frame() {
                Ok(Some(sealed)) => {
                    let plain = match cipher.open(&sealed) {
                        Ok(plain) => plain,
                        Err(_) => {
                            // AEAD failure is fatal and silent.
                            debug!(session_id = %shared.session_id, "record decryption failed");
                            break 'outer None;
                        }
                    };
                    shared.stats.record_rx(plain.len() as u64);
                    shared.last_activity.mark();

                    let msg = match decode_message(&plain) {
                        Ok(msg) => msg,
                        Err(CoreError::UnsupportedTag(tag)) => {
                            warn!(session_id = %shared.session_id, tag, "unknown message tag");
                            let _ = shared.events.send(SessionEvent::PeerError {
                                code: ErrorCode::VersionUnsupported,
                                reason: Some(format!("unknown tag 0x{tag:02x}")),
                            });
                            break 'outer Some(ErrorCode::VersionUnsupported);
                        }
                        Err(e) => {
                            debug!(session_id = %shared.session_id, error = %e, "undecodable frame");
                            break 'outer Some(ErrorCode::InvalidMessage);
                        }
                    };

                    if let Err(e) = dispatch(&shared, &mux, msg).await {
                        break 'outer Some(e.kind());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(session_id = %shared.session_id, error = %e, "framing error");
                    break 'outer Some(ErrorCode::MessageTooLarge);
                }
            }
        }

        tokio::select! {
            _ = shared.wait_closed() => break None,
            result = read_half.read(&mut buf) => match result {
                Ok(0) => break None,
                Ok(n) => framing.extend(&buf[..n]),
                Err(e) => {
                    debug!(session_id = %shared.session_id, error = %e, "socket read error");
                    break Some(ErrorCode::ConnectionClosed);
                }
            }
        }
    };

    shared.close(close_code);
    mux.close_all(close_code);

    // Destroy the socket: the write half lives in the shared state.
    let mut writer = shared.writer.lock().await;
    let _ = writer.half.shutdown().await;
}

async fn dispatch(
    shared: &Arc<SessionShared>,
    mux: &Arc<Multiplexer>,
    msg: Message,
) -> Result<()> {
    match msg {
        // Always answered, whether or not local keepalive is enabled.
        Message::Ping(ping) => {
            shared
                .send(&Message::Pong(Pong {
                    sequence: ping.sequence,
                    timestamp: Timestamp::now().as_secs(),
                }))
                .await
        }
        Message::Pong(pong) => {
            let _ = shared.pong_tx.send(pong.sequence);
            Ok(())
        }
        Message::OpenStream(open) => mux.handle_open(open).await,
        Message::StreamData(data) => mux.handle_data(data).await,
        Message::CloseStream(close) => {
            mux.handle_close(&close);
            Ok(())
        }
        Message::Error(err) => {
            let _ = shared.events.send(SessionEvent::PeerError {
                code: err.error_code,
                reason: err.reason,
            });
            Ok(())
        }
        other => {
            let _ = shared.events.send(SessionEvent::Message(other));
            Ok(())
        }
    }
}

// ============================================
// Keepalive Task
// ============================================

async fn keepalive_task(
    shared: Arc<SessionShared>,
    interval: Duration,
    timeout: Duration,
    mut pong_rx: mpsc::UnboundedReceiver<u64>,
) {
    let mut sequence: u64 = 0;
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so pings start one
    // interval after establishment.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shared.wait_closed() => return,
            _ = ticker.tick() => {}
        }

        sequence += 1;
        let sent_at = Instant::now();
        if shared
            .send(&Message::Ping(snap2p_core::protocol::Ping {
                sequence,
                timestamp: Timestamp::now().as_secs(),
            }))
            .await
            .is_err()
            || shared.is_closed()
        {
            return;
        }

        let deadline = time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = shared.wait_closed() => return,
                _ = &mut deadline => {
                    warn!(
                        session_id = %shared.session_id,
                        sequence,
                        "keepalive ack missed, closing session"
                    );
                    shared.close(Some(ErrorCode::Timeout));
                    return;
                }
                acked = pong_rx.recv() => match acked {
                    None => return,
                    Some(seq) if seq == sequence => {
                        shared.record_rtt(sent_at.elapsed());
                        break;
                    }
                    // Stale ack from an earlier probe.
                    Some(_) => {}
                }
            }
        }
    }
}
