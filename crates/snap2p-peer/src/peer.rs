// ============================================
// File: crates/snap2p-peer/src/peer.rs
// ============================================
//! # Peer Facade
//!
//! ## Creation Reason
//! The consumer-facing entry point: owns one wallet, one node key,
//! one current attestation, an optional listener, and the registry of
//! active sessions.
//!
//! ## Main Functionality
//! - `Peer::new`: identity setup and attestation signing
//! - `listen` / `dial`: responder and initiator sides
//! - Invite-token API (STEALTH only)
//! - Session registry with automatic deregistration on close
//!
//! ## Peer Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Peer                               │
//! │                                                             │
//! │  wallet ── attestation ── node key                          │
//! │                                                             │
//! │  ┌────────────┐  ┌─────────────┐  ┌─────────────────────┐   │
//! │  │ Accept Loop│  │ Sweep Task  │  │ Session Registry    │   │
//! │  │ rate-limit │  │ tokens +    │  │ locator → Connection│   │
//! │  │ handshake  │  │ rate windows│  │ removed on close    │   │
//! │  └────────────┘  └─────────────┘  └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Socket Policy
//! Every accepted or dialed socket gets TCP keepalive enabled and
//! Nagle disabled before the handshake starts. Rate-limited sockets
//! are dropped silently (not a single response byte).
//!
//! ## ⚠️ Important Note for Next Developer
//! - STEALTH peers always own a token store (created here); the
//!   invite API errors on every other visibility
//! - All services are Arc-wrapped; tasks exit on the shutdown signal
//!
//! ## Last Modified
//! v0.1.0 - Initial peer facade

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::{debug, info, warn};

use snap2p_common::types::{Locator, Principal, TransportKind, Visibility};
use snap2p_core::crypto::NodeKeyPair;
use snap2p_core::identity::{NodeKeyAttestation, Wallet};

use crate::config::PeerConfig;
use crate::error::{PeerError, Result};
use crate::handshake::{self, HandshakeContext};
use crate::invite::{InviteTokenOptions, InviteTokenStore};
use crate::mux::Multiplexer;
use crate::ratelimit::RateLimiter;
use crate::session::{self, Session, SessionEvent, SessionSetup};
use crate::stream::Stream;

// ============================================
// Options & Events
// ============================================

/// Options for [`Peer::dial`].
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Invite token to present in a plaintext KNOCK before the
    /// handshake (required by STEALTH listeners).
    pub invite_token: Option<Vec<u8>>,
}

/// Events emitted by a peer.
#[derive(Debug)]
pub enum PeerEvent {
    /// A session was established (inbound or outbound).
    Connection(Arc<Connection>),
}

// ============================================
// Connection
// ============================================

/// An established session plus its multiplexer and event queues.
pub struct Connection {
    session: Session,
    mux: Arc<Multiplexer>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<SessionEvent>>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Stream>>,
}

impl Connection {
    /// The underlying session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The session's multiplexer.
    #[must_use]
    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    /// The authenticated remote principal.
    #[must_use]
    pub fn remote_principal(&self) -> &Principal {
        self.session.remote_principal()
    }

    /// Opens an outbound stream.
    ///
    /// # Errors
    /// See [`Multiplexer::open_stream`].
    pub async fn open_stream(&self, label: Option<&str>) -> Result<Stream> {
        self.mux.open_stream(label.map(str::to_owned)).await
    }

    /// Awaits the next inbound stream; `None` once the session closed.
    pub async fn accept_stream(&self) -> Option<Stream> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            stream = incoming.recv() => stream,
            _ = self.session.wait_closed() => {
                // Drain anything that raced with the close.
                incoming.try_recv().ok()
            }
        }
    }

    /// Awaits the next session event; `None` after the queue drained
    /// past the `Closed` event.
    pub async fn next_event(&self) -> Option<SessionEvent> {
        let mut events = self.events.lock().await;
        tokio::select! {
            event = events.recv() => event,
            _ = self.session.wait_closed() => events.try_recv().ok(),
        }
    }

    /// Closes the session.
    pub fn close(&self) {
        self.session.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session)
            .field("streams", &self.mux.stream_count())
            .finish()
    }
}

// ============================================
// Peer
// ============================================

struct PeerInner {
    config: PeerConfig,
    wallet: Arc<dyn Wallet>,
    node_key: NodeKeyPair,
    attestation: NodeKeyAttestation,
    attestation_bytes: Bytes,
    sessions: DashMap<String, Arc<Connection>>,
    invite_store: Option<Arc<InviteTokenStore>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerEvent>>,
    shutdown_tx: broadcast::Sender<()>,
    local_locator: parking_lot::Mutex<Option<Locator>>,
}

/// A snap2p peer: one wallet, one node key, one attestation, zero or
/// one listeners, and any number of outbound sessions.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use snap2p_common::types::Visibility;
/// use snap2p_core::identity::MemoryWallet;
/// use snap2p_peer::{Peer, PeerConfig};
///
/// # async fn run() -> snap2p_peer::Result<()> {
/// let server = Peer::new(
///     PeerConfig::new(Visibility::Public),
///     Arc::new(MemoryWallet::generate(false)),
/// )?;
/// let locator = server.listen(4000, Some("127.0.0.1")).await?;
///
/// let client = Peer::new(
///     PeerConfig::default(),
///     Arc::new(MemoryWallet::generate(false)),
/// )?;
/// let conn = client.dial(&locator, Default::default()).await?;
/// let stream = conn.open_stream(Some("echo")).await?;
/// stream.write(b"hello").await?;
/// stream.end().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    /// Creates a peer: validates the configuration, generates the
    /// node key, and has the wallet sign the attestation.
    ///
    /// # Errors
    /// Returns `Config` for invalid settings and `WalletSigning`
    /// failures from attestation signing.
    pub fn new(config: PeerConfig, wallet: Arc<dyn Wallet>) -> Result<Self> {
        config.validate()?;

        let node_key = NodeKeyPair::generate();
        let attestation = NodeKeyAttestation::build(
            wallet.as_ref(),
            node_key.public_key_bytes(),
            config.attestation_validity_secs,
        )?;
        let attestation_bytes = attestation.serialize();

        // A stealth peer without a token store cannot admit anyone;
        // create the store with the peer so that state cannot exist.
        let invite_store = (config.visibility == Visibility::Stealth)
            .then(|| Arc::new(InviteTokenStore::new(config.invite_tokens)));
        let rate_limiter = config
            .effective_rate_limit()
            .map(|limit| Arc::new(RateLimiter::new(limit)));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            principal = %attestation.principal,
            visibility = %config.visibility,
            "peer created"
        );

        Ok(Self {
            inner: Arc::new(PeerInner {
                config,
                wallet,
                node_key,
                attestation,
                attestation_bytes,
                sessions: DashMap::new(),
                invite_store,
                rate_limiter,
                events_tx,
                events_rx: tokio::sync::Mutex::new(events_rx),
                shutdown_tx,
                local_locator: parking_lot::Mutex::new(None),
            }),
        })
    }

    // ========================================
    // Accessors
    // ========================================

    /// The wallet principal this peer authenticates as.
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.inner.attestation.principal
    }

    /// The wallet backing this peer's attestations.
    #[must_use]
    pub fn wallet(&self) -> &Arc<dyn Wallet> {
        &self.inner.wallet
    }

    /// The Ed25519 node public key.
    #[must_use]
    pub fn node_public_key(&self) -> [u8; 32] {
        self.inner.node_key.public_key_bytes()
    }

    /// The current attestation.
    #[must_use]
    pub fn attestation(&self) -> &NodeKeyAttestation {
        &self.inner.attestation
    }

    /// The listener locator, once `listen` succeeded.
    #[must_use]
    pub fn locator(&self) -> Option<Locator> {
        self.inner.local_locator.lock().clone()
    }

    /// Number of registered live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Awaits the next peer event; `None` after shutdown.
    pub async fn next_event(&self) -> Option<PeerEvent> {
        self.inner.events_rx.lock().await.recv().await
    }

    fn handshake_ctx(inner: &PeerInner) -> HandshakeContext<'_> {
        HandshakeContext {
            node_key: &inner.node_key,
            attestation: &inner.attestation,
            attestation_bytes: &inner.attestation_bytes,
            config: &inner.config,
            invite_store: inner.invite_store.as_deref(),
        }
    }

    // ========================================
    // Listen
    // ========================================

    /// Binds a listener and starts accepting sessions.
    ///
    /// Returns the dialable locator (with the node public key
    /// attached). Port 0 binds an ephemeral port.
    ///
    /// # Errors
    /// Returns an `Io` error if binding fails.
    pub async fn listen(&self, port: u16, host: Option<&str>) -> Result<Locator> {
        let host = host.unwrap_or("0.0.0.0");
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| PeerError::io("bind listener", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| PeerError::io("listener address", e))?;

        let locator = Locator::tcp(addr.ip().to_string(), addr.port())?
            .with_node_public_key(self.node_public_key());
        *self.inner.local_locator.lock() = Some(locator.clone());

        info!(listen = %locator, visibility = %self.inner.config.visibility, "listener bound");

        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("accept loop received shutdown signal");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((socket, remote_addr)) => {
                            Self::handle_inbound(&inner, socket, remote_addr);
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
            debug!("accept loop exiting");
        });

        self.spawn_sweep_task();
        Ok(locator)
    }

    fn handle_inbound(inner: &Arc<PeerInner>, socket: TcpStream, remote_addr: SocketAddr) {
        // Rate limiting happens before any handshake work; rejected
        // sockets are dropped without a single response byte.
        if let Some(limiter) = &inner.rate_limiter {
            if !limiter.check(remote_addr.ip()) {
                debug!(peer = %remote_addr, "inbound connection rate-limited");
                return;
            }
        }

        configure_socket(&socket);

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let mut socket = socket;
            let established = {
                let ctx = Self::handshake_ctx(&inner);
                handshake::respond(&mut socket, &ctx).await
            };
            match established {
                Ok(established) => {
                    let key = format!("tcp://{}:{}", remote_addr.ip(), remote_addr.port());
                    let connection =
                        Self::register(&inner, socket, established, false, remote_addr, key);
                    let _ = inner.events_tx.send(PeerEvent::Connection(connection));
                }
                Err(e) => {
                    debug!(peer = %remote_addr, error = %e, "inbound handshake failed");
                }
            }
        });
    }

    // ========================================
    // Dial
    // ========================================

    /// Dials a locator and runs the initiator handshake.
    ///
    /// # Errors
    /// - `UnsupportedTransport` for non-TCP locators
    /// - `Timeout` when the TCP connect misses the dial deadline
    /// - Handshake errors (policy, attestation, Noise) as raised
    pub async fn dial(&self, locator: &Locator, options: DialOptions) -> Result<Arc<Connection>> {
        if locator.transport != TransportKind::Tcp {
            return Err(PeerError::UnsupportedTransport {
                transport: locator.transport.to_string(),
            });
        }

        let mut socket = time::timeout(
            self.inner.config.dial_timeout,
            TcpStream::connect(locator.authority()),
        )
        .await
        .map_err(|_| PeerError::timeout("dial"))?
        .map_err(|e| PeerError::io("connect", e))?;

        configure_socket(&socket);
        let remote_addr = socket
            .peer_addr()
            .map_err(|e| PeerError::io("peer address", e))?;

        let established = {
            let ctx = Self::handshake_ctx(&self.inner);
            handshake::initiate(&mut socket, &ctx, options.invite_token.as_deref()).await?
        };

        let connection = Self::register(
            &self.inner,
            socket,
            established,
            true,
            remote_addr,
            locator.to_string(),
        );
        let _ = self
            .inner
            .events_tx
            .send(PeerEvent::Connection(Arc::clone(&connection)));
        Ok(connection)
    }

    // ========================================
    // Registration
    // ========================================

    fn register(
        inner: &Arc<PeerInner>,
        socket: TcpStream,
        established: handshake::Established,
        initiator: bool,
        remote_addr: SocketAddr,
        key: String,
    ) -> Arc<Connection> {
        let (session, mux, events_rx, incoming_rx) = session::spawn(SessionSetup {
            socket,
            established,
            initiator,
            remote_addr,
            local_principal: inner.attestation.principal.clone(),
            keepalive_interval: inner.config.keepalive_interval,
            keepalive_timeout: inner.config.keepalive_timeout,
            max_streams: inner.config.max_streams_per_session,
            stream_high_water: inner.config.stream_high_water,
        });

        info!(
            session_id = %session.session_id(),
            peer = %session.remote_principal(),
            remote = %remote_addr,
            initiator,
            "session established"
        );

        let connection = Arc::new(Connection {
            session,
            mux,
            events: tokio::sync::Mutex::new(events_rx),
            incoming: tokio::sync::Mutex::new(incoming_rx),
        });

        inner.sessions.insert(key.clone(), Arc::clone(&connection));

        // Deregister when the session dies.
        let watch = Arc::clone(&connection);
        let registry = Arc::clone(inner);
        tokio::spawn(async move {
            watch.session.wait_closed().await;
            registry.sessions.remove(&key);
        });

        connection
    }

    fn spawn_sweep_task(&self) {
        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        if let Some(store) = &inner.invite_store {
                            let removed = store.sweep_expired();
                            if removed > 0 {
                                debug!(removed, "swept expired invite tokens");
                            }
                        }
                        if let Some(limiter) = &inner.rate_limiter {
                            limiter.sweep();
                        }
                    }
                }
            }
        });
    }

    // ========================================
    // Invite Token API (STEALTH only)
    // ========================================

    fn invite_store(&self) -> Result<&InviteTokenStore> {
        self.inner
            .invite_store
            .as_deref()
            .ok_or(PeerError::InviteTokensUnavailable)
    }

    /// Generates a random 32-byte invite token.
    ///
    /// # Errors
    /// `InviteTokensUnavailable` unless visibility is STEALTH.
    pub fn generate_invite_token(&self, options: InviteTokenOptions) -> Result<Vec<u8>> {
        Ok(self.invite_store()?.generate(options))
    }

    /// Imports an externally-created 16-32 byte token.
    ///
    /// # Errors
    /// `InviteTokensUnavailable` off-STEALTH; `InvalidToken` for bad
    /// lengths.
    pub fn import_invite_token(
        &self,
        token: &[u8],
        options: InviteTokenOptions,
    ) -> Result<()> {
        self.invite_store()?.import(token, options)
    }

    /// Revokes a token; returns whether it was present.
    ///
    /// # Errors
    /// `InviteTokensUnavailable` unless visibility is STEALTH.
    pub fn revoke_invite_token(&self, token: &[u8]) -> Result<bool> {
        Ok(self.invite_store()?.revoke(token))
    }

    /// Number of stored invite tokens.
    ///
    /// # Errors
    /// `InviteTokensUnavailable` unless visibility is STEALTH.
    pub fn invite_token_count(&self) -> Result<usize> {
        Ok(self.invite_store()?.count())
    }

    // ========================================
    // Shutdown
    // ========================================

    /// Stops the listener and sweep tasks and closes every session.
    /// Idempotent.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(());
        for entry in self.inner.sessions.iter() {
            entry.value().close();
        }
        self.inner.sessions.clear();
        info!(principal = %self.inner.attestation.principal, "peer shut down");
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("principal", &self.inner.attestation.principal)
            .field("visibility", &self.inner.config.visibility)
            .field("sessions", &self.session_count())
            .finish()
    }
}

// ============================================
// Socket Configuration
// ============================================

/// Enables TCP keepalive and disables Nagle on a session socket.
fn configure_socket(socket: &TcpStream) {
    if let Err(e) = socket.set_nodelay(true) {
        debug!(error = %e, "failed to disable Nagle");
    }
    let sock = socket2::SockRef::from(socket);
    let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(30));
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        debug!(error = %e, "failed to enable TCP keepalive");
    }
}
