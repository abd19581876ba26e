// ============================================
// File: crates/snap2p-peer/src/lib.rs
// ============================================
//! # snap2p Peer - Session Engine
//!
//! ## Creation Reason
//! The async engine of the snap2p protocol: dials and listens on TCP,
//! runs the authenticated handshake, and exposes encrypted sessions
//! carrying multiplexed, flow-controlled byte streams.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`peer`]: the `Peer` facade (dial/listen/invite tokens)
//! - [`handshake`]: control-plane handshake orchestration
//! - [`session`]: encrypted transport, keepalive, close semantics
//! - [`mux`] / [`stream`]: stream multiplexing and duplex streams
//! - [`invite`]: STEALTH invite-token store
//! - [`ratelimit`]: per-IP accept limits
//! - [`config`] / [`error`]: configuration and error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Peer                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  dial ──► handshake ──► Session ──► Multiplexer ──► Stream  │
//! │  listen ─► rate limit ─► handshake ─► (same as above)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  bytes ⇢ TCP ⇢ framing ⇢ AEAD ⇢ codec ⇢ dispatch ⇢ stream   │
//! │  (write path is the mirror)                                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//! One read task per session owns the socket read half and the recv
//! cipher; writes serialize behind an async mutex so record nonces
//! stay monotonic. Sessions are independent of each other. Events
//! reach the consumer through ordered channels, never callbacks.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never share a cipher state across tasks without the write lock
//! - Policy rejections (rate limit) must stay silent on the wire
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub(crate) mod handshake;
pub mod invite;
pub mod mux;
pub mod peer;
pub mod ratelimit;
pub mod session;
pub mod stream;

// Re-export primary types at crate root
pub use config::{InviteTokenConfig, PeerConfig, RateLimitConfig};
pub use error::{PeerError, Result};
pub use invite::InviteTokenOptions;
pub use peer::{Connection, DialOptions, Peer, PeerEvent};
pub use session::{Session, SessionEvent, StatsSnapshot};
pub use stream::Stream;

// Re-export the identity surface consumers need to construct a peer.
pub use snap2p_common::types::{Locator, Principal, PrincipalSet, Visibility};
pub use snap2p_core::identity::{MemoryWallet, Wallet};
