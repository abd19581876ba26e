// ============================================
// File: crates/snap2p-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the wire protocol for snap2p sessions: length framing,
//! the canonical map codec, and the control message catalogue.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`framing`]: Varint length-prefix framing and incremental buffer
//! - [`codec`]: Canonical deterministic map encoding
//! - [`messages`]: Control message structures and tag dispatch
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Handshake Phase (per TCP connect)           │
//! │                                                             │
//! │  [KNOCK / KNOCK_RESPONSE]   plaintext frames (STEALTH only) │
//! │  Noise XX msg 1..3          plaintext frames                │
//! │  HELLO / AUTH / AUTH_OK     encrypted frames                │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Transport Phase                             │
//! │                                                             │
//! │  OPEN_STREAM / STREAM_DATA / CLOSE_STREAM / PING / PONG     │
//! │  each an AEAD-encrypted frame around a canonical map        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format Principles
//! - Every frame is `varint(len) || bytes`, len ≤ 16 MiB
//! - Message bodies are canonical maps (sorted keys, shortest forms)
//! - Unknown map fields are tolerated so revisions can interoperate
//!
//! ## ⚠️ Important Note for Next Developer
//! - ANY wire format change requires a protocol version bump
//! - Determinism is a signature-correctness requirement, not cosmetics
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod codec;
pub mod framing;
pub mod messages;

// Re-export primary types
pub use framing::{frame, FrameBuffer, MAX_FRAME_SIZE};
pub use messages::{
    decode_message, encode_message, peek_tag, Auth, AuthFail, AuthOk, CloseStream, ErrorCode,
    ErrorMessage, Hello, Knock, KnockResponse, Message, OpenStream, Ping, Pong, StreamData,
    PROTOCOL_VERSION,
};
