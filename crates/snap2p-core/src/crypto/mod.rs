// ============================================
// File: crates/snap2p-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes all cryptographic operations for the snap2p session
//! protocol, using audited RustCrypto implementations.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keys`]: Node key types and Ed25519↔X25519 conversion
//! - [`noise`]: Noise XX handshake engine
//! - [`transport`]: Directional transport cipher states
//!
//! ## Cryptographic Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Handshake Phase                          │
//! │  Initiator                                   Responder      │
//! │    │  ── e ───────────────────────────────────► │           │
//! │    │  ◄──────────────────────── e, ee, s, es ── │           │
//! │    │  ── s, se ───────────────────────────────► │           │
//! │    │                                            │           │
//! │    │   HKDF-SHA256 split ──► two directional keys           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Transport Phase                          │
//! │                                                             │
//! │   key + LE counter nonce ──► ChaCha20-Poly1305 records      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//! - **Forward Secrecy**: fresh X25519 ephemerals per session
//! - **Mutual Authentication**: both statics mixed into the transcript
//! - **Channel Binding**: transcript hash ties attestation to channel
//! - **Replay Protection**: strictly monotonic record counters
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL implementations use RustCrypto (audited)
//! - NEVER roll your own primitives
//! - Sensitive key material implements Zeroize
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod keys;
pub mod noise;
pub mod transport;

// Re-export primary types at module level
pub use keys::{ed25519_to_x25519, NodeKeyPair, NodePublicKey};
pub use noise::{HandshakeState, NoiseTransport, NOISE_PROTOCOL_NAME};
pub use transport::TransportCipher;

// ============================================
// Constants
// ============================================

/// Size of an Ed25519 public key in bytes.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Size of an X25519 public key in bytes.
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 key in bytes.
pub const CHACHA20_KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 nonce in bytes.
pub const CHACHA20_NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag in bytes.
pub const POLY1305_TAG_SIZE: usize = 16;
