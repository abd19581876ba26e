// ============================================
// File: crates/snap2p-core/src/lib.rs
// ============================================
//! # snap2p Core - Protocol & Cryptography Library
//!
//! ## Creation Reason
//! Provides the protocol definitions and cryptographic operations for
//! snap2p sessions. This crate is the security backbone of the system
//! and is deliberately runtime-free: no sockets, no timers, no tasks.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - Varint length framing with incremental reassembly
//! - Canonical deterministic map codec
//! - The full control message catalogue with tag dispatch
//!
//! ### Crypto Module ([`crypto`])
//! - Node key types with Ed25519↔X25519 conversion
//! - Noise XX handshake engine
//! - Directional transport cipher states
//!
//! ### Identity Module ([`identity`])
//! - Wallet capability trait and issuer recovery
//! - Stacks c32check address derivation
//! - Node key attestations (build/sign/verify/binding)
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                snap2p-peer                          │
//! │                     │                               │
//! │                     ▼                               │
//! │                snap2p-core  ◄── You are here        │
//! │                     │                               │
//! │                     ▼                               │
//! │               snap2p-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Guarantees
//! - **Confidentiality**: ChaCha20-Poly1305 on every post-handshake frame
//! - **Mutual Authentication**: Noise XX plus wallet attestations
//! - **Channel Binding**: attested node key must equal the Noise static
//! - **Replay Protection**: strictly monotonic record counters
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses audited implementations
//! - NEVER implement custom primitives
//! - Wire format changes MUST bump the protocol version
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crypto;
pub mod error;
pub mod identity;
pub mod protocol;

// Re-export primary types at crate root
pub use error::{CoreError, Result};
