// ============================================
// File: crates/snap2p-core/src/identity/mod.rs
// ============================================
//! # Identity Module
//!
//! ## Creation Reason
//! Groups everything that ties a wallet principal to a transport node
//! key: the wallet capability seam, address derivation, and the signed
//! attestation itself.
//!
//! ## Main Functionality
//! - [`wallet`]: `Wallet` trait, `MemoryWallet`, issuer recovery
//! - [`address`]: c32check Stacks address derivation
//! - [`attestation`]: `NodeKeyAttestation` build/verify
//!
//! ## Trust Chain
//! ```text
//! wallet secp256k1 key ──sign──► NodeKeyAttestation ──binds──► node key
//!        │                              │                        │
//!   derives address            carried in AUTH           Noise static key
//!        └───────── must match ─────────┘────── must match ──────┘
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial identity module

pub mod address;
pub mod attestation;
pub mod wallet;

// Re-export primary types
pub use address::principal_for_public_key;
pub use attestation::{NodeKeyAttestation, ATTESTATION_DOMAIN, DEFAULT_VALIDITY_SECS};
pub use wallet::{MemoryWallet, Wallet, RECOVERABLE_SIGNATURE_SIZE};
