// ============================================
// File: crates/snap2p-core/src/crypto/keys.rs
// ============================================
//! # Node Key Types
//!
//! ## Creation Reason
//! Defines the per-process transport identity: an Ed25519 keypair whose
//! X25519 (Montgomery) form doubles as the Noise static key. Keeping a
//! single keypair for both roles is what lets the attestation's signed
//! `node_public_key` be checked against the key that authenticated the
//! secure channel.
//!
//! ## Main Functionality
//! - `NodeKeyPair`: Ed25519 node identity with X25519 conversion
//! - `NodePublicKey`: public half with signature verification
//! - `ed25519_to_x25519`: public-key birational conversion
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  NodeKeyPair (per process)                                 │
//! │  ├─ Ed25519 form: attested by the wallet, sent in HELLO    │
//! │  └─ X25519 form: Noise static key for the XX handshake     │
//! │                                                            │
//! │  Ephemeral X25519 keys live inside the Noise engine and    │
//! │  never leave it.                                           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Private keys must never appear in Debug output or logs
//! - The secret-side conversion is the standard SHA-512 clamp; both
//!   halves MUST stay in sync or the binding check breaks
//!
//! ## Last Modified
//! v0.1.0 - Initial node key types

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use x25519_dalek::StaticSecret;
use zeroize::Zeroize;

use crate::error::{CoreError, Result};

use super::{ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE, X25519_PUBLIC_KEY_SIZE};

// ============================================
// Conversion Helpers
// ============================================

/// Converts an Ed25519 public key to its X25519 (Montgomery) form.
///
/// # Errors
/// Returns a `Key` error if the bytes are not a valid Ed25519 point.
pub fn ed25519_to_x25519(
    public: &[u8; ED25519_PUBLIC_KEY_SIZE],
) -> Result<[u8; X25519_PUBLIC_KEY_SIZE]> {
    let key = VerifyingKey::from_bytes(public)
        .map_err(|_| CoreError::key("invalid Ed25519 public key"))?;
    Ok(key.to_montgomery().to_bytes())
}

/// Derives the X25519 secret scalar matching an Ed25519 seed.
///
/// SHA-512 of the seed, clamped per RFC 7748. The resulting X25519
/// public key equals the Montgomery form of the Ed25519 public key.
fn x25519_scalar_from_seed(seed: &[u8; 32]) -> StaticSecret {
    let digest = Sha512::digest(seed);
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&digest[..32]);
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;
    let secret = StaticSecret::from(scalar);
    scalar.zeroize();
    secret
}

// ============================================
// NodeKeyPair
// ============================================

/// Per-process Ed25519 transport identity.
///
/// # Example
/// ```
/// use snap2p_core::crypto::keys::NodeKeyPair;
///
/// let node = NodeKeyPair::generate();
/// let sig = node.sign(b"payload");
/// assert!(node.public_key().verify(b"payload", &sig).is_ok());
///
/// // X25519 halves stay in sync with the Ed25519 identity.
/// let x_pub = x25519_dalek::PublicKey::from(&node.x25519_secret());
/// assert_eq!(x_pub.to_bytes(), node.x25519_public_bytes());
/// ```
pub struct NodeKeyPair {
    signing_key: SigningKey,
}

impl NodeKeyPair {
    /// Generates a new random node key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restores a node key pair from a 32-byte Ed25519 seed.
    ///
    /// # Errors
    /// Returns a `Key` error if the slice is not 32 bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        if seed.len() != 32 {
            return Err(CoreError::key(format!(
                "invalid Ed25519 seed size: expected 32, got {}",
                seed.len()
            )));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(seed);
        let signing_key = SigningKey::from_bytes(&bytes);
        bytes.zeroize();
        Ok(Self { signing_key })
    }

    /// Returns the Ed25519 public key.
    #[must_use]
    pub fn public_key(&self) -> NodePublicKey {
        NodePublicKey(self.signing_key.verifying_key())
    }

    /// Returns the raw Ed25519 public key bytes.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Signs a message with the node identity.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Returns the X25519 static secret used as the Noise static key.
    #[must_use]
    pub fn x25519_secret(&self) -> StaticSecret {
        x25519_scalar_from_seed(&self.signing_key.to_bytes())
    }

    /// Returns the X25519 public key bytes (Montgomery form of the
    /// Ed25519 public key).
    #[must_use]
    pub fn x25519_public_bytes(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.signing_key.verifying_key().to_montgomery().to_bytes()
    }
}

impl fmt::Debug for NodeKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print private key material
        f.debug_struct("NodeKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================
// NodePublicKey
// ============================================

/// Public half of a node identity. Safe to share.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NodePublicKey(VerifyingKey);

impl NodePublicKey {
    /// Creates a public key from raw bytes.
    ///
    /// # Errors
    /// Returns a `Key` error if the bytes are not a valid point.
    pub fn from_bytes(bytes: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> Result<Self> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|_| CoreError::key("invalid Ed25519 public key"))?;
        Ok(Self(key))
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Returns the X25519 (Montgomery) form of this key.
    #[must_use]
    pub fn to_x25519(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.0.to_montgomery().to_bytes()
    }

    /// Verifies an Ed25519 signature.
    ///
    /// # Errors
    /// Returns a `Key` error if verification fails.
    pub fn verify(&self, message: &[u8], signature: &[u8; ED25519_SIGNATURE_SIZE]) -> Result<()> {
        let sig = Signature::from_bytes(signature);
        self.0
            .verify(message, &sig)
            .map_err(|_| CoreError::key("signature verification failed"))
    }
}

impl fmt::Debug for NodePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_bytes();
        write!(
            f,
            "NodePublicKey({:02x}{:02x}{:02x}{:02x}...)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

impl fmt::Display for NodePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.as_bytes()))
    }
}

// ============================================
// Tests
// ============================================
