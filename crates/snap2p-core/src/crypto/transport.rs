// ============================================
// File: crates/snap2p-core/src/crypto/transport.rs
// ============================================
//! # Transport Cipher States
//!
//! ## Creation Reason
//! Provides the per-direction AEAD cipher state used for every frame
//! after the Noise handshake completes.
//!
//! ## Main Functionality
//! - `TransportCipher`: `{key, nonce}` with monotonic nonce sequencing
//! - Nonce construction from the counter
//! - Hard failure on nonce exhaustion
//!
//! ## Record Format
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │ ChaCha20-Poly1305 ciphertext (variable)            │
//! │ └─ Poly1305 tag (16 bytes)                         │
//! └────────────────────────────────────────────────────┘
//! nonce (12 bytes) = 0x00000000 || counter (8 bytes LE)
//! associated data  = empty
//! ```
//!
//! ## Security Properties
//! - **Ordering**: the counter doubles as an implicit sequence number;
//!   a reordered or replayed record fails authentication
//! - **No reuse**: the counter strictly increases and never wraps; the
//!   session MUST be torn down before it reaches 2^64 - 1
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never reuse a (key, nonce) pair - catastrophic security failure
//! - The caller serializes access; this type is deliberately not Sync
//!
//! ## Last Modified
//! v0.1.0 - Initial transport cipher implementation

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, Result};

use super::{CHACHA20_KEY_SIZE, CHACHA20_NONCE_SIZE, POLY1305_TAG_SIZE};

// ============================================
// TransportCipher
// ============================================

/// One direction of an established session's encryption state.
///
/// Holds the directional key and the monotonically increasing nonce
/// counter. Sealing and opening advance the counter; the counter MUST
/// NOT wrap, so both operations fail with `NonceExhausted` once the
/// counter reaches `u64::MAX`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct TransportCipher {
    key: [u8; CHACHA20_KEY_SIZE],
    #[zeroize(skip)]
    nonce: u64,
}

impl TransportCipher {
    /// Creates a cipher state with the nonce counter at zero.
    #[must_use]
    pub fn new(key: [u8; CHACHA20_KEY_SIZE]) -> Self {
        Self { key, nonce: 0 }
    }

    /// Current nonce counter (the value the next record will use).
    #[must_use]
    pub const fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Wire nonce for a counter value: four zero bytes then the
    /// counter in little-endian.
    fn make_nonce(counter: u64) -> Nonce {
        let mut nonce = [0u8; CHACHA20_NONCE_SIZE];
        nonce[4..].copy_from_slice(&counter.to_le_bytes());
        Nonce::from(nonce)
    }

    fn check_nonce(&self) -> Result<()> {
        // 2^64 - 1 is reserved; reaching it means the session outlived
        // its key material.
        if self.nonce == u64::MAX {
            return Err(CoreError::NonceExhausted);
        }
        Ok(())
    }

    /// Encrypts one record, advancing the nonce counter.
    ///
    /// # Errors
    /// - `NonceExhausted` once the counter is spent
    /// - `Encryption` on AEAD failure
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_nonce()?;
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| CoreError::Encryption)?;
        let nonce = Self::make_nonce(self.nonce);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| CoreError::Encryption)?;
        self.nonce += 1;
        Ok(ciphertext)
    }

    /// Decrypts one record, advancing the nonce counter.
    ///
    /// # Errors
    /// - `NonceExhausted` once the counter is spent
    /// - `Decryption` if authentication fails (fatal for the session)
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_nonce()?;
        if ciphertext.len() < POLY1305_TAG_SIZE {
            return Err(CoreError::Decryption);
        }
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| CoreError::Decryption)?;
        let nonce = Self::make_nonce(self.nonce);
        let plaintext = cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: ciphertext,
                    aad: &[],
                },
            )
            .map_err(|_| CoreError::Decryption)?;
        self.nonce += 1;
        Ok(plaintext)
    }
}

impl std::fmt::Debug for TransportCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("TransportCipher")
            .field("nonce", &self.nonce)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (TransportCipher, TransportCipher) {
        let key = [0x42u8; CHACHA20_KEY_SIZE];
        (TransportCipher::new(key), TransportCipher::new(key))
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (mut tx, mut rx) = pair();

        for i in 0u64..4 {
            assert_eq!(tx.nonce(), i);
            let sealed = tx.seal(b"record").unwrap();
            assert_eq!(sealed.len(), 6 + POLY1305_TAG_SIZE);
            assert_eq!(rx.open(&sealed).unwrap(), b"record");
            // The next encryption uses nonce n+1.
            assert_eq!(tx.nonce(), i + 1);
            assert_eq!(rx.nonce(), i + 1);
        }
    }

    #[test]
    fn test_out_of_order_record_fails() {
        let (mut tx, mut rx) = pair();

        let first = tx.seal(b"one").unwrap();
        let second = tx.seal(b"two").unwrap();

        // Delivering the second record first fails authentication.
        assert!(matches!(rx.open(&second), Err(CoreError::Decryption)));
        // The failed attempt consumed a nonce, so the session is dead
        // for good: even the first record no longer opens.
        assert!(rx.open(&first).is_err());
    }

    #[test]
    fn test_tampered_record_fails() {
        let (mut tx, mut rx) = pair();
        let mut sealed = tx.seal(b"payload").unwrap();
        sealed[0] ^= 0x01;
        assert!(matches!(rx.open(&sealed), Err(CoreError::Decryption)));
    }

    #[test]
    fn test_truncated_record_fails() {
        let (mut tx, mut rx) = pair();
        let sealed = tx.seal(b"payload").unwrap();
        assert!(rx.open(&sealed[..POLY1305_TAG_SIZE - 1]).is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let (mut tx, mut rx) = pair();
        let sealed = tx.seal(b"").unwrap();
        assert_eq!(sealed.len(), POLY1305_TAG_SIZE);
        assert!(rx.open(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_nonce_exhaustion() {
        let mut cipher = TransportCipher::new([0x01u8; CHACHA20_KEY_SIZE]);
        cipher.nonce = u64::MAX;
        assert!(matches!(
            cipher.seal(b"x"),
            Err(CoreError::NonceExhausted)
        ));
        assert!(matches!(
            cipher.open(&[0u8; 32]),
            Err(CoreError::NonceExhausted)
        ));
    }

    #[test]
    fn test_nonce_layout() {
        let nonce = TransportCipher::make_nonce(1);
        assert_eq!(
            nonce.as_slice(),
            &[0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]
        );
    }
}
