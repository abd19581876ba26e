// ============================================
// File: crates/snap2p-core/src/crypto/noise.rs
// ============================================
//! # Noise XX Handshake Engine
//!
//! ## Creation Reason
//! Implements the three-message mutually-authenticated Noise XX key
//! agreement that bootstraps every session, producing the directional
//! transport ciphers and the transcript hash used for channel binding.
//!
//! ## Main Functionality
//! - `SymmetricState`: chaining key + transcript hash + handshake cipher
//! - `HandshakeState`: XX message pattern state machine
//! - `NoiseTransport`: finalized directional ciphers + transcript hash
//!
//! ## Message Pattern (initiator → responder)
//! ```text
//! 1.  -> e             (32 bytes + empty payload)
//! 2.  <- e, ee, s, es  (32 + 48 + 16 bytes)
//! 3.  -> s, se         (48 + 16 bytes)
//! ```
//!
//! ## Key Schedule
//! - `h` starts as the protocol name (right-padded to 32 bytes)
//! - `ck := h`, then `MixHash(prologue)` with an empty prologue
//! - `MixKey(ikm)`: `(ck, k) := HKDF-SHA256(salt=ck, ikm, L=64)`
//! - Finalize: `(k1, k2) := HKDF-SHA256(salt=ck, ikm=∅, L=64)`;
//!   the initiator sends with `k1`, the responder with `k2`
//!
//! ## ⚠️ Important Note for Next Developer
//! - An authentication failure mid-handshake is fatal; states are not
//!   reusable after any error
//! - The remote static key exposed here is what the attestation
//!   binding check compares against - do not "clean it up" away
//!
//! ## Last Modified
//! v0.1.0 - Initial Noise XX implementation

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::trace;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::crypto::transport::TransportCipher;
use crate::error::{CoreError, Result};

use super::{CHACHA20_KEY_SIZE, CHACHA20_NONCE_SIZE, POLY1305_TAG_SIZE, X25519_PUBLIC_KEY_SIZE};

// ============================================
// Constants
// ============================================

/// Noise protocol name; also the initial transcript hash (it is
/// exactly 32 bytes, shorter names would be right-padded with zeros).
pub const NOISE_PROTOCOL_NAME: &[u8] = b"Noise_XX_25519_ChaChaPoly_SHA256";

/// Size of Noise message 1 (`e` + empty payload).
pub const NOISE_MESSAGE_1_SIZE: usize = X25519_PUBLIC_KEY_SIZE;

/// Size of Noise message 2 (`e` + encrypted `s` + encrypted payload).
pub const NOISE_MESSAGE_2_SIZE: usize =
    X25519_PUBLIC_KEY_SIZE + X25519_PUBLIC_KEY_SIZE + POLY1305_TAG_SIZE + POLY1305_TAG_SIZE;

/// Size of Noise message 3 (encrypted `s` + encrypted payload).
pub const NOISE_MESSAGE_3_SIZE: usize =
    X25519_PUBLIC_KEY_SIZE + POLY1305_TAG_SIZE + POLY1305_TAG_SIZE;

// ============================================
// Helpers
// ============================================

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// `HKDF-SHA256(salt=ck, ikm, info=∅, L=64)` split into two 32-byte keys.
fn hkdf_two(ck: &[u8; 32], ikm: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    let hk = Hkdf::<Sha256>::new(Some(ck), ikm);
    let mut okm = [0u8; 64];
    hk.expand(&[], &mut okm)
        .map_err(|_| CoreError::handshake("HKDF expansion failed"))?;
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    okm.zeroize();
    Ok((first, second))
}

fn dh(secret: &StaticSecret, public: &[u8; X25519_PUBLIC_KEY_SIZE]) -> [u8; 32] {
    secret
        .diffie_hellman(&X25519PublicKey::from(*public))
        .to_bytes()
}

// ============================================
// Handshake Cipher
// ============================================

/// Cipher used during the handshake: passthrough until the first
/// `MixKey`, AEAD with the transcript hash as associated data after.
struct HandshakeCipher {
    key: Option<[u8; CHACHA20_KEY_SIZE]>,
    nonce: u64,
}

impl HandshakeCipher {
    fn new() -> Self {
        Self {
            key: None,
            nonce: 0,
        }
    }

    fn init(&mut self, key: [u8; CHACHA20_KEY_SIZE]) {
        if let Some(old) = self.key.as_mut() {
            old.zeroize();
        }
        self.key = Some(key);
        self.nonce = 0;
    }

    fn make_nonce(&self) -> Nonce {
        let mut nonce = [0u8; CHACHA20_NONCE_SIZE];
        nonce[4..].copy_from_slice(&self.nonce.to_le_bytes());
        Nonce::from(nonce)
    }

    fn encrypt(&mut self, plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_vec());
        };
        let cipher =
            ChaCha20Poly1305::new_from_slice(key).map_err(|_| CoreError::Encryption)?;
        let nonce = self.make_nonce();
        let out = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: ad,
                },
            )
            .map_err(|_| CoreError::Encryption)?;
        self.nonce += 1;
        Ok(out)
    }

    fn decrypt(&mut self, ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>> {
        let Some(key) = &self.key else {
            return Ok(ciphertext.to_vec());
        };
        let cipher =
            ChaCha20Poly1305::new_from_slice(key).map_err(|_| CoreError::Decryption)?;
        let nonce = self.make_nonce();
        let out = cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: ciphertext,
                    aad: ad,
                },
            )
            .map_err(|_| CoreError::Decryption)?;
        self.nonce += 1;
        Ok(out)
    }

    fn has_key(&self) -> bool {
        self.key.is_some()
    }
}

impl Drop for HandshakeCipher {
    fn drop(&mut self) {
        if let Some(key) = self.key.as_mut() {
            key.zeroize();
        }
    }
}

// ============================================
// Symmetric State
// ============================================

/// Chaining key, transcript hash, and the handshake cipher.
struct SymmetricState {
    ck: [u8; 32],
    h: [u8; 32],
    cipher: HandshakeCipher,
}

impl SymmetricState {
    fn new() -> Self {
        let mut h = [0u8; 32];
        // Protocol name is ≤ 32 bytes, so it seeds h directly.
        h[..NOISE_PROTOCOL_NAME.len()].copy_from_slice(NOISE_PROTOCOL_NAME);
        Self {
            ck: h,
            h,
            cipher: HandshakeCipher::new(),
        }
    }

    fn mix_hash(&mut self, data: &[u8]) {
        self.h = sha256(&[&self.h, data]);
    }

    fn mix_key(&mut self, ikm: &[u8]) -> Result<()> {
        let (ck, k) = hkdf_two(&self.ck, ikm)?;
        self.ck = ck;
        self.cipher.init(k);
        Ok(())
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let out = self.cipher.encrypt(plaintext, &self.h)?;
        self.mix_hash(&out);
        Ok(out)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let out = self.cipher.decrypt(ciphertext, &self.h)?;
        self.mix_hash(ciphertext);
        Ok(out)
    }

    fn split(&self) -> Result<(TransportCipher, TransportCipher)> {
        let (k1, k2) = hkdf_two(&self.ck, &[])?;
        Ok((TransportCipher::new(k1), TransportCipher::new(k2)))
    }
}

// ============================================
// Handshake State
// ============================================

/// Handshake role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Responder,
}

/// Finalized handshake output.
pub struct NoiseTransport {
    /// Cipher for outbound records.
    pub send: TransportCipher,
    /// Cipher for inbound records.
    pub recv: TransportCipher,
    /// The peer's authenticated X25519 static public key.
    pub remote_static: [u8; X25519_PUBLIC_KEY_SIZE],
    /// Final transcript hash `h`, for channel binding.
    pub handshake_hash: [u8; 32],
}

impl std::fmt::Debug for NoiseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseTransport")
            .field("remote_static", &hex::encode(self.remote_static))
            .finish_non_exhaustive()
    }
}

/// Noise XX handshake state machine.
///
/// Drive with alternating `write_message` / `read_message` calls in
/// pattern order, then call `finalize`.
///
/// # Example
/// ```
/// use snap2p_core::crypto::keys::NodeKeyPair;
/// use snap2p_core::crypto::noise::HandshakeState;
///
/// let alice = NodeKeyPair::generate();
/// let bob = NodeKeyPair::generate();
/// let mut init = HandshakeState::initiator(alice.x25519_secret());
/// let mut resp = HandshakeState::responder(bob.x25519_secret());
///
/// let m1 = init.write_message(&[]).unwrap();
/// resp.read_message(&m1).unwrap();
/// let m2 = resp.write_message(&[]).unwrap();
/// init.read_message(&m2).unwrap();
/// let m3 = init.write_message(&[]).unwrap();
/// resp.read_message(&m3).unwrap();
///
/// let a = init.finalize().unwrap();
/// let b = resp.finalize().unwrap();
/// assert_eq!(a.handshake_hash, b.handshake_hash);
/// ```
pub struct HandshakeState {
    symmetric: SymmetricState,
    local_static: StaticSecret,
    local_static_public: [u8; X25519_PUBLIC_KEY_SIZE],
    local_ephemeral: Option<StaticSecret>,
    remote_static: Option<[u8; X25519_PUBLIC_KEY_SIZE]>,
    remote_ephemeral: Option<[u8; X25519_PUBLIC_KEY_SIZE]>,
    role: Role,
    message_index: u8,
}

impl HandshakeState {
    fn new(role: Role, local_static: StaticSecret) -> Self {
        let local_static_public = X25519PublicKey::from(&local_static).to_bytes();
        let mut symmetric = SymmetricState::new();
        // Empty prologue still gets mixed.
        symmetric.mix_hash(&[]);
        Self {
            symmetric,
            local_static,
            local_static_public,
            local_ephemeral: None,
            remote_static: None,
            remote_ephemeral: None,
            role,
            message_index: 0,
        }
    }

    /// Creates the initiator side with the given static key.
    #[must_use]
    pub fn initiator(local_static: StaticSecret) -> Self {
        Self::new(Role::Initiator, local_static)
    }

    /// Creates the responder side with the given static key.
    #[must_use]
    pub fn responder(local_static: StaticSecret) -> Self {
        Self::new(Role::Responder, local_static)
    }

    /// Returns `true` once all three messages have been processed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.message_index == 3
    }

    fn generate_ephemeral(&mut self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret).to_bytes();
        self.local_ephemeral = Some(secret);
        public
    }

    fn local_ephemeral(&self) -> Result<&StaticSecret> {
        self.local_ephemeral
            .as_ref()
            .ok_or_else(|| CoreError::handshake("local ephemeral not set"))
    }

    fn remote_ephemeral(&self) -> Result<[u8; X25519_PUBLIC_KEY_SIZE]> {
        self.remote_ephemeral
            .ok_or_else(|| CoreError::handshake("remote ephemeral not set"))
    }

    /// Produces the next handshake message with `payload` attached.
    ///
    /// # Errors
    /// Returns a `Handshake` error if called out of pattern order, or
    /// a crypto error if an AEAD/HKDF step fails.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        match (self.role, self.message_index) {
            // -> e
            (Role::Initiator, 0) => {
                let e = self.generate_ephemeral();
                let mut out = Vec::with_capacity(NOISE_MESSAGE_1_SIZE + payload.len());
                out.extend_from_slice(&e);
                self.symmetric.mix_hash(&e);
                out.extend_from_slice(&self.symmetric.encrypt_and_hash(payload)?);
                self.message_index = 1;
                Ok(out)
            }
            // <- e, ee, s, es
            (Role::Responder, 1) => {
                let e = self.generate_ephemeral();
                let mut out = Vec::with_capacity(NOISE_MESSAGE_2_SIZE + payload.len());
                out.extend_from_slice(&e);
                self.symmetric.mix_hash(&e);

                let remote_e = self.remote_ephemeral()?;
                let ee = dh(self.local_ephemeral()?, &remote_e);
                self.symmetric.mix_key(&ee)?;

                let s = self.local_static_public;
                out.extend_from_slice(&self.symmetric.encrypt_and_hash(&s)?);

                let es = dh(&self.local_static, &remote_e);
                self.symmetric.mix_key(&es)?;

                out.extend_from_slice(&self.symmetric.encrypt_and_hash(payload)?);
                self.message_index = 2;
                Ok(out)
            }
            // -> s, se
            (Role::Initiator, 2) => {
                let mut out = Vec::with_capacity(NOISE_MESSAGE_3_SIZE + payload.len());
                let s = self.local_static_public;
                out.extend_from_slice(&self.symmetric.encrypt_and_hash(&s)?);

                let se = dh(&self.local_static, &self.remote_ephemeral()?);
                self.symmetric.mix_key(&se)?;

                out.extend_from_slice(&self.symmetric.encrypt_and_hash(payload)?);
                self.message_index = 3;
                Ok(out)
            }
            _ => Err(CoreError::handshake(format!(
                "write_message out of order at index {}",
                self.message_index
            ))),
        }
    }

    /// Consumes the next handshake message, returning its payload.
    ///
    /// # Errors
    /// Returns a `Handshake` error for out-of-order or truncated
    /// messages and `Decryption` if authentication fails; both are
    /// fatal for the handshake.
    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        match (self.role, self.message_index) {
            // -> e
            (Role::Responder, 0) => {
                let (e, rest) = split_key(message)?;
                self.symmetric.mix_hash(&e);
                self.remote_ephemeral = Some(e);
                let payload = self.symmetric.decrypt_and_hash(rest)?;
                self.message_index = 1;
                Ok(payload)
            }
            // <- e, ee, s, es
            (Role::Initiator, 1) => {
                let (e, rest) = split_key(message)?;
                self.symmetric.mix_hash(&e);
                self.remote_ephemeral = Some(e);

                let ee = dh(self.local_ephemeral()?, &e);
                self.symmetric.mix_key(&ee)?;

                let s_len = X25519_PUBLIC_KEY_SIZE + POLY1305_TAG_SIZE;
                if rest.len() < s_len + POLY1305_TAG_SIZE {
                    return Err(CoreError::handshake("message 2 truncated"));
                }
                let rs = self.symmetric.decrypt_and_hash(&rest[..s_len])?;
                let rs = to_key(&rs)?;
                self.remote_static = Some(rs);

                let es = dh(self.local_ephemeral()?, &rs);
                self.symmetric.mix_key(&es)?;

                let payload = self.symmetric.decrypt_and_hash(&rest[s_len..])?;
                self.message_index = 2;
                Ok(payload)
            }
            // -> s, se
            (Role::Responder, 2) => {
                let s_len = X25519_PUBLIC_KEY_SIZE + POLY1305_TAG_SIZE;
                if message.len() < s_len + POLY1305_TAG_SIZE {
                    return Err(CoreError::handshake("message 3 truncated"));
                }
                let rs = self.symmetric.decrypt_and_hash(&message[..s_len])?;
                let rs = to_key(&rs)?;
                self.remote_static = Some(rs);

                let se = dh(self.local_ephemeral()?, &rs);
                self.symmetric.mix_key(&se)?;

                let payload = self.symmetric.decrypt_and_hash(&message[s_len..])?;
                self.message_index = 3;
                Ok(payload)
            }
            _ => Err(CoreError::handshake(format!(
                "read_message out of order at index {}",
                self.message_index
            ))),
        }
    }

    /// Splits the final chaining key into directional transport
    /// ciphers.
    ///
    /// # Errors
    /// Returns a `Handshake` error if the pattern is incomplete.
    pub fn finalize(self) -> Result<NoiseTransport> {
        if !self.is_complete() {
            return Err(CoreError::handshake("handshake not complete"));
        }
        if !self.symmetric.cipher.has_key() {
            return Err(CoreError::handshake("handshake produced no key"));
        }
        let remote_static = self
            .remote_static
            .ok_or_else(|| CoreError::handshake("remote static not received"))?;

        let (k1, k2) = self.symmetric.split()?;
        let (send, recv) = match self.role {
            Role::Initiator => (k1, k2),
            Role::Responder => (k2, k1),
        };

        trace!(role = ?self.role, "noise handshake finalized");
        Ok(NoiseTransport {
            send,
            recv,
            remote_static,
            handshake_hash: self.symmetric.h,
        })
    }
}

fn split_key(message: &[u8]) -> Result<([u8; X25519_PUBLIC_KEY_SIZE], &[u8])> {
    if message.len() < X25519_PUBLIC_KEY_SIZE {
        return Err(CoreError::handshake("message shorter than a public key"));
    }
    let mut key = [0u8; X25519_PUBLIC_KEY_SIZE];
    key.copy_from_slice(&message[..X25519_PUBLIC_KEY_SIZE]);
    Ok((key, &message[X25519_PUBLIC_KEY_SIZE..]))
}

fn to_key(bytes: &[u8]) -> Result<[u8; X25519_PUBLIC_KEY_SIZE]> {
    if bytes.len() != X25519_PUBLIC_KEY_SIZE {
        return Err(CoreError::handshake("static key has wrong length"));
    }
    let mut key = [0u8; X25519_PUBLIC_KEY_SIZE];
    key.copy_from_slice(bytes);
    Ok(key)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::NodeKeyPair;

    fn run_handshake() -> (NoiseTransport, NoiseTransport, NodeKeyPair, NodeKeyPair) {
        let alice = NodeKeyPair::generate();
        let bob = NodeKeyPair::generate();
        let mut init = HandshakeState::initiator(alice.x25519_secret());
        let mut resp = HandshakeState::responder(bob.x25519_secret());

        let m1 = init.write_message(&[]).unwrap();
        assert_eq!(m1.len(), NOISE_MESSAGE_1_SIZE);
        assert!(resp.read_message(&m1).unwrap().is_empty());

        let m2 = resp.write_message(&[]).unwrap();
        assert_eq!(m2.len(), NOISE_MESSAGE_2_SIZE);
        assert!(init.read_message(&m2).unwrap().is_empty());

        let m3 = init.write_message(&[]).unwrap();
        assert_eq!(m3.len(), NOISE_MESSAGE_3_SIZE);
        assert!(resp.read_message(&m3).unwrap().is_empty());

        assert!(init.is_complete());
        assert!(resp.is_complete());

        (init.finalize().unwrap(), resp.finalize().unwrap(), alice, bob)
    }

    #[test]
    fn test_full_handshake_agreement() {
        let (a, b, alice, bob) = run_handshake();

        // Both sides compute the same transcript hash.
        assert_eq!(a.handshake_hash, b.handshake_hash);

        // Each side learned the other's static key.
        assert_eq!(a.remote_static, bob.x25519_public_bytes());
        assert_eq!(b.remote_static, alice.x25519_public_bytes());
    }

    #[test]
    fn test_transport_keys_are_directional() {
        let (mut a, mut b, _, _) = run_handshake();

        // Initiator send key == responder recv key, and vice versa.
        let sealed = a.send.seal(b"i2r").unwrap();
        assert_eq!(b.recv.open(&sealed).unwrap(), b"i2r");

        let sealed = b.send.seal(b"r2i").unwrap();
        assert_eq!(a.recv.open(&sealed).unwrap(), b"r2i");
    }

    #[test]
    fn test_handshake_payloads_roundtrip() {
        let alice = NodeKeyPair::generate();
        let bob = NodeKeyPair::generate();
        let mut init = HandshakeState::initiator(alice.x25519_secret());
        let mut resp = HandshakeState::responder(bob.x25519_secret());

        let m1 = init.write_message(b"one").unwrap();
        assert_eq!(resp.read_message(&m1).unwrap(), b"one");
        let m2 = resp.write_message(b"two").unwrap();
        assert_eq!(init.read_message(&m2).unwrap(), b"two");
        let m3 = init.write_message(b"three").unwrap();
        assert_eq!(resp.read_message(&m3).unwrap(), b"three");
    }

    #[test]
    fn test_tampered_message_2_fails() {
        let alice = NodeKeyPair::generate();
        let bob = NodeKeyPair::generate();
        let mut init = HandshakeState::initiator(alice.x25519_secret());
        let mut resp = HandshakeState::responder(bob.x25519_secret());

        let m1 = init.write_message(&[]).unwrap();
        resp.read_message(&m1).unwrap();
        let mut m2 = resp.write_message(&[]).unwrap();

        // Flip a bit in the encrypted static key section.
        m2[40] ^= 0x01;
        assert!(init.read_message(&m2).is_err());
    }

    #[test]
    fn test_out_of_order_calls_rejected() {
        let alice = NodeKeyPair::generate();
        let mut init = HandshakeState::initiator(alice.x25519_secret());

        // Initiator cannot read before writing message 1.
        assert!(init.read_message(&[0u8; 96]).is_err());

        let _ = init.write_message(&[]).unwrap();
        // Writing twice in a row is out of order.
        assert!(init.write_message(&[]).is_err());
    }

    #[test]
    fn test_finalize_requires_completion() {
        let alice = NodeKeyPair::generate();
        let init = HandshakeState::initiator(alice.x25519_secret());
        assert!(init.finalize().is_err());
    }

    #[test]
    fn test_distinct_sessions_get_distinct_hashes() {
        let (a1, _, _, _) = run_handshake();
        let (a2, _, _, _) = run_handshake();
        assert_ne!(a1.handshake_hash, a2.handshake_hash);
    }
}
