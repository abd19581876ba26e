// ============================================
// File: crates/snap2p-core/src/identity/attestation.rs
// ============================================
//! # Node Key Attestation
//!
//! ## Creation Reason
//! Implements the wallet-signed document binding a principal to its
//! ephemeral node key. The attestation is what turns "I hold the Noise
//! static key" into "I am this wallet" during the handshake.
//!
//! ## Main Functionality
//! - `NodeKeyAttestation`: build, sign, serialize, deserialize
//! - Structural verification (version, domain, nonce, time windows)
//! - Cryptographic verification (issuer recovery → address equality)
//! - Node-key binding check against the Noise remote static
//!
//! ## Canonical Form
//! A canonical map with keys (in byte order):
//! `domain, exp, nonce, npk, p, sig, ts, v` - the signing payload is
//! the same map without `sig`, so signer and verifier agree
//! bit-for-bit.
//!
//! ## Verification Pipeline
//! ```text
//! 1. Structural: version=1, domain literal, nonce 16-32 bytes,
//!    ts ≤ now+300, exp > now-300, exp > ts, signature present
//! 2. Cryptographic: recover secp256k1 key from RSV signature over
//!    SHA256(signing payload); derive network address; compare with
//!    principal.addr
//! 3. Binding (at handshake): Ed25519 npk → X25519 must equal the
//!    Noise remote static key, compared in constant time
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Created once at peer startup, never mutated; rotation replaces it
//! - Expiry uses the protocol's ±300 s skew, not an exact comparison
//!
//! ## Last Modified
//! v0.1.0 - Initial attestation implementation

use bytes::{Bytes, BytesMut};
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::debug;

use snap2p_common::time::Timestamp;
use snap2p_common::types::Principal;

use crate::crypto::keys::ed25519_to_x25519;
use crate::error::{CoreError, Result};
use crate::identity::address::principal_for_public_key;
use crate::identity::wallet::{recover_public_key, Wallet, RECOVERABLE_SIGNATURE_SIZE};
use crate::protocol::codec::{put_bytes, put_int, put_map_header, put_text, put_uint, Decoder};

// ============================================
// Constants
// ============================================

/// Fixed domain-separation literal signed into every attestation.
pub const ATTESTATION_DOMAIN: &str = "snap2p-nodekey-attestation-v1";

/// Attestation format version.
pub const ATTESTATION_VERSION: u64 = 1;

/// Minimum nonce length in bytes.
pub const ATTESTATION_NONCE_MIN: usize = 16;

/// Maximum nonce length in bytes.
pub const ATTESTATION_NONCE_MAX: usize = 32;

/// Default validity window for freshly built attestations (24 h).
pub const DEFAULT_VALIDITY_SECS: i64 = 24 * 60 * 60;

// ============================================
// NodeKeyAttestation
// ============================================

/// Wallet-signed binding of a principal to a node public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeKeyAttestation {
    /// Format version (always 1).
    pub version: u64,
    /// The attesting principal.
    pub principal: Principal,
    /// The Ed25519 node public key being attested.
    pub node_public_key: [u8; 32],
    /// Issue time (Unix seconds).
    pub timestamp: Timestamp,
    /// Expiry time (Unix seconds); must be after `timestamp`.
    pub expires_at: Timestamp,
    /// Random nonce (16-32 bytes; 32 when generated here).
    pub nonce: Vec<u8>,
    /// Domain-separation string (must equal [`ATTESTATION_DOMAIN`]).
    pub domain: String,
    /// 65-byte RSV recoverable wallet signature.
    pub signature: [u8; RECOVERABLE_SIGNATURE_SIZE],
}

impl NodeKeyAttestation {
    /// Builds and signs an attestation for `node_public_key`.
    ///
    /// # Errors
    /// Returns `WalletSigning` if the wallet refuses to sign.
    pub fn build(
        wallet: &dyn Wallet,
        node_public_key: [u8; 32],
        validity_secs: i64,
    ) -> Result<Self> {
        let timestamp = Timestamp::now();
        let mut nonce = vec![0u8; ATTESTATION_NONCE_MAX];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let mut attestation = Self {
            version: ATTESTATION_VERSION,
            principal: wallet.principal().clone(),
            node_public_key,
            timestamp,
            expires_at: Timestamp::from_secs(timestamp.as_secs() + validity_secs),
            nonce,
            domain: ATTESTATION_DOMAIN.to_owned(),
            signature: [0u8; RECOVERABLE_SIGNATURE_SIZE],
        };

        attestation.signature = wallet.sign(&attestation.signing_payload())?;
        Ok(attestation)
    }

    /// Canonical bytes covered by the wallet signature (all fields
    /// except `sig`).
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(160);
        self.encode_fields(&mut buf, false);
        buf.to_vec()
    }

    /// Serializes the attestation including the signature.
    #[must_use]
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        self.encode_fields(&mut buf, true);
        buf.freeze()
    }

    /// Writes the canonical map; keys in byte order:
    /// domain, exp, nonce, npk, p, [sig,] ts, v.
    fn encode_fields(&self, buf: &mut BytesMut, with_signature: bool) {
        put_map_header(buf, 7 + usize::from(with_signature));
        put_text(buf, "domain");
        put_text(buf, &self.domain);
        put_text(buf, "exp");
        put_int(buf, self.expires_at.as_secs());
        put_text(buf, "nonce");
        put_bytes(buf, &self.nonce);
        put_text(buf, "npk");
        put_bytes(buf, &self.node_public_key);
        put_text(buf, "p");
        put_text(buf, self.principal.as_str());
        if with_signature {
            put_text(buf, "sig");
            put_bytes(buf, &self.signature);
        }
        put_text(buf, "ts");
        put_int(buf, self.timestamp.as_secs());
        put_text(buf, "v");
        put_uint(buf, self.version);
    }

    /// Deserializes an attestation from its canonical bytes.
    ///
    /// Tolerates unknown fields; missing fields are rejected.
    ///
    /// # Errors
    /// Returns `AttestationInvalid` for anything that does not parse
    /// into the v1 structure.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut d = Decoder::new(bytes);
        let entries = d
            .read_map_len()
            .map_err(|_| CoreError::attestation("not a canonical map"))?;

        let mut version = None;
        let mut principal = None;
        let mut node_public_key = None;
        let mut timestamp = None;
        let mut expires_at = None;
        let mut nonce = None;
        let mut domain = None;
        let mut signature = None;

        let invalid = |what: &str| CoreError::attestation(format!("malformed field '{what}'"));

        for _ in 0..entries {
            let key = d.read_text().map_err(|_| invalid("key"))?;
            match key {
                "v" => version = Some(d.read_uint().map_err(|_| invalid("v"))?),
                "p" => {
                    let raw = d.read_text().map_err(|_| invalid("p"))?;
                    principal = Some(
                        Principal::parse(raw)
                            .map_err(|e| CoreError::attestation(format!("principal: {e}")))?,
                    );
                }
                "npk" => {
                    node_public_key =
                        Some(d.read_bytes_fixed::<32>().map_err(|_| invalid("npk"))?);
                }
                "ts" => {
                    timestamp =
                        Some(Timestamp::from_secs(d.read_int().map_err(|_| invalid("ts"))?));
                }
                "exp" => {
                    expires_at =
                        Some(Timestamp::from_secs(d.read_int().map_err(|_| invalid("exp"))?));
                }
                "nonce" => {
                    nonce = Some(d.read_bytes().map_err(|_| invalid("nonce"))?.to_vec());
                }
                "domain" => {
                    domain = Some(d.read_text().map_err(|_| invalid("domain"))?.to_owned());
                }
                "sig" => {
                    signature = Some(
                        d.read_bytes_fixed::<RECOVERABLE_SIGNATURE_SIZE>()
                            .map_err(|_| invalid("sig"))?,
                    );
                }
                _ => d.skip_value().map_err(|_| invalid("unknown"))?,
            }
        }

        let missing = |what: &str| CoreError::attestation(format!("missing field '{what}'"));
        Ok(Self {
            version: version.ok_or_else(|| missing("v"))?,
            principal: principal.ok_or_else(|| missing("p"))?,
            node_public_key: node_public_key.ok_or_else(|| missing("npk"))?,
            timestamp: timestamp.ok_or_else(|| missing("ts"))?,
            expires_at: expires_at.ok_or_else(|| missing("exp"))?,
            nonce: nonce.ok_or_else(|| missing("nonce"))?,
            domain: domain.ok_or_else(|| missing("domain"))?,
            signature: signature.ok_or_else(|| missing("sig"))?,
        })
    }

    // ========================================
    // Verification
    // ========================================

    /// Structural verification against the given reference time.
    ///
    /// # Errors
    /// - `AttestationExpired` when the expiry is unambiguously past
    /// - `AttestationInvalid` for every other structural violation
    pub fn verify_structure(&self, now: Timestamp) -> Result<()> {
        if self.version != ATTESTATION_VERSION {
            return Err(CoreError::attestation(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if self.domain != ATTESTATION_DOMAIN {
            return Err(CoreError::attestation("domain mismatch"));
        }
        if self.nonce.len() < ATTESTATION_NONCE_MIN || self.nonce.len() > ATTESTATION_NONCE_MAX {
            return Err(CoreError::attestation(format!(
                "nonce length {} not in [{ATTESTATION_NONCE_MIN}, {ATTESTATION_NONCE_MAX}]",
                self.nonce.len()
            )));
        }
        if self.expires_at <= self.timestamp {
            return Err(CoreError::attestation("expiry not after issue time"));
        }
        if self.timestamp.is_in_future_at(now) {
            return Err(CoreError::attestation("issued in the future"));
        }
        if self.expires_at.is_expired_at(now) {
            return Err(CoreError::AttestationExpired);
        }
        if self.signature.iter().all(|b| *b == 0) {
            return Err(CoreError::attestation("signature missing"));
        }
        Ok(())
    }

    /// Full verification: structure plus issuer recovery.
    ///
    /// Re-encodes the payload without `sig`, recovers the secp256k1
    /// signer, derives its address for the configured network and
    /// requires equality with the claimed principal.
    ///
    /// # Errors
    /// Propagates structural errors; signature or address mismatches
    /// surface as `AttestationInvalid`.
    pub fn verify(&self, now: Timestamp, testnet: bool) -> Result<()> {
        self.verify_structure(now)?;

        let payload = self.signing_payload();
        let recovered = recover_public_key(&payload, &self.signature)
            .map_err(|_| CoreError::attestation("signature recovery failed"))?;
        let derived = principal_for_public_key(&recovered, testnet)
            .map_err(|_| CoreError::attestation("address derivation failed"))?;

        if derived != self.principal {
            return Err(CoreError::attestation(
                "recovered signer does not match principal",
            ));
        }
        debug!(principal = %self.principal, "attestation verified");
        Ok(())
    }

    /// Node-key binding check against the Noise remote static key.
    ///
    /// Converts the attested Ed25519 key to X25519 and compares it in
    /// constant time with the key that authenticated the channel.
    ///
    /// # Errors
    /// Returns `AttestationInvalid` (reason mentions "binding") on
    /// mismatch - the attestation is for a different node key.
    pub fn verify_node_key_binding(&self, noise_remote_static: &[u8; 32]) -> Result<()> {
        let converted = ed25519_to_x25519(&self.node_public_key)
            .map_err(|_| CoreError::attestation("node key is not a valid Ed25519 point"))?;
        if !bool::from(converted.ct_eq(noise_remote_static)) {
            return Err(CoreError::attestation(
                "node key binding mismatch: attested key differs from channel static key",
            ));
        }
        Ok(())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::NodeKeyPair;
    use crate::identity::wallet::MemoryWallet;

    fn build_attestation() -> (MemoryWallet, NodeKeyPair, NodeKeyAttestation) {
        let wallet = MemoryWallet::generate(false);
        let node = NodeKeyPair::generate();
        let att =
            NodeKeyAttestation::build(&wallet, node.public_key_bytes(), DEFAULT_VALIDITY_SECS)
                .unwrap();
        (wallet, node, att)
    }

    #[test]
    fn test_build_and_verify() {
        let (_, _, att) = build_attestation();
        att.verify(Timestamp::now(), false).unwrap();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let (_, _, att) = build_attestation();
        let bytes = att.serialize();
        let restored = NodeKeyAttestation::deserialize(&bytes).unwrap();
        assert_eq!(att, restored);

        // Canonical: re-serialization is byte-identical.
        assert_eq!(bytes, restored.serialize());
    }

    #[test]
    fn test_verify_after_roundtrip() {
        let (_, _, att) = build_attestation();
        let restored = NodeKeyAttestation::deserialize(&att.serialize()).unwrap();
        restored.verify(Timestamp::now(), false).unwrap();
    }

    #[test]
    fn test_wrong_network_rejected() {
        let (_, _, att) = build_attestation();
        assert!(matches!(
            att.verify(Timestamp::now(), true),
            Err(CoreError::AttestationInvalid { .. })
        ));
    }

    #[test]
    fn test_tampered_field_breaks_signature() {
        let (_, _, mut att) = build_attestation();
        att.node_public_key[0] ^= 0x01;
        assert!(matches!(
            att.verify(Timestamp::now(), false),
            Err(CoreError::AttestationInvalid { .. })
        ));
    }

    #[test]
    fn test_foreign_wallet_signature_rejected() {
        let (_, _node, att) = build_attestation();
        let other = MemoryWallet::generate(false);

        // Re-sign the same payload with a different wallet but keep
        // the original principal claim.
        let mut forged = att.clone();
        forged.signature = other.sign(&forged.signing_payload()).unwrap();

        assert!(matches!(
            forged.verify(Timestamp::now(), false),
            Err(CoreError::AttestationInvalid { .. })
        ));
    }

    #[test]
    fn test_expiry_boundaries() {
        let (_, _, att) = build_attestation();
        let exp = att.expires_at.as_secs();

        // 299 s past expiry: still inside the skew grace.
        att.verify_structure(Timestamp::from_secs(exp + 299)).unwrap();

        // 300 s past expiry: unambiguously expired.
        assert!(matches!(
            att.verify_structure(Timestamp::from_secs(exp + 300)),
            Err(CoreError::AttestationExpired)
        ));
    }

    #[test]
    fn test_future_issue_boundaries() {
        let (_, _, att) = build_attestation();
        let ts = att.timestamp.as_secs();

        // Verifier clock 300 s behind the issuer is tolerated.
        att.verify_structure(Timestamp::from_secs(ts - 300)).unwrap();

        // 301 s behind is not.
        assert!(matches!(
            att.verify_structure(Timestamp::from_secs(ts - 301)),
            Err(CoreError::AttestationInvalid { .. })
        ));
    }

    #[test]
    fn test_nonce_length_bounds() {
        let (wallet, _, att) = build_attestation();

        for (len, ok) in [(15usize, false), (16, true), (32, true), (33, false)] {
            let mut candidate = att.clone();
            candidate.nonce = vec![0x5a; len];
            candidate.signature = wallet.sign(&candidate.signing_payload()).unwrap();
            assert_eq!(
                candidate.verify(Timestamp::now(), false).is_ok(),
                ok,
                "nonce length {len}"
            );
        }
    }

    #[test]
    fn test_domain_mismatch_rejected() {
        let (wallet, _, att) = build_attestation();
        let mut candidate = att;
        candidate.domain = "snap2p-nodekey-attestation-v2".into();
        candidate.signature = wallet.sign(&candidate.signing_payload()).unwrap();
        assert!(matches!(
            candidate.verify(Timestamp::now(), false),
            Err(CoreError::AttestationInvalid { .. })
        ));
    }

    #[test]
    fn test_node_key_binding() {
        let (_, node, att) = build_attestation();

        att.verify_node_key_binding(&node.x25519_public_bytes()).unwrap();

        let other = NodeKeyPair::generate();
        let err = att
            .verify_node_key_binding(&other.x25519_public_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("binding"));
    }

    #[test]
    fn test_deserialize_tolerates_unknown_fields() {
        let (_, _, att) = build_attestation();

        // Append an unknown field in correct sort position by
        // rebuilding the map with an extra trailing "zz" entry.
        let mut buf = BytesMut::new();
        put_map_header(&mut buf, 9);
        put_text(&mut buf, "domain");
        put_text(&mut buf, &att.domain);
        put_text(&mut buf, "exp");
        put_int(&mut buf, att.expires_at.as_secs());
        put_text(&mut buf, "nonce");
        put_bytes(&mut buf, &att.nonce);
        put_text(&mut buf, "npk");
        put_bytes(&mut buf, &att.node_public_key);
        put_text(&mut buf, "p");
        put_text(&mut buf, att.principal.as_str());
        put_text(&mut buf, "sig");
        put_bytes(&mut buf, &att.signature);
        put_text(&mut buf, "ts");
        put_int(&mut buf, att.timestamp.as_secs());
        put_text(&mut buf, "v");
        put_uint(&mut buf, att.version);
        put_text(&mut buf, "zz");
        put_text(&mut buf, "future");

        let restored = NodeKeyAttestation::deserialize(&buf).unwrap();
        assert_eq!(att, restored);
        restored.verify(Timestamp::now(), false).unwrap();
    }
}
