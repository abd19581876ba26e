// ============================================
// File: crates/snap2p-core/src/identity/address.rs
// ============================================
//! # Stacks Address Derivation
//!
//! ## Creation Reason
//! Derives the c32check-encoded single-sig address for a secp256k1
//! public key, so attestation verification can compare the recovered
//! signer against the claimed principal.
//!
//! ## Main Functionality
//! - `hash160`: RIPEMD-160 over SHA-256
//! - `c32_address`: version + hash160 → c32check address string
//! - `principal_for_public_key`: compressed pubkey → `Principal`
//!
//! ## Address Construction
//! ```text
//! hash160  = RIPEMD160(SHA256(compressed_pubkey))
//! checksum = SHA256(SHA256(version_byte || hash160))[0..4]
//! address  = 'S' || c32(version) || c32encode(hash160 || checksum)
//! ```
//!
//! Versions: 22 (`P`) for mainnet P2PKH, 26 (`T`) for testnet P2PKH,
//! giving the familiar `SP...` / `ST...` prefixes.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The c32 alphabet excludes I, L, O and U
//! - The payload encoding is padded to 38 digits so every derived
//!   address matches the canonical `^S[A-Z0-9]{39,40}$` form
//!
//! ## Last Modified
//! v0.1.0 - Initial address derivation

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use snap2p_common::types::Principal;

use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// The c32 alphabet (base32 without I, L, O, U).
const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Address version for mainnet single-sig (`SP...`).
pub const C32_VERSION_MAINNET_P2PKH: u8 = 22;

/// Address version for testnet single-sig (`ST...`).
pub const C32_VERSION_TESTNET_P2PKH: u8 = 26;

/// Minimum digit count of the encoded `hash160 || checksum` payload.
const ADDRESS_PAYLOAD_DIGITS: usize = 38;

// ============================================
// Hashing
// ============================================

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// RIPEMD-160 of SHA-256, the standard public-key hash.
#[must_use]
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(sha256(data)).into()
}

// ============================================
// c32 Encoding
// ============================================

/// Encodes bytes as a big-endian c32 number.
///
/// Leading zero bytes are preserved as single `0` digits; the result
/// is then left-padded with `0` digits up to `min_digits` (padding
/// does not change the decoded value).
fn c32_encode(data: &[u8], min_digits: usize) -> String {
    let zeros = data.iter().take_while(|b| **b == 0).count();

    // Repeated division of the remaining big-endian number by 32.
    let mut digits: Vec<u8> = Vec::new();
    let mut num: Vec<u8> = data[zeros..].to_vec();
    while !num.is_empty() {
        let mut rem: u32 = 0;
        let mut quotient: Vec<u8> = Vec::with_capacity(num.len());
        for &byte in &num {
            let acc = rem * 256 + u32::from(byte);
            let q = (acc / 32) as u8;
            rem = acc % 32;
            if !(quotient.is_empty() && q == 0) {
                quotient.push(q);
            }
        }
        digits.push(C32_ALPHABET[rem as usize]);
        num = quotient;
    }

    let mut out = String::with_capacity(min_digits.max(zeros + digits.len()));
    let body_len = zeros + digits.len();
    for _ in body_len..min_digits {
        out.push('0');
    }
    for _ in 0..zeros {
        out.push('0');
    }
    out.extend(digits.iter().rev().map(|&d| d as char));
    out
}

/// Builds a c32check address from a version byte and a hash160.
///
/// # Errors
/// Returns a `Key` error for version bytes outside the 5-bit range.
pub fn c32_address(version: u8, hash: &[u8; 20]) -> Result<String> {
    if version >= 32 {
        return Err(CoreError::key(format!("invalid c32 address version {version}")));
    }

    // Checksum covers the version byte followed by the hash.
    let mut check_input = Vec::with_capacity(21);
    check_input.push(version);
    check_input.extend_from_slice(hash);
    let checksum = sha256(&sha256(&check_input));

    let mut payload = Vec::with_capacity(24);
    payload.extend_from_slice(hash);
    payload.extend_from_slice(&checksum[..4]);

    Ok(format!(
        "S{}{}",
        C32_ALPHABET[version as usize] as char,
        c32_encode(&payload, ADDRESS_PAYLOAD_DIGITS)
    ))
}

// ============================================
// Principal Derivation
// ============================================

/// Derives the principal for a compressed secp256k1 public key on the
/// given network.
///
/// # Errors
/// Returns a `Key` error if the key is not 33 bytes or the derived
/// address fails principal validation.
pub fn principal_for_public_key(public_key: &[u8], testnet: bool) -> Result<Principal> {
    if public_key.len() != 33 {
        return Err(CoreError::key(format!(
            "expected 33-byte compressed public key, got {}",
            public_key.len()
        )));
    }
    let version = if testnet {
        C32_VERSION_TESTNET_P2PKH
    } else {
        C32_VERSION_MAINNET_P2PKH
    };
    let addr = c32_address(version, &hash160(public_key))?;
    Principal::from_addr(&addr)
        .map_err(|e| CoreError::key(format!("derived address rejected: {e}")))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash160_known_vector() {
        // RIPEMD160(SHA256("")) - a widely published vector.
        assert_eq!(
            hex::encode(hash160(b"")),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn test_c32_encode_zero_handling() {
        // Leading zero bytes become single '0' digits.
        let encoded = c32_encode(&[0x00, 0x00, 0x01], 0);
        assert_eq!(encoded, "001");
        // All-zero input is only the zero digits.
        assert_eq!(c32_encode(&[0x00; 3], 0), "000");
    }

    #[test]
    fn test_c32_encode_padding() {
        let encoded = c32_encode(&[0x01], 5);
        assert_eq!(encoded, "00001");
    }

    #[test]
    fn test_address_shape() {
        let addr = c32_address(C32_VERSION_MAINNET_P2PKH, &[0x11; 20]).unwrap();
        assert!(addr.starts_with("SP"));

        let addr = c32_address(C32_VERSION_TESTNET_P2PKH, &[0x11; 20]).unwrap();
        assert!(addr.starts_with("ST"));
    }

    #[test]
    fn test_address_is_valid_principal() {
        for seed in 0u8..16 {
            let addr = c32_address(C32_VERSION_MAINNET_P2PKH, &[seed; 20]).unwrap();
            Principal::from_addr(&addr).unwrap();
        }
        // Worst case: all-zero hash160 still yields a canonical-length
        // address thanks to payload padding.
        let addr = c32_address(C32_VERSION_MAINNET_P2PKH, &[0x00; 20]).unwrap();
        Principal::from_addr(&addr).unwrap();
    }

    #[test]
    fn test_address_deterministic() {
        let a = c32_address(22, &[0x42; 20]).unwrap();
        let b = c32_address(22, &[0x42; 20]).unwrap();
        assert_eq!(a, b);

        let c = c32_address(22, &[0x43; 20]).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalid_version_rejected() {
        assert!(c32_address(32, &[0u8; 20]).is_err());
    }

    #[test]
    fn test_principal_for_public_key_networks() {
        // Compressed generator point of secp256k1.
        let pk = hex::decode(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();

        let mainnet = principal_for_public_key(&pk, false).unwrap();
        let testnet = principal_for_public_key(&pk, true).unwrap();
        assert!(mainnet.addr().starts_with("SP"));
        assert!(testnet.addr().starts_with("ST"));
        assert_ne!(mainnet, testnet);

        // Wrong length is rejected.
        assert!(principal_for_public_key(&pk[..32], false).is_err());
    }
}
