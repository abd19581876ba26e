// ============================================
// File: crates/snap2p-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types specific to protocol and cryptographic operations
//! in the snap2p core crate.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//!
//! ## Error Categories
//! 1. **Framing/Codec Errors**: Varint, frame-size, map-encoding failures
//! 2. **Crypto Errors**: Noise handshake, AEAD, key conversion failures
//! 3. **Attestation Errors**: Structural, signature, and binding failures
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - AEAD failures are deliberately detail-free (no oracle)
//! - All errors should be loggable without leaking secrets
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use snap2p_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for protocol and cryptographic operations.
///
/// # Security Note
/// Error messages are designed to be informative for debugging
/// without revealing sensitive information like key material.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Framing & Codec Errors
    // ========================================

    /// Length-prefix varint exceeds the 28-bit limit.
    #[error("Varint too large: more than 28 bits")]
    VarintTooLarge,

    /// Frame exceeds the maximum allowed size.
    #[error("Frame too large: {size} bytes exceeds {max}")]
    FrameTooLarge {
        /// Declared frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Message bytes are malformed or truncated.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// What's wrong with the message
        reason: String,
    },

    /// Unknown or unsupported message tag.
    #[error("Unsupported message tag: 0x{0:02x}")]
    UnsupportedTag(u64),

    /// Protocol version mismatch.
    #[error("Unsupported protocol version: {got}, expected {expected}")]
    UnsupportedVersion {
        /// Version received
        got: u32,
        /// Version expected
        expected: u32,
    },

    // ========================================
    // Cryptographic Errors
    // ========================================

    /// Failed to generate or convert cryptographic key material.
    #[error("Key error: {context}")]
    Key {
        /// What key operation failed
        context: String,
    },

    /// Noise handshake failure (state machine or authentication).
    #[error("Noise handshake failed: {reason}")]
    Handshake {
        /// Why the handshake failed
        reason: String,
    },

    /// AEAD decryption failed (authentication error).
    #[error("Decryption failed: authentication error")]
    Decryption,

    /// AEAD encryption failed.
    #[error("Encryption failed")]
    Encryption,

    /// Directional nonce counter is exhausted; the session must be
    /// re-established.
    #[error("AEAD nonce exhausted")]
    NonceExhausted,

    // ========================================
    // Attestation Errors
    // ========================================

    /// Attestation failed structural or cryptographic verification.
    #[error("Attestation invalid: {reason}")]
    AttestationInvalid {
        /// Which check failed
        reason: String,
    },

    /// Attestation expiry passed (clock-skew adjusted).
    #[error("Attestation expired")]
    AttestationExpired,

    /// Wallet signing operation failed.
    #[error("Wallet signing failed: {reason}")]
    WalletSigning {
        /// Why signing failed
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from the common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates a `Key` error.
    pub fn key(context: impl Into<String>) -> Self {
        Self::Key {
            context: context.into(),
        }
    }

    /// Creates a `Handshake` error.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    /// Creates an `AttestationInvalid` error.
    pub fn attestation(reason: impl Into<String>) -> Self {
        Self::AttestationInvalid {
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this is a cryptographic error.
    ///
    /// Crypto errors might indicate an attack or implementation bug.
    #[must_use]
    pub const fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::Key { .. }
                | Self::Handshake { .. }
                | Self::Decryption
                | Self::Encryption
                | Self::NonceExhausted
        )
    }

    /// Returns `true` if this is a wire-format error.
    #[must_use]
    pub const fn is_codec_error(&self) -> bool {
        matches!(
            self,
            Self::VarintTooLarge
                | Self::FrameTooLarge { .. }
                | Self::MalformedMessage { .. }
                | Self::UnsupportedTag(_)
                | Self::UnsupportedVersion { .. }
        )
    }

    /// Returns `true` if this error might indicate an attack.
    ///
    /// These errors warrant additional logging/monitoring.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::Decryption | Self::AttestationInvalid { .. } | Self::AttestationExpired
        )
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::UnsupportedTag(0x42);
        assert!(err.to_string().contains("0x42"));

        let err = CoreError::FrameTooLarge {
            size: 20_000_000,
            max: 16_777_216,
        };
        assert!(err.to_string().contains("20000000"));
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::Decryption.is_crypto_error());
        assert!(CoreError::Decryption.is_suspicious());

        assert!(CoreError::VarintTooLarge.is_codec_error());
        assert!(CoreError::attestation("bad domain").is_suspicious());
    }

    #[test]
    fn test_common_error_conversion() {
        let common = CommonError::invalid_input("field", "bad value");
        let core: CoreError = common.into();
        assert!(matches!(core, CoreError::Common(_)));
    }
}
