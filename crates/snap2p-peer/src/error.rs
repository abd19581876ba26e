// ============================================
// File: crates/snap2p-peer/src/error.rs
// ============================================
//! # Peer Error Types
//!
//! ## Creation Reason
//! Defines error types for the session engine and maps every failure
//! onto the wire-stable `ErrorCode` so AUTH_FAIL, ERROR and
//! CLOSE_STREAM frames always carry a defined kind.
//!
//! ## Main Functionality
//! - `PeerError`: primary error enum for peer operations
//! - `PeerError::kind()`: wire error-code mapping
//! - Wrapping of core/common/IO errors
//!
//! ## ⚠️ Important Note for Next Developer
//! - `kind()` is part of the protocol surface; keep the mapping total
//! - Remote AUTH_FAIL reasons are attacker-controlled strings - pass
//!   them through but never interpret them
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use snap2p_common::error::CommonError;
use snap2p_core::error::CoreError;
use snap2p_core::protocol::ErrorCode;

// ============================================
// Result Type Alias
// ============================================

/// Result type for peer operations.
pub type Result<T> = std::result::Result<T, PeerError>;

// ============================================
// PeerError
// ============================================

/// Error type for dialing, listening, handshaking and streams.
#[derive(Error, Debug)]
pub enum PeerError {
    // ========================================
    // Handshake & Policy Errors
    // ========================================

    /// Handshake failed locally (Noise, validation, or protocol flow).
    #[error("Handshake failed: {reason}")]
    HandshakeFailed {
        /// Why the handshake failed
        reason: String,
    },

    /// Remote rejected authentication with AUTH_FAIL.
    #[error("Authentication rejected by peer: {code}, reason: {reason:?}")]
    AuthRejected {
        /// Error code carried in AUTH_FAIL
        code: ErrorCode,
        /// Optional reason string from the peer
        reason: Option<String>,
    },

    /// Remote principal is not in the local allowlist.
    #[error("Principal not allowed")]
    NotAllowed,

    /// STEALTH listener requires a KNOCK with an invite token.
    #[error("Invite token required")]
    InviteRequired,

    /// Invite token was not recognized, expired, or exhausted.
    #[error("Invalid invite token")]
    InvalidToken,

    /// A control message failed validation.
    #[error("Invalid message: {reason}")]
    InvalidMessage {
        /// What was wrong
        reason: String,
    },

    // ========================================
    // Transport Errors
    // ========================================

    /// The connection or session is closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An I/O operation failed.
    #[error("I/O error: {context}")]
    Io {
        /// What operation was being performed
        context: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// An operation exceeded its deadline.
    #[error("Timed out: {operation}")]
    Timeout {
        /// What operation timed out
        operation: String,
    },

    /// The locator's transport is not dialable.
    #[error("Unsupported transport: {transport}")]
    UnsupportedTransport {
        /// Scheme that cannot be dialed
        transport: String,
    },

    // ========================================
    // Stream Errors
    // ========================================

    /// Stream id already in use on this session.
    #[error("Stream {0} already in use")]
    StreamIdInUse(u64),

    /// No stream with this id.
    #[error("Stream {0} not found")]
    StreamNotFound(u64),

    /// The stream is closed.
    #[error("Stream {0} closed")]
    StreamClosed(u64),

    /// Remote closed the stream with an error code.
    #[error("Stream {stream_id} failed: {code}")]
    StreamError {
        /// Affected stream id
        stream_id: u64,
        /// Error code from CLOSE_STREAM
        code: ErrorCode,
    },

    /// Per-session stream cap reached.
    #[error("Stream limit reached: {limit}")]
    ResourceExhausted {
        /// The configured cap
        limit: usize,
    },

    // ========================================
    // Configuration Errors
    // ========================================

    /// Invalid peer configuration.
    #[error("Invalid configuration: {reason}")]
    Config {
        /// What is wrong with the configuration
        reason: String,
    },

    /// Invite-token APIs are only available in STEALTH visibility.
    #[error("Invite tokens require stealth visibility")]
    InviteTokensUnavailable,

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from the core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from the common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl PeerError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `HandshakeFailed` error.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidMessage` error.
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a `Config` error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    // ========================================
    // Wire Mapping
    // ========================================

    /// Maps this error onto the wire-stable [`ErrorCode`].
    #[must_use]
    pub fn kind(&self) -> ErrorCode {
        match self {
            Self::HandshakeFailed { .. } => ErrorCode::HandshakeFailed,
            Self::AuthRejected { code, .. } => *code,
            Self::NotAllowed => ErrorCode::NotAllowed,
            Self::InviteRequired => ErrorCode::InviteRequired,
            Self::InvalidToken => ErrorCode::InvalidToken,
            Self::InvalidMessage { .. } => ErrorCode::InvalidMessage,
            Self::ConnectionClosed => ErrorCode::ConnectionClosed,
            Self::Io { .. } => ErrorCode::ConnectionClosed,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::UnsupportedTransport { .. } => ErrorCode::InvalidMessage,
            Self::StreamIdInUse(_) => ErrorCode::StreamIdInUse,
            Self::StreamNotFound(_) => ErrorCode::StreamNotFound,
            Self::StreamClosed(_) => ErrorCode::StreamClosed,
            Self::StreamError { code, .. } => *code,
            Self::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
            Self::Config { .. } => ErrorCode::Internal,
            Self::InviteTokensUnavailable => ErrorCode::Internal,
            Self::Core(core) => match core {
                CoreError::UnsupportedTag(_) | CoreError::UnsupportedVersion { .. } => {
                    ErrorCode::VersionUnsupported
                }
                CoreError::FrameTooLarge { .. } => ErrorCode::MessageTooLarge,
                CoreError::VarintTooLarge | CoreError::MalformedMessage { .. } => {
                    ErrorCode::InvalidMessage
                }
                CoreError::AttestationExpired => ErrorCode::AttestationExpired,
                CoreError::AttestationInvalid { .. } => ErrorCode::AttestationInvalid,
                CoreError::Handshake { .. } => ErrorCode::HandshakeFailed,
                CoreError::Decryption | CoreError::Encryption | CoreError::NonceExhausted => {
                    ErrorCode::ConnectionClosed
                }
                _ => ErrorCode::Internal,
            },
            Self::Common(common) => match common {
                CommonError::Timeout { .. } => ErrorCode::Timeout,
                CommonError::Io { .. } => ErrorCode::ConnectionClosed,
                _ => ErrorCode::InvalidMessage,
            },
        }
    }

    /// Builds the local error for a remote AUTH_FAIL.
    #[must_use]
    pub fn from_auth_fail(code: ErrorCode, reason: Option<String>) -> Self {
        match code {
            ErrorCode::NotAllowed => Self::NotAllowed,
            ErrorCode::InviteRequired => Self::InviteRequired,
            ErrorCode::InvalidToken => Self::InvalidToken,
            _ => Self::AuthRejected { code, reason },
        }
    }
}

impl From<std::io::Error> for PeerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            context: "socket".into(),
            source: err,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(PeerError::NotAllowed.kind(), ErrorCode::NotAllowed);
        assert_eq!(PeerError::InvalidToken.kind(), ErrorCode::InvalidToken);
        assert_eq!(
            PeerError::StreamIdInUse(2).kind(),
            ErrorCode::StreamIdInUse
        );
        assert_eq!(
            PeerError::Core(CoreError::UnsupportedTag(0x50)).kind(),
            ErrorCode::VersionUnsupported
        );
        assert_eq!(
            PeerError::Core(CoreError::AttestationExpired).kind(),
            ErrorCode::AttestationExpired
        );
    }

    #[test]
    fn test_from_auth_fail() {
        assert!(matches!(
            PeerError::from_auth_fail(ErrorCode::NotAllowed, None),
            PeerError::NotAllowed
        ));
        assert!(matches!(
            PeerError::from_auth_fail(ErrorCode::AttestationInvalid, Some("x".into())),
            PeerError::AuthRejected { .. }
        ));
    }
}
