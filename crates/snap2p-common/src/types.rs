// ============================================
// File: crates/snap2p-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the fundamental identity and addressing types used
//! throughout the snap2p session protocol, ensuring every value is
//! constructed through validation.
//!
//! ## Main Functionality
//! - `Principal`: Scheme-prefixed wallet address (`stacks:S...`)
//! - `Locator`: Dialable endpoint (transport + host + port)
//! - `SessionId`: Unique identifier for active sessions (32 bytes)
//! - `Visibility`: Peer visibility policy (closed enum)
//!
//! ## Main Logical Flow
//! 1. Types are created during configuration or handshake
//! 2. Used as keys in session registries and allowlists
//! 3. Serialized for display, logging, and wire transmission
//!
//! ## ⚠️ Important Note for Next Developer
//! - `Principal` equality is structural; construction only via parse
//! - `SessionId` is security-critical - always use secure random
//! - `Visibility` wire codes are part of the protocol, do not reorder
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Size of a `SessionId` in bytes.
pub const SESSION_ID_SIZE: usize = 32;

/// Scheme prefix for principal addresses.
pub const PRINCIPAL_SCHEME: &str = "stacks:";

/// Minimum length of the address part of a principal (after `S`).
const PRINCIPAL_ADDR_MIN: usize = 40;

/// Maximum length of the address part of a principal.
const PRINCIPAL_ADDR_MAX: usize = 41;

// ============================================
// Principal
// ============================================

/// Canonical user identity: a scheme-prefixed wallet address string.
///
/// # Format
/// `stacks:<ADDR>` where `<ADDR>` matches `^S[A-Z0-9]{39,40}$`.
///
/// # Invariants
/// - Immutable once constructed
/// - Only constructed through validating parse
/// - Equality and hashing are structural (string equality)
///
/// # Example
/// ```
/// use snap2p_common::types::Principal;
///
/// let p: Principal = "stacks:SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7"
///     .parse()
///     .unwrap();
/// assert_eq!(p.addr().chars().next(), Some('S'));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal(String);

impl Principal {
    /// Parses and validates a principal string.
    ///
    /// # Errors
    /// Returns `CommonError::Parse` if the scheme is missing, the
    /// address does not start with `S`, the length is out of range,
    /// or a character is not an uppercase alphanumeric.
    pub fn parse(s: &str) -> Result<Self, CommonError> {
        let addr = s
            .strip_prefix(PRINCIPAL_SCHEME)
            .ok_or_else(|| CommonError::parse("principal", "missing 'stacks:' scheme"))?;

        if !addr.starts_with('S') {
            return Err(CommonError::parse("principal", "address must start with 'S'"));
        }
        if addr.len() < PRINCIPAL_ADDR_MIN || addr.len() > PRINCIPAL_ADDR_MAX {
            return Err(CommonError::parse(
                "principal",
                format!(
                    "address length {} not in [{}, {}]",
                    addr.len(),
                    PRINCIPAL_ADDR_MIN,
                    PRINCIPAL_ADDR_MAX
                ),
            ));
        }
        if !addr.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
            return Err(CommonError::parse(
                "principal",
                "address contains non-uppercase-alphanumeric characters",
            ));
        }

        Ok(Self(s.to_owned()))
    }

    /// Builds a principal from a bare address (no scheme prefix).
    ///
    /// # Errors
    /// Same validation as [`Principal::parse`].
    pub fn from_addr(addr: &str) -> Result<Self, CommonError> {
        Self::parse(&format!("{PRINCIPAL_SCHEME}{addr}"))
    }

    /// Returns the full principal string including the scheme.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the address part (after the `stacks:` scheme).
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.0[PRINCIPAL_SCHEME.len()..]
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Principal {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Principal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Set of principals allowed to connect (allowlist).
pub type PrincipalSet = HashSet<Principal>;

// ============================================
// TransportKind & Locator
// ============================================

/// Transport protocol for a [`Locator`].
///
/// Only `tcp` is dialable today; `quic` is reserved and parses but is
/// rejected at connection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP transport.
    Tcp,
    /// QUIC transport (reserved).
    Quic,
}

impl TransportKind {
    /// Returns the URI scheme for this transport.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Quic => "quic",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Dialable endpoint: transport, host, port, and optionally the
/// expected node public key.
///
/// # String Forms
/// - `host:port` (default transport `tcp`)
/// - `tcp://host:port`
/// - `quic://host:port`
///
/// Port must be in `1..=65535`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    /// Transport protocol.
    pub transport: TransportKind,
    /// Host name or IP address.
    pub host: String,
    /// TCP/UDP port (1-65535).
    pub port: u16,
    /// Expected remote node public key (32 bytes), when known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub node_public_key: Option<[u8; 32]>,
}

impl Locator {
    /// Creates a TCP locator.
    ///
    /// # Errors
    /// Returns `CommonError::OutOfRange` if `port` is zero.
    pub fn tcp(host: impl Into<String>, port: u16) -> Result<Self, CommonError> {
        if port == 0 {
            return Err(CommonError::OutOfRange {
                value: "0".into(),
                min: "1".into(),
                max: "65535".into(),
            });
        }
        Ok(Self {
            transport: TransportKind::Tcp,
            host: host.into(),
            port,
            node_public_key: None,
        })
    }

    /// Attaches the expected node public key.
    #[must_use]
    pub fn with_node_public_key(mut self, key: [u8; 32]) -> Self {
        self.node_public_key = Some(key);
        self
    }

    /// Returns the `host:port` authority string used for socket address
    /// resolution.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport, self.host, self.port)
    }
}

impl FromStr for Locator {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (transport, rest) = if let Some(rest) = s.strip_prefix("tcp://") {
            (TransportKind::Tcp, rest)
        } else if let Some(rest) = s.strip_prefix("quic://") {
            (TransportKind::Quic, rest)
        } else if s.contains("://") {
            return Err(CommonError::parse("locator", "unknown transport scheme"));
        } else {
            (TransportKind::Tcp, s)
        };

        let (host, port_str) = rest
            .rsplit_once(':')
            .ok_or_else(|| CommonError::parse("locator", "missing ':port'"))?;
        if host.is_empty() {
            return Err(CommonError::parse("locator", "empty host"));
        }

        let port: u16 = port_str
            .parse()
            .map_err(|_| CommonError::parse("locator", "invalid port"))?;
        if port == 0 {
            return Err(CommonError::OutOfRange {
                value: "0".into(),
                min: "1".into(),
                max: "65535".into(),
            });
        }

        Ok(Self {
            transport,
            host: host.to_owned(),
            port,
            node_public_key: None,
        })
    }
}

// ============================================
// SessionId
// ============================================

/// Unique identifier for an active session.
///
/// # Security Properties
/// - Generated with the OS cryptographically secure RNG
/// - Fixed 32-byte size (256 bits of entropy)
/// - Implements `Zeroize` for secure memory cleanup
///
/// # Example
/// ```
/// use snap2p_common::types::SessionId;
///
/// let id = SessionId::generate();
/// let restored = SessionId::from_bytes(id.as_bytes()).unwrap();
/// assert_eq!(id, restored);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Zeroize)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    /// Creates a `SessionId` from raw bytes.
    ///
    /// Returns `None` if the slice is not exactly 32 bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SESSION_ID_SIZE {
            return None;
        }
        let mut id = [0u8; SESSION_ID_SIZE];
        id.copy_from_slice(bytes);
        Some(Self(id))
    }

    /// Generates a new cryptographically random `SessionId`.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = [0u8; SESSION_ID_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut id);
        Self(id)
    }

    /// Returns the raw bytes of the session ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only show the first 4 bytes in debug output
        write!(
            f,
            "SessionId({:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for SessionId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            hex::decode(s).map_err(|e| CommonError::parse("session_id", e.to_string()))?;
        Self::from_bytes(&bytes)
            .ok_or(CommonError::invalid_length(SESSION_ID_SIZE, bytes.len()))
    }
}

impl AsRef<[u8]> for SessionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================
// Visibility
// ============================================

/// Visibility policy of a peer, sent in HELLO and enforced by the
/// listener.
///
/// # Wire Codes
/// | Code | Visibility |
/// |------|------------|
/// | 0 | Public |
/// | 1 | Private |
/// | 2 | Stealth |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Anyone may connect; no rate limiting by default.
    #[default]
    Public,
    /// Connections gated by the allowlist; moderate rate limiting.
    Private,
    /// Listener stays silent until a valid invite-token KNOCK arrives.
    Stealth,
}

impl Visibility {
    /// Converts a wire code to a `Visibility`.
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Public),
            1 => Some(Self::Private),
            2 => Some(Self::Stealth),
            _ => None,
        }
    }

    /// Returns the wire code for this visibility.
    #[must_use]
    pub const fn code(&self) -> u64 {
        match self {
            Self::Public => 0,
            Self::Private => 1,
            Self::Stealth => 2,
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Private => f.write_str("private"),
            Self::Stealth => f.write_str("stealth"),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_ADDR: &str = "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7";

    #[test]
    fn test_principal_parse_valid() {
        let p = Principal::parse(&format!("stacks:{GOOD_ADDR}")).unwrap();
        assert_eq!(p.addr(), GOOD_ADDR);
        assert_eq!(p.to_string(), format!("stacks:{GOOD_ADDR}"));
    }

    #[test]
    fn test_principal_parse_rejects_bad_inputs() {
        // Missing scheme
        assert!(Principal::parse(GOOD_ADDR).is_err());
        // Wrong leading character
        assert!(Principal::parse("stacks:XP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7").is_err());
        // Too short
        assert!(Principal::parse("stacks:SP2J6ZY48").is_err());
        // Lowercase characters
        assert!(Principal::parse("stacks:Sp2j6zy48gv1ez5v2v5rb9mp66sw86pykknrv9ej7").is_err());
    }

    #[test]
    fn test_principal_structural_equality() {
        let a = Principal::parse(&format!("stacks:{GOOD_ADDR}")).unwrap();
        let b = Principal::parse(&format!("stacks:{GOOD_ADDR}")).unwrap();
        assert_eq!(a, b);

        let mut set = PrincipalSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_locator_parse_forms() {
        let bare: Locator = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(bare.transport, TransportKind::Tcp);
        assert_eq!(bare.port, 4000);

        let tcp: Locator = "tcp://example.com:9000".parse().unwrap();
        assert_eq!(tcp.transport, TransportKind::Tcp);
        assert_eq!(tcp.host, "example.com");

        let quic: Locator = "quic://example.com:9000".parse().unwrap();
        assert_eq!(quic.transport, TransportKind::Quic);
    }

    #[test]
    fn test_locator_parse_rejects_bad_inputs() {
        assert!("127.0.0.1".parse::<Locator>().is_err());
        assert!("127.0.0.1:0".parse::<Locator>().is_err());
        assert!("127.0.0.1:99999".parse::<Locator>().is_err());
        assert!("udp://host:1".parse::<Locator>().is_err());
        assert!(":4000".parse::<Locator>().is_err());
    }

    #[test]
    fn test_locator_display_roundtrip() {
        let loc: Locator = "tcp://127.0.0.1:4000".parse().unwrap();
        let reparsed: Locator = loc.to_string().parse().unwrap();
        assert_eq!(loc, reparsed);
    }

    #[test]
    fn test_session_id_generation() {
        let id1 = SessionId::generate();
        let id2 = SessionId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_bytes().len(), SESSION_ID_SIZE);
    }

    #[test]
    fn test_session_id_roundtrip() {
        let original = SessionId::generate();

        let restored = SessionId::from_bytes(original.as_bytes()).unwrap();
        assert_eq!(original, restored);

        let parsed: SessionId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_session_id_invalid_length() {
        assert!(SessionId::from_bytes(&[0u8; 16]).is_none());
        assert!(SessionId::from_bytes(&[0u8; 33]).is_none());
    }

    #[test]
    fn test_principal_json_roundtrip() {
        let p = Principal::parse(&format!("stacks:{GOOD_ADDR}")).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        let restored: Principal = serde_json::from_str(&json).unwrap();
        assert_eq!(p, restored);

        // Validation applies at deserialization time too.
        assert!(serde_json::from_str::<Principal>("\"stacks:short\"").is_err());
    }

    #[test]
    fn test_visibility_codes() {
        for vis in [Visibility::Public, Visibility::Private, Visibility::Stealth] {
            assert_eq!(Visibility::from_code(vis.code()), Some(vis));
        }
        assert_eq!(Visibility::from_code(3), None);
    }
}
