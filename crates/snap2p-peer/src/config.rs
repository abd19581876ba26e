// ============================================
// File: crates/snap2p-peer/src/config.rs
// ============================================
//! # Peer Configuration
//!
//! ## Creation Reason
//! Centralizes every tunable of the session engine with protocol
//! defaults, builder-style setters, and startup validation.
//!
//! ## Main Functionality
//! - `PeerConfig`: main configuration structure
//! - `RateLimitConfig`: per-IP accept limits with visibility defaults
//! - `InviteTokenConfig`: defaults for generated invite tokens
//!
//! ## Defaults
//! | Setting | Default |
//! |---------|---------|
//! | handshake timeout | 30 s |
//! | dial timeout | 10 s |
//! | keepalive interval / ack timeout | 30 s / 10 s |
//! | max streams per session | 100 |
//! | stream read high-water mark | 64 KiB |
//! | rate limit | 5/min stealth, 30/min private, none public |
//! | invite token expiry | 24 h |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Validation happens in `Peer::new`; keep `validate()` total
//! - A zero keepalive interval disables the keepalive loop entirely
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use snap2p_common::types::{PrincipalSet, Visibility};

use crate::error::{PeerError, Result};

// ============================================
// RateLimitConfig
// ============================================

/// Sliding-window accept limit applied per remote IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum accepted connections per window.
    pub max_per_window: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimitConfig {
    /// One-minute window with the given budget.
    #[must_use]
    pub const fn per_minute(max: u32) -> Self {
        Self {
            max_per_window: max,
            window: Duration::from_secs(60),
        }
    }

    /// Default limit for a visibility level: 5/min for stealth,
    /// 30/min for private, none for public.
    #[must_use]
    pub const fn default_for(visibility: Visibility) -> Option<Self> {
        match visibility {
            Visibility::Public => None,
            Visibility::Private => Some(Self::per_minute(30)),
            Visibility::Stealth => Some(Self::per_minute(5)),
        }
    }
}

// ============================================
// InviteTokenConfig
// ============================================

/// Defaults applied to generated invite tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteTokenConfig {
    /// Lifetime of a generated token.
    pub expiry: Duration,
    /// Optional cap on total uses.
    pub max_uses: Option<u32>,
    /// Remove the token after its first successful use.
    pub single_use: bool,
}

impl Default for InviteTokenConfig {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(24 * 60 * 60),
            max_uses: None,
            single_use: false,
        }
    }
}

// ============================================
// PeerConfig
// ============================================

/// Configuration for a [`crate::Peer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Visibility policy for the local listener.
    pub visibility: Visibility,

    /// Derive principals for the test network instead of mainnet.
    pub testnet: bool,

    /// Principals allowed to connect; `None` disables the gate.
    pub allowlist: Option<PrincipalSet>,

    /// Per-read deadline during the handshake.
    pub handshake_timeout: Duration,

    /// TCP connect deadline for dials.
    pub dial_timeout: Duration,

    /// Maximum concurrent streams per session.
    pub max_streams_per_session: usize,

    /// PING interval; zero disables keepalive (incoming PINGs are
    /// still answered).
    pub keepalive_interval: Duration,

    /// Deadline for the matching PONG before the session is torn down.
    pub keepalive_timeout: Duration,

    /// Per-stream read buffer high-water mark in bytes.
    pub stream_high_water: usize,

    /// Capability strings advertised in HELLO.
    pub capabilities: Vec<String>,

    /// Accept rate limit; `None` falls back to the visibility default.
    pub rate_limit: Option<RateLimitConfig>,

    /// Defaults for generated invite tokens (STEALTH only).
    pub invite_tokens: InviteTokenConfig,

    /// Attestation validity in seconds.
    pub attestation_validity_secs: i64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            visibility: Visibility::Public,
            testnet: false,
            allowlist: None,
            handshake_timeout: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(10),
            max_streams_per_session: 100,
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            stream_high_water: 64 * 1024,
            capabilities: Vec::new(),
            rate_limit: None,
            invite_tokens: InviteTokenConfig::default(),
            attestation_validity_secs: snap2p_core::identity::DEFAULT_VALIDITY_SECS,
        }
    }
}

impl PeerConfig {
    /// Creates a configuration with the given visibility and protocol
    /// defaults for everything else.
    #[must_use]
    pub fn new(visibility: Visibility) -> Self {
        Self {
            visibility,
            ..Self::default()
        }
    }

    /// Sets the testnet flag.
    #[must_use]
    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    /// Installs an allowlist.
    #[must_use]
    pub fn with_allowlist(mut self, allowlist: PrincipalSet) -> Self {
        self.allowlist = Some(allowlist);
        self
    }

    /// Overrides the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Overrides the per-session stream cap.
    #[must_use]
    pub fn with_max_streams(mut self, max: usize) -> Self {
        self.max_streams_per_session = max;
        self
    }

    /// Overrides the keepalive interval (zero disables).
    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Overrides the accept rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, limit: Option<RateLimitConfig>) -> Self {
        self.rate_limit = Some(limit.unwrap_or(RateLimitConfig {
            max_per_window: u32::MAX,
            window: Duration::from_secs(60),
        }));
        self
    }

    /// The effective accept rate limit for this configuration.
    #[must_use]
    pub fn effective_rate_limit(&self) -> Option<RateLimitConfig> {
        match self.rate_limit {
            Some(limit) if limit.max_per_window == u32::MAX => None,
            Some(limit) => Some(limit),
            None => RateLimitConfig::default_for(self.visibility),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `Config` for out-of-range settings.
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout.is_zero() {
            return Err(PeerError::config("handshake timeout must be non-zero"));
        }
        if self.dial_timeout.is_zero() {
            return Err(PeerError::config("dial timeout must be non-zero"));
        }
        if self.max_streams_per_session == 0 {
            return Err(PeerError::config("stream cap must be at least 1"));
        }
        if self.stream_high_water == 0 {
            return Err(PeerError::config("stream high-water mark must be non-zero"));
        }
        if !self.keepalive_interval.is_zero() && self.keepalive_timeout.is_zero() {
            return Err(PeerError::config("keepalive timeout must be non-zero"));
        }
        if self.attestation_validity_secs <= 0 {
            return Err(PeerError::config("attestation validity must be positive"));
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

    #[test]
    fn test_defaults_validate() {
        PeerConfig::default().validate().unwrap();
        PeerConfig::new(Visibility::Stealth).validate().unwrap();
    }

    #[test]
    fn test_visibility_rate_limits() {
        assert!(PeerConfig::new(Visibility::Public)
            .effective_rate_limit()
            .is_none());
        assert_eq!(
            PeerConfig::new(Visibility::Private)
                .effective_rate_limit()
                .unwrap()
                .max_per_window,
            30
        );
        assert_eq!(
            PeerConfig::new(Visibility::Stealth)
                .effective_rate_limit()
                .unwrap()
                .max_per_window,
            5
        );
    }

    #[test]
    fn test_rate_limit_override() {
        // Explicit limit wins over the visibility default.
        let cfg = PeerConfig::new(Visibility::Public)
            .with_rate_limit(Some(RateLimitConfig::per_minute(2)));
        assert_eq!(cfg.effective_rate_limit().unwrap().max_per_window, 2);

        // Explicit None disables even the stealth default.
        let cfg = PeerConfig::new(Visibility::Stealth).with_rate_limit(None);
        assert!(cfg.effective_rate_limit().is_none());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut cfg = PeerConfig::default();
        cfg.max_streams_per_session = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PeerConfig::default();
        cfg.handshake_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = PeerConfig::default();
        cfg.keepalive_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }
}
