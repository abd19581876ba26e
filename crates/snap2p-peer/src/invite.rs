// ============================================
// File: crates/snap2p-peer/src/invite.rs
// ============================================
//! # Invite Token Store
//!
//! ## Creation Reason
//! Backs the STEALTH KNOCK gate: a store of opaque secrets a listener
//! will accept before it speaks any other protocol byte.
//!
//! ## Main Functionality
//! - `InviteTokenStore`: generate/import/revoke/count/sweep
//! - `validate_and_consume`: constant-time lookup with use accounting
//!
//! ## Token Policy
//! Each token carries `{expires_at, use_count, max_uses?, single_use}`.
//! A successful validation increments the use count and removes the
//! token when it is single-use or its max-uses cap is reached.
//!
//! ## Timing Discipline
//! KNOCK arrives in plaintext from unauthenticated remotes, so lookup
//! walks the entire store and folds every comparison through
//! constant-time equality - no early exit on match, no length
//! shortcuts inside a comparison.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Tokens are secrets: never log them, never include them in errors
//! - The sweep only handles expiry; use-count removal happens inline
//!
//! ## Last Modified
//! v0.1.0 - Initial invite token store

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::RngCore;
use subtle::ConstantTimeEq;

use snap2p_core::protocol::messages::{INVITE_TOKEN_MAX, INVITE_TOKEN_MIN};

use crate::config::InviteTokenConfig;
use crate::error::{PeerError, Result};

// ============================================
// Token Entry
// ============================================

/// Options for one generated or imported token.
#[derive(Debug, Clone, Copy, Default)]
pub struct InviteTokenOptions {
    /// Override the configured default expiry.
    pub expiry: Option<Duration>,
    /// Override the configured max-uses cap.
    pub max_uses: Option<u32>,
    /// Override the configured single-use flag.
    pub single_use: Option<bool>,
}

#[derive(Debug)]
struct TokenEntry {
    token: Vec<u8>,
    expires_at_ms: u128,
    use_count: u32,
    max_uses: Option<u32>,
    single_use: bool,
}

impl TokenEntry {
    fn is_expired(&self, now_ms: u128) -> bool {
        now_ms >= self.expires_at_ms
    }

    fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.use_count >= max)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

// ============================================
// InviteTokenStore
// ============================================

/// Store of invite tokens for a STEALTH listener.
#[derive(Debug)]
pub struct InviteTokenStore {
    defaults: InviteTokenConfig,
    tokens: Mutex<Vec<TokenEntry>>,
}

impl InviteTokenStore {
    /// Creates an empty store with the given defaults.
    #[must_use]
    pub fn new(defaults: InviteTokenConfig) -> Self {
        Self {
            defaults,
            tokens: Mutex::new(Vec::new()),
        }
    }

    fn entry_from(&self, token: Vec<u8>, options: InviteTokenOptions) -> TokenEntry {
        let expiry = options.expiry.unwrap_or(self.defaults.expiry);
        TokenEntry {
            token,
            expires_at_ms: now_ms() + expiry.as_millis(),
            use_count: 0,
            max_uses: options.max_uses.or(self.defaults.max_uses),
            single_use: options.single_use.unwrap_or(self.defaults.single_use),
        }
    }

    /// Generates a random 32-byte token and stores it.
    #[must_use]
    pub fn generate(&self, options: InviteTokenOptions) -> Vec<u8> {
        let mut token = vec![0u8; INVITE_TOKEN_MAX];
        rand::rngs::OsRng.fill_bytes(&mut token);
        self.tokens
            .lock()
            .push(self.entry_from(token.clone(), options));
        token
    }

    /// Imports an externally-created token.
    ///
    /// # Errors
    /// Returns `InvalidToken` if the length is outside 16-32 bytes.
    pub fn import(&self, token: &[u8], options: InviteTokenOptions) -> Result<()> {
        if token.len() < INVITE_TOKEN_MIN || token.len() > INVITE_TOKEN_MAX {
            return Err(PeerError::InvalidToken);
        }
        self.tokens
            .lock()
            .push(self.entry_from(token.to_vec(), options));
        Ok(())
    }

    /// Removes a token; returns whether it was present.
    pub fn revoke(&self, token: &[u8]) -> bool {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|entry| !bool::from(entry.token.ct_eq(token)));
        tokens.len() != before
    }

    /// Number of stored (possibly expired) tokens.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Validates a presented token, consuming one use on success.
    ///
    /// Scans the whole store with constant-time comparisons, then
    /// applies expiry and use-count policy to the matched entry.
    /// Successful single-use or capped-out tokens are removed.
    #[must_use]
    pub fn validate_and_consume(&self, presented: &[u8]) -> bool {
        let now = now_ms();
        let mut tokens = self.tokens.lock();

        // Full scan, no early exit: every stored token is compared.
        let mut matched: Option<usize> = None;
        for (index, entry) in tokens.iter().enumerate() {
            let equal = bool::from(entry.token.ct_eq(presented));
            if equal {
                matched = Some(index);
            }
        }

        let Some(index) = matched else {
            return false;
        };

        let entry = &mut tokens[index];
        if entry.is_expired(now) || entry.is_exhausted() {
            return false;
        }

        entry.use_count += 1;
        if entry.single_use || entry.is_exhausted() {
            tokens.swap_remove(index);
        }
        true
    }

    /// Removes expired tokens; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|entry| !entry.is_expired(now));
        before - tokens.len()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InviteTokenStore {
        InviteTokenStore::new(InviteTokenConfig::default())
    }

    #[test]
    fn test_generate_and_validate() {
        let store = store();
        let token = store.generate(InviteTokenOptions::default());
        assert_eq!(token.len(), INVITE_TOKEN_MAX);
        assert_eq!(store.count(), 1);

        assert!(store.validate_and_consume(&token));
        // Multi-use by default: still present and valid.
        assert!(store.validate_and_consume(&token));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_unknown_token_rejected() {
        let store = store();
        let _ = store.generate(InviteTokenOptions::default());
        assert!(!store.validate_and_consume(&[0u8; 32]));
    }

    #[test]
    fn test_single_use_removed_after_use() {
        let store = store();
        let token = store.generate(InviteTokenOptions {
            single_use: Some(true),
            ..Default::default()
        });

        assert!(store.validate_and_consume(&token));
        assert_eq!(store.count(), 0);
        assert!(!store.validate_and_consume(&token));
    }

    #[test]
    fn test_max_uses_cap() {
        let store = store();
        let token = store.generate(InviteTokenOptions {
            max_uses: Some(2),
            ..Default::default()
        });

        assert!(store.validate_and_consume(&token));
        assert!(store.validate_and_consume(&token));
        assert!(!store.validate_and_consume(&token));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_expired_token_rejected() {
        let store = store();
        let token = store.generate(InviteTokenOptions {
            expiry: Some(Duration::ZERO),
            ..Default::default()
        });

        assert!(!store.validate_and_consume(&token));
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_import_length_bounds() {
        let store = store();
        assert!(store.import(&[1u8; 15], InviteTokenOptions::default()).is_err());
        assert!(store.import(&[1u8; 16], InviteTokenOptions::default()).is_ok());
        assert!(store.import(&[1u8; 32], InviteTokenOptions::default()).is_ok());
        assert!(store.import(&[1u8; 33], InviteTokenOptions::default()).is_err());
    }

    #[test]
    fn test_revoke() {
        let store = store();
        let token = store.generate(InviteTokenOptions::default());
        assert!(store.revoke(&token));
        assert!(!store.revoke(&token));
        assert!(!store.validate_and_consume(&token));
    }
}
