// ============================================
// File: crates/snap2p-peer/src/ratelimit.rs
// ============================================
//! # Accept Rate Limiter
//!
//! ## Creation Reason
//! Throttles inbound connections per remote IP before any handshake
//! work happens, so that STEALTH and PRIVATE listeners cannot be
//! probed or churned cheaply.
//!
//! ## Main Functionality
//! - `RateLimiter`: per-IP sliding window of arrival instants
//! - `check`: admit-or-reject for a new arrival
//! - `sweep`: drop stale windows
//!
//! ## Main Logical Flow
//! 1. Accept loop calls `check(ip)` for every accepted socket
//! 2. Expired entries inside the window are pruned on access
//! 3. Rejected sockets are dropped silently (no response bytes)
//!
//! ## Last Modified
//! v0.1.0 - Initial rate limiter

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::RateLimitConfig;

// ============================================
// RateLimiter
// ============================================

/// Per-IP sliding-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Creates a limiter with the given window configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Records an arrival from `ip` and reports whether it is admitted.
    ///
    /// The window is bounded by the configured budget, so a flooding
    /// address never grows its entry past `max_per_window` instants.
    #[must_use]
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(ip).or_default();

        while let Some(front) = window.front() {
            if now.duration_since(*front) > self.config.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.config.max_per_window as usize {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Removes windows with no arrivals inside the configured window.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|last| now.duration_since(*last) <= self.config.window)
        });
    }

    /// Number of tracked addresses.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.lock().len()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn test_admits_within_budget() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(3));
        assert!(limiter.check(ip(1)));
        assert!(limiter.check(ip(1)));
        assert!(limiter.check(ip(1)));
        assert!(!limiter.check(ip(1)));
    }

    #[test]
    fn test_addresses_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(1));
        assert!(limiter.check(ip(1)));
        assert!(limiter.check(ip(2)));
        assert!(!limiter.check(ip(1)));
    }

    #[test]
    fn test_window_expiry_readmits() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_per_window: 1,
            window: Duration::from_millis(20),
        });
        assert!(limiter.check(ip(1)));
        assert!(!limiter.check(ip(1)));

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check(ip(1)));
    }

    #[test]
    fn test_sweep_drops_stale_entries() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_per_window: 1,
            window: Duration::from_millis(10),
        });
        let _ = limiter.check(ip(1));
        let _ = limiter.check(ip(2));
        assert_eq!(limiter.tracked(), 2);

        std::thread::sleep(Duration::from_millis(20));
        limiter.sweep();
        assert_eq!(limiter.tracked(), 0);
    }
}
