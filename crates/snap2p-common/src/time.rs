// ============================================
// File: crates/snap2p-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Provides the two notions of time the protocol needs: skew-tolerant
//! Unix timestamps for wire validation, and a lock-free activity clock
//! for session idle tracking.
//!
//! ## Main Functionality
//! - `Timestamp`: Unix timestamp with clock-skew validation
//! - `ActivityClock`: per-instance lock-free last-activity record
//! - Utility functions for time operations
//!
//! ## Main Logical Flow
//! 1. Handshake and attestation checks validate `Timestamp` skew
//! 2. Sessions `mark()` their clock on every received frame
//! 3. Watchdog tasks read `idle()` without taking any lock
//!
//! ## ⚠️ Important Note for Next Developer
//! - The ±300s skew window is part of the wire protocol, not a tunable
//! - `ActivityClock` readings are monotone: a concurrent stale `mark`
//!   can never move the recorded activity backwards
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================
// Constants
// ============================================

/// Clock-skew tolerance applied to all protocol timestamp checks (±300 s).
pub const CLOCK_SKEW_SECS: i64 = 300;

/// Minimum valid Unix timestamp (year 2020).
pub const MIN_VALID_TIMESTAMP: i64 = 1_577_836_800;

/// Maximum valid Unix timestamp (year 2100).
pub const MAX_VALID_TIMESTAMP: i64 = 4_102_444_800;

// ============================================
// ActivityClock
// ============================================

/// Lock-free record of the most recent activity on a shared object.
///
/// # Purpose
/// A session's read task marks the clock on every received frame
/// while watchdogs concurrently ask "how long has this been idle?".
/// Both paths are a single atomic access.
///
/// # Implementation
/// Each clock carries its own epoch `Instant` (no process-wide
/// reference anywhere) and stores the milliseconds elapsed between
/// that epoch and the latest `mark` in an `AtomicU64`, advanced with
/// `fetch_max` so delayed writers cannot roll activity backwards.
/// Millisecond resolution is ample for idle accounting and keeps the
/// counter far from overflow for any realistic process lifetime.
///
/// # Example
/// ```
/// use snap2p_common::time::ActivityClock;
/// use std::time::Duration;
///
/// let clock = ActivityClock::new();
/// clock.mark();
/// assert!(!clock.idle_exceeds(Duration::from_secs(1)));
/// ```
#[derive(Debug)]
pub struct ActivityClock {
    /// Creation time of this clock; all readings are relative to it.
    epoch: Instant,
    /// Milliseconds between `epoch` and the most recent mark.
    marked_ms: AtomicU64,
}

impl ActivityClock {
    /// Creates a clock whose last activity is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            marked_ms: AtomicU64::new(0),
        }
    }

    /// Records activity at the current time.
    pub fn mark(&self) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        self.marked_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    /// Time elapsed since the last recorded activity.
    #[must_use]
    pub fn idle(&self) -> Duration {
        let marked = Duration::from_millis(self.marked_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(marked)
    }

    /// Whether the clock has been idle for longer than `limit`.
    #[must_use]
    pub fn idle_exceeds(&self, limit: Duration) -> bool {
        self.idle() > limit
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// Timestamp
// ============================================

/// Unix timestamp in seconds.
///
/// # Purpose
/// Used in protocol messages (HELLO, PING) and attestations for
/// time-based validation and replay resistance.
///
/// # Validation
/// All skew checks use the protocol's fixed ±300 second tolerance;
/// expiry checks additionally accept values up to 300 seconds past.
///
/// # Example
/// ```
/// use snap2p_common::time::Timestamp;
///
/// let now = Timestamp::now();
/// assert!(now.is_within_skew());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a new timestamp from Unix seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Creates a timestamp for the current time.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self(secs)
    }

    /// Returns the Unix timestamp in seconds.
    #[must_use]
    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    /// Checks if the timestamp is within plausible bounds (2020-2100).
    #[must_use]
    pub const fn is_plausible(&self) -> bool {
        self.0 >= MIN_VALID_TIMESTAMP && self.0 <= MAX_VALID_TIMESTAMP
    }

    /// Checks `|timestamp - now| <= CLOCK_SKEW_SECS`.
    #[must_use]
    pub fn is_within_skew(&self) -> bool {
        self.is_within_skew_of(Self::now())
    }

    /// Checks `|timestamp - reference| <= CLOCK_SKEW_SECS`.
    #[must_use]
    pub fn is_within_skew_of(&self, reference: Self) -> bool {
        (self.0 - reference.0).abs() <= CLOCK_SKEW_SECS
    }

    /// Checks whether an expiry timestamp has passed, with skew grace.
    ///
    /// Returns `true` when `self <= reference - CLOCK_SKEW_SECS`, i.e.
    /// the deadline is unambiguously in the past even for a peer whose
    /// clock runs 300 seconds behind.
    #[must_use]
    pub fn is_expired_at(&self, reference: Self) -> bool {
        self.0 <= reference.0 - CLOCK_SKEW_SECS
    }

    /// Checks whether this timestamp claims a future time beyond the
    /// tolerated skew (`self > reference + CLOCK_SKEW_SECS`).
    #[must_use]
    pub fn is_in_future_at(&self, reference: Self) -> bool {
        self.0 > reference.0 + CLOCK_SKEW_SECS
    }

    /// Returns the difference from the current time in seconds.
    ///
    /// Positive values mean the timestamp is in the future.
    #[must_use]
    pub fn offset_from_now(&self) -> i64 {
        self.0 - Self::now().0
    }
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Self(secs)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================
// Utility Functions
// ============================================

/// Returns the current Unix timestamp in seconds.
#[must_use]
pub fn unix_timestamp() -> i64 {
    Timestamp::now().as_secs()
}

/// Returns the current Unix timestamp in milliseconds.
#[must_use]
pub fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_activity_clock_starts_fresh() {
        let clock = ActivityClock::new();
        assert!(clock.idle() < Duration::from_millis(100));
    }

    #[test]
    fn test_activity_clock_mark_resets_idle() {
        let clock = ActivityClock::new();
        thread::sleep(Duration::from_millis(20));
        assert!(clock.idle() >= Duration::from_millis(15));

        clock.mark();
        assert!(clock.idle() < Duration::from_millis(15));
    }

    #[test]
    fn test_activity_clock_idle_exceeds() {
        let clock = ActivityClock::new();
        assert!(!clock.idle_exceeds(Duration::from_secs(60)));

        thread::sleep(Duration::from_millis(20));
        assert!(clock.idle_exceeds(Duration::from_millis(10)));
    }

    #[test]
    fn test_activity_clock_marks_are_monotone() {
        // A stale value can never roll the recorded activity back.
        let clock = ActivityClock::new();
        clock.mark();
        let after_mark = clock.idle();

        clock.marked_ms.fetch_max(0, Ordering::Relaxed);
        assert!(clock.idle() <= after_mark + Duration::from_millis(5));
    }

    #[test]
    fn test_timestamp_skew_boundaries() {
        let now = Timestamp::now();

        // Exactly at the skew boundary is accepted.
        let edge = Timestamp::from_secs(now.as_secs() + CLOCK_SKEW_SECS);
        assert!(edge.is_within_skew_of(now));

        // One second past is rejected.
        let past_edge = Timestamp::from_secs(now.as_secs() + CLOCK_SKEW_SECS + 1);
        assert!(!past_edge.is_within_skew_of(now));
        assert!(past_edge.is_in_future_at(now));
    }

    #[test]
    fn test_timestamp_expiry_grace() {
        let now = Timestamp::now();

        // Expiry 400s in the past is expired even with skew grace.
        let old = Timestamp::from_secs(now.as_secs() - 400);
        assert!(old.is_expired_at(now));

        // Expiry 100s in the past is still inside the grace window.
        let recent = Timestamp::from_secs(now.as_secs() - 100);
        assert!(!recent.is_expired_at(now));
    }

    #[test]
    fn test_timestamp_plausibility() {
        assert!(Timestamp::now().is_plausible());
        assert!(!Timestamp::from_secs(0).is_plausible());
        assert!(!Timestamp::from_secs(i64::MAX).is_plausible());
    }
}
