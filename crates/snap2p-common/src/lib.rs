// ============================================
// File: crates/snap2p-common/src/lib.rs
// ============================================
//! # snap2p Common - Shared Utilities Library
//!
//! ## Creation Reason
//! Provides foundational types and utilities shared across all snap2p
//! crates, ensuring consistency and reducing code duplication.
//!
//! ## Main Functionality
//! - [`types`]: Core type definitions (Principal, Locator, SessionId, Visibility)
//! - [`time`]: Skew-tolerant timestamps and lock-free activity clocks
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                snap2p-peer                          │
//! │                     │                               │
//! │                     ▼                               │
//! │                snap2p-core                          │
//! │                     │                               │
//! │                     ▼                               │
//! │               snap2p-common  ◄── You are here       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dependencies
//! - No internal crate dependencies (leaf node)
//! - Minimal external dependencies for maximum compatibility
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes affect everything
//! - Keep dependencies minimal
//! - All public types should implement standard traits (Debug, Clone, etc.)
//! - Security-sensitive types must implement Zeroize
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use time::{Timestamp, CLOCK_SKEW_SECS};
pub use types::{Locator, Principal, PrincipalSet, SessionId, TransportKind, Visibility};
