//! Dispatch engine constants.
//!
//! Protocol-level limits live in the `giop-dispatch-types` crate and are
//! re-exported here. The constants below bound the engine's own resources.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Each constant has explicit bounds to prevent unbounded resource allocation.

use std::time::Duration;

// ============================================================================
// Re-exports from giop-dispatch-types
// ============================================================================

pub use giop_dispatch_types::constants::*;

// ============================================================================
// Invocation Limits
// ============================================================================

/// Default time an invocation waits for its reply before giving up.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum number of attempts for one invocation, across all
/// endpoints, redirects and same-target retries.
///
/// Tiger Style: Every retry loop is bounded.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 32;

/// Hard upper bound on the configurable attempt limit.
pub const MAX_ATTEMPTS_CEILING: u32 = 256;

/// Default maximum number of location forwards followed by one invocation.
///
/// Guards against redirect cycles between servers.
pub const DEFAULT_MAX_LOCATION_FORWARDS: u32 = 16;

/// Default number of same-target retries allowed per endpoint before the
/// retry escalates to the next endpoint.
pub const DEFAULT_MAX_SAME_TARGET_RETRIES: u32 = 3;

/// Default number of addressing-mode retries allowed per endpoint.
pub const DEFAULT_MAX_ADDRESSING_RETRIES: u32 = 3;

// ============================================================================
// Connection Limits
// ============================================================================

/// Maximum number of requests awaiting a reply on one connection.
///
/// Tiger Style: Bounds the waiter registry of a multiplexed connection.
pub const MAX_OUTSTANDING_REQUESTS_PER_CONNECTION: usize = 4096;

/// Capacity of the inbound frame channel between a transport and the
/// connection reader task.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Idle time after which a cached connection is reported as idle.
pub const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
