//! Protocol constants shared by the dispatch engine and its collaborators.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Each constant has explicit bounds to prevent unbounded resource allocation.

// ============================================================================
// Message Limits
// ============================================================================

/// Maximum number of service contexts carried by a single request or reply.
///
/// Tiger Style: A peer cannot grow a message's metadata without bound.
pub const MAX_SERVICE_CONTEXTS: usize = 32;

/// Maximum length of an operation name in bytes.
pub const MAX_OPERATION_NAME_LENGTH: usize = 1024;

/// Maximum number of profiles carried by an object reference.
///
/// Tiger Style: Bounds the candidate list an invocation can iterate over.
pub const MAX_PROFILES_PER_REFERENCE: usize = 64;

// ============================================================================
// Well-known Service Context Ids
// ============================================================================

/// Code-set negotiation context (`CodeSets`).
pub const CODE_SETS_CONTEXT_ID: u32 = 1;

/// Sending-context run time, carries the client codebase.
pub const SENDING_CONTEXT_RUN_TIME_ID: u32 = 6;

/// Out-of-band diagnostic text attached to exception replies.
pub const EXCEPTION_DETAIL_MESSAGE_ID: u32 = 14;

/// Vendor ORB version capability descriptor ("GIO\0").
pub const ORB_VERSION_CONTEXT_ID: u32 = 0x4749_4F00;

// ============================================================================
// Reply Status Codes
// ============================================================================

/// Normal reply carrying the operation result.
pub const REPLY_NO_EXCEPTION: u32 = 0;

/// Reply carrying an application-declared exception.
pub const REPLY_USER_EXCEPTION: u32 = 1;

/// Reply carrying a protocol-level system exception.
pub const REPLY_SYSTEM_EXCEPTION: u32 = 2;

/// Reply redirecting the invocation to another reference.
pub const REPLY_LOCATION_FORWARD: u32 = 3;

/// Reply redirecting the invocation permanently to another reference.
pub const REPLY_LOCATION_FORWARD_PERM: u32 = 4;

/// Reply asking the client to resend with a different addressing disposition.
pub const REPLY_NEEDS_ADDRESSING_MODE: u32 = 5;
