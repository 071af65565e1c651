//! Pure decision functions for the dispatch engine.
//!
//! Everything here is deterministic: no I/O, no clocks, no locks. The
//! imperative shell (the dispatcher, the connection cache, the negotiator)
//! gathers inputs and applies the decisions.
//!
//! # Module Organization
//!
//! - [`retry`]: Classification of failed attempts into retry-same, retry-next or fatal
//! - [`codeset`]: Code-set selection between client and server capabilities
//!
//! # Tiger Style
//!
//! - Every retry decision is bounded by an explicit per-endpoint budget
//! - Truth tables are documented next to the function implementing them

pub mod codeset;
pub mod retry;

// ============================================================================
// Re-exports: Retry
// ============================================================================

pub use retry::FailureDisposition;
pub use retry::bound_same_target_retry;
pub use retry::classify_failure;
pub use retry::classify_system_exception;

// ============================================================================
// Re-exports: Code Sets
// ============================================================================

pub use codeset::CodeSetNegotiation;
pub use codeset::FALLBACK_CHAR_CODESET;
pub use codeset::negotiate_codesets;
pub use codeset::select_codeset;
