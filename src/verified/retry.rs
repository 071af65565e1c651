//! Retry classification for failed attempts.

use giop_dispatch_types::CompletionStatus;
use giop_dispatch_types::SystemException;
use giop_dispatch_types::SystemExceptionKind;

use crate::error::InvocationFailure;

/// What the retry policy says about a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Surface the failure to the caller.
    Fatal,
    /// Try the same endpoint again, on a fresh connection if the old one died.
    RetrySameTarget,
    /// Move to the next candidate endpoint.
    RetryNextTarget,
}

/// Classify a system exception raised by a server.
///
/// Truth table:
/// | Kind                               | Completed  | Result          |
/// |------------------------------------|------------|-----------------|
/// | TRANSIENT, COMM_FAILURE, OBJ_ADAPTER | No       | RetryNextTarget |
/// | *                                  | Yes, Maybe | Fatal           |
/// | any other kind                     | *          | Fatal           |
///
/// A request that may have executed is never reissued.
#[inline]
pub fn classify_system_exception(exception: &SystemException) -> FailureDisposition {
    match (exception.kind, exception.completed) {
        (
            SystemExceptionKind::Transient | SystemExceptionKind::CommFailure | SystemExceptionKind::ObjAdapter,
            CompletionStatus::No,
        ) => FailureDisposition::RetryNextTarget,
        _ => FailureDisposition::Fatal,
    }
}

/// Classify a failed attempt.
///
/// Truth table:
/// | Failure                           | Result          |
/// |-----------------------------------|-----------------|
/// | ConnectFailed                     | RetryNextTarget |
/// | SendFailed                        | RetryNextTarget |
/// | ServerClosed (orderly, unprocessed) | RetrySameTarget |
/// | ConnectionLost (completion maybe) | Fatal           |
/// | System                            | see [`classify_system_exception`] |
#[inline]
pub fn classify_failure(failure: &InvocationFailure) -> FailureDisposition {
    match failure {
        InvocationFailure::ConnectFailed { .. } | InvocationFailure::SendFailed { .. } => {
            FailureDisposition::RetryNextTarget
        }
        InvocationFailure::ServerClosed { .. } => FailureDisposition::RetrySameTarget,
        InvocationFailure::ConnectionLost { .. } => FailureDisposition::Fatal,
        InvocationFailure::System { exception, .. } => classify_system_exception(exception),
    }
}

/// Apply the per-endpoint same-target budget to a disposition.
///
/// A same-target retry past `max_same_target_retries` escalates to the next
/// endpoint rather than looping on one server forever.
///
/// # Arguments
///
/// * `disposition` - Classification of the failure
/// * `same_target_retries` - Same-target retries already spent on this endpoint
/// * `max_same_target_retries` - Per-endpoint budget
#[inline]
pub fn bound_same_target_retry(
    disposition: FailureDisposition,
    same_target_retries: u32,
    max_same_target_retries: u32,
) -> FailureDisposition {
    match disposition {
        FailureDisposition::RetrySameTarget if same_target_retries >= max_same_target_retries => {
            FailureDisposition::RetryNextTarget
        }
        other => other,
    }
}
