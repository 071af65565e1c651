//! Candidate endpoints for one invocation.
//!
//! An [`EndpointList`] is a cursor over the endpoints an invocation may try.
//! Three kinds of movement are kept apart:
//!
//! - **advance**: the current endpoint failed in an endpoint-specific way;
//!   move to the next candidate
//! - **redirect**: the server forwarded the invocation; the remaining plan is
//!   replaced by the forward target's endpoints
//! - **addressing retry**: same endpoint, different target addressing
//!
//! The list lives for a single invocation and is discarded afterwards.

use std::fmt;
use std::sync::Arc;

use giop_dispatch_types::AddressingDisposition;
use giop_dispatch_types::EndpointDescriptor;
use giop_dispatch_types::ObjectReference;
use tracing::debug;
use tracing::info;

use crate::config::RetryLimits;
use crate::error::DispatchError;
use crate::error::InvocationFailure;
use crate::resolver::ReferenceResolver;
use crate::verified::FailureDisposition;
use crate::verified::bound_same_target_retry;
use crate::verified::classify_failure;

/// The cursor ran past the last candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExhaustedError {
    /// Candidates in the current plan.
    pub candidates: usize,
}

impl fmt::Display for ExhaustedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} candidate endpoints were tried", self.candidates)
    }
}

impl std::error::Error for ExhaustedError {}

/// Where a retry should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryScope {
    /// The same endpoint.
    SameTarget,
    /// The next candidate.
    NextTarget,
}

/// Ordered candidates plus a cursor.
pub struct EndpointList {
    /// Reference currently being invoked; replaced by redirects.
    target: ObjectReference,
    candidates: Vec<EndpointDescriptor>,
    cursor: usize,
    resolver: Arc<dyn ReferenceResolver>,
    limits: RetryLimits,
    /// Redirects followed so far.
    forwards: u32,
    /// Same-target retries spent on the current candidate.
    same_target_retries: u32,
    /// Addressing retries spent on the current candidate.
    addressing_retries: u32,
}

impl EndpointList {
    /// Resolve `target` into a list.
    ///
    /// Fails with [`DispatchError::EmptyTarget`] when the reference yields
    /// no candidate.
    pub fn resolve(
        target: ObjectReference,
        resolver: Arc<dyn ReferenceResolver>,
        limits: RetryLimits,
    ) -> Result<Self, DispatchError> {
        let candidates = resolver.resolve(&target);
        if candidates.is_empty() {
            return Err(DispatchError::EmptyTarget {
                repository_id: target.repository_id,
            });
        }
        Ok(Self {
            target,
            candidates,
            cursor: 0,
            resolver,
            limits,
            forwards: 0,
            same_target_retries: 0,
            addressing_retries: 0,
        })
    }

    /// The endpoint to try next.
    pub fn current(&self) -> Result<&EndpointDescriptor, ExhaustedError> {
        self.candidates.get(self.cursor).ok_or(ExhaustedError {
            candidates: self.candidates.len(),
        })
    }

    /// The reference being invoked, after any redirects.
    pub fn target(&self) -> &ObjectReference {
        &self.target
    }

    /// Redirects followed so far.
    pub fn forwards(&self) -> u32 {
        self.forwards
    }

    /// Candidates in the current plan.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the current plan has no candidate.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Report a failure seen on the current endpoint.
    ///
    /// Returns `None` when the failure is terminal and the caller must not
    /// retry at all. Otherwise says where the retry goes. Same-target retries
    /// beyond the per-endpoint budget escalate to the next candidate. This
    /// does not move the cursor; call [`EndpointList::advance`] for
    /// [`RetryScope::NextTarget`].
    pub fn report_failure(&mut self, failure: &InvocationFailure) -> Option<RetryScope> {
        let disposition = bound_same_target_retry(
            classify_failure(failure),
            self.same_target_retries,
            self.limits.max_same_target_retries,
        );
        match disposition {
            FailureDisposition::Fatal => None,
            FailureDisposition::RetrySameTarget => {
                self.same_target_retries += 1;
                Some(RetryScope::SameTarget)
            }
            FailureDisposition::RetryNextTarget => Some(RetryScope::NextTarget),
        }
    }

    /// Replace the remaining plan with the endpoints of `new_target`.
    ///
    /// Fails when the redirect limit is reached or the new target resolves to
    /// nothing. The cursor restarts at the first new candidate.
    pub fn report_redirect(&mut self, new_target: ObjectReference) -> Result<(), DispatchError> {
        if self.forwards >= self.limits.max_location_forwards {
            return Err(DispatchError::ForwardLimitExceeded {
                max: self.limits.max_location_forwards,
            });
        }
        let candidates = self.resolver.resolve(&new_target);
        if candidates.is_empty() {
            return Err(DispatchError::EmptyTarget {
                repository_id: new_target.repository_id,
            });
        }
        self.forwards += 1;
        info!(
            from = %self.target,
            to = %new_target,
            forwards = self.forwards,
            "following location forward"
        );
        self.target = new_target;
        self.candidates = candidates;
        self.cursor = 0;
        self.reset_endpoint_budgets();
        Ok(())
    }

    /// Switch the current endpoint to `mode` addressing.
    ///
    /// The endpoint keeps its identity, so the same connection is reused.
    pub fn report_addressing_retry(&mut self, mode: AddressingDisposition) -> Result<(), DispatchError> {
        let Some(current) = self.candidates.get_mut(self.cursor) else {
            return Err(DispatchError::EmptyTarget {
                repository_id: self.target.repository_id.clone(),
            });
        };
        if self.addressing_retries >= self.limits.max_addressing_retries {
            return Err(DispatchError::AddressingLimitExceeded {
                endpoint: current.clone(),
                max: self.limits.max_addressing_retries,
            });
        }
        self.addressing_retries += 1;
        debug!(endpoint = %current, %mode, "server requested another addressing mode");
        *current = current.with_addressing(mode);
        Ok(())
    }

    /// Move to the next candidate. Returns false when none remain.
    pub fn advance(&mut self) -> bool {
        if self.cursor < self.candidates.len() {
            self.cursor += 1;
        }
        self.reset_endpoint_budgets();
        self.cursor < self.candidates.len()
    }

    fn reset_endpoint_budgets(&mut self) {
        self.same_target_retries = 0;
        self.addressing_retries = 0;
    }
}

impl fmt::Debug for EndpointList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointList")
            .field("target", &self.target.repository_id)
            .field("candidates", &self.candidates)
            .field("cursor", &self.cursor)
            .field("forwards", &self.forwards)
            .finish()
    }
}
