//! Turning an object reference into candidate endpoints.

use giop_dispatch_types::EndpointDescriptor;
use giop_dispatch_types::ObjectReference;
use giop_dispatch_types::constants::MAX_PROFILES_PER_REFERENCE;
use tracing::warn;

/// Produces the ordered candidate endpoints for a reference.
pub trait ReferenceResolver: Send + Sync {
    /// Candidates in preference order. May be empty.
    fn resolve(&self, reference: &ObjectReference) -> Vec<EndpointDescriptor>;
}

/// Uses the reference's profiles in the order they appear.
///
/// Tiger Style: At most [`MAX_PROFILES_PER_REFERENCE`] candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileOrderResolver;

impl ReferenceResolver for ProfileOrderResolver {
    fn resolve(&self, reference: &ObjectReference) -> Vec<EndpointDescriptor> {
        if reference.profiles.len() > MAX_PROFILES_PER_REFERENCE {
            warn!(
                repository_id = %reference.repository_id,
                profiles = reference.profiles.len(),
                max = MAX_PROFILES_PER_REFERENCE,
                "ignoring excess profiles"
            );
        }
        reference.profiles.iter().take(MAX_PROFILES_PER_REFERENCE).cloned().collect()
    }
}
