use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use giop_dispatch_types::ObjectReference;
use giop_dispatch_types::SubcontractId;
use tracing::debug;

use super::Dispatcher;

/// Maps subcontract ids to dispatchers.
///
/// Lookups for an unregistered id fall back to the default dispatcher, which
/// is always present.
pub struct DispatcherRegistry {
    default: Arc<dyn Dispatcher>,
    dispatchers: HashMap<SubcontractId, Arc<dyn Dispatcher>>,
}

impl DispatcherRegistry {
    /// Create a registry whose [`SubcontractId::DEFAULT`] entry is `default`.
    pub fn new(default: Arc<dyn Dispatcher>) -> Self {
        Self {
            default,
            dispatchers: HashMap::new(),
        }
    }

    /// Register `dispatcher` for `id`. Registering the default id replaces
    /// the fallback.
    pub fn register(&mut self, id: SubcontractId, dispatcher: Arc<dyn Dispatcher>) {
        if id == SubcontractId::DEFAULT {
            self.default = dispatcher;
        } else {
            self.dispatchers.insert(id, dispatcher);
        }
    }

    /// Dispatcher for `id`.
    pub fn get(&self, id: SubcontractId) -> &Arc<dyn Dispatcher> {
        match self.dispatchers.get(&id) {
            Some(dispatcher) => dispatcher,
            None => {
                if id != SubcontractId::DEFAULT {
                    debug!(%id, "no dispatcher registered, using default");
                }
                &self.default
            }
        }
    }

    /// Dispatcher for `reference`.
    pub fn for_reference(&self, reference: &ObjectReference) -> &Arc<dyn Dispatcher> {
        self.get(reference.subcontract_id)
    }
}

impl fmt::Debug for DispatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.dispatchers.keys().copied().collect();
        ids.sort();
        f.debug_struct("DispatcherRegistry").field("registered", &ids).finish_non_exhaustive()
    }
}
