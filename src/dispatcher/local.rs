//! Colocated dispatch.
//!
//! References whose servant lives in this process skip the protocol path
//! entirely: no connection, no service contexts, no retries.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use giop_dispatch_types::CompletionStatus;
use giop_dispatch_types::ObjectReference;
use giop_dispatch_types::SystemException;
use giop_dispatch_types::SystemExceptionKind;
use giop_dispatch_types::UserException;
use parking_lot::RwLock;
use tracing::debug;
use tracing::instrument;

use super::DispatchReply;
use super::Dispatcher;
use super::Invocation;
use crate::error::DispatchError;

/// Failure raised by a colocated servant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServantError {
    /// Application-declared exception.
    User(UserException),
    /// Protocol-level exception.
    System(SystemException),
}

/// A servant invoked in-process.
#[async_trait]
pub trait LocalServant: Send + Sync {
    /// Run `operation` with encoded `args` and return the encoded result.
    async fn invoke(&self, operation: &str, args: Bytes) -> Result<Bytes, ServantError>;
}

/// Dispatches to servants activated in this process, keyed by object key.
#[derive(Default)]
pub struct LocalDispatcher {
    servants: RwLock<HashMap<Bytes, Arc<dyn LocalServant>>>,
}

impl LocalDispatcher {
    /// Create a dispatcher with no active servants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `object_key` with `servant`, replacing any previous one.
    pub fn activate(&self, object_key: impl Into<Bytes>, servant: Arc<dyn LocalServant>) {
        self.servants.write().insert(object_key.into(), servant);
    }

    /// Stop serving `object_key`. Returns whether a servant was active.
    pub fn deactivate(&self, object_key: &[u8]) -> bool {
        self.servants.write().remove(object_key).is_some()
    }

    /// Number of active servants.
    pub fn len(&self) -> usize {
        self.servants.read().len()
    }

    /// Whether no servant is active.
    pub fn is_empty(&self) -> bool {
        self.servants.read().is_empty()
    }
}

#[async_trait]
impl Dispatcher for LocalDispatcher {
    #[instrument(skip_all, fields(operation = %invocation.operation))]
    async fn dispatch(&self, target: &ObjectReference, invocation: Invocation) -> Result<DispatchReply, DispatchError> {
        // Clone out of the lock; the servant may take arbitrarily long.
        let servant = self.servants.read().get(&target.object_key).cloned();
        let Some(servant) = servant else {
            return Err(DispatchError::Local {
                operation: invocation.operation,
                exception: SystemException::new(SystemExceptionKind::ObjectNotExist, 0, CompletionStatus::No)
                    .with_detail(format!("no servant active for {}", target.repository_id)),
            });
        };

        debug!("invoking colocated servant");
        match servant.invoke(&invocation.operation, invocation.args).await {
            Ok(result) => Ok(DispatchReply {
                result: if invocation.one_way { Bytes::new() } else { result },
                permanent_forward: None,
                attempts: 1,
            }),
            Err(ServantError::User(exception)) => Err(DispatchError::UserException {
                operation: invocation.operation,
                exception,
            }),
            Err(ServantError::System(exception)) => Err(DispatchError::Local {
                operation: invocation.operation,
                exception,
            }),
        }
    }
}
