//! Client request interceptors.
//!
//! Interceptors see every attempt twice: at the starting point, after the
//! engine attached its own service contexts and before the request is
//! encoded, and at the ending point, after the reply was classified. At
//! either point an interceptor can let the attempt continue or override its
//! outcome.

use std::fmt;
use std::sync::Arc;

use giop_dispatch_types::EndpointDescriptor;
use giop_dispatch_types::ObjectReference;
use giop_dispatch_types::RequestId;
use giop_dispatch_types::ServiceContext;
use giop_dispatch_types::ServiceContextError;
use giop_dispatch_types::ServiceContexts;
use giop_dispatch_types::SystemException;
use tracing::debug;

use crate::mediator::ReplyStatus;

/// What an interceptor decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptorVerdict {
    /// Proceed normally.
    Continue,
    /// Treat the attempt as a location forward to the given reference.
    Forward(ObjectReference),
    /// Treat the attempt as having raised this system exception.
    Fail(SystemException),
    /// Retry against the same endpoint.
    Retry,
}

/// Request view handed to starting points.
pub struct ClientRequestInfo<'a> {
    /// Operation being invoked.
    pub operation: &'a str,
    /// Endpoint of this attempt.
    pub endpoint: &'a EndpointDescriptor,
    /// Request id of this attempt.
    pub request_id: RequestId,
    /// Whether no reply is expected.
    pub one_way: bool,
    /// Attempt number within the invocation, starting at 1.
    pub attempt: u32,
    pub(crate) contexts: &'a mut ServiceContexts,
}

impl ClientRequestInfo<'_> {
    /// Attach a service context to the request.
    pub fn add_request_context(&mut self, context: ServiceContext) -> Result<(), ServiceContextError> {
        self.contexts.put(context)
    }

    /// Contexts attached so far.
    pub fn request_contexts(&self) -> &ServiceContexts {
        self.contexts
    }
}

/// Reply view handed to ending points.
pub struct ClientReplyInfo<'a> {
    /// Operation being invoked.
    pub operation: &'a str,
    /// Endpoint of this attempt.
    pub endpoint: &'a EndpointDescriptor,
    /// Request id of this attempt.
    pub request_id: RequestId,
    /// Classified outcome of the attempt.
    pub status: &'a ReplyStatus,
    /// Contexts the server attached to its reply.
    pub reply_contexts: &'a ServiceContexts,
}

/// A client-side interceptor.
pub trait ClientInterceptor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called before the request is encoded and sent.
    fn starting_point(&self, _request: &mut ClientRequestInfo<'_>) -> InterceptorVerdict {
        InterceptorVerdict::Continue
    }

    /// Called after the reply was classified.
    fn ending_point(&self, _reply: &ClientReplyInfo<'_>) -> InterceptorVerdict {
        InterceptorVerdict::Continue
    }
}

/// Ordered interceptors.
///
/// Starting points run in registration order, ending points in reverse. The
/// first verdict other than [`InterceptorVerdict::Continue`] wins and the
/// remaining interceptors are skipped.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn ClientInterceptor>>,
}

impl InterceptorChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor.
    pub fn push(&mut self, interceptor: Arc<dyn ClientInterceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Number of interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run starting points.
    pub fn starting_point(&self, request: &mut ClientRequestInfo<'_>) -> InterceptorVerdict {
        for interceptor in &self.interceptors {
            let verdict = interceptor.starting_point(request);
            if verdict != InterceptorVerdict::Continue {
                debug!(interceptor = interceptor.name(), ?verdict, "starting point overrode request");
                return verdict;
            }
        }
        InterceptorVerdict::Continue
    }

    /// Run ending points.
    pub fn ending_point(&self, reply: &ClientReplyInfo<'_>) -> InterceptorVerdict {
        for interceptor in self.interceptors.iter().rev() {
            let verdict = interceptor.ending_point(reply);
            if verdict != InterceptorVerdict::Continue {
                debug!(interceptor = interceptor.name(), ?verdict, "ending point overrode reply");
                return verdict;
            }
        }
        InterceptorVerdict::Continue
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.interceptors.iter().map(|i| i.name())).finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use giop_dispatch_types::CompletionStatus;
    use giop_dispatch_types::GiopVersion;
    use giop_dispatch_types::SystemExceptionKind;
    use parking_lot::Mutex;

    use super::*;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        start: InterceptorVerdict,
    }

    impl ClientInterceptor for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn starting_point(&self, _request: &mut ClientRequestInfo<'_>) -> InterceptorVerdict {
            self.log.lock().push(format!("start:{}", self.name));
            self.start.clone()
        }

        fn ending_point(&self, _reply: &ClientReplyInfo<'_>) -> InterceptorVerdict {
            self.log.lock().push(format!("end:{}", self.name));
            InterceptorVerdict::Continue
        }
    }

    fn chain(log: &Arc<Mutex<Vec<String>>>, verdicts: &[(&'static str, InterceptorVerdict)]) -> InterceptorChain {
        let mut chain = InterceptorChain::new();
        for (name, verdict) in verdicts {
            chain.push(Arc::new(Recording {
                name: *name,
                log: Arc::clone(log),
                start: verdict.clone(),
            }));
        }
        chain
    }

    #[test]
    fn test_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&log, &[("a", InterceptorVerdict::Continue), ("b", InterceptorVerdict::Continue)]);
        let endpoint = EndpointDescriptor::new("alpha", 1, GiopVersion::V1_2);
        let mut contexts = ServiceContexts::new();
        let mut request = ClientRequestInfo {
            operation: "ping",
            endpoint: &endpoint,
            request_id: RequestId(1),
            one_way: false,
            attempt: 1,
            contexts: &mut contexts,
        };
        assert_eq!(chain.starting_point(&mut request), InterceptorVerdict::Continue);

        let status = ReplyStatus::NoException(Bytes::new());
        let reply_contexts = ServiceContexts::new();
        let reply = ClientReplyInfo {
            operation: "ping",
            endpoint: &endpoint,
            request_id: RequestId(1),
            status: &status,
            reply_contexts: &reply_contexts,
        };
        assert_eq!(chain.ending_point(&reply), InterceptorVerdict::Continue);
        assert_eq!(*log.lock(), vec!["start:a", "start:b", "end:b", "end:a"]);
    }

    #[test]
    fn test_first_override_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fail = SystemException::new(SystemExceptionKind::NoPermission, 0, CompletionStatus::No);
        let chain = chain(&log, &[("a", InterceptorVerdict::Fail(fail.clone())), ("b", InterceptorVerdict::Retry)]);
        let endpoint = EndpointDescriptor::new("alpha", 1, GiopVersion::V1_2);
        let mut contexts = ServiceContexts::new();
        let mut request = ClientRequestInfo {
            operation: "ping",
            endpoint: &endpoint,
            request_id: RequestId(1),
            one_way: false,
            attempt: 1,
            contexts: &mut contexts,
        };
        assert_eq!(chain.starting_point(&mut request), InterceptorVerdict::Fail(fail));
        assert_eq!(*log.lock(), vec!["start:a"]);
    }
}
