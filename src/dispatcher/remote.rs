//! Full-protocol dispatcher.
//!
//! Every attempt walks the same states:
//!
//! ```text
//! Begin -> ConnectionReady -> RequestSent -> ReplyReceived -> Succeeded
//!                                                           -> FailedFatal
//!                                                           -> Retrying -> Begin
//! ```
//!
//! Each attempt ends in a [`RetryDecision`]. The decision is made in one
//! place, [`RemoteDispatcher::decide`] (and [`decide_failure`] for failures
//! that never produced a reply); the dispatch loop only applies it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use giop_dispatch_types::CompletionStatus;
use giop_dispatch_types::EndpointDescriptor;
use giop_dispatch_types::ObjectReference;
use giop_dispatch_types::ReplyBody;
use giop_dispatch_types::RequestId;
use giop_dispatch_types::SystemException;
use giop_dispatch_types::SystemExceptionKind;
use giop_dispatch_types::constants::MAX_OPERATION_NAME_LENGTH;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use super::DispatchReply;
use super::Dispatcher;
use super::Invocation;
use crate::codeset::CodeSetNegotiator;
use crate::codeset::CodeSetSelector;
use crate::config::ConfigError;
use crate::config::DispatchConfig;
use crate::connection::Connection;
use crate::connection::ConnectionCache;
use crate::connection::WaiterEvent;
use crate::endpoint_list::EndpointList;
use crate::endpoint_list::RetryScope;
use crate::error::DispatchError;
use crate::error::InvocationFailure;
use crate::error::MarshalError;
use crate::error::TransportError;
use crate::interceptor::ClientInterceptor;
use crate::interceptor::InterceptorChain;
use crate::interceptor::InterceptorVerdict;
use crate::marshal::Marshaler;
use crate::mediator::MessageMediator;
use crate::mediator::Redirect;
use crate::mediator::ReplyStatus;
use crate::mediator::RetryDecision;
use crate::resolver::ProfileOrderResolver;
use crate::resolver::ReferenceResolver;
use crate::service_context::ServiceContextManager;
use crate::transport::Transport;

/// Outcome of putting a request on the wire and waiting for its reply.
enum Exchange {
    /// A reply arrived and was classified.
    Reply(ReplyStatus),
    /// The attempt failed; the retry policy decides what happens next.
    Failure(InvocationFailure),
    /// The invocation must end now.
    Fatal(DispatchError),
}

/// Dispatcher speaking the full protocol to remote servers.
pub struct RemoteDispatcher {
    config: DispatchConfig,
    transport: Arc<dyn Transport>,
    marshaler: Arc<dyn Marshaler>,
    resolver: Arc<dyn ReferenceResolver>,
    cache: Arc<ConnectionCache<Connection>>,
    negotiator: CodeSetNegotiator,
    contexts: ServiceContextManager,
    interceptors: InterceptorChain,
}

impl RemoteDispatcher {
    /// Start building a dispatcher over `transport` and `marshaler`.
    pub fn builder(transport: Arc<dyn Transport>, marshaler: Arc<dyn Marshaler>) -> RemoteDispatcherBuilder {
        RemoteDispatcherBuilder {
            transport,
            marshaler,
            config: DispatchConfig::default(),
            resolver: None,
            cache: None,
            selector: None,
            interceptors: InterceptorChain::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Connection cache shared by all invocations of this dispatcher.
    pub fn cache(&self) -> &Arc<ConnectionCache<Connection>> {
        &self.cache
    }

    // ========================================================================
    // Attempt
    // ========================================================================

    /// Run one attempt against `endpoint`.
    async fn attempt(
        &self,
        list: &mut EndpointList,
        endpoint: &EndpointDescriptor,
        invocation: &Invocation,
        attempt: u32,
    ) -> RetryDecision {
        let acquired = tokio::select! {
            biased;
            _ = cancellation(invocation.cancel.as_ref()) => {
                debug!(%endpoint, "cancelled while acquiring connection");
                return RetryDecision::FailFatal(cancelled_error(invocation, None));
            }
            acquired = self.cache.acquire(endpoint, || self.open_connection(endpoint)) => acquired,
        };
        let connection = match acquired {
            Ok(connection) => connection,
            Err(source) => {
                let failure = InvocationFailure::ConnectFailed {
                    endpoint: endpoint.clone(),
                    source,
                };
                return decide_failure(list, &invocation.operation, failure);
            }
        };
        trace!(attempt, %endpoint, connection = connection.id(), "connection ready");

        let mut mediator =
            MessageMediator::new(invocation.operation.clone(), invocation.one_way, attempt, endpoint.clone(), connection);
        let decision = self.run_attempt(list, &mut mediator, invocation).await;
        mediator.end_attempt();
        decision
    }

    async fn open_connection(&self, endpoint: &EndpointDescriptor) -> Result<Connection, TransportError> {
        debug!(%endpoint, "opening connection");
        let channel = self.transport.open(endpoint).await?;
        Ok(Connection::new(endpoint.clone(), channel))
    }

    async fn run_attempt(
        &self,
        list: &mut EndpointList,
        mediator: &mut MessageMediator,
        invocation: &Invocation,
    ) -> RetryDecision {
        if mediator.endpoint().version().supports_codesets() {
            let connection = Arc::clone(mediator.connection());
            self.negotiator.ensure_negotiated(&connection, list.target().codesets.as_ref());
        }

        if let Err(source) = self.contexts.decorate_request(mediator) {
            return RetryDecision::FailFatal(DispatchError::ServiceContext { source });
        }

        let verdict = self.interceptors.starting_point(&mut mediator.request_info());
        let status = match verdict {
            InterceptorVerdict::Continue => match self.exchange(list.target(), mediator, invocation).await {
                Exchange::Reply(status) => status,
                Exchange::Failure(failure) => return decide_failure(list, &invocation.operation, failure),
                Exchange::Fatal(err) => return RetryDecision::FailFatal(err),
            },
            InterceptorVerdict::Forward(target) => ReplyStatus::LocationForward {
                target,
                permanent: false,
            },
            InterceptorVerdict::Fail(exception) => ReplyStatus::SystemException(exception),
            InterceptorVerdict::Retry => return RetryDecision::RetrySameTarget { cause: None },
        };

        let verdict = self.interceptors.ending_point(&mediator.reply_info(&status));
        let status = match verdict {
            InterceptorVerdict::Continue => status,
            InterceptorVerdict::Forward(target) => ReplyStatus::LocationForward {
                target,
                permanent: false,
            },
            InterceptorVerdict::Fail(exception) => ReplyStatus::SystemException(exception),
            InterceptorVerdict::Retry => return RetryDecision::RetrySameTarget { cause: None },
        };

        self.decide(list, mediator, status)
    }

    /// Encode, send and, for two-way calls, wait for the reply.
    async fn exchange(
        &self,
        target: &ObjectReference,
        mediator: &mut MessageMediator,
        invocation: &Invocation,
    ) -> Exchange {
        let header = mediator.request_header(target);
        let codesets = mediator.connection().codesets();
        if invocation.uses_wide_chars && codesets.as_ref().is_some_and(|c| !c.wchar_allowed()) {
            warn!(endpoint = %mediator.endpoint(), "wide characters used on a connection without a wide code set");
            return Exchange::Fatal(DispatchError::Marshal {
                operation: invocation.operation.clone(),
                source: MarshalError::WideCharNotAllowed,
            });
        }
        let frame = match self.marshaler.encode_request(&header, &invocation.args, codesets.as_ref().map(|c| c.context())) {
            Ok(frame) => frame,
            Err(source) => {
                return Exchange::Fatal(DispatchError::Marshal {
                    operation: invocation.operation.clone(),
                    source,
                });
            }
        };

        // Last point at which cancelling keeps the request off the wire.
        if is_cancelled(invocation) {
            return Exchange::Fatal(cancelled_error(invocation, None));
        }

        let waiter = if mediator.is_one_way() {
            None
        } else {
            match mediator.register_waiter() {
                Some(waiter) => Some(waiter),
                None => {
                    let exception = SystemException::new(SystemExceptionKind::Transient, 0, CompletionStatus::No)
                        .with_detail("no free request slot on connection");
                    return Exchange::Failure(InvocationFailure::System {
                        endpoint: mediator.endpoint().clone(),
                        exception,
                    });
                }
            }
        };

        let connection = Arc::clone(mediator.connection());
        if let Err(source) = connection.send(frame).await {
            return Exchange::Failure(InvocationFailure::SendFailed {
                endpoint: mediator.endpoint().clone(),
                source,
            });
        }
        mediator.mark_sent();
        trace!(request_id = %mediator.request_id(), endpoint = %mediator.endpoint(), "request sent");

        let Some(waiter) = waiter else {
            // One-way: the server has our contexts once the frame is out.
            connection.mark_post_initial_contexts();
            return Exchange::Reply(ReplyStatus::NoException(Bytes::new()));
        };

        let event = match self.await_reply(mediator, waiter, invocation).await {
            Ok(event) => event,
            Err(err) => return Exchange::Fatal(err),
        };

        match event {
            WaiterEvent::Reply(frame) => self.classify_reply(mediator, &frame, &invocation.operation),
            WaiterEvent::ServerClosed => Exchange::Failure(InvocationFailure::ServerClosed {
                endpoint: mediator.endpoint().clone(),
                request_id: mediator.request_id(),
            }),
            WaiterEvent::ConnectionLost => Exchange::Failure(InvocationFailure::ConnectionLost {
                endpoint: mediator.endpoint().clone(),
                request_id: mediator.request_id(),
            }),
        }
    }

    /// Wait for the reply, the deadline or cancellation, whichever first.
    ///
    /// The waiter registry settles races: if the reader already claimed the
    /// waiter when the deadline or cancellation fired, the reply wins and no
    /// cancel is sent.
    async fn await_reply(
        &self,
        mediator: &mut MessageMediator,
        mut waiter: oneshot::Receiver<WaiterEvent>,
        invocation: &Invocation,
    ) -> Result<WaiterEvent, DispatchError> {
        let timeout = invocation.timeout.unwrap_or_else(|| self.config.request_timeout());

        let abort = tokio::select! {
            biased;
            _ = cancellation(invocation.cancel.as_ref()) => cancelled_error(invocation, Some(mediator.request_id())),
            _ = tokio::time::sleep(timeout) => DispatchError::Timeout {
                operation: invocation.operation.clone(),
                timeout,
            },
            event = &mut waiter => {
                mediator.waiter_resolved();
                // A dropped sender means the registry went away with its connection.
                return Ok(event.unwrap_or(WaiterEvent::ConnectionLost));
            }
        };

        if !mediator.unregister_waiter() {
            if let Ok(event) = waiter.await {
                debug!(request_id = %mediator.request_id(), error = %abort, "reply arrived before abandonment");
                return Ok(event);
            }
        }
        mediator.send_cancel_once().await;
        warn!(request_id = %mediator.request_id(), error = %abort, "abandoning request");
        Err(abort)
    }

    /// Decode a reply frame and classify it.
    fn classify_reply(&self, mediator: &mut MessageMediator, frame: &Bytes, operation: &str) -> Exchange {
        let reply = match self.marshaler.decode_reply(frame) {
            Ok(reply) => reply,
            Err(source) => {
                return Exchange::Fatal(DispatchError::Marshal {
                    operation: operation.to_owned(),
                    source,
                });
            }
        };
        if reply.request_id != mediator.request_id() {
            return Exchange::Fatal(DispatchError::Marshal {
                operation: operation.to_owned(),
                source: MarshalError::Decode {
                    reason: format!(
                        "reply for request {} delivered to request {}",
                        reply.request_id,
                        mediator.request_id()
                    ),
                },
            });
        }

        let body = mediator.accept_reply(reply);
        self.contexts.consume_reply(mediator);
        mediator.connection().mark_post_initial_contexts();

        let status = match body {
            ReplyBody::NoException(result) => ReplyStatus::NoException(result),
            ReplyBody::UserException(encoded) => match self.marshaler.decode_user_exception(encoded) {
                Ok(exception) => ReplyStatus::UserException(exception),
                Err(source) => {
                    return Exchange::Fatal(DispatchError::Marshal {
                        operation: operation.to_owned(),
                        source,
                    });
                }
            },
            ReplyBody::SystemException(mut exception) => {
                if exception.detail.is_none() {
                    exception.detail = mediator.exception_detail().map(str::to_owned);
                }
                ReplyStatus::SystemException(exception)
            }
            ReplyBody::LocationForward { target, permanent } => ReplyStatus::LocationForward { target, permanent },
            ReplyBody::NeedsAddressingMode(mode) => ReplyStatus::NeedsAddressingMode(mode),
        };
        debug!(request_id = %mediator.request_id(), status = status.name(), "reply received");
        Exchange::Reply(status)
    }

    /// Map a classified attempt outcome to what the loop does next.
    fn decide(&self, list: &mut EndpointList, mediator: &MessageMediator, status: ReplyStatus) -> RetryDecision {
        let operation = mediator.operation();
        match status {
            ReplyStatus::NoException(_) if mediator.is_one_way() => RetryDecision::Succeed(Bytes::new()),
            ReplyStatus::NoException(body) => match self.marshaler.decode_result(body) {
                Ok(result) => RetryDecision::Succeed(result),
                Err(source) => RetryDecision::FailFatal(DispatchError::Marshal {
                    operation: operation.to_owned(),
                    source,
                }),
            },
            ReplyStatus::UserException(exception) => RetryDecision::FailFatal(DispatchError::UserException {
                operation: operation.to_owned(),
                exception,
            }),
            ReplyStatus::SystemException(exception) => decide_failure(list, operation, InvocationFailure::System {
                endpoint: mediator.endpoint().clone(),
                exception,
            }),
            ReplyStatus::LocationForward { target, permanent } => RetryDecision::RetryNextTarget {
                redirect: Some(Redirect { target, permanent }),
                cause: None,
            },
            ReplyStatus::NeedsAddressingMode(mode) => match list.report_addressing_retry(mode) {
                Ok(()) => RetryDecision::RetrySameTarget { cause: None },
                Err(err) => RetryDecision::FailFatal(err),
            },
        }
    }
}

/// Route a failure through the endpoint list's retry policy.
fn decide_failure(list: &mut EndpointList, operation: &str, failure: InvocationFailure) -> RetryDecision {
    match list.report_failure(&failure) {
        None => RetryDecision::FailFatal(DispatchError::Failed {
            operation: operation.to_owned(),
            source: Box::new(failure),
        }),
        Some(RetryScope::SameTarget) => RetryDecision::RetrySameTarget { cause: Some(failure) },
        Some(RetryScope::NextTarget) => RetryDecision::RetryNextTarget {
            redirect: None,
            cause: Some(failure),
        },
    }
}

fn exhausted(attempts: u32, last_failure: Option<InvocationFailure>, list: &EndpointList) -> DispatchError {
    match last_failure {
        Some(failure) => DispatchError::NowhereToGo {
            attempts,
            source: Box::new(failure),
        },
        None => DispatchError::EmptyTarget {
            repository_id: list.target().repository_id.clone(),
        },
    }
}

fn is_cancelled(invocation: &Invocation) -> bool {
    invocation.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
}

fn cancelled_error(invocation: &Invocation, request_id: Option<RequestId>) -> DispatchError {
    DispatchError::Cancelled {
        operation: invocation.operation.clone(),
        request_id,
    }
}

/// Resolves when `token` fires; never without one.
async fn cancellation(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn validate_operation(operation: &str) -> Result<(), DispatchError> {
    if operation.is_empty() {
        return Err(DispatchError::InvalidOperation {
            reason: "operation name is empty".to_owned(),
        });
    }
    if operation.len() > MAX_OPERATION_NAME_LENGTH {
        return Err(DispatchError::InvalidOperation {
            reason: format!("operation name exceeds {MAX_OPERATION_NAME_LENGTH} bytes"),
        });
    }
    Ok(())
}

#[async_trait]
impl Dispatcher for RemoteDispatcher {
    #[instrument(skip_all, fields(operation = %invocation.operation, target = %target.repository_id))]
    async fn dispatch(&self, target: &ObjectReference, invocation: Invocation) -> Result<DispatchReply, DispatchError> {
        validate_operation(&invocation.operation)?;
        let mut list = EndpointList::resolve(target.clone(), Arc::clone(&self.resolver), self.config.retry_limits())?;
        let mut attempts = 0u32;
        let mut last_failure: Option<InvocationFailure> = None;
        let mut permanent_forward: Option<ObjectReference> = None;

        loop {
            if is_cancelled(&invocation) {
                debug!(attempts, "invocation cancelled before attempt");
                return Err(cancelled_error(&invocation, None));
            }
            let endpoint = match list.current() {
                Ok(endpoint) => endpoint.clone(),
                Err(_) => return Err(exhausted(attempts, last_failure, &list)),
            };
            if attempts >= self.config.max_attempts {
                warn!(attempts, "attempt limit reached");
                return Err(DispatchError::AttemptLimitExceeded {
                    operation: invocation.operation.clone(),
                    max: self.config.max_attempts,
                    last_failure: last_failure.map(Box::new),
                });
            }
            attempts += 1;

            match self.attempt(&mut list, &endpoint, &invocation, attempts).await {
                RetryDecision::Succeed(result) => {
                    debug!(attempts, "invocation succeeded");
                    return Ok(DispatchReply {
                        result,
                        permanent_forward,
                        attempts,
                    });
                }
                RetryDecision::FailFatal(err) => {
                    debug!(attempts, error = %err, "invocation failed");
                    return Err(err);
                }
                RetryDecision::RetrySameTarget { cause } => {
                    debug!(attempt = attempts, %endpoint, "retrying same endpoint");
                    if let Some(cause) = cause {
                        last_failure = Some(cause);
                    }
                }
                RetryDecision::RetryNextTarget {
                    redirect: Some(redirect),
                    ..
                } => {
                    list.report_redirect(redirect.target.clone())?;
                    if redirect.permanent {
                        permanent_forward = Some(redirect.target);
                    }
                }
                RetryDecision::RetryNextTarget { redirect: None, cause } => {
                    if let Some(cause) = cause {
                        debug!(attempt = attempts, %endpoint, failure = %cause, "moving to next endpoint");
                        last_failure = Some(cause);
                    }
                    if !list.advance() {
                        return Err(exhausted(attempts, last_failure, &list));
                    }
                }
            }
        }
    }
}

/// Builder for [`RemoteDispatcher`].
pub struct RemoteDispatcherBuilder {
    transport: Arc<dyn Transport>,
    marshaler: Arc<dyn Marshaler>,
    config: DispatchConfig,
    resolver: Option<Arc<dyn ReferenceResolver>>,
    cache: Option<Arc<ConnectionCache<Connection>>>,
    selector: Option<Arc<dyn CodeSetSelector>>,
    interceptors: InterceptorChain,
}

impl RemoteDispatcherBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve references with `resolver` instead of profile order.
    pub fn resolver(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Share an existing connection cache.
    pub fn cache(mut self, cache: Arc<ConnectionCache<Connection>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Select code sets with `selector` instead of the standard algorithm.
    pub fn codeset_selector(mut self, selector: Arc<dyn CodeSetSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Append an interceptor.
    pub fn interceptor(mut self, interceptor: Arc<dyn ClientInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Validate the configuration and build the dispatcher.
    pub fn build(self) -> Result<RemoteDispatcher, ConfigError> {
        self.config.validate()?;
        let negotiator = match self.selector {
            Some(selector) => CodeSetNegotiator::with_selector(self.config.codesets.clone(), selector),
            None => CodeSetNegotiator::new(self.config.codesets.clone()),
        };
        Ok(RemoteDispatcher {
            contexts: ServiceContextManager::from_config(&self.config),
            negotiator,
            transport: self.transport,
            marshaler: self.marshaler,
            resolver: self.resolver.unwrap_or_else(|| Arc::new(ProfileOrderResolver)),
            cache: self.cache.unwrap_or_default(),
            interceptors: self.interceptors,
            config: self.config,
        })
    }
}
