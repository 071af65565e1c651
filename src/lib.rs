//! Client-side remote invocation dispatch engine.
//!
//! Given an object reference and an operation with encoded arguments, the
//! engine picks an endpoint, reuses or opens a connection, negotiates code
//! sets on first use, attaches service contexts, sends the request, waits for
//! the matching reply, and interprets it: result, user exception, system
//! exception, location forward or addressing-mode retry. Retryable failures
//! move on to the next candidate endpoint; redirects replace the plan.
//!
//! # Key Components
//!
//! - **Dispatch**: [`Dispatcher`], [`RemoteDispatcher`], [`LocalDispatcher`], [`DispatcherRegistry`], [`ObjectStub`]
//! - **Endpoints**: [`EndpointList`], [`ReferenceResolver`]
//! - **Connections**: [`Connection`], [`ConnectionCache`]
//! - **Protocol state**: [`CodeSetNegotiator`], [`ServiceContextManager`], [`MessageMediator`]
//! - **Collaborators**: [`Transport`], [`Marshaler`], [`ClientInterceptor`]
//! - **Pure policy**: [`verified`] retry classification and code-set selection
//! - **Constants**: Tiger Style resource limits
//!
//! Protocol types shared with collaborators live in the `giop-dispatch-types`
//! crate, re-exported here as [`types`].

pub mod codeset;
pub mod config;
pub mod connection;
pub mod constants;
pub mod dispatcher;
pub mod endpoint_list;
pub mod error;
pub mod interceptor;
pub mod marshal;
pub mod mediator;
pub mod resolver;
pub mod service_context;
pub mod stub;
pub mod testing;
pub mod transport;
pub mod verified;

pub use giop_dispatch_types as types;

// Code sets
pub use codeset::CodeSetNegotiator;
pub use codeset::CodeSetSelector;
pub use codeset::NegotiatedCodeSets;
pub use codeset::StandardCodeSetSelector;
// Configuration
pub use config::CodeSetPolicy;
pub use config::ConfigError;
pub use config::DispatchConfig;
pub use config::RetryLimits;
// Connections
pub use connection::Connection;
pub use connection::ConnectionCache;
pub use connection::ConnectionCacheMetrics;
pub use connection::PooledConnection;
// Dispatch
pub use dispatcher::DispatchReply;
pub use dispatcher::Dispatcher;
pub use dispatcher::DispatcherRegistry;
pub use dispatcher::Invocation;
pub use dispatcher::LocalDispatcher;
pub use dispatcher::LocalServant;
pub use dispatcher::RemoteDispatcher;
pub use dispatcher::RemoteDispatcherBuilder;
pub use dispatcher::ServantError;
pub use endpoint_list::EndpointList;
pub use endpoint_list::RetryScope;
// Errors
pub use error::DispatchError;
pub use error::InvocationFailure;
pub use error::MarshalError;
pub use error::TransportError;
// Interceptors
pub use interceptor::ClientInterceptor;
pub use interceptor::ClientReplyInfo;
pub use interceptor::ClientRequestInfo;
pub use interceptor::InterceptorChain;
pub use interceptor::InterceptorVerdict;
// Marshaling
pub use marshal::Marshaler;
pub use marshal::PostcardMarshaler;
pub use marshal::WireRequest;
pub use mediator::MessageMediator;
pub use mediator::ReplyStatus;
pub use resolver::ProfileOrderResolver;
pub use resolver::ReferenceResolver;
pub use service_context::ServiceContextManager;
pub use stub::ObjectStub;
// Transport
pub use transport::InboundFrame;
pub use transport::Transport;
pub use transport::TransportChannel;
pub use transport::TransportHandle;
