//! Shared protocol types for the giop-dispatch client invocation engine.
//!
//! These types are shared between the dispatch engine and the collaborators
//! that plug into it (transports, marshalers, interceptors) without pulling in
//! tokio or any other runtime dependency.
//!
//! # Key Components
//!
//! - **Endpoints**: [`EndpointDescriptor`], [`ServerAddress`], [`AddressingDisposition`], [`GiopVersion`]
//! - **References**: [`ObjectReference`], [`SubcontractId`]
//! - **Code sets**: [`CodeSetId`], [`CodeSetComponentInfo`], [`CodeSetContext`]
//! - **Service contexts**: [`ServiceContext`], [`ServiceContexts`]
//! - **Exceptions**: [`SystemException`], [`UserException`], [`CompletionStatus`]
//! - **Messages**: [`RequestHeader`], [`ReplyMessage`], [`ReplyBody`]
//! - **Constants**: Tiger Style resource limits

pub mod codeset;
pub mod constants;
pub mod endpoint;
pub mod exception;
pub mod message;
pub mod service_context;

pub use codeset::CodeSetComponent;
pub use codeset::CodeSetComponentInfo;
pub use codeset::CodeSetContext;
pub use codeset::CodeSetId;
pub use endpoint::AddressingDisposition;
pub use endpoint::EndpointDescriptor;
pub use endpoint::GiopVersion;
pub use endpoint::ObjectReference;
pub use endpoint::ServerAddress;
pub use endpoint::SubcontractId;
pub use exception::CompletionStatus;
pub use exception::SystemException;
pub use exception::SystemExceptionKind;
pub use exception::UserException;
pub use message::ReplyBody;
pub use message::ReplyMessage;
pub use message::RequestHeader;
pub use message::RequestId;
pub use message::TargetAddress;
pub use service_context::OrbVersion;
pub use service_context::ServiceContext;
pub use service_context::ServiceContextError;
pub use service_context::ServiceContextId;
pub use service_context::ServiceContexts;
