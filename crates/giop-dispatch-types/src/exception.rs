//! System (protocol-level) and user (application-level) exceptions.

use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

/// Whether the server had completed the operation when an exception was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompletionStatus {
    /// The operation completed before the exception.
    Yes,
    /// The operation was never started.
    No,
    /// The completion status is unknown.
    Maybe,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "COMPLETED_YES"),
            Self::No => write!(f, "COMPLETED_NO"),
            Self::Maybe => write!(f, "COMPLETED_MAYBE"),
        }
    }
}

/// Standard system exception kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemExceptionKind {
    /// Transient failure, the request may succeed if reissued.
    Transient,
    /// Communication failure after the request was handed to the transport.
    CommFailure,
    /// Object adapter failure on the server.
    ObjAdapter,
    /// The target object does not exist.
    ObjectNotExist,
    /// Request or reply could not be (un)marshaled.
    Marshal,
    /// Invalid parameter.
    BadParam,
    /// Invalid operation for the target.
    BadOperation,
    /// Caller lacks permission.
    NoPermission,
    /// Operation not implemented by the target.
    NoImplement,
    /// Character data could not be converted.
    DataConversion,
    /// Invalid object reference.
    InvObjref,
    /// Internal ORB error.
    Internal,
    /// Deadline expired.
    Timeout,
    /// Any other or unrecognized exception.
    Unknown,
}

impl SystemExceptionKind {
    /// Repository id of the exception type.
    pub fn repository_id(&self) -> &'static str {
        match self {
            Self::Transient => "IDL:omg.org/CORBA/TRANSIENT:1.0",
            Self::CommFailure => "IDL:omg.org/CORBA/COMM_FAILURE:1.0",
            Self::ObjAdapter => "IDL:omg.org/CORBA/OBJ_ADAPTER:1.0",
            Self::ObjectNotExist => "IDL:omg.org/CORBA/OBJECT_NOT_EXIST:1.0",
            Self::Marshal => "IDL:omg.org/CORBA/MARSHAL:1.0",
            Self::BadParam => "IDL:omg.org/CORBA/BAD_PARAM:1.0",
            Self::BadOperation => "IDL:omg.org/CORBA/BAD_OPERATION:1.0",
            Self::NoPermission => "IDL:omg.org/CORBA/NO_PERMISSION:1.0",
            Self::NoImplement => "IDL:omg.org/CORBA/NO_IMPLEMENT:1.0",
            Self::DataConversion => "IDL:omg.org/CORBA/DATA_CONVERSION:1.0",
            Self::InvObjref => "IDL:omg.org/CORBA/INV_OBJREF:1.0",
            Self::Internal => "IDL:omg.org/CORBA/INTERNAL:1.0",
            Self::Timeout => "IDL:omg.org/CORBA/TIMEOUT:1.0",
            Self::Unknown => "IDL:omg.org/CORBA/UNKNOWN:1.0",
        }
    }

    /// Short name of the exception type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::CommFailure => "COMM_FAILURE",
            Self::ObjAdapter => "OBJ_ADAPTER",
            Self::ObjectNotExist => "OBJECT_NOT_EXIST",
            Self::Marshal => "MARSHAL",
            Self::BadParam => "BAD_PARAM",
            Self::BadOperation => "BAD_OPERATION",
            Self::NoPermission => "NO_PERMISSION",
            Self::NoImplement => "NO_IMPLEMENT",
            Self::DataConversion => "DATA_CONVERSION",
            Self::InvObjref => "INV_OBJREF",
            Self::Internal => "INTERNAL",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SystemExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A protocol-level exception raised by the remote side or the local ORB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemException {
    /// Exception type.
    pub kind: SystemExceptionKind,
    /// Vendor minor code.
    pub minor: u32,
    /// Completion status of the operation.
    pub completed: CompletionStatus,
    /// Auxiliary diagnostic text, taken from the exception detail service
    /// context of the reply when present.
    pub detail: Option<String>,
}

impl SystemException {
    /// Create an exception without detail text.
    pub fn new(kind: SystemExceptionKind, minor: u32, completed: CompletionStatus) -> Self {
        Self {
            kind,
            minor,
            completed,
            detail: None,
        }
    }

    /// Attach diagnostic text.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for SystemException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (minor {:#x}, {})", self.kind, self.minor, self.completed)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SystemException {}

/// An application-declared exception, returned to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserException {
    /// Repository id of the exception type.
    pub repository_id: String,
    /// Encoded exception members.
    pub payload: Bytes,
}

impl fmt::Display for UserException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user exception {} ({} bytes)", self.repository_id, self.payload.len())
    }
}

impl std::error::Error for UserException {}
