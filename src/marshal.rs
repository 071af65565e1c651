//! Marshal collaborator.
//!
//! The engine never looks at payload bytes. It hands a [`RequestHeader`] and
//! the caller's pre-encoded arguments to a [`Marshaler`], and gets back a
//! classified [`ReplyMessage`].

use bytes::Bytes;
use giop_dispatch_types::CodeSetContext;
use giop_dispatch_types::ReplyMessage;
use giop_dispatch_types::RequestHeader;
use giop_dispatch_types::UserException;
use serde::Deserialize;
use serde::Serialize;

use crate::error::MarshalError;

/// Encodes requests and decodes replies for one wire format.
pub trait Marshaler: Send + Sync {
    /// Encode a complete request frame.
    ///
    /// `codesets` is the connection's negotiated transmission code sets, or
    /// `None` for protocol versions without negotiation. A context whose
    /// `wchar_data` is `None` forbids wide characters. The dispatcher already
    /// refuses invocations marked with
    /// [`Invocation::with_wide_chars`](crate::Invocation::with_wide_chars) on
    /// such connections; a marshaler that finds wide characters in the
    /// arguments anyway must fail with [`MarshalError::WideCharNotAllowed`]
    /// rather than guess.
    fn encode_request(
        &self,
        header: &RequestHeader,
        args: &Bytes,
        codesets: Option<&CodeSetContext>,
    ) -> Result<Bytes, MarshalError>;

    /// Decode a reply frame into its header, contexts and classified body.
    fn decode_reply(&self, frame: &Bytes) -> Result<ReplyMessage, MarshalError>;

    /// Decode the result of a normal reply.
    fn decode_result(&self, body: Bytes) -> Result<Bytes, MarshalError>;

    /// Decode a user exception body, including its repository id.
    fn decode_user_exception(&self, body: Bytes) -> Result<UserException, MarshalError>;
}

// ============================================================================
// Postcard
// ============================================================================

/// A request frame as encoded by [`PostcardMarshaler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    /// Request header, including service contexts.
    pub header: RequestHeader,
    /// Caller-encoded arguments.
    pub args: Bytes,
    /// Transmission code sets the request was encoded with.
    pub codesets: Option<CodeSetContext>,
}

/// Marshaler using postcard for headers and passing payloads through.
///
/// Results and user exception members are opaque to the engine, so the
/// result of a normal reply is returned as the server produced it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardMarshaler;

impl PostcardMarshaler {
    /// Decode a request frame, as a server would.
    pub fn decode_request(&self, frame: &[u8]) -> Result<WireRequest, MarshalError> {
        postcard::from_bytes(frame).map_err(|e| MarshalError::Decode { reason: e.to_string() })
    }

    /// Encode a reply frame, as a server would.
    pub fn encode_reply(&self, reply: &ReplyMessage) -> Result<Bytes, MarshalError> {
        let bytes = postcard::to_stdvec(reply).map_err(|e| MarshalError::Encode {
            operation: format!("reply {}", reply.request_id),
            reason: e.to_string(),
        })?;
        Ok(Bytes::from(bytes))
    }

    /// Encode a user exception body for [`ReplyBody::UserException`].
    ///
    /// [`ReplyBody::UserException`]: giop_dispatch_types::ReplyBody::UserException
    pub fn encode_user_exception(&self, exception: &UserException) -> Result<Bytes, MarshalError> {
        let bytes = postcard::to_stdvec(exception).map_err(|e| MarshalError::Encode {
            operation: exception.repository_id.clone(),
            reason: e.to_string(),
        })?;
        Ok(Bytes::from(bytes))
    }
}

impl Marshaler for PostcardMarshaler {
    fn encode_request(
        &self,
        header: &RequestHeader,
        args: &Bytes,
        codesets: Option<&CodeSetContext>,
    ) -> Result<Bytes, MarshalError> {
        let request = WireRequest {
            header: header.clone(),
            args: args.clone(),
            codesets: codesets.copied(),
        };
        let bytes = postcard::to_stdvec(&request).map_err(|e| MarshalError::Encode {
            operation: header.operation.clone(),
            reason: e.to_string(),
        })?;
        Ok(Bytes::from(bytes))
    }

    fn decode_reply(&self, frame: &Bytes) -> Result<ReplyMessage, MarshalError> {
        postcard::from_bytes(frame).map_err(|e| MarshalError::Decode { reason: e.to_string() })
    }

    fn decode_result(&self, body: Bytes) -> Result<Bytes, MarshalError> {
        Ok(body)
    }

    fn decode_user_exception(&self, body: Bytes) -> Result<UserException, MarshalError> {
        postcard::from_bytes(&body).map_err(|e| MarshalError::Decode { reason: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use giop_dispatch_types::CodeSetId;
    use giop_dispatch_types::EndpointDescriptor;
    use giop_dispatch_types::GiopVersion;
    use giop_dispatch_types::ObjectReference;
    use giop_dispatch_types::ReplyBody;
    use giop_dispatch_types::RequestId;
    use giop_dispatch_types::ServiceContexts;
    use giop_dispatch_types::TargetAddress;

    use super::*;

    fn header() -> RequestHeader {
        let endpoint = EndpointDescriptor::new("alpha", 2809, GiopVersion::V1_2);
        let reference = ObjectReference::new("IDL:Echo:1.0", &b"key"[..]).with_profile(endpoint.clone());
        RequestHeader {
            request_id: RequestId(7),
            operation: "echo".to_owned(),
            response_expected: true,
            target: TargetAddress::for_endpoint(&endpoint, &reference),
            version: GiopVersion::V1_2,
            service_contexts: ServiceContexts::new(),
        }
    }

    #[test]
    fn test_server_sees_what_client_encoded() {
        let codesets = CodeSetContext {
            char_data: CodeSetId::UTF_8,
            wchar_data: None,
        };
        let frame = PostcardMarshaler.encode_request(&header(), &Bytes::from_static(b"args"), Some(&codesets)).unwrap();
        let request = PostcardMarshaler.decode_request(&frame).unwrap();
        assert_eq!(request.header, header());
        assert_eq!(&request.args[..], b"args");
        assert_eq!(request.codesets, Some(codesets));
    }

    #[test]
    fn test_user_exception_body_decodes() {
        let exception = UserException {
            repository_id: "IDL:NotFound:1.0".to_owned(),
            payload: Bytes::from_static(b"\x01"),
        };
        let body = PostcardMarshaler.encode_user_exception(&exception).unwrap();
        let reply = ReplyMessage {
            request_id: RequestId(3),
            service_contexts: ServiceContexts::new(),
            body: ReplyBody::UserException(body),
        };
        let frame = PostcardMarshaler.encode_reply(&reply).unwrap();
        let decoded = PostcardMarshaler.decode_reply(&frame).unwrap();
        let ReplyBody::UserException(body) = decoded.body else {
            panic!("expected a user exception body");
        };
        assert_eq!(PostcardMarshaler.decode_user_exception(body).unwrap(), exception);
    }

    #[test]
    fn test_garbage_reply_is_a_decode_error() {
        let err = PostcardMarshaler.decode_reply(&Bytes::from_static(&[0xff; 3])).unwrap_err();
        assert!(matches!(err, MarshalError::Decode { .. }));
    }
}
