//! Endpoint and object-reference types.
//!
//! An [`EndpointDescriptor`] is one resolved network target for an object
//! reference. It is used as the key of the connection cache, so its equality
//! and hash cover only the connection identity (server address and protocol
//! version). The addressing disposition is an encoding choice for requests
//! sent over that connection and does not select a different connection.

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::codeset::CodeSetComponentInfo;

// ============================================================================
// Protocol Version
// ============================================================================

/// Protocol version advertised by a profile (major.minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GiopVersion {
    /// Major version number.
    pub major: u8,
    /// Minor version number.
    pub minor: u8,
}

impl GiopVersion {
    /// Version 1.0.
    pub const V1_0: GiopVersion = GiopVersion::new(1, 0);
    /// Version 1.1.
    pub const V1_1: GiopVersion = GiopVersion::new(1, 1);
    /// Version 1.2, the first version with target addressing dispositions.
    pub const V1_2: GiopVersion = GiopVersion::new(1, 2);

    /// Create a version from its parts.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether requests of this version carry an explicit addressing disposition.
    ///
    /// Older versions always address the target by object key.
    pub fn supports_addressing_disposition(&self) -> bool {
        *self >= Self::V1_2
    }

    /// Whether code-set negotiation applies to this version.
    pub fn supports_codesets(&self) -> bool {
        *self >= Self::V1_1
    }
}

impl Default for GiopVersion {
    fn default() -> Self {
        Self::V1_2
    }
}

impl fmt::Display for GiopVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ============================================================================
// Addressing Disposition
// ============================================================================

/// On-wire convention used to identify the target object within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u16)]
pub enum AddressingDisposition {
    /// Target identified by its object key.
    #[default]
    ObjectKey = 0,
    /// Target identified by the full profile it was reached through.
    Profile = 1,
    /// Target identified by the complete object reference.
    Reference = 2,
}

impl AddressingDisposition {
    /// Decode a wire value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::ObjectKey),
            1 => Some(Self::Profile),
            2 => Some(Self::Reference),
            _ => None,
        }
    }

    /// Wire value of this disposition.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for AddressingDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectKey => write!(f, "KeyAddr"),
            Self::Profile => write!(f, "ProfileAddr"),
            Self::Reference => write!(f, "ReferenceAddr"),
        }
    }
}

// ============================================================================
// Endpoint Descriptor
// ============================================================================

/// Network location of a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerAddress {
    /// Host name or literal IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ServerAddress {
    /// Create a server address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One candidate server target for an invocation.
///
/// Immutable once constructed. Changing the addressing disposition produces a
/// new descriptor (see [`EndpointDescriptor::with_addressing`]) that compares
/// equal to the original, so both share one cached connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    address: ServerAddress,
    version: GiopVersion,
    addressing: AddressingDisposition,
}

impl EndpointDescriptor {
    /// Create a descriptor addressing targets by object key.
    pub fn new(host: impl Into<String>, port: u16, version: GiopVersion) -> Self {
        Self {
            address: ServerAddress::new(host, port),
            version,
            addressing: AddressingDisposition::ObjectKey,
        }
    }

    /// Copy of this descriptor using a different addressing disposition.
    pub fn with_addressing(&self, addressing: AddressingDisposition) -> Self {
        Self {
            address: self.address.clone(),
            version: self.version,
            addressing,
        }
    }

    /// Server address of this endpoint.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Protocol version spoken to this endpoint.
    pub fn version(&self) -> GiopVersion {
        self.version
    }

    /// Addressing disposition used for requests to this endpoint.
    pub fn addressing(&self) -> AddressingDisposition {
        self.addressing
    }
}

impl PartialEq for EndpointDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.version == other.version
    }
}

impl Eq for EndpointDescriptor {}

impl Hash for EndpointDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (v{}, {})", self.address, self.version, self.addressing)
    }
}

// ============================================================================
// Object Reference
// ============================================================================

/// Identifier selecting which dispatcher implementation handles a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SubcontractId(pub u32);

impl SubcontractId {
    /// The full-protocol remote subcontract, also the registry fallback.
    pub const DEFAULT: SubcontractId = SubcontractId(0);
    /// Colocated references served without going through the protocol.
    pub const COLOCATED: SubcontractId = SubcontractId(1);
}

impl fmt::Display for SubcontractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scid:{}", self.0)
    }
}

/// A remote object reference: type, key and the ordered profiles it can be
/// reached through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    /// Repository id of the most derived interface.
    pub repository_id: String,
    /// Opaque key identifying the object within its server.
    pub object_key: Bytes,
    /// Candidate endpoints, in preference order.
    pub profiles: Vec<EndpointDescriptor>,
    /// Code sets the server advertises, if any.
    pub codesets: Option<CodeSetComponentInfo>,
    /// Dispatcher selection for this reference.
    pub subcontract_id: SubcontractId,
}

impl ObjectReference {
    /// Create a reference with no profiles.
    pub fn new(repository_id: impl Into<String>, object_key: impl Into<Bytes>) -> Self {
        Self {
            repository_id: repository_id.into(),
            object_key: object_key.into(),
            profiles: Vec::new(),
            codesets: None,
            subcontract_id: SubcontractId::DEFAULT,
        }
    }

    /// Append a candidate endpoint.
    pub fn with_profile(mut self, endpoint: EndpointDescriptor) -> Self {
        self.profiles.push(endpoint);
        self
    }

    /// Set the code sets advertised by the server.
    pub fn with_codesets(mut self, codesets: CodeSetComponentInfo) -> Self {
        self.codesets = Some(codesets);
        self
    }

    /// Set the dispatcher subcontract.
    pub fn with_subcontract(mut self, id: SubcontractId) -> Self {
        self.subcontract_id = id;
        self
    }

    /// A reference without any profile cannot be invoked remotely.
    pub fn is_nil(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} profiles)", self.repository_id, self.profiles.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_endpoint_equality_ignores_addressing() {
        let a = EndpointDescriptor::new("alpha", 2809, GiopVersion::V1_2);
        let b = a.with_addressing(AddressingDisposition::Profile);
        assert_eq!(a, b);
        assert_eq!(b.addressing(), AddressingDisposition::Profile);
    }

    #[test]
    fn test_endpoint_equality_across_instances() {
        let a = EndpointDescriptor::new("alpha", 2809, GiopVersion::V1_2);
        let b = EndpointDescriptor::new(String::from("alpha"), 2809, GiopVersion::V1_2);
        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn test_endpoint_inequality_on_port_and_version() {
        let a = EndpointDescriptor::new("alpha", 2809, GiopVersion::V1_2);
        assert_ne!(a, EndpointDescriptor::new("alpha", 2810, GiopVersion::V1_2));
        assert_ne!(a, EndpointDescriptor::new("alpha", 2809, GiopVersion::V1_1));
    }

    #[test]
    fn test_addressing_wire_values() {
        for mode in [
            AddressingDisposition::ObjectKey,
            AddressingDisposition::Profile,
            AddressingDisposition::Reference,
        ] {
            assert_eq!(AddressingDisposition::from_u16(mode.as_u16()), Some(mode));
        }
        assert_eq!(AddressingDisposition::from_u16(7), None);
    }

    #[test]
    fn test_version_capabilities() {
        assert!(!GiopVersion::V1_0.supports_codesets());
        assert!(GiopVersion::V1_1.supports_codesets());
        assert!(!GiopVersion::V1_1.supports_addressing_disposition());
        assert!(GiopVersion::V1_2.supports_addressing_disposition());
    }

    fn hash_of(endpoint: &EndpointDescriptor) -> u64 {
        use std::collections::hash_map::DefaultHasher;

        let mut hasher = DefaultHasher::new();
        endpoint.hash(&mut hasher);
        hasher.finish()
    }

    proptest::proptest! {
        #[test]
        fn prop_addressing_never_changes_identity(
            host in "[a-z]{1,12}",
            port in 1u16..,
            minor in 0u8..3,
            mode in 0u16..3,
        ) {
            let endpoint = EndpointDescriptor::new(host, port, GiopVersion::new(1, minor));
            let mode = AddressingDisposition::from_u16(mode).unwrap();
            let retargeted = endpoint.with_addressing(mode);
            proptest::prop_assert_eq!(&endpoint, &retargeted);
            proptest::prop_assert_eq!(hash_of(&endpoint), hash_of(&retargeted));
        }
    }

    #[test]
    fn test_reference_builder() {
        let reference = ObjectReference::new("IDL:Echo:1.0", &b"key"[..])
            .with_profile(EndpointDescriptor::new("alpha", 1, GiopVersion::V1_2))
            .with_subcontract(SubcontractId::COLOCATED);
        assert!(!reference.is_nil());
        assert_eq!(reference.subcontract_id, SubcontractId::COLOCATED);
        assert!(ObjectReference::new("IDL:Echo:1.0", Bytes::new()).is_nil());
    }
}
