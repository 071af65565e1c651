//! Text encoding (code set) identifiers and negotiation descriptors.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Registered code-set identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeSetId(pub u32);

impl CodeSetId {
    /// ISO 8859-1 (Latin-1), the fallback for char data.
    pub const ISO_8859_1: CodeSetId = CodeSetId(0x0001_0001);
    /// ISO 646 (US-ASCII).
    pub const ISO_646: CodeSetId = CodeSetId(0x0001_0020);
    /// UCS-2 level 1.
    pub const UCS_2: CodeSetId = CodeSetId(0x0001_0100);
    /// UTF-16.
    pub const UTF_16: CodeSetId = CodeSetId(0x0001_0109);
    /// UTF-8.
    pub const UTF_8: CodeSetId = CodeSetId(0x0501_0001);

    /// Human readable name for the well-known code sets.
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            Self::ISO_8859_1 => Some("ISO-8859-1"),
            Self::ISO_646 => Some("ISO-646"),
            Self::UCS_2 => Some("UCS-2"),
            Self::UTF_16 => Some("UTF-16"),
            Self::UTF_8 => Some("UTF-8"),
            _ => None,
        }
    }
}

impl fmt::Display for CodeSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

/// The code sets one side supports for a single data kind (char or wchar).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSetComponent {
    /// Native code set.
    pub native: CodeSetId,
    /// Code sets this side can convert to and from.
    pub conversion: Vec<CodeSetId>,
}

impl CodeSetComponent {
    /// A component with only a native code set.
    pub fn native(native: CodeSetId) -> Self {
        Self {
            native,
            conversion: Vec::new(),
        }
    }

    /// Add conversion code sets.
    pub fn with_conversion(mut self, conversion: impl IntoIterator<Item = CodeSetId>) -> Self {
        self.conversion.extend(conversion);
        self
    }

    /// Whether `id` is the native set or one of the conversion sets.
    pub fn supports(&self, id: CodeSetId) -> bool {
        self.native == id || self.conversion.contains(&id)
    }
}

/// Code sets advertised for both char and wchar data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSetComponentInfo {
    /// Char (narrow) data.
    pub char_component: CodeSetComponent,
    /// Wide char data.
    pub wchar_component: CodeSetComponent,
}

impl Default for CodeSetComponentInfo {
    /// Latin-1 native with UTF-8 conversion for char, UTF-16 for wchar.
    fn default() -> Self {
        Self {
            char_component: CodeSetComponent::native(CodeSetId::ISO_8859_1).with_conversion([CodeSetId::UTF_8]),
            wchar_component: CodeSetComponent::native(CodeSetId::UTF_16),
        }
    }
}

/// Negotiated transmission code sets, as carried in the code-set service context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSetContext {
    /// Transmission code set for char data.
    pub char_data: CodeSetId,
    /// Transmission code set for wchar data. `None` when wide characters are
    /// illegal on the connection.
    pub wchar_data: Option<CodeSetId>,
}

impl fmt::Display for CodeSetContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.wchar_data {
            Some(wchar) => write!(f, "char={} wchar={}", self.char_data, wchar),
            None => write!(f, "char={} wchar=<none>", self.char_data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codeset_names() {
        assert_eq!(CodeSetId::UTF_8.to_string(), "UTF-8");
        assert_eq!(CodeSetId(0x1234).to_string(), "0x00001234");
    }

    #[test]
    fn test_component_supports() {
        let component = CodeSetComponent::native(CodeSetId::ISO_8859_1).with_conversion([CodeSetId::UTF_8]);
        assert!(component.supports(CodeSetId::ISO_8859_1));
        assert!(component.supports(CodeSetId::UTF_8));
        assert!(!component.supports(CodeSetId::UTF_16));
    }

    #[test]
    fn test_default_info() {
        let info = CodeSetComponentInfo::default();
        assert_eq!(info.char_component.native, CodeSetId::ISO_8859_1);
        assert_eq!(info.wchar_component.native, CodeSetId::UTF_16);
    }
}
