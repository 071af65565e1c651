//! Code-set selection between client and server capabilities.

use giop_dispatch_types::CodeSetComponent;
use giop_dispatch_types::CodeSetComponentInfo;
use giop_dispatch_types::CodeSetContext;
use giop_dispatch_types::CodeSetId;

/// Char code set used when negotiation cannot agree on one.
pub const FALLBACK_CHAR_CODESET: CodeSetId = CodeSetId::ISO_8859_1;

/// Result of negotiating both code sets for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeSetNegotiation {
    /// Transmission code sets to use.
    pub context: CodeSetContext,
    /// True when at least one component fell back because no common code set
    /// was found, or the server advertised none.
    pub degraded: bool,
}

/// Select the transmission code set for one data kind.
///
/// Preference order:
/// 1. Both natives match.
/// 2. The server can convert from the client native.
/// 3. The client can convert to the server native.
/// 4. The first client conversion set the server also converts.
///
/// Returns `None` when the two sides share nothing.
#[inline]
pub fn select_codeset(client: &CodeSetComponent, server: &CodeSetComponent) -> Option<CodeSetId> {
    if client.native == server.native {
        return Some(client.native);
    }
    if server.conversion.contains(&client.native) {
        return Some(client.native);
    }
    if client.conversion.contains(&server.native) {
        return Some(server.native);
    }
    client.conversion.iter().copied().find(|id| server.conversion.contains(id))
}

/// Negotiate char and wchar code sets.
///
/// Truth table:
/// | Server info | char        | wchar       | Result                          |
/// |-------------|-------------|-------------|---------------------------------|
/// | absent      | *           | *           | fallback char, no wchar, degraded |
/// | present     | selected    | selected    | both, not degraded              |
/// | present     | selected    | none        | char, no wchar, degraded        |
/// | present     | none        | *           | fallback char, no wchar, degraded |
///
/// Once char negotiation fails the whole negotiation is considered failed, so
/// wide characters are also disallowed.
#[inline]
pub fn negotiate_codesets(client: &CodeSetComponentInfo, server: Option<&CodeSetComponentInfo>) -> CodeSetNegotiation {
    let Some(server) = server else {
        return fallback();
    };
    let Some(char_data) = select_codeset(&client.char_component, &server.char_component) else {
        return fallback();
    };
    let wchar_data = select_codeset(&client.wchar_component, &server.wchar_component);
    CodeSetNegotiation {
        context: CodeSetContext { char_data, wchar_data },
        degraded: wchar_data.is_none(),
    }
}

#[inline]
fn fallback() -> CodeSetNegotiation {
    CodeSetNegotiation {
        context: CodeSetContext {
            char_data: FALLBACK_CHAR_CODESET,
            wchar_data: None,
        },
        degraded: true,
    }
}
