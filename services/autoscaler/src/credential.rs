//! Queue credential handling.

/// Opaque token that authenticates runner queue calls for one pool.
///
/// The token is only reachable through [`Credential::expose`]; `Debug` and
/// `Display` print `[REDACTED]` so it cannot leak through log fields.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token, trimming surrounding whitespace (secrets created from
    /// files usually carry a trailing newline).
    ///
    /// Returns `None` for an empty token.
    pub fn new(token: impl AsRef<str>) -> Option<Self> {
        let token = token.as_ref().trim();
        if token.is_empty() {
            None
        } else {
            Some(Self(token.to_string()))
        }
    }

    /// Borrow the raw token for an outgoing request.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}
