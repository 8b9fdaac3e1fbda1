//! Name definitions for pools and the values read from pool records.
//!
//! Namespaces follow Kubernetes DNS-1123 label rules. Pool names follow the
//! label value rules since every launched worker carries its pool name as a
//! label value.

use crate::define_name;
use crate::IdError;

/// Maximum length of a DNS-1123 label.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Maximum length of a label value.
pub const MAX_LABEL_VALUE_LENGTH: usize = 63;

/// Maximum environment key length in bytes.
pub const MAX_ENV_KEY_LENGTH: usize = 256;

// =============================================================================
// Validators
// =============================================================================

fn validate_label(kind: &'static str, s: &str, max: usize) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { kind });
    }

    if s.len() > max {
        return Err(IdError::TooLong {
            kind,
            value: s.to_string(),
            len: s.len(),
            max,
        });
    }

    if let Some(ch) = s
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(IdError::InvalidCharacter {
            kind,
            value: s.to_string(),
            ch,
        });
    }

    if s.starts_with('-') || s.ends_with('-') {
        return Err(IdError::InvalidEdge {
            kind,
            value: s.to_string(),
        });
    }

    Ok(())
}

fn validate_dns_label(kind: &'static str, s: &str) -> Result<(), IdError> {
    validate_label(kind, s, MAX_LABEL_LENGTH)
}

fn validate_label_value(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { kind });
    }

    if s.len() > MAX_LABEL_VALUE_LENGTH {
        return Err(IdError::TooLong {
            kind,
            value: s.to_string(),
            len: s.len(),
            max: MAX_LABEL_VALUE_LENGTH,
        });
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if let Some(ch) = s.chars().find(|c| !allowed(*c)) {
        return Err(IdError::InvalidCharacter {
            kind,
            value: s.to_string(),
            ch,
        });
    }

    let alphanumeric = |c: char| c.is_ascii_alphanumeric();
    if !s.starts_with(alphanumeric) || !s.ends_with(alphanumeric) {
        return Err(IdError::InvalidEdge {
            kind,
            value: s.to_string(),
        });
    }

    Ok(())
}

fn validate_resource_class(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { kind });
    }

    if let Some(ch) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdError::InvalidCharacter {
            kind,
            value: s.to_string(),
            ch,
        });
    }

    Ok(())
}

fn validate_env_key(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { kind });
    }

    if s.len() > MAX_ENV_KEY_LENGTH {
        return Err(IdError::TooLong {
            kind,
            value: s.to_string(),
            len: s.len(),
            max: MAX_ENV_KEY_LENGTH,
        });
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
    if let Some(ch) = s.chars().find(|c| !allowed(*c)) {
        return Err(IdError::InvalidCharacter {
            kind,
            value: s.to_string(),
            ch,
        });
    }

    if s.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(IdError::InvalidEdge {
            kind,
            value: s.to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Names
// =============================================================================

define_name!(Namespace, "namespace", validate_dns_label);
define_name!(PoolName, "pool name", validate_label_value);
define_name!(ResourceClass, "resource class", validate_resource_class);
define_name!(EnvKey, "environment key", validate_env_key);

// =============================================================================
// Pool References
// =============================================================================

/// Reference to a runner pool: `{namespace}/{pool}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolRef {
    pub namespace: Namespace,
    pub name: PoolName,
}

impl PoolRef {
    /// Creates a pool reference from already validated parts.
    #[must_use]
    pub fn new(namespace: Namespace, name: PoolName) -> Self {
        Self { namespace, name }
    }

    /// Parses `namespace/pool`, trimming surrounding whitespace.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        let mut parts = s.split('/');
        let (Some(namespace), Some(name), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(IdError::InvalidPoolRef(s.to_string()));
        };

        Ok(Self {
            namespace: Namespace::parse(namespace)?,
            name: PoolName::parse(name)?,
        })
    }
}

impl std::fmt::Display for PoolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for PoolRef {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for PoolRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for PoolRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Parses the fleet pool list: comma-separated pool references.
///
/// Order is preserved. An empty entry (for example a trailing comma) makes
/// the whole list malformed. An empty or blank string yields an empty list.
pub fn parse_pool_list(s: &str) -> Result<Vec<PoolRef>, IdError> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }

    s.split(',').map(PoolRef::parse).collect()
}

// =============================================================================
// Tests
// =============================================================================
