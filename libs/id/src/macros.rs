//! Macros for defining validated name types.

/// Macro to define a validated, string-backed name type.
///
/// This generates a newtype wrapper around `String` with:
/// - A `KIND` constant used in error messages
/// - `parse()` which runs the given validator
/// - `as_str()` to borrow the canonical form
/// - `Display`, `FromStr` and `AsRef<str>` implementations
/// - `Serialize` and `Deserialize` implementations that re-validate
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_name!(Namespace, "namespace", validate_dns_label);
///
/// let ns: Namespace = "ci".parse()?;
/// ```
#[macro_export]
macro_rules! define_name {
    ($name:ident, $kind:literal, $validate:path) => {
        /// A validated name of this kind.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human readable kind, used in error messages.
            pub const KIND: &'static str = $kind;

            /// Parses and validates a name.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                $validate(Self::KIND, s)?;
                Ok(Self(s.to_string()))
            }

            /// Returns the canonical string form.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
