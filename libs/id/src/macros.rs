//! Macro for defining typed ID types.

/// Defines a typed ID newtype with a fixed prefix.
///
/// The generated type wraps a ULID and provides:
/// - A `PREFIX` constant
/// - `new()` to generate a fresh ID
/// - `parse()` with strict prefix validation
/// - `Display`, `FromStr`, `Serialize`, and `Deserialize` implementations
///
/// # Example
///
/// ```ignore
/// define_id!(ResourceId, "res");
///
/// let id = ResourceId::new();
/// let parsed: ResourceId = "res_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        /// A typed ID for this resource type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Ulid);

        impl $name {
            /// The prefix for this ID type.
            pub const PREFIX: &'static str = $prefix;

            /// Creates a new ID with a fresh ULID.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Ulid::new())
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn ulid(&self) -> $crate::Ulid {
                self.0
            }

            /// Parses an ID from a string in the format `{prefix}_{ulid}`.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                let Some((prefix, ulid_str)) = s.split_once('_') else {
                    return Err($crate::IdError::MissingSeparator);
                };

                if prefix != Self::PREFIX {
                    return Err($crate::IdError::InvalidPrefix {
                        expected: Self::PREFIX,
                        actual: prefix.to_string(),
                    });
                }

                let ulid = ulid_str
                    .parse::<$crate::Ulid>()
                    .map_err(|e| $crate::IdError::InvalidUlid(e.to_string()))?;

                Ok(Self(ulid))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
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
