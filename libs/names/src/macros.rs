//! Macros for defining typed tags.

/// Macro to define a typed tag with a specific kind.
///
/// This generates a newtype wrapper around the tag suffix with:
/// - A `KIND` constant
/// - `parse()` to parse from the full `{kind}-{suffix}` string
/// - `suffix()` to read the kind-specific part
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations (as the tag string)
///
/// The validator receives the suffix and rejects malformed ones.
///
/// # Example
///
/// ```ignore
/// define_tag!(MachineTag, "machine", validate_machine_suffix);
///
/// let tag: MachineTag = "machine-0-lxc-1".parse()?;
/// assert_eq!(tag.suffix(), "0-lxc-1");
/// ```
#[macro_export]
macro_rules! define_tag {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $validate:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// The kind prefix for this tag type.
            pub const KIND: &'static str = $kind;

            /// Parses a tag from its string form.
            ///
            /// The string must be in the format `{kind}-{suffix}`.
            pub fn parse(s: &str) -> Result<Self, $crate::TagError> {
                if s.is_empty() {
                    return Err($crate::TagError::Empty);
                }

                let Some((kind, suffix)) = s.split_once('-') else {
                    return Err($crate::TagError::MissingSeparator(s.to_string()));
                };

                if kind != Self::KIND {
                    return Err($crate::TagError::InvalidKind {
                        expected: Self::KIND,
                        actual: s.to_string(),
                    });
                }

                $validate(suffix)?;
                Ok(Self(suffix.to_string()))
            }

            /// Returns the kind-specific part of the tag.
            #[must_use]
            pub fn suffix(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}-{}", Self::KIND, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::TagError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
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
