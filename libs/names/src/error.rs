//! Error types for tag parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating tags.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    /// The tag string is empty.
    #[error("tag cannot be empty")]
    Empty,

    /// The tag has no `-` between kind and suffix.
    #[error("{0:?} is not a valid tag")]
    MissingSeparator(String),

    /// The tag names a different kind of entity.
    #[error("{actual:?} is not a valid {expected} tag")]
    InvalidKind {
        expected: &'static str,
        actual: String,
    },

    /// The kind matched but the suffix is malformed.
    #[error("invalid {kind} id {id:?}")]
    InvalidId { kind: &'static str, id: String },

    /// Unknown container type name.
    #[error("invalid container type {0:?}")]
    InvalidContainerType(String),
}

impl TagError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, TagError::Empty)
    }

    /// Returns true if this error indicates the tag named another kind.
    pub fn is_kind_error(&self) -> bool {
        matches!(
            self,
            TagError::MissingSeparator(_) | TagError::InvalidKind { .. }
        )
    }
}
