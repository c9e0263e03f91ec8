//! Error type shared by every worker in the crate.
//!
//! A worker's terminal error is latched once and handed to every caller of
//! `wait`, so the type is `Clone` and comparable.

use tether_names::TagError;
use thiserror::Error;

/// Result alias used throughout the provisioner.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by provisioners and their collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Returned by `err()` while the worker has not finished.
    #[error("worker is still alive")]
    StillAlive,

    /// Returned by a loop that stopped because it was asked to. Latched as a
    /// clean exit, never surfaced by `wait`.
    #[error("worker is dying")]
    Dying,

    /// Entity missing from state.
    #[error("{0} not found")]
    NotFound(String),

    /// Capability not offered by the backend.
    #[error("{0} not implemented")]
    NotImplemented(String),

    /// Environment configuration rejected.
    #[error("invalid environment configuration: {0}")]
    InvalidConfig(String),

    /// Malformed entity tag.
    #[error(transparent)]
    Tag(#[from] TagError),

    /// Backend or transport failure reported by the state client.
    #[error("state: {0}")]
    State(String),

    /// A watcher closed its change stream without reporting a failure.
    #[error("{0} stopped unexpectedly")]
    WatcherStopped(String),

    /// A worker loop panicked.
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// An error with the sub-worker or operation that produced it.
    #[error("{context}: {source}")]
    Annotated { context: String, source: Box<Error> },
}

impl Error {
    /// Wraps the error with the name of the sub-worker or operation that
    /// produced it.
    #[must_use]
    pub fn annotate(self, context: impl Into<String>) -> Self {
        Error::Annotated {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, looking through annotations.
    pub fn root_cause(&self) -> &Error {
        let mut err = self;
        while let Error::Annotated { source, .. } = err {
            err = source;
        }
        err
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Error::NotFound(_))
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self.root_cause(), Error::NotImplemented(_))
    }

    pub fn is_dying(&self) -> bool {
        matches!(self.root_cause(), Error::Dying)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotate_preserves_root_cause() {
        let err = Error::NotFound("machine 0".to_string())
            .annotate("self machine")
            .annotate("container provisioner");

        assert_eq!(
            err.to_string(),
            "container provisioner: self machine: machine 0 not found"
        );
        assert_eq!(err.root_cause(), &Error::NotFound("machine 0".to_string()));
        assert!(err.is_not_found());
        assert!(!err.is_not_implemented());
    }

    #[test]
    fn test_predicates_on_plain_errors() {
        assert!(Error::NotImplemented("retry watcher".into()).is_not_implemented());
        assert!(Error::Dying.is_dying());
        assert!(!Error::State("boom".into()).is_dying());
    }

    #[test]
    fn test_tag_error_conversion() {
        let err: Error = TagError::Empty.into();
        assert_eq!(err.to_string(), "tag cannot be empty");
    }
}
