//! Error types for propspace.
//!
//! All errors in propspace are strongly typed using thiserror.
//! This enables pattern matching on specific error conditions
//! and provides clear error messages.
//!
//! Note that *constraint failure* is not an error: a space that has no
//! solution reports [`SpaceStatus::Failed`](crate::SpaceStatus::Failed)
//! from `status`, and search engines treat that as a successful prune.
//! The variants below are programmer contract violations.

use thiserror::Error;

/// Contract violations raised by space operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpaceError {
    /// Clone was requested on a failed space.
    #[error("Space is failed")]
    Failed,

    /// Clone or description was requested before the space reached a
    /// fixpoint.
    #[error("Space is not stable")]
    NotStable,

    /// Description or commit was requested but no branching is left.
    #[error("Space has no branching")]
    NoBranching,

    /// Commit was given an alternative beyond the description's range.
    #[error("Illegal alternative {alternative} (description has {alternatives})")]
    IllegalAlternative {
        /// The requested alternative.
        alternative: u32,
        /// Number of alternatives the description supports.
        alternatives: u32,
    },

    /// Best-solution constraining was requested but the model does not
    /// implement it.
    #[error("Model does not implement constrain")]
    ConstrainUndefined,
}

/// Result type alias for space operations.
pub type SpaceResult<T> = Result<T, SpaceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_alternative_message() {
        let err = SpaceError::IllegalAlternative {
            alternative: 3,
            alternatives: 2,
        };
        let msg = format!("{err}");
        assert!(msg.contains('3'));
        assert!(msg.contains('2'));
    }

    #[test]
    fn test_errors_are_comparable() {
        assert_eq!(SpaceError::Failed, SpaceError::Failed);
        assert_ne!(SpaceError::Failed, SpaceError::NotStable);
    }
}
