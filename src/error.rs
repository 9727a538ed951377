//! Error types for the votask SDK.
//!
//! One crate-wide [`Error`] enum covers the whole surface: package
//! discovery and launch, channel transport, task execution and the
//! parameter-set programming errors. All variants are `Clone` so a
//! background worker can store a failure once and every subsequent
//! `wait()` observes the identical error.

use thiserror::Error;

use crate::types::param::ParamKind;

/// Result type alias using the votask error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by package loading, channel transport, task
/// execution and parameter-set operations.
///
/// Failures are always surfaced synchronously to the caller at the
/// point of the offending call; nothing is retried automatically.
/// Retry, if desired, is the caller's responsibility on a fresh task.
///
/// # Examples
///
/// ```
/// use votask::Error;
///
/// let err = Error::PackageNotFound { name: "vo-cli".to_string() };
/// assert!(err.to_string().contains("vo-cli"));
/// ```
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No package with the given name was resolved through the search path.
    #[error("package not found: {name}")]
    PackageNotFound {
        /// The package name that failed to resolve.
        name: String,
    },

    /// The package binary could not be started, or did not complete the
    /// discovery handshake within the configured launch timeout.
    #[error("failed to launch package {name}: {message}")]
    PackageLaunch {
        /// The package name (or binary path for direct loads).
        name: String,
        /// Description of the launch failure.
        message: String,
    },

    /// The subprocess channel is closed; the package binary has
    /// terminated and must not be reused.
    #[error("package channel closed")]
    ChannelClosed,

    /// An execution is already outstanding on this package's channel.
    #[error("package channel busy: an execution is already outstanding")]
    ChannelBusy,

    /// Invalid task input, detected before any subprocess round-trip.
    #[error("invalid parameters for task {task}: {message}")]
    TaskParameter {
        /// The task whose input was rejected.
        task: String,
        /// What was wrong with the input.
        message: String,
    },

    /// The subprocess reported a runtime failure while executing the
    /// task, or terminated before signalling completion.
    #[error("task {task} failed (status {status}): {message}")]
    TaskExecution {
        /// The task that failed.
        task: String,
        /// The status code reported by the subprocess (-1 when the
        /// subprocess died without reporting one).
        status: i32,
        /// The diagnostic message.
        message: String,
    },

    /// A parameter with this name is already present in the set.
    #[error("duplicate parameter name: {name}")]
    DuplicateName {
        /// The offending parameter name.
        name: String,
    },

    /// No parameter (or task) with this name exists.
    #[error("not found: {name}")]
    NotFound {
        /// The name that was looked up.
        name: String,
    },

    /// A value of the wrong kind was assigned to a typed parameter.
    #[error("type mismatch for parameter {name}: expected {expected}, got {found}")]
    TypeMismatch {
        /// The parameter whose declared kind was violated.
        name: String,
        /// The parameter's declared kind.
        expected: ParamKind,
        /// The kind of the rejected value.
        found: ParamKind,
    },

    /// A name pattern failed to compile as a glob.
    #[error("invalid name pattern {pattern:?}: {message}")]
    InvalidPattern {
        /// The pattern as given by the caller.
        pattern: String,
        /// The glob compilation error.
        message: String,
    },

    /// A malformed frame was received on the channel.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Builds an [`Error::InvalidPattern`] from a failed glob compilation.
    pub(crate) fn invalid_pattern(pattern: &str, err: &glob::PatternError) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::TypeMismatch {
            name: "verbose".to_string(),
            expected: ParamKind::Bool,
            found: ParamKind::String,
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for parameter verbose: expected bool, got string"
        );

        let err = Error::TaskExecution {
            task: "voregistry".to_string(),
            status: 139,
            message: "segmentation fault".to_string(),
        };
        assert!(err.to_string().contains("voregistry"));
        assert!(err.to_string().contains("139"));
    }

    #[test]
    fn errors_are_cloneable() {
        let err = Error::ChannelBusy;
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
