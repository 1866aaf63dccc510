//! Error taxonomy shared by every layer of the crate
//!
//! Failures raised deep inside a nested structure (a buffer inside a binding list inside a
//! shader unit inside an operation tree) are propagated unchanged to the submission call,
//! carrying the label of the object that failed.

use crate::backend::BackendError;

/// Crate-wide result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by resolution, encoding and submission
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The graph was authored incorrectly (missing entry point, bad descriptor, unknown format)
    #[error("configuration error in {object}: {reason}")]
    Configuration {
        /// Label of the offending resource, pipeline or unit
        object: String,
        /// What was wrong with it
        reason: String,
    },

    /// The backend could not allocate memory for a resource
    #[error("could not allocate {object}: {reason}")]
    ResourceExhausted {
        /// Label of the resource that failed to allocate
        object: String,
        /// Backend diagnostic
        reason: String,
    },

    /// The queue could not provide a command buffer; the caller may retry on a later frame
    #[error("no command buffer available: {reason}")]
    CommandBufferUnavailable {
        /// Backend diagnostic
        reason: String,
    },

    /// An inline constant was used where addressable GPU memory is required
    #[error("{object} is an inline constant and has no backing GPU memory")]
    NoBackingMemory {
        /// Label of the constant
        object: String,
    },

    /// A handle was read before the resource was resolved
    #[error("{object} has not been resolved yet")]
    Unresolved {
        /// Label of the resource
        object: String,
    },

    /// Finished GPU results could not be written out by a host step
    #[error("could not export {object}: {reason}")]
    Export {
        /// Label of the exported resource or step
        object: String,
        /// What went wrong while reading back or writing
        reason: String,
    },

    /// The GPU reported a failure while the caller waited for completion
    #[error("GPU work did not complete: {reason}")]
    Completion {
        /// Backend diagnostic
        reason: String,
    },
}

impl Error {
    /// Shorthand for [`Error::Configuration`]
    pub fn configuration(object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            object: object.into(),
            reason: reason.into(),
        }
    }

    /// Converts a backend failure for the named object into a crate error
    pub fn from_backend(object: impl Into<String>, error: BackendError) -> Self {
        let object = object.into();
        match error {
            BackendError::OutOfMemory(reason) => Self::ResourceExhausted { object, reason },
            BackendError::Validation(reason) => Self::Configuration { object, reason },
            BackendError::Unavailable(reason) => Self::CommandBufferUnavailable { reason },
            BackendError::Lost(reason) => Self::Completion { reason },
        }
    }

    /// Whether a caller may reasonably try again later (for example on the next frame)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. } | Self::CommandBufferUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_their_kind() {
        let err = Error::from_backend("scratch", BackendError::OutOfMemory("heap full".into()));
        assert!(matches!(err, Error::ResourceExhausted { ref object, .. } if object == "scratch"));
        assert!(err.is_retryable());

        let err = Error::from_backend("blur", BackendError::Validation("no entry point".into()));
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(!err.is_retryable());

        let err = Error::from_backend("queue", BackendError::Unavailable("exhausted".into()));
        assert!(matches!(err, Error::CommandBufferUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn messages_name_the_offending_object() {
        let err = Error::configuration("copy pipeline", "entry point `copy_frag` not found");
        assert_eq!(err.to_string(), "configuration error in copy pipeline: entry point `copy_frag` not found");

        let err = Error::NoBackingMemory { object: "time".into() };
        assert_eq!(err.to_string(), "time is an inline constant and has no backing GPU memory");
    }
}
