//! Error types for the document layer.

use thiserror::Error;

/// Result type for document operations.
pub type DocResult<T> = Result<T, DocError>;

/// Errors raised by document operations.
#[derive(Debug, Error)]
pub enum DocError {
    /// The caller lacks the privilege for the action.
    #[error("authorization failed: {message}")]
    Authorization {
        /// Description of the failed check.
        message: String,
    },

    /// The caller's identity could not be established.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Description of the failure.
        message: String,
    },

    /// The document violates a scope constraint of its engine.
    #[error("out of scope: {message}")]
    OutOfScope {
        /// Description of the violated constraint.
        message: String,
    },

    /// A requested item does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was missing.
        message: String,
    },

    /// A unique constraint would be violated.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the violated constraint.
        message: String,
    },

    /// The request is well formed but cannot be processed in the current state.
    #[error("unprocessable: {message}")]
    Unprocessable {
        /// Why the request cannot be processed.
        message: String,
    },

    /// Field validation failed.
    #[error("validation failed on '{field}': {message}")]
    Validation {
        /// Offending field path.
        field: String,
        /// Description of the failure.
        message: String,
    },

    /// Dependent documents still reference this document.
    #[error("dependency: {message}")]
    Dependency {
        /// Names the blocking dependent type.
        message: String,
    },

    /// A configured limit was exceeded.
    #[error("limit exceeded: {message}")]
    LimitExceeded {
        /// Which limit.
        message: String,
    },

    /// The entity type is unknown or badly declared.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[from] docstore_engine::EngineError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] docstore_codec::CodecError),
}

impl DocError {
    /// Create an authorization error.
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create an out of scope error.
    pub fn out_of_scope(message: impl Into<String>) -> Self {
        Self::OutOfScope {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an unprocessable error.
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::Unprocessable {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a dependency error.
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency {
            message: message.into(),
        }
    }

    /// Create a limit exceeded error.
    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::LimitExceeded {
            message: message.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// HTTP-like status code used in structured bulk results.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::InvalidOperation { .. } => 400,
            Self::Authentication { .. } => 401,
            Self::Authorization { .. } | Self::OutOfScope { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } | Self::Dependency { .. } => 409,
            Self::Unprocessable { .. } => 422,
            Self::LimitExceeded { .. }
            | Self::Schema { .. }
            | Self::Engine(_)
            | Self::Codec(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(DocError::authorization("x").status_code(), 403);
        assert_eq!(DocError::dependency("x").status_code(), 409);
        assert_eq!(DocError::conflict("x").status_code(), 409);
        assert_eq!(DocError::unprocessable("x").status_code(), 422);
        assert_eq!(
            DocError::from(docstore_engine::EngineError::backend("down")).status_code(),
            500
        );
    }

    #[test]
    fn messages() {
        let err = DocError::validation("qty", "required");
        assert_eq!(err.to_string(), "validation failed on 'qty': required");
    }
}
