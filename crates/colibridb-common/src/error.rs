//! Error definitions for ColibriDB

use thiserror::Error;

/// Represents errors that can occur during ColibriDB operations.
///
/// Every variant maps onto one of the wire-level error codes carried in the
/// response envelope: 400 for rejected input, 404 for missing documents or
/// collections, 409 for conflicting definitions, 500 for storage and
/// internal failures.
#[derive(Error, Debug, Clone)]
pub enum ColibriError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ColibriError>;

impl ColibriError {
    /// Get the inner message without the type prefix.
    /// Useful when re-wrapping errors to avoid "not found: not found: ..."
    pub fn message(&self) -> &str {
        match self {
            ColibriError::Validation(msg) => msg,
            ColibriError::NotFound(msg) => msg,
            ColibriError::Conflict(msg) => msg,
            ColibriError::Io(msg) => msg,
            ColibriError::Internal(msg) => msg,
        }
    }

    /// Get a short error kind name
    pub fn kind(&self) -> &'static str {
        match self {
            ColibriError::Validation(_) => "validation_error",
            ColibriError::NotFound(_) => "not_found",
            ColibriError::Conflict(_) => "conflict",
            ColibriError::Io(_) => "io_error",
            ColibriError::Internal(_) => "internal_error",
        }
    }

    /// Numeric code reported in the response envelope.
    pub fn code(&self) -> u16 {
        match self {
            ColibriError::Validation(_) => 400,
            ColibriError::NotFound(_) => 404,
            ColibriError::Conflict(_) => 409,
            ColibriError::Io(_) => 500,
            ColibriError::Internal(_) => 500,
        }
    }
}

/// Convert std::io::Error to ColibriError
///
/// Shortcut as it's a common error we need
/// to convert from.
impl From<std::io::Error> for ColibriError {
    fn from(err: std::io::Error) -> Self {
        ColibriError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ColibriError {
    fn from(err: serde_json::Error) -> Self {
        ColibriError::Io(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(ColibriError::Validation("x".into()).code(), 400);
        assert_eq!(ColibriError::NotFound("x".into()).code(), 404);
        assert_eq!(ColibriError::Conflict("x".into()).code(), 409);
        assert_eq!(ColibriError::Io("x".into()).code(), 500);
        assert_eq!(ColibriError::Internal("x".into()).code(), 500);
    }

    #[test]
    fn message_strips_prefix() {
        let err = ColibriError::NotFound("no document with id 'u1'".into());
        assert_eq!(err.message(), "no document with id 'u1'");
        assert_eq!(err.to_string(), "not found: no document with id 'u1'");
    }
}
