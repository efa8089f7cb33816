//! Common result and error types for kiln.

/// Result type for operations whose only failure is a broken internal invariant.
pub type KilnResult<T> = Result<T, InternalError>;

/// A bug in kiln itself, not a problem with the user's design or stimulus.
#[derive(Debug, thiserror::Error)]
#[error("internal error: {message}")]
pub struct InternalError {
    /// Description of the violated invariant.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}
