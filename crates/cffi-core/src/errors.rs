//! Error types for the FFI runtime

use thiserror::Error;

/// Every failure the runtime can report back to the embedding host.
///
/// All variants except [`FfiError::NativeCall`] are ordinary recoverable
/// errors at the scripting boundary. `NativeCall` marks a failure that
/// happened inside a callback trampoline while native code was on the
/// stack; the host must treat the enclosing native call as failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FfiError {
    /// Wrong kind or shape of value for the requested operation
    #[error("{0}")]
    Type(String),

    /// Wrong argument count or kind at an API boundary
    #[error("bad argument #{position} to '{function}' ({message})")]
    Argument {
        position: usize,
        function: String,
        message: String,
    },

    /// Propagated from the declaration parser / type store
    #[error("{0}")]
    Declaration(String),

    /// A callback was invoked or manipulated after being freed
    #[error("bad callback")]
    BadCallback,

    /// A host error raised while native code was calling back into the host
    #[error("error in callback: {0}")]
    NativeCall(String),

    /// Integer division by zero and similar evaluation failures
    #[error("{0}")]
    Arithmetic(String),

    /// Failure to load a shared library
    #[error("{0}")]
    Library(String),

    /// An error raised by a host function (the script side)
    #[error("{0}")]
    Runtime(String),
}

impl FfiError {
    pub fn type_error(message: impl Into<String>) -> Self {
        FfiError::Type(message.into())
    }

    pub fn argument(position: usize, function: &str, message: impl Into<String>) -> Self {
        FfiError::Argument {
            position,
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub fn declaration(message: impl Into<String>) -> Self {
        FfiError::Declaration(message.into())
    }

    /// Create a runtime error, the kind host functions raise
    pub fn runtime(message: impl Into<String>) -> Self {
        FfiError::Runtime(message.into())
    }

    /// Whether the host may catch this error with ordinary error handling
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FfiError::NativeCall(_))
    }
}

pub type Result<T, E = FfiError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_error_display() {
        let err = FfiError::argument(2, "copy", "cannot convert 'number' to 'void *'");
        assert_eq!(
            err.to_string(),
            "bad argument #2 to 'copy' (cannot convert 'number' to 'void *')"
        );
    }

    #[test]
    fn test_native_call_is_not_recoverable() {
        assert!(!FfiError::NativeCall("boom".into()).is_recoverable());
        assert!(FfiError::BadCallback.is_recoverable());
        assert!(FfiError::type_error("x").is_recoverable());
    }

    #[test]
    fn test_bad_callback_message() {
        assert_eq!(FfiError::BadCallback.to_string(), "bad callback");
    }
}
