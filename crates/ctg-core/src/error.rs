//! Error handling for the CTG pipeline
//!
//! One error type shared by every crate in the workspace. Errors local to a
//! fragment, a channel or a statistic are absorbed by the callers; only the
//! variants that make a whole request meaningless reach the client.

use core::fmt;

/// Result type alias for CTG pipeline operations
pub type CtgResult<T> = Result<T, CtgError>;

/// Error type for all CTG pipeline operations
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CtgError {
    /// Requested session identifier is not part of the current scan
    SessionNotFound {
        /// Identifier that was looked up
        session_id: String,
    },

    /// A CSV fragment is missing columns or holds no usable rows
    MalformedFragment {
        /// Fragment path
        path: String,
        /// Description of the problem
        reason: String,
    },

    /// Filesystem access failed
    Io {
        /// Path being accessed
        path: String,
        /// Underlying error description
        reason: String,
    },

    /// Invalid processing or streaming parameters
    InvalidConfig {
        /// Description of the configuration error
        reason: String,
    },

    /// Serialization/deserialization error
    Serialization {
        /// Serialization error description
        reason: String,
    },

    /// Not enough samples for the requested computation
    InsufficientData {
        /// Minimum number of samples needed
        required: usize,
        /// Number of samples available
        available: usize,
    },

    /// Unexpected fault inside a running stream
    Internal {
        /// Fault description
        reason: String,
    },
}

impl CtgError {
    /// True for errors that should be shown to the client as "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(self, CtgError::SessionNotFound { .. })
    }
}

impl fmt::Display for CtgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtgError::SessionNotFound { session_id } => {
                write!(f, "Session not found: {}", session_id)
            }
            CtgError::MalformedFragment { path, reason } => {
                write!(f, "Malformed fragment {}: {}", path, reason)
            }
            CtgError::Io { path, reason } => {
                write!(f, "I/O error on {}: {}", path, reason)
            }
            CtgError::InvalidConfig { reason } => {
                write!(f, "Invalid configuration: {}", reason)
            }
            CtgError::Serialization { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
            CtgError::InsufficientData { required, available } => {
                write!(f, "Insufficient data: need {} samples, have {}",
                       required, available)
            }
            CtgError::Internal { reason } => {
                write!(f, "Internal error: {}", reason)
            }
        }
    }
}

impl std::error::Error for CtgError {}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)+) => {
        $crate::error::CtgError::InvalidConfig {
            reason: format!($($arg)+)
        }
    };
}

/// Convenience macro for creating malformed-fragment errors
#[macro_export]
macro_rules! fragment_error {
    ($path:expr, $($arg:tt)+) => {
        $crate::error::CtgError::MalformedFragment {
            path: $path.to_string(),
            reason: format!($($arg)+)
        }
    };
}
