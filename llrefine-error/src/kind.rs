//! Error kinds for llrefine operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on `ErrorKind` to decide whether a failure is local to one
/// pipeline stage, fatal to the current run, or worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// Invalid configuration or parameters
    ConfigInvalid,

    /// Invalid argument passed to function
    InvalidArgument,

    // =========================================================================
    // Pipeline errors
    // =========================================================================
    /// A stage's output lacks the fields a downstream stage requires
    StageParseFailed,

    // =========================================================================
    // Backend errors
    // =========================================================================
    /// The language-model or embedding backend cannot be reached
    BackendUnavailable,

    /// The backend answered but inference failed
    InferenceFailed,

    /// Rate limit exceeded
    RateLimited,

    /// Backend rejected the credentials
    AuthenticationFailed,

    // =========================================================================
    // Index / corpus errors
    // =========================================================================
    /// No persisted index exists and no corpus is available to build one
    IndexMissing,

    /// The tabular corpus could not be read or lacks required columns
    CorpusInvalid,

    /// Index storage operation failed
    StorageFailed,

    /// Serialization/deserialization failed
    SerializationFailed,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,

    // =========================================================================
    // Parse errors
    // =========================================================================
    /// Failed to parse input
    ParseFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::InvalidArgument => "InvalidArgument",

            ErrorKind::StageParseFailed => "StageParseFailed",

            ErrorKind::BackendUnavailable => "BackendUnavailable",
            ErrorKind::InferenceFailed => "InferenceFailed",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",

            ErrorKind::IndexMissing => "IndexMissing",
            ErrorKind::CorpusInvalid => "CorpusInvalid",
            ErrorKind::StorageFailed => "StorageFailed",
            ErrorKind::SerializationFailed => "SerializationFailed",

            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",

            ErrorKind::ParseFailed => "ParseFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::BackendUnavailable | ErrorKind::InferenceFailed | ErrorKind::RateLimited
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
