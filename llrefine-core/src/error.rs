//! llrefine-core error types
//!
//! Re-exports llrefine-error and provides core-specific conveniences.

pub use llrefine_error::{Error, ErrorKind, ErrorStatus, Result};

/// Create an IoFailed error
pub fn io_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::IoFailed, message)
}

/// Create a SerializationFailed error
pub fn serialization_error(message: impl Into<String>) -> Error {
    Error::serialization_failed(message)
}

/// Create a StageParseFailed error for a missing structured field
pub fn missing_field(stage: &str, field: &str) -> Error {
    Error::stage_parse_failed(stage, format!("missing '{}' in stage output", field))
        .with_context("field", field)
}

/// Create a StageParseFailed error for an empty stage output
pub fn empty_output(stage: &str) -> Error {
    Error::stage_parse_failed(stage, "stage produced no usable text")
}

/// Create a ConfigInvalid error for a pipeline definition
pub fn invalid_pipeline(reason: impl Into<String>) -> Error {
    Error::config_invalid(reason).with_operation("pipeline::validate")
}
