//! Error types for configuration operations.

use std::path::PathBuf;
use thiserror::Error;

use rfstream_core::{BufferError, GraphError};

/// Errors that can occur while loading a configuration or building from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Unknown operation kind
    #[error("unknown operation kind: {0}")]
    UnknownOperation(String),

    /// Invalid parameter
    #[error("invalid parameter '{param}' for operation '{operation}': {reason}")]
    InvalidParameter {
        /// Name of the operation the parameter was given to.
        operation: String,
        /// Name of the invalid parameter.
        param: String,
        /// Why the operation rejected it.
        reason: String,
    },

    /// Validation errors
    #[error("validation failed: {0}")]
    Validation(#[from] crate::validation::ValidationError),

    /// The configured graph is malformed
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The host input ring could not be allocated
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn mock_io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "mock")
    }

    #[test]
    fn read_file_display() {
        let err = ConfigError::read_file("/a/engine.toml", mock_io_err());
        let msg = err.to_string();
        assert!(msg.contains("failed to read file"), "got: {msg}");
        assert!(msg.contains("/a/engine.toml"), "got: {msg}");
        assert!(err.source().is_some());
    }

    #[test]
    fn write_file_factory_produces_correct_variant() {
        let err = ConfigError::write_file("/out/engine.toml", mock_io_err());
        assert!(
            matches!(err, ConfigError::WriteFile { ref path, .. } if path == std::path::Path::new("/out/engine.toml"))
        );
    }

    #[test]
    fn unknown_operation_display() {
        let err = ConfigError::UnknownOperation("beamform".to_string());
        assert_eq!(err.to_string(), "unknown operation kind: beamform");
        assert!(err.source().is_none());
    }

    #[test]
    fn invalid_parameter_display() {
        let err = ConfigError::InvalidParameter {
            operation: "clip".to_string(),
            param: "max".to_string(),
            reason: "expected a finite scalar".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid parameter 'max' for operation 'clip': expected a finite scalar"
        );
    }

    #[test]
    fn graph_error_is_transparent() {
        let err = ConfigError::from(GraphError::CycleDetected("X".to_string()));
        assert_eq!(err.to_string(), "cycle detected at: X");
    }
}
