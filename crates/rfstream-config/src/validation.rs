//! Static checks on an [`EngineConfig`](crate::EngineConfig).
//!
//! These catch configuration mistakes before any operation is built. Graph
//! topology (cycles, missing inputs) is left to the compiler.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::config::EngineConfig;
use crate::registry;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A ring buffer was configured with zero elements.
    #[error("buffer '{0}' must have at least one element")]
    ZeroSizedBuffer(String),

    /// No input stream is configured.
    #[error("at least one input stream is required")]
    NoStreams,

    /// A stream shape is empty or has a zero dimension.
    #[error("stream {index} has invalid shape {shape:?}")]
    InvalidShape {
        /// Stream ordinal.
        index: usize,
        /// The configured shape.
        shape: Vec<usize>,
    },

    /// Two operations share a name.
    #[error("operation '{0}' is declared more than once")]
    DuplicateOperation(String),

    /// An operation kind is not in the registry.
    #[error("unknown operation kind '{kind}' for '{name}'")]
    UnknownKind {
        /// Operation name.
        name: String,
        /// The configured kind.
        kind: String,
    },

    /// The dependency table is empty.
    #[error("no dependencies are declared")]
    NoDependencies,

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates `config`, reporting every problem found.
pub fn validate(config: &EngineConfig) -> ValidationResult<()> {
    let mut errors = Vec::new();

    for (name, ring) in [
        ("host_input", &config.host_input),
        ("input_buffer", &config.input_buffer),
        ("output_buffer", &config.output_buffer),
    ] {
        if ring.size == 0 {
            errors.push(ValidationError::ZeroSizedBuffer(name.to_string()));
        }
    }

    if config.streams.is_empty() {
        errors.push(ValidationError::NoStreams);
    }
    for (index, stream) in config.streams.iter().enumerate() {
        if stream.shape.is_empty() || stream.shape.contains(&0) {
            errors.push(ValidationError::InvalidShape {
                index,
                shape: stream.shape.clone(),
            });
        }
    }

    let mut seen = BTreeSet::new();
    for op in &config.operations {
        if !seen.insert(op.name.as_str()) {
            errors.push(ValidationError::DuplicateOperation(op.name.clone()));
        }
        if !registry::is_known(&op.kind) {
            errors.push(ValidationError::UnknownKind {
                name: op.name.clone(),
                kind: op.kind.clone(),
            });
        }
    }

    if config.dependencies.is_empty() {
        errors.push(ValidationError::NoDependencies);
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Binding, OperationConfig, RingConfig, StreamConfig};
    use rfstream_core::DType;

    fn valid() -> EngineConfig {
        let mut config = EngineConfig::from_toml("").unwrap();
        config.streams.push(StreamConfig {
            source: None,
            shape: vec![4],
            dtype: DType::F32,
            sampling_frequency: None,
        });
        config.operations.push(OperationConfig::new("clip", "clip"));
        config
            .dependencies
            .insert("clip".to_string(), Binding::One("Input".to_string()));
        config
            .dependencies
            .insert("Output:0".to_string(), Binding::One("clip".to_string()));
        config
    }

    #[test]
    fn valid_config_passes() {
        assert_eq!(validate(&valid()), Ok(()));
    }

    #[test]
    fn single_problem_is_reported_bare() {
        let mut config = valid();
        config.output_buffer = RingConfig {
            size: 0,
            ..RingConfig::default()
        };
        assert_eq!(
            validate(&config),
            Err(ValidationError::ZeroSizedBuffer("output_buffer".to_string()))
        );
    }

    #[test]
    fn every_problem_is_collected() {
        let mut config = valid();
        config.streams[0].shape = vec![4, 0];
        config.operations.push(OperationConfig::new("clip", "beamform"));
        config.dependencies.clear();

        let Err(ValidationError::Multiple(errors)) = validate(&config) else {
            panic!("expected multiple errors");
        };
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::DuplicateOperation("clip".to_string())));
        assert!(errors.contains(&ValidationError::NoDependencies));
        assert!(errors.contains(&ValidationError::UnknownKind {
            name: "clip".to_string(),
            kind: "beamform".to_string(),
        }));
    }

    #[test]
    fn missing_streams_are_rejected() {
        let mut config = valid();
        config.streams.clear();
        assert_eq!(validate(&config), Err(ValidationError::NoStreams));
    }
}
