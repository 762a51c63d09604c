//! Configuration for rfstream engines.
//!
//! An [`EngineConfig`] describes everything needed to build and run an
//! [`ExecutionEngine`](rfstream_core::ExecutionEngine) from a TOML file: the
//! input streams, the operations (by registry kind), their bindings, and the
//! ring buffers.
//!
//! # Features
//!
//! - **Config files**: Load and save engine configurations as TOML
//! - **Registry**: Built-in operation kinds (`clip`, `scale`, `tap`)
//! - **Validation**: Collect every configuration problem in one pass
//!
//! # Example
//!
//! ```rust
//! use rfstream_config::EngineConfig;
//!
//! let config = EngineConfig::from_toml(r#"
//!     [[streams]]
//!     shape = [16]
//!     dtype = "f32"
//!
//!     [[operations]]
//!     name = "gain"
//!     kind = "scale"
//!     params = { factor = 2.0 }
//!
//!     [dependencies]
//!     gain = "Input"
//!     "Output:0" = "gain"
//! "#).unwrap();
//!
//! config.validate().unwrap();
//! let graph = config.build_graph().unwrap();
//! assert!(graph.contains("gain"));
//! ```

mod config;
mod error;

/// Built-in operation kinds.
pub mod registry;

/// Configuration validation.
pub mod validation;

pub use config::{
    Binding, DeviceConfig, EngineConfig, HOST_INPUT_BUFFER, OperationConfig, RingConfig,
    StreamConfig,
};
pub use error::ConfigError;
pub use registry::{KINDS, Scale};
pub use validation::{ValidationError, ValidationResult, validate};
