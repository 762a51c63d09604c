//! Engine configuration file format.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use rfstream_core::params::qualify;
use rfstream_core::{BufferDef, BufferPolicy, DType, DependencyGraph, Descriptor, DeviceProperties, RingBuffer};

use crate::error::ConfigError;
use crate::registry;

/// Name of the producer ring built by [`EngineConfig::host_ring`].
pub const HOST_INPUT_BUFFER: &str = "HostInput";

/// Engine configuration: input streams, operations, bindings and buffers.
///
/// # TOML Format
///
/// ```toml
/// frames = 100
///
/// [host_input]
/// size = 4
///
/// [output_buffer]
/// size = 2
/// policy = "fail-fast"
///
/// [[streams]]
/// source = "Sequence:0"
/// shape = [64, 128]
/// dtype = "f32"
/// sampling_frequency = 65e6
///
/// [[operations]]
/// name = "clip"
/// kind = "clip"
/// [operations.params]
/// min = 20.0
/// max = 80.0
///
/// [dependencies]
/// clip = "Sequence:0"
/// "Output:0" = "clip"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Number of frames `rfstream run` produces.
    #[serde(default = "default_frames")]
    pub frames: usize,

    /// Producer-side ring the frames are written into.
    #[serde(default = "default_host_input")]
    pub host_input: RingConfig,

    /// Device-side input ring.
    #[serde(default)]
    pub input_buffer: RingConfig,

    /// Host-side output ring.
    #[serde(default)]
    pub output_buffer: RingConfig,

    /// Device properties.
    #[serde(default)]
    pub device: DeviceConfig,

    /// One entry per input stream, in `Input:k` order.
    #[serde(default)]
    pub streams: Vec<StreamConfig>,

    /// Operations of the graph.
    #[serde(default)]
    pub operations: Vec<OperationConfig>,

    /// `target = source` or `target = [sources]` bindings.
    #[serde(default)]
    pub dependencies: BTreeMap<String, Binding>,
}

fn default_frames() -> usize {
    100
}

fn default_host_input() -> RingConfig {
    RingConfig {
        size: 4,
        policy: BufferPolicy::Blocking,
    }
}

/// Size and policy of one ring buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of elements.
    #[serde(default = "default_ring_size")]
    pub size: usize,
    /// Occupancy policy.
    #[serde(default)]
    pub policy: BufferPolicy,
}

fn default_ring_size() -> usize {
    2
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            size: default_ring_size(),
            policy: BufferPolicy::default(),
        }
    }
}

impl From<RingConfig> for BufferDef {
    fn from(ring: RingConfig) -> Self {
        BufferDef {
            size: ring.size,
            policy: ring.policy,
        }
    }
}

/// Device section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Device name, `host-emulated` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Constant memory in bytes.
    #[serde(default = "default_const_memory")]
    pub const_memory_bytes: usize,
}

fn default_const_memory() -> usize {
    rfstream_core::device::DEFAULT_CONST_MEMORY
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: None,
            const_memory_bytes: default_const_memory(),
        }
    }
}

impl DeviceConfig {
    /// Converts to [`DeviceProperties`].
    pub fn properties(&self) -> DeviceProperties {
        let defaults = DeviceProperties::default();
        DeviceProperties {
            name: self.name.clone().unwrap_or(defaults.name),
            total_const_memory: self.const_memory_bytes,
        }
    }
}

/// One input stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Source identifier bindings may use instead of `Input:k`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Frame shape.
    pub shape: Vec<usize>,
    /// Element type.
    pub dtype: DType,
    /// Sampling frequency in Hz.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_frequency: Option<f64>,
}

impl StreamConfig {
    /// Descriptor of this stream.
    pub fn descriptor(&self) -> Descriptor {
        let mut descriptor = Descriptor::new(self.shape.clone(), self.dtype);
        if let Some(source) = &self.source {
            descriptor = descriptor.with_source(source.clone());
        }
        if let Some(hz) = self.sampling_frequency {
            descriptor = descriptor.with_sampling_frequency(hz);
        }
        descriptor
    }
}

/// One operation of the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationConfig {
    /// Graph name of the operation.
    pub name: String,
    /// Registry kind, see [`registry::KINDS`].
    pub kind: String,
    /// Initial parameter values by local name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, f64>,
}

impl OperationConfig {
    /// Operation of `kind` named `name` with no parameters.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    /// Sets a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// Right-hand side of a dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Binding {
    /// A single source.
    One(String),
    /// Sources for input slots `0..n`.
    Many(Vec<String>),
}

impl Binding {
    /// Sources in slot order.
    pub fn sources(&self) -> Vec<String> {
        match self {
            Self::One(source) => vec![source.clone()],
            Self::Many(sources) => sources.clone(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), operations = config.operations.len(), "loaded config");
        Ok(config)
    }

    /// Load a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Convert the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Runs [`validation::validate`](crate::validation::validate).
    pub fn validate(&self) -> Result<(), ConfigError> {
        Ok(crate::validation::validate(self)?)
    }

    /// Input descriptors, in stream order.
    pub fn descriptors(&self) -> Vec<Descriptor> {
        self.streams.iter().map(StreamConfig::descriptor).collect()
    }

    /// The producer ring sized for the configured streams.
    pub fn host_ring(&self) -> Result<RingBuffer, ConfigError> {
        Ok(RingBuffer::for_descriptors(
            HOST_INPUT_BUFFER,
            self.host_input.size,
            &self.descriptors(),
            self.host_input.policy,
        )?)
    }

    /// Builds the dependency graph with the built-in registry.
    pub fn build_graph(&self) -> Result<DependencyGraph, ConfigError> {
        let mut graph = DependencyGraph::new();
        for op in &self.operations {
            let operation = registry::create(op)?;
            graph.add_operation(op.name.clone(), operation)?;
        }
        for (target, binding) in &self.dependencies {
            graph.bind_all(target.clone(), binding.sources());
        }
        Ok(graph)
    }

    /// Fully qualified keys of the configured parameters, with their values.
    pub fn parameter_values(&self) -> Vec<(String, f64)> {
        self.operations
            .iter()
            .flat_map(|op| {
                op.params
                    .iter()
                    .map(move |(name, value)| (qualify(&op.name, name), *value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        frames = 10

        [output_buffer]
        policy = "fail-fast"

        [[streams]]
        source = "Sequence:0"
        shape = [4, 8]
        dtype = "i16"
        sampling_frequency = 65e6

        [[operations]]
        name = "clip"
        kind = "clip"
        [operations.params]
        min = 20.0

        [dependencies]
        clip = "Sequence:0"
        "Output:0" = ["clip"]
    "#;

    #[test]
    fn parses_sample_config() {
        let config = EngineConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.frames, 10);
        assert_eq!(config.host_input.size, 4);
        assert_eq!(config.input_buffer, RingConfig::default());
        assert_eq!(config.output_buffer.policy, BufferPolicy::FailFast);
        assert_eq!(config.output_buffer.size, 2);
        assert_eq!(config.device.const_memory_bytes, 64 * 1024);
        assert_eq!(config.streams[0].dtype, DType::I16);
        assert_eq!(config.operations[0].params["min"], 20.0);
        assert_eq!(
            config.dependencies["Output:0"],
            Binding::Many(vec!["clip".to_string()])
        );
        assert_eq!(config.dependencies["clip"], Binding::One("Sequence:0".to_string()));
    }

    #[test]
    fn stream_descriptor_carries_metadata() {
        let config = EngineConfig::from_toml(SAMPLE).unwrap();
        let descriptor = config.streams[0].descriptor();
        assert_eq!(descriptor.shape(), &[4, 8]);
        assert_eq!(descriptor.source(), Some("Sequence:0"));
        assert_eq!(descriptor.sampling_frequency(), Some(65e6));
    }

    #[test]
    fn buffer_def_conversion() {
        let def: BufferDef = RingConfig {
            size: 3,
            policy: BufferPolicy::FailFast,
        }
        .into();
        assert_eq!(def.size, 3);
        assert_eq!(def.policy, BufferPolicy::FailFast);
    }

    #[test]
    fn parameter_values_are_qualified() {
        let config = EngineConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(
            config.parameter_values(),
            vec![("/clip/min".to_string(), 20.0)]
        );
    }

    #[test]
    fn toml_round_trip() {
        let config = EngineConfig::from_toml(SAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn device_properties_default_name() {
        let properties = DeviceConfig::default().properties();
        assert_eq!(properties, DeviceProperties::default());
    }
}
