//! Everything the engine needs besides the input streams: the graph, the
//! buffer definitions, output delivery and constant-memory pools.

use std::sync::Arc;

use crate::buffer::{BufferElement, BufferPolicy};
use crate::device::{ConstMemoryPool, DeviceProperties};
use crate::error::GraphError;
use crate::graph::{DependencyGraph, INPUT};
use crate::operation::Operation;
use crate::params::ParameterDirectory;
use crate::pipeline::Pipeline;

/// Size and policy of an engine-owned ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDef {
    /// Number of elements.
    pub size: usize,
    /// Occupancy policy.
    pub policy: BufferPolicy,
}

impl Default for BufferDef {
    /// Double buffering with blocking acquire.
    fn default() -> Self {
        Self {
            size: 2,
            policy: BufferPolicy::Blocking,
        }
    }
}

/// Callback receiving each completed output element.
///
/// The callback owns the element until it calls
/// [`release`](BufferElement::release); the engine's compute stream may block
/// on that element (blocking policy) or drop frames (fail-fast) until then.
pub type OutputCallback = Arc<dyn Fn(Arc<BufferElement>) + Send + Sync>;

/// A processing description handed to [`ExecutionEngine::new`](crate::ExecutionEngine::new).
pub struct Processing {
    pub(crate) graph: DependencyGraph,
    pub(crate) callback: Option<OutputCallback>,
    pub(crate) input_buffer: BufferDef,
    pub(crate) output_buffer: BufferDef,
    pub(crate) pools: Vec<Arc<ConstMemoryPool>>,
    pub(crate) device: DeviceProperties,
}

impl Processing {
    /// Processing of `graph` with default buffers and queue delivery.
    pub fn new(graph: DependencyGraph) -> Self {
        Self {
            graph,
            callback: None,
            input_buffer: BufferDef::default(),
            output_buffer: BufferDef::default(),
            pools: Vec::new(),
            device: DeviceProperties::default(),
        }
    }

    /// Wraps a bare pipeline into a one-operation graph.
    ///
    /// The pipeline is named `"Pipeline:0"` unless it already has a name and
    /// reads from `input` (default `"Input"`). Every pipeline output `i` is
    /// bound to `Output:i`.
    pub fn from_pipeline(mut pipeline: Pipeline, input: Option<&str>) -> Result<Self, GraphError> {
        let name = pipeline.name().unwrap_or("Pipeline:0").to_string();
        pipeline.set_name(name.clone());
        let outputs = pipeline.output_count();

        let mut graph = DependencyGraph::new();
        graph.add_operation(name.clone(), pipeline)?;
        graph.bind(name.clone(), input.unwrap_or(INPUT));
        for i in 0..outputs {
            graph.bind(format!("Output:{i}"), format!("{name}/Output:{i}"));
        }
        Ok(Self::new(graph))
    }

    /// Delivers outputs to `callback` instead of the engine's queue.
    pub fn with_callback(mut self, callback: impl Fn(Arc<BufferElement>) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Sets the device-side input ring.
    pub fn with_input_buffer(mut self, def: BufferDef) -> Self {
        self.input_buffer = def;
        self
    }

    /// Sets the host-side output ring.
    pub fn with_output_buffer(mut self, def: BufferDef) -> Self {
        self.output_buffer = def;
        self
    }

    /// Hands a constant-memory pool to the engine; it is reset on close.
    pub fn with_const_pool(mut self, pool: Arc<ConstMemoryPool>) -> Self {
        self.pools.push(pool);
        self
    }

    /// Sets the device properties.
    pub fn with_device(mut self, device: DeviceProperties) -> Self {
        self.device = device;
        self
    }

    /// The graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Mutable access to the graph.
    pub fn graph_mut(&mut self) -> &mut DependencyGraph {
        &mut self.graph
    }

    /// Device-side input ring definition.
    pub fn input_buffer(&self) -> BufferDef {
        self.input_buffer
    }

    /// Host-side output ring definition.
    pub fn output_buffer(&self) -> BufferDef {
        self.output_buffer
    }

    /// Device properties.
    pub fn device(&self) -> &DeviceProperties {
        &self.device
    }

    /// Parameter keys of the declared operations, before compilation.
    pub fn parameters(&self) -> ParameterDirectory {
        let names: Vec<&str> = self.graph.operation_names().collect();
        ParameterDirectory::build(names.iter().enumerate().map(|(i, name)| {
            let params = self
                .graph
                .operation(name)
                .map(Operation::parameters)
                .unwrap_or_default();
            (i, *name, params)
        }))
    }
}

impl std::fmt::Debug for Processing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processing")
            .field("graph", &self.graph)
            .field("callback", &self.callback.is_some())
            .field("input_buffer", &self.input_buffer)
            .field("output_buffer", &self.output_buffer)
            .field("pools", &self.pools.len())
            .field("device", &self.device)
            .finish()
    }
}
