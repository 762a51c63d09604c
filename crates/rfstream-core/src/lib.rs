//! rfstream core - graph compiler and double-buffered streaming runtime
//!
//! This crate runs a user-declared graph of processing stages over a
//! continuous stream of acquired frames (RF/IQ data in practice, though
//! nothing here depends on the content of a frame).
//!
//! # Core Abstractions
//!
//! ## Graph
//!
//! - [`Operation`] - Object-safe trait for every processing stage
//! - [`DependencyGraph`] - Named operations plus `target ← source` bindings
//! - [`Pipeline`] - Linear composite operation with a parameter directory
//!
//! ## Compilation
//!
//! - [`GraphCompiler`] - Descriptor propagation, boundary rewrite, topological order
//! - [`CompiledSchedule`] - Immutable execution order and routing table
//!
//! ## Execution
//!
//! - [`ExecutionEngine`] - Per-frame dispatch under a single lock
//! - [`RingBuffer`] / [`BufferElement`] - Fixed pools of reusable frame slots
//! - [`device`] - Transfer and compute streams, events, constant memory
//!
//! ## Data
//!
//! - [`Descriptor`] - Copy-on-write frame metadata threaded through `prepare`
//! - [`Value`] - What flows between stages at run time
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rfstream_core::ops::{Clip, Tap};
//! use rfstream_core::processing::Processing;
//! use rfstream_core::{BufferPolicy, DType, Descriptor, ExecutionEngine, Pipeline, RingBuffer};
//!
//! let pipeline = Pipeline::builder()
//!     .step(Tap::new())
//!     .step(Clip::new(20.0, 80.0))
//!     .build()
//!     .unwrap();
//! let processing = Processing::from_pipeline(pipeline, None).unwrap();
//!
//! let inputs = [Descriptor::new([2], DType::F32).with_source("Sequence:0")];
//! let host = Arc::new(RingBuffer::for_descriptors("host", 4, &inputs, BufferPolicy::Blocking).unwrap());
//! let engine = ExecutionEngine::new(processing, &inputs, Arc::clone(&host)).unwrap();
//! assert_eq!(engine.outputs().descriptors().len(), 2);
//!
//! engine.set_parameter("/Pipeline:0/Clip:0/max", 60.0).unwrap();
//! let element = host.acquire(0).unwrap();
//! element.write_slice(0, &[10.0f32, 90.0]).unwrap();
//! engine.process(element).unwrap();
//! engine.sync();
//!
//! let frame = engine.outputs().queue().unwrap().recv().unwrap();
//! assert_eq!(frame[0].to_vec::<f32>().unwrap(), vec![20.0, 60.0]);
//! assert_eq!(frame[1].to_vec::<f32>().unwrap(), vec![10.0, 90.0]);
//! ```
//!
//! # Design Principles
//!
//! - **No traversal on the hot path**: routing is precomputed at compile time
//! - **Explicit sequences**: inputs and outputs are always ordered lists
//! - **Owned resources**: buffers and constant-memory pools belong to the engine

pub mod array;
pub mod buffer;
pub mod compiler;
pub mod descriptor;
pub mod device;
pub mod engine;
pub mod error;
pub mod graph;
pub mod operation;
pub mod ops;
pub mod params;
pub mod pipeline;
pub mod processing;

// Re-export main types at crate root
pub use array::{Array, ArrayLayout, DType, Value};
pub use buffer::{ArrayRef, BufferElement, BufferPolicy, RingBuffer};
pub use compiler::{Boundary, Compiled, CompiledSchedule, GraphCompiler, PreparedGraph, Route};
pub use descriptor::{Descriptor, MetaValue};
pub use device::{ConstMemoryPool, DeviceProperties, Event, HostRegistry, Stream};
pub use engine::{EngineState, ExecutionEngine, Outputs};
pub use error::{BufferError, CompileError, EngineError, GraphError, OperationError, PoolError};
pub use graph::{Address, DependencyGraph, Port, PortKind, parse_address};
pub use operation::Operation;
pub use params::{ParamDescriptor, ParamUnit, ParamValue, ParameterDirectory};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use processing::{BufferDef, OutputCallback, Processing};
