//! Frame-by-frame execution of a compiled graph.
//!
//! [`ExecutionEngine`] owns the compiled operations, the device-side input
//! ring, the host-side output ring and the two device streams. Each call to
//! [`process`](ExecutionEngine::process) walks the schedule once under a
//! single dispatch lock:
//!
//! ```text
//! producer ──► host input ring ──► DeviceIngress ──(transfer stream)──► device input ring
//!                                        │
//!                                        ▼
//!                           stages, in schedule order
//!                                        │
//!                                        ▼
//!                               DeviceEgress ──(compute stream)──► host output ring ──► delivery
//! ```
//!
//! Delivery is either the user's [`OutputCallback`](crate::processing::OutputCallback)
//! or a bounded queue of capacity one that drops the newest frame when the
//! consumer falls behind.

mod adapters;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::array::{Array, Value};
use crate::buffer::{BufferElement, RingBuffer};
use crate::compiler::{Boundary, CompiledSchedule, GraphCompiler};
use crate::descriptor::Descriptor;
use crate::device::{ConstMemoryPool, DeviceProperties, HostRegistry, Stream};
use crate::error::EngineError;
use crate::operation::Operation;
use crate::params::{ParamValue, ParameterDirectory};
use crate::processing::Processing;

use adapters::{DeviceEgress, DeviceIngress, queue_delivery};

/// Name of the engine-owned device input ring.
pub const DEVICE_INPUT_BUFFER: &str = "InputBufferDevice";
/// Name of the engine-owned host output ring.
pub const HOST_OUTPUT_BUFFER: &str = "OutputBufferHost";

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accepting frames.
    Ready,
    /// Closed; every further call fails with [`EngineError::Closed`].
    Closed,
}

/// How the engine surfaces its output frames.
#[derive(Debug, Clone)]
pub enum Outputs {
    /// Frames are pushed into a bounded queue of capacity one.
    Queue {
        /// Receiving end of the delivery queue.
        queue: Receiver<Vec<Array>>,
        /// Descriptors of the arrays in each frame.
        descriptors: Vec<Descriptor>,
    },
    /// Frames go to the user callback; only the descriptors are exposed.
    Callback {
        /// Descriptors of the arrays in each frame.
        descriptors: Vec<Descriptor>,
    },
}

impl Outputs {
    /// Descriptors of the arrays in each output frame, in `Output:k` order.
    pub fn descriptors(&self) -> &[Descriptor] {
        match self {
            Self::Queue { descriptors, .. } | Self::Callback { descriptors } => descriptors,
        }
    }

    /// The output descriptor of a single-output graph.
    ///
    /// Internally outputs are always a list; this is the only place where a
    /// one-element list is unwrapped. Returns `None` when the graph has more
    /// than one output.
    pub fn descriptor(&self) -> Option<&Descriptor> {
        match self.descriptors() {
            [single] => Some(single),
            _ => None,
        }
    }

    /// The delivery queue, unless a callback owns delivery.
    pub fn queue(&self) -> Option<&Receiver<Vec<Array>>> {
        match self {
            Self::Queue { queue, .. } => Some(queue),
            Self::Callback { .. } => None,
        }
    }
}

/// State touched by dispatch, guarded by one lock.
struct Dispatch {
    state: EngineState,
    operations: Vec<Box<dyn Operation>>,
    inputs: Vec<Vec<Option<Value>>>,
    scratch: Vec<Value>,
}

/// Runs a compiled graph over a stream of host frames.
///
/// ```rust
/// use std::sync::Arc;
/// use rfstream_core::ops::Clip;
/// use rfstream_core::processing::Processing;
/// use rfstream_core::{BufferPolicy, DType, Descriptor, ExecutionEngine, Pipeline, RingBuffer};
///
/// let pipeline = Pipeline::builder().step(Clip::new(0.0, 1.0)).build().unwrap();
/// let processing = Processing::from_pipeline(pipeline, None).unwrap();
/// let inputs = [Descriptor::new([4], DType::F32)];
/// let host = Arc::new(RingBuffer::for_descriptors("host", 2, &inputs, BufferPolicy::Blocking).unwrap());
///
/// let engine = ExecutionEngine::new(processing, &inputs, Arc::clone(&host)).unwrap();
/// let element = host.acquire(0).unwrap();
/// element.write_slice(0, &[-1.0f32, 0.5, 2.0, 0.25]).unwrap();
/// engine.process(element).unwrap();
/// engine.sync();
///
/// let frame = engine.outputs().queue().unwrap().recv().unwrap();
/// assert_eq!(frame[0].to_vec::<f32>().unwrap(), vec![0.0, 0.5, 1.0, 0.25]);
/// engine.close();
/// ```
pub struct ExecutionEngine {
    schedule: Arc<CompiledSchedule>,
    dispatch: Mutex<Dispatch>,
    directory: ParameterDirectory,
    outputs: Outputs,
    host_input: Arc<RingBuffer>,
    device_input: Arc<RingBuffer>,
    host_output: Arc<RingBuffer>,
    transfer: Arc<Stream>,
    compute: Arc<Stream>,
    registry: HostRegistry,
    device: DeviceProperties,
    pools: Vec<Arc<ConstMemoryPool>>,
    dropped: Arc<AtomicU64>,
}

impl ExecutionEngine {
    /// Compiles `processing` for streams described by `inputs`, fed from
    /// the producer's `host_input` ring.
    pub fn new(
        processing: Processing,
        inputs: &[Descriptor],
        host_input: Arc<RingBuffer>,
    ) -> Result<Self, EngineError> {
        let Processing {
            graph,
            callback,
            input_buffer,
            output_buffer,
            pools,
            device,
        } = processing;

        tracing::info!(
            device = %device.name,
            const_memory = device.total_const_memory,
            "device properties"
        );

        let expected: Vec<_> = inputs.iter().map(Descriptor::layout).collect();
        if host_input.layouts() != expected.as_slice() {
            let found: Vec<String> = host_input.layouts().iter().map(ToString::to_string).collect();
            let wanted: Vec<String> = expected.iter().map(ToString::to_string).collect();
            return Err(EngineError::LayoutMismatch(format!(
                "'{}' holds [{}], streams are [{}]",
                host_input.name(),
                found.join(", "),
                wanted.join(", ")
            )));
        }

        let prepared = GraphCompiler::new(graph, inputs).prepare()?;
        let output_descriptors = prepared.output_descriptors().to_vec();

        let device_input = Arc::new(RingBuffer::for_descriptors(
            DEVICE_INPUT_BUFFER,
            input_buffer.size,
            inputs,
            input_buffer.policy,
        )?);
        let host_output = Arc::new(RingBuffer::for_descriptors(
            HOST_OUTPUT_BUFFER,
            output_buffer.size,
            &output_descriptors,
            output_buffer.policy,
        )?);

        let transfer = Arc::new(Stream::new("transfer")?);
        let compute = Arc::new(Stream::new("compute")?);

        let dropped = Arc::new(AtomicU64::new(0));
        let (deliver, outputs) = match callback {
            Some(callback) => (
                callback,
                Outputs::Callback {
                    descriptors: output_descriptors,
                },
            ),
            None => {
                let (tx, rx) = crossbeam_channel::bounded(1);
                (
                    queue_delivery(tx, Arc::clone(&dropped)),
                    Outputs::Queue {
                        queue: rx,
                        descriptors: output_descriptors,
                    },
                )
            }
        };

        let boundary = Boundary {
            ingress: Box::new(DeviceIngress::new(
                Arc::clone(&device_input),
                Arc::clone(&transfer),
                Arc::clone(&compute),
            )),
            egress: Box::new(DeviceEgress::new(
                Arc::clone(&device_input),
                Arc::clone(&host_output),
                Arc::clone(&compute),
                deliver,
                Arc::clone(&dropped),
            )),
        };
        let compiled = prepared.compile(boundary)?;
        let schedule = compiled.schedule;
        let operations = compiled.operations;

        let directory = ParameterDirectory::build(
            operations
                .iter()
                .enumerate()
                .map(|(i, op)| (i, schedule.name(i), op.parameters())),
        );

        let registry = HostRegistry::new();
        registry.register(&host_input);
        registry.register(&host_output);

        tracing::info!(
            operations = schedule.len(),
            inputs = inputs.len(),
            outputs = outputs.descriptors().len(),
            parameters = directory.len(),
            "engine ready"
        );

        Ok(Self {
            dispatch: Mutex::new(Dispatch {
                state: EngineState::Ready,
                inputs: schedule.allocate_inputs(),
                scratch: Vec::new(),
                operations,
            }),
            schedule,
            directory,
            outputs,
            host_input,
            device_input,
            host_output,
            transfer,
            compute,
            registry,
            device,
            pools,
            dropped,
        })
    }

    /// Dispatches one host frame through the schedule.
    ///
    /// Returns once every stage has run and all device work for the frame is
    /// enqueued; use [`sync`](Self::sync) to wait for that work. A stage error
    /// aborts the frame and is returned unchanged inside
    /// [`EngineError::Process`]; buffers already acquired for the frame are
    /// not released, so the engine should be closed afterwards.
    pub fn process(&self, element: Arc<BufferElement>) -> Result<(), EngineError> {
        let mut dispatch = self.dispatch.lock();
        let Dispatch {
            state,
            operations,
            inputs,
            scratch,
        } = &mut *dispatch;
        if *state == EngineState::Closed {
            return Err(EngineError::Closed);
        }

        inputs[0][0] = Some(Value::Element(element));
        for op in 0..self.schedule.len() {
            scratch.clear();
            for (slot, value) in inputs[op].iter_mut().enumerate() {
                let value = value.take().ok_or_else(|| EngineError::MissingValue {
                    operation: self.schedule.name(op).to_string(),
                    slot,
                })?;
                scratch.push(value);
            }

            let produced = operations[op]
                .process(scratch)
                .map_err(|source| EngineError::Process {
                    operation: self.schedule.name(op).to_string(),
                    source,
                })?;
            scratch.clear();

            let Some(values) = produced else {
                continue;
            };
            for (slot, value) in values.into_iter().enumerate() {
                for route in self.schedule.routes(op, slot) {
                    inputs[route.op][route.slot] = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    /// How output frames are surfaced.
    pub fn outputs(&self) -> Outputs {
        self.outputs.clone()
    }

    /// Blocks until both device streams are idle.
    pub fn sync(&self) {
        self.transfer.synchronize();
        self.compute.synchronize();
    }

    /// Closes the engine. Calling it again has no effect.
    ///
    /// Host registrations are dropped, every operation is closed once and
    /// the constant-memory pools are reset. Device work already enqueued is
    /// not interrupted.
    pub fn close(&self) {
        let mut dispatch = self.dispatch.lock();
        if dispatch.state == EngineState::Closed {
            return;
        }
        dispatch.state = EngineState::Closed;

        self.registry.unregister(&self.host_input);
        self.registry.unregister(&self.host_output);
        for operation in &mut dispatch.operations {
            operation.close();
        }
        for slots in &mut dispatch.inputs {
            slots.fill(None);
        }
        for pool in &self.pools {
            pool.reset();
        }
        tracing::info!(
            dropped = self.dropped.load(Ordering::Relaxed),
            "engine closed"
        );
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.dispatch.lock().state
    }

    /// The compiled schedule.
    pub fn schedule(&self) -> &Arc<CompiledSchedule> {
        &self.schedule
    }

    /// All parameter keys of the compiled operations.
    pub fn parameters(&self) -> &ParameterDirectory {
        &self.directory
    }

    /// Reads a parameter by fully qualified key.
    pub fn get_parameter(&self, key: &str) -> Result<ParamValue, EngineError> {
        let dispatch = self.dispatch.lock();
        if dispatch.state == EngineState::Closed {
            return Err(EngineError::Closed);
        }
        let entry = self
            .directory
            .resolve(key)
            .ok_or_else(|| EngineError::UnknownParameter(key.trim().to_string()))?;
        dispatch.operations[entry.owner()]
            .get_parameter(entry.local())
            .map_err(|source| EngineError::Parameter {
                key: key.trim().to_string(),
                source,
            })
    }

    /// Writes a parameter by fully qualified key.
    ///
    /// Takes the dispatch lock, so the write lands between two frames.
    pub fn set_parameter(
        &self,
        key: &str,
        value: impl Into<ParamValue>,
    ) -> Result<(), EngineError> {
        let mut dispatch = self.dispatch.lock();
        if dispatch.state == EngineState::Closed {
            return Err(EngineError::Closed);
        }
        let entry = self
            .directory
            .resolve(key)
            .ok_or_else(|| EngineError::UnknownParameter(key.trim().to_string()))?;
        tracing::debug!(key = key.trim(), "set_parameter");
        dispatch.operations[entry.owner()]
            .set_parameter(entry.local(), value.into())
            .map_err(|source| EngineError::Parameter {
                key: key.trim().to_string(),
                source,
            })
    }

    /// Output frames discarded so far, by a full delivery queue or a failed
    /// output copy.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The producer's ring.
    pub fn host_input(&self) -> &Arc<RingBuffer> {
        &self.host_input
    }

    /// The device-side input ring.
    pub fn device_input(&self) -> &Arc<RingBuffer> {
        &self.device_input
    }

    /// The host-side output ring.
    pub fn host_output(&self) -> &Arc<RingBuffer> {
        &self.host_output
    }

    /// Host memory registrations.
    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    /// Device properties the engine was built for.
    pub fn device(&self) -> &DeviceProperties {
        &self.device
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("schedule", &self.schedule.names())
            .field("state", &self.state())
            .field("outputs", &self.outputs.descriptors())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DType;
    use crate::buffer::BufferPolicy;
    use crate::ops::{Clip, Tap};
    use crate::pipeline::Pipeline;

    fn engine_with(pipeline: Pipeline) -> (ExecutionEngine, Arc<RingBuffer>) {
        let inputs = [Descriptor::new([4], DType::F32)];
        let host = Arc::new(
            RingBuffer::for_descriptors("host", 2, &inputs, BufferPolicy::Blocking).unwrap(),
        );
        let processing = Processing::from_pipeline(pipeline, None).unwrap();
        let engine = ExecutionEngine::new(processing, &inputs, Arc::clone(&host)).unwrap();
        (engine, host)
    }

    #[test]
    fn schedule_is_bracketed_by_adapters() {
        let (engine, _) = engine_with(Pipeline::builder().step(Tap::new()).build().unwrap());
        let names = engine.schedule().names();
        assert_eq!(names.first().map(String::as_str), Some("DeviceIngress"));
        assert_eq!(names.last().map(String::as_str), Some("DeviceEgress"));
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn layout_mismatch_is_rejected() {
        let host = Arc::new(
            RingBuffer::new(
                "host",
                2,
                vec![crate::array::ArrayLayout::new([8], DType::I16)],
                BufferPolicy::Blocking,
            )
            .unwrap(),
        );
        let pipeline = Pipeline::builder().step(Tap::new()).build().unwrap();
        let processing = Processing::from_pipeline(pipeline, None).unwrap();
        let err = ExecutionEngine::new(processing, &[Descriptor::new([4], DType::F32)], host)
            .unwrap_err();
        assert!(matches!(err, EngineError::LayoutMismatch(_)));
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_calls() {
        let (engine, host) = engine_with(Pipeline::builder().step(Clip::new(0.0, 1.0)).build().unwrap());
        assert!(engine.registry().is_registered("host"));
        engine.close();
        engine.close();
        assert_eq!(engine.state(), EngineState::Closed);
        assert!(!engine.registry().is_registered("host"));

        let element = host.acquire(0).unwrap();
        assert!(matches!(engine.process(element), Err(EngineError::Closed)));
        assert!(matches!(
            engine.get_parameter("/Pipeline:0/Clip:0/min"),
            Err(EngineError::Closed)
        ));
    }

    #[test]
    fn single_output_descriptor_is_unwrapped() {
        let (engine, _) = engine_with(Pipeline::builder().step(Clip::new(0.0, 1.0)).build().unwrap());
        let outputs = engine.outputs();
        assert!(outputs.queue().is_some());
        let descriptor = outputs.descriptor().unwrap();
        assert_eq!(descriptor.shape(), &[4]);
    }
}
