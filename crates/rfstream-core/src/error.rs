//! Error types for graph validation, buffers, compilation and execution.
//!
//! Errors are split by the phase that raises them:
//!
//! - [`GraphError`]: topology problems found while resolving and validating a
//!   [`DependencyGraph`](crate::DependencyGraph). Always fatal to compilation.
//! - [`BufferError`]: ring-buffer occupancy and layout problems. An overrun is
//!   fatal to the current frame, not to the engine.
//! - [`PoolError`]: constant-memory reservation failures.
//! - [`OperationError`]: raised by stage implementations from `prepare`,
//!   `process` and parameter access.
//! - [`CompileError`] and [`EngineError`]: wrap the above with the name of the
//!   operation that failed.

use thiserror::Error;

use crate::array::DType;

/// Errors found while resolving or validating a dependency graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A dependency address could not be parsed.
    #[error("invalid dependency address: '{0}'")]
    InvalidAddress(String),

    /// An address references an operation that was never declared.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Two operations were declared under the same name.
    #[error("operation '{0}' is declared more than once")]
    DuplicateOperation(String),

    /// An operation was declared under a name reserved for the graph boundary.
    #[error("'{0}' is a reserved name")]
    ReservedName(String),

    /// A single input slot was bound to more than one source.
    #[error("input {slot} of '{target}' is bound to more than one source")]
    DuplicateSource {
        /// Operation owning the input slot.
        target: String,
        /// The input slot bound twice.
        slot: usize,
    },

    /// The input slots bound for an operation are not the gap-free range `0..k`.
    #[error("some inputs missing for '{operation}', detected only {found:?}")]
    MissingInput {
        /// Operation with incomplete inputs.
        operation: String,
        /// Input slots that were actually bound or satisfied.
        found: Vec<usize>,
    },

    /// The dependency graph contains a cycle through the named operation.
    #[error("cycle detected at: {0}")]
    CycleDetected(String),

    /// The graph (or pipeline) has no operations.
    #[error("graph has no operations")]
    EmptyGraph,
}

/// Errors raised by ring buffers and their elements.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Fail-fast acquire of an element that is still occupied.
    #[error("buffer overrun: element {index} of '{buffer}' is still occupied")]
    Overrun {
        /// Ring buffer name.
        buffer: String,
        /// Element index.
        index: usize,
    },

    /// Release of an element that is not acquired (fail-fast policy only).
    #[error("element {index} of '{buffer}' is not acquired")]
    NotAcquired {
        /// Ring buffer name.
        buffer: String,
        /// Element index.
        index: usize,
    },

    /// Element index past the end of the ring.
    #[error("element index {index} out of range for '{buffer}' ({len} elements)")]
    IndexOutOfRange {
        /// Ring buffer name.
        buffer: String,
        /// Requested index.
        index: usize,
        /// Number of elements in the ring.
        len: usize,
    },

    /// FIFO release requested while nothing is acquired.
    #[error("no acquired elements in '{0}'")]
    NothingAcquired(String),

    /// A bounded acquire gave up before the element was released.
    #[error("timed out waiting for element {index} of '{buffer}'")]
    Timeout {
        /// Ring buffer name.
        buffer: String,
        /// Element index.
        index: usize,
    },

    /// The requested buffer layout is unusable.
    #[error("invalid buffer layout: {0}")]
    InvalidLayout(String),

    /// Data does not match the layout it is written into.
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),
}

/// Errors raised by [`ConstMemoryPool`](crate::device::ConstMemoryPool).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool is larger than the device's constant memory.
    #[error(
        "not enough constant memory for '{pool}': requested {requested} bytes, device provides {available}"
    )]
    ExceedsDevice {
        /// Pool name.
        pool: String,
        /// Requested size in bytes.
        requested: usize,
        /// Device constant memory in bytes.
        available: usize,
    },

    /// A reservation does not fit in the remaining capacity.
    #[error(
        "exceeded constant memory for '{pool}': currently reserved {reserved}, to be reserved {requested}, total size {capacity}"
    )]
    Exhausted {
        /// Pool name.
        pool: String,
        /// Elements already reserved.
        reserved: usize,
        /// End offset the reservation would need.
        requested: usize,
        /// Pool capacity in elements.
        capacity: usize,
    },

    /// The reserved data's item size does not match the pool's dtype.
    #[error("pool '{pool}' holds {dtype} values, got items of {item_size} bytes")]
    DTypeMismatch {
        /// Pool name.
        pool: String,
        /// Pool element type.
        dtype: DType,
        /// Size of the offered item type.
        item_size: usize,
    },
}

/// Errors raised by operation implementations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OperationError {
    /// The input descriptor is not acceptable to this operation.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// A value of the wrong kind was passed to `process`.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Wrong number of inputs.
    #[error("expected {expected} inputs, got {actual}")]
    InputCount {
        /// Number of inputs the operation accepts.
        expected: usize,
        /// Number of inputs received.
        actual: usize,
    },

    /// The element type is not supported by this operation.
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(DType),

    /// Parameter name not exposed by this operation.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// Parameter value rejected.
    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Ring-buffer failure inside an operation (e.g. the ingress adapter).
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Constant-memory reservation failure.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Any other stage failure.
    #[error("{0}")]
    Failed(String),
}

/// Errors raised while compiling a graph into a schedule.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Topology problem.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// An operation's `prepare` failed; the stage error is kept as the source.
    #[error("failed to prepare '{operation}': {source}")]
    Prepare {
        /// Operation whose `prepare` failed.
        operation: String,
        /// The stage error, unchanged.
        #[source]
        source: OperationError,
    },

    /// `prepare` returned fewer descriptors than the bound output slots need.
    #[error("'{operation}' produced {produced} output descriptors, but output {slot} is bound")]
    MissingOutput {
        /// Operation with the missing output.
        operation: String,
        /// Number of descriptors returned.
        produced: usize,
        /// The bound slot with no descriptor.
        slot: usize,
    },

    /// No input descriptors were supplied.
    #[error("no input streams were described")]
    NoInputs,

    /// Nothing is bound to the graph's `Output`.
    #[error("graph has no bound outputs")]
    NoOutputs,
}

/// Errors raised by the [`ExecutionEngine`](crate::ExecutionEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// `process` (or parameter access) after `close`.
    #[error("engine is closed")]
    Closed,

    /// Compilation failed while building the engine.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Ring-buffer construction failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// The producer's ring buffer does not match the input descriptors.
    #[error("host input buffer does not match the input descriptors: {0}")]
    LayoutMismatch(String),

    /// No parameter is registered under this key.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// The owning operation rejected a parameter access.
    #[error("parameter '{key}': {source}")]
    Parameter {
        /// Fully qualified parameter key.
        key: String,
        /// The operation's error.
        #[source]
        source: OperationError,
    },

    /// A stage failed while processing a frame.
    #[error("'{operation}' failed: {source}")]
    Process {
        /// Operation that failed.
        operation: String,
        /// The stage error, unchanged.
        #[source]
        source: OperationError,
    },

    /// An input slot was empty when its operation was dispatched.
    #[error("no value in input {slot} of '{operation}'")]
    MissingValue {
        /// Operation missing the value.
        operation: String,
        /// Empty input slot.
        slot: usize,
    },

    /// A device stream worker could not be started.
    #[error("failed to start device stream: {0}")]
    Spawn(#[from] std::io::Error),
}
