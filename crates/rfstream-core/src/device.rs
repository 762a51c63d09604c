//! Host-emulated device runtime: streams, events, memory registration and
//! constant-memory pools.
//!
//! The engine talks to its accelerator through a small surface:
//!
//! - a [`Stream`] is an in-order asynchronous work queue; work enqueued on it
//!   runs after everything enqueued before it;
//! - an [`Event`] is recorded on a stream and completes once the stream
//!   reaches it; another stream can be told to wait on it;
//! - host memory used for transfers is registered with a [`HostRegistry`];
//! - small read-only tables live in a [`ConstMemoryPool`].
//!
//! Here each stream is a worker thread draining a `crossbeam-channel` inbox,
//! so the whole engine runs (and is tested) on the host. A task that panics
//! is logged and the stream keeps going.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytemuck::Pod;
use crossbeam_channel::{Sender, unbounded};
use parking_lot::{Condvar, Mutex};

use crate::array::DType;
use crate::buffer::RingBuffer;
use crate::error::PoolError;

/// Default constant memory of the emulated device (64 KiB).
pub const DEFAULT_CONST_MEMORY: usize = 64 * 1024;

/// Static properties of the processing device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    /// Device name.
    pub name: String,
    /// Total constant memory in bytes.
    pub total_const_memory: usize,
}

impl Default for DeviceProperties {
    fn default() -> Self {
        Self {
            name: "host-emulated".to_string(),
            total_const_memory: DEFAULT_CONST_MEMORY,
        }
    }
}

#[derive(Debug, Default)]
struct EventState {
    complete: Mutex<bool>,
    cond: Condvar,
}

/// One-shot completion marker.
///
/// Clones share state: signalling one completes all of them.
#[derive(Debug, Clone, Default)]
pub struct Event {
    state: Arc<EventState>,
}

impl Event {
    /// A pending event.
    pub fn new() -> Self {
        Self::default()
    }

    /// An event that is already complete.
    pub fn completed() -> Self {
        let event = Self::new();
        event.signal();
        event
    }

    /// Completes the event and wakes every waiter.
    pub fn signal(&self) {
        *self.state.complete.lock() = true;
        self.state.cond.notify_all();
    }

    /// Whether the event has completed.
    pub fn is_complete(&self) -> bool {
        *self.state.complete.lock()
    }

    /// Blocks until the event completes.
    pub fn wait(&self) {
        let mut complete = self.state.complete.lock();
        while !*complete {
            self.state.cond.wait(&mut complete);
        }
    }
}

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Run(Task),
    Shutdown,
}

/// In-order asynchronous work queue backed by one worker thread.
///
/// Dropping the stream finishes the queued work, then joins the worker. A task
/// blocked forever (for example on a ring element nobody releases) therefore
/// blocks the drop.
pub struct Stream {
    name: String,
    inbox: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Stream {
    /// Starts a stream worker.
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (inbox, commands) = unbounded::<Command>();
        let worker_name = name.clone();
        let worker = std::thread::Builder::new()
            .name(format!("stream-{name}"))
            .spawn(move || {
                for command in commands {
                    match command {
                        Command::Run(task) => {
                            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                                tracing::error!(stream = %worker_name, "stream task panicked");
                            }
                        }
                        Command::Shutdown => break,
                    }
                }
                tracing::trace!(stream = %worker_name, "stream worker stopped");
            })?;
        tracing::debug!(stream = %name, "started stream");
        Ok(Self {
            name,
            inbox,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues device work.
    pub fn enqueue(&self, task: impl FnOnce() + Send + 'static) {
        if self.inbox.send(Command::Run(Box::new(task))).is_err() {
            tracing::error!(stream = %self.name, "stream worker is gone, task dropped");
        }
    }

    /// Enqueues a host callback; it runs once all earlier work has finished.
    pub fn launch_host_func(&self, callback: impl FnOnce() + Send + 'static) {
        self.enqueue(callback);
    }

    /// Records an event that completes when the stream reaches this point.
    pub fn record(&self) -> Event {
        let event = Event::new();
        let marker = event.clone();
        self.enqueue(move || marker.signal());
        event
    }

    /// Makes later work on this stream wait for `event`.
    pub fn wait_event(&self, event: &Event) {
        let event = event.clone();
        self.enqueue(move || event.wait());
    }

    /// Blocks until everything enqueued so far has run.
    pub fn synchronize(&self) {
        self.record().wait();
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let _ = self.inbox.send(Command::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!(stream = %self.name, "stream worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("name", &self.name).finish()
    }
}

/// Book-keeping of host memory registered (pinned) for device transfers.
#[derive(Debug, Default)]
pub struct HostRegistry {
    registered: Mutex<BTreeMap<String, usize>>,
}

impl HostRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every element of `buffer`.
    pub fn register(&self, buffer: &RingBuffer) {
        let bytes = buffer.byte_size();
        self.registered
            .lock()
            .insert(buffer.name().to_string(), bytes);
        tracing::debug!(buffer = buffer.name(), bytes, "registered host buffer");
    }

    /// Unregisters `buffer`. Returns false if it was not registered.
    pub fn unregister(&self, buffer: &RingBuffer) -> bool {
        let removed = self.registered.lock().remove(buffer.name()).is_some();
        if removed {
            tracing::debug!(buffer = buffer.name(), "unregistered host buffer");
        }
        removed
    }

    /// Whether `name` is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.lock().contains_key(name)
    }

    /// Total registered bytes.
    pub fn registered_bytes(&self) -> usize {
        self.registered.lock().values().sum()
    }
}

#[derive(Debug)]
struct PoolState {
    reserved: usize,
    memory: Vec<u8>,
}

/// A fixed region of device constant memory handed out by reservation.
///
/// Stages reserve their read-only tables during `prepare`; the returned
/// offset (in items) locates the table inside the pool. Reservations are
/// never returned individually; the whole pool is reset when the engine
/// closes.
#[derive(Debug)]
pub struct ConstMemoryPool {
    name: String,
    dtype: DType,
    capacity: usize,
    state: Mutex<PoolState>,
}

impl ConstMemoryPool {
    /// Creates a pool of `capacity` items of `dtype`.
    ///
    /// Fails when the pool does not fit in the device's constant memory.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        dtype: DType,
        device: &DeviceProperties,
    ) -> Result<Self, PoolError> {
        let name = name.into();
        let bytes = capacity * dtype.itemsize();
        if bytes > device.total_const_memory {
            return Err(PoolError::ExceedsDevice {
                pool: name,
                requested: bytes,
                available: device.total_const_memory,
            });
        }
        tracing::debug!(pool = %name, capacity, %dtype, "allocated constant memory pool");
        Ok(Self {
            name,
            dtype,
            capacity,
            state: Mutex::new(PoolState {
                reserved: 0,
                memory: vec![0; bytes],
            }),
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Item type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Capacity in items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items reserved so far.
    pub fn reserved(&self) -> usize {
        self.state.lock().reserved
    }

    /// Copies `data` into the pool and returns its offset in items.
    pub fn reserve<T: Pod>(&self, data: &[T]) -> Result<usize, PoolError> {
        let item_size = std::mem::size_of::<T>();
        if item_size != self.dtype.itemsize() {
            return Err(PoolError::DTypeMismatch {
                pool: self.name.clone(),
                dtype: self.dtype,
                item_size,
            });
        }
        let mut state = self.state.lock();
        let start = state.reserved;
        let end = start + data.len();
        if end > self.capacity {
            return Err(PoolError::Exhausted {
                pool: self.name.clone(),
                reserved: start,
                requested: end,
                capacity: self.capacity,
            });
        }
        state.memory[start * item_size..end * item_size]
            .copy_from_slice(bytemuck::cast_slice(data));
        state.reserved = end;
        Ok(start)
    }

    /// Reads `len` items at `offset`, `None` if the range is not reserved.
    pub fn read<T: Pod>(&self, offset: usize, len: usize) -> Option<Vec<T>> {
        let item_size = std::mem::size_of::<T>();
        let state = self.state.lock();
        if item_size != self.dtype.itemsize() || offset + len > state.reserved {
            return None;
        }
        Some(bytemuck::pod_collect_to_vec(
            &state.memory[offset * item_size..(offset + len) * item_size],
        ))
    }

    /// Drops every reservation.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.reserved = 0;
        state.memory.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn stream_runs_tasks_in_order() {
        let stream = Stream::new("test").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = Arc::clone(&log);
            stream.enqueue(move || log.lock().push(i));
        }
        stream.synchronize();
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn record_completes_after_earlier_work() {
        let stream = Stream::new("test").unwrap();
        let gate = Event::new();
        stream.wait_event(&gate);
        let done = stream.record();
        std::thread::sleep(Duration::from_millis(10));
        assert!(!done.is_complete());
        gate.signal();
        done.wait();
        assert!(done.is_complete());
    }

    #[test]
    fn panicking_task_does_not_stop_the_stream() {
        let stream = Stream::new("test").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        stream.enqueue(|| panic!("boom"));
        let c = Arc::clone(&count);
        stream.launch_host_func(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        stream.synchronize();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cross_stream_wait() {
        let transfer = Stream::new("transfer").unwrap();
        let compute = Stream::new("compute").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let gate = Event::new();
        transfer.wait_event(&gate);
        let o = Arc::clone(&order);
        transfer.enqueue(move || o.lock().push("copy"));
        let copied = transfer.record();

        compute.wait_event(&copied);
        let o = Arc::clone(&order);
        compute.enqueue(move || o.lock().push("kernel"));

        gate.signal();
        compute.synchronize();
        assert_eq!(*order.lock(), vec!["copy", "kernel"]);
    }

    #[test]
    fn completed_event_does_not_block() {
        Event::completed().wait();
    }

    #[test]
    fn pool_reserves_consecutive_offsets() {
        let device = DeviceProperties::default();
        let pool = ConstMemoryPool::new("delays", 16, DType::F32, &device).unwrap();
        assert_eq!(pool.reserve(&[1.0f32; 10]).unwrap(), 0);
        assert_eq!(pool.reserve(&[2.0f32; 6]).unwrap(), 10);
        assert_eq!(pool.read::<f32>(10, 2), Some(vec![2.0, 2.0]));
        assert_eq!(pool.reserved(), 16);
    }

    #[test]
    fn pool_exhaustion() {
        let device = DeviceProperties::default();
        let pool = ConstMemoryPool::new("delays", 4, DType::F32, &device).unwrap();
        pool.reserve(&[0.0f32; 3]).unwrap();
        let err = pool.reserve(&[0.0f32; 2]).unwrap_err();
        assert_eq!(
            err,
            PoolError::Exhausted {
                pool: "delays".to_string(),
                reserved: 3,
                requested: 5,
                capacity: 4,
            }
        );
        pool.reset();
        assert_eq!(pool.reserve(&[0.0f32; 4]).unwrap(), 0);
    }

    #[test]
    fn pool_larger_than_device_is_rejected() {
        let device = DeviceProperties::default();
        let err = ConstMemoryPool::new("big", DEFAULT_CONST_MEMORY, DType::F32, &device).unwrap_err();
        assert!(matches!(err, PoolError::ExceedsDevice { .. }));
    }

    #[test]
    fn pool_rejects_wrong_item_type() {
        let device = DeviceProperties::default();
        let pool = ConstMemoryPool::new("tx", 8, DType::F32, &device).unwrap();
        assert!(matches!(
            pool.reserve(&[1i16, 2]),
            Err(PoolError::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn registry_tracks_bytes() {
        use crate::array::ArrayLayout;
        use crate::buffer::BufferPolicy;

        let registry = HostRegistry::new();
        let ring = RingBuffer::new(
            "host",
            2,
            vec![ArrayLayout::new([4], DType::F32)],
            BufferPolicy::Blocking,
        )
        .unwrap();
        registry.register(&ring);
        assert_eq!(registry.registered_bytes(), 32);
        assert!(registry.unregister(&ring));
        assert!(!registry.unregister(&ring));
        assert_eq!(registry.registered_bytes(), 0);
    }
}
