//! Fixed-capacity ring buffers of pre-allocated frame elements.
//!
//! A [`RingBuffer`] owns `n` [`BufferElement`]s. Each element holds one frame:
//! one contiguous byte store sliced into the arrays of the frame at
//! running-sum offsets, so moving a whole frame between rings is a single
//! copy.
//!
//! Every element is either FREE or OCCUPIED. Producers acquire elements in
//! round-robin order, consumers release them when done. What happens when a
//! producer catches up with a consumer depends on the ring's
//! [`BufferPolicy`]:
//!
//! - [`Blocking`](BufferPolicy::Blocking): `acquire` waits until the element
//!   is released.
//! - [`FailFast`](BufferPolicy::FailFast): `acquire` returns
//!   [`BufferError::Overrun`] immediately.
//!
//! The ring also keeps the indices of acquired elements in acquisition order,
//! so a consumer that does not track indices itself can call
//! [`release_oldest_acquired`](RingBuffer::release_oldest_acquired).
//!
//! # Example
//!
//! ```rust
//! use rfstream_core::{ArrayLayout, BufferPolicy, DType, RingBuffer};
//!
//! let ring = RingBuffer::new(
//!     "frames",
//!     2,
//!     vec![ArrayLayout::new([4], DType::F32)],
//!     BufferPolicy::FailFast,
//! )?;
//!
//! let first = ring.acquire(0)?;
//! first.write_slice(0, &[1.0f32, 2.0, 3.0, 4.0])?;
//! assert!(ring.acquire(0).is_err()); // still occupied
//!
//! ring.release_oldest_acquired()?;
//! assert!(ring.is_free(0));
//! # Ok::<(), rfstream_core::BufferError>(())
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytemuck::Pod;
use parking_lot::{
    Condvar, MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use serde::{Deserialize, Serialize};

use crate::array::{Array, ArrayLayout, check_item_size};
use crate::descriptor::Descriptor;
use crate::device::Event;
use crate::error::BufferError;

/// What `acquire` does when the requested element is still occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferPolicy {
    /// Wait until the element is released.
    #[default]
    Blocking,
    /// Fail with [`BufferError::Overrun`].
    FailFast,
}

/// Array layouts of one element and their byte offsets.
#[derive(Debug)]
struct ElementLayout {
    arrays: Vec<ArrayLayout>,
    offsets: Vec<usize>,
    size: usize,
}

impl ElementLayout {
    fn new(arrays: Vec<ArrayLayout>) -> Self {
        let mut offsets = Vec::with_capacity(arrays.len());
        let mut size = 0;
        for layout in &arrays {
            offsets.push(size);
            size += layout.byte_size();
        }
        Self {
            arrays,
            offsets,
            size,
        }
    }

    fn span(&self, index: usize) -> Option<(usize, usize)> {
        let offset = *self.offsets.get(index)?;
        Some((offset, self.arrays[index].byte_size()))
    }
}

/// One pre-allocated frame slot of a [`RingBuffer`].
pub struct BufferElement {
    ring: Arc<str>,
    index: usize,
    policy: BufferPolicy,
    layout: Arc<ElementLayout>,
    occupied: Mutex<bool>,
    freed: Condvar,
    storage: RwLock<Vec<u8>>,
    acquired: Arc<Mutex<VecDeque<usize>>>,
}

impl BufferElement {
    /// Position of this element in its ring.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Name of the owning ring.
    pub fn ring_name(&self) -> &str {
        &self.ring
    }

    /// Whether the element is currently acquired.
    pub fn is_occupied(&self) -> bool {
        *self.occupied.lock()
    }

    /// Array layouts of the frame held by this element.
    pub fn layouts(&self) -> &[ArrayLayout] {
        &self.layout.arrays
    }

    /// Number of arrays in the frame.
    pub fn array_count(&self) -> usize {
        self.layout.arrays.len()
    }

    /// Total size of the backing store in bytes.
    pub fn size(&self) -> usize {
        self.layout.size
    }

    /// View of array `index`, for passing downstream as a [`Value::Slot`](crate::Value::Slot).
    pub fn array(self: &Arc<Self>, index: usize) -> Option<ArrayRef> {
        (index < self.array_count()).then(|| ArrayRef {
            element: Arc::clone(self),
            index,
            ready: None,
        })
    }

    /// Read guard over the whole backing store.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.storage.read()
    }

    /// Write guard over the whole backing store.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.storage.write()
    }

    /// Overwrites array `index` with raw bytes of exactly its size.
    pub fn write_array(&self, index: usize, bytes: &[u8]) -> Result<(), BufferError> {
        let (offset, len) = self.span(index)?;
        if bytes.len() != len {
            return Err(BufferError::LayoutMismatch(format!(
                "array {index} of '{}' is {len} bytes, got {}",
                self.ring,
                bytes.len()
            )));
        }
        self.storage.write()[offset..offset + len].copy_from_slice(bytes);
        Ok(())
    }

    /// Overwrites array `index` with typed items.
    pub fn write_slice<T: Pod>(&self, index: usize, data: &[T]) -> Result<(), BufferError> {
        let dtype = self
            .layout
            .arrays
            .get(index)
            .map(ArrayLayout::dtype)
            .ok_or_else(|| self.out_of_range(index))?;
        check_item_size::<T>(dtype)?;
        self.write_array(index, bytemuck::cast_slice(data))
    }

    /// Copies array `index` out.
    pub fn read_array(&self, index: usize) -> Result<Array, BufferError> {
        let (offset, len) = self.span(index)?;
        let bytes = self.storage.read()[offset..offset + len].to_vec();
        Array::from_bytes(self.layout.arrays[index].clone(), bytes)
    }

    /// Copies every array out, in order.
    pub fn to_arrays(&self) -> Result<Vec<Array>, BufferError> {
        let storage = self.storage.read();
        self.layout
            .arrays
            .iter()
            .zip(&self.layout.offsets)
            .map(|(layout, &offset)| {
                let bytes = storage[offset..offset + layout.byte_size()].to_vec();
                Array::from_bytes(layout.clone(), bytes)
            })
            .collect()
    }

    /// Copies the whole frame from `other` in one pass. Layouts must match.
    pub fn copy_from(&self, other: &BufferElement) -> Result<(), BufferError> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        if self.layout.arrays != other.layout.arrays {
            return Err(BufferError::LayoutMismatch(format!(
                "cannot copy element of '{}' into element of '{}'",
                other.ring, self.ring
            )));
        }
        let src = other.storage.read();
        self.storage.write().copy_from_slice(&src);
        Ok(())
    }

    /// Marks the element FREE and wakes one waiting producer.
    ///
    /// Releasing a FREE element is a no-op under [`BufferPolicy::Blocking`]
    /// and wakes nobody, so an element is never handed out twice. Under
    /// [`BufferPolicy::FailFast`] it fails with `NotAcquired`.
    pub fn release(&self) -> Result<(), BufferError> {
        let mut occupied = self.occupied.lock();
        if !*occupied {
            return self.release_free();
        }
        {
            let mut acquired = self.acquired.lock();
            if let Some(pos) = acquired.iter().position(|&i| i == self.index) {
                acquired.remove(pos);
            }
        }
        *occupied = false;
        drop(occupied);
        self.freed.notify_one();
        Ok(())
    }

    fn acquire(&self, policy: BufferPolicy, deadline: Option<Instant>) -> Result<(), BufferError> {
        let mut occupied = self.occupied.lock();
        while *occupied {
            match (policy, deadline) {
                (BufferPolicy::FailFast, _) => {
                    return Err(BufferError::Overrun {
                        buffer: self.ring.to_string(),
                        index: self.index,
                    });
                }
                (BufferPolicy::Blocking, None) => self.freed.wait(&mut occupied),
                (BufferPolicy::Blocking, Some(deadline)) => {
                    if self.freed.wait_until(&mut occupied, deadline).timed_out() && *occupied {
                        return Err(BufferError::Timeout {
                            buffer: self.ring.to_string(),
                            index: self.index,
                        });
                    }
                }
            }
        }
        *occupied = true;
        self.acquired.lock().push_back(self.index);
        Ok(())
    }

    /// Frees an element whose index was already taken off the FIFO.
    fn release_dequeued(&self) -> Result<(), BufferError> {
        let mut occupied = self.occupied.lock();
        if !*occupied {
            return self.release_free();
        }
        *occupied = false;
        drop(occupied);
        self.freed.notify_one();
        Ok(())
    }

    fn release_free(&self) -> Result<(), BufferError> {
        match self.policy {
            BufferPolicy::Blocking => Ok(()),
            BufferPolicy::FailFast => Err(BufferError::NotAcquired {
                buffer: self.ring.to_string(),
                index: self.index,
            }),
        }
    }

    fn span(&self, index: usize) -> Result<(usize, usize), BufferError> {
        self.layout
            .span(index)
            .ok_or_else(|| self.out_of_range(index))
    }

    fn out_of_range(&self, index: usize) -> BufferError {
        BufferError::IndexOutOfRange {
            buffer: self.ring.to_string(),
            index,
            len: self.array_count(),
        }
    }
}

impl fmt::Debug for BufferElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferElement")
            .field("ring", &self.ring)
            .field("index", &self.index)
            .field("occupied", &self.is_occupied())
            .field("size", &self.layout.size)
            .finish()
    }
}

/// View of one array inside a ring-buffer element.
///
/// The view may be gated by an [`Event`]: reading it first waits until the
/// event completes, which is how a consumer waits for an in-flight transfer.
#[derive(Debug, Clone)]
pub struct ArrayRef {
    element: Arc<BufferElement>,
    index: usize,
    ready: Option<Event>,
}

impl ArrayRef {
    /// Layout of the viewed array.
    pub fn layout(&self) -> &ArrayLayout {
        &self.element.layout.arrays[self.index]
    }

    /// Element the view points into.
    pub fn element(&self) -> &Arc<BufferElement> {
        &self.element
    }

    /// Array index within the element.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Gates reads of this view on `event`.
    pub fn gated(mut self, event: Event) -> Self {
        self.ready = Some(event);
        self
    }

    /// Waits for the gate (if any) and borrows the array bytes.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        if let Some(event) = &self.ready {
            event.wait();
        }
        let offset = self.element.layout.offsets[self.index];
        let len = self.layout().byte_size();
        RwLockReadGuard::map(self.element.storage.read(), |bytes| {
            &bytes[offset..offset + len]
        })
    }
}

/// Fixed-capacity ring of frame elements.
#[derive(Debug)]
pub struct RingBuffer {
    name: Arc<str>,
    policy: BufferPolicy,
    layout: Arc<ElementLayout>,
    elements: Vec<Arc<BufferElement>>,
    acquired: Arc<Mutex<VecDeque<usize>>>,
}

impl RingBuffer {
    /// Allocates `len` elements, each holding one array per layout.
    pub fn new(
        name: impl Into<String>,
        len: usize,
        layouts: Vec<ArrayLayout>,
        policy: BufferPolicy,
    ) -> Result<Self, BufferError> {
        let name: Arc<str> = Arc::from(name.into());
        if len == 0 {
            return Err(BufferError::InvalidLayout(format!(
                "'{name}' needs at least one element"
            )));
        }
        if layouts.is_empty() {
            return Err(BufferError::InvalidLayout(format!(
                "'{name}' needs at least one array per element"
            )));
        }

        let layout = Arc::new(ElementLayout::new(layouts));
        let acquired = Arc::new(Mutex::new(VecDeque::with_capacity(len)));
        let elements = (0..len)
            .map(|index| {
                Arc::new(BufferElement {
                    ring: Arc::clone(&name),
                    index,
                    policy,
                    layout: Arc::clone(&layout),
                    occupied: Mutex::new(false),
                    freed: Condvar::new(),
                    storage: RwLock::new(vec![0; layout.size]),
                    acquired: Arc::clone(&acquired),
                })
            })
            .collect();

        tracing::debug!(
            buffer = %name,
            elements = len,
            element_bytes = layout.size,
            ?policy,
            "allocated ring buffer"
        );

        Ok(Self {
            name,
            policy,
            layout,
            elements,
            acquired,
        })
    }

    /// Ring with one array per descriptor.
    pub fn for_descriptors(
        name: impl Into<String>,
        len: usize,
        descriptors: &[Descriptor],
        policy: BufferPolicy,
    ) -> Result<Self, BufferError> {
        let layouts = descriptors.iter().map(Descriptor::layout).collect();
        Self::new(name, len, layouts, policy)
    }

    /// Ring name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Always false; a ring has at least one element.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Occupancy policy.
    pub fn policy(&self) -> BufferPolicy {
        self.policy
    }

    /// Array layouts of every element.
    pub fn layouts(&self) -> &[ArrayLayout] {
        &self.layout.arrays
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize {
        self.layout.size
    }

    /// Total bytes owned by the ring.
    pub fn byte_size(&self) -> usize {
        self.layout.size * self.elements.len()
    }

    /// Element `index`, regardless of its state.
    pub fn element(&self, index: usize) -> Result<&Arc<BufferElement>, BufferError> {
        self.elements
            .get(index)
            .ok_or_else(|| BufferError::IndexOutOfRange {
                buffer: self.name.to_string(),
                index,
                len: self.elements.len(),
            })
    }

    /// Whether element `index` is FREE. Out-of-range indices are not free.
    pub fn is_free(&self, index: usize) -> bool {
        self.elements
            .get(index)
            .is_some_and(|element| !element.is_occupied())
    }

    /// Number of currently acquired elements.
    pub fn acquired_count(&self) -> usize {
        self.acquired.lock().len()
    }

    /// Acquires element `index` according to the ring's policy.
    pub fn acquire(&self, index: usize) -> Result<Arc<BufferElement>, BufferError> {
        let element = self.element(index)?;
        element.acquire(self.policy, None)?;
        Ok(Arc::clone(element))
    }

    /// Acquires element `index` or fails with `Overrun`, whatever the policy.
    pub fn try_acquire(&self, index: usize) -> Result<Arc<BufferElement>, BufferError> {
        let element = self.element(index)?;
        element.acquire(BufferPolicy::FailFast, None)?;
        Ok(Arc::clone(element))
    }

    /// Acquires element `index`, waiting at most `timeout`.
    ///
    /// Under [`BufferPolicy::FailFast`] this behaves like [`acquire`](Self::acquire).
    pub fn acquire_timeout(
        &self,
        index: usize,
        timeout: Duration,
    ) -> Result<Arc<BufferElement>, BufferError> {
        let element = self.element(index)?;
        element.acquire(self.policy, Some(Instant::now() + timeout))?;
        Ok(Arc::clone(element))
    }

    /// Releases element `index`.
    pub fn release(&self, index: usize) -> Result<(), BufferError> {
        self.element(index)?.release()
    }

    /// Releases the element that was acquired earliest and is still held.
    pub fn release_oldest_acquired(&self) -> Result<(), BufferError> {
        let index = self
            .acquired
            .lock()
            .pop_front()
            .ok_or_else(|| BufferError::NothingAcquired(self.name.to_string()))?;
        self.elements[index].release_dequeued()
    }
}
