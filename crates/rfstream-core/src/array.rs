//! Element types, n-d array layouts, and the values that flow between stages.
//!
//! Frames are moved around as raw bytes tagged with an [`ArrayLayout`]. Typed
//! access goes through `bytemuck`, so a stage reading `f32` samples out of an
//! [`Array`] never needs `unsafe`.
//!
//! A [`Value`] is one of three things:
//!
//! - an owned [`Array`] produced by an ordinary stage,
//! - a [`Slot`](Value::Slot) view into one array of a ring-buffer element,
//!   optionally gated by a device event,
//! - a whole ring-buffer [`Element`](Value::Element), which only the ingress
//!   adapter ever receives.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::MappedRwLockReadGuard;
use serde::{Deserialize, Serialize};

use crate::buffer::{ArrayRef, BufferElement};
use crate::error::{BufferError, OperationError};

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Unsigned byte.
    U8,
    /// 16-bit signed integer (raw RF samples).
    I16,
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Interleaved pair of 32-bit floats (IQ data).
    Complex64,
}

impl DType {
    /// Size of one item in bytes.
    pub const fn itemsize(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 | Self::Complex64 => 8,
        }
    }

    /// Lowercase name, as used in configuration files.
    pub const fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Complex64 => "complex64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape and element type of an n-d array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayLayout {
    shape: Vec<usize>,
    dtype: DType,
}

impl ArrayLayout {
    /// Creates a layout.
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
        }
    }

    /// Array dimensions.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of items (product of the shape; 1 for a scalar).
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// True when the array holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes, `len() * itemsize`.
    pub fn byte_size(&self) -> usize {
        self.len() * self.dtype.itemsize()
    }
}

impl fmt::Display for ArrayLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.dtype, self.shape)
    }
}

/// Owned, immutable n-d array.
#[derive(Clone, PartialEq, Eq)]
pub struct Array {
    layout: ArrayLayout,
    bytes: Vec<u8>,
}

impl Array {
    /// Zero-filled array.
    pub fn zeros(layout: ArrayLayout) -> Self {
        let bytes = vec![0; layout.byte_size()];
        Self { layout, bytes }
    }

    /// Wraps raw bytes; their length must match the layout.
    pub fn from_bytes(layout: ArrayLayout, bytes: Vec<u8>) -> Result<Self, BufferError> {
        if bytes.len() != layout.byte_size() {
            return Err(BufferError::LayoutMismatch(format!(
                "{layout} needs {} bytes, got {}",
                layout.byte_size(),
                bytes.len()
            )));
        }
        Ok(Self { layout, bytes })
    }

    /// Copies typed items into a new array.
    ///
    /// `T` must have the dtype's item size (`f32` for [`DType::F32`],
    /// `[f32; 2]` for [`DType::Complex64`], ...).
    pub fn from_slice<T: Pod>(
        shape: impl Into<Vec<usize>>,
        dtype: DType,
        data: &[T],
    ) -> Result<Self, BufferError> {
        check_item_size::<T>(dtype)?;
        let layout = ArrayLayout::new(shape, dtype);
        Self::from_bytes(layout, bytemuck::cast_slice(data).to_vec())
    }

    /// Layout of this array.
    pub fn layout(&self) -> &ArrayLayout {
        &self.layout
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies the items out as `T`.
    pub fn to_vec<T: Pod>(&self) -> Result<Vec<T>, BufferError> {
        check_item_size::<T>(self.layout.dtype)?;
        Ok(bytemuck::pod_collect_to_vec(&self.bytes))
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("layout", &self.layout)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

pub(crate) fn check_item_size<T: Pod>(dtype: DType) -> Result<(), BufferError> {
    let size = std::mem::size_of::<T>();
    if size == dtype.itemsize() {
        Ok(())
    } else {
        Err(BufferError::LayoutMismatch(format!(
            "{dtype} items are {} bytes, requested type has {size}",
            dtype.itemsize()
        )))
    }
}

/// A value flowing along a graph edge.
#[derive(Debug, Clone)]
pub enum Value {
    /// Owned array produced by a stage.
    Array(Arc<Array>),
    /// View of one array inside a ring-buffer element.
    Slot(ArrayRef),
    /// A whole ring-buffer element (ingress adapter input only).
    Element(Arc<BufferElement>),
}

impl Value {
    /// Wraps an owned array.
    pub fn array(array: Array) -> Self {
        Self::Array(Arc::new(array))
    }

    /// Layout of the array behind this value, `None` for a whole element.
    pub fn layout(&self) -> Option<&ArrayLayout> {
        match self {
            Self::Array(array) => Some(array.layout()),
            Self::Slot(slot) => Some(slot.layout()),
            Self::Element(_) => None,
        }
    }

    /// The ring-buffer element, if this value carries one.
    pub fn as_element(&self) -> Option<&Arc<BufferElement>> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Borrows the array bytes. For a gated slot this waits for the event.
    pub fn bytes(&self) -> Result<ValueBytes<'_>, OperationError> {
        match self {
            Self::Array(array) => Ok(ValueBytes::Owned(array.bytes())),
            Self::Slot(slot) => Ok(ValueBytes::Mapped(slot.read())),
            Self::Element(_) => Err(OperationError::InvalidValue(
                "a whole buffer element has no single array view".to_string(),
            )),
        }
    }

    /// Copies the items out as `T`.
    pub fn to_vec<T: Pod>(&self) -> Result<Vec<T>, OperationError> {
        let layout = self.layout().ok_or_else(|| {
            OperationError::InvalidValue("a whole buffer element is not an array".to_string())
        })?;
        check_item_size::<T>(layout.dtype())?;
        let bytes = self.bytes()?;
        Ok(bytemuck::pod_collect_to_vec(&*bytes))
    }

    /// Copies the value into an owned array.
    pub fn to_array(&self) -> Result<Array, OperationError> {
        match self {
            Self::Array(array) => Ok(Array::clone(array)),
            Self::Slot(slot) => Ok(Array {
                layout: slot.layout().clone(),
                bytes: slot.read().to_vec(),
            }),
            Self::Element(_) => Err(OperationError::InvalidValue(
                "a whole buffer element is not an array".to_string(),
            )),
        }
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Self::array(array)
    }
}

/// Borrowed bytes of a [`Value`].
pub enum ValueBytes<'a> {
    /// Bytes of an owned array.
    Owned(&'a [u8]),
    /// Read guard over a ring-buffer slot.
    Mapped(MappedRwLockReadGuard<'a, [u8]>),
}

impl Deref for ValueBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Owned(bytes) => bytes,
            Self::Mapped(guard) => guard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn itemsize_matches_dtype() {
        assert_eq!(DType::U8.itemsize(), 1);
        assert_eq!(DType::I16.itemsize(), 2);
        assert_eq!(DType::F32.itemsize(), 4);
        assert_eq!(DType::Complex64.itemsize(), 8);
    }

    #[test]
    fn layout_byte_size() {
        let layout = ArrayLayout::new([64, 128], DType::I16);
        assert_eq!(layout.len(), 8192);
        assert_eq!(layout.byte_size(), 16384);
        assert_eq!(layout.to_string(), "i16[64, 128]");
    }

    #[test]
    fn from_slice_round_trips_typed_items() {
        let array = Array::from_slice([2, 2], DType::F32, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(array.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn from_slice_rejects_wrong_item_size() {
        let err = Array::from_slice([2], DType::F32, &[1i16, 2]).unwrap_err();
        assert!(matches!(err, BufferError::LayoutMismatch(_)));
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        let layout = ArrayLayout::new([4], DType::I16);
        assert!(Array::from_bytes(layout, vec![0; 7]).is_err());
    }

    #[test]
    fn complex_items_are_float_pairs() {
        let iq = [[1.0f32, -1.0], [0.5, 0.25]];
        let array = Array::from_slice([2], DType::Complex64, &iq).unwrap();
        assert_eq!(array.to_vec::<[f32; 2]>().unwrap(), iq.to_vec());
    }

    #[test]
    fn value_to_vec_reads_owned_array() {
        let value = Value::array(Array::from_slice([3], DType::I32, &[7i32, 8, 9]).unwrap());
        assert_eq!(value.to_vec::<i32>().unwrap(), vec![7, 8, 9]);
        assert_eq!(value.layout().unwrap().shape(), &[3]);
    }

    #[test]
    fn dtype_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&DType::Complex64).unwrap();
        assert_eq!(json, "\"complex64\"");
        let back: DType = serde_json::from_str("\"i16\"").unwrap();
        assert_eq!(back, DType::I16);
    }
}
