//! Frame descriptors: the metadata that propagates through `prepare`.
//!
//! A [`Descriptor`] says what a stream's frames look like: shape, element
//! type, sampling frequency, where the stream came from, plus a small map of
//! free-form extensions stages may attach. Descriptors are immutable values;
//! the `with_*` builders return derived copies and share storage until one
//! side actually changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::array::{ArrayLayout, DType};

/// A value in a descriptor's extension map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    /// Flag.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// Text.
    Text(String),
    /// List of floats (e.g. per-channel delays).
    Floats(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DescriptorData {
    shape: Vec<usize>,
    dtype: DType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sampling_frequency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extras: BTreeMap<String, MetaValue>,
}

/// Metadata describing one stream of frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DescriptorData", into = "DescriptorData")]
pub struct Descriptor {
    data: Arc<DescriptorData>,
}

impl Descriptor {
    /// Creates a descriptor with only shape and dtype set.
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        Self {
            data: Arc::new(DescriptorData {
                shape: shape.into(),
                dtype,
                sampling_frequency: None,
                source: None,
                name: None,
                extras: BTreeMap::new(),
            }),
        }
    }

    /// Frame dimensions.
    pub fn shape(&self) -> &[usize] {
        &self.data.shape
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.data.dtype
    }

    /// Layout of one frame.
    pub fn layout(&self) -> ArrayLayout {
        ArrayLayout::new(self.data.shape.clone(), self.data.dtype)
    }

    /// Sampling frequency in Hz, when known.
    pub fn sampling_frequency(&self) -> Option<f64> {
        self.data.sampling_frequency
    }

    /// Identifier of the producing device or stream.
    pub fn source(&self) -> Option<&str> {
        self.data.source.as_deref()
    }

    /// Name assigned by the producing pipeline (`"<pipeline>/Output:<i>"`).
    pub fn name(&self) -> Option<&str> {
        self.data.name.as_deref()
    }

    /// Looks up an extension value.
    pub fn extra(&self, key: &str) -> Option<&MetaValue> {
        self.data.extras.get(key)
    }

    /// All extension values, sorted by key.
    pub fn extras(&self) -> &BTreeMap<String, MetaValue> {
        &self.data.extras
    }

    /// Copy with a different shape.
    pub fn with_shape(&self, shape: impl Into<Vec<usize>>) -> Self {
        self.derive(|d| d.shape = shape.into())
    }

    /// Copy with a different dtype.
    pub fn with_dtype(&self, dtype: DType) -> Self {
        self.derive(|d| d.dtype = dtype)
    }

    /// Copy with a sampling frequency.
    pub fn with_sampling_frequency(&self, hz: f64) -> Self {
        self.derive(|d| d.sampling_frequency = Some(hz))
    }

    /// Copy with a source identifier.
    pub fn with_source(&self, source: impl Into<String>) -> Self {
        self.derive(|d| d.source = Some(source.into()))
    }

    /// Copy with a name.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        self.derive(|d| d.name = Some(name.into()))
    }

    /// Copy with one extension value added or replaced.
    pub fn with_extra(&self, key: impl Into<String>, value: MetaValue) -> Self {
        self.derive(|d| {
            d.extras.insert(key.into(), value);
        })
    }

    fn derive(&self, change: impl FnOnce(&mut DescriptorData)) -> Self {
        let mut derived = self.clone();
        change(Arc::make_mut(&mut derived.data));
        derived
    }
}

impl From<DescriptorData> for Descriptor {
    fn from(data: DescriptorData) -> Self {
        Self {
            data: Arc::new(data),
        }
    }
}

impl From<Descriptor> for DescriptorData {
    fn from(descriptor: Descriptor) -> Self {
        Arc::unwrap_or_clone(descriptor.data)
    }
}
