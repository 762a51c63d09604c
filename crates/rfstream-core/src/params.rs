//! Parameter descriptors and the engine-wide parameter directory.
//!
//! Operations expose runtime-adjustable parameters through
//! [`Operation::parameters`](crate::Operation::parameters). Each one is
//! described by a [`ParamDescriptor`] carrying the metadata a front end needs
//! to build a control for it: unit, shape, range and default.
//!
//! # Keys
//!
//! Parameters are addressed by path-like keys. A leaf operation advertises
//! bare names (`"min"`); whoever owns the operation qualifies them with the
//! operation's name, giving `"/Clip:0/min"`. Composites advertise keys they
//! have already qualified, so nesting simply stacks prefixes:
//!
//! ```text
//! /Pipeline:0/Clip:0/min
//!  ^ graph op  ^ pipeline step  ^ leaf parameter
//! ```
//!
//! [`ParameterDirectory`] holds the resulting `key → (owner, local name)`
//! table; it is built once when a graph is compiled and never rebuilt.
//!
//! # Example
//!
//! ```rust
//! use rfstream_core::params::{ParamDescriptor, ParameterDirectory, qualify};
//!
//! let min = ParamDescriptor::gain_db("min", 0.0, 120.0, 20.0);
//! let directory = ParameterDirectory::build([(0, "Clip:0", vec![min])]);
//!
//! assert_eq!(qualify("Clip:0", "min"), "/Clip:0/min");
//! let entry = directory.resolve("/Clip:0/min").unwrap();
//! assert_eq!(entry.owner(), 0);
//! assert_eq!(entry.local(), "min");
//! ```

use std::collections::BTreeMap;
use std::fmt;

/// Unit of a parameter value, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamUnit {
    /// Decibels (dB), e.g. dynamic range limits.
    Decibels,
    /// Hertz (Hz), e.g. filter cutoffs.
    Hertz,
    /// Seconds, e.g. delays and gates.
    Seconds,
    /// Meters, e.g. depths and apertures.
    Meters,
    /// No unit.
    #[default]
    None,
}

impl ParamUnit {
    /// Unit suffix for display.
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::Decibels => " dB",
            Self::Hertz => " Hz",
            Self::Seconds => " s",
            Self::Meters => " m",
            Self::None => "",
        }
    }
}

/// Metadata for one adjustable parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescriptor {
    /// Parameter name. Bare for leaf operations, a full key once qualified.
    pub name: String,
    /// Unit of the value.
    pub unit: ParamUnit,
    /// Shape of the value; empty for a scalar.
    pub shape: Vec<usize>,
    /// Minimum allowed value.
    pub min: f64,
    /// Maximum allowed value.
    pub max: f64,
    /// Value the operation starts with.
    pub default: f64,
}

impl ParamDescriptor {
    /// Scalar parameter without a unit.
    pub fn scalar(name: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self {
            name: name.into(),
            unit: ParamUnit::None,
            shape: Vec::new(),
            min,
            max,
            default,
        }
    }

    /// Scalar parameter in decibels.
    pub fn gain_db(name: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self::scalar(name, min, max, default).with_unit(ParamUnit::Decibels)
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: ParamUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Sets the value shape.
    pub fn with_shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.shape = shape.into();
        self
    }

    /// Copy of this descriptor under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Clamps a value to `[min, max]`.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// A parameter value: a scalar or a small array of floats.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValue(Vec<f64>);

impl ParamValue {
    /// Scalar value.
    pub fn scalar(value: f64) -> Self {
        Self(vec![value])
    }

    /// Array value.
    pub fn array(values: impl Into<Vec<f64>>) -> Self {
        Self(values.into())
    }

    /// The value when it holds exactly one item.
    pub fn as_scalar(&self) -> Option<f64> {
        match self.0.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    /// All items.
    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::scalar(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_scalar() {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "{:?}", self.0),
        }
    }
}

/// Builds the key of `param` inside the operation named `op`.
///
/// Both parts are trimmed and a leading `/` is added to the parameter when
/// missing, so `qualify("Clip:0", "min")` and `qualify("Clip:0", "/min")`
/// agree.
pub fn qualify(op: &str, param: &str) -> String {
    let op = op.trim().trim_start_matches('/');
    let param = param.trim();
    if param.starts_with('/') {
        format!("/{op}{param}")
    } else {
        format!("/{op}/{param}")
    }
}

/// One resolved directory entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    owner: usize,
    local: String,
    descriptor: ParamDescriptor,
}

impl DirectoryEntry {
    /// Index of the owning operation.
    pub fn owner(&self) -> usize {
        self.owner
    }

    /// Name the owning operation knows the parameter by.
    pub fn local(&self) -> &str {
        &self.local
    }

    /// The descriptor, renamed to the full key.
    pub fn descriptor(&self) -> &ParamDescriptor {
        &self.descriptor
    }
}

/// Map from fully qualified parameter keys to their owning operation.
#[derive(Debug, Clone, Default)]
pub struct ParameterDirectory {
    entries: BTreeMap<String, DirectoryEntry>,
}

impl ParameterDirectory {
    /// Builds the directory from `(owner index, owner name, parameters)` triples.
    ///
    /// A later owner advertising an identical key replaces the earlier one;
    /// owner names are unique in every graph and pipeline, so this only
    /// happens for hand-built inputs.
    pub fn build<'a>(
        owners: impl IntoIterator<Item = (usize, &'a str, Vec<ParamDescriptor>)>,
    ) -> Self {
        let mut entries = BTreeMap::new();
        for (owner, name, params) in owners {
            for descriptor in params {
                let key = qualify(name, &descriptor.name);
                let entry = DirectoryEntry {
                    owner,
                    local: descriptor.name.clone(),
                    descriptor: descriptor.renamed(key.clone()),
                };
                tracing::trace!(key = %key, owner, "registered parameter");
                entries.insert(key, entry);
            }
        }
        Self { entries }
    }

    /// Looks up a key. Surrounding whitespace is ignored.
    pub fn resolve(&self, key: &str) -> Option<&DirectoryEntry> {
        self.entries.get(key.trim())
    }

    /// All keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// All descriptors (named by full key), sorted by key.
    pub fn descriptors(&self) -> impl Iterator<Item = &ParamDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    /// Number of registered parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no parameters are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualify_normalizes_slashes_and_whitespace() {
        assert_eq!(qualify("Clip:0", "min"), "/Clip:0/min");
        assert_eq!(qualify("Clip:0", "/min"), "/Clip:0/min");
        assert_eq!(qualify(" Clip:0 ", " min "), "/Clip:0/min");
    }

    #[test]
    fn nested_keys_stack_prefixes() {
        let inner = qualify("Clip:0", "min");
        assert_eq!(qualify("Pipeline:0", &inner), "/Pipeline:0/Clip:0/min");
    }

    #[test]
    fn directory_routes_to_owner_with_local_name() {
        let directory = ParameterDirectory::build([
            (1, "A", vec![ParamDescriptor::scalar("gain", 0.0, 1.0, 0.5)]),
            (
                3,
                "P",
                vec![ParamDescriptor::gain_db("/B:0/min", 0.0, 100.0, 20.0)],
            ),
        ]);

        let a = directory.resolve("/A/gain").unwrap();
        assert_eq!((a.owner(), a.local()), (1, "gain"));
        assert_eq!(a.descriptor().name, "/A/gain");

        let b = directory.resolve("/P/B:0/min").unwrap();
        assert_eq!((b.owner(), b.local()), (3, "/B:0/min"));
        assert_eq!(b.descriptor().unit, ParamUnit::Decibels);

        assert!(directory.resolve("/P/missing").is_none());
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn resolve_trims_whitespace() {
        let directory =
            ParameterDirectory::build([(0, "A", vec![ParamDescriptor::scalar("x", 0.0, 1.0, 0.0)])]);
        assert!(directory.resolve("  /A/x ").is_some());
    }

    #[test]
    fn param_value_scalar_access() {
        assert_eq!(ParamValue::scalar(3.0).as_scalar(), Some(3.0));
        assert_eq!(ParamValue::array([1.0, 2.0]).as_scalar(), None);
        assert_eq!(ParamValue::from(2.5).to_string(), "2.5");
    }

    #[test]
    fn clamp_respects_range() {
        let desc = ParamDescriptor::gain_db("max", 0.0, 120.0, 80.0);
        assert_eq!(desc.clamp(-5.0), 0.0);
        assert_eq!(desc.clamp(200.0), 120.0);
        assert_eq!(desc.unit.suffix(), " dB");
    }
}
