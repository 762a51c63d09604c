//! Reference operations.
//!
//! - [`Lambda`] wraps closures, for quick stages and tests.
//! - [`Tap`] passes data through and marks an extra pipeline output.
//! - [`Clip`] clamps `f32` samples to an adjustable dynamic range.

use crate::array::{Array, DType, Value};
use crate::descriptor::Descriptor;
use crate::error::OperationError;
use crate::operation::Operation;
use crate::params::{ParamDescriptor, ParamValue};

type ProcessFn = Box<dyn FnMut(&[Value]) -> Result<Vec<Value>, OperationError> + Send>;
type PrepareFn = Box<dyn FnMut(&[Descriptor]) -> Result<Vec<Descriptor>, OperationError> + Send>;

/// Operation built from closures.
///
/// Without a prepare closure the input descriptors are passed through.
///
/// ```rust
/// use rfstream_core::ops::Lambda;
/// use rfstream_core::{Array, DType, Operation, Value};
///
/// let mut negate = Lambda::new(|inputs| {
///     let samples: Vec<f32> = inputs[0].to_vec()?;
///     let negated: Vec<f32> = samples.iter().map(|s| -s).collect();
///     Ok(vec![Array::from_slice([negated.len()], DType::F32, &negated)?.into()])
/// });
///
/// let input = Value::array(Array::from_slice([2], DType::F32, &[1.0f32, -2.0]).unwrap());
/// let out = negate.process(&[input]).unwrap().unwrap();
/// assert_eq!(out[0].to_vec::<f32>().unwrap(), vec![-1.0, 2.0]);
/// ```
pub struct Lambda {
    process: ProcessFn,
    prepare: Option<PrepareFn>,
}

impl Lambda {
    /// Operation running `process` on every frame.
    pub fn new(
        process: impl FnMut(&[Value]) -> Result<Vec<Value>, OperationError> + Send + 'static,
    ) -> Self {
        Self {
            process: Box::new(process),
            prepare: None,
        }
    }

    /// Sets the closure that computes output descriptors.
    pub fn with_prepare(
        mut self,
        prepare: impl FnMut(&[Descriptor]) -> Result<Vec<Descriptor>, OperationError>
        + Send
        + 'static,
    ) -> Self {
        self.prepare = Some(Box::new(prepare));
        self
    }
}

impl Operation for Lambda {
    fn prepare(&mut self, inputs: &[Descriptor]) -> Result<Vec<Descriptor>, OperationError> {
        match &mut self.prepare {
            Some(prepare) => prepare(inputs),
            None => Ok(inputs.to_vec()),
        }
    }

    fn process(&mut self, inputs: &[Value]) -> Result<Option<Vec<Value>>, OperationError> {
        (self.process)(inputs).map(Some)
    }
}

/// Pass-through that marks an additional output of a pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tap;

impl Tap {
    /// Creates a tap.
    pub fn new() -> Self {
        Self
    }
}

impl Operation for Tap {
    fn prepare(&mut self, inputs: &[Descriptor]) -> Result<Vec<Descriptor>, OperationError> {
        Ok(inputs.to_vec())
    }

    fn process(&mut self, inputs: &[Value]) -> Result<Option<Vec<Value>>, OperationError> {
        Ok(Some(inputs.to_vec()))
    }

    fn is_sink(&self) -> bool {
        true
    }
}

/// Clamps `f32` data to `[min, max]`.
///
/// Typically applied to log-compressed envelopes, so both limits are in dB.
#[derive(Debug, Clone)]
pub struct Clip {
    min: f64,
    max: f64,
}

impl Clip {
    /// Clip to `[min, max]` dB.
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Current limits.
    pub fn limits(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

impl Operation for Clip {
    fn prepare(&mut self, inputs: &[Descriptor]) -> Result<Vec<Descriptor>, OperationError> {
        let [input] = inputs else {
            return Err(OperationError::InputCount {
                expected: 1,
                actual: inputs.len(),
            });
        };
        if input.dtype() != DType::F32 {
            return Err(OperationError::UnsupportedDType(input.dtype()));
        }
        Ok(vec![input.clone()])
    }

    fn process(&mut self, inputs: &[Value]) -> Result<Option<Vec<Value>>, OperationError> {
        let [input] = inputs else {
            return Err(OperationError::InputCount {
                expected: 1,
                actual: inputs.len(),
            });
        };
        let shape = input
            .layout()
            .map(|layout| layout.shape().to_vec())
            .ok_or_else(|| OperationError::InvalidValue("clip expects an array".to_string()))?;
        let (min, max) = (self.min as f32, self.max as f32);
        let clipped: Vec<f32> = input
            .to_vec::<f32>()?
            .into_iter()
            .map(|sample| sample.clamp(min, max))
            .collect();
        Ok(Some(vec![
            Array::from_slice(shape, DType::F32, &clipped)?.into(),
        ]))
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        vec![
            ParamDescriptor::gain_db("min", f64::MIN, f64::MAX, self.min),
            ParamDescriptor::gain_db("max", f64::MIN, f64::MAX, self.max),
        ]
    }

    fn get_parameter(&self, name: &str) -> Result<ParamValue, OperationError> {
        match name {
            "min" => Ok(ParamValue::scalar(self.min)),
            "max" => Ok(ParamValue::scalar(self.max)),
            _ => Err(OperationError::UnknownParameter(name.to_string())),
        }
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), OperationError> {
        let slot = match name {
            "min" => &mut self.min,
            "max" => &mut self.max,
            _ => return Err(OperationError::UnknownParameter(name.to_string())),
        };
        match value.as_scalar() {
            Some(v) if v.is_finite() => {
                *slot = v;
                Ok(())
            }
            _ => Err(OperationError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected a finite scalar, got {value}"),
            }),
        }
    }
}
