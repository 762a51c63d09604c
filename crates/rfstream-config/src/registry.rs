//! Built-in operation kinds available to configuration files.
//!
//! | kind    | operation                          | parameters   |
//! |---------|------------------------------------|--------------|
//! | `clip`  | [`Clip`], clamps `f32` data (dB)   | `min`, `max` |
//! | `scale` | [`Scale`], multiplies `f32` data   | `factor`     |
//! | `tap`   | [`Tap`], extra pipeline output     | none         |

use rfstream_core::ops::{Clip, Tap};
use rfstream_core::{
    Array, DType, Descriptor, Operation, OperationError, ParamDescriptor, ParamValue, Value,
};

use crate::config::OperationConfig;
use crate::error::ConfigError;

/// Registered kind names.
pub const KINDS: &[&str] = &["clip", "scale", "tap"];

/// Whether `kind` names a built-in operation.
pub fn is_known(kind: &str) -> bool {
    KINDS.contains(&kind)
}

/// Creates the operation described by `config` and applies its parameters.
pub fn create(config: &OperationConfig) -> Result<Box<dyn Operation>, ConfigError> {
    let mut operation: Box<dyn Operation> = match config.kind.as_str() {
        "clip" => Box::new(Clip::new(0.0, 1.0)),
        "scale" => Box::new(Scale::new(1.0)),
        "tap" => Box::new(Tap::new()),
        other => return Err(ConfigError::UnknownOperation(other.to_string())),
    };
    for (param, value) in &config.params {
        operation
            .set_parameter(param, ParamValue::scalar(*value))
            .map_err(|err| ConfigError::InvalidParameter {
                operation: config.name.clone(),
                param: param.clone(),
                reason: err.to_string(),
            })?;
    }
    tracing::debug!(name = %config.name, kind = %config.kind, "created operation");
    Ok(operation)
}

/// Multiplies `f32` data by a constant factor.
#[derive(Debug, Clone)]
pub struct Scale {
    factor: f64,
}

impl Scale {
    /// Scale by `factor`.
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }

    /// Current factor.
    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Operation for Scale {
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
        let array = input.to_array()?;
        let factor = self.factor as f32;
        let scaled: Vec<f32> = array
            .to_vec::<f32>()?
            .into_iter()
            .map(|sample| sample * factor)
            .collect();
        Ok(Some(vec![
            Array::from_slice(array.layout().shape().to_vec(), DType::F32, &scaled)?.into(),
        ]))
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        vec![ParamDescriptor::scalar("factor", f64::MIN, f64::MAX, self.factor)]
    }

    fn get_parameter(&self, name: &str) -> Result<ParamValue, OperationError> {
        match name {
            "factor" => Ok(ParamValue::scalar(self.factor)),
            _ => Err(OperationError::UnknownParameter(name.to_string())),
        }
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), OperationError> {
        if name != "factor" {
            return Err(OperationError::UnknownParameter(name.to_string()));
        }
        match value.as_scalar() {
            Some(factor) if factor.is_finite() => {
                self.factor = factor;
                Ok(())
            }
            _ => Err(OperationError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected a finite scalar, got {value}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_every_kind() {
        for kind in KINDS {
            let op = create(&OperationConfig::new("op", *kind)).unwrap();
            assert!(is_known(kind));
            assert_eq!(op.is_sink(), *kind == "tap");
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = create(&OperationConfig::new("bf", "beamform")).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownOperation(kind) if kind == "beamform"));
    }

    #[test]
    fn params_are_applied() {
        let config = OperationConfig::new("clip", "clip")
            .with_param("min", 20.0)
            .with_param("max", 80.0);
        let op = create(&config).unwrap();
        assert_eq!(op.get_parameter("max").unwrap(), ParamValue::scalar(80.0));
    }

    #[test]
    fn unknown_param_names_the_operation() {
        let config = OperationConfig::new("gain", "scale").with_param("gain", 2.0);
        let err = create(&config).err().unwrap();
        assert!(
            matches!(err, ConfigError::InvalidParameter { ref operation, ref param, .. }
                if operation == "gain" && param == "gain")
        );
    }

    #[test]
    fn scale_multiplies_samples() {
        let mut scale = Scale::new(0.5);
        let input = Value::array(Array::from_slice([3], DType::F32, &[2.0f32, 4.0, -6.0]).unwrap());
        let out = scale.process(&[input]).unwrap().unwrap();
        assert_eq!(out[0].to_vec::<f32>().unwrap(), vec![1.0, 2.0, -3.0]);
        assert_eq!(scale.type_name(), "Scale");
    }
}
