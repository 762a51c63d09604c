//! The [`Operation`] trait implemented by every processing stage.
//!
//! An operation has two phases. At compile time `prepare` receives the
//! descriptors of its inputs and returns the descriptors of its outputs; this
//! is where a stage allocates scratch memory and checks that it can handle
//! the data it will see. At run time `process` is called once per frame with
//! the input values, in input-slot order.
//!
//! Composite operations ([`Pipeline`](crate::Pipeline)) and sinks
//! ([`Tap`](crate::ops::Tap)) have extra roles inside pipelines; see
//! [`is_composite`](Operation::is_composite) and [`is_sink`](Operation::is_sink).

use crate::array::Value;
use crate::descriptor::Descriptor;
use crate::error::OperationError;
use crate::params::{ParamDescriptor, ParamValue};

/// A processing stage.
pub trait Operation: Send {
    /// Short type name, used to generate step names like `"Clip:0"`.
    ///
    /// Defaults to the last path segment of the Rust type name, without
    /// generic arguments.
    fn type_name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Computes output descriptors from input descriptors.
    fn prepare(&mut self, inputs: &[Descriptor]) -> Result<Vec<Descriptor>, OperationError>;

    /// Processes one frame.
    ///
    /// Returning `Ok(None)` means "no outputs this frame"; downstream routes
    /// of this operation are not written.
    fn process(&mut self, inputs: &[Value]) -> Result<Option<Vec<Value>>, OperationError>;

    /// Parameters this operation exposes.
    fn parameters(&self) -> Vec<ParamDescriptor> {
        Vec::new()
    }

    /// Reads a parameter by local name.
    fn get_parameter(&self, name: &str) -> Result<ParamValue, OperationError> {
        Err(OperationError::UnknownParameter(name.to_string()))
    }

    /// Writes a parameter by local name.
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), OperationError> {
        let _ = value;
        Err(OperationError::UnknownParameter(name.to_string()))
    }

    /// Releases resources. Called once when the engine closes.
    fn close(&mut self) {}

    /// Whether this operation contains other operations.
    fn is_composite(&self) -> bool {
        false
    }

    /// Whether this operation marks an additional pipeline output.
    fn is_sink(&self) -> bool {
        false
    }

    /// Number of outputs this operation contributes when used as a pipeline
    /// endpoint.
    fn output_count(&self) -> usize {
        1
    }
}

impl<T: Operation + ?Sized> Operation for Box<T> {
    fn type_name(&self) -> &str {
        (**self).type_name()
    }

    fn prepare(&mut self, inputs: &[Descriptor]) -> Result<Vec<Descriptor>, OperationError> {
        (**self).prepare(inputs)
    }

    fn process(&mut self, inputs: &[Value]) -> Result<Option<Vec<Value>>, OperationError> {
        (**self).process(inputs)
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        (**self).parameters()
    }

    fn get_parameter(&self, name: &str) -> Result<ParamValue, OperationError> {
        (**self).get_parameter(name)
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), OperationError> {
        (**self).set_parameter(name, value)
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn is_composite(&self) -> bool {
        (**self).is_composite()
    }

    fn is_sink(&self) -> bool {
        (**self).is_sink()
    }

    fn output_count(&self) -> usize {
        (**self).output_count()
    }
}

/// `"rfstream_core::ops::Clip"` → `"Clip"`, `"a::Lambda<b::C>"` → `"Lambda"`.
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl Operation for Passthrough {
        fn prepare(&mut self, inputs: &[Descriptor]) -> Result<Vec<Descriptor>, OperationError> {
            Ok(inputs.to_vec())
        }

        fn process(&mut self, inputs: &[Value]) -> Result<Option<Vec<Value>>, OperationError> {
            Ok(Some(inputs.to_vec()))
        }
    }

    #[test]
    fn short_type_name_strips_path_and_generics() {
        assert_eq!(short_type_name("rfstream_core::ops::Clip"), "Clip");
        assert_eq!(short_type_name("a::b::Lambda<c::D<e::F>>"), "Lambda");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn default_type_name_is_concrete_type() {
        let op = Passthrough;
        assert_eq!(op.type_name(), "Passthrough");
        let boxed: Box<dyn Operation> = Box::new(Passthrough);
        assert_eq!(boxed.type_name(), "Passthrough");
    }

    #[test]
    fn default_parameter_access_is_unknown() {
        let mut op = Passthrough;
        assert!(op.parameters().is_empty());
        assert_eq!(
            op.get_parameter("gain"),
            Err(OperationError::UnknownParameter("gain".to_string()))
        );
        assert!(op.set_parameter("gain", ParamValue::scalar(1.0)).is_err());
        assert!(!op.is_sink());
        assert!(!op.is_composite());
    }
}
