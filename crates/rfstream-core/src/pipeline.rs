//! Linear chains of operations, usable as a single composite operation.
//!
//! A [`Pipeline`] runs its steps in order, each step taking the previous
//! step's outputs. Steps that are sinks ([`Tap`](crate::ops::Tap)) or
//! composites (nested pipelines) are *endpoints*: they see the current data
//! but do not replace it, and their outputs become extra outputs of the
//! pipeline.
//!
//! Outputs are ordered: the main-chain output first (unless the last step is
//! itself an endpoint), then endpoint outputs in declaration order.
//!
//! ```rust
//! use rfstream_core::ops::{Clip, Tap};
//! use rfstream_core::{Descriptor, DType, Operation, Pipeline};
//!
//! let mut pipeline = Pipeline::builder()
//!     .name("bmode")
//!     .step(Tap::new())
//!     .step(Clip::new(20.0, 80.0))
//!     .build()?;
//! assert_eq!(pipeline.output_count(), 2);
//!
//! let out = pipeline.prepare(&[Descriptor::new([4, 4], DType::F32)]).unwrap();
//! assert_eq!(out[0].name(), Some("bmode/Output:0")); // Clip, the main chain
//! assert_eq!(out[1].name(), Some("bmode/Output:1")); // the Tap
//! # Ok::<(), rfstream_core::GraphError>(())
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::array::Value;
use crate::descriptor::Descriptor;
use crate::error::{GraphError, OperationError};
use crate::operation::Operation;
use crate::params::{ParamDescriptor, ParamValue, ParameterDirectory};

struct Step {
    name: String,
    operation: Box<dyn Operation>,
    endpoint: bool,
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    name: Option<String>,
    steps: Vec<(Option<String>, Box<dyn Operation>)>,
}

impl PipelineBuilder {
    /// Sets the pipeline's name, used to name its output descriptors.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends a step named `"<TypeName>:<ordinal>"`.
    pub fn step(mut self, operation: impl Operation + 'static) -> Self {
        self.steps.push((None, Box::new(operation)));
        self
    }

    /// Appends a step with an explicit name.
    pub fn named_step(mut self, name: impl Into<String>, operation: impl Operation + 'static) -> Self {
        self.steps.push((Some(name.into()), Box::new(operation)));
        self
    }

    /// Names the steps and builds the parameter directory.
    pub fn build(self) -> Result<Pipeline, GraphError> {
        if self.steps.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        let mut per_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        let mut steps = Vec::with_capacity(self.steps.len());
        for (name, operation) in self.steps {
            let name = match name {
                Some(name) => name,
                None => {
                    let type_name = operation.type_name().to_string();
                    let ordinal = per_type.entry(type_name.clone()).or_insert(0);
                    let generated = format!("{type_name}:{ordinal}");
                    *ordinal += 1;
                    generated
                }
            };
            if name.is_empty() || name.contains('/') {
                return Err(GraphError::InvalidAddress(name));
            }
            if !seen.insert(name.clone()) {
                return Err(GraphError::DuplicateOperation(name));
            }
            let endpoint = operation.is_sink() || operation.is_composite();
            steps.push(Step {
                name,
                operation,
                endpoint,
            });
        }

        let last_is_endpoint = steps.last().is_some_and(|s| s.endpoint);
        let output_count = steps
            .iter()
            .filter(|s| s.endpoint)
            .map(|s| s.operation.output_count())
            .sum::<usize>()
            + usize::from(!last_is_endpoint);

        let directory = ParameterDirectory::build(
            steps
                .iter()
                .enumerate()
                .map(|(i, s)| (i, s.name.as_str(), s.operation.parameters())),
        );

        tracing::debug!(
            pipeline = self.name.as_deref().unwrap_or("<unnamed>"),
            steps = steps.len(),
            outputs = output_count,
            "built pipeline"
        );

        Ok(Pipeline {
            name: self.name,
            steps,
            directory,
            last_is_endpoint,
            output_count,
        })
    }
}

/// A chain of operations that behaves as one composite operation.
pub struct Pipeline {
    name: Option<String>,
    steps: Vec<Step>,
    directory: ParameterDirectory,
    last_is_endpoint: bool,
    output_count: usize,
}

impl Pipeline {
    /// Starts a builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Pipeline name, if set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Sets the name used for output descriptors.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    /// The parameter directory over all steps.
    pub fn directory(&self) -> &ParameterDirectory {
        &self.directory
    }

    fn output_name(&self, index: usize) -> String {
        format!("{}/Output:{index}", self.name.as_deref().unwrap_or("Pipeline"))
    }
}

impl Operation for Pipeline {
    fn type_name(&self) -> &str {
        "Pipeline"
    }

    fn prepare(&mut self, inputs: &[Descriptor]) -> Result<Vec<Descriptor>, OperationError> {
        let mut current = inputs.to_vec();
        let mut endpoints = Vec::new();
        for step in &mut self.steps {
            let outputs = step.operation.prepare(&current)?;
            tracing::trace!(step = %step.name, outputs = outputs.len(), "prepared pipeline step");
            if step.endpoint {
                endpoints.extend(outputs);
            } else {
                current = outputs;
            }
        }

        let mut outputs = Vec::with_capacity(self.output_count);
        if !self.last_is_endpoint {
            let main = current.into_iter().next().ok_or_else(|| {
                OperationError::InvalidDescriptor("last pipeline step produced no output".to_string())
            })?;
            outputs.push(main);
        }
        outputs.extend(endpoints);
        if outputs.len() != self.output_count {
            return Err(OperationError::InvalidDescriptor(format!(
                "pipeline declares {} outputs, its steps produced {}",
                self.output_count,
                outputs.len()
            )));
        }
        Ok(outputs
            .into_iter()
            .enumerate()
            .map(|(i, d)| d.with_name(self.output_name(i)))
            .collect())
    }

    fn process(&mut self, inputs: &[Value]) -> Result<Option<Vec<Value>>, OperationError> {
        let mut current = inputs.to_vec();
        let mut outputs = Vec::with_capacity(self.output_count);
        if !self.last_is_endpoint {
            // Reserved for the main-chain output.
            outputs.push(None);
        }
        for step in &mut self.steps {
            let produced = step.operation.process(&current)?.unwrap_or_default();
            if step.endpoint {
                outputs.extend(produced.into_iter().map(Some));
            } else {
                current = produced;
            }
        }
        if !self.last_is_endpoint {
            outputs[0] = current.into_iter().next();
        }
        outputs
            .into_iter()
            .collect::<Option<Vec<Value>>>()
            .map(Some)
            .ok_or_else(|| OperationError::Failed("pipeline main chain produced no output".to_string()))
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        self.directory.descriptors().cloned().collect()
    }

    fn get_parameter(&self, name: &str) -> Result<ParamValue, OperationError> {
        let entry = self
            .directory
            .resolve(name)
            .ok_or_else(|| OperationError::UnknownParameter(name.to_string()))?;
        self.steps[entry.owner()].operation.get_parameter(entry.local())
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), OperationError> {
        let entry = self
            .directory
            .resolve(name)
            .ok_or_else(|| OperationError::UnknownParameter(name.to_string()))?;
        let (owner, local) = (entry.owner(), entry.local().to_string());
        self.steps[owner].operation.set_parameter(&local, value)
    }

    fn close(&mut self) {
        for step in &mut self.steps {
            step.operation.close();
        }
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn output_count(&self) -> usize {
        self.output_count
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.step_names().collect::<Vec<_>>())
            .field("outputs", &self.output_count)
            .finish()
    }
}
