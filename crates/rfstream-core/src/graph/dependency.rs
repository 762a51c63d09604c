//! The mutable dependency graph: named operations plus textual bindings.

use std::collections::{BTreeMap, BTreeSet};

use super::address::{INPUT, OUTPUT, Port, PortKind, parse_address};
use crate::error::GraphError;
use crate::operation::Operation;

/// Names the engine reserves for its own boundary operations.
pub(crate) const INGRESS: &str = "DeviceIngress";
pub(crate) const EGRESS: &str = "DeviceEgress";

const RESERVED: [&str; 4] = [INPUT, OUTPUT, INGRESS, EGRESS];

/// Named operations and the bindings between their ports.
///
/// Bindings are stored as written and only parsed when the graph is resolved
/// or validated, so a graph can be assembled in any order.
#[derive(Default)]
pub struct DependencyGraph {
    operations: Vec<(String, Box<dyn Operation>)>,
    bindings: Vec<(String, Vec<String>)>,
}

impl DependencyGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an operation under `name`.
    pub fn add_operation(
        &mut self,
        name: impl Into<String>,
        operation: impl Operation + 'static,
    ) -> Result<(), GraphError> {
        let name = name.into();
        if RESERVED.contains(&name.as_str()) {
            return Err(GraphError::ReservedName(name));
        }
        if !matches!(parse_address(&name), Ok(address) if address.slot.is_none()) {
            return Err(GraphError::InvalidAddress(name));
        }
        if self.contains(&name) {
            return Err(GraphError::DuplicateOperation(name));
        }
        tracing::debug!("graph_add: operation {name}");
        self.operations.push((name, Box::new(operation)));
        Ok(())
    }

    /// Builder form of [`add_operation`](Self::add_operation).
    pub fn with_operation(
        mut self,
        name: impl Into<String>,
        operation: impl Operation + 'static,
    ) -> Result<Self, GraphError> {
        self.add_operation(name, operation)?;
        Ok(self)
    }

    /// Binds `target` to a single `source`.
    pub fn bind(&mut self, target: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.bind_all(target, [source.into()])
    }

    /// Binds `target` to a list of sources; source `i` feeds input slot `i`.
    pub fn bind_all<S: Into<String>>(
        &mut self,
        target: impl Into<String>,
        sources: impl IntoIterator<Item = S>,
    ) -> &mut Self {
        let target = target.into();
        let sources: Vec<String> = sources.into_iter().map(Into::into).collect();
        tracing::debug!("graph_bind: {target} <- {sources:?}");
        self.bindings.push((target, sources));
        self
    }

    /// Whether an operation named `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.operations.iter().any(|(n, _)| n == name)
    }

    /// Declared operation names, in declaration order.
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(|(n, _)| n.as_str())
    }

    /// The operation declared under `name`.
    pub fn operation(&self, name: &str) -> Option<&dyn Operation> {
        self.operations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, op)| op.as_ref())
    }

    /// Mutable access to the operation declared under `name`.
    pub fn operation_mut(&mut self, name: &str) -> Option<&mut (dyn Operation + 'static)> {
        self.operations
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, op)| op.as_mut())
    }

    /// Number of declared operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True when no operations are declared.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Resolves every binding into a `target port → source port` map.
    ///
    /// A target written without a slot takes slot `i` for the `i`-th entry of
    /// its source list; a source written without a slot means output 0.
    pub fn resolve_dependencies(&self) -> Result<BTreeMap<Port, Port>, GraphError> {
        let mut forward = BTreeMap::new();
        for (target_text, sources) in &self.bindings {
            let target = parse_address(target_text)?;
            if target.kind == Some(PortKind::Output) || target.name == INPUT {
                return Err(GraphError::InvalidAddress(target_text.clone()));
            }
            if let (Some(slot), 2..) = (target.slot, sources.len()) {
                return Err(GraphError::DuplicateSource {
                    target: target.name,
                    slot,
                });
            }
            for (i, source_text) in sources.iter().enumerate() {
                let source = parse_address(source_text)?;
                if source.kind == Some(PortKind::Input) || source.name == OUTPUT {
                    return Err(GraphError::InvalidAddress(source_text.clone()));
                }
                let to = Port::new(target.name.as_str(), target.slot_or(i));
                let from = Port::new(source.name.as_str(), source.slot_or(0));
                if forward.contains_key(&to) {
                    return Err(GraphError::DuplicateSource {
                        target: to.op,
                        slot: to.slot,
                    });
                }
                forward.insert(to, from);
            }
        }
        Ok(forward)
    }

    /// Inverts [`resolve_dependencies`](Self::resolve_dependencies): every
    /// source port with the list of target ports it feeds.
    pub fn reverse_dependencies(&self) -> Result<BTreeMap<Port, Vec<Port>>, GraphError> {
        Ok(invert(&self.resolve_dependencies()?))
    }

    /// Checks the graph against the declared input stream identifiers.
    ///
    /// `sources` are the `source` ids of the input descriptors; a binding may
    /// name one of them instead of `Input:k`.
    ///
    /// Cycles are rejected anywhere in the graph, including among operations
    /// no input stream reaches; the compiler later drops only acyclic
    /// unreached operations.
    pub fn validate(&self, sources: &[&str]) -> Result<Dependencies, GraphError> {
        if self.operations.is_empty() {
            return Err(GraphError::EmptyGraph);
        }
        let forward = self.resolve_dependencies()?;

        for (to, from) in &forward {
            if to.op != OUTPUT && !self.contains(&to.op) {
                return Err(GraphError::UnknownOperation(to.op.clone()));
            }
            let is_stream = from.op == INPUT || sources.contains(&from.op.as_str());
            if !is_stream && !self.contains(&from.op) {
                return Err(GraphError::UnknownOperation(from.op.clone()));
            }
        }

        let mut slots: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for to in forward.keys() {
            slots.entry(to.op.as_str()).or_default().push(to.slot);
        }
        for (op, found) in &slots {
            if found.iter().enumerate().any(|(i, &slot)| i != slot) {
                return Err(GraphError::MissingInput {
                    operation: (*op).to_string(),
                    found: found.clone(),
                });
            }
        }

        self.check_acyclic(&forward)?;

        let arity = slots
            .into_iter()
            .map(|(op, found)| (op.to_string(), found.len()))
            .collect();
        let reverse = invert(&forward);
        Ok(Dependencies {
            forward,
            reverse,
            arity,
        })
    }

    pub(crate) fn into_operations(self) -> Vec<(String, Box<dyn Operation>)> {
        self.operations
    }

    /// Three-colour DFS over every declared operation, so cycles are found
    /// even when nothing on them is reachable from `Input`.
    fn check_acyclic(&self, forward: &BTreeMap<Port, Port>) -> Result<(), GraphError> {
        let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (to, from) in forward {
            if self.contains(&from.op) && self.contains(&to.op) {
                adjacency
                    .entry(from.op.as_str())
                    .or_default()
                    .insert(to.op.as_str());
            }
        }
        let adjacency: BTreeMap<&str, Vec<&str>> = adjacency
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        for start in self.operation_names() {
            if marks.contains_key(start) {
                continue;
            }
            marks.insert(start, Mark::Visiting);
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let children = adjacency.get(node).map_or(&[][..], Vec::as_slice);
                if let Some(&child) = children.get(top.1) {
                    top.1 += 1;
                    match marks.get(child) {
                        Some(Mark::Visiting) => {
                            return Err(GraphError::CycleDetected(child.to_string()));
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(child, Mark::Visiting);
                            stack.push((child, 0));
                        }
                    }
                } else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("operations", &self.operation_names().collect::<Vec<_>>())
            .field("bindings", &self.bindings)
            .finish()
    }
}

fn invert(forward: &BTreeMap<Port, Port>) -> BTreeMap<Port, Vec<Port>> {
    let mut reverse: BTreeMap<Port, Vec<Port>> = BTreeMap::new();
    for (to, from) in forward {
        reverse.entry(from.clone()).or_default().push(to.clone());
    }
    reverse
}

/// A validated graph's resolved bindings.
#[derive(Debug, Clone)]
pub struct Dependencies {
    forward: BTreeMap<Port, Port>,
    reverse: BTreeMap<Port, Vec<Port>>,
    arity: BTreeMap<String, usize>,
}

impl Dependencies {
    /// `target port → source port`.
    pub fn forward(&self) -> &BTreeMap<Port, Port> {
        &self.forward
    }

    /// `source port → target ports`.
    pub fn reverse(&self) -> &BTreeMap<Port, Vec<Port>> {
        &self.reverse
    }

    /// Number of bound input slots of `op` (including `Output`).
    pub fn arity(&self, op: &str) -> usize {
        self.arity.get(op).copied().unwrap_or(0)
    }

    /// Output slots of `op` that feed something, with their targets.
    pub fn outputs_of<'a>(&'a self, op: &'a str) -> impl Iterator<Item = (usize, &'a [Port])> + 'a {
        self.reverse
            .range(Port::new(op, 0)..=Port::new(op, usize::MAX))
            .map(|(from, targets)| (from.slot, targets.as_slice()))
    }
}
