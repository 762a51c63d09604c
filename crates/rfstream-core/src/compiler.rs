//! Compiles a [`DependencyGraph`] into an executable [`CompiledSchedule`].
//!
//! Compilation runs in two phases so the engine can size its output ring
//! between them:
//!
//! 1. [`GraphCompiler::prepare`] validates the graph and propagates input
//!    descriptors breadth-first. Each operation's `prepare` is called exactly
//!    once, as soon as all of its bound inputs have descriptors. The result is
//!    a [`PreparedGraph`] that knows the graph's output descriptors.
//! 2. [`PreparedGraph::compile`] rewrites the boundary (input streams are fed
//!    by a device ingress operation, `Output` becomes a device egress
//!    operation), orders the operations topologically starting from the
//!    ingress, and builds the per-port routing table.
//!
//! Operations never reached from an input stream are dropped with a warning.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::array::Value;
use crate::descriptor::Descriptor;
use crate::error::{CompileError, GraphError};
use crate::graph::{Dependencies, DependencyGraph, EGRESS, INGRESS, INPUT, OUTPUT, Port};
use crate::operation::Operation;

/// Where one output value goes: input `slot` of the operation at `op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Position of the target operation in the schedule.
    pub op: usize,
    /// Input slot of the target operation.
    pub slot: usize,
}

/// Immutable execution plan.
///
/// Position 0 is always the ingress adapter; every other operation appears
/// after all of its producers.
#[derive(Debug, Clone)]
pub struct CompiledSchedule {
    names: Vec<String>,
    routes: Vec<Vec<Vec<Route>>>,
    arity: Vec<usize>,
    outputs: Vec<Descriptor>,
}

impl CompiledSchedule {
    /// Number of scheduled operations, adapters included.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false; a schedule contains at least the two adapters.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Operation names in execution order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Name of the operation at `index`.
    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    /// Position of `name` in the schedule.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Targets of output `slot` of the operation at `op`.
    pub fn routes(&self, op: usize, slot: usize) -> &[Route] {
        self.routes
            .get(op)
            .and_then(|slots| slots.get(slot))
            .map_or(&[], Vec::as_slice)
    }

    /// Number of input slots of the operation at `op`.
    pub fn input_arity(&self, op: usize) -> usize {
        self.arity[op]
    }

    /// Descriptors of the graph outputs, in `Output:k` order.
    pub fn output_descriptors(&self) -> &[Descriptor] {
        &self.outputs
    }

    /// Fresh `inputs[op][slot]` table with every slot empty.
    pub fn allocate_inputs(&self) -> Vec<Vec<Option<Value>>> {
        self.arity.iter().map(|&n| vec![None; n]).collect()
    }

    fn format_step(&self, index: usize) -> String {
        let mut line = format!("{} inputs={}", self.names[index], self.arity[index]);
        for (slot, routes) in self.routes[index].iter().enumerate() {
            let targets: Vec<String> = routes
                .iter()
                .map(|r| format!("{}[{}]", self.names[r.op], r.slot))
                .collect();
            line.push_str(&format!(" out[{slot}] → [{}]", targets.join(", ")));
        }
        line
    }
}

impl fmt::Display for CompiledSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for index in 0..self.names.len() {
            writeln!(f, "step[{index}]: {}", self.format_step(index))?;
        }
        Ok(())
    }
}

/// The two adapter operations that replace the graph boundary.
pub struct Boundary {
    /// Receives host frames and produces the input stream values.
    pub ingress: Box<dyn Operation>,
    /// Consumes the graph outputs.
    pub egress: Box<dyn Operation>,
}

/// A compiled schedule and its operations, in schedule order.
pub struct Compiled {
    /// The execution plan.
    pub schedule: Arc<CompiledSchedule>,
    /// `operations[i]` runs at schedule position `i`.
    pub operations: Vec<Box<dyn Operation>>,
}

/// Entry point of compilation.
pub struct GraphCompiler<'a> {
    graph: DependencyGraph,
    inputs: &'a [Descriptor],
}

impl<'a> GraphCompiler<'a> {
    /// Compiler for `graph` fed by streams described by `inputs`.
    pub fn new(graph: DependencyGraph, inputs: &'a [Descriptor]) -> Self {
        Self { graph, inputs }
    }

    /// Validates the graph and propagates descriptors through it.
    pub fn prepare(self) -> Result<PreparedGraph, CompileError> {
        if self.inputs.is_empty() {
            return Err(CompileError::NoInputs);
        }
        let sources: Vec<&str> = self.inputs.iter().filter_map(Descriptor::source).collect();
        let deps = self.graph.validate(&sources)?;
        let streams: Vec<Option<String>> = self
            .inputs
            .iter()
            .map(|d| d.source().map(str::to_string))
            .collect();

        let mut operations: BTreeMap<String, Box<dyn Operation>> =
            self.graph.into_operations().into_iter().collect();

        let mut propagation = Propagation::new(&deps);
        for (to, from) in deps.forward() {
            if let Some(stream) = stream_index(from, &streams) {
                let descriptor = self.inputs.get(stream).cloned().ok_or_else(|| {
                    GraphError::UnknownOperation(format!("{INPUT}:{stream}"))
                })?;
                propagation.deliver(to, descriptor);
            }
        }

        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        while let Some(name) = propagation.ready.pop_front() {
            if !visited.insert(name.clone()) {
                return Err(GraphError::CycleDetected(name).into());
            }
            let inputs = propagation.inputs_of(&name);
            let operation = operations
                .get_mut(&name)
                .ok_or_else(|| GraphError::UnknownOperation(name.clone()))?;
            let produced =
                operation
                    .prepare(&inputs)
                    .map_err(|source| CompileError::Prepare {
                        operation: name.clone(),
                        source,
                    })?;
            tracing::debug!(
                "compile_prepare: {name} {} inputs → {} outputs",
                inputs.len(),
                produced.len()
            );
            for (slot, targets) in deps.outputs_of(&name) {
                let descriptor = produced.get(slot).ok_or_else(|| CompileError::MissingOutput {
                    operation: name.clone(),
                    produced: produced.len(),
                    slot,
                })?;
                for to in targets {
                    propagation.deliver(to, descriptor.clone());
                }
            }
            order.push(name);
        }

        propagation.check_complete()?;
        let outputs = propagation.inputs_of(OUTPUT);
        if outputs.is_empty() {
            return Err(CompileError::NoOutputs);
        }

        let unreached: Vec<String> = operations
            .keys()
            .filter(|name| !visited.contains(*name))
            .cloned()
            .collect();
        for name in &unreached {
            tracing::warn!("operation '{name}' is not reachable from any input and is dropped");
        }

        Ok(PreparedGraph {
            operations,
            deps,
            streams,
            order,
            unreached,
            outputs,
        })
    }
}

/// Descriptor bookkeeping of the breadth-first prepare pass.
struct Propagation<'d> {
    deps: &'d Dependencies,
    received: BTreeMap<String, BTreeMap<usize, Descriptor>>,
    ready: VecDeque<String>,
}

impl<'d> Propagation<'d> {
    fn new(deps: &'d Dependencies) -> Self {
        Self {
            deps,
            received: BTreeMap::new(),
            ready: VecDeque::new(),
        }
    }

    fn deliver(&mut self, to: &Port, descriptor: Descriptor) {
        let slots = self.received.entry(to.op.clone()).or_default();
        slots.insert(to.slot, descriptor);
        if to.op != OUTPUT && slots.len() == self.deps.arity(&to.op) {
            self.ready.push_back(to.op.clone());
        }
    }

    fn inputs_of(&self, op: &str) -> Vec<Descriptor> {
        self.received
            .get(op)
            .map(|slots| slots.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every operation (and `Output`) that received anything received everything.
    fn check_complete(&self) -> Result<(), GraphError> {
        for (op, slots) in &self.received {
            if slots.len() < self.deps.arity(op) {
                return Err(GraphError::MissingInput {
                    operation: op.clone(),
                    found: slots.keys().copied().collect(),
                });
            }
        }
        Ok(())
    }
}

fn stream_index(port: &Port, streams: &[Option<String>]) -> Option<usize> {
    if port.op == INPUT {
        return Some(port.slot);
    }
    streams
        .iter()
        .position(|s| s.as_deref() == Some(port.op.as_str()))
}

/// A validated graph whose operations have all been prepared.
pub struct PreparedGraph {
    operations: BTreeMap<String, Box<dyn Operation>>,
    deps: Dependencies,
    streams: Vec<Option<String>>,
    order: Vec<String>,
    unreached: Vec<String>,
    outputs: Vec<Descriptor>,
}

impl PreparedGraph {
    /// Descriptors of the graph outputs, in `Output:k` order.
    pub fn output_descriptors(&self) -> &[Descriptor] {
        &self.outputs
    }

    /// Operations dropped because no input stream reaches them.
    pub fn unreached(&self) -> &[String] {
        &self.unreached
    }

    /// Rewrites the boundary and orders the operations.
    pub fn compile(self, boundary: Boundary) -> Result<Compiled, CompileError> {
        let Self {
            mut operations,
            deps,
            streams,
            unreached,
            outputs,
            ..
        } = self;

        for name in &unreached {
            if let Some(mut operation) = operations.remove(name) {
                operation.close();
            }
        }

        // Boundary rewrite: streams come from the ingress, Output is the egress.
        let mut forward: BTreeMap<Port, Port> = BTreeMap::new();
        for (to, from) in deps.forward() {
            if to.op != OUTPUT && !operations.contains_key(&to.op) {
                continue;
            }
            let to = if to.op == OUTPUT {
                Port::new(EGRESS, to.slot)
            } else {
                to.clone()
            };
            let from = match stream_index(from, &streams) {
                Some(stream) => Port::new(INGRESS, stream),
                None => from.clone(),
            };
            forward.insert(to, from);
        }
        operations.insert(INGRESS.to_string(), boundary.ingress);
        operations.insert(EGRESS.to_string(), boundary.egress);

        let mut arity: BTreeMap<&str, usize> = BTreeMap::new();
        let mut reverse: BTreeMap<&Port, Vec<&Port>> = BTreeMap::new();
        for (to, from) in &forward {
            *arity.entry(to.op.as_str()).or_default() += 1;
            reverse.entry(from).or_default().push(to);
        }

        // Kahn's algorithm from the ingress.
        let mut names: Vec<String> = Vec::with_capacity(operations.len());
        let mut position: BTreeMap<String, usize> = BTreeMap::new();
        let mut satisfied: BTreeMap<&str, usize> = BTreeMap::new();
        let mut ready = VecDeque::from([INGRESS.to_string()]);
        while let Some(name) = ready.pop_front() {
            if position.contains_key(&name) {
                return Err(GraphError::CycleDetected(name).into());
            }
            position.insert(name.clone(), names.len());
            let ports = Port::new(name.as_str(), 0)..=Port::new(name.as_str(), usize::MAX);
            for targets in reverse.range::<Port, _>(ports).map(|(_, targets)| targets) {
                for to in targets {
                    let count = satisfied.entry(to.op.as_str()).or_default();
                    *count += 1;
                    if *count == arity[to.op.as_str()] {
                        ready.push_back(to.op.clone());
                    }
                }
            }
            names.push(name);
        }
        if let Some(stuck) = operations.keys().find(|n| !position.contains_key(*n)) {
            return Err(GraphError::CycleDetected(stuck.clone()).into());
        }
        tracing::debug!("graph_sort: {} operations in topo order", names.len());

        // Routing table, indexed by schedule position.
        let mut routes: Vec<Vec<Vec<Route>>> = vec![Vec::new(); names.len()];
        for (to, from) in &forward {
            let slots = &mut routes[position[&from.op]];
            if slots.len() <= from.slot {
                slots.resize(from.slot + 1, Vec::new());
            }
            slots[from.slot].push(Route {
                op: position[&to.op],
                slot: to.slot,
            });
        }

        let mut input_arity: Vec<usize> = names
            .iter()
            .map(|n| arity.get(n.as_str()).copied().unwrap_or(0))
            .collect();
        // The engine writes the host element into the ingress slot.
        input_arity[0] = 1;

        let ordered: Vec<Box<dyn Operation>> = names
            .iter()
            .filter_map(|n| operations.remove(n))
            .collect();

        let schedule = Arc::new(CompiledSchedule {
            names,
            routes,
            arity: input_arity,
            outputs,
        });
        for index in 0..schedule.len() {
            tracing::debug!("  step[{index}]: {}", schedule.format_step(index));
        }

        Ok(Compiled {
            schedule,
            operations: ordered,
        })
    }
}

impl fmt::Debug for PreparedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedGraph")
            .field("order", &self.order)
            .field("unreached", &self.unreached)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DType;
    use crate::error::OperationError;
    use crate::ops::{Clip, Lambda, Tap};
    use std::sync::Mutex;

    fn boundary() -> Boundary {
        Boundary {
            ingress: Box::new(Tap::new()),
            egress: Box::new(Tap::new()),
        }
    }

    fn input() -> Vec<Descriptor> {
        vec![Descriptor::new([4], DType::F32)]
    }

    /// Records which operations were prepared, in order.
    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Lambda {
        let log = Arc::clone(log);
        Lambda::new(|inputs| Ok(inputs.to_vec())).with_prepare(move |inputs| {
            log.lock().unwrap().push(name);
            Ok(inputs.to_vec())
        })
    }

    #[test]
    fn fan_out_gets_two_routes() {
        let mut g = DependencyGraph::new();
        g.add_operation("A", Tap::new()).unwrap();
        g.add_operation("B", Tap::new()).unwrap();
        g.bind("A", "Input")
            .bind("B", "A")
            .bind("Output:0", "A")
            .bind("Output:1", "B");

        let inputs = input();
        let prepared = GraphCompiler::new(g, &inputs).prepare().unwrap();
        assert_eq!(prepared.output_descriptors().len(), 2);
        let compiled = prepared.compile(boundary()).unwrap();
        let s = &compiled.schedule;

        let a = s.position("A").unwrap();
        let b = s.position("B").unwrap();
        let egress = s.position(EGRESS).unwrap();
        let routes = s.routes(a, 0);
        assert_eq!(routes.len(), 2);
        assert!(routes.contains(&Route { op: egress, slot: 0 }));
        assert!(routes.contains(&Route { op: b, slot: 0 }));
        assert_eq!(s.routes(b, 0), &[Route { op: egress, slot: 1 }]);
    }

    #[test]
    fn schedule_is_topological_with_ingress_first() {
        let mut g = DependencyGraph::new();
        for name in ["D", "C", "B", "A"] {
            g.add_operation(name, Lambda::new(|i| Ok(vec![i[0].clone()]))).unwrap();
        }
        g.bind("A", "Input")
            .bind("B", "A")
            .bind("C", "A")
            .bind_all("D", ["B", "C"])
            .bind("Output:0", "D");

        let inputs = input();
        let compiled = GraphCompiler::new(g, &inputs)
            .prepare()
            .unwrap()
            .compile(boundary())
            .unwrap();
        let s = &compiled.schedule;
        assert_eq!(s.name(0), INGRESS);
        let pos = |n| s.position(n).unwrap();
        assert!(pos("A") < pos("B"));
        assert!(pos("A") < pos("C"));
        assert!(pos("B") < pos("D") && pos("C") < pos("D"));
        assert!(pos("D") < pos(EGRESS));
        assert_eq!(s.input_arity(pos("D")), 2);
        assert_eq!(compiled.operations.len(), s.len());
    }

    #[test]
    fn each_prepare_runs_once_after_all_inputs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut g = DependencyGraph::new();
        g.add_operation("join", recorder("join", &log)).unwrap();
        g.add_operation("left", recorder("left", &log)).unwrap();
        g.add_operation("right", recorder("right", &log)).unwrap();
        g.bind("left", "Input")
            .bind("right", "left")
            .bind_all("join", ["left", "right"])
            .bind("Output:0", "join");

        let inputs = input();
        GraphCompiler::new(g, &inputs).prepare().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["left", "right", "join"]);
    }

    #[test]
    fn unreachable_operations_are_dropped() {
        let mut g = DependencyGraph::new();
        g.add_operation("A", Tap::new()).unwrap();
        g.add_operation("orphan", Tap::new()).unwrap();
        g.bind("A", "Input").bind("Output:0", "A");

        let inputs = input();
        let prepared = GraphCompiler::new(g, &inputs).prepare().unwrap();
        assert_eq!(prepared.unreached(), &["orphan".to_string()]);
        let compiled = prepared.compile(boundary()).unwrap();
        assert!(compiled.schedule.position("orphan").is_none());
        assert_eq!(compiled.schedule.len(), 3);
    }

    #[test]
    fn unreachable_cycle_is_rejected() {
        let mut g = DependencyGraph::new();
        g.add_operation("X", Tap::new()).unwrap();
        g.add_operation("Y", Tap::new()).unwrap();
        g.bind("X", "Y").bind("Y", "X");

        let inputs = input();
        let err = GraphCompiler::new(g, &inputs).prepare().unwrap_err();
        assert!(matches!(err, CompileError::Graph(GraphError::CycleDetected(_))));
    }

    #[test]
    fn prepare_failure_is_wrapped_with_operation_name() {
        let mut g = DependencyGraph::new();
        g.add_operation("clip", Clip::new(0.0, 1.0)).unwrap();
        g.bind("clip", "Input").bind("Output:0", "clip");

        let inputs = vec![Descriptor::new([4], DType::I16)];
        match GraphCompiler::new(g, &inputs).prepare().unwrap_err() {
            CompileError::Prepare { operation, source } => {
                assert_eq!(operation, "clip");
                assert_eq!(source, OperationError::UnsupportedDType(DType::I16));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_output_descriptor() {
        let mut g = DependencyGraph::new();
        g.add_operation("A", Tap::new()).unwrap();
        g.bind("A", "Input").bind("Output:0", "A/Output:1");

        let inputs = input();
        let err = GraphCompiler::new(g, &inputs).prepare().unwrap_err();
        assert!(matches!(
            err,
            CompileError::MissingOutput { slot: 1, produced: 1, .. }
        ));
    }

    #[test]
    fn partially_fed_operation_is_missing_input() {
        let mut g = DependencyGraph::new();
        g.add_operation("A", Tap::new()).unwrap();
        g.add_operation("island", Tap::new()).unwrap();
        g.add_operation("join", Tap::new()).unwrap();
        g.bind("A", "Input")
            .bind_all("join", ["A", "island"])
            .bind("Output:0", "join");

        let inputs = input();
        let err = GraphCompiler::new(g, &inputs).prepare().unwrap_err();
        assert!(matches!(
            err,
            CompileError::Graph(GraphError::MissingInput { ref operation, .. }) if operation == "join"
        ));
    }

    #[test]
    fn no_outputs() {
        let mut g = DependencyGraph::new();
        g.add_operation("A", Tap::new()).unwrap();
        g.bind("A", "Input");
        let inputs = input();
        assert!(matches!(
            GraphCompiler::new(g, &inputs).prepare().unwrap_err(),
            CompileError::NoOutputs
        ));
    }

    #[test]
    fn streams_bind_by_source_id() {
        let mut g = DependencyGraph::new();
        g.add_operation("A", Tap::new()).unwrap();
        g.add_operation("B", Tap::new()).unwrap();
        g.bind("A", "probe-a")
            .bind("B", "probe-b")
            .bind("Output:0", "A")
            .bind("Output:1", "B");

        let inputs = vec![
            Descriptor::new([4], DType::F32).with_source("probe-a"),
            Descriptor::new([8], DType::I16).with_source("probe-b"),
        ];
        let prepared = GraphCompiler::new(g, &inputs).prepare().unwrap();
        assert_eq!(prepared.output_descriptors()[1].shape(), &[8]);
        let compiled = prepared.compile(boundary()).unwrap();
        let s = &compiled.schedule;
        assert_eq!(s.routes(0, 1), &[Route { op: s.position("B").unwrap(), slot: 0 }]);
    }

    #[test]
    fn allocate_inputs_matches_arity() {
        let mut g = DependencyGraph::new();
        g.add_operation("A", Tap::new()).unwrap();
        g.bind("A", "Input").bind_all("Output", ["A", "Input"]);
        let inputs = input();
        let compiled = GraphCompiler::new(g, &inputs)
            .prepare()
            .unwrap()
            .compile(boundary())
            .unwrap();
        let table = compiled.schedule.allocate_inputs();
        assert_eq!(table[0].len(), 1);
        assert_eq!(table.last().map(Vec::len), Some(2));
        assert!(table.iter().flatten().all(Option::is_none));
        assert!(compiled.schedule.to_string().contains("step[0]: DeviceIngress"));
    }
}
