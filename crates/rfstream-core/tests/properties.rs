//! Property-based tests for rfstream-core.
//!
//! Checks schedule ordering over random acyclic graphs, cycle rejection,
//! and ring-buffer occupancy rules using proptest for randomized inputs.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use proptest::sample::Index;
use rfstream_core::ops::{Lambda, Tap};
use rfstream_core::{
    ArrayLayout, Boundary, BufferError, BufferPolicy, CompileError, DType, DependencyGraph,
    Descriptor, GraphCompiler, GraphError,
};

fn passthrough() -> Lambda {
    Lambda::new(|inputs| Ok(vec![inputs[0].clone()]))
        .with_prepare(|inputs| Ok(vec![inputs[0].clone()]))
}

/// Graph where operation `i` reads from one or two of `Input`, `op0..op{i-1}`.
/// Operations are declared in reverse so declaration order says nothing about
/// execution order.
fn random_dag(picks: &[(Index, Index, bool)]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for i in (0..picks.len()).rev() {
        graph.add_operation(format!("op{i}"), passthrough()).unwrap();
    }
    let source = |i: usize, pick: &Index| match pick.index(i + 1) {
        0 => "Input".to_string(),
        k => format!("op{}", k - 1),
    };
    for (i, (first, second, two)) in picks.iter().enumerate() {
        let mut sources = vec![source(i, first)];
        if *two {
            sources.push(source(i, second));
        }
        graph.bind_all(format!("op{i}"), sources);
    }
    graph.bind("Output:0", format!("op{}", picks.len() - 1));
    graph
}

fn ring(len: usize, policy: BufferPolicy) -> rfstream_core::RingBuffer {
    rfstream_core::RingBuffer::new(
        "prop",
        len,
        vec![
            ArrayLayout::new([8], DType::U8),
            ArrayLayout::new([2], DType::F64),
        ],
        policy,
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every route of a compiled schedule points strictly forward, and every
    /// declared operation is scheduled exactly once between the adapters.
    #[test]
    fn schedule_respects_dependencies(
        picks in prop::collection::vec((any::<Index>(), any::<Index>(), any::<bool>()), 1..12),
    ) {
        let graph = random_dag(&picks);
        let inputs = [Descriptor::new([4], DType::F32)];
        let compiled = GraphCompiler::new(graph, &inputs)
            .prepare()
            .unwrap()
            .compile(Boundary {
                ingress: Box::new(Tap::new()),
                egress: Box::new(Tap::new()),
            })
            .unwrap();
        let schedule = &compiled.schedule;

        prop_assert_eq!(schedule.len(), picks.len() + 2);
        prop_assert_eq!(schedule.name(0), "DeviceIngress");
        prop_assert_eq!(schedule.name(schedule.len() - 1), "DeviceEgress");
        for op in 0..schedule.len() {
            for slot in 0..2 {
                for route in schedule.routes(op, slot) {
                    prop_assert!(
                        route.op > op,
                        "{} feeds {} which runs earlier",
                        schedule.name(op),
                        schedule.name(route.op)
                    );
                }
            }
        }
        prop_assert_eq!(compiled.operations.len(), schedule.len());
    }

    /// Holding all N elements of a fail-fast ring, one more acquire overruns.
    #[test]
    fn fail_fast_overrun_after_n(len in 1usize..8, extra in any::<Index>()) {
        let ring = ring(len, BufferPolicy::FailFast);
        let held: Vec<_> = (0..len).map(|i| ring.acquire(i).unwrap()).collect();
        prop_assert_eq!(ring.acquired_count(), len);

        let index = extra.index(len);
        let overrun = matches!(ring.acquire(index), Err(BufferError::Overrun { .. }));
        prop_assert!(overrun);
        prop_assert_eq!(held.len(), len);
    }

    /// `try_acquire` never waits, whatever the ring's policy.
    #[test]
    fn try_acquire_overruns_under_blocking(len in 1usize..8, extra in any::<Index>()) {
        let ring = ring(len, BufferPolicy::Blocking);
        let index = extra.index(len);
        let _held = ring.acquire(index).unwrap();
        let overrun = matches!(ring.try_acquire(index), Err(BufferError::Overrun { .. }));
        prop_assert!(overrun);
    }

    /// Acquire then release leaves the element free with its data intact.
    #[test]
    fn release_preserves_data(
        bytes in prop::array::uniform8(any::<u8>()),
        values in prop::array::uniform2(-1.0e6f64..1.0e6),
        index in any::<Index>(),
    ) {
        let ring = ring(3, BufferPolicy::Blocking);
        let index = index.index(3);

        let element = ring.acquire(index).unwrap();
        element.write_slice(0, &bytes).unwrap();
        element.write_slice(1, &values).unwrap();
        element.release().unwrap();
        prop_assert!(ring.is_free(index));

        let element = ring.acquire(index).unwrap();
        prop_assert_eq!(element.read_array(0).unwrap().to_vec::<u8>().unwrap(), bytes.to_vec());
        prop_assert_eq!(element.read_array(1).unwrap().to_vec::<f64>().unwrap(), values.to_vec());
    }

    /// `release_oldest_acquired` frees elements in acquisition order.
    #[test]
    fn oldest_acquired_is_released_first(order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle()) {
        let ring = ring(6, BufferPolicy::FailFast);
        for &i in &order {
            ring.acquire(i).unwrap();
        }
        for (released, &i) in order.iter().enumerate() {
            ring.release_oldest_acquired().unwrap();
            prop_assert!(ring.is_free(i));
            prop_assert_eq!(ring.acquired_count(), order.len() - released - 1);
        }
        let drained = matches!(ring.release_oldest_acquired(), Err(BufferError::NothingAcquired(_)));
        prop_assert!(drained);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Feeding an operation back into one of its own upstream operations
    /// makes the graph cyclic, and compilation stops before a schedule exists.
    #[test]
    fn back_edge_is_a_cycle(
        picks in prop::collection::vec((any::<Index>(), any::<Index>(), any::<bool>()), 1..12),
        from in any::<Index>(),
        to in any::<Index>(),
    ) {
        let mut graph = random_dag(&picks);
        let from = from.index(picks.len());

        // `from` and the operations on its first-input chain back to `Input`.
        let mut upstream = vec![from];
        let mut op = from;
        while let k @ 1.. = picks[op].0.index(op + 1) {
            op = k - 1;
            upstream.push(op);
        }
        let to = upstream[to.index(upstream.len())];
        let next_slot = if picks[to].2 { 2 } else { 1 };
        graph.bind(format!("op{to}/Input:{next_slot}"), format!("op{from}"));

        let inputs = [Descriptor::new([4], DType::F32)];
        let result = GraphCompiler::new(graph, &inputs).prepare();
        let cyclic = matches!(result, Err(CompileError::Graph(GraphError::CycleDetected(_))));
        prop_assert!(cyclic);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// With every element held, a blocking acquire waits for the release of
    /// the element it asked for and then gets exactly that element.
    #[test]
    fn blocking_acquire_resumes_on_release(len in 1usize..6, pick in any::<Index>()) {
        let ring = Arc::new(ring(len, BufferPolicy::Blocking));
        let mut held: Vec<_> = (0..len).map(|i| ring.acquire(i).unwrap()).collect();
        let index = pick.index(len);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let element = ring.acquire(index).unwrap();
                tx.send(element.index()).unwrap();
            })
        };

        prop_assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
        held.swap_remove(index).release().unwrap();
        prop_assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), index);
        waiter.join().unwrap();
        prop_assert!(!ring.is_free(index));
    }
}
