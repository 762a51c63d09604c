//! Criterion benchmarks for the graph compiler and the execution engine.
//!
//! Measures scheduling overhead independently of stage cost using a trivial
//! pass-through stage. Two axes:
//!
//! - **Compile** - validation, descriptor propagation and Kahn sort
//! - **Dispatch** - `process()` per frame, including device stream round trips
//!
//! Run with: `cargo bench -p rfstream-core -- engine/`
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rfstream_core::ops::Lambda;
use rfstream_core::processing::Processing;
use rfstream_core::{
    Boundary, BufferPolicy, DType, DependencyGraph, Descriptor, ExecutionEngine, GraphCompiler,
    RingBuffer,
};

const FRAME: [usize; 2] = [64, 128];
const CHAIN_LENGTHS: &[usize] = &[1, 5, 20];

// ---------------------------------------------------------------------------
// Graph constructors
// ---------------------------------------------------------------------------

fn passthrough() -> Lambda {
    Lambda::new(|inputs| Ok(inputs.to_vec()))
}

fn make_linear(n: usize) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for i in 0..n {
        graph.add_operation(format!("stage{i}"), passthrough()).unwrap();
        let source = if i == 0 {
            "Input".to_string()
        } else {
            format!("stage{}", i - 1)
        };
        graph.bind(format!("stage{i}"), source);
    }
    graph.bind("Output:0", format!("stage{}", n - 1));
    graph
}

fn inputs() -> [Descriptor; 1] {
    [Descriptor::new(FRAME, DType::I16)]
}

// ---------------------------------------------------------------------------
// Compile benchmarks
// ---------------------------------------------------------------------------

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/compile");
    let inputs = inputs();

    for &n in CHAIN_LENGTHS {
        group.bench_with_input(BenchmarkId::new("linear", n), &n, |b, &n| {
            b.iter(|| {
                let compiled = GraphCompiler::new(make_linear(n), &inputs)
                    .prepare()
                    .unwrap()
                    .compile(Boundary {
                        ingress: Box::new(passthrough()),
                        egress: Box::new(passthrough()),
                    })
                    .unwrap();
                black_box(compiled.schedule);
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Dispatch benchmarks
// ---------------------------------------------------------------------------

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/dispatch");
    let inputs = inputs();

    for &n in CHAIN_LENGTHS {
        let host = Arc::new(
            RingBuffer::for_descriptors("HostInput", 2, &inputs, BufferPolicy::Blocking).unwrap(),
        );
        let engine =
            ExecutionEngine::new(Processing::new(make_linear(n)), &inputs, Arc::clone(&host))
                .unwrap();
        let outputs = engine.outputs();
        let queue = outputs.queue().unwrap().clone();
        let mut index = 0;

        group.bench_with_input(BenchmarkId::new("linear", n), &n, |b, _| {
            b.iter(|| {
                let element = host.acquire(index).unwrap();
                index = (index + 1) % host.len();
                engine.process(element).unwrap();
                engine.sync();
                black_box(queue.try_recv().ok());
            });
        });

        engine.close();
    }

    group.finish();
}

criterion_group!(benches, bench_compile, bench_dispatch);
criterion_main!(benches);
