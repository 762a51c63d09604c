//! Dependency graphs of named operations.
//!
//! A [`DependencyGraph`] is assembled at mutation time: operations are
//! declared under unique names and wired together with textual bindings of
//! the form `target ← source`. Nothing is checked until the graph is
//! validated, usually by the [`GraphCompiler`](crate::GraphCompiler).
//!
//! # Addresses
//!
//! | address          | meaning                                         |
//! |------------------|-------------------------------------------------|
//! | `Name`           | slot 0 of `Name` (or slot `i` in a list binding) |
//! | `Name/Output:k`  | output `k` of `Name` (sources)                  |
//! | `Name/Input:k`   | input `k` of `Name` (targets)                   |
//! | `Input:k`        | input stream `k` of the graph (sources)         |
//! | `Output:k`       | output `k` of the graph (targets)               |
//!
//! A source may also be the `source` identifier of an input descriptor, which
//! binds to that stream.
//!
//! # Example
//!
//! ```rust
//! use rfstream_core::DependencyGraph;
//! use rfstream_core::ops::{Clip, Tap};
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_operation("clip", Clip::new(20.0, 80.0))?;
//! graph.add_operation("tap", Tap::new())?;
//! graph
//!     .bind("clip", "Input")
//!     .bind("tap", "clip")
//!     .bind("Output:0", "clip")
//!     .bind("Output:1", "tap");
//!
//! let deps = graph.validate(&[])?;
//! assert_eq!(deps.arity("Output"), 2);
//! # Ok::<(), rfstream_core::GraphError>(())
//! ```

mod address;
mod dependency;

pub use address::{Address, INPUT, OUTPUT, Port, PortKind, parse_address};
pub use dependency::{Dependencies, DependencyGraph};
pub(crate) use dependency::{EGRESS, INGRESS};
