//! Typed node/stream graph that backs the editor graph.

pub mod graph;
pub mod node;
pub mod serialize;
pub mod stream;
pub mod types;

pub use graph::IrGraph;
pub use node::{check_slot, FilterNode, Node, NodeKind, MAX_INPUT_SLOTS};
pub use stream::{Stream, StreamKind};
pub use types::{Parameters, Scalar, StreamType, Typing};
