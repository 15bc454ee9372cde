pub mod catalog;
pub mod codec;
pub mod config;
pub mod convert;
pub mod error;
pub mod formula;
pub mod mapping;
pub mod model;
pub mod schema;
pub mod validator;

pub use catalog::{FilterCatalog, FilterDefinition, FilterOption};
pub use error::{GraphError, GraphResult};
pub use formula::{FormulaEvaluator, JsFormulaEvaluator};
pub use mapping::{Mapping, MappingEvent, NodeSpec, NodeUpdate, GLOBAL_NODE_ID};
pub use model::{IrGraph, Node, NodeKind, Parameters, Scalar, Stream, StreamKind, StreamType};
pub use schema::{ExternalEdge, ExternalGraph, ExternalNode};
pub use validator::{Connection, ConnectionValidator};
