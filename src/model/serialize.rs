use std::collections::HashSet;

use serde_json::Value;

use crate::codec::{self, ClassRegistry, Instance, Tree};
use crate::error::{GraphError, GraphResult};
use crate::model::graph::IrGraph;
use crate::model::node::{FilterNode, Node, NodeKind};
use crate::model::stream::{Stream, StreamKind};
use crate::model::types::{Parameters, Scalar, StreamType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrClass {
    Filter,
    Input,
    Output,
    Global,
    Stream(StreamKind),
}

/// Registry holding every IR class name.
pub fn ir_registry() -> ClassRegistry<IrClass> {
    let mut registry = ClassRegistry::new();
    registry
        .register("FilterNode", IrClass::Filter)
        .register("InputNode", IrClass::Input)
        .register("OutputNode", IrClass::Output)
        .register("GlobalNode", IrClass::Global);
    for kind in [
        StreamKind::Video,
        StreamKind::Audio,
        StreamKind::Av,
        StreamKind::Output,
        StreamKind::Global,
    ] {
        registry.register(kind.class_name(), IrClass::Stream(kind));
    }
    registry
}

/// Serializes the graph starting from its global node.
///
/// A node reached a second time is written as its class and `id` only.
pub fn serialize_graph(graph: &IrGraph) -> Value {
    let mut walk = Walk::default();
    codec::to_json(&encode_node(graph, graph.root_id(), &mut walk))
}

#[derive(Default)]
struct Walk {
    path: Vec<String>,
    written: HashSet<String>,
}

fn encode_node(graph: &IrGraph, id: &str, walk: &mut Walk) -> Tree {
    if walk.path.iter().any(|p| p == id) {
        return Tree::Circular;
    }
    let Some(node) = graph.node(id) else {
        return Tree::Null;
    };
    if !walk.written.insert(id.to_string()) {
        return Tree::Instance(Instance::new(node.class_name()).field("id", Tree::string(id)));
    }

    walk.path.push(id.to_string());
    let mut instance = Instance::new(node.class_name()).field("id", Tree::string(id));
    match &node.kind {
        NodeKind::Filter(filter) => {
            instance = instance
                .field("name", Tree::string(&filter.name))
                .field("input_typings", encode_typings(&filter.input_typings))
                .field("output_typings", encode_typings(&filter.output_typings));
        }
        NodeKind::Input { filename } | NodeKind::Output { filename } => {
            instance = instance.field("filename", Tree::string(filename));
        }
        NodeKind::Global => {}
    }
    let inputs = node
        .inputs
        .iter()
        .map(|slot| match slot {
            Some(stream) => encode_stream(graph, stream, walk),
            None => Tree::Null,
        })
        .collect();
    instance = instance
        .field("inputs", Tree::Array(inputs))
        .field("parameters", encode_parameters(&node.parameters));
    walk.path.pop();

    Tree::Instance(instance)
}

fn encode_stream(graph: &IrGraph, stream: &Stream, walk: &mut Walk) -> Tree {
    Tree::Instance(
        Instance::new(stream.kind.class_name())
            .field("id", Tree::opt_string(stream.id.as_deref()))
            .field("index", Tree::opt_index(stream.index))
            .field("source", encode_node(graph, &stream.source, walk)),
    )
}

fn encode_typings(typings: &[StreamType]) -> Tree {
    Tree::Array(typings.iter().map(|t| Tree::string(t.as_str())).collect())
}

fn encode_parameters(params: &Parameters) -> Tree {
    Tree::Map(
        params
            .iter()
            .map(|(k, v)| (Tree::string(k), Tree::from_plain(&v.to_json())))
            .collect(),
    )
}

/// Rebuilds a graph from a document whose top level is a `GlobalNode`.
///
/// Nodes keep their serialized `id`; an `id` seen twice refers to the same
/// node, which restores shared producers.
pub fn deserialize_graph(value: &Value, registry: &ClassRegistry<IrClass>) -> GraphResult<IrGraph> {
    let tree = codec::from_json(value, registry)?;
    let root = tree
        .as_instance()
        .ok_or_else(|| GraphError::serialization("document root must be an object"))?;
    if registry.get(&root.class)? != IrClass::Global {
        return Err(GraphError::serialization(format!(
            "document root must be a GlobalNode, got {}",
            root.class
        )));
    }

    let root_id = root
        .get("id")
        .and_then(Tree::as_str)
        .unwrap_or("global")
        .to_string();
    let mut decoder = Decoder {
        graph: IrGraph::new(root_id),
        registry,
    };
    let inputs = decoder.decode_inputs(root)?;
    let parameters = decode_parameters(root.get("parameters"))?;
    let global = decoder.graph.root_mut();
    global.inputs = inputs;
    global.parameters = parameters;
    Ok(decoder.graph)
}

struct Decoder<'a> {
    graph: IrGraph,
    registry: &'a ClassRegistry<IrClass>,
}

impl Decoder<'_> {
    fn decode_node(&mut self, tree: &Tree) -> GraphResult<String> {
        let instance = match tree {
            Tree::Instance(instance) => instance,
            Tree::Circular => {
                return Err(GraphError::serialization(
                    "circular reference cannot be restored",
                ));
            }
            _ => return Err(GraphError::serialization("expected a node object")),
        };

        let id = instance.get("id").and_then(Tree::as_str);
        if let Some(id) = id {
            if self.graph.contains(id) {
                return Ok(id.to_string());
            }
        }

        let kind = match self.registry.get(&instance.class)? {
            IrClass::Filter => NodeKind::Filter(FilterNode {
                name: required_str(instance, "name")?.to_string(),
                input_typings: decode_typings(instance.require("input_typings")?)?,
                output_typings: decode_typings(instance.require("output_typings")?)?,
            }),
            IrClass::Input => NodeKind::Input {
                filename: required_str(instance, "filename")?.to_string(),
            },
            IrClass::Output => NodeKind::Output {
                filename: required_str(instance, "filename")?.to_string(),
            },
            IrClass::Global => {
                return Err(GraphError::serialization(
                    "GlobalNode may only appear at the document root",
                ));
            }
            IrClass::Stream(_) => {
                return Err(GraphError::serialization(format!(
                    "expected a node, got {}",
                    instance.class
                )));
            }
        };

        let shell = Node {
            kind,
            inputs: Vec::new(),
            parameters: decode_parameters(instance.get("parameters"))?,
        };
        let key = match id {
            Some(id) => {
                self.graph.insert(id, shell);
                id.to_string()
            }
            None => self.graph.add(shell),
        };

        let inputs = self.decode_inputs(instance)?;
        if let Some(node) = self.graph.node_mut(&key) {
            node.inputs = inputs;
        }
        Ok(key)
    }

    fn decode_inputs(&mut self, instance: &Instance) -> GraphResult<Vec<Option<Stream>>> {
        let Some(slots) = instance.get("inputs") else {
            return Ok(Vec::new());
        };
        let slots = slots.as_array().ok_or_else(|| {
            GraphError::serialization(format!("{}.inputs must be an array", instance.class))
        })?;
        slots
            .iter()
            .map(|slot| {
                if slot.is_null() {
                    Ok(None)
                } else {
                    self.decode_stream(slot).map(Some)
                }
            })
            .collect()
    }

    fn decode_stream(&mut self, tree: &Tree) -> GraphResult<Stream> {
        let instance = tree
            .as_instance()
            .ok_or_else(|| GraphError::serialization("expected a stream object"))?;
        let kind = match self.registry.get(&instance.class)? {
            IrClass::Stream(kind) => kind,
            _ => {
                return Err(GraphError::serialization(format!(
                    "expected a stream, got {}",
                    instance.class
                )));
            }
        };
        let source = self.decode_node(instance.require("source")?)?;
        Ok(Stream {
            kind,
            source,
            index: instance.get("index").and_then(Tree::as_index),
            id: instance
                .get("id")
                .and_then(Tree::as_str)
                .map(str::to_string),
        })
    }
}

fn required_str<'a>(instance: &'a Instance, name: &str) -> GraphResult<&'a str> {
    instance.require(name)?.as_str().ok_or_else(|| {
        GraphError::serialization(format!("{}.{} must be a string", instance.class, name))
    })
}

fn decode_typings(tree: &Tree) -> GraphResult<Vec<StreamType>> {
    let items = tree
        .as_array()
        .ok_or_else(|| GraphError::serialization("typings must be an array"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| GraphError::serialization("typing must be a string"))?
                .parse::<StreamType>()
                .map_err(GraphError::serialization)
        })
        .collect()
}

fn decode_parameters(tree: Option<&Tree>) -> GraphResult<Parameters> {
    let pairs: Vec<(String, &Tree)> = match tree {
        None | Some(Tree::Null) => return Ok(Parameters::new()),
        Some(Tree::Map(entries)) => entries
            .iter()
            .map(|(k, v)| {
                k.as_str()
                    .map(|k| (k.to_string(), v))
                    .ok_or_else(|| GraphError::serialization("parameter keys must be strings"))
            })
            .collect::<GraphResult<_>>()?,
        Some(Tree::Record(fields)) => fields.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Some(_) => return Err(GraphError::serialization("parameters must be a map")),
    };

    pairs
        .into_iter()
        .map(|(k, v)| {
            let scalar = v
                .as_scalar_json()
                .as_ref()
                .and_then(Scalar::from_json)
                .ok_or_else(|| {
                    GraphError::serialization(format!("parameter '{}' must be a scalar", k))
                })?;
            Ok((k, scalar))
        })
        .collect()
}
