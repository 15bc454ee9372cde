//! Translation between the IR and the editor's flat node/edge graph.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::{GraphError, GraphResult};
use crate::mapping::GLOBAL_NODE_ID;
use crate::model::{check_slot, IrGraph, Node, NodeKind, Stream, StreamKind, StreamType};
use crate::schema::{ExternalEdge, ExternalGraph, ExternalNode, ExternalNodeKind, Handle, NodeData};
use crate::validator::handle_index;

/// Flattens everything upstream of the global node's output streams.
///
/// Input and output nodes are keyed by filename, so two IR nodes sharing a
/// filename collapse into one record. Filters get their name plus a random
/// suffix. Shared upstream nodes are emitted once.
pub fn to_external(graph: &IrGraph) -> ExternalGraph {
    let mut flattener = Flattener {
        graph,
        ids: HashMap::new(),
        emitted: HashSet::new(),
        out: ExternalGraph::default(),
    };
    for (_, stream) in graph.root().connected_inputs() {
        if stream.kind == StreamKind::Output {
            flattener.visit(&stream.source);
        }
    }
    flattener.out
}

struct Flattener<'a> {
    graph: &'a IrGraph,
    /// IR key -> derived external ID.
    ids: HashMap<String, String>,
    emitted: HashSet<String>,
    out: ExternalGraph,
}

impl Flattener<'_> {
    fn visit(&mut self, key: &str) -> Option<String> {
        if let Some(id) = self.ids.get(key) {
            return Some(id.clone());
        }
        let node = self.graph.node(key)?;
        if node.is_global() {
            return None;
        }

        let id = derive_id(node);
        self.ids.insert(key.to_string(), id.clone());
        if !self.emitted.insert(id.clone()) {
            return Some(id);
        }
        self.out.nodes.push(external_node(&id, node));

        for (slot, stream) in node.connected_inputs() {
            let Some(source) = self.visit(&stream.source) else {
                continue;
            };
            let source_handle = format!("output-{}", stream.index.unwrap_or(0));
            let target_handle = format!("input-{}", slot);
            self.out.edges.push(ExternalEdge {
                id: format!("{}:{}->{}:{}", source, source_handle, id, target_handle),
                source,
                target: id.clone(),
                source_handle: Some(source_handle),
                target_handle: Some(target_handle),
                stream_type: Some(stream.stream_type().to_string()),
            });
        }
        Some(id)
    }
}

fn derive_id(node: &Node) -> String {
    match &node.kind {
        NodeKind::Input { filename } | NodeKind::Output { filename } => filename.clone(),
        NodeKind::Filter(filter) => {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("{}-{}", filter.name, &suffix[..8])
        }
        NodeKind::Global => GLOBAL_NODE_ID.to_string(),
    }
}

fn external_node(id: &str, node: &Node) -> ExternalNode {
    let (kind, data) = match &node.kind {
        NodeKind::Filter(filter) => (
            ExternalNodeKind::Filter,
            NodeData {
                name: Some(filter.name.clone()),
                inputs: handles(&filter.input_typings, Handle::input),
                outputs: handles(&filter.output_typings, Handle::output),
                ..NodeData::default()
            },
        ),
        NodeKind::Input { filename } => (
            ExternalNodeKind::Input,
            NodeData {
                filename: Some(filename.clone()),
                outputs: vec![Handle::output(0, StreamType::Av)],
                ..NodeData::default()
            },
        ),
        NodeKind::Output { filename } => (
            ExternalNodeKind::Output,
            NodeData {
                filename: Some(filename.clone()),
                inputs: (0..node.inputs.len())
                    .map(|i| Handle::input(i, StreamType::Av))
                    .collect(),
                ..NodeData::default()
            },
        ),
        NodeKind::Global => (ExternalNodeKind::Global, NodeData::default()),
    };
    ExternalNode {
        id: id.to_string(),
        kind,
        data: NodeData {
            parameters: node.parameters.clone(),
            ..data
        },
    }
}

fn handles(typings: &[StreamType], make: fn(usize, StreamType) -> Handle) -> Vec<Handle> {
    typings.iter().enumerate().map(|(i, t)| make(i, *t)).collect()
}

/// Rebuilds an IR graph from editor records. Returns `None` for an empty
/// graph.
///
/// Filter typings come from the declared handles (video when none are
/// declared); no formula is evaluated here. Edges are typed by their declared
/// semantic type, defaulting to video. Every output node is collected into a
/// fresh global node.
pub fn from_external(external: &ExternalGraph) -> GraphResult<Option<IrGraph>> {
    if external.nodes.is_empty() {
        return Ok(None);
    }

    let mut graph = IrGraph::new(GLOBAL_NODE_ID);
    let mut keys: HashMap<&str, String> = HashMap::new();
    let mut outputs = Vec::new();

    for record in &external.nodes {
        let data = &record.data;
        let node = match record.kind {
            ExternalNodeKind::Filter => {
                let name = data.name.clone().ok_or_else(|| {
                    GraphError::invalid_spec(format!("filter node {} has no name", record.id))
                })?;
                Node::filter(
                    name,
                    declared_or_video(&data.inputs),
                    declared_or_video(&data.outputs),
                    data.parameters.clone(),
                )
            }
            ExternalNodeKind::Input => Node::input(require_filename(record)?)
                .with_parameters(data.parameters.clone()),
            ExternalNodeKind::Output => Node::output(require_filename(record)?)
                .with_parameters(data.parameters.clone()),
            ExternalNodeKind::Global => {
                graph
                    .root_mut()
                    .parameters
                    .extend(data.parameters.clone());
                keys.insert(record.id.as_str(), graph.root_id().to_string());
                continue;
            }
        };
        let is_output = matches!(node.kind, NodeKind::Output { .. });
        let key = graph.add(node);
        if is_output {
            outputs.push(key.clone());
        }
        keys.insert(record.id.as_str(), key);
    }

    for edge in &external.edges {
        let (Some(source), Some(target)) =
            (keys.get(edge.source.as_str()), keys.get(edge.target.as_str()))
        else {
            return Err(GraphError::EndpointNotFound {
                from: edge.source.clone(),
                to: edge.target.clone(),
            });
        };
        let kind = match edge.stream_type.as_deref() {
            Some("audio") => StreamKind::Audio,
            _ => StreamKind::Video,
        };
        let from_input = matches!(
            graph.node(source).map(|n| &n.kind),
            Some(NodeKind::Input { .. })
        );
        let index = if from_input {
            None
        } else {
            Some(edge.source_handle.as_deref().and_then(handle_index).unwrap_or(0))
        };
        let slot = edge.target_handle.as_deref().and_then(handle_index).unwrap_or(0);
        check_slot(&edge.target, slot)?;
        let stream = Stream::new(kind, source.clone(), index);

        let consumer = graph
            .node_mut(target)
            .ok_or_else(|| GraphError::NodeNotFound(target.clone()))?;
        consumer.ensure_slots(slot + 1);
        consumer.inputs[slot] = Some(stream);
    }

    for (slot, key) in outputs.into_iter().enumerate() {
        let root = graph.root_mut();
        root.ensure_slots(slot + 1);
        root.inputs[slot] = Some(Stream::new(StreamKind::Output, key, None));
    }

    tracing::debug!(
        "converted {} external node(s) and {} edge(s)",
        external.nodes.len(),
        external.edges.len()
    );
    Ok(Some(graph))
}

fn declared_or_video(handles: &[Handle]) -> Vec<StreamType> {
    if handles.is_empty() {
        vec![StreamType::Video]
    } else {
        handles.iter().map(|h| h.stream_type).collect()
    }
}

fn require_filename(record: &ExternalNode) -> GraphResult<String> {
    record.data.filename.clone().ok_or_else(|| {
        GraphError::invalid_spec(format!(
            "{} node {} has no filename",
            record.kind.as_str(),
            record.id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Parameters;

    fn chain() -> IrGraph {
        let mut graph = IrGraph::new(GLOBAL_NODE_ID);
        let input = graph.add(Node::input("in.mp4"));
        let scale = graph.add(Node::filter(
            "scale",
            vec![StreamType::Video],
            vec![StreamType::Video],
            Parameters::new(),
        ));
        let output = graph.add(Node::output("out.mp4"));
        graph.connect(&input, 0, &scale, 0).unwrap();
        graph.connect(&scale, 0, &output, 0).unwrap();
        graph.connect(&output, 0, GLOBAL_NODE_ID, 0).unwrap();
        graph
    }

    #[test]
    fn flattens_reachable_nodes() {
        let external = to_external(&chain());
        assert_eq!(external.nodes.len(), 3);
        assert_eq!(external.edges.len(), 2);
        assert!(external.node("in.mp4").is_some());
        assert!(external.node("out.mp4").is_some());
        let filter = external
            .nodes
            .iter()
            .find(|n| n.kind == ExternalNodeKind::Filter)
            .unwrap();
        assert!(filter.id.starts_with("scale-"));
        assert_eq!(filter.data.inputs, vec![Handle::input(0, StreamType::Video)]);
    }

    #[test]
    fn empty_external_graph_has_no_ir() {
        assert!(from_external(&ExternalGraph::default()).unwrap().is_none());
    }

    #[test]
    fn shared_input_is_emitted_once() {
        let mut graph = IrGraph::new(GLOBAL_NODE_ID);
        let input = graph.add(Node::input("in.mp4"));
        let a = graph.add(Node::output("a.mp4"));
        let b = graph.add(Node::output("b.mp4"));
        graph.connect(&input, 0, &a, 0).unwrap();
        graph.connect(&input, 0, &b, 0).unwrap();
        graph.connect(&a, 0, GLOBAL_NODE_ID, 0).unwrap();
        graph.connect(&b, 0, GLOBAL_NODE_ID, 1).unwrap();

        let external = to_external(&graph);
        assert_eq!(external.nodes.len(), 3);
        assert_eq!(external.edges.len(), 2);
    }

    #[test]
    fn edges_default_to_video() {
        let external = ExternalGraph {
            nodes: vec![
                ExternalNode {
                    id: "f".to_string(),
                    kind: ExternalNodeKind::Filter,
                    data: NodeData {
                        name: Some("volume".to_string()),
                        ..NodeData::default()
                    },
                },
                ExternalNode {
                    id: "o".to_string(),
                    kind: ExternalNodeKind::Output,
                    data: NodeData {
                        filename: Some("o.wav".to_string()),
                        ..NodeData::default()
                    },
                },
            ],
            edges: vec![ExternalEdge {
                id: "e".to_string(),
                source: "f".to_string(),
                target: "o".to_string(),
                source_handle: Some("output-0".to_string()),
                target_handle: Some("input-0".to_string()),
                stream_type: Some("av".to_string()),
            }],
        };
        let graph = from_external(&external).unwrap().unwrap();
        let root = graph.root();
        assert_eq!(root.inputs.len(), 1);
        let output_key = &root.inputs[0].as_ref().unwrap().source;
        let output = graph.node(output_key).unwrap();
        assert_eq!(output.inputs[0].as_ref().unwrap().kind, StreamKind::Video);

        let filter_key = &output.inputs[0].as_ref().unwrap().source;
        let filter = graph.node(filter_key).unwrap().as_filter().unwrap();
        assert_eq!(filter.input_typings, vec![StreamType::Video]);
    }

    #[test]
    fn oversized_target_handle_is_rejected() {
        let external = ExternalGraph {
            nodes: vec![
                ExternalNode {
                    id: "in".to_string(),
                    kind: ExternalNodeKind::Input,
                    data: NodeData {
                        filename: Some("in.mp4".to_string()),
                        ..NodeData::default()
                    },
                },
                ExternalNode {
                    id: "out".to_string(),
                    kind: ExternalNodeKind::Output,
                    data: NodeData {
                        filename: Some("out.mp4".to_string()),
                        ..NodeData::default()
                    },
                },
            ],
            edges: vec![ExternalEdge {
                id: "e".to_string(),
                source: "in".to_string(),
                target: "out".to_string(),
                source_handle: Some("output-0".to_string()),
                target_handle: Some("input-99999999999".to_string()),
                stream_type: None,
            }],
        };
        assert!(matches!(
            from_external(&external),
            Err(GraphError::TargetIndexOutOfRange { node, .. }) if node == "out"
        ));
    }
}
