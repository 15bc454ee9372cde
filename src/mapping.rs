//! Keeps the editor's graph (string IDs, mutated in any order) in sync with
//! an arity- and type-checked IR graph.
//!
//! Every public mutator validates before touching state and emits exactly one
//! [`MappingEvent`] on success. Filter arity resolution is the only await
//! point; it completes before any map is changed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::catalog::FilterCatalog;
use crate::codec::ClassRegistry;
use crate::convert;
use crate::error::{GraphError, GraphResult};
use crate::formula::{resolve_typings, FormulaEvaluator, JsFormulaEvaluator};
use crate::model::serialize::{deserialize_graph, serialize_graph, IrClass};
use crate::model::{check_slot, IrGraph, Node, NodeKind, Parameters, Stream, StreamKind, StreamType};
use crate::schema::ExternalGraph;

pub const GLOBAL_NODE_ID: &str = "global";

/// Request to create a node, as sent by the editor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeSpec {
    Filter {
        name: Option<String>,
        #[serde(default)]
        parameters: Parameters,
    },
    Input {
        filename: Option<String>,
        #[serde(default)]
        parameters: Parameters,
    },
    Output {
        filename: Option<String>,
        /// Upstream node IDs wired into slots 0..n on creation.
        #[serde(default)]
        inputs: Vec<String>,
        #[serde(default)]
        parameters: Parameters,
    },
    Global {
        #[serde(default)]
        inputs: Vec<String>,
        #[serde(default)]
        parameters: Parameters,
    },
}

impl NodeSpec {
    pub fn filter(name: impl Into<String>) -> Self {
        NodeSpec::Filter {
            name: Some(name.into()),
            parameters: Parameters::new(),
        }
    }

    pub fn input(filename: impl Into<String>) -> Self {
        NodeSpec::Input {
            filename: Some(filename.into()),
            parameters: Parameters::new(),
        }
    }

    pub fn output(filename: impl Into<String>) -> Self {
        NodeSpec::Output {
            filename: Some(filename.into()),
            inputs: Vec::new(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameters(mut self, params: Parameters) -> Self {
        match &mut self {
            NodeSpec::Filter { parameters, .. }
            | NodeSpec::Input { parameters, .. }
            | NodeSpec::Output { parameters, .. }
            | NodeSpec::Global { parameters, .. } => *parameters = params,
        }
        self
    }

    pub fn with_inputs(mut self, ids: Vec<String>) -> Self {
        if let NodeSpec::Output { inputs, .. } | NodeSpec::Global { inputs, .. } = &mut self {
            *inputs = ids;
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeUpdate {
    #[serde(default)]
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub filename: Option<String>,
}

/// Consumer end of an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeTarget {
    pub node: String,
    pub slot: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingEvent {
    Changed { revision: u64 },
    Reset { revision: u64 },
}

/// Item accepted by [`Mapping::recursive_add`].
#[derive(Debug, Clone, Copy)]
pub enum IrItem<'a> {
    Node(&'a str),
    Stream(&'a Stream),
}

/// Contents restored when a multi-step import fails.
struct Snapshot {
    graph: IrGraph,
    edges: HashMap<String, Stream>,
    targets: HashMap<String, EdgeTarget>,
    imported: HashMap<String, String>,
    counter: u64,
}

pub struct Mapping {
    graph: IrGraph,
    edges: HashMap<String, Stream>,
    targets: HashMap<String, EdgeTarget>,
    /// Source-graph key -> mapping ID of nodes brought in by `recursive_add`.
    imported: HashMap<String, String>,
    counter: u64,
    revision: u64,
    catalog: Arc<FilterCatalog>,
    evaluator: Arc<dyn FormulaEvaluator>,
    events: broadcast::Sender<MappingEvent>,
}

impl Mapping {
    pub fn new(catalog: Arc<FilterCatalog>, evaluator: Arc<dyn FormulaEvaluator>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            graph: IrGraph::new(GLOBAL_NODE_ID),
            edges: HashMap::new(),
            targets: HashMap::new(),
            imported: HashMap::new(),
            counter: 0,
            revision: 0,
            catalog,
            evaluator,
            events,
        }
    }

    /// Mapping over the built-in catalog with the JavaScript formula evaluator.
    pub fn with_builtin_catalog() -> Self {
        Self::new(
            Arc::new(FilterCatalog::builtin()),
            Arc::new(JsFormulaEvaluator::new()),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MappingEvent> {
        self.events.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn catalog(&self) -> &FilterCatalog {
        &self.catalog
    }

    pub fn graph(&self) -> &IrGraph {
        &self.graph
    }

    pub fn global_id(&self) -> &str {
        self.graph.root_id()
    }

    pub fn global(&self) -> &Node {
        self.graph.root()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.graph.node(id)
    }

    pub fn edge(&self, id: &str) -> Option<&Stream> {
        self.edges.get(id)
    }

    pub fn edge_target(&self, id: &str) -> Option<&EdgeTarget> {
        self.targets.get(id)
    }

    /// Node IDs in creation order, global node first.
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graph.nodes().map(|(id, _)| id.clone()).collect();
        ids.sort_by_key(|id| (id != GLOBAL_NODE_ID, id.parse::<u64>().unwrap_or(u64::MAX), id.clone()));
        ids
    }

    /// Edge IDs in creation order.
    pub fn edge_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.edges.keys().cloned().collect();
        ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), id.clone()));
        ids
    }

    /// Edge ID whose stream feeds `slot` of `node`, if wired.
    pub fn edge_into(&self, node: &str, slot: usize) -> Option<&str> {
        self.graph
            .node(node)?
            .inputs
            .get(slot)?
            .as_ref()?
            .id
            .as_deref()
    }

    pub async fn add_node(&mut self, spec: NodeSpec) -> GraphResult<String> {
        let id = self.insert_node(spec).await?;
        self.notify(false);
        Ok(id)
    }

    pub fn remove_node(&mut self, id: &str) -> GraphResult<()> {
        if !self.graph.contains(id) {
            return Err(GraphError::NodeNotFound(id.to_string()));
        }
        if id == self.global_id() {
            return Err(GraphError::invalid_spec(
                "the global node cannot be removed; reset the mapping instead",
            ));
        }

        let mut doomed: Vec<String> = self
            .edges
            .iter()
            .filter(|(_, stream)| stream.source == id)
            .map(|(edge, _)| edge.clone())
            .chain(
                self.targets
                    .iter()
                    .filter(|(_, target)| target.node == id)
                    .map(|(edge, _)| edge.clone()),
            )
            .collect();
        doomed.sort();
        doomed.dedup();
        for edge in &doomed {
            self.disconnect(edge)?;
        }

        self.graph.remove(id);
        self.imported.retain(|_, mapped| mapped != id);
        tracing::debug!("removed node {} and {} edge(s)", id, doomed.len());
        self.notify(false);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.clear();
        self.notify(true);
    }

    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        source_index: usize,
        target_index: usize,
    ) -> GraphResult<String> {
        let edge = self.connect(source, target, source_index, target_index)?;
        self.notify(false);
        Ok(edge)
    }

    pub fn remove_edge(&mut self, id: &str) -> GraphResult<()> {
        self.disconnect(id)?;
        self.notify(false);
        Ok(())
    }

    pub async fn update_node(&mut self, id: &str, update: NodeUpdate) -> GraphResult<()> {
        let node = self
            .graph
            .node(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;

        match &node.kind {
            NodeKind::Filter(filter) => {
                if update.filename.is_some() {
                    return Err(GraphError::NotAFileNode {
                        node: id.to_string(),
                        kind: "filter",
                    });
                }
                let parameters = update.parameters.unwrap_or_else(|| node.parameters.clone());
                let catalog = Arc::clone(&self.catalog);
                let definition = catalog.require(&filter.name)?;
                let merged = definition.merged_parameters(&parameters);
                let evaluator = Arc::clone(&self.evaluator);
                let typings = resolve_typings(definition, &merged, evaluator.as_ref()).await;
                self.apply_typings(id, parameters, typings.input, typings.output)?;
            }
            NodeKind::Input { .. } | NodeKind::Output { .. } => {
                let node = self
                    .graph
                    .node_mut(id)
                    .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
                if let Some(filename) = update.filename {
                    if let NodeKind::Input { filename: f } | NodeKind::Output { filename: f } =
                        &mut node.kind
                    {
                        *f = filename;
                    }
                }
                if let Some(parameters) = update.parameters {
                    node.parameters = parameters;
                }
            }
            NodeKind::Global => {
                if update.filename.is_some() {
                    return Err(GraphError::NotAFileNode {
                        node: id.to_string(),
                        kind: "global",
                    });
                }
                if let Some(parameters) = update.parameters {
                    self.graph.root_mut().parameters = parameters;
                }
            }
        }

        self.notify(false);
        Ok(())
    }

    /// Inserts `item` and everything upstream of it from `source`, returning
    /// the mapping ID of the item's node. A global node is merged into this
    /// mapping's global node: parameters are overlaid and its slots appended.
    ///
    /// Nodes already brought in from the same source key are reused. On
    /// failure the mapping is left as it was.
    pub async fn recursive_add(&mut self, source: &IrGraph, item: IrItem<'_>) -> GraphResult<String> {
        let snapshot = self.snapshot();
        match self.insert_recursive(source, item).await {
            Ok(id) => {
                self.notify(false);
                Ok(id)
            }
            Err(e) => {
                self.restore(snapshot);
                Err(e)
            }
        }
    }

    /// Serializes the global node and everything upstream of it.
    pub fn export_json(&self) -> Value {
        serialize_graph(&self.graph)
    }

    /// Replaces the mapping's contents with a serialized document.
    pub async fn import_json(
        &mut self,
        document: &Value,
        registry: &ClassRegistry<IrClass>,
    ) -> GraphResult<()> {
        let ir = deserialize_graph(document, registry)?;
        self.replace_with(Some(ir)).await
    }

    pub fn to_external(&self) -> ExternalGraph {
        convert::to_external(&self.graph)
    }

    /// Replaces the mapping's contents with an editor graph.
    pub async fn import_external(&mut self, external: &ExternalGraph) -> GraphResult<()> {
        let ir = convert::from_external(external)?;
        self.replace_with(ir).await
    }

    /// Clears the mapping and rebuilds it from `ir`, restoring the previous
    /// contents if any step fails.
    async fn replace_with(&mut self, ir: Option<IrGraph>) -> GraphResult<()> {
        let snapshot = self.snapshot();
        self.clear();
        if let Some(ir) = ir {
            let root = ir.root_id().to_string();
            if let Err(e) = self.insert_recursive(&ir, IrItem::Node(&root)).await {
                self.restore(snapshot);
                return Err(e);
            }
        }
        self.notify(true);
        Ok(())
    }

    fn notify(&mut self, reset: bool) {
        self.revision += 1;
        let event = if reset {
            MappingEvent::Reset {
                revision: self.revision,
            }
        } else {
            MappingEvent::Changed {
                revision: self.revision,
            }
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn clear(&mut self) {
        self.graph = IrGraph::new(GLOBAL_NODE_ID);
        self.edges.clear();
        self.targets.clear();
        self.imported.clear();
        self.counter = 0;
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            graph: self.graph.clone(),
            edges: self.edges.clone(),
            targets: self.targets.clone(),
            imported: self.imported.clone(),
            counter: self.counter,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        tracing::warn!("import failed, restoring {} node(s)", snapshot.graph.len());
        self.graph = snapshot.graph;
        self.edges = snapshot.edges;
        self.targets = snapshot.targets;
        self.imported = snapshot.imported;
        self.counter = snapshot.counter;
    }

    fn next_id(&mut self) -> String {
        self.counter += 1;
        self.counter.to_string()
    }

    fn register(&mut self, node: Node) -> String {
        let id = self.next_id();
        tracing::debug!("added {} node {}", node.kind_name(), id);
        self.graph.insert(id.clone(), node);
        id
    }

    async fn insert_node(&mut self, spec: NodeSpec) -> GraphResult<String> {
        match spec {
            NodeSpec::Filter { name, parameters } => {
                let name = name
                    .ok_or_else(|| GraphError::invalid_spec("filter node requires a name"))?;
                let catalog = Arc::clone(&self.catalog);
                let definition = catalog.require(&name)?;
                let merged = definition.merged_parameters(&parameters);
                let evaluator = Arc::clone(&self.evaluator);
                let typings = resolve_typings(definition, &merged, evaluator.as_ref()).await;
                Ok(self.register(Node::filter(name, typings.input, typings.output, parameters)))
            }
            NodeSpec::Input {
                filename,
                parameters,
            } => {
                let filename = filename
                    .ok_or_else(|| GraphError::invalid_spec("input node requires a filename"))?;
                Ok(self.register(Node::input(filename).with_parameters(parameters)))
            }
            NodeSpec::Output {
                filename,
                inputs,
                parameters,
            } => {
                let filename = filename
                    .ok_or_else(|| GraphError::invalid_spec("output node requires a filename"))?;
                self.check_sources(&inputs, false)?;
                let id = self.register(Node::output(filename).with_parameters(parameters));
                for (slot, source) in inputs.iter().enumerate() {
                    self.connect(source, &id, 0, slot)?;
                }
                Ok(id)
            }
            NodeSpec::Global { inputs, parameters } => {
                self.check_sources(&inputs, true)?;
                let global = self.global_id().to_string();
                let offset = self.graph.root().inputs.len();
                self.graph.root_mut().parameters.extend(parameters);
                for (i, source) in inputs.iter().enumerate() {
                    self.connect(source, &global, 0, offset + i)?;
                }
                Ok(global)
            }
        }
    }

    /// Checks that every upstream ID exists and can produce output 0.
    fn check_sources(&self, sources: &[String], outputs_only: bool) -> GraphResult<()> {
        for source in sources {
            let node = self
                .graph
                .node(source)
                .ok_or_else(|| GraphError::NodeNotFound(source.clone()))?;
            let stream = Stream::from_producer(node, source, 0)?;
            if outputs_only && stream.kind != StreamKind::Output {
                return Err(GraphError::GlobalInputMismatch(stream.kind.class_name().to_string()));
            }
        }
        Ok(())
    }

    /// Validates and wires one edge. All checks run before any mutation.
    fn connect(
        &mut self,
        source: &str,
        target: &str,
        source_index: usize,
        target_index: usize,
    ) -> GraphResult<String> {
        let (Some(producer), Some(consumer)) = (self.graph.node(source), self.graph.node(target))
        else {
            return Err(GraphError::EndpointNotFound {
                from: source.to_string(),
                to: target.to_string(),
            });
        };

        let mut stream = Stream::from_producer(producer, source, source_index)?;

        match &consumer.kind {
            NodeKind::Filter(filter) => {
                let expected = *filter.input_typings.get(target_index).ok_or_else(|| {
                    GraphError::TargetIndexOutOfRange {
                        node: target.to_string(),
                        index: target_index,
                    }
                })?;
                let actual = stream.stream_type();
                if expected != actual && actual != StreamType::Av {
                    return Err(GraphError::TypeMismatch { expected, actual });
                }
            }
            NodeKind::Input { .. } => {
                return Err(GraphError::TargetIndexOutOfRange {
                    node: target.to_string(),
                    index: target_index,
                });
            }
            NodeKind::Output { .. } => {}
            NodeKind::Global => {
                if stream.kind != StreamKind::Output {
                    return Err(GraphError::GlobalInputMismatch(
                        stream.kind.class_name().to_string(),
                    ));
                }
            }
        }
        check_slot(target, target_index)?;

        let replaced = consumer
            .inputs
            .get(target_index)
            .and_then(|slot| slot.as_ref())
            .and_then(|s| s.id.clone());
        if let Some(previous) = replaced {
            tracing::debug!("edge {} replaced on {}:{}", previous, target, target_index);
            self.disconnect(&previous)?;
        }

        let edge = self.next_id();
        stream.id = Some(edge.clone());
        let consumer = self
            .graph
            .node_mut(target)
            .ok_or_else(|| GraphError::NodeNotFound(target.to_string()))?;
        consumer.ensure_slots(target_index + 1);
        consumer.inputs[target_index] = Some(stream.clone());

        self.edges.insert(edge.clone(), stream);
        self.targets.insert(
            edge.clone(),
            EdgeTarget {
                node: target.to_string(),
                slot: target_index,
            },
        );
        tracing::debug!(
            "added edge {}: {}[{}] -> {}[{}]",
            edge,
            source,
            source_index,
            target,
            target_index
        );
        Ok(edge)
    }

    /// Unwires an edge, emptying its consumer slot.
    fn disconnect(&mut self, edge: &str) -> GraphResult<Stream> {
        let stream = self
            .edges
            .remove(edge)
            .ok_or_else(|| GraphError::EdgeNotFound(edge.to_string()))?;
        if let Some(target) = self.targets.remove(edge) {
            if let Some(slot) = self
                .graph
                .node_mut(&target.node)
                .and_then(|node| node.inputs.get_mut(target.slot))
            {
                if slot.as_ref().and_then(|s| s.id.as_deref()) == Some(edge) {
                    *slot = None;
                }
            }
        }
        Ok(stream)
    }

    /// Commits re-resolved typings for a filter: truncated input slots and
    /// outgoing edges past the new output count are unwired.
    fn apply_typings(
        &mut self,
        id: &str,
        parameters: Parameters,
        input_typings: Vec<StreamType>,
        output_typings: Vec<StreamType>,
    ) -> GraphResult<()> {
        let outputs = output_typings.len();
        let node = self
            .graph
            .node_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        let slots = input_typings.len();
        let dropped = node.resize_slots(slots);
        node.parameters = parameters;
        if let NodeKind::Filter(filter) = &mut node.kind {
            filter.input_typings = input_typings;
            filter.output_typings = output_typings;
        }

        for stream in dropped {
            if let Some(edge) = stream.id {
                self.edges.remove(&edge);
                self.targets.remove(&edge);
                tracing::debug!("edge {} dropped: node {} now has {} input(s)", edge, id, slots);
            }
        }

        let stale: Vec<String> = self
            .edges
            .iter()
            .filter(|(_, s)| s.source == id && s.index.is_some_and(|i| i >= outputs))
            .map(|(edge, _)| edge.clone())
            .collect();
        for edge in stale {
            tracing::debug!("edge {} dropped: node {} now has {} output(s)", edge, id, outputs);
            self.disconnect(&edge)?;
        }
        Ok(())
    }

    /// Mapping ID of a node an earlier `recursive_add` created for `key`, if
    /// that node is still present with the same kind, name and parameters.
    fn previously_imported(&self, key: &str, node: &Node) -> Option<String> {
        let id = self.imported.get(key)?;
        let existing = self.graph.node(id)?;
        let same_kind = match (&existing.kind, &node.kind) {
            (NodeKind::Filter(a), NodeKind::Filter(b)) => a.name == b.name,
            (NodeKind::Input { filename: a }, NodeKind::Input { filename: b })
            | (NodeKind::Output { filename: a }, NodeKind::Output { filename: b }) => a == b,
            _ => false,
        };
        (same_kind && existing.parameters == node.parameters).then(|| id.clone())
    }

    fn feeds_global(&self, producer: &str) -> bool {
        self.graph
            .root()
            .connected_inputs()
            .any(|(_, stream)| stream.source == producer)
    }

    async fn insert_recursive(&mut self, source: &IrGraph, item: IrItem<'_>) -> GraphResult<String> {
        let start = match item {
            IrItem::Node(key) => key,
            IrItem::Stream(stream) => stream.source.as_str(),
        };
        if !source.contains(start) {
            return Err(GraphError::NodeNotFound(start.to_string()));
        }

        let order = source.post_order(start);
        let global_offset = self.graph.root().inputs.len();
        let mut ids: HashMap<&str, String> = HashMap::new();
        let mut created: HashSet<&str> = HashSet::new();

        for key in &order {
            let Some(node) = source.node(key) else { continue };
            if let Some(existing) = self.previously_imported(key, node) {
                ids.insert(key.as_str(), existing);
                continue;
            }
            let id = match &node.kind {
                NodeKind::Global => {
                    self.graph
                        .root_mut()
                        .parameters
                        .extend(node.parameters.clone());
                    self.global_id().to_string()
                }
                NodeKind::Filter(filter) => {
                    let spec = NodeSpec::Filter {
                        name: Some(filter.name.clone()),
                        parameters: node.parameters.clone(),
                    };
                    self.insert_node(spec).await?
                }
                NodeKind::Input { filename } => {
                    self.register(Node::input(filename.clone()).with_parameters(node.parameters.clone()))
                }
                NodeKind::Output { filename } => {
                    self.register(Node::output(filename.clone()).with_parameters(node.parameters.clone()))
                }
            };
            if !node.is_global() {
                self.imported.insert(key.clone(), id.clone());
            }
            ids.insert(key.as_str(), id);
            created.insert(key.as_str());
        }

        for key in &order {
            if !created.contains(key.as_str()) {
                continue;
            }
            let (Some(node), Some(target)) = (source.node(key), ids.get(key.as_str())) else {
                continue;
            };
            let offset = if node.is_global() { global_offset } else { 0 };
            for (slot, stream) in node.connected_inputs() {
                let Some(producer) = ids.get(stream.source.as_str()) else {
                    continue;
                };
                if node.is_global() && self.feeds_global(producer) {
                    continue;
                }
                self.connect(producer, target, stream.index.unwrap_or(0), slot + offset)?;
            }
        }

        tracing::info!(
            "imported {} of {} node(s) from {}",
            created.len(),
            order.len(),
            start
        );
        Ok(ids
            .get(start)
            .cloned()
            .unwrap_or_else(|| self.global_id().to_string()))
    }
}
