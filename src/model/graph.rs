use std::collections::{HashMap, HashSet};

use crate::error::{GraphError, GraphResult};
use crate::model::node::{check_slot, Node};
use crate::model::stream::Stream;

/// Arena of nodes keyed by string ID, rooted at a single global node.
///
/// Streams refer to their producer by key, so a graph is only meaningful
/// together with the arena it was built in.
#[derive(Debug, Clone)]
pub struct IrGraph {
    nodes: HashMap<String, Node>,
    root: String,
    next_key: usize,
}

impl PartialEq for IrGraph {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.nodes == other.nodes
    }
}

impl IrGraph {
    pub fn new(root_id: impl Into<String>) -> Self {
        let root = root_id.into();
        let mut nodes = HashMap::new();
        nodes.insert(root.clone(), Node::global());
        Self {
            nodes,
            root,
            next_key: 0,
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root
    }

    pub fn root(&self) -> &Node {
        &self.nodes[&self.root]
    }

    pub fn root_mut(&mut self) -> &mut Node {
        self.nodes
            .get_mut(&self.root)
            .expect("root node is never removed")
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter()
    }

    pub fn insert(&mut self, id: impl Into<String>, node: Node) {
        self.nodes.insert(id.into(), node);
    }

    /// Inserts under a generated key that does not collide with existing ones.
    pub fn add(&mut self, node: Node) -> String {
        loop {
            self.next_key += 1;
            let key = format!("n{}", self.next_key);
            if !self.nodes.contains_key(&key) {
                self.nodes.insert(key.clone(), node);
                return key;
            }
        }
    }

    /// Removes a non-root node. The root is pinned.
    pub fn remove(&mut self, id: &str) -> Option<Node> {
        if id == self.root {
            return None;
        }
        self.nodes.remove(id)
    }

    /// Wires `source`'s output `source_index` into `target`'s slot, growing the
    /// target's slot list as needed. Builder for standalone graphs; performs no
    /// type checking.
    pub fn connect(
        &mut self,
        source: &str,
        source_index: usize,
        target: &str,
        slot: usize,
    ) -> GraphResult<()> {
        let producer = self.nodes.get(source).ok_or_else(|| GraphError::EndpointNotFound {
            from: source.to_string(),
            to: target.to_string(),
        })?;
        let stream = Stream::from_producer(producer, source, source_index)?;
        check_slot(target, slot)?;
        let consumer = self
            .nodes
            .get_mut(target)
            .ok_or_else(|| GraphError::EndpointNotFound {
                from: source.to_string(),
                to: target.to_string(),
            })?;
        consumer.ensure_slots(slot + 1);
        consumer.inputs[slot] = Some(stream);
        Ok(())
    }

    /// Keys reachable from `start` through input slots, producers before
    /// consumers. Dangling producer keys are skipped; a back edge is cut.
    pub fn post_order(&self, start: &str) -> Vec<String> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut on_path = HashSet::new();
        // (key, next slot to visit)
        let mut stack: Vec<(String, usize)> = Vec::new();

        if !self.nodes.contains_key(start) {
            return order;
        }
        stack.push((start.to_string(), 0));
        on_path.insert(start.to_string());

        while let Some((key, slot)) = stack.pop() {
            let node = &self.nodes[&key];
            let next = node.inputs[slot.min(node.inputs.len())..]
                .iter()
                .enumerate()
                .find_map(|(offset, s)| s.as_ref().map(|s| (slot + offset, s)));

            match next {
                Some((found, stream)) => {
                    stack.push((key, found + 1));
                    let child = &stream.source;
                    if self.nodes.contains_key(child)
                        && !done.contains(child)
                        && !on_path.contains(child)
                    {
                        on_path.insert(child.clone());
                        stack.push((child.clone(), 0));
                    }
                }
                None => {
                    on_path.remove(&key);
                    done.insert(key.clone());
                    order.push(key);
                }
            }
        }
        order
    }
}
