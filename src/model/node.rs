use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};
use crate::model::stream::Stream;
use crate::model::types::{Parameters, StreamType};

/// Most input slots any node may grow to.
pub const MAX_INPUT_SLOTS: usize = 1024;

/// Rejects slot indices that would grow a node past [`MAX_INPUT_SLOTS`].
pub fn check_slot(node: &str, slot: usize) -> GraphResult<()> {
    if slot >= MAX_INPUT_SLOTS {
        return Err(GraphError::TargetIndexOutOfRange {
            node: node.to_string(),
            index: slot,
        });
    }
    Ok(())
}

/// Filter payload: catalog key plus the resolved arity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterNode {
    pub name: String,
    pub input_typings: Vec<StreamType>,
    pub output_typings: Vec<StreamType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Filter(FilterNode),
    Input { filename: String },
    Output { filename: String },
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    /// One entry per input slot; `None` is an unwired slot.
    pub inputs: Vec<Option<Stream>>,
    pub parameters: Parameters,
}

impl Node {
    pub fn filter(
        name: impl Into<String>,
        input_typings: Vec<StreamType>,
        output_typings: Vec<StreamType>,
        parameters: Parameters,
    ) -> Self {
        let inputs = vec![None; input_typings.len()];
        Self {
            kind: NodeKind::Filter(FilterNode {
                name: name.into(),
                input_typings,
                output_typings,
            }),
            inputs,
            parameters,
        }
    }

    pub fn input(filename: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Input {
                filename: filename.into(),
            },
            inputs: Vec::new(),
            parameters: Parameters::new(),
        }
    }

    pub fn output(filename: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Output {
                filename: filename.into(),
            },
            inputs: Vec::new(),
            parameters: Parameters::new(),
        }
    }

    pub fn global() -> Self {
        Self {
            kind: NodeKind::Global,
            inputs: Vec::new(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Lowercase kind tag, as the editor and node specs spell it.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Filter(_) => "filter",
            NodeKind::Input { .. } => "input",
            NodeKind::Output { .. } => "output",
            NodeKind::Global => "global",
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Filter(_) => "FilterNode",
            NodeKind::Input { .. } => "InputNode",
            NodeKind::Output { .. } => "OutputNode",
            NodeKind::Global => "GlobalNode",
        }
    }

    pub fn as_filter(&self) -> Option<&FilterNode> {
        match &self.kind {
            NodeKind::Filter(filter) => Some(filter),
            _ => None,
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Input { filename } | NodeKind::Output { filename } => Some(filename),
            _ => None,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self.kind, NodeKind::Global)
    }

    /// Grows the slot list to at least `len` entries. Never shrinks.
    pub fn ensure_slots(&mut self, len: usize) {
        if self.inputs.len() < len {
            self.inputs.resize(len, None);
        }
    }

    /// Sets the slot count to exactly `len`, returning the streams of any
    /// truncated slots.
    pub fn resize_slots(&mut self, len: usize) -> Vec<Stream> {
        if len >= self.inputs.len() {
            self.inputs.resize(len, None);
            return Vec::new();
        }
        self.inputs.split_off(len).into_iter().flatten().collect()
    }

    pub fn connected_inputs(&self) -> impl Iterator<Item = (usize, &Stream)> {
        self.inputs
            .iter()
            .enumerate()
            .filter_map(|(slot, stream)| stream.as_ref().map(|s| (slot, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::stream::StreamKind;

    #[test]
    fn resize_truncates_and_reports_dropped_streams() {
        let mut node = Node::filter(
            "hstack",
            vec![StreamType::Video; 3],
            vec![StreamType::Video],
            Parameters::new(),
        );
        node.inputs[0] = Some(Stream::new(StreamKind::Video, "a", Some(0)));
        node.inputs[2] = Some(Stream::new(StreamKind::Video, "c", Some(0)));

        let dropped = node.resize_slots(1);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].source, "c");
        assert_eq!(node.inputs.len(), 1);
        assert!(node.inputs[0].is_some());

        assert!(node.resize_slots(3).is_empty());
        assert_eq!(node.inputs, vec![
            Some(Stream::new(StreamKind::Video, "a", Some(0))),
            None,
            None
        ]);
    }

    #[test]
    fn slot_indices_are_bounded() {
        assert!(check_slot("o", 0).is_ok());
        assert!(check_slot("o", MAX_INPUT_SLOTS - 1).is_ok());
        assert!(matches!(
            check_slot("o", usize::MAX),
            Err(GraphError::TargetIndexOutOfRange { index: usize::MAX, .. })
        ));
    }

    #[test]
    fn ensure_slots_never_shrinks() {
        let mut node = Node::output("out.mp4");
        node.ensure_slots(2);
        node.ensure_slots(1);
        assert_eq!(node.inputs.len(), 2);
    }
}
