use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::model::{Parameters, StreamType};

/// Flat node/edge graph as the visual editor holds it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExternalGraph {
    #[serde(default)]
    pub nodes: Vec<ExternalNode>,
    #[serde(default)]
    pub edges: Vec<ExternalEdge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalNodeKind {
    Input,
    Output,
    Filter,
    Global,
}

impl ExternalNodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExternalNodeKind::Input => "input",
            ExternalNodeKind::Output => "output",
            ExternalNodeKind::Filter => "filter",
            ExternalNodeKind::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ExternalNodeKind,
    #[serde(default)]
    pub data: NodeData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub inputs: Vec<Handle>,
    #[serde(default)]
    pub outputs: Vec<Handle>,
}

/// Named connection point on a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Handle {
    pub id: String,
    #[serde(rename = "type")]
    pub stream_type: StreamType,
}

impl Handle {
    pub fn input(index: usize, stream_type: StreamType) -> Self {
        Self {
            id: format!("input-{}", index),
            stream_type,
        }
    }

    pub fn output(index: usize, stream_type: StreamType) -> Self {
        Self {
            id: format!("output-{}", index),
            stream_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    /// Semantic type carried by the edge. Free-form: anything other than
    /// `video` or `audio` is wired as video on import.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
}

impl ExternalGraph {
    pub fn node(&self, id: &str) -> Option<&ExternalNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl ExternalNode {
    pub fn input_handle(&self, id: &str) -> Option<&Handle> {
        self.data.inputs.iter().find(|h| h.id == id)
    }

    pub fn output_handle(&self, id: &str) -> Option<&Handle> {
        self.data.outputs.iter().find(|h| h.id == id)
    }
}

pub struct GraphLoader;

impl Default for GraphLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load(&self, content: &str) -> Result<ExternalGraph> {
        // YAML is a superset of JSON
        let graph: ExternalGraph = serde_yaml::from_str(content)?;
        Ok(graph)
    }

    pub fn to_json(&self, graph: &ExternalGraph) -> Result<String> {
        Ok(serde_json::to_string_pretty(graph)?)
    }
}
