//! Editor-side check run before a connection is handed to the mapping.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::FilterCatalog;
use crate::formula::FormulaEvaluator;
use crate::model::{Parameters, Scalar, StreamType};
use crate::schema::{ExternalEdge, ExternalNode, ExternalNodeKind};

/// Proposed edge between two editor handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source: String,
    pub target: String,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
}

impl Connection {
    pub fn new(
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: Some(source_handle.into()),
            target_handle: Some(target_handle.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Target,
}

pub struct ConnectionValidator {
    catalog: Arc<FilterCatalog>,
    evaluator: Arc<dyn FormulaEvaluator>,
}

impl ConnectionValidator {
    pub fn new(catalog: Arc<FilterCatalog>, evaluator: Arc<dyn FormulaEvaluator>) -> Self {
        Self { catalog, evaluator }
    }

    /// Decides whether `candidate` may be added given the editor's current
    /// nodes and edges.
    ///
    /// Input nodes fan out freely and output nodes accept anything. A filter
    /// input handle takes a single edge. Otherwise the two handle types must
    /// match or one of them must be `av`.
    pub async fn validate(
        &self,
        candidate: &Connection,
        nodes: &[ExternalNode],
        edges: &[ExternalEdge],
    ) -> bool {
        let (Some(source), Some(target)) = (
            nodes.iter().find(|n| n.id == candidate.source),
            nodes.iter().find(|n| n.id == candidate.target),
        ) else {
            return false;
        };
        let (Some(source_handle), Some(target_handle)) = (
            candidate.source_handle.as_deref(),
            candidate.target_handle.as_deref(),
        ) else {
            return false;
        };

        if source.kind == ExternalNodeKind::Input {
            return true;
        }
        if target.kind == ExternalNodeKind::Output {
            return true;
        }
        if target.kind == ExternalNodeKind::Filter {
            let occupied = edges.iter().any(|e| {
                e.target == target.id && e.target_handle.as_deref() == Some(target_handle)
            });
            if occupied {
                tracing::debug!("handle {}:{} already has an edge", target.id, target_handle);
                return false;
            }
        }

        let source_type = self.handle_type(source, source_handle, Side::Source).await;
        let target_type = self.handle_type(target, target_handle, Side::Target).await;
        source_type == StreamType::Av || target_type == StreamType::Av || source_type == target_type
    }

    async fn handle_type(&self, node: &ExternalNode, handle: &str, side: Side) -> StreamType {
        let declared = match side {
            Side::Source => node.output_handle(handle),
            Side::Target => node.input_handle(handle),
        }
        .map(|h| h.stream_type)
        .unwrap_or(StreamType::Av);

        if node.kind != ExternalNodeKind::Filter {
            return declared;
        }
        let Some(definition) = node.data.name.as_deref().and_then(|n| self.catalog.get(n)) else {
            return declared;
        };
        let formula = match side {
            Side::Source => definition.formula_typings_output.as_deref(),
            Side::Target => definition.formula_typings_input.as_deref(),
        };
        let (Some(formula), Some(index)) = (formula, handle_index(handle)) else {
            return declared;
        };

        let parameters = definition.merged_parameters(&coerce_parameters(&node.data.parameters));
        match self.evaluator.evaluate(formula, &parameters).await {
            Ok(typings) => typings.get(index).map(|t| t.stream_type).unwrap_or(declared),
            Err(e) => {
                tracing::warn!("typing of {}:{} fell back to declared: {}", node.id, handle, e);
                declared
            }
        }
    }
}

/// Numeric suffix of a handle ID, e.g. `input-2` -> 2.
pub fn handle_index(handle: &str) -> Option<usize> {
    let digits = handle.len() - handle.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    handle[handle.len() - digits..].parse().ok()
}

/// Editor fields arrive as strings; turns `"true"`/`"false"` into booleans
/// and numeric strings into numbers.
pub fn coerce_parameters(parameters: &Parameters) -> Parameters {
    parameters
        .iter()
        .map(|(k, v)| (k.clone(), coerce(v)))
        .collect()
}

fn coerce(value: &Scalar) -> Scalar {
    let Scalar::String(s) = value else {
        return value.clone();
    };
    let trimmed = s.trim();
    if let Ok(b) = trimmed.parse::<bool>() {
        return Scalar::Bool(b);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Scalar::from(i);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => Scalar::from(f),
        _ => value.clone(),
    }
}
