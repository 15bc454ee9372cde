#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use filter_flow::catalog::{FilterCatalog, FilterDefinition, FilterOption};
use filter_flow::formula::FormulaEvaluator;
use filter_flow::model::{Parameters, Scalar, StreamType, Typing};
use filter_flow::{GraphError, GraphResult, Mapping};

/// Evaluator double understanding two formulas:
/// `<type>*<param>` yields `params[param]` typings of `<type>`,
/// `fail` always rejects.
#[derive(Default)]
pub struct CountingEvaluator {
    pub calls: AtomicUsize,
}

impl CountingEvaluator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormulaEvaluator for CountingEvaluator {
    async fn evaluate(&self, formula: &str, parameters: &Parameters) -> GraphResult<Vec<Typing>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some((ty, param)) = formula.split_once('*') else {
            return Err(GraphError::evaluation(format!("rejected: {}", formula)));
        };
        let stream_type: StreamType = ty.parse().map_err(GraphError::evaluation)?;
        let count = parameters
            .get(param)
            .and_then(Scalar::as_f64)
            .ok_or_else(|| GraphError::evaluation(format!("missing {}", param)))?;
        Ok(vec![Typing::from(stream_type); count as usize])
    }
}

pub fn filter(name: &str, inputs: &[StreamType], outputs: &[StreamType]) -> FilterDefinition {
    FilterDefinition {
        name: name.to_string(),
        description: String::new(),
        stream_typings_input: inputs.iter().copied().map(Typing::from).collect(),
        stream_typings_output: outputs.iter().copied().map(Typing::from).collect(),
        formula_typings_input: None,
        formula_typings_output: None,
        options: Vec::new(),
    }
}

pub fn test_catalog() -> FilterCatalog {
    use StreamType::{Audio, Av, Video};

    let mut mix = filter("mix", &[Video, Video], &[Video]);
    mix.formula_typings_input = Some("video*inputs".to_string());
    mix.options.push(FilterOption {
        name: "inputs".to_string(),
        option_type: "int".to_string(),
        default: Some(Scalar::from(2)),
        description: None,
    });

    let mut broken = filter("broken", &[Video], &[Video]);
    broken.formula_typings_input = Some("fail".to_string());

    FilterCatalog::new(vec![
        filter("vid", &[Video], &[Video]),
        filter("aud", &[Audio], &[Audio]),
        filter("src_video", &[], &[Video]),
        filter("src_audio", &[], &[Audio]),
        filter("src_av", &[], &[Av]),
        filter("sink_av", &[Av], &[]),
        filter("sink_video", &[Video], &[]),
        filter("sink_audio", &[Audio], &[]),
        mix,
        broken,
    ])
}

pub fn test_mapping() -> (Mapping, Arc<CountingEvaluator>) {
    let evaluator = Arc::new(CountingEvaluator::default());
    let mapping = Mapping::new(Arc::new(test_catalog()), evaluator.clone());
    (mapping, evaluator)
}

pub fn params(pairs: &[(&str, Scalar)]) -> Parameters {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
