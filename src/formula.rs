use async_trait::async_trait;
use boa_engine::{Context, JsString, JsValue, Source};
use serde_json::Value;

use crate::catalog::FilterDefinition;
use crate::error::{GraphError, GraphResult};
use crate::model::{Parameters, StreamType, Typing};

/// Resolves an arity formula against a parameter set.
#[async_trait]
pub trait FormulaEvaluator: Send + Sync {
    async fn evaluate(&self, formula: &str, parameters: &Parameters) -> GraphResult<Vec<Typing>>;
}

/// Evaluates formulas as JavaScript expressions.
///
/// Every parameter is bound as a global of the same name and the whole set is
/// also available as `params`. The expression must yield an array of
/// `{type: "video" | "audio" | "av"}` objects (bare type strings are accepted).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsFormulaEvaluator;

impl JsFormulaEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn run_js(&self, formula: &str, parameters: &Parameters) -> GraphResult<Value> {
        // Fresh context per evaluation so formulas cannot leak state.
        let mut context = Context::default();

        let params_json = crate::model::types::parameters_to_json(parameters);
        let params_js = JsValue::from_json(&params_json, &mut context)
            .map_err(|e| GraphError::evaluation(format!("failed to convert parameters: {}", e)))?;
        context
            .global_object()
            .set(JsString::from("params"), params_js, true, &mut context)
            .map_err(|e| GraphError::evaluation(format!("failed to set 'params': {}", e)))?;

        for (name, value) in parameters {
            let value_js = JsValue::from_json(&value.to_json(), &mut context)
                .map_err(|e| GraphError::evaluation(format!("failed to convert '{}': {}", name, e)))?;
            context
                .global_object()
                .set(JsString::from(name.as_str()), value_js, true, &mut context)
                .map_err(|e| GraphError::evaluation(format!("failed to set '{}': {}", name, e)))?;
        }

        let result = context
            .eval(Source::from_bytes(formula.as_bytes()))
            .map_err(|e| GraphError::evaluation(format!("formula '{}' failed: {}", formula, e)))?;

        let result_json = result
            .to_json(&mut context)
            .map_err(|e| GraphError::evaluation(format!("failed to convert result to JSON: {}", e)))?;

        Ok(result_json.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl FormulaEvaluator for JsFormulaEvaluator {
    async fn evaluate(&self, formula: &str, parameters: &Parameters) -> GraphResult<Vec<Typing>> {
        let value = self.run_js(formula, parameters)?;
        parse_typings(&value)
    }
}

/// Reads an evaluator result into typings.
pub fn parse_typings(value: &Value) -> GraphResult<Vec<Typing>> {
    let items = value.as_array().ok_or_else(|| {
        GraphError::evaluation(format!("formula must return an array, got {}", value))
    })?;
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => s
                .parse::<StreamType>()
                .map(Typing::from)
                .map_err(GraphError::evaluation),
            other => serde_json::from_value::<Typing>(other.clone())
                .map_err(|e| GraphError::evaluation(format!("invalid typing {}: {}", other, e))),
        })
        .collect()
}

/// Input and output typings resolved for one filter instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedTypings {
    pub input: Vec<StreamType>,
    pub output: Vec<StreamType>,
}

/// Resolves both directions of a filter's arity.
///
/// A direction with a formula is evaluated against `parameters` (which should
/// already include catalog defaults); one without uses the catalog's static
/// list. The two directions are independent: a failing formula leaves its own
/// direction empty and does not affect the other.
pub async fn resolve_typings(
    definition: &FilterDefinition,
    parameters: &Parameters,
    evaluator: &dyn FormulaEvaluator,
) -> ResolvedTypings {
    let input = match &definition.formula_typings_input {
        Some(formula) => evaluate_or_empty(evaluator, &definition.name, "input", formula, parameters).await,
        None => definition.static_inputs(),
    };
    let output = match &definition.formula_typings_output {
        Some(formula) => evaluate_or_empty(evaluator, &definition.name, "output", formula, parameters).await,
        None => definition.static_outputs(),
    };
    ResolvedTypings { input, output }
}

async fn evaluate_or_empty(
    evaluator: &dyn FormulaEvaluator,
    filter: &str,
    direction: &str,
    formula: &str,
    parameters: &Parameters,
) -> Vec<StreamType> {
    match evaluator.evaluate(formula, parameters).await {
        Ok(typings) => typings.into_iter().map(|t| t.stream_type).collect(),
        Err(e) => {
            tracing::warn!(
                "{} typings of filter '{}' fell back to empty: {}",
                direction,
                filter,
                e
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FilterCatalog;
    use crate::model::Scalar;
    use serde_json::json;

    #[test]
    fn parse_accepts_objects_and_strings() {
        let typings = parse_typings(&json!([{"type": "video"}, "audio"])).unwrap();
        assert_eq!(
            typings,
            vec![Typing::from(StreamType::Video), Typing::from(StreamType::Audio)]
        );
        assert!(parse_typings(&json!({"type": "video"})).is_err());
        assert!(parse_typings(&json!(["subtitle"])).is_err());
    }

    #[tokio::test]
    async fn js_formula_sees_parameters() {
        let mut params = Parameters::new();
        params.insert("outputs".to_string(), Scalar::from(3));
        let typings = JsFormulaEvaluator::new()
            .evaluate(
                "Array.from({length: Number(outputs)}, () => ({type: 'video'}))",
                &params,
            )
            .await
            .unwrap();
        assert_eq!(typings.len(), 3);

        let typings = JsFormulaEvaluator::new()
            .evaluate("params.outputs > 2 ? ['audio'] : []", &params)
            .await
            .unwrap();
        assert_eq!(typings, vec![Typing::from(StreamType::Audio)]);
    }

    #[tokio::test]
    async fn js_formula_errors_are_reported() {
        let err = JsFormulaEvaluator::new()
            .evaluate("undefinedThing.length", &Parameters::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Evaluation(_)));
    }

    #[tokio::test]
    async fn builtin_concat_formula_orders_segments() {
        let catalog = FilterCatalog::builtin();
        let concat = catalog.require("concat").unwrap();
        let mut supplied = Parameters::new();
        supplied.insert("a".to_string(), Scalar::from(1));
        let params = concat.merged_parameters(&supplied);

        let resolved = resolve_typings(concat, &params, &JsFormulaEvaluator).await;
        use StreamType::{Audio, Video};
        assert_eq!(resolved.input, vec![Video, Audio, Video, Audio]);
        assert_eq!(resolved.output, vec![Video, Audio]);
    }

    #[tokio::test]
    async fn failing_direction_degrades_alone() {
        let definition = FilterDefinition {
            name: "broken".to_string(),
            description: String::new(),
            stream_typings_input: Vec::new(),
            stream_typings_output: Vec::new(),
            formula_typings_input: Some("[{type: 'video'}]".to_string()),
            formula_typings_output: Some("(() => { throw new Error('boom'); })()".to_string()),
            options: Vec::new(),
        };

        let resolved = resolve_typings(&definition, &Parameters::new(), &JsFormulaEvaluator).await;
        assert_eq!(resolved.input, vec![StreamType::Video]);
        assert!(resolved.output.is_empty());
    }
}
