mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{test_catalog, CountingEvaluator};
use filter_flow::schema::{ExternalEdge, ExternalNode, ExternalNodeKind, Handle, NodeData};
use filter_flow::{Connection, ConnectionValidator, Parameters, Scalar, StreamType};

fn validator() -> (ConnectionValidator, Arc<CountingEvaluator>) {
    let evaluator = Arc::new(CountingEvaluator::default());
    let validator = ConnectionValidator::new(Arc::new(test_catalog()), evaluator.clone());
    (validator, evaluator)
}

fn filter_node(id: &str, name: &str, inputs: &[StreamType], outputs: &[StreamType]) -> ExternalNode {
    ExternalNode {
        id: id.to_string(),
        kind: ExternalNodeKind::Filter,
        data: NodeData {
            name: Some(name.to_string()),
            inputs: inputs.iter().enumerate().map(|(i, t)| Handle::input(i, *t)).collect(),
            outputs: outputs.iter().enumerate().map(|(i, t)| Handle::output(i, *t)).collect(),
            ..NodeData::default()
        },
    }
}

fn file_node(id: &str, kind: ExternalNodeKind) -> ExternalNode {
    let data = match kind {
        ExternalNodeKind::Input => NodeData {
            filename: Some(format!("{}.mp4", id)),
            outputs: vec![Handle::output(0, StreamType::Av)],
            ..NodeData::default()
        },
        _ => NodeData {
            filename: Some(format!("{}.mp4", id)),
            inputs: vec![Handle::input(0, StreamType::Av)],
            ..NodeData::default()
        },
    };
    ExternalNode {
        id: id.to_string(),
        kind,
        data,
    }
}

fn edge(source: &str, target: &str, target_handle: &str) -> ExternalEdge {
    ExternalEdge {
        id: format!("{}-{}", source, target),
        source: source.to_string(),
        target: target.to_string(),
        source_handle: Some("output-0".to_string()),
        target_handle: Some(target_handle.to_string()),
        stream_type: None,
    }
}

#[tokio::test]
async fn validator_type_compatibility_law() -> Result<()> {
    use StreamType::{Audio, Av, Video};
    let (validator, evaluator) = validator();

    for source in [Av, Video, Audio] {
        for target in [Av, Video, Audio] {
            let nodes = vec![
                filter_node("s", "plain", &[], &[source]),
                filter_node("t", "plain", &[target], &[]),
            ];
            let allowed = validator
                .validate(&Connection::new("s", "output-0", "t", "input-0"), &nodes, &[])
                .await;
            let expected = target == source || source == Av || target == Av;
            assert_eq!(allowed, expected, "source {} -> target {}", source, target);
        }
    }
    assert_eq!(evaluator.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn input_sources_and_output_targets_always_pass() -> Result<()> {
    let (validator, _) = validator();
    let nodes = vec![
        file_node("in", ExternalNodeKind::Input),
        filter_node("a", "plain", &[StreamType::Audio], &[StreamType::Audio]),
        file_node("out", ExternalNodeKind::Output),
    ];
    let edges = vec![edge("x", "a", "input-0")];

    assert!(
        validator
            .validate(&Connection::new("in", "output-0", "a", "input-0"), &nodes, &edges)
            .await
    );
    assert!(
        validator
            .validate(&Connection::new("a", "output-0", "out", "input-7"), &nodes, &edges)
            .await
    );
    Ok(())
}

#[tokio::test]
async fn filter_inputs_take_one_edge() -> Result<()> {
    let (validator, _) = validator();
    let nodes = vec![
        filter_node("a", "plain", &[], &[StreamType::Video]),
        filter_node("b", "plain", &[StreamType::Video, StreamType::Video], &[]),
    ];
    let edges = vec![edge("a", "b", "input-0")];

    assert!(
        !validator
            .validate(&Connection::new("a", "output-0", "b", "input-0"), &nodes, &edges)
            .await
    );
    assert!(
        validator
            .validate(&Connection::new("a", "output-0", "b", "input-1"), &nodes, &edges)
            .await
    );
    Ok(())
}

#[tokio::test]
async fn missing_nodes_or_handles_reject() -> Result<()> {
    let (validator, _) = validator();
    let nodes = vec![file_node("in", ExternalNodeKind::Input)];

    assert!(
        !validator
            .validate(&Connection::new("in", "output-0", "ghost", "input-0"), &nodes, &[])
            .await
    );
    let mut candidate = Connection::new("in", "output-0", "in", "input-0");
    candidate.target_handle = None;
    assert!(!validator.validate(&candidate, &nodes, &[]).await);
    Ok(())
}

#[tokio::test]
async fn dynamic_arity_uses_coerced_parameters() -> Result<()> {
    let (validator, evaluator) = validator();
    let mut mix = filter_node("m", "mix", &[StreamType::Audio; 3], &[StreamType::Video]);
    let mut parameters = Parameters::new();
    parameters.insert("inputs".to_string(), Scalar::from("3"));
    mix.data.parameters = parameters;

    let nodes = vec![
        filter_node("s", "plain", &[], &[StreamType::Video]),
        mix.clone(),
    ];
    let candidate = Connection::new("s", "output-0", "m", "input-2");
    assert!(validator.validate(&candidate, &nodes, &[]).await);
    assert_eq!(evaluator.calls(), 1);

    // Index past the evaluated arity falls back to the declared handle.
    mix.data.parameters.insert("inputs".to_string(), Scalar::from("1"));
    let nodes = vec![filter_node("s", "plain", &[], &[StreamType::Video]), mix];
    assert!(!validator.validate(&candidate, &nodes, &[]).await);
    Ok(())
}

#[tokio::test]
async fn formula_failure_falls_back_to_declared_type() -> Result<()> {
    let (validator, evaluator) = validator();
    let nodes = vec![
        filter_node("s", "plain", &[], &[StreamType::Video]),
        filter_node("b", "broken", &[StreamType::Audio], &[StreamType::Video]),
    ];
    let candidate = Connection::new("s", "output-0", "b", "input-0");
    assert!(!validator.validate(&candidate, &nodes, &[]).await);
    assert_eq!(evaluator.calls(), 1);
    Ok(())
}
