use crate::model::StreamType;

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("edge {0} not found")]
    EdgeNotFound(String),

    #[error("source or target node not found: {from} -> {to}")]
    EndpointNotFound { from: String, to: String },

    #[error("filter {0} not found")]
    FilterNotFound(String),

    #[error("invalid node spec: {0}")]
    InvalidSpec(String),

    #[error("source node {node} does not have an output at index {index}")]
    SourceIndexOutOfRange { node: String, index: usize },

    #[error("target node {node} does not have an input at index {index}")]
    TargetIndexOutOfRange { node: String, index: usize },

    #[error("stream type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: StreamType,
        actual: StreamType,
    },

    #[error("global node only accepts output streams, got {0}")]
    GlobalInputMismatch(String),

    #[error("{kind} node {node} has no filename")]
    NotAFileNode { node: String, kind: &'static str },

    #[error("Class {0} not registered")]
    ClassNotRegistered(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GraphError {
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
