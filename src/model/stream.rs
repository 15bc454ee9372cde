use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};
use crate::model::node::{Node, NodeKind};
use crate::model::types::StreamType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
    Av,
    Output,
    Global,
}

impl StreamKind {
    /// Semantic type used by the wiring checks. Output and global streams
    /// carry whatever their producer muxed, so they count as `av`.
    pub fn stream_type(self) -> StreamType {
        match self {
            StreamKind::Video => StreamType::Video,
            StreamKind::Audio => StreamType::Audio,
            StreamKind::Av | StreamKind::Output | StreamKind::Global => StreamType::Av,
        }
    }

    pub fn class_name(self) -> &'static str {
        match self {
            StreamKind::Video => "VideoStream",
            StreamKind::Audio => "AudioStream",
            StreamKind::Av => "AVStream",
            StreamKind::Output => "OutputStream",
            StreamKind::Global => "GlobalStream",
        }
    }

    /// Stream kind a filter emits for a declared output typing. Filters
    /// only emit video or audio; an `av` output is wired as video.
    pub fn for_filter_output(stream_type: StreamType) -> Self {
        match stream_type {
            StreamType::Audio => StreamKind::Audio,
            StreamType::Video | StreamType::Av => StreamKind::Video,
        }
    }
}

/// An output of `source`, optionally wired into one input slot downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub kind: StreamKind,
    /// Key of the producing node in the owning graph.
    pub source: String,
    /// Output index on the producer; `None` means the sole output.
    pub index: Option<usize>,
    pub id: Option<String>,
}

impl Stream {
    pub fn new(kind: StreamKind, source: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            kind,
            source: source.into(),
            index,
            id: None,
        }
    }

    /// Builds the stream a producer emits at `index`.
    ///
    /// Filters emit video or audio per their declared output typing (`av`
    /// becomes video) and are bounds-checked; input nodes have a single implicit `av` output, so the
    /// index is normalized away.
    pub fn from_producer(producer: &Node, source_id: &str, index: usize) -> GraphResult<Self> {
        let stream = match &producer.kind {
            NodeKind::Filter(filter) => {
                let typing = filter.output_typings.get(index).ok_or_else(|| {
                    GraphError::SourceIndexOutOfRange {
                        node: source_id.to_string(),
                        index,
                    }
                })?;
                Stream::new(StreamKind::for_filter_output(*typing), source_id, Some(index))
            }
            NodeKind::Input { .. } => Stream::new(StreamKind::Av, source_id, None),
            NodeKind::Output { .. } => Stream::new(StreamKind::Output, source_id, None),
            NodeKind::Global => Stream::new(StreamKind::Global, source_id, None),
        };
        Ok(stream)
    }

    pub fn stream_type(&self) -> StreamType {
        self.kind.stream_type()
    }
}
