use crate::graph::{NodeId, SourceId};

/// Result alias that carries the custom [`VisualiserError`] type.
pub type Result<T> = std::result::Result<T, VisualiserError>;

/// Common error type for the core crate.
///
/// The audio-graph variants never escape [`crate::AnalysisFrameSource`]: it
/// logs them and degrades to an inactive visualisation instead.
#[derive(Debug, thiserror::Error)]
pub enum VisualiserError {
    /// The playable source is already wired into a graph this process does not
    /// own. Rewiring it would break its playback path, so the tap is skipped.
    #[error("source `{source_id}` is already bound to a foreign graph")]
    GraphUnavailable { source_id: SourceId },
    /// Hooking up a node failed.
    #[error("audio node connection failed: {0}")]
    ConnectionFailed(String),
    /// The processing context refused to leave the suspended state.
    #[error("audio context resume failed: {0}")]
    ResumeFailed(String),
    /// A registry operation named a source that has no live connection.
    /// The frame source's data getters never return this; before
    /// initialisation they hand out empty buffers.
    #[error("no graph connection has been initialised for `{source_id}`")]
    NotInitialized { source_id: SourceId },
    /// A caller supplied a value outside the accepted domain.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The graph does not know the node.
    #[error("unknown audio node {0:?}")]
    UnknownNode(NodeId),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed configuration document.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl VisualiserError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}
