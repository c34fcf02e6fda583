//! Error types surfaced by the node build pipeline.

use thiserror::Error;

use crate::backend::spec::BackendError;

/// Failure raised by a node lifecycle stage.
///
/// The pipeline is fail-fast: the first failing stage aborts the node build
/// and is expected to abort the enclosing graph build. No stage retries and
/// no errors are aggregated.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A required role or parameter was missing when a stage needed it.
    #[error("attribute not set: {0}")]
    AttributeNotSet(String),
    /// A required input shape was itself unknown during property inference.
    #[error("shape inference failed: {0}")]
    ShapeInference(String),
    /// The backend rejected a tensor or operation descriptor. The native
    /// status code and message are preserved verbatim.
    #[error("backend construction failed: {0}")]
    Backend(#[from] BackendError),
}

impl GraphError {
    pub(crate) fn attribute_not_set(what: impl Into<String>) -> Self {
        GraphError::AttributeNotSet(what.into())
    }

    pub(crate) fn shape_inference(what: impl Into<String>) -> Self {
        GraphError::ShapeInference(what.into())
    }
}

/// Convenience alias for results returned by lifecycle stages.
pub type GraphResult<T> = Result<T, GraphError>;
