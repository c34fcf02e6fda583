//! Contract between the graph frontend and an execution backend.
//!
//! The frontend never executes anything: it asks the backend to materialize
//! tensor handles from fully specified descriptors and to build opaque
//! operation descriptors from those handles plus operator parameters. Both
//! capabilities are expressed by [`ExecutionBackend`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tensor::{DType, TensorAttributes};

/// Error reported by a backend when it rejects a tensor or operation
/// descriptor, carrying the backend's native status code and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub code: i64,
    pub message: String,
}

impl BackendError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        BackendError {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.code, self.message)
    }
}

impl std::error::Error for BackendError {}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Training/inference selector for normalization forward operations.
///
/// Not defaultable: the phase changes which backend code path is selected,
/// so the caller must pick one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormFwdPhase {
    Training,
    Inference,
}

/// Distribution requested from a random-number-generation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RngDistribution {
    Bernoulli,
    Uniform,
    Normal,
}

/// Filter application mode for convolution-family operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvMode {
    CrossCorrelation,
    Convolution,
}

/// Per-spatial-axis convolution parameters handed to the backend when
/// building a convolution-family operation descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvParams {
    pub compute_type: DType,
    pub mode: ConvMode,
    pub stride: Vec<i64>,
    pub pre_padding: Vec<i64>,
    pub post_padding: Vec<i64>,
    pub dilation: Vec<i64>,
}

/// Handles and parameters for one normalization-forward operation.
#[derive(Debug)]
pub struct NormForwardRequest<'a, H> {
    pub phase: NormFwdPhase,
    pub x: &'a H,
    pub mean: &'a H,
    pub inv_variance: &'a H,
    pub scale: &'a H,
    pub bias: &'a H,
    pub prev_running_mean: &'a H,
    pub prev_running_var: &'a H,
    pub next_running_mean: &'a H,
    pub next_running_var: &'a H,
    pub epsilon: &'a H,
    pub momentum: &'a H,
    pub y: &'a H,
}

/// Handles for one normalization-backward operation.
#[derive(Debug)]
pub struct NormBackwardRequest<'a, H> {
    pub x: &'a H,
    pub dy: &'a H,
    pub scale: &'a H,
    pub mean: &'a H,
    pub inv_variance: &'a H,
    pub dscale: &'a H,
    pub dbias: &'a H,
    pub dx: &'a H,
}

/// Handles and parameters for one convolution backward-data operation.
///
/// `alpha` and `beta` are the usual output blend factors,
/// `out = alpha * result + beta * out`.
#[derive(Debug)]
pub struct ConvDgradRequest<'a, H> {
    pub params: ConvParams,
    pub alpha: f32,
    pub beta: f32,
    pub dx: &'a H,
    pub w: &'a H,
    pub dy: &'a H,
}

/// Seed source for a random-number-generation operation: either tensor
/// handles resolved at execution time or a literal value baked into the
/// descriptor.
#[derive(Debug)]
pub enum RngSeeding<'a, H> {
    Tensors { seed: &'a H, offset: &'a H },
    Literal { seed: i64 },
}

/// Handles and parameters for one random-number-generation operation.
#[derive(Debug)]
pub struct RngRequest<'a, H> {
    pub distribution: RngDistribution,
    pub bernoulli_probability: f64,
    pub seeding: RngSeeding<'a, H>,
    pub y: &'a H,
}

/// Backend capability consumed by the graph frontend.
///
/// `create_tensor` is the tensor handle factory; the `build_*` methods are
/// the operation descriptor builders. Both may reject their input with a
/// [`BackendError`], which the frontend propagates without retrying.
pub trait ExecutionBackend: Send + Sync {
    /// Opaque native tensor handle kept in the node's uid-to-handle map.
    type TensorHandle: Clone + Send + Sync + 'static;
    /// Opaque native operation descriptor stored in operation records.
    type Operation: Send + Sync + 'static;

    /// Returns a human-readable backend identifier (e.g., `"ref"`).
    fn backend_name(&self) -> &str;

    /// Materializes a native tensor handle from a fully specified
    /// descriptor (shape, stride, data type, identifier, virtuality).
    fn create_tensor(&self, attributes: &TensorAttributes)
        -> BackendResult<Self::TensorHandle>;

    /// Builds a batch-normalization forward operation descriptor.
    fn build_norm_forward(
        &self,
        request: NormForwardRequest<'_, Self::TensorHandle>,
    ) -> BackendResult<Self::Operation>;

    /// Builds a batch-normalization backward operation descriptor.
    fn build_norm_backward(
        &self,
        request: NormBackwardRequest<'_, Self::TensorHandle>,
    ) -> BackendResult<Self::Operation>;

    /// Builds a convolution backward-data operation descriptor.
    fn build_conv_dgrad(
        &self,
        request: ConvDgradRequest<'_, Self::TensorHandle>,
    ) -> BackendResult<Self::Operation>;

    /// Builds a random-number-generation operation descriptor.
    fn build_rng(
        &self,
        request: RngRequest<'_, Self::TensorHandle>,
    ) -> BackendResult<Self::Operation>;
}
