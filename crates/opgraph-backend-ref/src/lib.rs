//! Reference execution backend.
//!
//! Validates tensor descriptors the way a native backend would, hands back
//! plain snapshots as handles, and records everything it was asked to build
//! so tests can inspect the lowered form. Nothing is ever executed.

use std::sync::Mutex;

use opgraph::backend::spec::{
    BackendError, BackendResult, ConvDgradRequest, ConvParams, ExecutionBackend,
    NormBackwardRequest, NormForwardRequest, NormFwdPhase, RngDistribution, RngRequest,
    RngSeeding,
};
use opgraph::tensor::{DType, TensorAttributes, TensorUid};

/// Descriptor snapshot handed back as the native tensor handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTensor {
    pub uid: TensorUid,
    pub name: String,
    pub data_type: DType,
    pub dim: Vec<i64>,
    pub stride: Vec<i64>,
    pub is_virtual: bool,
}

/// Seed source captured in a lowered rng operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefRngSeeding {
    Tensors { seed: TensorUid, offset: TensorUid },
    Literal { seed: i64 },
}

/// Operation descriptor built by the reference backend. Captures the handle
/// bindings by uid plus the operator parameters as received.
#[derive(Debug, Clone)]
pub enum RefOperation {
    NormForward {
        phase: NormFwdPhase,
        x: TensorUid,
        mean: TensorUid,
        inv_variance: TensorUid,
        scale: TensorUid,
        bias: TensorUid,
        prev_running_mean: TensorUid,
        prev_running_var: TensorUid,
        next_running_mean: TensorUid,
        next_running_var: TensorUid,
        epsilon: TensorUid,
        momentum: TensorUid,
        y: TensorUid,
    },
    NormBackward {
        x: TensorUid,
        dy: TensorUid,
        scale: TensorUid,
        mean: TensorUid,
        inv_variance: TensorUid,
        dscale: TensorUid,
        dbias: TensorUid,
        dx: TensorUid,
    },
    ConvDgrad {
        params: ConvParams,
        alpha: f32,
        beta: f32,
        dx: TensorUid,
        w: TensorUid,
        dy: TensorUid,
    },
    Rng {
        distribution: RngDistribution,
        bernoulli_probability: f64,
        seeding: RefRngSeeding,
        y: TensorUid,
    },
}

const STATUS_BAD_DTYPE: i64 = 2000;
const STATUS_BAD_SHAPE: i64 = 2001;
const STATUS_BAD_STRIDE: i64 = 2002;
const STATUS_BAD_UID: i64 = 2003;
const STATUS_REJECTED: i64 = 2100;

/// Recording backend used by the test suites.
///
/// `rejecting` produces a backend that refuses to materialize one named
/// tensor, for exercising error propagation through the build pipeline.
#[derive(Default)]
pub struct RefBackend {
    created: Mutex<Vec<RefTensor>>,
    operations_built: Mutex<usize>,
    reject_tensor_named: Option<String>,
}

impl RefBackend {
    pub fn new() -> Self {
        RefBackend::default()
    }

    pub fn rejecting(tensor_name: impl Into<String>) -> Self {
        RefBackend {
            reject_tensor_named: Some(tensor_name.into()),
            ..RefBackend::default()
        }
    }

    /// Snapshots of every tensor materialized so far, in creation order.
    pub fn created_tensors(&self) -> Vec<RefTensor> {
        self.created.lock().expect("backend mutex poisoned").clone()
    }

    /// Number of operation descriptors built so far.
    pub fn operations_built(&self) -> usize {
        *self.operations_built.lock().expect("backend mutex poisoned")
    }

    fn record_operation(&self, operation: RefOperation) -> BackendResult<RefOperation> {
        *self.operations_built.lock().expect("backend mutex poisoned") += 1;
        Ok(operation)
    }
}

impl ExecutionBackend for RefBackend {
    type TensorHandle = RefTensor;
    type Operation = RefOperation;

    fn backend_name(&self) -> &str {
        "ref"
    }

    fn create_tensor(&self, attributes: &TensorAttributes) -> BackendResult<RefTensor> {
        if let Some(rejected) = &self.reject_tensor_named {
            if attributes.name() == rejected {
                return Err(BackendError::new(
                    STATUS_REJECTED,
                    format!("tensor `{}` rejected by backend", rejected),
                ));
            }
        }
        let uid = attributes.uid().ok_or_else(|| {
            BackendError::new(
                STATUS_BAD_UID,
                format!("tensor `{}` has no identifier", attributes.name()),
            )
        })?;
        let data_type = attributes.data_type().ok_or_else(|| {
            BackendError::new(
                STATUS_BAD_DTYPE,
                format!("tensor `{}` has no data type", attributes.name()),
            )
        })?;
        if attributes.dim().is_empty() {
            return Err(BackendError::new(
                STATUS_BAD_SHAPE,
                format!("tensor `{}` has no shape", attributes.name()),
            ));
        }
        if attributes.stride().len() != attributes.dim().len() {
            return Err(BackendError::new(
                STATUS_BAD_STRIDE,
                format!(
                    "tensor `{}` stride rank {} does not match shape rank {}",
                    attributes.name(),
                    attributes.stride().len(),
                    attributes.dim().len()
                ),
            ));
        }

        let handle = RefTensor {
            uid,
            name: attributes.name().to_owned(),
            data_type,
            dim: attributes.dim().to_vec(),
            stride: attributes.stride().to_vec(),
            is_virtual: attributes.is_virtual(),
        };
        self.created
            .lock()
            .expect("backend mutex poisoned")
            .push(handle.clone());
        Ok(handle)
    }

    fn build_norm_forward(
        &self,
        request: NormForwardRequest<'_, RefTensor>,
    ) -> BackendResult<RefOperation> {
        self.record_operation(RefOperation::NormForward {
            phase: request.phase,
            x: request.x.uid,
            mean: request.mean.uid,
            inv_variance: request.inv_variance.uid,
            scale: request.scale.uid,
            bias: request.bias.uid,
            prev_running_mean: request.prev_running_mean.uid,
            prev_running_var: request.prev_running_var.uid,
            next_running_mean: request.next_running_mean.uid,
            next_running_var: request.next_running_var.uid,
            epsilon: request.epsilon.uid,
            momentum: request.momentum.uid,
            y: request.y.uid,
        })
    }

    fn build_norm_backward(
        &self,
        request: NormBackwardRequest<'_, RefTensor>,
    ) -> BackendResult<RefOperation> {
        self.record_operation(RefOperation::NormBackward {
            x: request.x.uid,
            dy: request.dy.uid,
            scale: request.scale.uid,
            mean: request.mean.uid,
            inv_variance: request.inv_variance.uid,
            dscale: request.dscale.uid,
            dbias: request.dbias.uid,
            dx: request.dx.uid,
        })
    }

    fn build_conv_dgrad(
        &self,
        request: ConvDgradRequest<'_, RefTensor>,
    ) -> BackendResult<RefOperation> {
        let spatial = request.params.stride.len();
        if request.params.pre_padding.len() != spatial
            || request.params.post_padding.len() != spatial
            || request.params.dilation.len() != spatial
        {
            return Err(BackendError::new(
                STATUS_BAD_SHAPE,
                "convolution parameter vectors have mismatched ranks".to_owned(),
            ));
        }
        self.record_operation(RefOperation::ConvDgrad {
            params: request.params,
            alpha: request.alpha,
            beta: request.beta,
            dx: request.dx.uid,
            w: request.w.uid,
            dy: request.dy.uid,
        })
    }

    fn build_rng(&self, request: RngRequest<'_, RefTensor>) -> BackendResult<RefOperation> {
        let seeding = match request.seeding {
            RngSeeding::Tensors { seed, offset } => RefRngSeeding::Tensors {
                seed: seed.uid,
                offset: offset.uid,
            },
            RngSeeding::Literal { seed } => RefRngSeeding::Literal { seed },
        };
        self.record_operation(RefOperation::Rng {
            distribution: request.distribution,
            bernoulli_probability: request.bernoulli_probability,
            seeding,
            y: request.y.uid,
        })
    }
}
