//! Attribute bundles: the declarative description of one operator each.
//!
//! A bundle names the tensor roles an operator reads and writes plus its
//! scalar parameters. Roles are optional at the type level; which ones are
//! mandatory is enforced per operator kind by validation and the later
//! lifecycle stages. Bundles serialize into the structured record exposed by
//! `GraphNode::serialize`.

use serde::Serialize;

use crate::backend::spec::{NormFwdPhase, RngDistribution};
use crate::error::{GraphError, GraphResult};
use crate::graph::Context;
use crate::tensor::{DType, TensorRef};

/// Resolves a role reference, failing with `AttributeNotSet` when the caller
/// did not supply it.
pub(crate) fn required<'t>(role: &'t Option<TensorRef>, what: &str) -> GraphResult<&'t TensorRef> {
    role.as_ref()
        .ok_or_else(|| GraphError::attribute_not_set(what.to_owned()))
}

/// Batch-normalization forward: inputs X/SCALE/BIAS/previous running
/// statistics/EPSILON/MOMENTUM, outputs Y/saved statistics/next running
/// statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchnormAttributes {
    pub name: String,
    pub forward_phase: Option<NormFwdPhase>,
    pub x: Option<TensorRef>,
    pub scale: Option<TensorRef>,
    pub bias: Option<TensorRef>,
    pub prev_running_mean: Option<TensorRef>,
    pub prev_running_var: Option<TensorRef>,
    pub epsilon: Option<TensorRef>,
    pub momentum: Option<TensorRef>,
    pub y: Option<TensorRef>,
    pub mean: Option<TensorRef>,
    pub inv_variance: Option<TensorRef>,
    pub next_running_mean: Option<TensorRef>,
    pub next_running_var: Option<TensorRef>,
}

impl BatchnormAttributes {
    pub(crate) fn fill_from_context(&mut self, context: &Context) {
        for tensor in [
            &self.x,
            &self.scale,
            &self.bias,
            &self.prev_running_mean,
            &self.prev_running_var,
            &self.epsilon,
            &self.momentum,
            &self.y,
            &self.mean,
            &self.inv_variance,
            &self.next_running_mean,
            &self.next_running_var,
        ]
        .into_iter()
        .flatten()
        {
            tensor.write().fill_data_type(context);
        }
    }
}

/// Batch-normalization backward: inputs X/DY/SCALE and the saved statistics
/// (or EPSILON for recomputation), outputs DX/DSCALE/DBIAS.
///
/// EPSILON participates in validation only; it is never identified or wired
/// into the lowered operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchnormBackwardAttributes {
    pub name: String,
    pub x: Option<TensorRef>,
    pub dy: Option<TensorRef>,
    pub scale: Option<TensorRef>,
    pub mean: Option<TensorRef>,
    pub inv_variance: Option<TensorRef>,
    pub epsilon: Option<TensorRef>,
    pub dx: Option<TensorRef>,
    pub dscale: Option<TensorRef>,
    pub dbias: Option<TensorRef>,
}

impl BatchnormBackwardAttributes {
    pub(crate) fn fill_from_context(&mut self, context: &Context) {
        for tensor in [
            &self.x,
            &self.dy,
            &self.scale,
            &self.mean,
            &self.inv_variance,
            &self.epsilon,
            &self.dx,
            &self.dscale,
            &self.dbias,
        ]
        .into_iter()
        .flatten()
        {
            tensor.write().fill_data_type(context);
        }
    }
}

/// Convolution data-gradient: inputs W/DY, output DX, with per-spatial-axis
/// padding, stride and dilation (one entry per spatial dimension).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConvDgradAttributes {
    pub name: String,
    pub w: Option<TensorRef>,
    pub dy: Option<TensorRef>,
    pub dx: Option<TensorRef>,
    pub padding: Vec<i64>,
    pub stride: Vec<i64>,
    pub dilation: Vec<i64>,
    pub compute_data_type: Option<DType>,
}

impl ConvDgradAttributes {
    pub(crate) fn fill_from_context(&mut self, context: &Context) {
        for tensor in [&self.w, &self.dy, &self.dx].into_iter().flatten() {
            tensor.write().fill_data_type(context);
        }
        if self.compute_data_type.is_none() {
            self.compute_data_type = Some(context.compute_data_type);
        }
    }
}

/// Random-number generation: optional Seed/Offset inputs, output Y, and the
/// distribution parameters. `seed_value` is the literal seed used when no
/// Seed tensor is supplied.
#[derive(Debug, Clone, Serialize)]
pub struct RngAttributes {
    pub name: String,
    pub seed: Option<TensorRef>,
    pub offset: Option<TensorRef>,
    pub y: Option<TensorRef>,
    pub distribution: RngDistribution,
    pub bernoulli_probability: Option<f64>,
    pub seed_value: Option<i64>,
}

impl Default for RngAttributes {
    fn default() -> Self {
        RngAttributes {
            name: String::new(),
            seed: None,
            offset: None,
            y: None,
            distribution: RngDistribution::Bernoulli,
            bernoulli_probability: None,
            seed_value: None,
        }
    }
}

impl RngAttributes {
    pub(crate) fn fill_from_context(&mut self, context: &Context) {
        for tensor in [&self.seed, &self.offset, &self.y].into_iter().flatten() {
            tensor.write().fill_data_type(context);
        }
    }
}
