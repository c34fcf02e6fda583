//! Batch-normalization forward node.

use tracing::debug;

use crate::backend::spec::{ExecutionBackend, NormForwardRequest};
use crate::error::{GraphError, GraphResult};
use crate::graph::attributes::{required, BatchnormAttributes};
use crate::graph::infer::{infer_like, infer_per_channel, infer_scalar, known_dim};
use crate::graph::node::{GraphNode, NodeBase, NodeKind, OperationRecord};
use crate::graph::Context;

/// Lowers one batch-normalization forward operator.
pub struct BatchnormNode<B: ExecutionBackend> {
    pub attributes: BatchnormAttributes,
    base: NodeBase<B>,
}

impl<B: ExecutionBackend> BatchnormNode<B> {
    pub fn new(attributes: BatchnormAttributes, context: Context) -> Self {
        BatchnormNode {
            attributes,
            base: NodeBase::new(context),
        }
    }
}

impl<B: ExecutionBackend> GraphNode<B> for BatchnormNode<B> {
    fn kind(&self) -> NodeKind {
        NodeKind::BatchnormForward
    }

    fn validate(&self) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "validating batchnorm node");

        // Training vs inference selects the backend code path, so the phase
        // cannot be defaulted.
        if self.attributes.forward_phase.is_none() {
            return Err(GraphError::attribute_not_set(format!(
                "forward phase of batchnorm node `{}`",
                self.attributes.name
            )));
        }
        Ok(())
    }

    fn infer_properties(&mut self) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "inferring properties for batchnorm node");

        self.attributes.fill_from_context(&self.base.context);
        let attributes = &self.attributes;

        let x = required(&attributes.x, "batchnorm input X")?;
        let x_dim = known_dim(x, "X")?;

        infer_like(&x_dim, required(&attributes.y, "batchnorm output Y")?);

        for (role, tensor) in [
            ("MEAN", &attributes.mean),
            ("INV_VARIANCE", &attributes.inv_variance),
            ("NEXT_RUNNING_MEAN", &attributes.next_running_mean),
            ("NEXT_RUNNING_VAR", &attributes.next_running_var),
            ("PREV_RUNNING_MEAN", &attributes.prev_running_mean),
            ("PREV_RUNNING_VAR", &attributes.prev_running_var),
            ("SCALE", &attributes.scale),
            ("BIAS", &attributes.bias),
        ] {
            infer_per_channel(&x_dim, required(tensor, role)?);
        }

        for (role, tensor) in [
            ("EPSILON", &attributes.epsilon),
            ("MOMENTUM", &attributes.momentum),
        ] {
            infer_scalar(&x_dim, required(tensor, role)?);
        }
        Ok(())
    }

    fn assign_uids(&mut self) -> GraphResult<()> {
        let attributes = &self.attributes;
        for (role, tensor) in [
            ("X", &attributes.x),
            ("SCALE", &attributes.scale),
            ("BIAS", &attributes.bias),
            ("PREV_RUNNING_MEAN", &attributes.prev_running_mean),
            ("PREV_RUNNING_VAR", &attributes.prev_running_var),
            ("EPSILON", &attributes.epsilon),
            ("MOMENTUM", &attributes.momentum),
            ("Y", &attributes.y),
            ("MEAN", &attributes.mean),
            ("INV_VARIANCE", &attributes.inv_variance),
            ("NEXT_RUNNING_MEAN", &attributes.next_running_mean),
            ("NEXT_RUNNING_VAR", &attributes.next_running_var),
        ] {
            required(tensor, role)?.assign_uid();
        }
        Ok(())
    }

    fn create_tensors(&mut self, backend: &B) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "building batchnorm node tensors");

        let attributes = &self.attributes;
        for (role, tensor) in [
            ("X", &attributes.x),
            ("PREV_RUNNING_MEAN", &attributes.prev_running_mean),
            ("PREV_RUNNING_VAR", &attributes.prev_running_var),
            ("EPSILON", &attributes.epsilon),
            ("MOMENTUM", &attributes.momentum),
            ("SCALE", &attributes.scale),
            ("BIAS", &attributes.bias),
            ("Y", &attributes.y),
            ("MEAN", &attributes.mean),
            ("INV_VARIANCE", &attributes.inv_variance),
            ("NEXT_RUNNING_MEAN", &attributes.next_running_mean),
            ("NEXT_RUNNING_VAR", &attributes.next_running_var),
        ] {
            self.base.create_tensor(backend, required(tensor, role)?)?;
        }
        Ok(())
    }

    fn create_operations(&mut self, backend: &B) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "building batchnorm node operations");

        let attributes = &self.attributes;
        let phase = attributes.forward_phase.ok_or_else(|| {
            GraphError::attribute_not_set(format!(
                "forward phase of batchnorm node `{}`",
                attributes.name
            ))
        })?;

        let x = required(&attributes.x, "X")?;
        let scale = required(&attributes.scale, "SCALE")?;
        let bias = required(&attributes.bias, "BIAS")?;
        let prev_running_mean = required(&attributes.prev_running_mean, "PREV_RUNNING_MEAN")?;
        let prev_running_var = required(&attributes.prev_running_var, "PREV_RUNNING_VAR")?;
        let epsilon = required(&attributes.epsilon, "EPSILON")?;
        let momentum = required(&attributes.momentum, "MOMENTUM")?;
        let y = required(&attributes.y, "Y")?;
        let mean = required(&attributes.mean, "MEAN")?;
        let inv_variance = required(&attributes.inv_variance, "INV_VARIANCE")?;
        let next_running_mean = required(&attributes.next_running_mean, "NEXT_RUNNING_MEAN")?;
        let next_running_var = required(&attributes.next_running_var, "NEXT_RUNNING_VAR")?;

        let operation = backend.build_norm_forward(NormForwardRequest {
            phase,
            x: self.base.handle(x)?,
            mean: self.base.handle(mean)?,
            inv_variance: self.base.handle(inv_variance)?,
            scale: self.base.handle(scale)?,
            bias: self.base.handle(bias)?,
            prev_running_mean: self.base.handle(prev_running_mean)?,
            prev_running_var: self.base.handle(prev_running_var)?,
            next_running_mean: self.base.handle(next_running_mean)?,
            next_running_var: self.base.handle(next_running_var)?,
            epsilon: self.base.handle(epsilon)?,
            momentum: self.base.handle(momentum)?,
            y: self.base.handle(y)?,
        })?;

        self.base.push_operation(
            operation,
            &[
                attributes.x.as_ref(),
                attributes.prev_running_mean.as_ref(),
                attributes.prev_running_var.as_ref(),
                attributes.epsilon.as_ref(),
                attributes.momentum.as_ref(),
                attributes.scale.as_ref(),
                attributes.bias.as_ref(),
                attributes.y.as_ref(),
                attributes.mean.as_ref(),
                attributes.inv_variance.as_ref(),
                attributes.next_running_mean.as_ref(),
                attributes.next_running_var.as_ref(),
            ],
        );
        Ok(())
    }

    fn serialize(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind(),
            "attributes": &self.attributes,
        })
    }

    fn operations(&self) -> &[OperationRecord<B::Operation>] {
        self.base.operations()
    }
}
