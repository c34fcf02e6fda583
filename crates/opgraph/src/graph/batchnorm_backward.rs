//! Batch-normalization backward (gradient) node.

use tracing::debug;

use crate::backend::spec::{ExecutionBackend, NormBackwardRequest};
use crate::error::{GraphError, GraphResult};
use crate::graph::attributes::{required, BatchnormBackwardAttributes};
use crate::graph::infer::{infer_like, infer_per_channel, known_dim};
use crate::graph::node::{GraphNode, NodeBase, NodeKind, OperationRecord};
use crate::graph::Context;

/// Lowers one batch-normalization backward operator, producing DX, DSCALE
/// and DBIAS from X, DY and the saved statistics.
pub struct BatchnormBackwardNode<B: ExecutionBackend> {
    pub attributes: BatchnormBackwardAttributes,
    base: NodeBase<B>,
}

impl<B: ExecutionBackend> BatchnormBackwardNode<B> {
    pub fn new(attributes: BatchnormBackwardAttributes, context: Context) -> Self {
        BatchnormBackwardNode {
            attributes,
            base: NodeBase::new(context),
        }
    }
}

impl<B: ExecutionBackend> GraphNode<B> for BatchnormBackwardNode<B> {
    fn kind(&self) -> NodeKind {
        NodeKind::BatchnormBackward
    }

    fn validate(&self) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "validating batchnorm backward node");

        // Either the saved statistics or epsilon must be available.
        if self.attributes.mean.is_none()
            && self.attributes.inv_variance.is_none()
            && self.attributes.epsilon.is_none()
        {
            return Err(GraphError::attribute_not_set(format!(
                "saved mean/inv_variance or epsilon of batchnorm backward node `{}`",
                self.attributes.name
            )));
        }
        Ok(())
    }

    fn infer_properties(&mut self) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "inferring properties for batchnorm backward node");

        self.attributes.fill_from_context(&self.base.context);
        let attributes = &self.attributes;

        let x = required(&attributes.x, "batchnorm backward input X")?;
        let x_dim = known_dim(x, "X")?;

        infer_like(&x_dim, required(&attributes.dy, "DY")?);
        infer_like(&x_dim, required(&attributes.dx, "DX")?);

        if let Some(mean) = &attributes.mean {
            infer_per_channel(&x_dim, mean);
        }
        if let Some(inv_variance) = &attributes.inv_variance {
            infer_per_channel(&x_dim, inv_variance);
        }
        infer_per_channel(&x_dim, required(&attributes.scale, "SCALE")?);
        infer_per_channel(&x_dim, required(&attributes.dscale, "DSCALE")?);
        infer_per_channel(&x_dim, required(&attributes.dbias, "DBIAS")?);
        Ok(())
    }

    fn assign_uids(&mut self) -> GraphResult<()> {
        let attributes = &self.attributes;
        required(&attributes.x, "X")?.assign_uid();
        required(&attributes.dy, "DY")?.assign_uid();
        required(&attributes.scale, "SCALE")?.assign_uid();
        if let Some(mean) = &attributes.mean {
            mean.assign_uid();
        }
        if let Some(inv_variance) = &attributes.inv_variance {
            inv_variance.assign_uid();
        }
        // Epsilon is validation-only and never identified.
        required(&attributes.dx, "DX")?.assign_uid();
        required(&attributes.dscale, "DSCALE")?.assign_uid();
        required(&attributes.dbias, "DBIAS")?.assign_uid();
        Ok(())
    }

    fn create_tensors(&mut self, backend: &B) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "building batchnorm backward node tensors");

        let attributes = &self.attributes;
        self.base
            .create_tensor(backend, required(&attributes.x, "X")?)?;
        self.base
            .create_tensor(backend, required(&attributes.dy, "DY")?)?;
        self.base
            .create_tensor(backend, required(&attributes.scale, "SCALE")?)?;
        if let Some(mean) = &attributes.mean {
            self.base.create_tensor(backend, mean)?;
        }
        if let Some(inv_variance) = &attributes.inv_variance {
            self.base.create_tensor(backend, inv_variance)?;
        }
        self.base
            .create_tensor(backend, required(&attributes.dx, "DX")?)?;
        self.base
            .create_tensor(backend, required(&attributes.dscale, "DSCALE")?)?;
        self.base
            .create_tensor(backend, required(&attributes.dbias, "DBIAS")?)?;
        Ok(())
    }

    fn create_operations(&mut self, backend: &B) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "building batchnorm backward node operations");

        let attributes = &self.attributes;
        let x = required(&attributes.x, "X")?;
        let dy = required(&attributes.dy, "DY")?;
        let scale = required(&attributes.scale, "SCALE")?;
        // The lowered operation always binds the saved statistics; the
        // epsilon-only recompute path is not supported by the backend
        // contract.
        let mean = required(&attributes.mean, "MEAN")?;
        let inv_variance = required(&attributes.inv_variance, "INV_VARIANCE")?;
        let dx = required(&attributes.dx, "DX")?;
        let dscale = required(&attributes.dscale, "DSCALE")?;
        let dbias = required(&attributes.dbias, "DBIAS")?;

        let operation = backend.build_norm_backward(NormBackwardRequest {
            x: self.base.handle(x)?,
            dy: self.base.handle(dy)?,
            scale: self.base.handle(scale)?,
            mean: self.base.handle(mean)?,
            inv_variance: self.base.handle(inv_variance)?,
            dscale: self.base.handle(dscale)?,
            dbias: self.base.handle(dbias)?,
            dx: self.base.handle(dx)?,
        })?;

        self.base.push_operation(
            operation,
            &[
                attributes.x.as_ref(),
                attributes.dy.as_ref(),
                attributes.scale.as_ref(),
                attributes.mean.as_ref(),
                attributes.inv_variance.as_ref(),
                attributes.dx.as_ref(),
                attributes.dscale.as_ref(),
                attributes.dbias.as_ref(),
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
