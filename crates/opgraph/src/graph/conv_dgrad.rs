//! Convolution data-gradient (backward-data) node.

use tracing::debug;

use crate::backend::spec::{ConvDgradRequest, ConvMode, ConvParams, ExecutionBackend};
use crate::error::{GraphError, GraphResult};
use crate::graph::attributes::{required, ConvDgradAttributes};
use crate::graph::infer::{generate_stride, known_dim};
use crate::graph::node::{GraphNode, NodeBase, NodeKind, OperationRecord};
use crate::graph::Context;

/// Lowers one convolution backward-data operator, producing DX from the
/// filter W and the output gradient DY.
pub struct ConvDgradNode<B: ExecutionBackend> {
    pub attributes: ConvDgradAttributes,
    base: NodeBase<B>,
}

impl<B: ExecutionBackend> ConvDgradNode<B> {
    pub fn new(attributes: ConvDgradAttributes, context: Context) -> Self {
        ConvDgradNode {
            attributes,
            base: NodeBase::new(context),
        }
    }
}

impl<B: ExecutionBackend> GraphNode<B> for ConvDgradNode<B> {
    fn kind(&self) -> NodeKind {
        NodeKind::ConvDgrad
    }

    fn validate(&self) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "validating dgrad node");
        Ok(())
    }

    fn infer_properties(&mut self) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "inferring properties for dgrad node");

        self.attributes.fill_from_context(&self.base.context);
        let attributes = &self.attributes;

        let w = required(&attributes.w, "dgrad filter W")?;
        let dy = required(&attributes.dy, "dgrad input DY")?;
        let dx = required(&attributes.dx, "dgrad output DX")?;

        let w_dim = known_dim(w, "W")?;
        let dy_dim = known_dim(dy, "DY")?;

        if dy_dim.len() != w_dim.len() {
            return Err(GraphError::shape_inference(format!(
                "dgrad DY rank {} does not match filter rank {}",
                dy_dim.len(),
                w_dim.len()
            )));
        }

        let spatial_dims = w_dim.len().saturating_sub(2);
        for (param, values) in [
            ("padding", &attributes.padding),
            ("stride", &attributes.stride),
            ("dilation", &attributes.dilation),
        ] {
            if values.len() != spatial_dims {
                return Err(GraphError::shape_inference(format!(
                    "dgrad {param} has {} entries, expected one per spatial dimension ({spatial_dims})",
                    values.len()
                )));
            }
        }

        {
            let mut dx_attributes = dx.write();
            if dx_attributes.dim().is_empty() {
                // x NCHW, w KCRS, y NKPQ: batch from DY, channels from the
                // filter's input-channel axis, spatial extents from the
                // transposed-convolution size formula.
                let mut dx_dim = vec![0i64; w_dim.len()];
                dx_dim[0] = dy_dim[0];
                dx_dim[1] = w_dim[1];
                for axis in 2..w_dim.len() {
                    let spatial = axis - 2;
                    let extent = (dy_dim[axis] - 1) * attributes.stride[spatial]
                        - 2 * attributes.padding[spatial]
                        + 1
                        + attributes.dilation[spatial] * (w_dim[axis] - 1);
                    if extent < 1 {
                        return Err(GraphError::shape_inference(format!(
                            "dgrad DX extent {extent} on axis {axis} is not positive"
                        )));
                    }
                    dx_dim[axis] = extent;
                }
                dx_attributes.set_dim(dx_dim);
            }
            if dx_attributes.stride().is_empty() {
                let stride = generate_stride(dx_attributes.dim());
                dx_attributes.set_stride(stride);
            }
        }
        Ok(())
    }

    fn assign_uids(&mut self) -> GraphResult<()> {
        let attributes = &self.attributes;
        required(&attributes.dy, "DY")?.assign_uid();
        required(&attributes.w, "W")?.assign_uid();
        required(&attributes.dx, "DX")?.assign_uid();
        Ok(())
    }

    fn create_tensors(&mut self, backend: &B) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "building dgrad node tensors");

        let attributes = &self.attributes;
        self.base
            .create_tensor(backend, required(&attributes.dx, "DX")?)?;
        self.base
            .create_tensor(backend, required(&attributes.w, "W")?)?;
        self.base
            .create_tensor(backend, required(&attributes.dy, "DY")?)?;
        Ok(())
    }

    fn create_operations(&mut self, backend: &B) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "building dgrad node operations");

        let attributes = &self.attributes;
        let compute_type = attributes.compute_data_type.ok_or_else(|| {
            GraphError::attribute_not_set(format!(
                "compute data type of dgrad node `{}`",
                attributes.name
            ))
        })?;
        let params = ConvParams {
            compute_type,
            mode: ConvMode::CrossCorrelation,
            stride: attributes.stride.clone(),
            pre_padding: attributes.padding.clone(),
            post_padding: attributes.padding.clone(),
            dilation: attributes.dilation.clone(),
        };

        let dx = required(&attributes.dx, "DX")?;
        let w = required(&attributes.w, "W")?;
        let dy = required(&attributes.dy, "DY")?;

        let operation = backend.build_conv_dgrad(ConvDgradRequest {
            params,
            alpha: 1.0,
            beta: 0.0,
            dx: self.base.handle(dx)?,
            w: self.base.handle(w)?,
            dy: self.base.handle(dy)?,
        })?;

        self.base.push_operation(
            operation,
            &[
                attributes.dx.as_ref(),
                attributes.w.as_ref(),
                attributes.dy.as_ref(),
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
