//! Random-number-generation node.

use tracing::debug;

use crate::backend::spec::{ExecutionBackend, RngDistribution, RngRequest, RngSeeding};
use crate::error::{GraphError, GraphResult};
use crate::graph::attributes::{required, RngAttributes};
use crate::graph::node::{GraphNode, NodeBase, NodeKind, OperationRecord};
use crate::graph::Context;

/// Lowers one random-number-generation operator. Seeding is dynamic when a
/// Seed tensor is supplied (Seed and Offset handles are bound at execution
/// time) and static otherwise (a literal seed is baked into the descriptor).
pub struct RngNode<B: ExecutionBackend> {
    pub attributes: RngAttributes,
    base: NodeBase<B>,
}

impl<B: ExecutionBackend> RngNode<B> {
    pub fn new(attributes: RngAttributes, context: Context) -> Self {
        RngNode {
            attributes,
            base: NodeBase::new(context),
        }
    }
}

impl<B: ExecutionBackend> GraphNode<B> for RngNode<B> {
    fn kind(&self) -> NodeKind {
        NodeKind::Rng
    }

    fn validate(&self) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "validating rng node");

        if self.attributes.y.is_none() {
            return Err(GraphError::attribute_not_set(format!(
                "output of rng node `{}`",
                self.attributes.name
            )));
        }
        Ok(())
    }

    fn infer_properties(&mut self) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "inferring properties for rng node");

        // The output shape and stride are caller-supplied; only dtype
        // defaults are filled in.
        self.attributes.fill_from_context(&self.base.context);
        Ok(())
    }

    fn assign_uids(&mut self) -> GraphResult<()> {
        let attributes = &self.attributes;
        if let Some(seed) = &attributes.seed {
            seed.assign_uid();
        }
        if let Some(offset) = &attributes.offset {
            offset.assign_uid();
        }
        required(&attributes.y, "Y")?.assign_uid();
        Ok(())
    }

    fn create_tensors(&mut self, backend: &B) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "building rng node tensors");

        let attributes = &self.attributes;
        if let Some(seed) = &attributes.seed {
            self.base.create_tensor(backend, seed)?;
        }
        if let Some(offset) = &attributes.offset {
            self.base.create_tensor(backend, offset)?;
        }
        self.base
            .create_tensor(backend, required(&attributes.y, "Y")?)?;
        Ok(())
    }

    fn create_operations(&mut self, backend: &B) -> GraphResult<()> {
        debug!(node = %self.attributes.name, "building rng node operations");

        let attributes = &self.attributes;
        if attributes.distribution != RngDistribution::Bernoulli {
            // Only the Bernoulli distribution is lowered today; other
            // distributions emit no operation.
            debug!(
                node = %attributes.name,
                distribution = ?attributes.distribution,
                "skipping rng lowering for unhandled distribution"
            );
            return Ok(());
        }

        let bernoulli_probability = attributes.bernoulli_probability.ok_or_else(|| {
            GraphError::attribute_not_set(format!(
                "bernoulli probability of rng node `{}`",
                attributes.name
            ))
        })?;
        let y = required(&attributes.y, "Y")?;

        let operation = if let Some(seed) = &attributes.seed {
            let offset = required(&attributes.offset, "rng offset")?;
            backend.build_rng(RngRequest {
                distribution: attributes.distribution,
                bernoulli_probability,
                seeding: RngSeeding::Tensors {
                    seed: self.base.handle(seed)?,
                    offset: self.base.handle(offset)?,
                },
                y: self.base.handle(y)?,
            })?
        } else {
            let seed_value = attributes.seed_value.ok_or_else(|| {
                GraphError::attribute_not_set(format!(
                    "seed value of rng node `{}`",
                    attributes.name
                ))
            })?;
            backend.build_rng(RngRequest {
                distribution: attributes.distribution,
                bernoulli_probability,
                seeding: RngSeeding::Literal { seed: seed_value },
                y: self.base.handle(y)?,
            })?
        };

        self.base.push_operation(
            operation,
            &[
                attributes.seed.as_ref(),
                attributes.offset.as_ref(),
                attributes.y.as_ref(),
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
