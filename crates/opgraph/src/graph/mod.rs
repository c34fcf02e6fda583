//! Node-level graph frontend: attribute bundles, the shared lifecycle, and
//! one node implementation per operator kind.

pub mod attributes;
pub mod batchnorm;
pub mod batchnorm_backward;
pub mod context;
pub mod conv_dgrad;
pub mod infer;
pub mod node;
pub mod rng;

pub use attributes::{
    BatchnormAttributes, BatchnormBackwardAttributes, ConvDgradAttributes, RngAttributes,
};
pub use batchnorm::BatchnormNode;
pub use batchnorm_backward::BatchnormBackwardNode;
pub use context::Context;
pub use conv_dgrad::ConvDgradNode;
pub use infer::generate_stride;
pub use node::{build_node, GraphNode, NodeKind, OperationRecord};
pub use rng::RngNode;
