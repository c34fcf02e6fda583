//! Graph-wide defaults inherited by every node.

use serde::{Deserialize, Serialize};

use crate::tensor::DType;

/// Resolved data-type defaults shared by all nodes of one graph build.
///
/// Tensors whose element type is left unset pick it up from here at the
/// start of property inference: virtual tensors get the intermediate dtype,
/// real tensors the i/o dtype, and compute parameters the compute dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub io_data_type: DType,
    pub intermediate_data_type: DType,
    pub compute_data_type: DType,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            io_data_type: DType::F32,
            intermediate_data_type: DType::F32,
            compute_data_type: DType::F32,
        }
    }
}
