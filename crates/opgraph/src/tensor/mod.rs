//! Tensor descriptors shared across the graph and their identifier space.

mod attributes;
mod dtype;

pub use attributes::{create_uid, TensorAttributes, TensorRef, TensorUid};
pub use dtype::DType;
