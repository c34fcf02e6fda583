//! Declarative graph frontend for tensor operators.
//!
//! Callers describe each operator as an attribute bundle of tensor roles and
//! scalar parameters, then drive a fixed five-stage lifecycle (validate,
//! infer properties, assign uids, create tensors, create operations) that
//! completes the description and lowers it against a pluggable
//! [`backend::ExecutionBackend`]. The frontend never executes anything
//! itself.

pub mod backend;
pub mod error;
pub mod graph;
pub mod tensor;

pub use backend::{BackendError, BackendResult, ExecutionBackend};
pub use error::{GraphError, GraphResult};
pub use graph::{build_node, Context, GraphNode, NodeKind, OperationRecord};
pub use tensor::{create_uid, DType, TensorAttributes, TensorRef, TensorUid};
