//! Node lifecycle shared by every operator kind.
//!
//! A node wraps one attribute bundle and walks a fixed five-stage pipeline:
//! validate, infer properties, assign uids, create tensors, create
//! operations. The stages run exactly once, in that order, driven by the
//! graph builder; any failure aborts the node build and the enclosing graph
//! build with it. [`build_node`] runs the stages in contract order for a
//! single node.

use std::collections::HashMap;

use serde::Serialize;

use crate::backend::spec::ExecutionBackend;
use crate::error::{GraphError, GraphResult};
use crate::graph::Context;
use crate::tensor::{TensorRef, TensorUid};

/// Operator kind tag carried by every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    BatchnormForward,
    BatchnormBackward,
    ConvDgrad,
    Rng,
}

/// One lowered backend operation together with the identifiers of the
/// non-virtual, present tensors the backend must bind at execution time.
#[derive(Debug, Clone)]
pub struct OperationRecord<Op> {
    pub operation: Op,
    pub uids: Vec<TensorUid>,
}

/// Lifecycle implemented by every operator-kind node.
///
/// The stage methods mirror the pipeline order; `serialize` sits outside the
/// lifecycle, is side-effect-free, and never fails.
pub trait GraphNode<B: ExecutionBackend> {
    /// Operator kind fixed at construction.
    fn kind(&self) -> NodeKind;

    /// Checks operator preconditions against caller-supplied fields only.
    /// Must not mutate state.
    fn validate(&self) -> GraphResult<()>;

    /// Fills every unset output/auxiliary shape, and every unset stride once
    /// its shape is known. Caller-supplied shapes and strides are never
    /// overwritten.
    fn infer_properties(&mut self) -> GraphResult<()>;

    /// Assigns process-unique identifiers to every mandatory and
    /// present-optional tensor, in a fixed per-kind order. Identifiers that
    /// are already set are left untouched.
    fn assign_uids(&mut self) -> GraphResult<()>;

    /// Materializes a backend tensor handle for every identified tensor and
    /// records it in the node-local uid-to-handle map.
    fn create_tensors(&mut self, backend: &B) -> GraphResult<()>;

    /// Builds the backend operation descriptors and appends one
    /// [`OperationRecord`] per lowered operation.
    fn create_operations(&mut self, backend: &B) -> GraphResult<()>;

    /// Dumps the attribute bundle as a structured record for diagnostics
    /// and replay.
    fn serialize(&self) -> serde_json::Value;

    /// Operation records produced by `create_operations`.
    fn operations(&self) -> &[OperationRecord<B::Operation>];
}

/// Runs the five lifecycle stages of one node in contract order,
/// fail-fast.
pub fn build_node<B: ExecutionBackend>(
    node: &mut dyn GraphNode<B>,
    backend: &B,
) -> GraphResult<()> {
    node.validate()?;
    node.infer_properties()?;
    node.assign_uids()?;
    node.create_tensors(backend)?;
    node.create_operations(backend)
}

/// Bookkeeping shared by all node implementations: the resolved context,
/// the uid-to-handle map populated during tensor creation, and the lowered
/// operation records.
pub(crate) struct NodeBase<B: ExecutionBackend> {
    pub(crate) context: Context,
    tensors: HashMap<TensorUid, B::TensorHandle>,
    operations: Vec<OperationRecord<B::Operation>>,
}

impl<B: ExecutionBackend> NodeBase<B> {
    pub(crate) fn new(context: Context) -> Self {
        NodeBase {
            context,
            tensors: HashMap::new(),
            operations: Vec::new(),
        }
    }

    /// Asks the backend to materialize a handle for an identified tensor and
    /// registers it. Backend rejections propagate unchanged.
    pub(crate) fn create_tensor(&mut self, backend: &B, tensor: &TensorRef) -> GraphResult<()> {
        let attributes = tensor.read();
        let uid = attributes.uid().ok_or_else(|| {
            GraphError::attribute_not_set(format!(
                "uid of tensor `{}` before tensor creation",
                attributes.name()
            ))
        })?;
        let handle = backend.create_tensor(&attributes)?;
        self.tensors.insert(uid, handle);
        Ok(())
    }

    /// Looks up the native handle registered for a tensor.
    pub(crate) fn handle(&self, tensor: &TensorRef) -> GraphResult<&B::TensorHandle> {
        let attributes = tensor.read();
        attributes
            .uid()
            .and_then(|uid| self.tensors.get(&uid))
            .ok_or_else(|| {
                GraphError::attribute_not_set(format!(
                    "backend tensor for `{}`",
                    attributes.name()
                ))
            })
    }

    /// Appends an operation record, restricting the uid list to tensors
    /// that are present and not virtual.
    pub(crate) fn push_operation(
        &mut self,
        operation: B::Operation,
        involved: &[Option<&TensorRef>],
    ) {
        let uids = involved
            .iter()
            .flatten()
            .filter(|tensor| !tensor.is_virtual())
            .filter_map(|tensor| tensor.uid())
            .collect();
        self.operations.push(OperationRecord { operation, uids });
    }

    pub(crate) fn operations(&self) -> &[OperationRecord<B::Operation>] {
        &self.operations
    }
}
