//! Shared tensor descriptors and the process-wide identifier counter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::graph::Context;
use crate::tensor::DType;

/// Process-unique tensor identifier handed to the execution backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TensorUid(pub u64);

impl fmt::Display for TensorUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Monotonic and never reset, so uids stay unique even when several graphs
// are built concurrently.
static UID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocates the next process-unique tensor identifier.
pub fn create_uid() -> TensorUid {
    TensorUid(UID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Semantic description of one tensor slot in the graph.
///
/// Shape and stride may be left empty by the caller and back-filled by
/// property inference; once non-empty they are never overwritten. The uid is
/// assigned exactly once during the identifier-assignment stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TensorAttributes {
    name: String,
    data_type: Option<DType>,
    dim: Vec<i64>,
    stride: Vec<i64>,
    is_virtual: bool,
    uid: Option<TensorUid>,
}

impl TensorAttributes {
    pub fn new(name: impl Into<String>) -> Self {
        TensorAttributes {
            name: name.into(),
            ..TensorAttributes::default()
        }
    }

    pub fn with_data_type(mut self, data_type: DType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn with_dim(mut self, dim: impl Into<Vec<i64>>) -> Self {
        self.dim = dim.into();
        self
    }

    /// Sets the stride explicitly. The stride may be supplied before the
    /// shape, so rank agreement between the two is not checked here; the
    /// backend enforces it when the descriptor is materialized.
    pub fn with_stride(mut self, stride: impl Into<Vec<i64>>) -> Self {
        self.stride = stride.into();
        self
    }

    /// Marks the tensor as an intermediate that is never materialized to the
    /// backend.
    pub fn with_virtual(mut self, is_virtual: bool) -> Self {
        self.is_virtual = is_virtual;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> Option<DType> {
        self.data_type
    }

    pub fn dim(&self) -> &[i64] {
        &self.dim
    }

    pub fn stride(&self) -> &[i64] {
        &self.stride
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn uid(&self) -> Option<TensorUid> {
        self.uid
    }

    pub fn set_dim(&mut self, dim: Vec<i64>) {
        self.dim = dim;
    }

    pub fn set_stride(&mut self, stride: Vec<i64>) {
        self.stride = stride;
    }

    /// Assigns the identifier unless one is already set; an assigned uid is
    /// immutable for the node's lifetime.
    pub fn set_uid(&mut self, uid: TensorUid) {
        if self.uid.is_none() {
            self.uid = Some(uid);
        }
    }

    /// Back-fills the element type from the graph-wide context defaults.
    /// Virtual tensors receive the intermediate dtype, real tensors the i/o
    /// dtype. Caller-supplied dtypes are left untouched.
    pub(crate) fn fill_data_type(&mut self, context: &Context) {
        if self.data_type.is_none() {
            self.data_type = Some(if self.is_virtual {
                context.intermediate_data_type
            } else {
                context.io_data_type
            });
        }
    }
}

/// Shared-ownership handle to a [`TensorAttributes`].
///
/// Descriptors are shared between the attribute bundle that declared them,
/// the owning node's uid-to-handle map, and any adjacent node that consumes
/// the same tensor; the descriptor lives as long as its longest holder.
#[derive(Debug, Clone)]
pub struct TensorRef(Arc<RwLock<TensorAttributes>>);

impl TensorRef {
    pub fn new(attributes: TensorAttributes) -> Self {
        TensorRef(Arc::new(RwLock::new(attributes)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TensorAttributes> {
        self.0.read().expect("tensor descriptor lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, TensorAttributes> {
        self.0.write().expect("tensor descriptor lock poisoned")
    }

    pub fn uid(&self) -> Option<TensorUid> {
        self.read().uid()
    }

    pub fn is_virtual(&self) -> bool {
        self.read().is_virtual()
    }

    /// Assigns a fresh process-unique identifier unless one is already set.
    pub fn assign_uid(&self) {
        let mut attributes = self.write();
        if attributes.uid().is_none() {
            attributes.set_uid(create_uid());
        }
    }
}

impl From<TensorAttributes> for TensorRef {
    fn from(attributes: TensorAttributes) -> Self {
        TensorRef::new(attributes)
    }
}

impl Serialize for TensorRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.read().serialize(serializer)
    }
}
