//! Execution-backend contract consumed by the node build pipeline.

pub mod spec;

pub use spec::{BackendError, BackendResult, ExecutionBackend};
