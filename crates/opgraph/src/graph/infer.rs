//! Shape and stride inference helpers shared by all node kinds.
//!
//! Every helper fills only what the caller left empty: a non-empty shape or
//! stride is never overwritten. Stride generation runs after the shape is
//! final because it is a pure function of the shape.

use crate::error::{GraphError, GraphResult};
use crate::tensor::TensorRef;

/// Generates a packed row-major stride for the given shape.
pub fn generate_stride(dim: &[i64]) -> Vec<i64> {
    let mut stride = vec![1i64; dim.len()];
    for axis in (0..dim.len().saturating_sub(1)).rev() {
        stride[axis] = stride[axis + 1] * dim[axis + 1];
    }
    stride
}

/// Reads a tensor's shape, failing when it is still unknown.
pub(crate) fn known_dim(tensor: &TensorRef, role: &str) -> GraphResult<Vec<i64>> {
    let attributes = tensor.read();
    if attributes.dim().is_empty() {
        return Err(GraphError::shape_inference(format!(
            "shape of `{role}` ({}) is unknown",
            attributes.name()
        )));
    }
    Ok(attributes.dim().to_vec())
}

fn fill_stride(tensor: &TensorRef) {
    let mut attributes = tensor.write();
    if attributes.stride().is_empty() && !attributes.dim().is_empty() {
        let stride = generate_stride(attributes.dim());
        attributes.set_stride(stride);
    }
}

/// Copies the primary input's shape onto `tensor` when its shape is unset,
/// then fills the stride.
pub(crate) fn infer_like(primary_dim: &[i64], tensor: &TensorRef) {
    {
        let mut attributes = tensor.write();
        if attributes.dim().is_empty() {
            attributes.set_dim(primary_dim.to_vec());
        }
    }
    fill_stride(tensor);
}

/// Per-channel inference: rank of the primary input, all dimensions 1
/// except the channel axis (index 1), which is copied from the primary.
/// Used for normalization statistics, scale and bias tensors.
pub(crate) fn infer_per_channel(primary_dim: &[i64], tensor: &TensorRef) {
    {
        let mut attributes = tensor.write();
        if attributes.dim().is_empty() {
            let mut dim = vec![1i64; primary_dim.len()];
            if primary_dim.len() > 1 {
                dim[1] = primary_dim[1];
            }
            attributes.set_dim(dim);
        }
    }
    fill_stride(tensor);
}

/// Scalar inference: all-ones shape at the primary input's rank. Used for
/// epsilon and momentum style configuration tensors.
pub(crate) fn infer_scalar(primary_dim: &[i64], tensor: &TensorRef) {
    {
        let mut attributes = tensor.write();
        if attributes.dim().is_empty() {
            attributes.set_dim(vec![1i64; primary_dim.len()]);
        }
    }
    fill_stride(tensor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorAttributes;

    #[test]
    fn row_major_stride() {
        assert_eq!(generate_stride(&[4, 3, 16, 16]), vec![768, 256, 16, 1]);
        assert_eq!(generate_stride(&[7]), vec![1]);
        assert_eq!(generate_stride(&[]), Vec::<i64>::new());
    }

    #[test]
    fn stride_fill_is_idempotent() {
        let tensor = TensorRef::new(TensorAttributes::new("t").with_dim([2, 3]));
        fill_stride(&tensor);
        let first = tensor.read().stride().to_vec();
        fill_stride(&tensor);
        assert_eq!(tensor.read().stride(), first.as_slice());
    }

    #[test]
    fn caller_stride_is_preserved() {
        let tensor = TensorRef::new(
            TensorAttributes::new("t").with_dim([2, 3]).with_stride([1, 2]),
        );
        fill_stride(&tensor);
        assert_eq!(tensor.read().stride(), &[1, 2]);
    }

    #[test]
    fn per_channel_copies_channel_axis() {
        let tensor = TensorRef::new(TensorAttributes::new("scale"));
        infer_per_channel(&[4, 32, 16, 16], &tensor);
        assert_eq!(tensor.read().dim(), &[1, 32, 1, 1]);
        assert_eq!(tensor.read().stride(), &[32, 1, 1, 1]);
    }
}
