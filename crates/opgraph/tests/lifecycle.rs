use anyhow::Result;
use opgraph::backend::spec::NormFwdPhase;
use opgraph::graph::{
    build_node, generate_stride, BatchnormAttributes, BatchnormNode, Context, ConvDgradAttributes,
    ConvDgradNode,
};
use opgraph::tensor::{DType, TensorAttributes, TensorRef};
use opgraph::{GraphError, GraphNode};
use opgraph_backend_ref::RefBackend;

fn tensor(name: &str, dim: &[i64]) -> TensorRef {
    TensorRef::new(
        TensorAttributes::new(name)
            .with_dim(dim.to_vec())
            .with_stride(generate_stride(dim)),
    )
}

fn unset(name: &str) -> TensorRef {
    TensorRef::new(TensorAttributes::new(name))
}

fn batchnorm_attributes(name: &str) -> BatchnormAttributes {
    BatchnormAttributes {
        name: name.to_owned(),
        forward_phase: Some(NormFwdPhase::Inference),
        x: Some(tensor("x", &[2, 4, 8, 8])),
        scale: Some(unset("scale")),
        bias: Some(unset("bias")),
        prev_running_mean: Some(unset("prev_running_mean")),
        prev_running_var: Some(unset("prev_running_var")),
        epsilon: Some(unset("epsilon")),
        momentum: Some(unset("momentum")),
        y: Some(unset("y")),
        mean: Some(unset("mean")),
        inv_variance: Some(unset("inv_variance")),
        next_running_mean: Some(unset("next_running_mean")),
        next_running_var: Some(unset("next_running_var")),
    }
}

#[test]
fn uids_are_unique_across_consecutive_builds() -> Result<()> {
    let backend = RefBackend::new();
    let mut first = BatchnormNode::new(batchnorm_attributes("bn_a"), Context::default());
    let mut second = BatchnormNode::new(batchnorm_attributes("bn_b"), Context::default());

    build_node(&mut first, &backend)?;
    build_node(&mut second, &backend)?;

    let mut all: Vec<_> = backend
        .created_tensors()
        .into_iter()
        .map(|tensor| tensor.uid)
        .collect();
    assert_eq!(all.len(), 24);
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 24);
    Ok(())
}

#[test]
fn already_identified_tensors_keep_their_uid() -> Result<()> {
    let backend = RefBackend::new();
    let attributes = batchnorm_attributes("bn_shared");
    let x = attributes.x.clone().expect("x present");
    x.assign_uid();
    let before = x.uid().expect("uid assigned");

    let mut node = BatchnormNode::new(attributes, Context::default());
    build_node(&mut node, &backend)?;

    assert_eq!(x.uid(), Some(before));
    Ok(())
}

#[test]
fn backend_rejection_aborts_the_build_with_its_status() {
    let backend = RefBackend::rejecting("scale");
    let mut node = BatchnormNode::new(batchnorm_attributes("bn_fail"), Context::default());

    let err = build_node(&mut node, &backend).unwrap_err();
    match err {
        GraphError::Backend(backend_err) => {
            assert_eq!(backend_err.code, 2100);
            assert!(backend_err.message.contains("scale"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    // Creation stops at the first rejection; scale comes sixth in the
    // creation order.
    assert_eq!(backend.created_tensors().len(), 5);
    assert_eq!(backend.operations_built(), 0);
}

#[test]
fn mismatched_stride_is_rejected_at_tensor_creation() {
    let backend = RefBackend::new();
    let mut attributes = batchnorm_attributes("bn_bad_stride");
    // Rank agreement between shape and stride is deferred to the backend's
    // descriptor check, so the build fails there, not earlier.
    attributes.x = Some(TensorRef::new(
        TensorAttributes::new("x")
            .with_dim([2, 4, 8, 8])
            .with_stride([1]),
    ));
    let mut node = BatchnormNode::new(attributes, Context::default());

    let err = build_node(&mut node, &backend).unwrap_err();
    match err {
        GraphError::Backend(backend_err) => {
            assert_eq!(backend_err.code, 2002);
            assert!(backend_err.message.contains("stride"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(backend.operations_built(), 0);
}

#[test]
fn serialize_is_side_effect_free_and_repeatable() -> Result<()> {
    let backend = RefBackend::new();
    let mut node = BatchnormNode::new(batchnorm_attributes("bn_dump"), Context::default());

    let before_build = node.serialize();
    assert_eq!(before_build["kind"], "batchnorm_forward");

    build_node(&mut node, &backend)?;

    let first = node.serialize();
    let second = node.serialize();
    assert_eq!(first, second);
    assert_eq!(first["attributes"]["name"], "bn_dump");
    assert_eq!(first["attributes"]["forward_phase"], "inference");
    // Inferred properties show up in the dump once the build ran.
    assert_eq!(
        first["attributes"]["y"]["dim"],
        serde_json::json!([2, 4, 8, 8])
    );
    Ok(())
}

#[test]
fn context_defaults_flow_into_unset_dtypes() -> Result<()> {
    let backend = RefBackend::new();
    let context = Context {
        io_data_type: DType::F16,
        intermediate_data_type: DType::F32,
        compute_data_type: DType::F32,
    };
    // The filter carries an explicit dtype, which wins over the context
    // default; the other tensors pick up the i/o dtype.
    let w = TensorRef::new(
        TensorAttributes::new("w")
            .with_data_type(DType::BF16)
            .with_dim([8, 4, 3, 3])
            .with_stride(generate_stride(&[8, 4, 3, 3])),
    );
    let attributes = ConvDgradAttributes {
        name: "dgrad_ctx".to_owned(),
        w: Some(w),
        dy: Some(tensor("dy", &[2, 8, 6, 6])),
        dx: Some(unset("dx")),
        padding: vec![0, 0],
        stride: vec![1, 1],
        dilation: vec![1, 1],
        compute_data_type: None,
    };
    let mut node = ConvDgradNode::new(attributes, context);

    build_node(&mut node, &backend)?;

    let created = backend.created_tensors();
    let w = created
        .iter()
        .find(|tensor| tensor.name == "w")
        .expect("w created");
    let dy = created
        .iter()
        .find(|tensor| tensor.name == "dy")
        .expect("dy created");
    assert_eq!(w.data_type, DType::BF16);
    assert_eq!(dy.data_type, DType::F16);
    assert_eq!(node.attributes.compute_data_type, Some(DType::F32));
    Ok(())
}
