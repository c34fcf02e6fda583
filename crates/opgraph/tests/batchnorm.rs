use anyhow::Result;
use opgraph::backend::spec::NormFwdPhase;
use opgraph::graph::{build_node, generate_stride, BatchnormAttributes, BatchnormNode, Context};
use opgraph::tensor::{TensorAttributes, TensorRef, TensorUid};
use opgraph::{GraphError, GraphNode};
use opgraph_backend_ref::{RefBackend, RefOperation};

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

/// Training-mode bundle with X fully specified and everything else left for
/// property inference.
fn training_attributes() -> BatchnormAttributes {
    BatchnormAttributes {
        name: "bn0".to_owned(),
        forward_phase: Some(NormFwdPhase::Training),
        x: Some(tensor("x", &[4, 32, 16, 16])),
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

fn uid_of(role: &Option<TensorRef>) -> TensorUid {
    role.as_ref()
        .and_then(|tensor| tensor.uid())
        .expect("uid assigned during build")
}

#[test]
fn training_build_lowers_one_operation() -> Result<()> {
    let backend = RefBackend::new();
    let mut node = BatchnormNode::new(training_attributes(), Context::default());

    build_node(&mut node, &backend)?;

    assert_eq!(backend.operations_built(), 1);
    let records = node.operations();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].uids.len(), 12);
    match &records[0].operation {
        RefOperation::NormForward { phase, x, y, .. } => {
            assert_eq!(*phase, NormFwdPhase::Training);
            assert_eq!(*x, uid_of(&node.attributes.x));
            assert_eq!(*y, uid_of(&node.attributes.y));
        }
        other => panic!("unexpected operation {other:?}"),
    }
    Ok(())
}

#[test]
fn output_and_statistics_shapes_are_inferred() -> Result<()> {
    let backend = RefBackend::new();
    let mut node = BatchnormNode::new(training_attributes(), Context::default());

    build_node(&mut node, &backend)?;

    let attributes = &node.attributes;
    let y = attributes.y.as_ref().expect("y present");
    assert_eq!(y.read().dim(), &[4, 32, 16, 16]);
    assert_eq!(y.read().stride(), &[8192, 256, 16, 1]);

    for role in [
        &attributes.scale,
        &attributes.bias,
        &attributes.mean,
        &attributes.inv_variance,
        &attributes.prev_running_mean,
        &attributes.prev_running_var,
        &attributes.next_running_mean,
        &attributes.next_running_var,
    ] {
        let tensor = role.as_ref().expect("role present");
        assert_eq!(tensor.read().dim(), &[1, 32, 1, 1]);
        assert_eq!(tensor.read().stride(), &[32, 1, 1, 1]);
    }

    for role in [&attributes.epsilon, &attributes.momentum] {
        let tensor = role.as_ref().expect("role present");
        assert_eq!(tensor.read().dim(), &[1, 1, 1, 1]);
    }
    Ok(())
}

#[test]
fn uids_follow_the_declaration_order() -> Result<()> {
    let backend = RefBackend::new();
    let mut node = BatchnormNode::new(training_attributes(), Context::default());

    build_node(&mut node, &backend)?;

    let attributes = &node.attributes;
    let ordered = [
        uid_of(&attributes.x),
        uid_of(&attributes.scale),
        uid_of(&attributes.bias),
        uid_of(&attributes.prev_running_mean),
        uid_of(&attributes.prev_running_var),
        uid_of(&attributes.epsilon),
        uid_of(&attributes.momentum),
        uid_of(&attributes.y),
        uid_of(&attributes.mean),
        uid_of(&attributes.inv_variance),
        uid_of(&attributes.next_running_mean),
        uid_of(&attributes.next_running_var),
    ];
    assert!(ordered.windows(2).all(|pair| pair[0] < pair[1]));
    Ok(())
}

#[test]
fn tensors_are_created_in_a_fixed_order() -> Result<()> {
    let backend = RefBackend::new();
    let mut node = BatchnormNode::new(training_attributes(), Context::default());

    build_node(&mut node, &backend)?;

    let names: Vec<String> = backend
        .created_tensors()
        .into_iter()
        .map(|tensor| tensor.name)
        .collect();
    assert_eq!(
        names,
        [
            "x",
            "prev_running_mean",
            "prev_running_var",
            "epsilon",
            "momentum",
            "scale",
            "bias",
            "y",
            "mean",
            "inv_variance",
            "next_running_mean",
            "next_running_var",
        ]
    );
    Ok(())
}

#[test]
fn missing_phase_fails_validation_before_any_backend_call() {
    let backend = RefBackend::new();
    let mut attributes = training_attributes();
    attributes.forward_phase = None;
    let mut node = BatchnormNode::new(attributes, Context::default());

    let err = build_node(&mut node, &backend).unwrap_err();
    assert!(matches!(err, GraphError::AttributeNotSet(_)));
    assert!(backend.created_tensors().is_empty());
    assert_eq!(backend.operations_built(), 0);
}

#[test]
fn virtual_tensors_are_dropped_from_the_operation_uid_list() -> Result<()> {
    let backend = RefBackend::new();
    let mut attributes = training_attributes();
    attributes.mean = Some(TensorRef::new(
        TensorAttributes::new("mean").with_virtual(true),
    ));
    attributes.inv_variance = Some(TensorRef::new(
        TensorAttributes::new("inv_variance").with_virtual(true),
    ));
    let mut node = BatchnormNode::new(attributes, Context::default());

    build_node(&mut node, &backend)?;

    // Virtual tensors are still materialized and wired into the operation,
    // only the execution-time binding list skips them.
    assert_eq!(backend.created_tensors().len(), 12);
    let record = &node.operations()[0];
    assert_eq!(record.uids.len(), 10);
    let mean_uid = uid_of(&node.attributes.mean);
    let inv_variance_uid = uid_of(&node.attributes.inv_variance);
    assert!(!record.uids.contains(&mean_uid));
    assert!(!record.uids.contains(&inv_variance_uid));
    Ok(())
}

#[test]
fn caller_supplied_shapes_are_never_overwritten() -> Result<()> {
    let backend = RefBackend::new();
    let mut attributes = training_attributes();
    attributes.y = Some(
        TensorRef::new(
            TensorAttributes::new("y")
                .with_dim([4, 32, 16, 16])
                .with_stride([1, 4, 128, 2048]),
        ),
    );
    let mut node = BatchnormNode::new(attributes, Context::default());

    build_node(&mut node, &backend)?;

    let y = node.attributes.y.as_ref().expect("y present");
    assert_eq!(y.read().stride(), &[1, 4, 128, 2048]);
    Ok(())
}
