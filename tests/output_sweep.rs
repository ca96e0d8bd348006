mod common;

use common::{add_one, iota_f32, output_sweep_harness, plus_one, FaultyBackend};
use layout_sweep::{
    create_scalar_relu, for_each_output_layout, ErrorSpec, ExecutionOptions, GraphBuilder,
    LayoutHarness, Literal, PrimitiveType, Shape, SweepError, SweepMode, SweepStatus,
};

fn pair_builder() -> GraphBuilder {
    let mut builder = GraphBuilder::new("pair");
    let x = builder.parameter(0, Shape::array(PrimitiveType::F32, &[2]), "x");
    let n = builder.parameter(1, Shape::scalar(PrimitiveType::S32), "n");
    builder.tuple(&[x, n]);
    builder
}

#[test]
fn sweeps_baseline_then_every_output_layout() {
    let harness = output_sweep_harness();
    let input = iota_f32(&[2, 3]);
    let argument = harness.upload(&input).expect("upload");
    let report = harness
        .compute_and_compare_literal_near_with_status(
            &add_one(&[2, 3]),
            &plus_one(&input),
            &[&argument],
            ErrorSpec::absolute(1e-6),
            None,
        )
        .expect("sweep");

    assert_eq!(report.mode, SweepMode::AllOutputLayouts);
    assert_eq!(report.status, SweepStatus::Done);
    assert_eq!(
        report.contexts(),
        vec![
            "",
            "Test with output layout: f32[2,3]{0,1}",
            "Test with output layout: f32[2,3]{1,0}",
        ]
    );
    assert_eq!(harness.backend().stats().expect("stats").executions, 3);
    let digests: Vec<&str> = report
        .records
        .iter()
        .map(|r| r.actual_digest.as_str())
        .collect();
    assert!(digests.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn caller_output_shape_is_ignored_during_output_sweep() {
    let harness = output_sweep_harness();
    let input = iota_f32(&[3, 2]);
    let argument = harness.upload(&input).expect("upload");
    let requested =
        layout_sweep::Shape::with_layout(layout_sweep::PrimitiveType::F32, &[3, 2], &[0, 1])
            .expect("shape");
    let report = harness
        .compute_and_compare_literal_with_status(
            &add_one(&[3, 2]),
            &plus_one(&input),
            &[&argument],
            Some(&requested),
        )
        .expect("sweep");
    assert_eq!(report.total(), 3);
    assert_eq!(report.records[0].context, "");
}

#[test]
fn scalar_output_has_a_single_layout() {
    let harness = output_sweep_harness();
    let argument = harness.upload(&Literal::r0(-2.5f32)).expect("upload");
    let relu = create_scalar_relu().expect("relu");
    let report = harness
        .compute_and_compare_literal_near_with_status(
            &relu,
            &Literal::r0(0.0f32),
            &[&argument],
            ErrorSpec::absolute(1e-6),
            None,
        )
        .expect("sweep");
    assert_eq!(
        report.contexts(),
        vec!["", "Test with output layout: f32[]{}"]
    );
    assert!(report.passed());
}

#[test]
fn corrupted_layout_fails_only_its_own_context() {
    let backend = FaultyBackend {
        corrupt_output_layout: Some(vec![0, 1]),
        ..FaultyBackend::default()
    };
    let mut harness = LayoutHarness::new(backend);
    harness.debug_options_mut().test_all_output_layouts = true;
    let input = iota_f32(&[2, 3]);
    let argument = harness.upload(&input).expect("upload");

    let report = harness
        .compute_and_compare_literal_with_status(
            &add_one(&[2, 3]),
            &plus_one(&input),
            &[&argument],
            None,
        )
        .expect("sweep");

    assert_eq!(report.status, SweepStatus::Failed);
    assert_eq!(report.total(), 3);
    let failed: Vec<&str> = report.failures().map(|r| r.context.as_str()).collect();
    assert_eq!(failed, vec!["Test with output layout: f32[2,3]{0,1}"]);
    let failure = report.records[1].failure.as_deref().expect("failure text");
    assert!(failure.contains("{0,0}"));
    assert!(report.failure_summary().contains("1 of 3"));
}

#[test]
#[should_panic(expected = "Test with output layout: f32[2,3]{0,1}")]
fn asserting_entry_point_lists_failed_contexts() {
    let backend = FaultyBackend {
        corrupt_output_layout: Some(vec![0, 1]),
        ..FaultyBackend::default()
    };
    let mut harness = LayoutHarness::new(backend);
    harness.debug_options_mut().test_all_output_layouts = true;
    let input = iota_f32(&[2, 3]);
    let argument = harness.upload(&input).expect("upload");
    harness.compute_and_compare_literal(&add_one(&[2, 3]), &plus_one(&input), &[&argument], None);
}

#[test]
fn execution_error_aborts_the_sweep() {
    let backend = FaultyBackend {
        fail_on_execution: Some(2),
        ..FaultyBackend::default()
    };
    let mut harness = LayoutHarness::new(backend);
    harness.debug_options_mut().test_all_output_layouts = true;
    let input = iota_f32(&[2, 3]);
    let argument = harness.upload(&input).expect("upload");

    let err = harness
        .compute_and_compare_literal_with_status(
            &add_one(&[2, 3]),
            &plus_one(&input),
            &[&argument],
            None,
        )
        .expect_err("injected failure");
    assert!(matches!(err, SweepError::Execution { .. }));
    assert_eq!(harness.backend().executions(), 2);
}

#[test]
fn driver_reports_execution_count() {
    let backend = FaultyBackend::default();
    let input = iota_f32(&[2, 2, 2]);
    let argument = layout_sweep::Backend::transfer_to_server(&backend, &input).expect("upload");
    let mut contexts = Vec::new();
    let executions = for_each_output_layout(
        &backend,
        &add_one(&[2, 2, 2]),
        &[&argument],
        &ExecutionOptions::default(),
        input.shape(),
        |actual, context| {
            assert_eq!(actual.to_vec::<f32>()?, plus_one(&input).to_vec::<f32>()?);
            contexts.push(context.to_string());
            Ok(())
        },
    )
    .expect("sweep");
    assert_eq!(executions, 7);
    assert_eq!(contexts.len(), 7);
    assert_eq!(backend.executions(), 7);
}

#[test]
fn tuple_results_run_only_the_baseline() {
    let harness = output_sweep_harness();
    let builder = pair_builder();
    let x_handle = harness.upload(&Literal::r1(&[0.5f32, 1.5])).expect("upload");
    let n_handle = harness.upload(&Literal::r0(3i32)).expect("upload");
    let expected = Literal::tuple(vec![Literal::r1(&[0.5f32, 1.5]), Literal::r0(3i32)]);

    let report = harness
        .compute_and_compare_literal_with_status(&builder, &expected, &[&x_handle, &n_handle], None)
        .expect("tuple result");
    assert_eq!(report.mode, SweepMode::Baseline);
    assert_eq!(report.contexts(), vec![""]);
    assert!(report.passed(), "{}", report.failure_summary());

    harness.compute_and_compare_tuple(&builder, &expected, &[&x_handle, &n_handle]);
    harness.compute_and_compare_tuple_near(
        &builder,
        &expected,
        &[&x_handle, &n_handle],
        ErrorSpec::absolute(1e-6),
    );
    assert_eq!(harness.backend().stats().expect("stats").executions, 3);
}
