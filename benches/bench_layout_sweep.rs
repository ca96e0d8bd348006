use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use layout_sweep::telemetry::{jsonl_recorder_from_env, JsonlSink, TelemetryRecorder};
use layout_sweep::{
    ComputationBuilder, ErrorSpec, GraphBuilder, LayoutHarness, LayoutPermutations, Literal,
    LocalClient, PrimitiveType, Shape,
};

fn bench_enumeration(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_enumeration");
    for &rank in &[2usize, 4, 6, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(rank), &rank, |b, &rank| {
            b.iter(|| LayoutPermutations::new(rank).count())
        });
    }
    group.finish();
}

fn bench_relayout(c: &mut Criterion) {
    let telemetry = init_telemetry();
    let mut group = c.benchmark_group("relayout");
    for &rank in &[2usize, 3, 4] {
        let dims = vec![6usize; rank];
        let count: usize = dims.iter().product();
        let values: Vec<f32> = (0..count).map(|v| v as f32).collect();
        let literal = Literal::from_vec(&dims, values).expect("literal should build");
        group.bench_with_input(BenchmarkId::from_parameter(rank), &literal, |b, literal| {
            b.iter_batched(
                || LayoutPermutations::new(rank),
                |layouts| {
                    let _timer = telemetry.as_ref().map(|recorder| {
                        recorder
                            .timer("bench_relayout")
                            .with_tag("rank", format!("{rank}"))
                    });
                    for layout in layouts {
                        let _ = literal.relayout(&layout).expect("relayout should succeed");
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_input_sweep(c: &mut Criterion) {
    let mut builder = GraphBuilder::new("bench_add");
    let x = builder.parameter(0, Shape::array(PrimitiveType::F32, &[4, 4, 4]), "x");
    let y = builder.parameter(1, Shape::array(PrimitiveType::F32, &[4, 4, 4]), "y");
    builder.add(x, y);
    let computation = builder.build().expect("computation should build");

    let mut harness = LayoutHarness::new(LocalClient::new());
    harness.debug_options_mut().test_all_input_layouts = true;
    let values: Vec<f32> = (0..64).map(|v| v as f32).collect();
    let input = Literal::from_vec(&[4, 4, 4], values.clone()).expect("input should build");
    let doubled: Vec<f32> = values.iter().map(|v| v * 2.0).collect();
    let expected = Literal::from_vec(&[4, 4, 4], doubled).expect("expected should build");
    let argument = harness.upload(&input).expect("upload should succeed");

    c.bench_function("input_sweep_rank3_pair", |b| {
        b.iter(|| {
            harness
                .compute_and_compare_literal_near_with_status(
                    &computation,
                    &expected,
                    &[&argument, &argument],
                    ErrorSpec::absolute(1e-6),
                    None,
                )
                .expect("sweep should run")
        })
    });
}

criterion_group!(benches, bench_enumeration, bench_relayout, bench_input_sweep);
criterion_main!(benches);

fn init_telemetry() -> Option<TelemetryRecorder<JsonlSink>> {
    match jsonl_recorder_from_env("LAYOUT_SWEEP_BENCH_TELEMETRY") {
        Ok(recorder) => recorder,
        Err(err) => {
            eprintln!("telemetry disabled: {err:?}");
            None
        }
    }
}
