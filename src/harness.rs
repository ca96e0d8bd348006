//! Compute-and-compare entry points.
//!
//! A [`LayoutHarness`] builds a computation, runs it under the layout sweep selected by
//! its [`DebugOptions`], and compares every result with the expected literal. Comparison
//! failures are collected into a [`SweepReport`]; build, execution and transfer errors
//! end the invocation.

use std::time::Instant;

use log::{debug, info, warn};

use crate::client::{Backend, ComputationBuilder, ExecutionOptions};
use crate::comparison::{
    expect_equal_tuple, expect_near_tuple, ComparisonFailure, ComparisonMode, ErrorSpec,
};
use crate::config::{DebugOptions, HarnessConfig};
use crate::error::{Result, SweepError};
use crate::interpreter::{Computation, GraphBuilder, LocalClient};
use crate::literal::{ArrayData, Literal};
use crate::report::{ComparisonRecord, SweepMode, SweepReport};
use crate::shape::{PrimitiveType, Shape};
use crate::sweep::{
    execute_with_output_layout, for_each_input_layout_combination, for_each_output_layout,
    input_layout_context,
};
use crate::telemetry::{jsonl_recorder, JsonlSink, TelemetryEvent, TelemetryRecorder};

#[derive(Debug, Clone, Copy)]
struct Comparator {
    mode: ComparisonMode,
    tuples_only: bool,
}

impl Comparator {
    fn compare(
        &self,
        expected: &Literal,
        actual: &Literal,
        context: &str,
    ) -> std::result::Result<(), ComparisonFailure> {
        match (self.tuples_only, self.mode) {
            (false, mode) => mode.compare(expected, actual, context),
            (true, ComparisonMode::Exact) => expect_equal_tuple(expected, actual, context),
            (true, ComparisonMode::Near(spec)) => expect_near_tuple(expected, actual, spec, context),
        }
    }
}

pub struct LayoutHarness<B: Backend> {
    backend: B,
    options: ExecutionOptions,
    telemetry: Option<TelemetryRecorder<JsonlSink>>,
}

impl LayoutHarness<LocalClient> {
    /// Harness over a fresh reference backend, configured from the environment.
    pub fn local() -> Result<Self> {
        Self::from_env(LocalClient::new())
    }
}

impl<B: Backend> LayoutHarness<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            options: ExecutionOptions::new(HarnessConfig::default().debug_options),
            telemetry: None,
        }
    }

    pub fn with_config(backend: B, config: &HarnessConfig) -> Result<Self> {
        let telemetry = match &config.telemetry_path {
            Some(path) => Some(jsonl_recorder(path).map_err(|err| SweepError::Telemetry {
                op: "harness.with_config",
                msg: format!("cannot open {}: {err}", path.display()),
            })?),
            None => None,
        };
        Ok(Self {
            backend,
            options: ExecutionOptions::new(config.debug_options.clone()),
            telemetry,
        })
    }

    pub fn from_env(backend: B) -> Result<Self> {
        Self::with_config(backend, &HarnessConfig::from_env()?)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn debug_options(&self) -> &DebugOptions {
        &self.options.debug_options
    }

    pub fn debug_options_mut(&mut self) -> &mut DebugOptions {
        &mut self.options.debug_options
    }

    pub fn set_telemetry(&mut self, recorder: Option<TelemetryRecorder<JsonlSink>>) {
        self.telemetry = recorder;
    }

    /// Upload `literal` to the backend.
    pub fn upload(&self, literal: &Literal) -> Result<B::Handle> {
        self.backend.transfer_to_server(literal)
    }

    pub fn execute<C>(&self, builder: &C, arguments: &[&B::Handle]) -> Result<B::Handle>
    where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        let computation = builder.build()?;
        self.backend.execute(&computation, arguments, &self.options)
    }

    pub fn execute_and_transfer<C>(
        &self,
        builder: &C,
        arguments: &[&B::Handle],
        shape_with_output_layout: Option<&Shape>,
    ) -> Result<Literal>
    where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        let computation = builder.build()?;
        execute_with_output_layout(
            &self.backend,
            &computation,
            arguments,
            &self.options,
            shape_with_output_layout,
        )
    }

    /// The result dump, or the error text when building or executing fails.
    pub fn execute_to_string<C>(&self, builder: &C, arguments: &[&B::Handle]) -> String
    where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        match self.execute_and_transfer(builder, arguments, None) {
            Ok(literal) => literal.to_string(),
            Err(err) => err.to_string(),
        }
    }

    pub fn compute_and_compare_literal_with_status<C>(
        &self,
        builder: &C,
        expected: &Literal,
        arguments: &[&B::Handle],
        shape_with_layout: Option<&Shape>,
    ) -> Result<SweepReport>
    where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        let comparator = Comparator {
            mode: ComparisonMode::Exact,
            tuples_only: false,
        };
        self.run(builder, expected, arguments, shape_with_layout, comparator)
    }

    pub fn compute_and_compare_literal_near_with_status<C>(
        &self,
        builder: &C,
        expected: &Literal,
        arguments: &[&B::Handle],
        error: ErrorSpec,
        shape_with_layout: Option<&Shape>,
    ) -> Result<SweepReport>
    where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        let comparator = Comparator {
            mode: ComparisonMode::Near(error),
            tuples_only: false,
        };
        self.run(builder, expected, arguments, shape_with_layout, comparator)
    }

    /// Panics unless every combination matches `expected` exactly.
    pub fn compute_and_compare_literal<C>(
        &self,
        builder: &C,
        expected: &Literal,
        arguments: &[&B::Handle],
        shape_with_layout: Option<&Shape>,
    ) where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        let outcome = self.compute_and_compare_literal_with_status(
            builder,
            expected,
            arguments,
            shape_with_layout,
        );
        assert_passed(builder.name(), outcome);
    }

    /// Panics unless every combination is within `error` of `expected`.
    pub fn compute_and_compare_literal_near<C>(
        &self,
        builder: &C,
        expected: &Literal,
        arguments: &[&B::Handle],
        error: ErrorSpec,
        shape_with_layout: Option<&Shape>,
    ) where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        let outcome = self.compute_and_compare_literal_near_with_status(
            builder,
            expected,
            arguments,
            error,
            shape_with_layout,
        );
        assert_passed(builder.name(), outcome);
    }

    pub fn compute_and_compare_r1_pred<C>(
        &self,
        builder: &C,
        expected: &[bool],
        arguments: &[&B::Handle],
    ) where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        self.compute_and_compare_literal(builder, &Literal::r1(expected), arguments, None);
    }

    pub fn compute_and_compare_r1_u8<C>(&self, builder: &C, expected: &str, arguments: &[&B::Handle])
    where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        self.compute_and_compare_literal(builder, &Literal::r1_u8(expected), arguments, None);
    }

    pub fn compute_and_compare_tuple<C>(
        &self,
        builder: &C,
        expected: &Literal,
        arguments: &[&B::Handle],
    ) where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        let comparator = Comparator {
            mode: ComparisonMode::Exact,
            tuples_only: true,
        };
        let outcome = self.run(builder, expected, arguments, None, comparator);
        assert_passed(builder.name(), outcome);
    }

    pub fn compute_and_compare_tuple_near<C>(
        &self,
        builder: &C,
        expected: &Literal,
        arguments: &[&B::Handle],
        error: ErrorSpec,
    ) where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        let comparator = Comparator {
            mode: ComparisonMode::Near(error),
            tuples_only: true,
        };
        let outcome = self.run(builder, expected, arguments, None, comparator);
        assert_passed(builder.name(), outcome);
    }

    /// Tuple results are atomic: they never take part in the output sweep, and
    /// the tuple entry points always run the baseline alone.
    fn sweep_mode(&self, name: &str, expected: &Literal, tuples_only: bool) -> SweepMode {
        let flags = &self.options.debug_options;
        let sweep_outputs = flags.test_all_output_layouts && !expected.is_tuple();
        let sweep_inputs = flags.test_all_input_layouts && !tuples_only;
        if flags.test_all_output_layouts && !sweep_outputs {
            debug!("{name}: tuple result has no output layouts; skipping output layout sweep");
        }
        if tuples_only && flags.test_all_input_layouts {
            debug!("{name}: tuple entry point; skipping input layout sweep");
        }
        match (sweep_outputs, sweep_inputs) {
            (true, true) => {
                warn!("both layout sweeps requested; only output layouts will be tested");
                SweepMode::AllOutputLayouts
            }
            (true, false) => SweepMode::AllOutputLayouts,
            (false, true) => SweepMode::AllInputLayouts,
            (false, false) => SweepMode::Baseline,
        }
    }

    fn run<C>(
        &self,
        builder: &C,
        expected: &Literal,
        arguments: &[&B::Handle],
        shape_with_layout: Option<&Shape>,
        comparator: Comparator,
    ) -> Result<SweepReport>
    where
        C: ComputationBuilder<Computation = B::Computation>,
    {
        if comparator.tuples_only && !expected.is_tuple() {
            return Err(SweepError::Precondition {
                op: "harness.compare_tuple",
                msg: format!(
                    "expected value must be a tuple, got {}",
                    expected.shape().human_string()
                ),
            });
        }
        comparator.mode.validate(expected.shape())?;
        if let Some(shape) = shape_with_layout {
            if !shape.compatible(expected.shape()) {
                return Err(SweepError::ShapeMismatch {
                    op: "harness.compare",
                    expected: expected.shape().human_string(),
                    actual: shape.human_string(),
                });
            }
        }

        let computation = builder.build()?;
        let mode = self.sweep_mode(builder.name(), expected, comparator.tuples_only);
        let start = Instant::now();
        let mut report = SweepReport::new(builder.name(), mode);
        info!(
            "layout sweep start: computation={} mode={:?} expected={}",
            builder.name(),
            mode,
            expected.shape().human_string()
        );

        let mut last = Instant::now();
        let mut check = |actual: &Literal, context: &str| -> Result<()> {
            let outcome = comparator.compare(expected, actual, context);
            let record = ComparisonRecord {
                ordinal: report.total(),
                context: context.to_string(),
                passed: outcome.is_ok(),
                failure: outcome.err().map(|failure| failure.to_string()),
                actual_digest: actual.digest(),
                duration_ms: last.elapsed().as_secs_f64() * 1000.0,
            };
            last = Instant::now();
            if let Some(failure) = &record.failure {
                warn!("{}: comparison failed\n{failure}", builder.name());
            } else {
                debug!("{}: comparison passed [{}]", builder.name(), record.context);
            }
            self.emit(builder.name(), mode, &record)?;
            report.push(record);
            Ok(())
        };

        match mode {
            SweepMode::AllOutputLayouts => {
                for_each_output_layout(
                    &self.backend,
                    &computation,
                    arguments,
                    &self.options,
                    expected.shape(),
                    &mut check,
                )?;
            }
            SweepMode::AllInputLayouts => {
                for_each_input_layout_combination(
                    &self.backend,
                    arguments,
                    |handles, descriptors| {
                        let actual = execute_with_output_layout(
                            &self.backend,
                            &computation,
                            handles,
                            &self.options,
                            shape_with_layout,
                        )?;
                        check(&actual, &input_layout_context(descriptors))
                    },
                )?;
            }
            SweepMode::Baseline => {
                let actual = execute_with_output_layout(
                    &self.backend,
                    &computation,
                    arguments,
                    &self.options,
                    shape_with_layout,
                )?;
                check(&actual, "")?;
            }
        }

        report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            "layout sweep completed: computation={} status={:?} combinations={} failures={} duration_ms={:.3}",
            report.computation,
            report.status,
            report.total(),
            report.failures().count(),
            report.duration_ms
        );
        Ok(report)
    }

    fn emit(&self, computation: &str, mode: SweepMode, record: &ComparisonRecord) -> Result<()> {
        let Some(recorder) = &self.telemetry else {
            return Ok(());
        };
        recorder
            .record(TelemetryEvent::combination(computation, mode, record))
            .map_err(|err| SweepError::Telemetry {
                op: "harness.emit",
                msg: err.to_string(),
            })
    }
}

fn assert_passed(computation: &str, outcome: Result<SweepReport>) {
    match outcome {
        Ok(report) if report.passed() => {}
        Ok(report) => panic!("{}", report.failure_summary()),
        Err(err) => panic!("{computation}: {err}"),
    }
}

/// `max(x, 0)` over an `f32` scalar parameter.
pub fn create_scalar_relu() -> Result<Computation> {
    let mut builder = GraphBuilder::new("relu");
    let x = builder.parameter(0, Shape::scalar(PrimitiveType::F32), "x");
    let zero = builder.constant_r0(0.0f32);
    builder.max(x, zero);
    builder.build()
}

/// `max(x, y)` over two `f32` scalar parameters.
pub fn create_scalar_max() -> Result<Computation> {
    let mut builder = GraphBuilder::new("max");
    let x = builder.parameter(0, Shape::scalar(PrimitiveType::F32), "x");
    let y = builder.parameter(1, Shape::scalar(PrimitiveType::F32), "y");
    builder.max(x, y);
    builder.build()
}

/// Gradient of relu: `activation > 0 ? backprop : 0`.
pub fn create_scalar_relu_sensitivity() -> Result<Computation> {
    let mut builder = GraphBuilder::new("relu_sensitivity");
    let activation = builder.parameter(0, Shape::scalar(PrimitiveType::F32), "activation");
    let backprop = builder.parameter(1, Shape::scalar(PrimitiveType::F32), "backprop");
    let zero = builder.constant_r0(0.0f32);
    let active = builder.gt(activation, zero);
    builder.select(active, backprop, zero);
    builder.build()
}

/// `rows x cols` matrix whose element at `(row, col)` is `col + row * 1000 + offset`.
pub fn create_patterned_matrix(rows: usize, cols: usize, offset: f32) -> Result<Literal> {
    let values: Vec<f32> = (0..rows)
        .flat_map(|row| (0..cols).map(move |col| col as f32 + (row * 1000) as f32 + offset))
        .collect();
    Literal::from_data(&[rows, cols], ArrayData::F32(values))
}

/// Patterned matrix in the top-left corner of a zero-filled `rows_padded x cols_padded`
/// matrix.
pub fn create_patterned_matrix_with_zero_padding(
    rows: usize,
    cols: usize,
    rows_padded: usize,
    cols_padded: usize,
) -> Result<Literal> {
    if rows_padded < rows || cols_padded < cols {
        return Err(SweepError::InvalidArgument {
            op: "harness.create_patterned_matrix_with_zero_padding",
            msg: format!(
                "padded size {rows_padded}x{cols_padded} is smaller than {rows}x{cols}"
            ),
        });
    }
    let mut values = vec![0.0f32; rows_padded * cols_padded];
    for row in 0..rows {
        for col in 0..cols {
            values[row * cols_padded + col] = col as f32 + (row * 1000) as f32;
        }
    }
    Literal::from_data(&[rows_padded, cols_padded], ArrayData::F32(values))
}
