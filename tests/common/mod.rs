#![allow(dead_code)]

use std::cell::Cell;

use layout_sweep::{
    Backend, Computation, ComputationBuilder, ExecutionOptions, GlobalData, GraphBuilder,
    LayoutHarness, Literal, LocalClient, PrimitiveType, Result, Shape, SweepError, UnaryOp,
};

pub fn harness() -> LayoutHarness<LocalClient> {
    LayoutHarness::new(LocalClient::new())
}

pub fn output_sweep_harness() -> LayoutHarness<LocalClient> {
    let mut harness = harness();
    harness.debug_options_mut().test_all_output_layouts = true;
    harness
}

pub fn input_sweep_harness() -> LayoutHarness<LocalClient> {
    let mut harness = harness();
    harness.debug_options_mut().test_all_input_layouts = true;
    harness
}

/// `x + 1` over an `f32` parameter of the given dimensions.
pub fn add_one(dimensions: &[usize]) -> Computation {
    let mut builder = GraphBuilder::new("add_one");
    let x = builder.parameter(0, Shape::array(PrimitiveType::F32, dimensions), "x");
    let one = builder.constant_r0(1.0f32);
    builder.add(x, one);
    builder.build().expect("add_one should build")
}

/// `(-x, -y)` for two `f32` parameters.
pub fn negate_pair(x_dims: &[usize], y_dims: &[usize]) -> Computation {
    let mut builder = GraphBuilder::new("negate_pair");
    let x = builder.parameter(0, Shape::array(PrimitiveType::F32, x_dims), "x");
    let y = builder.parameter(1, Shape::array(PrimitiveType::F32, y_dims), "y");
    let neg_x = builder.unary(UnaryOp::Neg, x);
    let neg_y = builder.unary(UnaryOp::Neg, y);
    builder.tuple(&[neg_x, neg_y]);
    builder.build().expect("negate_pair should build")
}

pub fn iota_f32(dimensions: &[usize]) -> Literal {
    let count: usize = dimensions.iter().product();
    let values: Vec<f32> = (0..count).map(|v| v as f32).collect();
    Literal::from_vec(dimensions, values).expect("iota literal")
}

pub fn plus_one(literal: &Literal) -> Literal {
    let values: Vec<f32> = literal
        .to_vec::<f32>()
        .expect("f32 values")
        .into_iter()
        .map(|v| v + 1.0)
        .collect();
    Literal::from_vec(literal.dimensions(), values).expect("plus_one literal")
}

/// Wraps the reference backend and misbehaves on request.
#[derive(Default)]
pub struct FaultyBackend {
    pub inner: LocalClient,
    /// Perturb results requested in this output layout.
    pub corrupt_output_layout: Option<Vec<usize>>,
    /// Perturb results when any argument arrives in this layout.
    pub corrupt_input_layout: Option<Vec<usize>>,
    /// Fail the n-th execution (1-based).
    pub fail_on_execution: Option<usize>,
    pub(crate) executions: Cell<usize>,
}

impl FaultyBackend {
    pub fn executions(&self) -> usize {
        self.executions.get()
    }

    fn should_corrupt(&self, arguments: &[&GlobalData], options: &ExecutionOptions) -> bool {
        let output = self.corrupt_output_layout.as_deref().is_some_and(|target| {
            options
                .shape_with_output_layout
                .as_ref()
                .and_then(Shape::layout)
                .is_some_and(|layout| layout.minor_to_major() == target)
        });
        let input = self.corrupt_input_layout.as_deref().is_some_and(|target| {
            arguments.iter().any(|argument| {
                argument.shape().rank().unwrap_or(0) > 1
                    && argument
                        .shape()
                        .layout()
                        .is_some_and(|layout| layout.minor_to_major() == target)
            })
        });
        output || input
    }
}

fn perturb(literal: &Literal) -> Result<Literal> {
    let mut values = literal.to_vec::<f32>()?;
    if let Some(first) = values.first_mut() {
        *first += 100.0;
    }
    Literal::from_vec(literal.dimensions(), values)?.relayout_to_shape(literal.shape())
}

impl Backend for FaultyBackend {
    type Computation = Computation;
    type Handle = GlobalData;

    fn execute(
        &self,
        computation: &Computation,
        arguments: &[&GlobalData],
        options: &ExecutionOptions,
    ) -> Result<GlobalData> {
        let literal = self.execute_and_transfer(computation, arguments, options)?;
        self.inner.transfer_to_server(&literal)
    }

    fn execute_and_transfer(
        &self,
        computation: &Computation,
        arguments: &[&GlobalData],
        options: &ExecutionOptions,
    ) -> Result<Literal> {
        let count = self.executions.get() + 1;
        self.executions.set(count);
        if self.fail_on_execution == Some(count) {
            return Err(SweepError::Execution {
                op: "faulty_backend.execute",
                msg: format!("injected failure on execution {count}"),
            });
        }
        let result = self
            .inner
            .execute_and_transfer(computation, arguments, options)?;
        if self.should_corrupt(arguments, options) {
            perturb(&result)
        } else {
            Ok(result)
        }
    }

    fn transfer(&self, handle: &GlobalData) -> Result<Literal> {
        self.inner.transfer(handle)
    }

    fn transfer_to_server(&self, literal: &Literal) -> Result<GlobalData> {
        self.inner.transfer_to_server(literal)
    }
}

/// Builder that always fails, for checking that build errors surface verbatim.
pub struct BrokenBuilder;

impl ComputationBuilder for BrokenBuilder {
    type Computation = Computation;

    fn name(&self) -> &str {
        "broken"
    }

    fn build(&self) -> Result<Computation> {
        Err(SweepError::Build {
            op: "broken_builder.build",
            msg: "unsupported op".to_string(),
        })
    }
}
