//! Layout sweeps over a computation's inputs or outputs.
//!
//! Both sweeps are depth-first and synchronous. Every execution completes before the
//! next combination starts, and the first backend error ends the sweep.

use log::debug;

use crate::client::{Backend, ExecutionOptions};
use crate::error::{Result, SweepError};
use crate::layout::{output_layout_shapes, LayoutPermutations};
use crate::literal::Literal;
use crate::shape::Shape;

/// Execute once and bring the result back in the layout of `shape_with_layout`, or in the
/// backend's default layout when it is `None`.
pub fn execute_with_output_layout<B: Backend>(
    backend: &B,
    computation: &B::Computation,
    arguments: &[&B::Handle],
    options: &ExecutionOptions,
    shape_with_layout: Option<&Shape>,
) -> Result<Literal> {
    let options = options.with_output_layout(shape_with_layout);
    let actual = backend.execute_and_transfer(computation, arguments, &options)?;
    if let Some(requested) = shape_with_layout {
        if !actual.shape().compatible(requested) {
            return Err(SweepError::ShapeMismatch {
                op: "sweep.execute_with_output_layout",
                expected: requested.human_string(),
                actual: actual.shape().human_string(),
            });
        }
        if !requested.is_tuple() && actual.layout() != requested.layout() {
            return Err(SweepError::Execution {
                op: "sweep.execute_with_output_layout",
                msg: format!(
                    "backend returned {} for requested output layout {}",
                    actual.shape().human_string_with_layout(),
                    requested.human_string_with_layout()
                ),
            });
        }
    }
    Ok(actual)
}

/// Run the unconstrained baseline, then once per output layout of `expected_shape`.
///
/// `visit` receives each result with its context: empty for the baseline, otherwise
/// `Test with output layout: <shape>`. Returns the number of executions.
pub fn for_each_output_layout<B, F>(
    backend: &B,
    computation: &B::Computation,
    arguments: &[&B::Handle],
    options: &ExecutionOptions,
    expected_shape: &Shape,
    mut visit: F,
) -> Result<usize>
where
    B: Backend,
    F: FnMut(&Literal, &str) -> Result<()>,
{
    let layouts = output_layout_shapes(expected_shape)?;
    let baseline = execute_with_output_layout(backend, computation, arguments, options, None)?;
    visit(&baseline, "")?;
    for (shape, context) in &layouts {
        debug!("output sweep: {context}");
        let actual =
            execute_with_output_layout(backend, computation, arguments, options, Some(shape))?;
        visit(&actual, context)?;
    }
    Ok(layouts.len() + 1)
}

/// Call `visit` once per input-layout combination of `arguments`.
///
/// Each non-tuple argument is copied to the host once, then re-expressed and re-uploaded
/// under every minor-to-major order. Tuple arguments pass through unchanged. `visit` gets
/// the bound handles and one descriptor per argument, in argument order. Returns the
/// number of combinations visited.
pub fn for_each_input_layout_combination<B, F>(
    backend: &B,
    arguments: &[&B::Handle],
    mut visit: F,
) -> Result<usize>
where
    B: Backend,
    F: FnMut(&[&B::Handle], &[String]) -> Result<()>,
{
    let mut visited = 0usize;
    let mut counted = |handles: &[&B::Handle], descriptors: &[String]| {
        visited += 1;
        visit(handles, descriptors)
    };
    choose(backend, arguments, &[], &[], &mut counted)?;
    Ok(visited)
}

fn choose<B, F>(
    backend: &B,
    remaining: &[&B::Handle],
    bound: &[&B::Handle],
    descriptors: &[String],
    visit: &mut F,
) -> Result<()>
where
    B: Backend,
    F: FnMut(&[&B::Handle], &[String]) -> Result<()>,
{
    let Some((argument, rest)) = remaining.split_first() else {
        return visit(bound, descriptors);
    };

    let literal = backend.transfer(argument)?;
    let rank = match literal.shape().rank() {
        Some(rank) => rank,
        None => {
            let mut next_bound = bound.to_vec();
            next_bound.push(*argument);
            let next_descriptors = extended(descriptors, literal.shape().human_string_with_layout());
            return choose(backend, rest, &next_bound, &next_descriptors, visit);
        }
    };

    for layout in LayoutPermutations::new(rank) {
        let relaid = literal.relayout(&layout)?;
        let handle = backend.transfer_to_server(&relaid)?;
        let mut next_bound = bound.to_vec();
        next_bound.push(&handle);
        let next_descriptors =
            extended(descriptors, relaid.shape().human_string_with_layout());
        choose(backend, rest, &next_bound, &next_descriptors, visit)?;
    }
    Ok(())
}

fn extended(descriptors: &[String], descriptor: String) -> Vec<String> {
    let mut next = descriptors.to_vec();
    next.push(descriptor);
    next
}

/// Context string attached to comparisons in the input sweep.
pub fn input_layout_context(descriptors: &[String]) -> String {
    format!("Test with input layouts: {}", descriptors.join(" "))
}
