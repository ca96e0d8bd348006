use crate::config::DebugOptions;
use crate::error::Result;
use crate::literal::Literal;
use crate::shape::Shape;

/// Per-execution options handed to the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOptions {
    /// When set, the result must come back in this shape's layout.
    pub shape_with_output_layout: Option<Shape>,
    pub debug_options: DebugOptions,
}

impl ExecutionOptions {
    pub fn new(debug_options: DebugOptions) -> Self {
        Self {
            shape_with_output_layout: None,
            debug_options,
        }
    }

    pub fn with_output_layout(&self, shape: Option<&Shape>) -> Self {
        Self {
            shape_with_output_layout: shape.cloned(),
            debug_options: self.debug_options.clone(),
        }
    }
}

/// Produces an executable computation.
pub trait ComputationBuilder {
    type Computation;

    fn name(&self) -> &str;

    fn build(&self) -> Result<Self::Computation>;
}

/// Runs computations and moves values between host and device.
///
/// Handles are owned: dropping one releases the device allocation behind it.
pub trait Backend {
    type Computation;
    type Handle;

    fn execute(
        &self,
        computation: &Self::Computation,
        arguments: &[&Self::Handle],
        options: &ExecutionOptions,
    ) -> Result<Self::Handle>;

    /// Execute and copy the result back to the host, honoring
    /// `options.shape_with_output_layout` when present.
    fn execute_and_transfer(
        &self,
        computation: &Self::Computation,
        arguments: &[&Self::Handle],
        options: &ExecutionOptions,
    ) -> Result<Literal>;

    fn transfer(&self, handle: &Self::Handle) -> Result<Literal>;

    fn transfer_to_server(&self, literal: &Literal) -> Result<Self::Handle>;
}
