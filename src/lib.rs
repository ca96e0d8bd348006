pub mod client;
pub mod comparison;
pub mod config;
pub mod error;
pub mod harness;
pub mod interpreter;
pub mod layout;
pub mod literal;
pub mod report;
pub mod shape;
pub mod sweep;
pub mod telemetry;

pub use client::{Backend, ComputationBuilder, ExecutionOptions};
pub use comparison::{
    expect_equal, expect_equal_tuple, expect_near, expect_near_tuple, ComparisonFailure,
    ComparisonMode, ErrorSpec, Mismatch,
};
pub use config::{DebugOptions, HarnessConfig};
pub use error::{Result, SweepError};
pub use harness::{
    create_patterned_matrix, create_patterned_matrix_with_zero_padding, create_scalar_max,
    create_scalar_relu, create_scalar_relu_sensitivity, LayoutHarness,
};
pub use interpreter::{
    BinaryOp, ClientStats, CompareOp, Computation, GlobalData, GraphBuilder, LocalClient, UnaryOp,
    ValueId,
};
pub use layout::{input_layout_combinations, output_layout_shapes, Layout, LayoutPermutations};
pub use literal::{ArrayData, Literal, NativeType, Scalar};
pub use report::{ComparisonRecord, SweepMode, SweepReport, SweepStatus};
pub use shape::{PrimitiveType, Shape};
pub use sweep::{
    execute_with_output_layout, for_each_input_layout_combination, for_each_output_layout,
    input_layout_context,
};
