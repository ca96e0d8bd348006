use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SweepError {
    #[error("{op}: build failed: {msg}")]
    Build { op: &'static str, msg: String },
    #[error("{op}: execution failed: {msg}")]
    Execution { op: &'static str, msg: String },
    #[error("{op}: transfer failed: {msg}")]
    Transfer { op: &'static str, msg: String },
    #[error("{op}: precondition violated: {msg}")]
    Precondition { op: &'static str, msg: String },
    #[error("{op}: minor_to_major {minor_to_major:?} is not a permutation of [0, {rank})")]
    InvalidLayout {
        op: &'static str,
        minor_to_major: Vec<usize>,
        rank: usize,
    },
    #[error("{op}: shape mismatch: expected {expected} got {actual}")]
    ShapeMismatch {
        op: &'static str,
        expected: String,
        actual: String,
    },
    #[error("{op}: {msg}")]
    InvalidArgument { op: &'static str, msg: String },
    #[error("{op}: telemetry failed: {msg}")]
    Telemetry { op: &'static str, msg: String },
}

impl SweepError {
    /// Build, execution and transfer failures abort a sweep; the rest indicate misuse.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            SweepError::Build { .. } | SweepError::Execution { .. } | SweepError::Transfer { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SweepError>;
