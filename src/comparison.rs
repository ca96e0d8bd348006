//! Exact and tolerance-bounded comparison of literals.
//!
//! Both comparators ignore physical layout: elements are matched by logical index,
//! and tuples are compared component by component. A mismatch is reported as a
//! [`ComparisonFailure`] value carrying the caller's context string, never as a
//! [`SweepError`].

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};
use crate::literal::{logical_indices, Literal, Scalar};
use crate::shape::{join, Shape};

const MAX_REPORTED_MISMATCHES: usize = 8;

/// Tolerances for floating and complex comparisons. An element passes when either bound holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorSpec {
    pub abs: f64,
    pub rel: f64,
}

impl ErrorSpec {
    pub fn new(abs: f64, rel: f64) -> Self {
        Self { abs, rel }
    }

    pub fn absolute(abs: f64) -> Self {
        Self { abs, rel: 0.0 }
    }
}

/// Which comparator a sweep applies to every combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ComparisonMode {
    Exact,
    Near(ErrorSpec),
}

impl ComparisonMode {
    /// Reject comparator/element-kind pairs that indicate harness misuse.
    ///
    /// Exact comparison of floating or complex values is allowed with a warning.
    pub fn validate(&self, expected: &Shape) -> Result<()> {
        let leaves = expected.leaf_element_types();
        match self {
            ComparisonMode::Exact => {
                if leaves.iter().any(|ty| ty.is_floating() || ty.is_complex()) {
                    warn!("performing exact comparison of floating point numbers");
                }
                Ok(())
            }
            ComparisonMode::Near(_) => {
                let ok = match expected {
                    Shape::Array { element_type, .. } => {
                        element_type.is_floating() || element_type.is_complex()
                    }
                    Shape::Tuple(_) => leaves.iter().any(|ty| ty.is_floating() || ty.is_complex()),
                };
                if ok {
                    Ok(())
                } else {
                    Err(SweepError::Precondition {
                        op: "comparison.near",
                        msg: format!(
                            "near comparison requires floating or complex elements, got {}",
                            expected.human_string()
                        ),
                    })
                }
            }
        }
    }

    pub fn compare(
        &self,
        expected: &Literal,
        actual: &Literal,
        context: &str,
    ) -> std::result::Result<(), ComparisonFailure> {
        match self {
            ComparisonMode::Exact => expect_equal(expected, actual, context),
            ComparisonMode::Near(spec) => expect_near(expected, actual, *spec, context),
        }
    }
}

/// One element that failed comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Tuple path and logical index, e.g. `{1,0}` or `tuple[1]{2}`.
    pub location: String,
    pub expected: String,
    pub actual: String,
    pub abs_error: Option<f64>,
    pub rel_error: Option<f64>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {}: expected {} actual {}",
            self.location, self.expected, self.actual
        )?;
        if let (Some(abs), Some(rel)) = (self.abs_error, self.rel_error) {
            write!(f, " (abs error {abs:e}, rel error {rel:e})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonFailure {
    pub context: String,
    /// Set when the shapes themselves differ.
    pub structural: Option<String>,
    pub mismatches: Vec<Mismatch>,
    pub mismatch_count: usize,
    pub expected_dump: String,
    pub actual_dump: String,
}

impl ComparisonFailure {
    pub fn first_mismatch(&self) -> Option<&Mismatch> {
        self.mismatches.first()
    }
}

impl fmt::Display for ComparisonFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(structural) = &self.structural {
            writeln!(f, "{structural}")?;
        } else {
            writeln!(f, "{} element(s) mismatched", self.mismatch_count)?;
            for mismatch in &self.mismatches {
                writeln!(f, "  {mismatch}")?;
            }
        }
        writeln!(f, "expected: {}", self.expected_dump)?;
        writeln!(f, "actual:   {}", self.actual_dump)?;
        write!(f, "context: {}", self.context)
    }
}

impl std::error::Error for ComparisonFailure {}

pub fn expect_equal(
    expected: &Literal,
    actual: &Literal,
    context: &str,
) -> std::result::Result<(), ComparisonFailure> {
    run(expected, actual, None, context)
}

pub fn expect_near(
    expected: &Literal,
    actual: &Literal,
    spec: ErrorSpec,
    context: &str,
) -> std::result::Result<(), ComparisonFailure> {
    run(expected, actual, Some(spec), context)
}

pub fn expect_equal_tuple(
    expected: &Literal,
    actual: &Literal,
    context: &str,
) -> std::result::Result<(), ComparisonFailure> {
    require_tuples(expected, actual, context)?;
    expect_equal(expected, actual, context)
}

pub fn expect_near_tuple(
    expected: &Literal,
    actual: &Literal,
    spec: ErrorSpec,
    context: &str,
) -> std::result::Result<(), ComparisonFailure> {
    require_tuples(expected, actual, context)?;
    expect_near(expected, actual, spec, context)
}

fn require_tuples(
    expected: &Literal,
    actual: &Literal,
    context: &str,
) -> std::result::Result<(), ComparisonFailure> {
    if expected.is_tuple() && actual.is_tuple() {
        return Ok(());
    }
    Err(failure(
        expected,
        actual,
        context,
        Some(format!(
            "tuple comparison of {} and {}",
            expected.shape().human_string(),
            actual.shape().human_string()
        )),
        Vec::new(),
        0,
    ))
}

struct Walk {
    spec: Option<ErrorSpec>,
    mismatches: Vec<Mismatch>,
    count: usize,
}

fn run(
    expected: &Literal,
    actual: &Literal,
    spec: Option<ErrorSpec>,
    context: &str,
) -> std::result::Result<(), ComparisonFailure> {
    let mut walk = Walk {
        spec,
        mismatches: Vec::new(),
        count: 0,
    };
    let structural = walk.literal(expected, actual, String::new()).err();
    if structural.is_none() && walk.count == 0 {
        return Ok(());
    }
    Err(failure(
        expected,
        actual,
        context,
        structural,
        walk.mismatches,
        walk.count,
    ))
}

fn failure(
    expected: &Literal,
    actual: &Literal,
    context: &str,
    structural: Option<String>,
    mismatches: Vec<Mismatch>,
    mismatch_count: usize,
) -> ComparisonFailure {
    ComparisonFailure {
        context: context.to_string(),
        structural,
        mismatches,
        mismatch_count,
        expected_dump: expected.to_string(),
        actual_dump: actual.to_string(),
    }
}

impl Walk {
    fn literal(
        &mut self,
        expected: &Literal,
        actual: &Literal,
        path: String,
    ) -> std::result::Result<(), String> {
        if !expected.shape().compatible(actual.shape()) {
            return Err(format!(
                "shape mismatch{}: expected {} actual {}",
                if path.is_empty() {
                    String::new()
                } else {
                    format!(" at {path}")
                },
                expected.shape().human_string(),
                actual.shape().human_string()
            ));
        }
        if expected.is_tuple() {
            for (idx, (e, a)) in expected
                .tuple_elements()
                .iter()
                .zip(actual.tuple_elements())
                .enumerate()
            {
                self.literal(e, a, format!("{path}tuple[{idx}]"))?;
            }
            return Ok(());
        }
        for index in logical_indices(expected.dimensions()) {
            let (Some(e), Some(a)) = (expected.get(&index), actual.get(&index)) else {
                return Err(format!("element {{{}}} missing", join(&index)));
            };
            if let Some(mut mismatch) = self.element(e, a) {
                self.count += 1;
                if self.mismatches.len() < MAX_REPORTED_MISMATCHES {
                    mismatch.location = format!("{path}{{{}}}", join(&index));
                    self.mismatches.push(mismatch);
                }
            }
        }
        Ok(())
    }

    fn element(&self, expected: Scalar, actual: Scalar) -> Option<Mismatch> {
        let mismatch = |abs_error, rel_error| Mismatch {
            location: String::new(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            abs_error,
            rel_error,
        };
        match (self.spec, expected, actual) {
            (Some(spec), Scalar::F32(e), Scalar::F32(a)) => {
                near(f64::from(e), f64::from(a), spec).map(|(abs, rel)| mismatch(Some(abs), Some(rel)))
            }
            (Some(spec), Scalar::F64(e), Scalar::F64(a)) => {
                near(e, a, spec).map(|(abs, rel)| mismatch(Some(abs), Some(rel)))
            }
            (Some(spec), Scalar::C64(e), Scalar::C64(a)) => {
                let re = near(f64::from(e.re), f64::from(a.re), spec);
                let im = near(f64::from(e.im), f64::from(a.im), spec);
                match (re, im) {
                    (None, None) => None,
                    (Some((abs, rel)), None) | (None, Some((abs, rel))) => {
                        Some(mismatch(Some(abs), Some(rel)))
                    }
                    (Some((abs_re, rel_re)), Some((abs_im, rel_im))) => Some(mismatch(
                        Some(abs_re.max(abs_im)),
                        Some(rel_re.max(rel_im)),
                    )),
                }
            }
            _ => (!bitwise_equal(expected, actual)).then(|| mismatch(None, None)),
        }
    }
}

/// `None` when `actual` is within `spec` of `expected`, else the (abs, rel) errors.
fn near(expected: f64, actual: f64, spec: ErrorSpec) -> Option<(f64, f64)> {
    if expected.is_nan() && actual.is_nan() {
        return None;
    }
    if expected == actual {
        return None;
    }
    let abs_error = (actual - expected).abs();
    let rel_error = if expected == 0.0 {
        f64::INFINITY
    } else {
        abs_error / expected.abs()
    };
    if abs_error <= spec.abs || rel_error <= spec.rel {
        None
    } else {
        Some((abs_error, rel_error))
    }
}

fn bitwise_equal(expected: Scalar, actual: Scalar) -> bool {
    match (expected, actual) {
        (Scalar::F32(e), Scalar::F32(a)) => e.to_bits() == a.to_bits(),
        (Scalar::F64(e), Scalar::F64(a)) => e.to_bits() == a.to_bits(),
        (Scalar::C64(e), Scalar::C64(a)) => {
            e.re.to_bits() == a.re.to_bits() && e.im.to_bits() == a.im.to_bits()
        }
        (e, a) => e == a,
    }
}

#[cfg(test)]
mod tests {
    use num_complex::Complex32;

    use super::{expect_equal, expect_near, expect_near_tuple, ComparisonMode, ErrorSpec};
    use crate::error::SweepError;
    use crate::layout::Layout;
    use crate::literal::Literal;

    fn matrix(values: [f64; 4]) -> Literal {
        Literal::from_vec(&[2, 2], values.to_vec()).expect("literal")
    }

    #[test]
    fn near_accepts_either_bound() {
        let expected = matrix([1.0, 2.0, 3.0, 4.0]);
        let actual = matrix([1.0, 2.0 + 1e-6, 3.0, 4.0]);
        assert!(expect_near(&expected, &actual, ErrorSpec::absolute(1e-5), "").is_ok());
        assert!(expect_near(&expected, &actual, ErrorSpec::new(0.0, 1e-5), "").is_ok());

        let failure = expect_near(&expected, &actual, ErrorSpec::new(1e-7, 1e-7), "layout {0,1}")
            .expect_err("tolerance too tight");
        assert_eq!(failure.mismatch_count, 1);
        let first = failure.first_mismatch().expect("mismatch");
        assert_eq!(first.location, "{0,1}");
        let rendered = failure.to_string();
        assert!(rendered.contains("{0,1}"));
        assert!(rendered.contains("context: layout {0,1}"));
    }

    #[test]
    fn comparison_ignores_physical_layout() {
        let expected = matrix([1.0, 2.0, 3.0, 4.0]);
        let col_major = expected
            .relayout(&Layout::new(vec![0, 1]).expect("layout"))
            .expect("relayout");
        assert!(expect_equal(&expected, &col_major, "").is_ok());
    }

    #[test]
    fn exact_comparison_is_bitwise() {
        let positive = Literal::r0(0.0f32);
        let negative = Literal::r0(-0.0f32);
        assert!(expect_equal(&positive, &negative, "").is_err());
        let nan = Literal::r0(f32::NAN);
        assert!(expect_equal(&nan, &nan.clone(), "").is_ok());
    }

    #[test]
    fn shape_mismatch_is_structural() {
        let failure = expect_equal(&Literal::r1(&[1i32, 2]), &Literal::r1(&[1i32, 2, 3]), "ctx")
            .expect_err("shapes differ");
        assert!(failure.structural.is_some());
        assert_eq!(failure.mismatch_count, 0);
    }

    #[test]
    fn tuples_compare_componentwise() {
        let expected = Literal::tuple(vec![Literal::r1(&[1.0f32, 2.0]), Literal::r0(7i32)]);
        let close = Literal::tuple(vec![Literal::r1(&[1.0f32, 2.00001]), Literal::r0(7i32)]);
        let wrong_int = Literal::tuple(vec![Literal::r1(&[1.0f32, 2.0]), Literal::r0(8i32)]);
        let spec = ErrorSpec::absolute(1e-3);
        assert!(expect_near_tuple(&expected, &close, spec, "").is_ok());
        let failure = expect_near_tuple(&expected, &wrong_int, spec, "").expect_err("int differs");
        assert_eq!(failure.mismatches[0].location, "tuple[1]{}");
        assert!(expect_near_tuple(&Literal::r0(1.0f32), &Literal::r0(1.0f32), spec, "").is_err());
    }

    #[test]
    fn complex_near_checks_both_parts() {
        let expected = Literal::r1(&[Complex32::new(1.0, 1.0)]);
        let actual = Literal::r1(&[Complex32::new(1.0, 1.5)]);
        assert!(expect_near(&expected, &actual, ErrorSpec::absolute(1e-3), "").is_err());
        assert!(expect_near(&expected, &actual, ErrorSpec::absolute(0.6), "").is_ok());
    }

    #[test]
    fn near_on_integral_is_a_precondition_violation() {
        let err = ComparisonMode::Near(ErrorSpec::absolute(1e-3))
            .validate(Literal::r1(&[1i32]).shape())
            .expect_err("integral near");
        assert!(matches!(err, SweepError::Precondition { .. }));
        assert!(err.to_string().contains("s32[1]"));
        assert!(ComparisonMode::Exact
            .validate(Literal::r1(&[1.0f32]).shape())
            .is_ok());
    }
}
