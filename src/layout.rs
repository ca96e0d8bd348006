use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};
use crate::shape::{join, Shape};

/// Physical dimension order, listed from most-minor (fastest varying) to most-major.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawLayout")]
pub struct Layout {
    minor_to_major: Vec<usize>,
}

#[derive(Deserialize)]
struct RawLayout {
    minor_to_major: Vec<usize>,
}

impl TryFrom<RawLayout> for Layout {
    type Error = SweepError;

    fn try_from(raw: RawLayout) -> Result<Self> {
        Layout::new(raw.minor_to_major)
    }
}

impl Layout {
    pub fn new(minor_to_major: Vec<usize>) -> Result<Self> {
        let rank = minor_to_major.len();
        let mut seen = vec![false; rank];
        for &dim in &minor_to_major {
            if dim >= rank || seen[dim] {
                return Err(SweepError::InvalidLayout {
                    op: "layout.new",
                    minor_to_major,
                    rank,
                });
            }
            seen[dim] = true;
        }
        Ok(Self { minor_to_major })
    }

    /// Row-major: the last dimension is most minor.
    pub fn default_for_rank(rank: usize) -> Self {
        Self {
            minor_to_major: (0..rank).rev().collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.minor_to_major.len()
    }

    pub fn minor_to_major(&self) -> &[usize] {
        &self.minor_to_major
    }

    /// Element strides (in elements, not bytes) for `dimensions` under this layout.
    pub fn strides(&self, dimensions: &[usize]) -> Vec<usize> {
        let mut strides = vec![0; dimensions.len()];
        let mut stride = 1usize;
        for &dim in &self.minor_to_major {
            strides[dim] = stride;
            stride = stride.saturating_mul(dimensions[dim]);
        }
        strides
    }

    /// Offset into physical storage of a logical multi-index.
    pub fn physical_index(&self, dimensions: &[usize], index: &[usize]) -> usize {
        let mut offset = 0;
        let mut stride = 1;
        for &dim in &self.minor_to_major {
            offset += index[dim] * stride;
            stride *= dimensions[dim];
        }
        offset
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", join(&self.minor_to_major))
    }
}

/// Every minor-to-major order of a given rank, identity first, in lexicographic order.
///
/// The sequence is lazy and restartable: clone it or call [`reset`](Self::reset) to
/// walk it again.
#[derive(Debug, Clone)]
pub struct LayoutPermutations {
    current: Vec<usize>,
    done: bool,
}

impl LayoutPermutations {
    pub fn new(rank: usize) -> Self {
        Self {
            current: (0..rank).collect(),
            done: false,
        }
    }

    pub fn rank(&self) -> usize {
        self.current.len()
    }

    pub fn reset(&mut self) {
        let rank = self.rank();
        self.current = (0..rank).collect();
        self.done = false;
    }

    /// Total number of layouts for the rank (`rank!`).
    pub fn total(&self) -> usize {
        factorial(self.rank())
    }
}

impl Iterator for LayoutPermutations {
    type Item = Layout;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let layout = Layout {
            minor_to_major: self.current.clone(),
        };
        self.done = !next_permutation(&mut self.current);
        Some(layout)
    }
}

/// Advance `values` to its lexicographic successor; false once it was the last one.
fn next_permutation(values: &mut [usize]) -> bool {
    if values.len() < 2 {
        return false;
    }
    let mut pivot = values.len() - 1;
    while pivot > 0 && values[pivot - 1] >= values[pivot] {
        pivot -= 1;
    }
    if pivot == 0 {
        return false;
    }
    let mut successor = values.len() - 1;
    while values[successor] <= values[pivot - 1] {
        successor -= 1;
    }
    values.swap(pivot - 1, successor);
    values[pivot..].reverse();
    true
}

pub fn factorial(n: usize) -> usize {
    (1..=n).product()
}

/// Array shapes of `shape`'s element type and dimensions, one per layout, with the
/// descriptor the output sweep attaches to each.
pub fn output_layout_shapes(shape: &Shape) -> Result<Vec<(Shape, String)>> {
    let rank = shape.rank().ok_or_else(|| SweepError::InvalidArgument {
        op: "layout.output_layout_shapes",
        msg: format!("tuple shape {} has no output layouts", shape.human_string()),
    })?;
    LayoutPermutations::new(rank)
        .map(|layout| {
            let with_layout = shape.relaid(layout)?;
            let descriptor = format!(
                "Test with output layout: {}",
                with_layout.human_string_with_layout()
            );
            Ok((with_layout, descriptor))
        })
        .collect()
}

/// Size of the input-layout product; tuple arguments contribute a factor of one.
pub fn input_layout_combinations(shapes: &[Shape]) -> usize {
    shapes
        .iter()
        .map(|shape| shape.rank().map(factorial).unwrap_or(1))
        .product()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{factorial, input_layout_combinations, Layout, LayoutPermutations};
    use crate::shape::{PrimitiveType, Shape};

    #[test]
    fn enumerates_factorial_distinct_bijections() {
        for rank in 0..=4 {
            let layouts: Vec<Layout> = LayoutPermutations::new(rank).collect();
            assert_eq!(layouts.len(), factorial(rank), "rank {rank}");
            let distinct: BTreeSet<Vec<usize>> = layouts
                .iter()
                .map(|layout| layout.minor_to_major().to_vec())
                .collect();
            assert_eq!(distinct.len(), layouts.len());
            for layout in &layouts {
                assert!(Layout::new(layout.minor_to_major().to_vec()).is_ok());
            }
            let identity: Vec<usize> = (0..rank).collect();
            assert_eq!(layouts[0].minor_to_major(), identity.as_slice());
        }
    }

    #[test]
    fn enumeration_is_lexicographic_and_restartable() {
        let mut permutations = LayoutPermutations::new(3);
        let first: Vec<Vec<usize>> = permutations
            .by_ref()
            .map(|layout| layout.minor_to_major().to_vec())
            .collect();
        assert_eq!(
            first,
            vec![
                vec![0, 1, 2],
                vec![0, 2, 1],
                vec![1, 0, 2],
                vec![1, 2, 0],
                vec![2, 0, 1],
                vec![2, 1, 0],
            ]
        );
        assert!(permutations.next().is_none());
        permutations.reset();
        assert_eq!(permutations.total(), 6);
        assert_eq!(permutations.count(), 6);
    }

    #[test]
    fn rejects_non_permutations() {
        assert!(Layout::new(vec![0, 2]).is_err());
        assert!(Layout::new(vec![1, 1]).is_err());
        assert!(Layout::new(vec![]).is_ok());
    }

    #[test]
    fn deserialization_checks_the_bijection() {
        assert!(serde_json::from_str::<Layout>(r#"{"minor_to_major":[0,0]}"#).is_err());
        assert!(serde_json::from_str::<Layout>(r#"{"minor_to_major":[0,2]}"#).is_err());
        let layout: Layout =
            serde_json::from_str(r#"{"minor_to_major":[1,0]}"#).expect("valid layout");
        assert_eq!(layout, Layout::default_for_rank(2));
        let json = serde_json::to_string(&layout).expect("serialize");
        assert_eq!(json, r#"{"minor_to_major":[1,0]}"#);

        let shape = serde_json::to_string(&Shape::array(PrimitiveType::F32, &[2, 2]))
            .expect("serialize shape");
        assert!(serde_json::from_str::<Shape>(&shape).is_ok());
        let corrupted = shape.replace("[1,0]", "[1,1]");
        assert_ne!(corrupted, shape);
        assert!(serde_json::from_str::<Shape>(&corrupted).is_err());
    }

    #[test]
    fn strides_follow_minor_to_major() {
        let row_major = Layout::default_for_rank(3);
        assert_eq!(row_major.strides(&[2, 3, 4]), vec![12, 4, 1]);
        let col_major = Layout::new(vec![0, 1, 2]).expect("layout");
        assert_eq!(col_major.strides(&[2, 3, 4]), vec![1, 2, 6]);
        assert_eq!(col_major.physical_index(&[2, 3, 4], &[1, 2, 3]), 1 + 4 + 18);
    }

    #[test]
    fn tuple_arguments_contribute_factor_one() {
        let shapes = vec![
            Shape::array(PrimitiveType::F32, &[2]),
            Shape::array(PrimitiveType::F32, &[3, 4]),
            Shape::tuple(vec![Shape::array(PrimitiveType::S32, &[2, 2, 2])]),
        ];
        assert_eq!(input_layout_combinations(&shapes), 2);
        assert_eq!(input_layout_combinations(&[]), 1);
    }
}
