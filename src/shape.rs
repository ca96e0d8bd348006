use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};
use crate::layout::Layout;

/// Element kinds a literal or computation result can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Pred,
    S8,
    S32,
    S64,
    U8,
    U32,
    U64,
    F32,
    F64,
    C64,
}

impl PrimitiveType {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Pred => "pred",
            PrimitiveType::S8 => "s8",
            PrimitiveType::S32 => "s32",
            PrimitiveType::S64 => "s64",
            PrimitiveType::U8 => "u8",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
            PrimitiveType::C64 => "c64",
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            PrimitiveType::S8
                | PrimitiveType::S32
                | PrimitiveType::S64
                | PrimitiveType::U8
                | PrimitiveType::U32
                | PrimitiveType::U64
        )
    }

    pub fn is_floating(self) -> bool {
        matches!(self, PrimitiveType::F32 | PrimitiveType::F64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, PrimitiveType::C64)
    }

    pub fn is_pred(self) -> bool {
        matches!(self, PrimitiveType::Pred)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Array or tuple shape. Arrays carry an optional physical layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Array {
        element_type: PrimitiveType,
        dimensions: Vec<usize>,
        layout: Option<Layout>,
    },
    Tuple(Vec<Shape>),
}

impl Shape {
    /// Array shape with the default row-major layout.
    pub fn array(element_type: PrimitiveType, dimensions: &[usize]) -> Self {
        Shape::Array {
            element_type,
            dimensions: dimensions.to_vec(),
            layout: Some(Layout::default_for_rank(dimensions.len())),
        }
    }

    pub fn scalar(element_type: PrimitiveType) -> Self {
        Self::array(element_type, &[])
    }

    pub fn with_layout(
        element_type: PrimitiveType,
        dimensions: &[usize],
        minor_to_major: &[usize],
    ) -> Result<Self> {
        let layout = Layout::new(minor_to_major.to_vec())?;
        if layout.rank() != dimensions.len() {
            return Err(SweepError::InvalidLayout {
                op: "shape.with_layout",
                minor_to_major: minor_to_major.to_vec(),
                rank: dimensions.len(),
            });
        }
        Ok(Shape::Array {
            element_type,
            dimensions: dimensions.to_vec(),
            layout: Some(layout),
        })
    }

    pub fn tuple(elements: Vec<Shape>) -> Self {
        Shape::Tuple(elements)
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Shape::Tuple(_))
    }

    /// Rank of an array shape; tuples have none.
    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Array { dimensions, .. } => Some(dimensions.len()),
            Shape::Tuple(_) => None,
        }
    }

    pub fn dimensions(&self) -> &[usize] {
        match self {
            Shape::Array { dimensions, .. } => dimensions,
            Shape::Tuple(_) => &[],
        }
    }

    pub fn element_type(&self) -> Option<PrimitiveType> {
        match self {
            Shape::Array { element_type, .. } => Some(*element_type),
            Shape::Tuple(_) => None,
        }
    }

    pub fn layout(&self) -> Option<&Layout> {
        match self {
            Shape::Array { layout, .. } => layout.as_ref(),
            Shape::Tuple(_) => None,
        }
    }

    pub fn tuple_elements(&self) -> &[Shape] {
        match self {
            Shape::Tuple(elements) => elements,
            Shape::Array { .. } => &[],
        }
    }

    pub fn element_count(&self) -> usize {
        self.dimensions().iter().product()
    }

    /// Element types of every array leaf, depth first.
    pub fn leaf_element_types(&self) -> Vec<PrimitiveType> {
        match self {
            Shape::Array { element_type, .. } => vec![*element_type],
            Shape::Tuple(elements) => elements
                .iter()
                .flat_map(|element| element.leaf_element_types())
                .collect(),
        }
    }

    /// Same element type, dimensions and tuple structure; layouts ignored.
    pub fn compatible(&self, other: &Shape) -> bool {
        match (self, other) {
            (
                Shape::Array {
                    element_type: lhs_type,
                    dimensions: lhs_dims,
                    ..
                },
                Shape::Array {
                    element_type: rhs_type,
                    dimensions: rhs_dims,
                    ..
                },
            ) => lhs_type == rhs_type && lhs_dims == rhs_dims,
            (Shape::Tuple(lhs), Shape::Tuple(rhs)) => {
                lhs.len() == rhs.len() && lhs.iter().zip(rhs).all(|(l, r)| l.compatible(r))
            }
            _ => false,
        }
    }

    /// Copy of this array shape with `layout` installed.
    pub fn relaid(&self, layout: Layout) -> Result<Shape> {
        match self {
            Shape::Array {
                element_type,
                dimensions,
                ..
            } => {
                if layout.rank() != dimensions.len() {
                    return Err(SweepError::InvalidLayout {
                        op: "shape.relaid",
                        minor_to_major: layout.minor_to_major().to_vec(),
                        rank: dimensions.len(),
                    });
                }
                Ok(Shape::Array {
                    element_type: *element_type,
                    dimensions: dimensions.clone(),
                    layout: Some(layout),
                })
            }
            Shape::Tuple(_) => Err(SweepError::InvalidArgument {
                op: "shape.relaid",
                msg: "tuple shapes have no layout".to_string(),
            }),
        }
    }

    /// `f32[2,3]`, or `(f32[2], s32[])` for tuples.
    pub fn human_string(&self) -> String {
        match self {
            Shape::Array {
                element_type,
                dimensions,
                ..
            } => format!("{}[{}]", element_type, join(dimensions)),
            Shape::Tuple(elements) => format!(
                "({})",
                elements
                    .iter()
                    .map(Shape::human_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    /// `f32[2,3]{1,0}`; arrays without a layout render as `human_string`.
    pub fn human_string_with_layout(&self) -> String {
        match self {
            Shape::Array { layout: None, .. } => self.human_string(),
            Shape::Array {
                layout: Some(layout),
                ..
            } => format!("{}{}", self.human_string(), layout),
            Shape::Tuple(elements) => format!(
                "({})",
                elements
                    .iter()
                    .map(Shape::human_string_with_layout)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human_string_with_layout())
    }
}

pub(crate) fn join(values: &[usize]) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
