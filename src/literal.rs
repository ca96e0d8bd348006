use std::fmt;

use num_complex::Complex32;

use crate::error::{Result, SweepError};
use crate::layout::Layout;
use crate::shape::{PrimitiveType, Shape};

/// Typed element storage in physical order.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Pred(Vec<bool>),
    S8(Vec<i8>),
    S32(Vec<i32>),
    S64(Vec<i64>),
    U8(Vec<u8>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    C64(Vec<Complex32>),
}

/// A single element, tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Pred(bool),
    S8(i8),
    S32(i32),
    S64(i64),
    U8(u8),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    C64(Complex32),
}

macro_rules! map_array_data {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ArrayData::Pred($values) => ArrayData::Pred($body),
            ArrayData::S8($values) => ArrayData::S8($body),
            ArrayData::S32($values) => ArrayData::S32($body),
            ArrayData::S64($values) => ArrayData::S64($body),
            ArrayData::U8($values) => ArrayData::U8($body),
            ArrayData::U32($values) => ArrayData::U32($body),
            ArrayData::U64($values) => ArrayData::U64($body),
            ArrayData::F32($values) => ArrayData::F32($body),
            ArrayData::F64($values) => ArrayData::F64($body),
            ArrayData::C64($values) => ArrayData::C64($body),
        }
    };
}

macro_rules! with_array_data {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ArrayData::Pred($values) => $body,
            ArrayData::S8($values) => $body,
            ArrayData::S32($values) => $body,
            ArrayData::S64($values) => $body,
            ArrayData::U8($values) => $body,
            ArrayData::U32($values) => $body,
            ArrayData::U64($values) => $body,
            ArrayData::F32($values) => $body,
            ArrayData::F64($values) => $body,
            ArrayData::C64($values) => $body,
        }
    };
}

impl ArrayData {
    pub fn element_type(&self) -> PrimitiveType {
        match self {
            ArrayData::Pred(_) => PrimitiveType::Pred,
            ArrayData::S8(_) => PrimitiveType::S8,
            ArrayData::S32(_) => PrimitiveType::S32,
            ArrayData::S64(_) => PrimitiveType::S64,
            ArrayData::U8(_) => PrimitiveType::U8,
            ArrayData::U32(_) => PrimitiveType::U32,
            ArrayData::U64(_) => PrimitiveType::U64,
            ArrayData::F32(_) => PrimitiveType::F32,
            ArrayData::F64(_) => PrimitiveType::F64,
            ArrayData::C64(_) => PrimitiveType::C64,
        }
    }

    pub fn len(&self) -> usize {
        with_array_data!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, physical: usize) -> Option<Scalar> {
        match self {
            ArrayData::Pred(values) => values.get(physical).copied().map(Scalar::Pred),
            ArrayData::S8(values) => values.get(physical).copied().map(Scalar::S8),
            ArrayData::S32(values) => values.get(physical).copied().map(Scalar::S32),
            ArrayData::S64(values) => values.get(physical).copied().map(Scalar::S64),
            ArrayData::U8(values) => values.get(physical).copied().map(Scalar::U8),
            ArrayData::U32(values) => values.get(physical).copied().map(Scalar::U32),
            ArrayData::U64(values) => values.get(physical).copied().map(Scalar::U64),
            ArrayData::F32(values) => values.get(physical).copied().map(Scalar::F32),
            ArrayData::F64(values) => values.get(physical).copied().map(Scalar::F64),
            ArrayData::C64(values) => values.get(physical).copied().map(Scalar::C64),
        }
    }

    /// Zero-filled storage of `len` elements.
    pub fn zeros(element_type: PrimitiveType, len: usize) -> Self {
        match element_type {
            PrimitiveType::Pred => ArrayData::Pred(vec![false; len]),
            PrimitiveType::S8 => ArrayData::S8(vec![0; len]),
            PrimitiveType::S32 => ArrayData::S32(vec![0; len]),
            PrimitiveType::S64 => ArrayData::S64(vec![0; len]),
            PrimitiveType::U8 => ArrayData::U8(vec![0; len]),
            PrimitiveType::U32 => ArrayData::U32(vec![0; len]),
            PrimitiveType::U64 => ArrayData::U64(vec![0; len]),
            PrimitiveType::F32 => ArrayData::F32(vec![0.0; len]),
            PrimitiveType::F64 => ArrayData::F64(vec![0.0; len]),
            PrimitiveType::C64 => ArrayData::C64(vec![Complex32::new(0.0, 0.0); len]),
        }
    }

    /// Storage of `element_type` built from scalars of the same kind.
    pub fn from_scalars(element_type: PrimitiveType, scalars: &[Scalar]) -> Result<Self> {
        let mut data = Self::zeros(element_type, scalars.len());
        for (idx, scalar) in scalars.iter().enumerate() {
            data.set(idx, *scalar)?;
        }
        Ok(data)
    }

    fn set(&mut self, physical: usize, scalar: Scalar) -> Result<()> {
        let stored = match (&mut *self, scalar) {
            (ArrayData::Pred(values), Scalar::Pred(v)) => values.get_mut(physical).map(|s| *s = v),
            (ArrayData::S8(values), Scalar::S8(v)) => values.get_mut(physical).map(|s| *s = v),
            (ArrayData::S32(values), Scalar::S32(v)) => values.get_mut(physical).map(|s| *s = v),
            (ArrayData::S64(values), Scalar::S64(v)) => values.get_mut(physical).map(|s| *s = v),
            (ArrayData::U8(values), Scalar::U8(v)) => values.get_mut(physical).map(|s| *s = v),
            (ArrayData::U32(values), Scalar::U32(v)) => values.get_mut(physical).map(|s| *s = v),
            (ArrayData::U64(values), Scalar::U64(v)) => values.get_mut(physical).map(|s| *s = v),
            (ArrayData::F32(values), Scalar::F32(v)) => values.get_mut(physical).map(|s| *s = v),
            (ArrayData::F64(values), Scalar::F64(v)) => values.get_mut(physical).map(|s| *s = v),
            (ArrayData::C64(values), Scalar::C64(v)) => values.get_mut(physical).map(|s| *s = v),
            (data, scalar) => {
                return Err(SweepError::InvalidArgument {
                    op: "array_data.set",
                    msg: format!(
                        "cannot store {} element in {} storage",
                        scalar.element_type(),
                        data.element_type()
                    ),
                })
            }
        };
        stored.ok_or_else(|| SweepError::InvalidArgument {
            op: "array_data.set",
            msg: format!("index {physical} out of range for {} elements", self.len()),
        })
    }

    fn permuted(&self, dimensions: &[usize], from: &Layout, to: &Layout) -> Self {
        map_array_data!(self, values => permute(values, dimensions, from, to))
    }
}

fn permute<T: Copy>(values: &[T], dimensions: &[usize], from: &Layout, to: &Layout) -> Vec<T> {
    let mut out = values.to_vec();
    for index in logical_indices(dimensions) {
        out[to.physical_index(dimensions, &index)] = values[from.physical_index(dimensions, &index)];
    }
    out
}

/// Every multi-index of `dimensions` in row-major order.
pub fn logical_indices(dimensions: &[usize]) -> impl Iterator<Item = Vec<usize>> + '_ {
    let total: usize = dimensions.iter().product();
    (0..total).map(move |mut idx| {
        let mut coord = vec![0; dimensions.len()];
        for i in (0..dimensions.len()).rev() {
            coord[i] = idx % dimensions[i];
            idx /= dimensions[i];
        }
        coord
    })
}

impl Scalar {
    pub fn element_type(&self) -> PrimitiveType {
        match self {
            Scalar::Pred(_) => PrimitiveType::Pred,
            Scalar::S8(_) => PrimitiveType::S8,
            Scalar::S32(_) => PrimitiveType::S32,
            Scalar::S64(_) => PrimitiveType::S64,
            Scalar::U8(_) => PrimitiveType::U8,
            Scalar::U32(_) => PrimitiveType::U32,
            Scalar::U64(_) => PrimitiveType::U64,
            Scalar::F32(_) => PrimitiveType::F32,
            Scalar::F64(_) => PrimitiveType::F64,
            Scalar::C64(_) => PrimitiveType::C64,
        }
    }

    fn digest_bytes(&self) -> Vec<u8> {
        match self {
            Scalar::Pred(v) => vec![u8::from(*v)],
            Scalar::S8(v) => v.to_le_bytes().to_vec(),
            Scalar::S32(v) => v.to_le_bytes().to_vec(),
            Scalar::S64(v) => v.to_le_bytes().to_vec(),
            Scalar::U8(v) => vec![*v],
            Scalar::U32(v) => v.to_le_bytes().to_vec(),
            Scalar::U64(v) => v.to_le_bytes().to_vec(),
            Scalar::F32(v) => v.to_le_bytes().to_vec(),
            Scalar::F64(v) => v.to_le_bytes().to_vec(),
            Scalar::C64(v) => [v.re.to_le_bytes(), v.im.to_le_bytes()].concat(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Pred(v) => write!(f, "{v}"),
            Scalar::S8(v) => write!(f, "{v}"),
            Scalar::S32(v) => write!(f, "{v}"),
            Scalar::S64(v) => write!(f, "{v}"),
            Scalar::U8(v) => write!(f, "{v}"),
            Scalar::U32(v) => write!(f, "{v}"),
            Scalar::U64(v) => write!(f, "{v}"),
            Scalar::F32(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v}"),
            Scalar::C64(v) => write!(f, "({}, {})", v.re, v.im),
        }
    }
}

/// Rust element types that map onto a [`PrimitiveType`].
pub trait NativeType: Copy {
    const PRIMITIVE: PrimitiveType;
    fn into_data(values: Vec<Self>) -> ArrayData;
    fn from_scalar(scalar: Scalar) -> Option<Self>;
}

macro_rules! impl_native_type {
    ($ty:ty, $variant:ident) => {
        impl NativeType for $ty {
            const PRIMITIVE: PrimitiveType = PrimitiveType::$variant;

            fn into_data(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn from_scalar(scalar: Scalar) -> Option<Self> {
                match scalar {
                    Scalar::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
    };
}

impl_native_type!(bool, Pred);
impl_native_type!(i8, S8);
impl_native_type!(i32, S32);
impl_native_type!(i64, S64);
impl_native_type!(u8, U8);
impl_native_type!(u32, U32);
impl_native_type!(u64, U64);
impl_native_type!(f32, F32);
impl_native_type!(f64, F64);
impl_native_type!(Complex32, C64);

#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Array(ArrayData),
    Tuple(Vec<Literal>),
}

/// Host-resident value: typed array data in a physical layout, or a tuple of literals.
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    shape: Shape,
    payload: Payload,
}

impl Literal {
    /// Array literal from row-major `data`, stored in the default layout.
    pub fn from_data(dimensions: &[usize], data: ArrayData) -> Result<Self> {
        let expected: usize = dimensions.iter().product();
        if data.len() != expected {
            return Err(SweepError::InvalidArgument {
                op: "literal.from_data",
                msg: format!(
                    "dimensions {:?} need {} elements, got {}",
                    dimensions,
                    expected,
                    data.len()
                ),
            });
        }
        Ok(Self {
            shape: Shape::array(data.element_type(), dimensions),
            payload: Payload::Array(data),
        })
    }

    /// Array literal whose `data` is already in the physical order of `shape`'s layout.
    pub fn from_physical(shape: Shape, data: ArrayData) -> Result<Self> {
        let (element_type, dimensions) = match &shape {
            Shape::Array {
                element_type,
                dimensions,
                ..
            } => (*element_type, dimensions.clone()),
            Shape::Tuple(_) => {
                return Err(SweepError::InvalidArgument {
                    op: "literal.from_physical",
                    msg: "tuple shapes need Literal::tuple".to_string(),
                })
            }
        };
        if element_type != data.element_type() {
            return Err(SweepError::ShapeMismatch {
                op: "literal.from_physical",
                expected: shape.human_string(),
                actual: format!("{} data", data.element_type()),
            });
        }
        let layout = shape
            .layout()
            .cloned()
            .unwrap_or_else(|| Layout::default_for_rank(dimensions.len()));
        let mut literal = Self::from_data(&dimensions, data)?;
        literal.shape = literal.shape.relaid(layout)?;
        Ok(literal)
    }

    pub fn from_vec<T: NativeType>(dimensions: &[usize], values: Vec<T>) -> Result<Self> {
        Self::from_data(dimensions, T::into_data(values))
    }

    pub fn r0<T: NativeType>(value: T) -> Self {
        Self {
            shape: Shape::scalar(T::PRIMITIVE),
            payload: Payload::Array(T::into_data(vec![value])),
        }
    }

    pub fn r1<T: NativeType>(values: &[T]) -> Self {
        Self {
            shape: Shape::array(T::PRIMITIVE, &[values.len()]),
            payload: Payload::Array(T::into_data(values.to_vec())),
        }
    }

    pub fn r2<T: NativeType>(rows: &[Vec<T>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|row| row.len() != cols) {
            return Err(SweepError::InvalidArgument {
                op: "literal.r2",
                msg: "rows must have equal length".to_string(),
            });
        }
        let values: Vec<T> = rows.iter().flatten().copied().collect();
        Self::from_vec(&[rows.len(), cols], values)
    }

    /// Rank-1 `u8` literal holding the bytes of `text`.
    pub fn r1_u8(text: &str) -> Self {
        Self::r1(text.as_bytes())
    }

    pub fn tuple(elements: Vec<Literal>) -> Self {
        Self {
            shape: Shape::Tuple(elements.iter().map(|element| element.shape.clone()).collect()),
            payload: Payload::Tuple(elements),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self.payload, Payload::Tuple(_))
    }

    pub fn element_type(&self) -> Option<PrimitiveType> {
        self.shape.element_type()
    }

    pub fn dimensions(&self) -> &[usize] {
        self.shape.dimensions()
    }

    pub fn tuple_elements(&self) -> &[Literal] {
        match &self.payload {
            Payload::Tuple(elements) => elements,
            Payload::Array(_) => &[],
        }
    }

    /// Physical storage of an array literal.
    pub fn data(&self) -> Option<&ArrayData> {
        match &self.payload {
            Payload::Array(data) => Some(data),
            Payload::Tuple(_) => None,
        }
    }

    pub fn layout(&self) -> Option<&Layout> {
        self.shape.layout()
    }

    /// Element at a logical multi-index, independent of physical layout.
    pub fn get(&self, index: &[usize]) -> Option<Scalar> {
        let data = self.data()?;
        let dimensions = self.dimensions();
        if index.len() != dimensions.len() || index.iter().zip(dimensions).any(|(i, d)| i >= d) {
            return None;
        }
        let layout = self.layout()?;
        data.get(layout.physical_index(dimensions, index))
    }

    /// Elements in logical row-major order.
    pub fn logical_scalars(&self) -> Vec<Scalar> {
        logical_indices(self.dimensions())
            .filter_map(|index| self.get(&index))
            .collect()
    }

    pub fn to_vec<T: NativeType>(&self) -> Result<Vec<T>> {
        self.logical_scalars()
            .into_iter()
            .map(|scalar| {
                T::from_scalar(scalar).ok_or_else(|| SweepError::InvalidArgument {
                    op: "literal.to_vec",
                    msg: format!(
                        "literal of type {} read as {}",
                        scalar.element_type(),
                        T::PRIMITIVE
                    ),
                })
            })
            .collect()
    }

    /// Same logical content, physically re-ordered to `layout`.
    pub fn relayout(&self, layout: &Layout) -> Result<Literal> {
        let data = self.data().ok_or_else(|| SweepError::InvalidArgument {
            op: "literal.relayout",
            msg: format!("cannot relayout tuple {}", self.shape.human_string()),
        })?;
        let shape = self.shape.relaid(layout.clone())?;
        let from = self
            .layout()
            .cloned()
            .unwrap_or_else(|| Layout::default_for_rank(layout.rank()));
        Ok(Self {
            payload: Payload::Array(data.permuted(self.dimensions(), &from, layout)),
            shape,
        })
    }

    /// Relayout into whatever layout `shape` carries after checking it matches this literal.
    pub fn relayout_to_shape(&self, shape: &Shape) -> Result<Literal> {
        if !self.shape.compatible(shape) {
            return Err(SweepError::ShapeMismatch {
                op: "literal.relayout_to_shape",
                expected: shape.human_string(),
                actual: self.shape.human_string(),
            });
        }
        match (&self.payload, shape) {
            (Payload::Tuple(elements), Shape::Tuple(shapes)) => Ok(Self::tuple(
                elements
                    .iter()
                    .zip(shapes)
                    .map(|(element, shape)| element.relayout_to_shape(shape))
                    .collect::<Result<Vec<_>>>()?,
            )),
            _ => match shape.layout() {
                Some(layout) => self.relayout(layout),
                None => Ok(self.clone()),
            },
        }
    }

    /// Bytes of a rank-1 `u8` literal as text.
    pub fn u8s_string(&self) -> Result<String> {
        let bytes = self.to_vec::<u8>()?;
        String::from_utf8(bytes).map_err(|err| SweepError::InvalidArgument {
            op: "literal.u8s_string",
            msg: format!("literal is not utf-8: {err}"),
        })
    }

    /// blake3 digest of the shape and the logical element sequence.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        self.update_digest(&mut hasher);
        hasher.finalize().to_hex().to_string()
    }

    fn update_digest(&self, hasher: &mut blake3::Hasher) {
        hasher.update(self.shape.human_string().as_bytes());
        match &self.payload {
            Payload::Array(_) => {
                for scalar in self.logical_scalars() {
                    hasher.update(&scalar.digest_bytes());
                }
            }
            Payload::Tuple(elements) => {
                for element in elements {
                    element.update_digest(hasher);
                }
            }
        }
    }

    fn write_elements(&self, f: &mut fmt::Formatter<'_>, prefix: &mut Vec<usize>) -> fmt::Result {
        let dimensions = self.dimensions();
        let depth = prefix.len();
        if depth == dimensions.len() {
            return match self.get(prefix) {
                Some(scalar) => write!(f, "{scalar}"),
                None => f.write_str("?"),
            };
        }
        f.write_str("{")?;
        for i in 0..dimensions[depth] {
            if i > 0 {
                f.write_str(", ")?;
            }
            prefix.push(i);
            self.write_elements(f, prefix)?;
            prefix.pop();
        }
        f.write_str("}")
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Array(_) => {
                write!(f, "{} ", self.shape.human_string_with_layout())?;
                self.write_elements(f, &mut Vec::new())
            }
            Payload::Tuple(elements) => {
                f.write_str("(\n")?;
                for element in elements {
                    writeln!(f, "{element},")?;
                }
                f.write_str(")")
            }
        }
    }
}
