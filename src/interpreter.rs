//! In-process reference backend.
//!
//! [`GraphBuilder`] records a small elementwise computation graph and [`LocalClient`]
//! evaluates it on host literals while modelling device buffers as owned handles. It
//! follows the [`Backend`] contract exactly: arguments may arrive in any physical
//! layout, and results are returned in the requested output layout.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use num_complex::Complex32;

use crate::client::{Backend, ComputationBuilder, ExecutionOptions};
use crate::error::{Result, SweepError};
use crate::literal::{logical_indices, ArrayData, Literal, Scalar};
use crate::shape::{PrimitiveType, Shape};

/// Reference to a value produced by an earlier op in the same builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Max,
    Min,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Parameter { number: usize, name: String },
    Constant(Literal),
    Unary(UnaryOp, ValueId),
    Binary(BinaryOp, ValueId, ValueId),
    Compare(CompareOp, ValueId, ValueId),
    Select {
        pred: ValueId,
        on_true: ValueId,
        on_false: ValueId,
    },
    Tuple(Vec<ValueId>),
    GetTupleElement(ValueId, usize),
    Transpose(ValueId, Vec<usize>),
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    op: Op,
    shape: Shape,
}

/// Executable graph; the root is the last op added.
#[derive(Debug, Clone, PartialEq)]
pub struct Computation {
    name: String,
    nodes: Vec<Node>,
    parameters: Vec<Shape>,
}

impl Computation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_shapes(&self) -> &[Shape] {
        &self.parameters
    }

    pub fn result_shape(&self) -> Option<&Shape> {
        self.nodes.last().map(|node| &node.shape)
    }
}

/// Records ops; the first invalid op is reported by [`build`](ComputationBuilder::build).
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    name: String,
    nodes: Vec<Node>,
    error: Option<String>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            error: None,
        }
    }

    fn push(&mut self, op: Op, shape: Result<Shape>) -> ValueId {
        let shape = match shape {
            Ok(shape) => shape,
            Err(err) => {
                if self.error.is_none() {
                    self.error = Some(err.to_string());
                }
                Shape::Tuple(Vec::new())
            }
        };
        self.nodes.push(Node { op, shape });
        ValueId(self.nodes.len() - 1)
    }

    fn shape_of(&self, id: ValueId) -> Result<Shape> {
        self.nodes
            .get(id.0)
            .map(|node| node.shape.clone())
            .ok_or_else(|| invalid_op(format!("value {} does not belong to this builder", id.0)))
    }

    pub fn parameter(&mut self, number: usize, shape: Shape, name: impl Into<String>) -> ValueId {
        let op = Op::Parameter {
            number,
            name: name.into(),
        };
        let duplicate = self
            .nodes
            .iter()
            .any(|node| matches!(node.op, Op::Parameter { number: n, .. } if n == number));
        let shape = if duplicate {
            Err(invalid_op(format!("duplicate parameter number {number}")))
        } else {
            Ok(shape)
        };
        self.push(op, shape)
    }

    pub fn constant(&mut self, literal: Literal) -> ValueId {
        let shape = literal.shape().clone();
        self.push(Op::Constant(literal), Ok(shape))
    }

    pub fn constant_r0<T: crate::literal::NativeType>(&mut self, value: T) -> ValueId {
        self.constant(Literal::r0(value))
    }

    pub fn unary(&mut self, kind: UnaryOp, operand: ValueId) -> ValueId {
        let shape = self.shape_of(operand).and_then(|shape| {
            let ty = array_type(&shape)?;
            let allowed = match kind {
                UnaryOp::Neg => !(ty.is_pred() || is_unsigned(ty)),
                UnaryOp::Abs => !(ty.is_pred() || ty.is_complex()),
                UnaryOp::Not => ty.is_pred(),
            };
            if allowed {
                Ok(shape)
            } else {
                Err(invalid_op(format!("{kind:?} is not defined for {ty}")))
            }
        });
        self.push(Op::Unary(kind, operand), shape)
    }

    pub fn binary(&mut self, kind: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let shape = self.elementwise_shape(lhs, rhs).and_then(|(ty, dims)| {
            let allowed = match kind {
                BinaryOp::And | BinaryOp::Or => ty.is_pred(),
                BinaryOp::Max | BinaryOp::Min => !(ty.is_pred() || ty.is_complex()),
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => !ty.is_pred(),
            };
            if allowed {
                Ok(Shape::array(ty, &dims))
            } else {
                Err(invalid_op(format!("{kind:?} is not defined for {ty}")))
            }
        });
        self.push(Op::Binary(kind, lhs, rhs), shape)
    }

    pub fn compare(&mut self, kind: CompareOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let shape = self.elementwise_shape(lhs, rhs).and_then(|(ty, dims)| {
            if ty.is_complex() && !matches!(kind, CompareOp::Eq | CompareOp::Ne) {
                return Err(invalid_op(format!("{kind:?} is not defined for {ty}")));
            }
            Ok(Shape::array(PrimitiveType::Pred, &dims))
        });
        self.push(Op::Compare(kind, lhs, rhs), shape)
    }

    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn max(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Max, lhs, rhs)
    }

    pub fn gt(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.compare(CompareOp::Gt, lhs, rhs)
    }

    pub fn select(&mut self, pred: ValueId, on_true: ValueId, on_false: ValueId) -> ValueId {
        let shape = self.elementwise_shape(on_true, on_false).and_then(|(ty, dims)| {
            let pred_shape = self.shape_of(pred)?;
            if array_type(&pred_shape)? != PrimitiveType::Pred {
                return Err(invalid_op(format!(
                    "select predicate must be pred, got {}",
                    pred_shape.human_string()
                )));
            }
            let pred_dims = pred_shape.dimensions();
            if !pred_dims.is_empty() && pred_dims != dims.as_slice() {
                return Err(invalid_op(format!(
                    "select predicate {} does not match branches {:?}",
                    pred_shape.human_string(),
                    dims
                )));
            }
            Ok(Shape::array(ty, &dims))
        });
        self.push(
            Op::Select {
                pred,
                on_true,
                on_false,
            },
            shape,
        )
    }

    pub fn tuple(&mut self, elements: &[ValueId]) -> ValueId {
        let shape = elements
            .iter()
            .map(|id| self.shape_of(*id))
            .collect::<Result<Vec<_>>>()
            .map(Shape::Tuple);
        self.push(Op::Tuple(elements.to_vec()), shape)
    }

    pub fn get_tuple_element(&mut self, operand: ValueId, index: usize) -> ValueId {
        let shape = self.shape_of(operand).and_then(|shape| {
            shape.tuple_elements().get(index).cloned().ok_or_else(|| {
                invalid_op(format!(
                    "tuple index {index} out of range for {}",
                    shape.human_string()
                ))
            })
        });
        self.push(Op::GetTupleElement(operand, index), shape)
    }

    /// Output dimension `i` is input dimension `permutation[i]`.
    pub fn transpose(&mut self, operand: ValueId, permutation: &[usize]) -> ValueId {
        let shape = self.shape_of(operand).and_then(|shape| {
            let ty = array_type(&shape)?;
            let dims = shape.dimensions();
            let mut seen = vec![false; dims.len()];
            for &axis in permutation {
                if axis >= dims.len() || seen[axis] {
                    return Err(invalid_op(format!(
                        "transpose permutation {permutation:?} invalid for {}",
                        shape.human_string()
                    )));
                }
                seen[axis] = true;
            }
            if permutation.len() != dims.len() {
                return Err(invalid_op(format!(
                    "transpose permutation {permutation:?} invalid for {}",
                    shape.human_string()
                )));
            }
            let out: Vec<usize> = permutation.iter().map(|&axis| dims[axis]).collect();
            Ok(Shape::array(ty, &out))
        });
        self.push(Op::Transpose(operand, permutation.to_vec()), shape)
    }

    /// Element type and dimensions of an elementwise op; rank-0 operands broadcast.
    fn elementwise_shape(&self, lhs: ValueId, rhs: ValueId) -> Result<(PrimitiveType, Vec<usize>)> {
        let lhs_shape = self.shape_of(lhs)?;
        let rhs_shape = self.shape_of(rhs)?;
        let lhs_type = array_type(&lhs_shape)?;
        let rhs_type = array_type(&rhs_shape)?;
        if lhs_type != rhs_type {
            return Err(invalid_op(format!(
                "operand types differ: {} vs {}",
                lhs_shape.human_string(),
                rhs_shape.human_string()
            )));
        }
        let (lhs_dims, rhs_dims) = (lhs_shape.dimensions(), rhs_shape.dimensions());
        let dims = if lhs_dims == rhs_dims || rhs_dims.is_empty() {
            lhs_dims.to_vec()
        } else if lhs_dims.is_empty() {
            rhs_dims.to_vec()
        } else {
            return Err(invalid_op(format!(
                "operand shapes differ: {} vs {}",
                lhs_shape.human_string(),
                rhs_shape.human_string()
            )));
        };
        Ok((lhs_type, dims))
    }
}

impl ComputationBuilder for GraphBuilder {
    type Computation = Computation;

    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Result<Computation> {
        if let Some(msg) = &self.error {
            return Err(SweepError::Build {
                op: "graph_builder.build",
                msg: format!("{}: {msg}", self.name),
            });
        }
        if self.nodes.is_empty() {
            return Err(SweepError::Build {
                op: "graph_builder.build",
                msg: format!("{}: computation has no ops", self.name),
            });
        }
        let mut parameters: BTreeMap<usize, Shape> = BTreeMap::new();
        for node in &self.nodes {
            if let Op::Parameter { number, .. } = node.op {
                parameters.insert(number, node.shape.clone());
            }
        }
        if let Some((position, number)) = parameters
            .keys()
            .enumerate()
            .find(|(position, number)| position != *number)
        {
            return Err(SweepError::Build {
                op: "graph_builder.build",
                msg: format!(
                    "{}: parameter numbers must be dense, found {number} at position {position}",
                    self.name
                ),
            });
        }
        Ok(Computation {
            name: self.name.clone(),
            nodes: self.nodes.clone(),
            parameters: parameters.into_values().collect(),
        })
    }
}

/// A built computation rebuilds to itself, so it can be passed wherever a builder is expected.
impl ComputationBuilder for Computation {
    type Computation = Computation;

    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Result<Computation> {
        Ok(self.clone())
    }
}

fn invalid_op(msg: String) -> SweepError {
    SweepError::InvalidArgument {
        op: "graph_builder",
        msg,
    }
}

fn array_type(shape: &Shape) -> Result<PrimitiveType> {
    shape
        .element_type()
        .ok_or_else(|| invalid_op(format!("expected an array, got {}", shape.human_string())))
}

fn is_unsigned(ty: PrimitiveType) -> bool {
    matches!(ty, PrimitiveType::U8 | PrimitiveType::U32 | PrimitiveType::U64)
}

/// Counters describing what a [`LocalClient`] has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub executions: usize,
    pub uploads: usize,
    pub live_buffers: usize,
    /// Constant ops counted as folded while the `constant_folding` pass is enabled.
    /// Evaluation itself is identical with the pass on or off.
    pub folded_constants: usize,
}

#[derive(Debug, Default)]
struct DeviceStore {
    next_id: u64,
    buffers: BTreeMap<u64, Literal>,
    stats: ClientStats,
}

/// Owned device buffer; dropping it frees the buffer.
#[derive(Debug)]
pub struct GlobalData {
    id: u64,
    shape: Shape,
    store: Arc<Mutex<DeviceStore>>,
}

impl GlobalData {
    /// Shape, including the physical layout, of the resident value.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

impl Drop for GlobalData {
    fn drop(&mut self) {
        if let Ok(mut store) = self.store.lock() {
            store.buffers.remove(&self.id);
            store.stats.live_buffers = store.buffers.len();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalClient {
    store: Arc<Mutex<DeviceStore>>,
}

impl LocalClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Result<ClientStats> {
        Ok(self.lock("local_client.stats")?.stats)
    }

    fn lock(&self, op: &'static str) -> Result<MutexGuard<'_, DeviceStore>> {
        self.store.lock().map_err(|_| SweepError::Execution {
            op,
            msg: "device store lock poisoned".to_string(),
        })
    }

    fn allocate(&self, literal: Literal) -> Result<GlobalData> {
        let mut store = self.lock("local_client.allocate")?;
        let id = store.next_id;
        store.next_id += 1;
        let shape = literal.shape().clone();
        store.buffers.insert(id, literal);
        store.stats.uploads += 1;
        store.stats.live_buffers = store.buffers.len();
        Ok(GlobalData {
            id,
            shape,
            store: Arc::clone(&self.store),
        })
    }

    fn run(
        &self,
        computation: &Computation,
        arguments: &[&GlobalData],
        options: &ExecutionOptions,
    ) -> Result<Literal> {
        if arguments.len() != computation.parameters.len() {
            return Err(SweepError::Execution {
                op: "local_client.execute",
                msg: format!(
                    "{} takes {} argument(s), got {}",
                    computation.name,
                    computation.parameters.len(),
                    arguments.len()
                ),
            });
        }
        let inputs = {
            let mut store = self.lock("local_client.execute")?;
            store.stats.executions += 1;
            let mut inputs = Vec::with_capacity(arguments.len());
            for (number, (argument, parameter)) in
                arguments.iter().zip(&computation.parameters).enumerate()
            {
                if !Arc::ptr_eq(&argument.store, &self.store) {
                    return Err(SweepError::Execution {
                        op: "local_client.execute",
                        msg: format!("argument {number} belongs to another client"),
                    });
                }
                let literal = store.buffers.get(&argument.id).cloned().ok_or_else(|| {
                    SweepError::Execution {
                        op: "local_client.execute",
                        msg: format!("argument {number} was released"),
                    }
                })?;
                if !literal.shape().compatible(parameter) {
                    return Err(SweepError::Execution {
                        op: "local_client.execute",
                        msg: format!(
                            "argument {number} has shape {}, parameter expects {}",
                            literal.shape().human_string(),
                            parameter.human_string()
                        ),
                    });
                }
                inputs.push(literal);
            }
            inputs
        };

        let fold = !options.debug_options.is_pass_disabled("constant_folding");
        let result = evaluate(computation, &inputs)?;
        if fold {
            let folded = computation
                .nodes
                .iter()
                .filter(|node| matches!(node.op, Op::Constant(_)))
                .count();
            self.lock("local_client.execute")?.stats.folded_constants += folded;
        }
        debug!(
            "executed {} with {} argument(s)",
            computation.name,
            arguments.len()
        );
        match &options.shape_with_output_layout {
            Some(shape) => result.relayout_to_shape(shape).map_err(|err| SweepError::Execution {
                op: "local_client.execute",
                msg: format!("cannot produce output layout {shape}: {err}"),
            }),
            None => Ok(result),
        }
    }
}

impl Backend for LocalClient {
    type Computation = Computation;
    type Handle = GlobalData;

    fn execute(
        &self,
        computation: &Computation,
        arguments: &[&GlobalData],
        options: &ExecutionOptions,
    ) -> Result<GlobalData> {
        let result = self.run(computation, arguments, options)?;
        self.allocate(result)
    }

    fn execute_and_transfer(
        &self,
        computation: &Computation,
        arguments: &[&GlobalData],
        options: &ExecutionOptions,
    ) -> Result<Literal> {
        self.run(computation, arguments, options)
    }

    fn transfer(&self, handle: &GlobalData) -> Result<Literal> {
        let store = self.lock("local_client.transfer")?;
        store
            .buffers
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| SweepError::Transfer {
                op: "local_client.transfer",
                msg: format!("buffer {} is not resident", handle.id),
            })
    }

    fn transfer_to_server(&self, literal: &Literal) -> Result<GlobalData> {
        self.allocate(literal.clone())
    }
}

fn evaluate(computation: &Computation, inputs: &[Literal]) -> Result<Literal> {
    let mut values: Vec<Literal> = Vec::with_capacity(computation.nodes.len());
    for node in &computation.nodes {
        let value = match &node.op {
            Op::Parameter { number, .. } => inputs[*number].clone(),
            Op::Constant(literal) => literal.clone(),
            Op::Unary(kind, operand) => map_elements(&values[operand.0], &node.shape, |x| {
                apply_unary(*kind, x)
            })?,
            Op::Binary(kind, lhs, rhs) => {
                zip_elements(&values[lhs.0], &values[rhs.0], &node.shape, |a, b| {
                    apply_binary(*kind, a, b)
                })?
            }
            Op::Compare(kind, lhs, rhs) => {
                zip_elements(&values[lhs.0], &values[rhs.0], &node.shape, |a, b| {
                    apply_compare(*kind, a, b)
                })?
            }
            Op::Select {
                pred,
                on_true,
                on_false,
            } => select(
                &values[pred.0],
                &values[on_true.0],
                &values[on_false.0],
                &node.shape,
            )?,
            Op::Tuple(elements) => {
                Literal::tuple(elements.iter().map(|id| values[id.0].clone()).collect())
            }
            Op::GetTupleElement(operand, index) => values[operand.0]
                .tuple_elements()
                .get(*index)
                .cloned()
                .ok_or_else(|| execution_error(format!("tuple index {index} out of range")))?,
            Op::Transpose(operand, permutation) => {
                transpose(&values[operand.0], permutation, &node.shape)?
            }
        };
        values.push(value);
    }
    values
        .pop()
        .ok_or_else(|| execution_error(format!("{} has no ops", computation.name)))
}

fn execution_error(msg: String) -> SweepError {
    SweepError::Execution {
        op: "local_client.evaluate",
        msg,
    }
}

fn build_array(shape: &Shape, scalars: Vec<Scalar>) -> Result<Literal> {
    let ty = array_type(shape)?;
    Literal::from_data(shape.dimensions(), ArrayData::from_scalars(ty, &scalars)?)
}

/// Logical elements of `literal`, repeated when a rank-0 value meets a larger shape.
fn broadcast(literal: &Literal, shape: &Shape) -> Vec<Scalar> {
    let scalars = literal.logical_scalars();
    if literal.dimensions().is_empty() && !shape.dimensions().is_empty() {
        vec![scalars[0]; shape.element_count()]
    } else {
        scalars
    }
}

fn map_elements<F>(operand: &Literal, shape: &Shape, f: F) -> Result<Literal>
where
    F: Fn(Scalar) -> Result<Scalar>,
{
    let out = operand
        .logical_scalars()
        .into_iter()
        .map(f)
        .collect::<Result<Vec<_>>>()?;
    build_array(shape, out)
}

fn zip_elements<F>(lhs: &Literal, rhs: &Literal, shape: &Shape, f: F) -> Result<Literal>
where
    F: Fn(Scalar, Scalar) -> Result<Scalar>,
{
    let out = broadcast(lhs, shape)
        .into_iter()
        .zip(broadcast(rhs, shape))
        .map(|(a, b)| f(a, b))
        .collect::<Result<Vec<_>>>()?;
    build_array(shape, out)
}

fn select(pred: &Literal, on_true: &Literal, on_false: &Literal, shape: &Shape) -> Result<Literal> {
    let out = broadcast(pred, shape)
        .into_iter()
        .zip(broadcast(on_true, shape).into_iter().zip(broadcast(on_false, shape)))
        .map(|(p, (t, f))| match p {
            Scalar::Pred(true) => Ok(t),
            Scalar::Pred(false) => Ok(f),
            other => Err(execution_error(format!("select predicate {other} is not pred"))),
        })
        .collect::<Result<Vec<_>>>()?;
    build_array(shape, out)
}

fn transpose(operand: &Literal, permutation: &[usize], shape: &Shape) -> Result<Literal> {
    let mut out = Vec::with_capacity(shape.element_count());
    for index in logical_indices(shape.dimensions()) {
        let mut source = vec![0; index.len()];
        for (out_axis, &in_axis) in permutation.iter().enumerate() {
            source[in_axis] = index[out_axis];
        }
        let value = operand
            .get(&source)
            .ok_or_else(|| execution_error(format!("transpose index {source:?} out of range")))?;
        out.push(value);
    }
    build_array(shape, out)
}

trait Arith: Copy + PartialOrd {
    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
}

macro_rules! impl_arith_int {
    ($($ty:ty),*) => {
        $(impl Arith for $ty {
            fn add(self, other: Self) -> Self { self.wrapping_add(other) }
            fn sub(self, other: Self) -> Self { self.wrapping_sub(other) }
            fn mul(self, other: Self) -> Self { self.wrapping_mul(other) }
        })*
    };
}

macro_rules! impl_arith_float {
    ($($ty:ty),*) => {
        $(impl Arith for $ty {
            fn add(self, other: Self) -> Self { self + other }
            fn sub(self, other: Self) -> Self { self - other }
            fn mul(self, other: Self) -> Self { self * other }
        })*
    };
}

impl_arith_int!(i8, i32, i64, u8, u32, u64);
impl_arith_float!(f32, f64);

fn arith<T: Arith>(kind: BinaryOp, a: T, b: T) -> Result<T> {
    match kind {
        BinaryOp::Add => Ok(a.add(b)),
        BinaryOp::Sub => Ok(a.sub(b)),
        BinaryOp::Mul => Ok(a.mul(b)),
        BinaryOp::Max => Ok(if a >= b { a } else { b }),
        BinaryOp::Min => Ok(if a <= b { a } else { b }),
        BinaryOp::And | BinaryOp::Or => Err(execution_error(format!(
            "{kind:?} requires pred operands"
        ))),
    }
}

fn apply_binary(kind: BinaryOp, lhs: Scalar, rhs: Scalar) -> Result<Scalar> {
    match (lhs, rhs) {
        (Scalar::S8(a), Scalar::S8(b)) => arith(kind, a, b).map(Scalar::S8),
        (Scalar::S32(a), Scalar::S32(b)) => arith(kind, a, b).map(Scalar::S32),
        (Scalar::S64(a), Scalar::S64(b)) => arith(kind, a, b).map(Scalar::S64),
        (Scalar::U8(a), Scalar::U8(b)) => arith(kind, a, b).map(Scalar::U8),
        (Scalar::U32(a), Scalar::U32(b)) => arith(kind, a, b).map(Scalar::U32),
        (Scalar::U64(a), Scalar::U64(b)) => arith(kind, a, b).map(Scalar::U64),
        (Scalar::F32(a), Scalar::F32(b)) => arith(kind, a, b).map(Scalar::F32),
        (Scalar::F64(a), Scalar::F64(b)) => arith(kind, a, b).map(Scalar::F64),
        (Scalar::C64(a), Scalar::C64(b)) => complex_arith(kind, a, b).map(Scalar::C64),
        (Scalar::Pred(a), Scalar::Pred(b)) => match kind {
            BinaryOp::And => Ok(Scalar::Pred(a && b)),
            BinaryOp::Or => Ok(Scalar::Pred(a || b)),
            _ => Err(execution_error(format!("{kind:?} is not defined for pred"))),
        },
        (a, b) => Err(execution_error(format!(
            "{kind:?} on mismatched elements {} and {}",
            a.element_type(),
            b.element_type()
        ))),
    }
}

fn complex_arith(kind: BinaryOp, a: Complex32, b: Complex32) -> Result<Complex32> {
    match kind {
        BinaryOp::Add => Ok(a + b),
        BinaryOp::Sub => Ok(a - b),
        BinaryOp::Mul => Ok(a * b),
        _ => Err(execution_error(format!("{kind:?} is not defined for c64"))),
    }
}

fn apply_compare(kind: CompareOp, lhs: Scalar, rhs: Scalar) -> Result<Scalar> {
    let ordering = match (lhs, rhs) {
        (Scalar::Pred(a), Scalar::Pred(b)) => a.partial_cmp(&b),
        (Scalar::S8(a), Scalar::S8(b)) => a.partial_cmp(&b),
        (Scalar::S32(a), Scalar::S32(b)) => a.partial_cmp(&b),
        (Scalar::S64(a), Scalar::S64(b)) => a.partial_cmp(&b),
        (Scalar::U8(a), Scalar::U8(b)) => a.partial_cmp(&b),
        (Scalar::U32(a), Scalar::U32(b)) => a.partial_cmp(&b),
        (Scalar::U64(a), Scalar::U64(b)) => a.partial_cmp(&b),
        (Scalar::F32(a), Scalar::F32(b)) => a.partial_cmp(&b),
        (Scalar::F64(a), Scalar::F64(b)) => a.partial_cmp(&b),
        (Scalar::C64(a), Scalar::C64(b)) => {
            let equal = a == b;
            return match kind {
                CompareOp::Eq => Ok(Scalar::Pred(equal)),
                CompareOp::Ne => Ok(Scalar::Pred(!equal)),
                _ => Err(execution_error(format!("{kind:?} is not defined for c64"))),
            };
        }
        (a, b) => {
            return Err(execution_error(format!(
                "{kind:?} on mismatched elements {} and {}",
                a.element_type(),
                b.element_type()
            )))
        }
    };
    use std::cmp::Ordering;
    let result = match (kind, ordering) {
        (CompareOp::Ne, None) => true,
        (_, None) => false,
        (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
        (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
        (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
        (CompareOp::Ge, Some(o)) => o != Ordering::Less,
        (CompareOp::Lt, Some(o)) => o == Ordering::Less,
        (CompareOp::Le, Some(o)) => o != Ordering::Greater,
    };
    Ok(Scalar::Pred(result))
}

fn apply_unary(kind: UnaryOp, value: Scalar) -> Result<Scalar> {
    let out = match (kind, value) {
        (UnaryOp::Not, Scalar::Pred(v)) => Scalar::Pred(!v),
        (UnaryOp::Neg, Scalar::S8(v)) => Scalar::S8(v.wrapping_neg()),
        (UnaryOp::Neg, Scalar::S32(v)) => Scalar::S32(v.wrapping_neg()),
        (UnaryOp::Neg, Scalar::S64(v)) => Scalar::S64(v.wrapping_neg()),
        (UnaryOp::Neg, Scalar::F32(v)) => Scalar::F32(-v),
        (UnaryOp::Neg, Scalar::F64(v)) => Scalar::F64(-v),
        (UnaryOp::Neg, Scalar::C64(v)) => Scalar::C64(-v),
        (UnaryOp::Abs, Scalar::S8(v)) => Scalar::S8(v.wrapping_abs()),
        (UnaryOp::Abs, Scalar::S32(v)) => Scalar::S32(v.wrapping_abs()),
        (UnaryOp::Abs, Scalar::S64(v)) => Scalar::S64(v.wrapping_abs()),
        (UnaryOp::Abs, v @ (Scalar::U8(_) | Scalar::U32(_) | Scalar::U64(_))) => v,
        (UnaryOp::Abs, Scalar::F32(v)) => Scalar::F32(v.abs()),
        (UnaryOp::Abs, Scalar::F64(v)) => Scalar::F64(v.abs()),
        (kind, v) => {
            return Err(execution_error(format!(
                "{kind:?} is not defined for {}",
                v.element_type()
            )))
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{GraphBuilder, LocalClient};
    use crate::client::{Backend, ComputationBuilder, ExecutionOptions};
    use crate::error::SweepError;
    use crate::layout::Layout;
    use crate::literal::Literal;
    use crate::shape::{PrimitiveType, Shape};

    #[test]
    fn executes_with_arguments_in_any_layout() {
        let mut builder = GraphBuilder::new("add");
        let x = builder.parameter(0, Shape::array(PrimitiveType::F32, &[2, 2]), "x");
        let one = builder.constant_r0(1.0f32);
        builder.add(x, one);
        let computation = builder.build().expect("build");

        let client = LocalClient::new();
        let input = Literal::r2(&[vec![1.0f32, 2.0], vec![3.0, 4.0]]).expect("literal");
        let col_major = input
            .relayout(&Layout::new(vec![0, 1]).expect("layout"))
            .expect("relayout");
        let handle = client.transfer_to_server(&col_major).expect("upload");
        let result = client
            .execute_and_transfer(&computation, &[&handle], &ExecutionOptions::default())
            .expect("execute");
        assert_eq!(result.to_vec::<f32>().expect("values"), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(result.layout(), Some(&Layout::default_for_rank(2)));
    }

    #[test]
    fn honors_requested_output_layout() {
        let mut builder = GraphBuilder::new("transpose");
        let x = builder.parameter(0, Shape::array(PrimitiveType::S32, &[2, 3]), "x");
        builder.transpose(x, &[1, 0]);
        let computation = builder.build().expect("build");

        let client = LocalClient::new();
        let input = Literal::from_vec(&[2, 3], vec![1, 2, 3, 4, 5, 6i32]).expect("literal");
        let handle = client.transfer_to_server(&input).expect("upload");
        let requested = Shape::with_layout(PrimitiveType::S32, &[3, 2], &[0, 1]).expect("shape");
        let options = ExecutionOptions::default().with_output_layout(Some(&requested));
        let result = client
            .execute_and_transfer(&computation, &[&handle], &options)
            .expect("execute");
        assert_eq!(result.shape(), &requested);
        assert_eq!(result.to_vec::<i32>().expect("values"), vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn build_reports_first_invalid_op() {
        let mut builder = GraphBuilder::new("bad");
        let x = builder.parameter(0, Shape::array(PrimitiveType::F32, &[2]), "x");
        let y = builder.parameter(1, Shape::array(PrimitiveType::F32, &[3]), "y");
        builder.add(x, y);
        let err = builder.build().expect_err("mismatched shapes");
        assert!(matches!(err, SweepError::Build { .. }));
        assert!(err.to_string().contains("operand shapes differ"));

        let mut sparse = GraphBuilder::new("sparse");
        sparse.parameter(1, Shape::scalar(PrimitiveType::F32), "x");
        assert!(sparse.build().is_err());
    }

    #[test]
    fn dropped_handles_release_buffers() {
        let client = LocalClient::new();
        let first = client.transfer_to_server(&Literal::r0(1i32)).expect("upload");
        {
            let _second = client.transfer_to_server(&Literal::r0(2i32)).expect("upload");
            assert_eq!(client.stats().expect("stats").live_buffers, 2);
        }
        assert_eq!(client.stats().expect("stats").live_buffers, 1);
        drop(first);
        let stats = client.stats().expect("stats");
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.uploads, 2);
    }

    #[test]
    fn rejects_arguments_of_the_wrong_shape() {
        let mut builder = GraphBuilder::new("neg");
        let x = builder.parameter(0, Shape::array(PrimitiveType::F32, &[2]), "x");
        builder.unary(super::UnaryOp::Neg, x);
        let computation = builder.build().expect("build");
        let client = LocalClient::new();
        let handle = client.transfer_to_server(&Literal::r1(&[1i32, 2])).expect("upload");
        let err = client
            .execute(&computation, &[&handle], &ExecutionOptions::default())
            .expect_err("wrong element type");
        assert!(matches!(err, SweepError::Execution { .. }));
    }
}
