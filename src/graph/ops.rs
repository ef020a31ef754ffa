//! Builtin operators
//!
//! `/` is true division and always yields a float. `%` and floor division round
//! toward negative infinity, so a remainder takes the sign of the divisor.
//! Sequences concatenate under `+` and repeat under `*`.

use super::{Lazy, Operand};
use crate::error::{EvalError, EvalResult};
use crate::value::Value;
use std::cmp::Ordering;
use std::ops;

/// Binary operators that can be captured on a lazy node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Unary operators that can be captured on a lazy node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl BinaryOp {
    /// Stable name folded into fingerprints
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "truediv",
            Self::FloorDiv => "floordiv",
            Self::Rem => "mod",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        }
    }

    pub fn apply(&self, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
        match self {
            Self::Add => add(lhs, rhs),
            Self::Sub => arith(self, lhs, rhs, i64::checked_sub, |a, b| a - b),
            Self::Mul => mul(lhs, rhs),
            Self::Div => true_div(lhs, rhs),
            Self::FloorDiv => floor_div(lhs, rhs),
            Self::Rem => rem(lhs, rhs),
            Self::Eq => Ok(Value::Bool(lhs == rhs)),
            Self::Ne => Ok(Value::Bool(lhs != rhs)),
            Self::Lt => compare(self, lhs, rhs).map(|o| Value::Bool(o == Ordering::Less)),
            Self::Le => compare(self, lhs, rhs).map(|o| Value::Bool(o != Ordering::Greater)),
            Self::Gt => compare(self, lhs, rhs).map(|o| Value::Bool(o == Ordering::Greater)),
            Self::Ge => compare(self, lhs, rhs).map(|o| Value::Bool(o != Ordering::Less)),
        }
    }

    fn mismatch(&self, lhs: &Value, rhs: &Value) -> EvalError {
        EvalError::OperandTypes {
            op: self.as_str(),
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        }
    }
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neg => "neg",
            Self::Not => "not",
        }
    }

    pub fn apply(&self, operand: &Value) -> EvalResult<Value> {
        match (self, operand) {
            (Self::Neg, Value::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or(EvalError::Overflow { op: "neg" }),
            (Self::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
            (Self::Not, v) => Ok(Value::Bool(!v.is_truthy())),
            (op, v) => Err(EvalError::UnaryOperandType {
                op: op.as_str(),
                found: v.type_name(),
            }),
        }
    }
}

fn arith(
    op: &BinaryOp,
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or(EvalError::Overflow { op: op.as_str() }),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            match (lhs.as_float(), rhs.as_float()) {
                (Some(a), Some(b)) => Ok(Value::Float(float_op(a, b))),
                _ => Err(op.mismatch(lhs, rhs)),
            }
        }
        _ => Err(op.mismatch(lhs, rhs)),
    }
}

fn add(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
        (Value::Bytes(a), Value::Bytes(b)) => Ok(Value::Bytes([a.as_slice(), b.as_slice()].concat())),
        (Value::List(a), Value::List(b)) => Ok(Value::List([a.as_slice(), b.as_slice()].concat())),
        (Value::Tuple(a), Value::Tuple(b)) => Ok(Value::Tuple([a.as_slice(), b.as_slice()].concat())),
        _ => arith(&BinaryOp::Add, lhs, rhs, i64::checked_add, |a, b| a + b),
    }
}

fn mul(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            Ok(Value::Str(s.repeat(repeat_count(s.len(), *n)?)))
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
            Ok(Value::List(repeat_items(items, *n)?))
        }
        (Value::Tuple(items), Value::Int(n)) | (Value::Int(n), Value::Tuple(items)) => {
            Ok(Value::Tuple(repeat_items(items, *n)?))
        }
        _ => arith(&BinaryOp::Mul, lhs, rhs, i64::checked_mul, |a, b| a * b),
    }
}

/// Largest sequence a repeat may produce, in elements (bytes for strings)
const MAX_REPEAT_LEN: usize = 1 << 28;

/// Negative counts repeat zero times
fn repeat_count(len: usize, n: i64) -> EvalResult<usize> {
    let n = usize::try_from(n).unwrap_or(0);
    match len.checked_mul(n) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(n),
        _ => Err(EvalError::Overflow { op: "mul" }),
    }
}

fn repeat_items(items: &[Value], n: i64) -> EvalResult<Vec<Value>> {
    let n = repeat_count(items.len(), n)?;
    Ok(std::iter::repeat(items).take(n).flatten().cloned().collect())
}

fn numeric_pair(op: &BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult<(f64, f64)> {
    match (lhs, rhs) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            match (lhs.as_float(), rhs.as_float()) {
                (Some(a), Some(b)) => Ok((a, b)),
                _ => Err(op.mismatch(lhs, rhs)),
            }
        }
        _ => Err(op.mismatch(lhs, rhs)),
    }
}

fn true_div(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    let (a, b) = numeric_pair(&BinaryOp::Div, lhs, rhs)?;
    if b == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    Ok(Value::Float(a / b))
}

fn floor_div(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Int(_), Value::Int(0)) => Err(EvalError::DivisionByZero),
        (Value::Int(a), Value::Int(b)) => {
            let q = a.checked_div(*b).ok_or(EvalError::Overflow { op: "floordiv" })?;
            // round toward negative infinity
            let q = if (a % b != 0) && ((*a < 0) != (*b < 0)) { q - 1 } else { q };
            Ok(Value::Int(q))
        }
        _ => {
            let (a, b) = numeric_pair(&BinaryOp::FloorDiv, lhs, rhs)?;
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Float((a / b).floor()))
        }
    }
}

fn rem(lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Int(_), Value::Int(0)) => Err(EvalError::DivisionByZero),
        (Value::Int(a), Value::Int(b)) => {
            let r = a.checked_rem(*b).ok_or(EvalError::Overflow { op: "mod" })?;
            // result takes the sign of the divisor
            let r = if r != 0 && ((r < 0) != (*b < 0)) { r + b } else { r };
            Ok(Value::Int(r))
        }
        _ => {
            let (a, b) = numeric_pair(&BinaryOp::Rem, lhs, rhs)?;
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Float(a - b * (a / b).floor()))
        }
    }
}

fn compare(op: &BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult<Ordering> {
    ordering(lhs, rhs).ok_or_else(|| op.mismatch(lhs, rhs))
}

fn ordering(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            lhs.as_float()?.partial_cmp(&rhs.as_float()?)
        }
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
            for (x, y) in a.iter().zip(b) {
                match ordering(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

/// Attribute read on a concrete value
pub(crate) fn get_attr(base: &Value, name: &str) -> EvalResult<Value> {
    match base {
        Value::Record(record) => record.get(name).cloned().ok_or_else(|| {
            EvalError::AttributeNotFound {
                type_name: record.type_name.clone(),
                name: name.to_string(),
            }
        }),
        other => Err(EvalError::AttributeNotFound {
            type_name: other.type_name().to_string(),
            name: name.to_string(),
        }),
    }
}

/// Subscript read on a concrete value
pub(crate) fn get_item(base: &Value, index: &Value) -> EvalResult<Value> {
    match (base, index) {
        (Value::List(items) | Value::Tuple(items), Value::Int(i)) => {
            let at = normalize_index(*i, items.len())?;
            Ok(items[at].clone())
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let at = normalize_index(*i, chars.len())?;
            Ok(Value::Str(chars[at].to_string()))
        }
        (Value::Bytes(bytes), Value::Int(i)) => {
            let at = normalize_index(*i, bytes.len())?;
            Ok(Value::Int(i64::from(bytes[at])))
        }
        (Value::Map(map), Value::Str(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| EvalError::KeyNotFound(key.clone())),
        (Value::Record(_), Value::Str(key)) => get_attr(base, key),
        _ => Err(EvalError::NotSubscriptable {
            found: base.type_name(),
            index: index.type_name(),
        }),
    }
}

fn normalize_index(index: i64, len: usize) -> EvalResult<usize> {
    let resolved = if index < 0 {
        i64::try_from(len).ok().map(|l| l + index)
    } else {
        Some(index)
    };
    resolved
        .and_then(|i| usize::try_from(i).ok())
        .filter(|i| *i < len)
        .ok_or(EvalError::IndexOutOfRange { index, len })
}

macro_rules! lazy_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Operand>> ops::$trait<R> for &Lazy {
            type Output = Lazy;

            fn $method(self, rhs: R) -> Lazy {
                self.binary($op, rhs)
            }
        }

        impl<R: Into<Operand>> ops::$trait<R> for Lazy {
            type Output = Lazy;

            fn $method(self, rhs: R) -> Lazy {
                self.binary($op, rhs)
            }
        }
    };
}

lazy_binary_op!(Add, add, BinaryOp::Add);
lazy_binary_op!(Sub, sub, BinaryOp::Sub);
lazy_binary_op!(Mul, mul, BinaryOp::Mul);
lazy_binary_op!(Div, div, BinaryOp::Div);
lazy_binary_op!(Rem, rem, BinaryOp::Rem);

impl ops::Neg for &Lazy {
    type Output = Lazy;

    fn neg(self) -> Lazy {
        self.unary(UnaryOp::Neg)
    }
}

impl ops::Neg for Lazy {
    type Output = Lazy;

    fn neg(self) -> Lazy {
        self.unary(UnaryOp::Neg)
    }
}

impl ops::Not for &Lazy {
    type Output = Lazy;

    fn not(self) -> Lazy {
        self.unary(UnaryOp::Not)
    }
}

impl ops::Not for Lazy {
    type Output = Lazy;

    fn not(self) -> Lazy {
        self.unary(UnaryOp::Not)
    }
}
