//! Lazy node graph
//!
//! A [`Lazy`] records an operation and its operands without performing it.
//! Operators, attribute reads, subscripts and calls on a `Lazy` build further
//! nodes; nothing runs until [`Lazy::force`].
//!
//! Each node sits behind a shared cell: every holder of a `Lazy` clone sees the
//! same state. The cell moves once from pending to resolved. Under an
//! `onplace` engine the resolved cell also drops its operation, so the
//! sub-graph beneath it is released and later operations built on the node
//! embed its literal value.
//!
//! Nodes are `!Send`: a graph and its memoized results belong to one thread.

mod force;
pub mod function;
pub mod ops;

pub(crate) use force::{encode_operands, force_arguments};
pub use function::{Invocation, LazyFn};
pub use ops::{BinaryOp, UnaryOp};

use crate::engine::Engine;
use crate::error::EvalResult;
use crate::fingerprint::Fingerprint;
use crate::value::Value;
use std::cell::{Cell, OnceCell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Operand of an operation: a literal value or another node
#[derive(Clone)]
pub enum Operand {
    Value(Value),
    Node(Lazy),
}

/// A deferred operation
#[derive(Clone)]
pub enum Operation {
    /// Wrapped literal
    Literal(Value),
    /// Call of a registered producer
    Call {
        func: LazyFn,
        args: Vec<Operand>,
        kwargs: BTreeMap<String, Operand>,
    },
    /// Call of whatever function the target resolves to
    Invoke {
        target: Operand,
        args: Vec<Operand>,
        kwargs: BTreeMap<String, Operand>,
    },
    Attr {
        base: Operand,
        name: String,
    },
    Item {
        base: Operand,
        index: Operand,
    },
    Binary {
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    Unary {
        op: UnaryOp,
        operand: Operand,
    },
    /// Late-bound slot; transparent once bound
    Placeholder {
        label: String,
        bound: Option<Operand>,
    },
}

impl Operation {
    /// Short name for logs and cycle reports
    pub fn kind(&self) -> String {
        match self {
            Self::Literal(v) => format!("literal {}", v.type_name()),
            Self::Call { func, .. } => format!("call {}", func.name()),
            Self::Invoke { .. } => "invoke".to_string(),
            Self::Attr { name, .. } => format!("attr {name}"),
            Self::Item { .. } => "item".to_string(),
            Self::Binary { op, .. } => op.as_str().to_string(),
            Self::Unary { op, .. } => op.as_str().to_string(),
            Self::Placeholder { label, .. } => format!("placeholder {label}"),
        }
    }

    /// Operands in forcing order: positional left to right, then keywords by name
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Self::Literal(_) | Self::Placeholder { bound: None, .. } => vec![],
            Self::Call { args, kwargs, .. } => args.iter().chain(kwargs.values()).collect(),
            Self::Invoke {
                target,
                args,
                kwargs,
            } => std::iter::once(target)
                .chain(args)
                .chain(kwargs.values())
                .collect(),
            Self::Attr { base, .. } => vec![base],
            Self::Item { base, index } => vec![base, index],
            Self::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Unary { operand, .. } => vec![operand],
            Self::Placeholder {
                bound: Some(operand),
                ..
            } => vec![operand],
        }
    }
}

pub(crate) enum State {
    Pending(Operation),
    Resolved {
        value: Value,
        /// Kept unless the node collapsed
        origin: Option<Operation>,
    },
}

pub(crate) struct Node {
    engine: Engine,
    state: RefCell<State>,
    fingerprint: OnceCell<Fingerprint>,
    forcing: Cell<bool>,
    hashing: Cell<bool>,
}

/// Handle to a node of the lazy graph
#[derive(Clone)]
pub struct Lazy {
    node: Rc<Node>,
}

impl Lazy {
    pub(crate) fn new(engine: Engine, op: Operation) -> Self {
        Self {
            node: Rc::new(Node {
                engine,
                state: RefCell::new(State::Pending(op)),
                fingerprint: OnceCell::new(),
                forcing: Cell::new(false),
                hashing: Cell::new(false),
            }),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.node.engine
    }

    /// Whether the node already holds its value
    pub fn is_resolved(&self) -> bool {
        matches!(&*self.node.state.borrow(), State::Resolved { .. })
    }

    /// Whether the node resolved and released its operation
    pub fn is_collapsed(&self) -> bool {
        matches!(
            &*self.node.state.borrow(),
            State::Resolved { origin: None, .. }
        )
    }

    /// Resolved value without forcing
    pub fn peek(&self) -> Option<Value> {
        match &*self.node.state.borrow() {
            State::Resolved { value, .. } => Some(value.clone()),
            State::Pending(Operation::Literal(value)) => Some(value.clone()),
            State::Pending(_) => None,
        }
    }

    /// Short description of the operation this node records
    pub fn kind(&self) -> String {
        match &*self.node.state.borrow() {
            State::Pending(op) | State::Resolved { origin: Some(op), .. } => op.kind(),
            State::Resolved { value, .. } => format!("literal {}", value.type_name()),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    /// Convert into an operand for a new operation
    ///
    /// A collapsed node contributes its literal value, so new operations do not
    /// keep the released sub-graph reachable.
    pub fn to_operand(&self) -> Operand {
        if let State::Resolved {
            value,
            origin: None,
        } = &*self.node.state.borrow()
        {
            return Operand::Value(value.clone());
        }
        Operand::Node(self.clone())
    }

    fn derive(&self, op: Operation) -> Lazy {
        Lazy::new(self.node.engine.clone(), op).settle()
    }

    /// Node applying a binary operator
    pub fn binary(&self, op: BinaryOp, rhs: impl Into<Operand>) -> Lazy {
        self.derive(Operation::Binary {
            op,
            lhs: self.to_operand(),
            rhs: rhs.into(),
        })
    }

    /// Node applying a unary operator
    pub fn unary(&self, op: UnaryOp) -> Lazy {
        self.derive(Operation::Unary {
            op,
            operand: self.to_operand(),
        })
    }

    pub fn floor_div(&self, rhs: impl Into<Operand>) -> Lazy {
        self.binary(BinaryOp::FloorDiv, rhs)
    }

    pub fn equals(&self, rhs: impl Into<Operand>) -> Lazy {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn not_equals(&self, rhs: impl Into<Operand>) -> Lazy {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(&self, rhs: impl Into<Operand>) -> Lazy {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(&self, rhs: impl Into<Operand>) -> Lazy {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(&self, rhs: impl Into<Operand>) -> Lazy {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(&self, rhs: impl Into<Operand>) -> Lazy {
        self.binary(BinaryOp::Ge, rhs)
    }

    /// Node reading attribute `name` of the resolved value
    pub fn attr(&self, name: impl Into<String>) -> Lazy {
        self.derive(Operation::Attr {
            base: self.to_operand(),
            name: name.into(),
        })
    }

    /// Node reading `self[index]`
    pub fn item(&self, index: impl Into<Operand>) -> Lazy {
        self.derive(Operation::Item {
            base: self.to_operand(),
            index: index.into(),
        })
    }

    /// Node calling the function this node resolves to
    pub fn call(&self, args: Vec<Operand>, kwargs: Vec<(String, Operand)>) -> Lazy {
        self.derive(Operation::Invoke {
            target: self.to_operand(),
            args,
            kwargs: kwargs.into_iter().collect(),
        })
    }

    /// Node calling `func` with this node as its first argument
    pub fn method(&self, func: &LazyFn, args: Vec<Operand>) -> Lazy {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(self.to_operand());
        all.extend(args);
        self.node.engine.call(func, all)
    }

    /// Subscript nodes for the first `len` elements; forced only when eager
    pub fn lazy_items(&self, len: usize) -> Vec<Lazy> {
        (0..len)
            .map(|i| self.item(i64::try_from(i).unwrap_or(i64::MAX)))
            .collect()
    }

    /// Bind a placeholder to its operand
    pub fn bind(&self, operand: impl Into<Operand>) -> EvalResult<()> {
        use crate::error::EvalError;

        let mut state = self.node.state.borrow_mut();
        match &mut *state {
            State::Pending(Operation::Placeholder { label, bound }) => {
                if bound.is_some() {
                    return Err(EvalError::AlreadyBound {
                        label: label.clone(),
                    });
                }
                *bound = Some(operand.into());
                Ok(())
            }
            State::Resolved {
                origin: Some(Operation::Placeholder { label, .. }),
                ..
            } => Err(EvalError::AlreadyBound {
                label: label.clone(),
            }),
            _ => Err(EvalError::NotPlaceholder),
        }
    }

    /// Number of distinct nodes reachable from this one
    ///
    /// Collapsed nodes count once and hide whatever they were derived from.
    pub fn graph_size(&self) -> usize {
        let mut seen = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(lazy) = stack.pop() {
            if !seen.insert(Rc::as_ptr(&lazy.node)) {
                continue;
            }
            let state = lazy.node.state.borrow();
            let op = match &*state {
                State::Pending(op) | State::Resolved { origin: Some(op), .. } => op,
                State::Resolved { origin: None, .. } => continue,
            };
            for operand in op.operands() {
                if let Operand::Node(child) = operand {
                    stack.push(child.clone());
                }
            }
        }
        seen.len()
    }
}

impl fmt::Debug for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Lazy");
        s.field("kind", &self.kind());
        if let Some(fp) = self.node.fingerprint.get() {
            s.field("fingerprint", fp);
        }
        s.field("resolved", &self.is_resolved()).finish()
    }
}

impl From<Lazy> for Operand {
    fn from(lazy: Lazy) -> Self {
        lazy.to_operand()
    }
}

impl From<&Lazy> for Operand {
    fn from(lazy: &Lazy) -> Self {
        lazy.to_operand()
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

macro_rules! operand_from_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Self::Value(Value::from(v))
                }
            }
        )*
    };
}

operand_from_value!(bool, i32, i64, f64, &str, String, std::path::PathBuf, &std::path::Path, LazyFn);

/// Build a `Vec<Operand>` from heterogeneous expressions
#[macro_export]
macro_rules! args {
    ($($x:expr),* $(,)?) => {{
        let v: Vec<$crate::graph::Operand> = vec![$($crate::graph::Operand::from($x)),*];
        v
    }};
}

/// Build keyword operands: `kwargs![a = 1, b = node]`
#[macro_export]
macro_rules! kwargs {
    ($($k:ident = $v:expr),* $(,)?) => {{
        let v: Vec<(String, $crate::graph::Operand)> =
            vec![$((stringify!($k).to_string(), $crate::graph::Operand::from($v))),*];
        v
    }};
}
