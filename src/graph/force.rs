//! Fingerprinting and forcing of nodes

use super::ops::{get_attr, get_item};
use super::{Invocation, Lazy, LazyFn, Operand, Operation, State};
use crate::engine::Engine;
use crate::error::{EvalError, EvalResult};
use crate::fingerprint::{Encoder, Fingerprint, Fingerprinter};
use crate::value::Value;
use std::collections::BTreeMap;
use tracing::{debug, trace};

impl Operand {
    /// Fingerprint of the operand; literals hash as their canonical encoding
    pub fn fingerprint(&self, fingerprinter: &Fingerprinter) -> EvalResult<Fingerprint> {
        match self {
            Self::Value(value) => fingerprinter.of_value(value),
            Self::Node(node) => node.fingerprint(),
        }
    }

    /// Concrete value of the operand, forcing it if needed
    pub fn force(&self) -> EvalResult<Value> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Node(node) => node.force(),
        }
    }
}

/// Append framed operand fingerprints: positional in order, keywords by name
pub(crate) fn encode_operands(
    fingerprinter: &Fingerprinter,
    enc: &mut Encoder,
    args: &[Operand],
    kwargs: &BTreeMap<String, Operand>,
) -> EvalResult<()> {
    enc.header("args", args.len());
    for arg in args {
        enc.fingerprint(&arg.fingerprint(fingerprinter)?);
    }
    enc.header("kwargs", kwargs.len());
    for (name, arg) in kwargs {
        enc.field("key", name.as_bytes());
        enc.fingerprint(&arg.fingerprint(fingerprinter)?);
    }
    Ok(())
}

/// Force positional operands left to right, then keywords in name order
pub(crate) fn force_arguments(
    args: &[Operand],
    kwargs: &BTreeMap<String, Operand>,
) -> EvalResult<(Vec<Value>, BTreeMap<String, Value>)> {
    let positional = args.iter().map(Operand::force).collect::<EvalResult<Vec<_>>>()?;
    let mut named = BTreeMap::new();
    for (name, arg) in kwargs {
        named.insert(name.clone(), arg.force()?);
    }
    Ok((positional, named))
}

impl Lazy {
    /// Fingerprint of the recorded operation, computed once per node
    pub fn fingerprint(&self) -> EvalResult<Fingerprint> {
        if let Some(fp) = self.node.fingerprint.get() {
            return Ok(fp.clone());
        }
        if self.node.hashing.replace(true) {
            return Err(EvalError::CyclicGraph { at: self.kind() });
        }
        let computed = self.compute_fingerprint();
        self.node.hashing.set(false);
        let fp = computed?;
        Ok(self.node.fingerprint.get_or_init(|| fp).clone())
    }

    fn compute_fingerprint(&self) -> EvalResult<Fingerprint> {
        let fingerprinter = self.node.engine.fingerprinter();
        let state = self.node.state.borrow();
        let op = match &*state {
            State::Pending(op) | State::Resolved { origin: Some(op), .. } => op,
            State::Resolved { value, origin: None } => return fingerprinter.of_value(value),
        };

        let mut enc = fingerprinter.encoder();
        match op {
            Operation::Literal(value) => return fingerprinter.of_value(value),
            Operation::Placeholder { label, bound } => {
                return match bound {
                    Some(operand) => operand.fingerprint(fingerprinter),
                    None => Err(EvalError::UnresolvedOperand {
                        label: label.clone(),
                    }),
                };
            }
            Operation::Call { func, args, kwargs } => {
                enc.field("op", b"call");
                fingerprinter.encode_callee(&mut enc, func)?;
                encode_operands(fingerprinter, &mut enc, args, kwargs)?;
            }
            Operation::Invoke {
                target,
                args,
                kwargs,
            } => {
                enc.field("op", b"invoke");
                enc.fingerprint(&target.fingerprint(fingerprinter)?);
                encode_operands(fingerprinter, &mut enc, args, kwargs)?;
            }
            Operation::Attr { base, name } => {
                enc.field("op", b"getattr");
                enc.fingerprint(&base.fingerprint(fingerprinter)?);
                enc.field("name", name.as_bytes());
            }
            Operation::Item { base, index } => {
                enc.field("op", b"getitem");
                enc.fingerprint(&base.fingerprint(fingerprinter)?);
                enc.fingerprint(&index.fingerprint(fingerprinter)?);
            }
            Operation::Binary { op, lhs, rhs } => {
                enc.field("op", op.as_str().as_bytes());
                enc.fingerprint(&lhs.fingerprint(fingerprinter)?);
                enc.fingerprint(&rhs.fingerprint(fingerprinter)?);
            }
            Operation::Unary { op, operand } => {
                enc.field("op", op.as_str().as_bytes());
                enc.fingerprint(&operand.fingerprint(fingerprinter)?);
            }
        }
        Ok(enc.finish())
    }

    /// Resolve the node to a concrete value
    ///
    /// Returns the memoized value when already resolved. Otherwise consults the
    /// engine's cache by fingerprint and, on a miss, forces operands depth-first
    /// and runs the operation. A failure leaves the node pending and nothing is
    /// written to the cache.
    pub fn force(&self) -> EvalResult<Value> {
        if let State::Resolved { value, .. } = &*self.node.state.borrow() {
            return Ok(value.clone());
        }
        if self.node.forcing.replace(true) {
            return Err(EvalError::CyclicGraph { at: self.kind() });
        }
        let outcome = self.force_pending();
        self.node.forcing.set(false);
        outcome
    }

    /// Alias of [`Lazy::force`]
    pub fn unlazy(&self) -> EvalResult<Value> {
        self.force()
    }

    fn force_pending(&self) -> EvalResult<Value> {
        let op = match &*self.node.state.borrow() {
            State::Pending(op) => op.clone(),
            State::Resolved { value, .. } => return Ok(value.clone()),
        };
        let engine = self.node.engine.clone();

        let value = match &op {
            Operation::Literal(value) => value.clone(),
            Operation::Placeholder { label, bound } => match bound {
                Some(operand) => operand.force()?,
                None => {
                    return Err(EvalError::UnresolvedOperand {
                        label: label.clone(),
                    })
                }
            },
            _ => {
                let fp = self.fingerprint()?;
                let _flight = engine.enter(&fp, &op)?;
                match engine.lookup(&fp, &op)? {
                    Some(value) => value,
                    None => {
                        let value = evaluate(&engine, &op)?;
                        engine.record(&fp, &op, &value)?;
                        value
                    }
                }
            }
        };

        self.resolve(op, value.clone());
        Ok(value)
    }

    fn resolve(&self, op: Operation, value: Value) {
        let origin = if self.node.engine.options().onplace {
            trace!("collapsing {}", op.kind());
            None
        } else {
            Some(op)
        };
        *self.node.state.borrow_mut() = State::Resolved { value, origin };
    }

    /// Evaluate a freshly built node when the engine is eager
    ///
    /// Operators over plain values are computed in place without touching the
    /// cache. A failure leaves the node pending for an explicit force to report.
    pub(crate) fn settle(self) -> Lazy {
        if !self.node.engine.options().eager {
            return self;
        }
        let outcome = if self.over_values() {
            self.evaluate_in_place()
        } else {
            self.force()
        };
        if let Err(e) = outcome {
            debug!("Eager {} left pending: {}", self.kind(), e);
        }
        self
    }

    fn over_values(&self) -> bool {
        let plain = |operand: &Operand| matches!(operand, Operand::Value(_));
        match &*self.node.state.borrow() {
            State::Pending(Operation::Binary { lhs, rhs, .. }) => plain(lhs) && plain(rhs),
            State::Pending(Operation::Unary { operand, .. }) => plain(operand),
            State::Pending(Operation::Attr { base, .. }) => plain(base),
            State::Pending(Operation::Item { base, index }) => plain(base) && plain(index),
            _ => false,
        }
    }

    fn evaluate_in_place(&self) -> EvalResult<Value> {
        let op = match &*self.node.state.borrow() {
            State::Pending(op) => op.clone(),
            State::Resolved { value, .. } => return Ok(value.clone()),
        };
        let value = evaluate(&self.node.engine, &op)?;
        self.resolve(op, value.clone());
        Ok(value)
    }

    /// Drop the memoized value so the next force recomputes
    ///
    /// Returns false for pending and collapsed nodes.
    pub fn invalidate(&self) -> bool {
        let mut state = self.node.state.borrow_mut();
        let current = std::mem::replace(&mut *state, State::Pending(Operation::Literal(Value::None)));
        match current {
            State::Resolved {
                origin: Some(op), ..
            } => {
                *state = State::Pending(op);
                true
            }
            other => {
                *state = other;
                false
            }
        }
    }

    /// Force the node, then iterate the concrete result
    pub fn iter(&self) -> EvalResult<std::vec::IntoIter<Value>> {
        let items: Vec<Value> = match self.force()? {
            Value::List(items) | Value::Tuple(items) => items,
            Value::Map(map) => map.into_keys().map(Value::Str).collect(),
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            Value::Bytes(bytes) => bytes.into_iter().map(|b| Value::Int(i64::from(b))).collect(),
            other => {
                return Err(EvalError::NotIterable {
                    found: other.type_name(),
                })
            }
        };
        Ok(items.into_iter())
    }

    /// Force the node and destructure exactly `N` elements
    pub fn unpack<const N: usize>(&self) -> EvalResult<[Value; N]> {
        let items: Vec<Value> = self.iter()?.collect();
        <[Value; N]>::try_from(items).map_err(|items| EvalError::Unpack {
            expected: N,
            found: items.len(),
        })
    }
}

fn evaluate(engine: &Engine, op: &Operation) -> EvalResult<Value> {
    match op {
        Operation::Literal(value) => Ok(value.clone()),
        Operation::Placeholder { label, bound } => match bound {
            Some(operand) => operand.force(),
            None => Err(EvalError::UnresolvedOperand {
                label: label.clone(),
            }),
        },
        Operation::Call { func, args, kwargs } => call(engine, func, args, kwargs),
        Operation::Invoke {
            target,
            args,
            kwargs,
        } => match target.force()? {
            Value::Function(func) => call(engine, &func, args, kwargs),
            other => Err(EvalError::NotCallable {
                found: other.type_name(),
            }),
        },
        Operation::Attr { base, name } => get_attr(&base.force()?, name),
        Operation::Item { base, index } => {
            let base = base.force()?;
            get_item(&base, &index.force()?)
        }
        Operation::Binary { op, lhs, rhs } => {
            let lhs = lhs.force()?;
            op.apply(&lhs, &rhs.force()?)
        }
        Operation::Unary { op, operand } => op.apply(&operand.force()?),
    }
}

fn call(
    engine: &Engine,
    func: &LazyFn,
    args: &[Operand],
    kwargs: &BTreeMap<String, Operand>,
) -> EvalResult<Value> {
    let (args, kwargs) = force_arguments(args, kwargs)?;
    trace!("invoking {}", func.name());
    let produced = func.invoke(&Invocation::new(engine, func, &args, &kwargs))?;
    // bodies may hand back another node; expand until concrete
    produced.force()
}
