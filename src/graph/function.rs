//! Registered producers and the context their bodies run in

use super::{Lazy, Operand};
use crate::engine::Engine;
use crate::error::{EvalError, EvalResult};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Body of a producer
///
/// A body may return a concrete value or another lazy node; forcing expands
/// returned nodes until a concrete value remains.
pub type Body = dyn Fn(&Invocation<'_>) -> EvalResult<Operand>;

/// A producer registered with an explicit identity
///
/// The identity is a name (plus, under `function_dump`, a declared definition
/// token such as the body's source text or a version string). Declared
/// parameter names let keyword operands bind onto positional slots and let
/// the file adapter locate its path parameter.
#[derive(Clone)]
pub struct LazyFn {
    inner: Rc<FnInner>,
}

#[derive(Clone)]
struct FnInner {
    name: String,
    params: Option<Vec<String>>,
    definition: Option<String>,
    body: Rc<Body>,
}

impl LazyFn {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> EvalResult<Operand> + 'static,
    {
        Self {
            inner: Rc::new(FnInner {
                name: name.into(),
                params: None,
                definition: None,
                body: Rc::new(body),
            }),
        }
    }

    /// Declare parameter names in positional order
    pub fn params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Rc::make_mut(&mut self.inner).params = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Declare the definition token folded in under `function_dump`
    pub fn defined_as(mut self, definition: impl Into<String>) -> Self {
        Rc::make_mut(&mut self.inner).definition = Some(definition.into());
        self
    }

    /// Override the identity name
    pub fn hint(mut self, name: impl Into<String>) -> Self {
        Rc::make_mut(&mut self.inner).name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn param_names(&self) -> Option<&[String]> {
        self.inner.params.as_deref()
    }

    pub fn definition(&self) -> Option<&str> {
        self.inner.definition.as_deref()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Position of a declared parameter
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names()?.iter().position(|p| p == name)
    }

    pub(crate) fn invoke(&self, inv: &Invocation<'_>) -> EvalResult<Operand> {
        (self.inner.body)(inv)
    }

    /// Canonical argument layout
    ///
    /// Keyword operands naming the declared parameters directly after the
    /// positional ones are moved into positional slots, so `f(1, 1)`,
    /// `f(1, b=1)` and `f(b=1, a=1)` all bind identically. Remaining keyword
    /// operands stay keyed by name; the map keeps them sorted.
    pub(crate) fn bind(
        &self,
        args: Vec<Operand>,
        kwargs: Vec<(String, Operand)>,
    ) -> (Vec<Operand>, BTreeMap<String, Operand>) {
        let mut positional = args;
        let mut named: BTreeMap<String, Operand> = kwargs.into_iter().collect();

        if let Some(params) = self.param_names() {
            for param in params.iter().skip(positional.len()) {
                match named.remove(param) {
                    Some(operand) => positional.push(operand),
                    None => break,
                }
            }
        }

        (positional, named)
    }
}

impl fmt::Debug for LazyFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyFn")
            .field("name", &self.inner.name)
            .field("params", &self.inner.params)
            .finish_non_exhaustive()
    }
}

/// Resolved arguments handed to a producer body
pub struct Invocation<'a> {
    engine: &'a Engine,
    function: &'a LazyFn,
    args: &'a [Value],
    kwargs: &'a BTreeMap<String, Value>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        engine: &'a Engine,
        function: &'a LazyFn,
        args: &'a [Value],
        kwargs: &'a BTreeMap<String, Value>,
    ) -> Self {
        Self {
            engine,
            function,
            args,
            kwargs,
        }
    }

    pub fn engine(&self) -> &Engine {
        self.engine
    }

    pub fn function(&self) -> &LazyFn {
        self.function
    }

    pub fn args(&self) -> &[Value] {
        self.args
    }

    pub fn kwargs(&self) -> &BTreeMap<String, Value> {
        self.kwargs
    }

    /// Positional argument `index`
    pub fn arg(&self, index: usize) -> EvalResult<&Value> {
        self.args
            .get(index)
            .ok_or_else(|| EvalError::MissingArgument {
                function: self.function.name().to_string(),
                position: index.to_string(),
            })
    }

    /// Argument by declared parameter name or keyword
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name).or_else(|| {
            self.function
                .param_index(name)
                .and_then(|i| self.args.get(i))
        })
    }

    /// Like [`Invocation::get`] but failing when absent
    pub fn named(&self, name: &str) -> EvalResult<&Value> {
        self.get(name).ok_or_else(|| EvalError::MissingArgument {
            function: self.function.name().to_string(),
            position: format!("`{name}`"),
        })
    }

    pub fn int(&self, index: usize) -> EvalResult<i64> {
        let value = self.arg(index)?;
        value.as_int().ok_or_else(|| self.type_error(index, "int", value))
    }

    pub fn float(&self, index: usize) -> EvalResult<f64> {
        let value = self.arg(index)?;
        value
            .as_float()
            .ok_or_else(|| self.type_error(index, "float", value))
    }

    pub fn str(&self, index: usize) -> EvalResult<&str> {
        let value = self.arg(index)?;
        value.as_str().ok_or_else(|| self.type_error(index, "str", value))
    }

    /// Capture a call to this producer again, for recursive bodies
    pub fn recurse(&self, args: Vec<Operand>) -> Lazy {
        self.engine.call(self.function, args)
    }

    /// Force a node on the spot, for bodies that need concrete values
    pub fn force(&self, node: &Lazy) -> EvalResult<Value> {
        node.force()
    }

    fn type_error(&self, index: usize, expected: &'static str, found: &Value) -> EvalError {
        EvalError::ArgumentType {
            function: self.function.name().to_string(),
            position: index.to_string(),
            expected,
            found: found.type_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summ() -> LazyFn {
        LazyFn::new("summ", |inv| Ok((inv.int(0)? + inv.int(1)?).into())).params(["a", "b"])
    }

    fn ints(values: &[i64]) -> Vec<Operand> {
        values.iter().map(|v| Operand::from(*v)).collect()
    }

    fn kw(pairs: &[(&str, i64)]) -> Vec<(String, Operand)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Operand::from(*v)))
            .collect()
    }

    #[test]
    fn keywords_bind_onto_declared_params() {
        let f = summ();
        let (pos, named) = f.bind(vec![], kw(&[("b", 2), ("a", 1)]));
        assert_eq!(pos.len(), 2);
        assert!(named.is_empty());

        let (pos, named) = f.bind(ints(&[1]), kw(&[("b", 2)]));
        assert_eq!(pos.len(), 2);
        assert!(named.is_empty());
    }

    #[test]
    fn binding_stops_at_first_gap() {
        let f = summ();
        let (pos, named) = f.bind(vec![], kw(&[("b", 2)]));
        assert!(pos.is_empty());
        assert!(named.contains_key("b"));
    }

    #[test]
    fn undeclared_params_keep_keywords() {
        let f = LazyFn::new("anon", |_| Ok(Value::None.into()));
        let (pos, named) = f.bind(ints(&[1]), kw(&[("z", 2), ("a", 1)]));
        assert_eq!(pos.len(), 1);
        assert_eq!(named.keys().collect::<Vec<_>>(), ["a", "z"]);
    }

    #[test]
    fn hint_and_definition() {
        let f = summ().hint("add2").defined_as("a + b");
        assert_eq!(f.name(), "add2");
        assert_eq!(f.definition(), Some("a + b"));
        assert_eq!(f.param_index("b"), Some(1));
    }
}
