//! Fingerprint engine
//!
//! Derives the cache key of a value or operation. The key is a digest over a
//! canonical, length-framed encoding (see [`encode`]), so it is stable across
//! processes and immune to delimiter-splicing collisions.
//!
//! Producer identity is folded in one of two ways:
//!
//! - by name only (default): two different producers registered under the same
//!   name share fingerprints, so closures named alike collide.
//! - with `function_dump`: the producer's declared definition token is folded
//!   in as well, so differently implemented producers never collide.

mod algo;
pub mod encode;

pub use algo::HashAlgorithm;
pub use encode::Encoder;

use crate::error::{EvalError, EvalResult};
use crate::graph::LazyFn;
use crate::value::{Opaque, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Fixed-length digest identifying a value or an operation
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(Box<[u8]>);

impl Fingerprint {
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a hex string as produced by [`Fingerprint::to_hex`]
    pub fn from_hex(s: &str) -> Option<Self> {
        hex::decode(s).ok().map(|b| Self(b.into_boxed_slice()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Fingerprint({})", &hex[..hex.len().min(12)])
    }
}

/// Encoder for an opaque host type
pub type EncodeFn = dyn Fn(&Opaque, &mut Encoder) -> EvalResult<()>;

/// Hashing configuration shared by every node of an engine
#[derive(Clone)]
pub struct Fingerprinter {
    algo: HashAlgorithm,
    function_dump: bool,
    encoders: HashMap<String, Rc<EncodeFn>>,
}

impl Fingerprinter {
    pub fn new(algo: HashAlgorithm) -> Self {
        Self {
            algo,
            function_dump: false,
            encoders: HashMap::new(),
        }
    }

    pub fn with_algo(mut self, algo: HashAlgorithm) -> Self {
        self.algo = algo;
        self
    }

    pub fn with_function_dump(mut self, enabled: bool) -> Self {
        self.function_dump = enabled;
        self
    }

    pub fn algo(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn function_dump(&self) -> bool {
        self.function_dump
    }

    /// Register the encoder used for opaque values of `type_name`
    pub fn register<F>(&mut self, type_name: impl Into<String>, encode: F)
    where
        F: Fn(&Opaque, &mut Encoder) -> EvalResult<()> + 'static,
    {
        self.encoders.insert(type_name.into(), Rc::new(encode));
    }

    pub fn encoder(&self) -> Encoder {
        Encoder::new(self.algo)
    }

    /// Fingerprint of a literal value
    pub fn of_value(&self, value: &Value) -> EvalResult<Fingerprint> {
        let mut enc = self.encoder();
        self.encode_value(&mut enc, value)?;
        Ok(enc.finish())
    }

    /// Append the canonical encoding of `value`
    pub fn encode_value(&self, enc: &mut Encoder, value: &Value) -> EvalResult<()> {
        match value {
            Value::None => enc.field("none", &[]),
            Value::Bool(b) => enc.field("bool", &[u8::from(*b)]),
            Value::Int(i) => enc.field("int", &i.to_le_bytes()),
            Value::Float(x) => enc.field("float", &x.to_bits().to_le_bytes()),
            Value::Str(s) => enc.field("str", s.as_bytes()),
            Value::Bytes(b) => enc.field("bytes", b),
            Value::List(items) => self.encode_seq(enc, "list", items)?,
            Value::Tuple(items) => self.encode_seq(enc, "tuple", items)?,
            Value::Map(map) => {
                enc.header("map", map.len());
                // BTreeMap iterates in key order
                for (key, item) in map {
                    enc.field("key", key.as_bytes());
                    self.encode_value(enc, item)?;
                }
            }
            Value::Record(record) => {
                enc.header("record", record.fields.len());
                enc.field("type", record.type_name.as_bytes());
                for (name, item) in &record.fields {
                    enc.field("key", name.as_bytes());
                    self.encode_value(enc, item)?;
                }
            }
            Value::Function(func) => self.encode_callee(enc, func)?,
            Value::Opaque(opaque) => {
                let encode = self.encoders.get(opaque.type_name()).ok_or_else(|| {
                    EvalError::UnsupportedType {
                        type_name: opaque.type_name().to_string(),
                    }
                })?;
                enc.field("opaque", opaque.type_name().as_bytes());
                encode(opaque, enc)?;
            }
        }
        Ok(())
    }

    /// Append the identity of a producer
    pub fn encode_callee(&self, enc: &mut Encoder, func: &LazyFn) -> EvalResult<()> {
        enc.field("fn", func.name().as_bytes());
        if self.function_dump {
            let definition = func
                .definition()
                .ok_or_else(|| EvalError::MissingDefinition {
                    function: func.name().to_string(),
                })?;
            enc.field("def", definition.as_bytes());
        }
        Ok(())
    }

    fn encode_seq(&self, enc: &mut Encoder, tag: &str, items: &[Value]) -> EvalResult<()> {
        enc.header(tag, items.len());
        for item in items {
            self.encode_value(enc, item)?;
        }
        Ok(())
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}
