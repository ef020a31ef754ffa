//! evalcache - lazy evaluation with content-addressed memoization
//!
//! Computations are captured as a graph of [`Lazy`] nodes. Forcing a node
//! fingerprints the operation it records, serves the result from the engine's
//! cache when present, and otherwise computes and stores it. Caches live in
//! memory or in a directory store shared across processes; a file adapter
//! pools produced artifacts the same way.

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod file;
pub mod fingerprint;
pub mod graph;
pub mod value;

pub use cache::{CacheBackend, DirCache, Layout, MemoryCache};
pub use engine::{Engine, EngineBuilder, EngineOptions, EngineStats};
pub use error::{EvalError, EvalResult};
pub use file::{FileMaker, LazyFile};
pub use fingerprint::{Fingerprint, Fingerprinter, HashAlgorithm};
pub use graph::{Invocation, Lazy, LazyFn, Operand, Operation};
pub use value::{Opaque, Record, Value};
