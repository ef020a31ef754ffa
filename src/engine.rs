//! Engine: hashing options plus the active cache backend
//!
//! An engine is the entry point for building graphs. It owns its cache and
//! is passed around by cheap clones; nothing is global, so every engine (and
//! every store root) is constructed and disposed by the caller.

use crate::cache::{CacheBackend, DirCache, MemoryCache};
use crate::config::{Config, ConfigManager};
use crate::error::{EvalError, EvalResult};
use crate::fingerprint::{Encoder, Fingerprint, Fingerprinter, HashAlgorithm};
use crate::graph::{Lazy, LazyFn, Operand, Operation};
use crate::value::{Opaque, Value};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};

/// Per-engine behaviour switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Digest used for fingerprints
    pub algo: HashAlgorithm,

    /// Write computed results into the cache
    pub encache: bool,

    /// Serve results from the cache instead of recomputing
    pub decache: bool,

    /// Fold producer definitions into fingerprints
    pub function_dump: bool,

    /// Collapse resolved nodes into their literal values
    pub onplace: bool,

    /// Evaluate call and operator nodes as soon as they are built
    pub eager: bool,

    /// Report cache traffic at info level
    pub diag: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            algo: HashAlgorithm::default(),
            encache: true,
            decache: true,
            function_dump: false,
            onplace: false,
            eager: false,
            diag: false,
        }
    }
}

/// Cache traffic observed by an engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Results served from the cache
    pub hits: u64,
    /// Operations actually evaluated
    pub computed: u64,
    /// Results written to the cache
    pub stored: u64,
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    options: EngineOptions,
    cache: Option<Box<dyn CacheBackend>>,
    fingerprinter: Fingerprinter,
}

impl EngineBuilder {
    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn cache(mut self, cache: impl CacheBackend + 'static) -> Self {
        self.cache = Some(Box::new(cache));
        self
    }

    pub fn algo(mut self, algo: HashAlgorithm) -> Self {
        self.options.algo = algo;
        self
    }

    pub fn encache(mut self, enabled: bool) -> Self {
        self.options.encache = enabled;
        self
    }

    pub fn decache(mut self, enabled: bool) -> Self {
        self.options.decache = enabled;
        self
    }

    pub fn function_dump(mut self, enabled: bool) -> Self {
        self.options.function_dump = enabled;
        self
    }

    pub fn onplace(mut self, enabled: bool) -> Self {
        self.options.onplace = enabled;
        self
    }

    pub fn eager(mut self, enabled: bool) -> Self {
        self.options.eager = enabled;
        self
    }

    pub fn diag(mut self, enabled: bool) -> Self {
        self.options.diag = enabled;
        self
    }

    /// Register the fingerprint encoder for an opaque host type
    pub fn register_encoder<F>(mut self, type_name: impl Into<String>, encode: F) -> Self
    where
        F: Fn(&Opaque, &mut Encoder) -> EvalResult<()> + 'static,
    {
        self.fingerprinter.register(type_name, encode);
        self
    }

    pub fn build(self) -> Engine {
        let fingerprinter = self
            .fingerprinter
            .with_algo(self.options.algo)
            .with_function_dump(self.options.function_dump);
        let cache = self
            .cache
            .unwrap_or_else(|| Box::new(MemoryCache::new()) as Box<dyn CacheBackend>);

        debug!(
            "Engine ready: cache={}, algo={}, onplace={}, eager={}",
            cache.name(),
            self.options.algo,
            self.options.onplace,
            self.options.eager
        );

        Engine {
            inner: Rc::new(EngineInner {
                options: self.options,
                fingerprinter,
                cache: RefCell::new(cache),
                in_flight: RefCell::new(HashSet::new()),
                stats: Cell::new(EngineStats::default()),
            }),
        }
    }
}

struct EngineInner {
    options: EngineOptions,
    fingerprinter: Fingerprinter,
    cache: RefCell<Box<dyn CacheBackend>>,
    in_flight: RefCell<HashSet<Fingerprint>>,
    stats: Cell<EngineStats>,
}

/// Configured lazifier: builds nodes and serves their results from a cache
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            options: EngineOptions::default(),
            cache: None,
            fingerprinter: Fingerprinter::default(),
        }
    }

    /// Engine over `cache` with the given options
    pub fn new(cache: impl CacheBackend + 'static, options: EngineOptions) -> Self {
        Self::builder().cache(cache).options(options).build()
    }

    /// Engine over `cache` with default options
    pub fn with_cache(cache: impl CacheBackend + 'static) -> Self {
        Self::builder().cache(cache).build()
    }

    /// Transient in-memory memoization
    pub fn memoize() -> Self {
        Self::builder().build()
    }

    /// In-memory memoization that collapses resolved nodes
    pub fn onplace_memoize() -> Self {
        Self::builder().onplace(true).build()
    }

    /// In-memory memoization evaluating nodes as they are built
    pub fn eager_memoize() -> Self {
        Self::builder().eager(true).build()
    }

    /// Eager in-memory memoization over collapsed results
    ///
    /// Only call results and operators over still-lazy operands reach the
    /// cache; arithmetic on collapsed values is plain computation.
    pub fn eager_onplace_memoize() -> Self {
        Self::builder().eager(true).onplace(true).build()
    }

    /// Persistent engine described by a configuration file
    pub fn from_config(config: &Config) -> EvalResult<Self> {
        let root = ConfigManager::store_root(config);
        let store = DirCache::with_layout(root, config.store.layout)?;
        Ok(Self::new(store, config.engine.clone()))
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.inner.fingerprinter
    }

    pub fn stats(&self) -> EngineStats {
        self.inner.stats.get()
    }

    /// Literal node; its fingerprint is the value's canonical encoding
    pub fn wrap(&self, value: impl Into<Value>) -> Lazy {
        Lazy::new(self.clone(), Operation::Literal(value.into()))
    }

    /// Call node with positional operands only
    pub fn call(&self, func: &LazyFn, args: Vec<Operand>) -> Lazy {
        self.capture(func, args, Vec::new())
    }

    /// Call node; deferred even when every operand is a literal, unless the
    /// engine is eager
    pub fn capture(
        &self,
        func: &LazyFn,
        args: Vec<Operand>,
        kwargs: Vec<(String, Operand)>,
    ) -> Lazy {
        let (args, kwargs) = func.bind(args, kwargs);
        Lazy::new(
            self.clone(),
            Operation::Call {
                func: func.clone(),
                args,
                kwargs,
            },
        )
        .settle()
    }

    /// Late-bound node, filled in with [`Lazy::bind`]
    pub fn placeholder(&self, label: impl Into<String>) -> Lazy {
        Lazy::new(
            self.clone(),
            Operation::Placeholder {
                label: label.into(),
                bound: None,
            },
        )
    }

    /// Force a node; same as [`Lazy::force`]
    pub fn force(&self, node: &Lazy) -> EvalResult<Value> {
        node.force()
    }

    /// Number of entries in the active cache
    pub fn cache_len(&self) -> EvalResult<usize> {
        self.inner.cache.borrow().len()
    }

    pub fn cache_contains(&self, fp: &Fingerprint) -> EvalResult<bool> {
        self.inner.cache.borrow().contains(fp)
    }

    /// Drop every cached result
    pub fn clear_cache(&self) -> EvalResult<()> {
        self.inner.cache.borrow_mut().clear()
    }

    /// Inspect the active cache
    pub fn inspect_cache<R>(&self, f: impl FnOnce(&dyn CacheBackend) -> R) -> R {
        f(self.inner.cache.borrow().as_ref())
    }

    /// Mark `fp` as being computed; nested entry with the same key is a loop
    pub(crate) fn enter(&self, fp: &Fingerprint, op: &Operation) -> EvalResult<InFlight<'_>> {
        if !self.inner.in_flight.borrow_mut().insert(fp.clone()) {
            return Err(EvalError::CyclicGraph {
                at: format!("{} ({})", op.kind(), fp),
            });
        }
        Ok(InFlight {
            engine: self,
            fp: fp.clone(),
        })
    }

    /// Read-through lookup honouring `decache`
    pub(crate) fn lookup(&self, fp: &Fingerprint, op: &Operation) -> EvalResult<Option<Value>> {
        if !self.inner.options.decache {
            return Ok(None);
        }
        let cache = self.inner.cache.borrow();
        if !cache.contains(fp)? {
            return Ok(None);
        }
        let value = cache.get(fp)?;
        if value.is_some() {
            self.bump(|s| s.hits += 1);
            self.diag("decache", fp, op);
        }
        Ok(value)
    }

    /// Account for an evaluated result and write it through when `encache` is on
    pub(crate) fn record(&self, fp: &Fingerprint, op: &Operation, value: &Value) -> EvalResult<()> {
        self.bump(|s| s.computed += 1);
        if !self.inner.options.encache {
            self.diag("computed", fp, op);
            return Ok(());
        }
        self.inner.cache.borrow_mut().put(fp, value)?;
        self.bump(|s| s.stored += 1);
        self.diag("encache", fp, op);
        Ok(())
    }

    fn bump(&self, update: impl FnOnce(&mut EngineStats)) {
        let mut stats = self.inner.stats.get();
        update(&mut stats);
        self.inner.stats.set(stats);
    }

    fn diag(&self, event: &str, fp: &Fingerprint, op: &Operation) {
        if self.inner.options.diag {
            info!("{}: {} {}", event, op.kind(), fp);
        } else {
            debug!("{}: {} {:?}", event, op.kind(), fp);
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.inner.options)
            .field("cache", &self.inner.cache.borrow().name())
            .finish()
    }
}

/// Guard removing a fingerprint from the in-flight set
pub(crate) struct InFlight<'a> {
    engine: &'a Engine,
    fp: Fingerprint,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.engine.inner.in_flight.borrow_mut().remove(&self.fp);
    }
}
