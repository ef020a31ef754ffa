//! Lazy file adapter
//!
//! Wraps producers whose real effect is writing a file to a destination
//! parameter. The resulting artifacts are pooled in a [`DirCache`] under the
//! call's fingerprint: a later call with the same operands hard-links the
//! pooled file to its destination instead of running the producer.
//!
//! The destination path is left out of the fingerprint unless
//! [`LazyFile::include_path`] is set, so the same artifact requested at two
//! different paths shares one pooled file.

use crate::cache::{CacheBackend, DirCache};
use crate::engine::Engine;
use crate::error::{EvalError, EvalResult};
use crate::fingerprint::Fingerprint;
use crate::graph::{encode_operands, force_arguments, Invocation, LazyFn, Operand};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File pool bound to an engine's hashing settings
#[derive(Clone)]
pub struct LazyFile {
    engine: Engine,
    pool: DirCache,
    encache: bool,
    decache: bool,
    include_path: bool,
}

impl LazyFile {
    /// Adapter pooling into `pool`; cache policy starts from the engine's
    pub fn new(engine: &Engine, pool: DirCache) -> Self {
        let options = engine.options();
        Self {
            encache: options.encache,
            decache: options.decache,
            engine: engine.clone(),
            pool,
            include_path: false,
        }
    }

    pub fn encache(mut self, enabled: bool) -> Self {
        self.encache = enabled;
        self
    }

    pub fn decache(mut self, enabled: bool) -> Self {
        self.decache = enabled;
        self
    }

    /// Key artifacts by destination path as well as by operands
    pub fn include_path(mut self, enabled: bool) -> Self {
        self.include_path = enabled;
        self
    }

    pub fn pool(&self) -> &DirCache {
        &self.pool
    }

    /// Wrap `func`, whose parameter `field` names the file it writes
    pub fn producer(&self, field: impl Into<String>, func: LazyFn) -> FileMaker {
        FileMaker {
            adapter: self.clone(),
            field: field.into(),
            func,
        }
    }
}

/// Where the destination operand sits after binding
enum Slot {
    Positional(usize),
    Keyword,
}

/// A file-producing function wrapped by [`LazyFile::producer`]
pub struct FileMaker {
    adapter: LazyFile,
    field: String,
    func: LazyFn,
}

impl FileMaker {
    pub fn function(&self) -> &LazyFn {
        &self.func
    }

    /// Fingerprint the artifact of a call would be pooled under
    pub fn fingerprint(
        &self,
        args: Vec<Operand>,
        kwargs: Vec<(String, Operand)>,
    ) -> EvalResult<Fingerprint> {
        let (args, kwargs) = self.func.bind(args, kwargs);
        let slot = self.locate(&args, &kwargs)?;
        self.key(&args, &kwargs, &slot)
    }

    /// Produce the file, from the pool when possible, and return its path
    ///
    /// Whatever sits at the destination beforehand is removed first.
    pub fn call(&self, args: Vec<Operand>, kwargs: Vec<(String, Operand)>) -> EvalResult<PathBuf> {
        let (args, kwargs) = self.func.bind(args, kwargs);
        let slot = self.locate(&args, &kwargs)?;
        let fp = self.key(&args, &kwargs, &slot)?;
        let dest = self.destination(&args, &kwargs, &slot)?;

        remove_existing(&dest)?;

        let pool = &self.adapter.pool;
        if self.adapter.decache && pool.contains(&fp)? {
            pool.link_out(&fp, &dest)?;
            self.diag("decache", &fp, &dest);
            return Ok(dest);
        }

        let (values, named) = force_arguments(&args, &kwargs)?;
        let engine = &self.adapter.engine;
        debug!("Producing {} via {}", dest.display(), self.func.name());
        self.func
            .invoke(&Invocation::new(engine, &self.func, &values, &named))?
            .force()?;

        if !dest.is_file() {
            return Err(EvalError::storage(
                format!("{} did not create {}", self.func.name(), dest.display()),
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }

        if self.adapter.encache {
            pool.link_in(&dest, &fp)?;
            self.diag("encache", &fp, &dest);
        }
        Ok(dest)
    }

    fn locate(&self, args: &[Operand], kwargs: &BTreeMap<String, Operand>) -> EvalResult<Slot> {
        if kwargs.contains_key(&self.field) {
            return Ok(Slot::Keyword);
        }
        match self.func.param_index(&self.field) {
            Some(index) if index < args.len() => Ok(Slot::Positional(index)),
            _ => Err(EvalError::FieldNotFound {
                function: self.func.name().to_string(),
                field: self.field.clone(),
            }),
        }
    }

    fn key(
        &self,
        args: &[Operand],
        kwargs: &BTreeMap<String, Operand>,
        slot: &Slot,
    ) -> EvalResult<Fingerprint> {
        let fingerprinter = self.adapter.engine.fingerprinter();
        let mut enc = fingerprinter.encoder();
        enc.field("op", b"file");
        fingerprinter.encode_callee(&mut enc, &self.func)?;

        if self.adapter.include_path {
            enc.field("dest", b"keyed");
            encode_operands(fingerprinter, &mut enc, args, kwargs)?;
            return Ok(enc.finish());
        }

        // positions of the remaining operands stay put
        enc.field("dest", b"excluded");
        match slot {
            Slot::Positional(index) => {
                let mut masked = args.to_vec();
                masked[*index] = Operand::Value(Value::None);
                encode_operands(fingerprinter, &mut enc, &masked, kwargs)?;
            }
            Slot::Keyword => {
                let mut masked = kwargs.clone();
                masked.remove(&self.field);
                encode_operands(fingerprinter, &mut enc, args, &masked)?;
            }
        }
        Ok(enc.finish())
    }

    fn destination(
        &self,
        args: &[Operand],
        kwargs: &BTreeMap<String, Operand>,
        slot: &Slot,
    ) -> EvalResult<PathBuf> {
        let operand = match slot {
            Slot::Positional(index) => &args[*index],
            Slot::Keyword => &kwargs[&self.field],
        };
        let value = operand.force()?;
        value
            .as_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| EvalError::FieldType {
                function: self.func.name().to_string(),
                field: self.field.clone(),
                found: value.type_name(),
            })
    }

    fn diag(&self, event: &str, fp: &Fingerprint, dest: &Path) {
        if self.adapter.engine.options().diag {
            info!("{}: file {} {}", event, fp, dest.display());
        } else {
            debug!("{}: file {:?} {}", event, fp, dest.display());
        }
    }
}

fn remove_existing(dest: &Path) -> EvalResult<()> {
    match fs::remove_file(dest) {
        Ok(()) => {
            debug!("Removed stale {}", dest.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EvalError::storage(
            format!("removing {}", dest.display()),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args, kwargs};
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn writer(runs: Rc<Cell<usize>>) -> LazyFn {
        LazyFn::new("write_greeting", move |inv| {
            runs.set(runs.get() + 1);
            let name = inv.str(0)?;
            let path = inv.str(1)?;
            fs::write(path, format!("hello {name}\n"))
                .map_err(|e| EvalError::storage("writing greeting", e))?;
            Ok(Value::None.into())
        })
        .params(["name", "path"])
    }

    fn setup() -> (TempDir, Engine, LazyFile) {
        let temp = TempDir::new().unwrap();
        let engine = Engine::memoize();
        let pool = DirCache::open_v2(temp.path().join("pool")).unwrap();
        let adapter = LazyFile::new(&engine, pool);
        (temp, engine, adapter)
    }

    #[test]
    fn second_call_links_without_running() {
        let (temp, _engine, adapter) = setup();
        let runs = Rc::new(Cell::new(0));
        let maker = adapter.producer("path", writer(runs.clone()));
        let dest = temp.path().join("out.txt");
        let dest_str = dest.to_string_lossy().into_owned();

        let first = maker.call(args!["world", dest_str.clone()], vec![]).unwrap();
        let before = fs::read(&first).unwrap();
        let second = maker.call(args!["world", dest_str], vec![]).unwrap();

        assert_eq!(runs.get(), 1);
        assert_eq!(fs::read(&second).unwrap(), before);
        assert_eq!(adapter.pool().entries().unwrap().len(), 1);
    }

    #[test]
    fn path_excluded_from_key_by_default() {
        let (temp, _engine, adapter) = setup();
        let maker = adapter.producer("path", writer(Rc::new(Cell::new(0))));
        let a = temp.path().join("a.txt").to_string_lossy().into_owned();
        let b = temp.path().join("b.txt").to_string_lossy().into_owned();

        assert_eq!(
            maker.fingerprint(args!["x", a.clone()], vec![]).unwrap(),
            maker.fingerprint(vec![], kwargs![path = b.clone(), name = "x"]).unwrap()
        );

        let keyed = adapter
            .clone()
            .include_path(true)
            .producer("path", writer(Rc::new(Cell::new(0))));
        assert_ne!(
            keyed.fingerprint(args!["x", a], vec![]).unwrap(),
            keyed.fingerprint(args!["x", b], vec![]).unwrap()
        );
    }

    #[test]
    fn lazy_operands_are_forced() {
        let (temp, engine, adapter) = setup();
        let runs = Rc::new(Cell::new(0));
        let maker = adapter.producer("path", writer(runs.clone()));
        let dest = temp.path().join("lazy.txt").to_string_lossy().into_owned();

        let name = engine.wrap("wor") + "ld";
        let out = maker.call(args![name, engine.wrap(dest)], vec![]).unwrap();
        assert_eq!(fs::read_to_string(out).unwrap(), "hello world\n");
    }

    #[test]
    fn missing_field_is_reported() {
        let (_temp, _engine, adapter) = setup();
        let maker = adapter.producer("target", writer(Rc::new(Cell::new(0))));
        assert!(matches!(
            maker.call(args!["x", "/tmp/x"], vec![]),
            Err(EvalError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn non_path_destination_is_rejected() {
        let (_temp, _engine, adapter) = setup();
        let maker = adapter.producer("path", writer(Rc::new(Cell::new(0))));
        assert!(matches!(
            maker.call(args!["x", 42], vec![]),
            Err(EvalError::FieldType { .. })
        ));
    }

    #[test]
    fn producer_must_create_the_file() {
        let (temp, _engine, adapter) = setup();
        let lazy = LazyFn::new("noop", |_| Ok(Value::None.into())).params(["path"]);
        let maker = adapter.producer("path", lazy);
        let dest = temp.path().join("never.txt").to_string_lossy().into_owned();
        let err = maker.call(args![dest], vec![]).unwrap_err();
        assert!(err.is_storage());
        assert_eq!(adapter.pool().entries().unwrap().len(), 0);
    }
}
