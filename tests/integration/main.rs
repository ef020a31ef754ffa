//! Integration tests for evalcache

mod engine_tests {
    use evalcache::config::{Config, StoreConfig};
    use evalcache::{
        args, kwargs, CacheBackend, DirCache, Engine, EvalError, HashAlgorithm, Layout, LazyFn,
        Value,
    };
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> DirCache {
        DirCache::open_v2(temp.path().join("store")).unwrap()
    }

    fn summ(calls: Rc<Cell<usize>>) -> LazyFn {
        LazyFn::new("summ", move |inv| {
            calls.set(calls.get() + 1);
            Ok((inv.int(0)? + inv.int(1)?).into())
        })
        .params(["a", "b"])
    }

    fn fib(calls: Rc<Cell<usize>>) -> LazyFn {
        LazyFn::new("fib", move |inv| {
            calls.set(calls.get() + 1);
            let n = inv.int(0)?;
            if n < 2 {
                return Ok(n.into());
            }
            Ok((inv.recurse(args![n - 1]) + inv.recurse(args![n - 2])).into())
        })
    }

    #[test]
    fn shared_operands_are_added_once() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::with_cache(store(&temp));
        let (a, b, c) = (engine.wrap(1), engine.wrap(2), engine.wrap(3));

        assert_eq!((&a + &b + &c).force().unwrap(), Value::Int(6));
        assert_eq!(engine.cache_len().unwrap(), 2);

        let temp = TempDir::new().unwrap();
        let engine = Engine::with_cache(store(&temp));
        let (a, b, c, d) = (engine.wrap(1), engine.wrap(2), engine.wrap(3), engine.wrap(4));
        assert_eq!((&a + &b + &c + &d).force().unwrap(), Value::Int(10));
        assert_eq!(engine.cache_len().unwrap(), 3);
    }

    #[test]
    fn keyword_order_hits_same_entry() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::with_cache(store(&temp));
        let calls = Rc::new(Cell::new(0));
        let f = summ(calls.clone());

        assert_eq!(engine.call(&f, args![1, 1]).force().unwrap(), Value::Int(2));
        assert_eq!(
            engine.capture(&f, args![], kwargs![a = 1, b = 1]).force().unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            engine.capture(&f, args![], kwargs![b = 1, a = 1]).force().unwrap(),
            Value::Int(2)
        );
        assert_eq!(calls.get(), 1);
        assert_eq!(engine.cache_len().unwrap(), 1);
    }

    #[test]
    fn fibonacci_persists_across_engines() {
        let temp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));

        let engine = Engine::with_cache(store(&temp));
        let f = fib(calls.clone());
        assert_eq!(engine.call(&f, args![9]).force().unwrap(), Value::Int(34));
        assert_eq!(engine.cache_len().unwrap(), 18);
        assert_eq!(calls.get(), 10);

        // a fresh process-like engine over the same root recomputes nothing
        let engine = Engine::with_cache(store(&temp));
        assert_eq!(engine.call(&f, args![9]).force().unwrap(), Value::Int(34));
        assert_eq!(calls.get(), 10);
        assert_eq!(engine.stats().hits, 1);
        assert_eq!(engine.stats().computed, 0);
    }

    #[test]
    fn onplace_fibonacci_keeps_only_calls() {
        let engine = Engine::onplace_memoize();
        let f = LazyFn::new("fib", |inv| {
            let n = inv.int(0)?;
            if n < 2 {
                return Ok(n.into());
            }
            let a = inv.force(&inv.recurse(args![n - 1]))?;
            let b = inv.force(&inv.recurse(args![n - 2]))?;
            Ok(Value::Int(a.as_int().unwrap_or(0) + b.as_int().unwrap_or(0)).into())
        });

        let node = engine.call(&f, args![9]);
        assert_eq!(node.force().unwrap(), Value::Int(34));
        assert_eq!(engine.cache_len().unwrap(), 10);
        assert!(node.is_collapsed());
        assert_eq!(node.graph_size(), 1);
    }

    #[test]
    fn eager_onplace_fibonacci_with_plain_body() {
        let temp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let engine = Engine::builder()
            .cache(store(&temp))
            .eager(true)
            .onplace(true)
            .build();

        let node = engine.call(&fib(calls.clone()), args![9]);
        assert!(node.is_collapsed());
        assert_eq!(engine.cache_len().unwrap(), 10);
        assert_eq!(calls.get(), 10);
        assert_eq!(node.force().unwrap(), Value::Int(34));
    }

    #[test]
    fn eager_onplace_makers_cache_at_call_time() {
        let engine = Engine::eager_onplace_memoize();
        let maker = LazyFn::new("maker", |inv| Ok(inv.arg(0)?.clone().into()));
        let (a, b) = (engine.wrap(1), engine.wrap(2));
        let c = engine.call(&maker, args![3]);
        let d = engine.call(&maker, args![4]);
        assert_eq!(engine.cache_len().unwrap(), 2);

        let count = &a + &b + &c + &d;
        assert_eq!(engine.cache_len().unwrap(), 3);
        assert_eq!(count.force().unwrap(), Value::Int(10));
    }

    #[test]
    fn eager_memoize_fibonacci_counts_sums() {
        let calls = Rc::new(Cell::new(0));
        let engine = Engine::eager_memoize();
        let ret = engine.call(&fib(calls.clone()), args![9]);
        assert_eq!(ret.force().unwrap(), Value::Int(34));
        // fib(0) through fib(9) plus eight additions
        assert_eq!(engine.cache_len().unwrap(), 18);
    }

    #[test]
    fn non_finite_results_persist() {
        let temp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let nan = {
            let calls = calls.clone();
            LazyFn::new("nan", move |_| {
                calls.set(calls.get() + 1);
                Ok(Value::Float(f64::NAN).into())
            })
        };

        let engine = Engine::with_cache(store(&temp));
        let first = engine.call(&nan, args![]).force().unwrap();
        assert!(first.as_float().unwrap().is_nan());

        let engine = Engine::with_cache(store(&temp));
        let again = engine.call(&nan, args![]).force().unwrap();
        assert!(again.as_float().unwrap().is_nan());
        assert_eq!(calls.get(), 1);
        assert_eq!(engine.stats().hits, 1);
    }

    #[test]
    fn crafted_strings_do_not_collide_with_tuples() {
        let engine = Engine::memoize();
        let tuple = engine
            .wrap(Value::tuple([Value::Int(1), Value::Int(10)]))
            .fingerprint()
            .unwrap();

        for crafted in ["1,10", "(1, 10)", "11,0", "int:1,int:10"] {
            assert_ne!(engine.wrap(crafted).fingerprint().unwrap(), tuple, "{crafted}");
        }

        let shifted = engine
            .wrap(Value::tuple([Value::Int(11), Value::Int(0)]))
            .fingerprint()
            .unwrap();
        assert_ne!(shifted, tuple);

        let f = summ(Rc::new(Cell::new(0)));
        assert_ne!(
            engine.call(&f, args![1, 10]).fingerprint().unwrap(),
            engine.call(&f, args!["1", "10"]).fingerprint().unwrap()
        );
    }

    #[test]
    fn function_dump_separates_lambdas_in_store() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::builder()
            .cache(store(&temp))
            .function_dump(true)
            .build();
        let double = LazyFn::new("<lambda>", |inv| Ok((inv.int(0)? * 2).into()))
            .defined_as("lambda x: x * 2");
        let square = LazyFn::new("<lambda>", |inv| Ok((inv.int(0)? * inv.int(0)?).into()))
            .defined_as("lambda x: x * x");

        assert_eq!(engine.call(&double, args![3]).force().unwrap(), Value::Int(6));
        assert_eq!(engine.call(&square, args![3]).force().unwrap(), Value::Int(9));
        assert_eq!(engine.cache_len().unwrap(), 2);
    }

    #[test]
    fn algorithms_set_digest_length() {
        for (algo, len) in [
            (HashAlgorithm::Sha224, 28),
            (HashAlgorithm::Sha256, 32),
            (HashAlgorithm::Sha384, 48),
            (HashAlgorithm::Sha512, 64),
        ] {
            let engine = Engine::builder().algo(algo).build();
            let fp = engine.wrap(1).fingerprint().unwrap();
            assert_eq!(fp.as_bytes().len(), len);
        }
    }

    #[test]
    fn flat_and_sharded_stores_are_independent() {
        let temp = TempDir::new().unwrap();
        let flat_root = temp.path().join("v1");
        let sharded_root = temp.path().join("v2");

        let flat = Engine::with_cache(DirCache::open(&flat_root).unwrap());
        let sharded = Engine::with_cache(DirCache::open_v2(&sharded_root).unwrap());
        (flat.wrap(20) + 22).force().unwrap();
        (sharded.wrap(20) + 22).force().unwrap();
        assert_eq!(flat.cache_len().unwrap(), 1);
        assert_eq!(sharded.cache_len().unwrap(), 1);

        sharded.clear_cache().unwrap();
        assert_eq!(sharded.cache_len().unwrap(), 0);
        assert_eq!(flat.cache_len().unwrap(), 1);

        DirCache::open_v2(&sharded_root).unwrap().destroy().unwrap();
        assert!(!sharded_root.exists());
        assert!(flat_root.exists());
    }

    #[test]
    fn engine_from_config() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("configured");
        let mut config = Config {
            store: StoreConfig {
                root: Some(root.clone()),
                layout: Layout::Flat,
            },
            ..Config::default()
        };
        config.engine.algo = HashAlgorithm::Sha512;

        let engine = Engine::from_config(&config).unwrap();
        (engine.wrap(2) * 3).force().unwrap();

        let flat = DirCache::open(&root).unwrap();
        assert_eq!(flat.len().unwrap(), 1);
        assert_eq!(flat.entries().unwrap()[0].as_bytes().len(), 64);
    }

    #[test]
    fn failed_store_write_leaves_node_pending() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::with_cache(store(&temp));
        let make_fn = LazyFn::new("make_fn", |_| {
            Ok(Value::Function(LazyFn::new("inner", |_| Ok(Value::None.into()))).into())
        });

        let node = engine.call(&make_fn, args![]);
        assert!(matches!(node.force(), Err(EvalError::Unstorable { .. })));
        assert!(!node.is_resolved());
        assert_eq!(engine.cache_len().unwrap(), 0);
    }
}

mod file_tests {
    use evalcache::{args, DirCache, Engine, EvalError, LazyFile, LazyFn, Value};
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn render(runs: Rc<Cell<usize>>) -> LazyFn {
        LazyFn::new("render", move |inv| {
            runs.set(runs.get() + 1);
            let lines = inv.int(0)?;
            let path = inv.str(1)?;
            let body: String = (0..lines).map(|i| format!("line {i}\n")).collect();
            fs::write(path, body).map_err(|e| EvalError::storage("writing render", e))?;
            Ok(Value::None.into())
        })
        .params(["lines", "path"])
    }

    #[test]
    fn idempotent_with_existing_destination() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::memoize();
        let pool = DirCache::open_v2(temp.path().join("pool")).unwrap();
        let runs = Rc::new(Cell::new(0));
        let maker = LazyFile::new(&engine, pool).producer("path", render(runs.clone()));
        let dest = temp.path().join("out.txt").to_string_lossy().into_owned();

        let first = maker.call(args![3, dest.clone()], vec![]).unwrap();
        let bytes = fs::read(&first).unwrap();
        assert!(first.exists());

        let second = maker.call(args![3, dest.clone()], vec![]).unwrap();
        assert_eq!(fs::read(&second).unwrap(), bytes);
        assert_eq!(runs.get(), 1);

        // a stale unrelated file at the destination is replaced
        fs::remove_file(&second).unwrap();
        fs::write(&second, b"stale").unwrap();
        let third = maker.call(args![3, dest], vec![]).unwrap();
        assert_eq!(fs::read(&third).unwrap(), bytes);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn pool_shared_between_destinations_and_engines() {
        let temp = TempDir::new().unwrap();
        let pool_root = temp.path().join("pool");
        let runs = Rc::new(Cell::new(0));

        let engine = Engine::memoize();
        let maker = LazyFile::new(&engine, DirCache::open_v2(&pool_root).unwrap())
            .producer("path", render(runs.clone()));
        let a = temp.path().join("a.txt").to_string_lossy().into_owned();
        maker.call(args![2, a.clone()], vec![]).unwrap();

        let other = Engine::memoize();
        let maker = LazyFile::new(&other, DirCache::open_v2(&pool_root).unwrap())
            .producer("path", render(runs.clone()));
        let b = temp.path().join("b.txt").to_string_lossy().into_owned();
        maker.call(args![2, b.clone()], vec![]).unwrap();

        assert_eq!(runs.get(), 1);
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn decache_off_always_runs() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::memoize();
        let runs = Rc::new(Cell::new(0));
        let maker = LazyFile::new(&engine, DirCache::open_v2(temp.path().join("pool")).unwrap())
            .decache(false)
            .producer("path", render(runs.clone()));
        let dest = temp.path().join("out.txt").to_string_lossy().into_owned();

        maker.call(args![1, dest.clone()], vec![]).unwrap();
        maker.call(args![1, dest], vec![]).unwrap();
        assert_eq!(runs.get(), 2);
    }
}

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn evalcache(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("evalcache");
        cmd.env("EVALCACHE_CONFIG", temp.path().join("config.toml"))
            .env_remove("EVALCACHE_STORE");
        cmd
    }

    fn store_arg(temp: &TempDir) -> String {
        temp.path().join("store").to_string_lossy().into_owned()
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        evalcache(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("persistent evaluation caches"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        evalcache(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("evalcache"));
    }

    #[test]
    fn init_creates_sharded_store() {
        let temp = TempDir::new().unwrap();
        evalcache(&temp)
            .args(["init", "--store", &store_arg(&temp)])
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized sharded store"));
        assert!(temp.path().join("store").join(".evalcache-v2").exists());
    }

    #[test]
    fn init_rejects_layout_mismatch() {
        let temp = TempDir::new().unwrap();
        evalcache(&temp)
            .args(["init", "--store", &store_arg(&temp)])
            .assert()
            .success();
        evalcache(&temp)
            .args(["init", "--layout", "flat", "--store", &store_arg(&temp)])
            .assert()
            .failure()
            .stderr(predicate::str::contains("sharded layout"));
    }

    #[test]
    fn stats_clear_destroy() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("store");
        {
            let engine = evalcache::Engine::with_cache(evalcache::DirCache::open_v2(&root).unwrap());
            (engine.wrap(1) + 2).force().unwrap();
        }

        evalcache(&temp)
            .args(["stats", "--format", "plain", "--store", &store_arg(&temp)])
            .assert()
            .success()
            .stdout(predicate::str::diff("1\n"));

        evalcache(&temp)
            .args(["stats", "--format", "json", "--store", &store_arg(&temp)])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"entries\": 1"));

        evalcache(&temp)
            .args(["clear", "--yes", "--store", &store_arg(&temp)])
            .assert()
            .success()
            .stdout(predicate::str::contains("cleared 1 entry"));
        assert!(root.join(".evalcache-v2").exists());

        evalcache(&temp)
            .args(["destroy", "--yes", "--store", &store_arg(&temp)])
            .assert()
            .success();
        assert!(!root.exists());
    }

    #[test]
    fn stats_without_store() {
        let temp = TempDir::new().unwrap();
        evalcache(&temp)
            .args(["stats", "--store", &store_arg(&temp)])
            .assert()
            .success()
            .stdout(predicate::str::contains("No store at"));
    }

    #[test]
    fn path_prefers_explicit_then_env() {
        let temp = TempDir::new().unwrap();
        evalcache(&temp)
            .args(["path", "--store", "/explicit/root"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/explicit/root"));

        evalcache(&temp)
            .env("EVALCACHE_STORE", "/from/env")
            .arg("path")
            .assert()
            .success()
            .stdout(predicate::str::contains("/from/env"));
    }

    #[test]
    fn config_show_and_path() {
        let temp = TempDir::new().unwrap();
        evalcache(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[engine]"));

        evalcache(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn invalid_config_fails() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[engine]\nalgo = 3\n").unwrap();
        evalcache(&temp)
            .arg("path")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }
}
