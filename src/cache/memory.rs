//! Transient in-memory cache

use super::CacheBackend;
use crate::error::EvalResult;
use crate::fingerprint::Fingerprint;
use crate::value::Value;
use std::collections::HashMap;

/// Fingerprint to value map living as long as its engine
#[derive(Debug, Default, Clone)]
pub struct MemoryCache {
    entries: HashMap<Fingerprint, Value>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored fingerprints in unspecified order
    pub fn keys(&self) -> impl Iterator<Item = &Fingerprint> {
        self.entries.keys()
    }
}

impl CacheBackend for MemoryCache {
    fn contains(&self, fp: &Fingerprint) -> EvalResult<bool> {
        Ok(self.entries.contains_key(fp))
    }

    fn get(&self, fp: &Fingerprint) -> EvalResult<Option<Value>> {
        Ok(self.entries.get(fp).cloned())
    }

    fn put(&mut self, fp: &Fingerprint, value: &Value) -> EvalResult<()> {
        self.entries.insert(fp.clone(), value.clone());
        Ok(())
    }

    fn len(&self) -> EvalResult<usize> {
        Ok(self.entries.len())
    }

    fn clear(&mut self) -> EvalResult<()> {
        self.entries.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
