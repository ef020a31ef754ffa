//! Cache backends keyed by fingerprint
//!
//! Every backend answers the same three questions: is a fingerprint present,
//! what value does it hold, and store this value under it. Read-through and
//! write-through policy lives in the engine, not here.
//!
//! | Backend | Lifetime | Notes |
//! |---------|----------|-------|
//! | [`MemoryCache`] | process | plain map, also used by in-place engines |
//! | [`DirCache`] flat | on disk | legacy `<root>/<hex>` layout |
//! | [`DirCache`] sharded | on disk | `<root>/<hex[..2]>/<hex[2..]>` plus marker |

pub mod dir;
pub mod memory;

pub use dir::{DirCache, Layout, StoreMarker, StoreStats};
pub use memory::MemoryCache;

use crate::error::EvalResult;
use crate::fingerprint::Fingerprint;
use crate::value::Value;

/// Storage contract shared by every cache
pub trait CacheBackend {
    /// Whether a result is stored under `fp`
    fn contains(&self, fp: &Fingerprint) -> EvalResult<bool>;

    /// Stored result, `None` when absent
    fn get(&self, fp: &Fingerprint) -> EvalResult<Option<Value>>;

    /// Store `value` under `fp`, replacing any previous entry
    fn put(&mut self, fp: &Fingerprint, value: &Value) -> EvalResult<()>;

    /// Number of stored entries
    fn len(&self) -> EvalResult<usize>;

    fn is_empty(&self) -> EvalResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every entry
    fn clear(&mut self) -> EvalResult<()>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}
