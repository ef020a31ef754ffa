//! CLI command implementations

pub mod config;
pub mod store;

pub use config::execute as config;
pub use store::{clear, destroy, init, path, stats};

use crate::cache::{DirCache, Layout};
use crate::config::{Config, ConfigManager};
use crate::error::EvalResult;
use std::path::{Path, PathBuf};

/// Store root and layout a command operates on
#[derive(Debug, Clone)]
pub struct StoreTarget {
    pub root: PathBuf,
    pub layout: Layout,
}

impl StoreTarget {
    /// Explicit root wins over `EVALCACHE_STORE` and the config
    pub fn resolve(explicit: Option<&Path>, config: &Config) -> Self {
        Self {
            root: explicit
                .map(Path::to_path_buf)
                .unwrap_or_else(|| ConfigManager::store_root(config)),
            layout: config.store.layout,
        }
    }

    /// Open the store if its root exists, using the layout found on disk
    pub fn open_existing(&self) -> EvalResult<Option<DirCache>> {
        if !self.root.is_dir() {
            return Ok(None);
        }
        let layout = DirCache::detect(&self.root)?.unwrap_or(self.layout);
        DirCache::with_layout(&self.root, layout).map(Some)
    }
}
