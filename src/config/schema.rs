//! Configuration schema for evalcache
//!
//! Configuration is stored at `~/.config/evalcache/config.toml`

use crate::cache::Layout;
use crate::engine::EngineOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine behaviour switches
    pub engine: EngineOptions,

    /// Persistent store settings
    pub store: StoreConfig,
}

/// Persistent store settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root; defaults to the user cache directory
    pub root: Option<PathBuf>,

    /// On-disk layout: "flat" or "sharded"
    pub layout: Layout,
}
