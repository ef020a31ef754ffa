//! Content-addressed directory store
//!
//! Entries are files named after the fingerprint's hex digest. Two layouts
//! exist side by side:
//!
//! - `Flat` (v1): `<root>/<hex>`, no marker
//! - `Sharded` (v2): `<root>/<hex[..2]>/<hex[2..]>` with a `.evalcache-v2`
//!   marker recording when the store was created
//!
//! Writes go to a uniquely named temp file in the root and are renamed into
//! place, so readers in other processes see either nothing or a whole entry.
//! The same store doubles as a pool of files for [`crate::file::LazyFile`].

use super::CacheBackend;
use crate::error::{EvalError, EvalResult};
use crate::fingerprint::Fingerprint;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Marker file name of the sharded layout
pub const MARKER_FILE: &str = ".evalcache-v2";

const TEMP_PREFIX: &str = ".tmp-";

/// On-disk layout of a directory store
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Legacy single-directory layout
    Flat,
    /// Two-level layout keyed by hash prefix
    #[default]
    Sharded,
}

impl Layout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Sharded => "sharded",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of the sharded layout marker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMarker {
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

/// Summary of a store's contents
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub root: PathBuf,
    pub layout: Layout,
    pub entries: usize,
    pub bytes: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Persistent cache rooted at an explicit directory
#[derive(Debug, Clone)]
pub struct DirCache {
    root: PathBuf,
    layout: Layout,
}

impl DirCache {
    /// Open or create a flat (v1) store
    pub fn open(root: impl Into<PathBuf>) -> EvalResult<Self> {
        Self::with_layout(root, Layout::Flat)
    }

    /// Open or create a sharded (v2) store
    pub fn open_v2(root: impl Into<PathBuf>) -> EvalResult<Self> {
        Self::with_layout(root, Layout::Sharded)
    }

    /// Open or create a store, checking that an existing root matches `layout`
    pub fn with_layout(root: impl Into<PathBuf>, layout: Layout) -> EvalResult<Self> {
        let store = Self {
            root: root.into(),
            layout,
        };
        store.create()?;
        Ok(store)
    }

    /// Layout found in an existing root, `None` if it holds no store yet
    pub fn detect(root: &Path) -> EvalResult<Option<Layout>> {
        if root.join(MARKER_FILE).is_file() {
            return Ok(Some(Layout::Sharded));
        }
        if !root.is_dir() {
            return Ok(None);
        }
        let has_entries = entry_names(root)?.next().is_some();
        Ok(has_entries.then_some(Layout::Flat))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Create the root (and marker) if missing
    pub fn create(&self) -> EvalResult<()> {
        if let Some(found) = Self::detect(&self.root)? {
            if found != self.layout {
                return Err(EvalError::LayoutMismatch {
                    root: self.root.clone(),
                    expected: self.layout.to_string(),
                    found: found.to_string(),
                });
            }
        }

        fs::create_dir_all(&self.root).map_err(|e| {
            EvalError::storage(format!("creating store root {}", self.root.display()), e)
        })?;

        if self.layout == Layout::Sharded && !self.marker_path().exists() {
            let marker = StoreMarker {
                version: 2,
                created_at: Utc::now(),
            };
            let content = serde_json::to_vec_pretty(&marker)?;
            self.write_atomic(&self.marker_path(), &content)?;
            debug!("Initialized sharded store at {}", self.root.display());
        }
        Ok(())
    }

    /// Marker of a sharded store
    pub fn marker(&self) -> EvalResult<Option<StoreMarker>> {
        let path = self.marker_path();
        match fs::read(&path) {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EvalError::storage(
                format!("reading marker {}", path.display()),
                e,
            )),
        }
    }

    /// Path an entry for `fp` lives at
    pub fn path_for(&self, fp: &Fingerprint) -> PathBuf {
        let hex = fp.to_hex();
        match self.layout {
            Layout::Flat => self.root.join(hex),
            Layout::Sharded => {
                let (shard, rest) = hex.split_at(2.min(hex.len()));
                self.root.join(shard).join(rest)
            }
        }
    }

    /// Fingerprints of every stored entry
    pub fn entries(&self) -> EvalResult<Vec<Fingerprint>> {
        let mut found = Vec::new();
        for path in self.entry_paths()? {
            let hex = match self.layout {
                Layout::Flat => file_name(&path),
                Layout::Sharded => {
                    let shard = path.parent().map(file_name).unwrap_or_default();
                    format!("{}{}", shard, file_name(&path))
                }
            };
            if let Some(fp) = Fingerprint::from_hex(&hex) {
                found.push(fp);
            }
        }
        Ok(found)
    }

    pub fn stats(&self) -> EvalResult<StoreStats> {
        let mut entries = 0;
        let mut bytes = 0;
        for path in self.entry_paths()? {
            entries += 1;
            bytes += fs::metadata(&path)
                .map_err(|e| EvalError::storage(format!("reading {}", path.display()), e))?
                .len();
        }
        Ok(StoreStats {
            root: self.root.clone(),
            layout: self.layout,
            entries,
            bytes,
            created_at: self.marker()?.map(|m| m.created_at),
        })
    }

    /// Remove the whole root, marker included
    pub fn destroy(self) -> EvalResult<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                debug!("Destroyed store at {}", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EvalError::storage(
                format!("removing store root {}", self.root.display()),
                e,
            )),
        }
    }

    /// Pool the file at `src` under `fp` without copying its data
    pub fn link_in(&self, src: &Path, fp: &Fingerprint) -> EvalResult<PathBuf> {
        let dest = self.path_for(fp);
        self.ensure_parent(&dest)?;
        let temp = self.temp_path();
        fs::hard_link(src, &temp).map_err(|e| {
            EvalError::storage(format!("linking {} into store", src.display()), e)
        })?;
        self.commit(&temp, &dest)?;
        debug!("Pooled {} as {}", src.display(), fp);
        Ok(dest)
    }

    /// Hard-link the pooled file for `fp` to `dest`
    pub fn link_out(&self, fp: &Fingerprint, dest: &Path) -> EvalResult<()> {
        let src = self.path_for(fp);
        fs::hard_link(&src, dest).map_err(|e| {
            EvalError::storage(
                format!("linking {} to {}", src.display(), dest.display()),
                e,
            )
        })?;
        debug!("Linked {} to {}", fp, dest.display());
        Ok(())
    }

    fn marker_path(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()))
    }

    fn ensure_parent(&self, path: &Path) -> EvalResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EvalError::storage(format!("creating {}", parent.display()), e)
            })?;
        }
        Ok(())
    }

    fn write_atomic(&self, dest: &Path, content: &[u8]) -> EvalResult<()> {
        self.ensure_parent(dest)?;
        let temp = self.temp_path();
        fs::write(&temp, content)
            .map_err(|e| EvalError::storage(format!("writing {}", temp.display()), e))?;
        self.commit(&temp, dest)
    }

    fn commit(&self, temp: &Path, dest: &Path) -> EvalResult<()> {
        fs::rename(temp, dest).map_err(|e| {
            // leave nothing half-written behind
            if let Err(cleanup) = fs::remove_file(temp) {
                debug!("Could not remove {}: {}", temp.display(), cleanup);
            }
            EvalError::storage(format!("renaming into {}", dest.display()), e)
        })
    }

    fn entry_paths(&self) -> EvalResult<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let top: Vec<PathBuf> = entry_names(&self.root)?.collect();
        match self.layout {
            Layout::Flat => Ok(top.into_iter().filter(|p| p.is_file()).collect()),
            Layout::Sharded => {
                let mut paths = Vec::new();
                for shard in top.into_iter().filter(|p| p.is_dir()) {
                    paths.extend(entry_names(&shard)?.filter(|p| p.is_file()));
                }
                Ok(paths)
            }
        }
    }
}

impl CacheBackend for DirCache {
    fn contains(&self, fp: &Fingerprint) -> EvalResult<bool> {
        Ok(self.path_for(fp).is_file())
    }

    fn get(&self, fp: &Fingerprint) -> EvalResult<Option<Value>> {
        let path = self.path_for(fp);
        match fs::read(&path) {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EvalError::storage(
                format!("reading entry {}", path.display()),
                e,
            )),
        }
    }

    fn put(&mut self, fp: &Fingerprint, value: &Value) -> EvalResult<()> {
        if !value.is_storable() {
            return Err(EvalError::Unstorable {
                type_name: value.type_name(),
            });
        }
        let content = serde_json::to_vec(value)?;
        self.write_atomic(&self.path_for(fp), &content)
    }

    fn len(&self) -> EvalResult<usize> {
        Ok(self.entry_paths()?.len())
    }

    /// Drop every entry; the root and marker stay
    fn clear(&mut self) -> EvalResult<()> {
        if !self.root.is_dir() {
            return Ok(());
        }
        for path in entry_names(&self.root)? {
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed
                .map_err(|e| EvalError::storage(format!("removing {}", path.display()), e))?;
        }
        // stale temp files from interrupted writes go too
        for temp in hidden_temp_files(&self.root)? {
            match fs::remove_file(&temp) {
                // a concurrent writer renamed it into place first
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                removed => removed
                    .map_err(|e| EvalError::storage(format!("removing {}", temp.display()), e))?,
            }
        }
        debug!("Cleared store at {}", self.root.display());
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self.layout {
            Layout::Flat => "dir-v1",
            Layout::Sharded => "dir-v2",
        }
    }
}

/// Visible children of `dir`; the marker and temp files are skipped
fn entry_names(dir: &Path) -> EvalResult<impl Iterator<Item = PathBuf>> {
    let paths = read_dir(dir)?;
    Ok(paths
        .into_iter()
        .filter(|p| !file_name(p).starts_with('.')))
}

fn hidden_temp_files(dir: &Path) -> EvalResult<Vec<PathBuf>> {
    Ok(read_dir(dir)?
        .into_iter()
        .filter(|p| file_name(p).starts_with(TEMP_PREFIX))
        .collect())
}

fn read_dir(dir: &Path) -> EvalResult<Vec<PathBuf>> {
    let reader = fs::read_dir(dir)
        .map_err(|e| EvalError::storage(format!("reading directory {}", dir.display()), e))?;
    let mut paths = Vec::new();
    for entry in reader {
        let entry =
            entry.map_err(|e| EvalError::storage(format!("reading {}", dir.display()), e))?;
        paths.push(entry.path());
    }
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
