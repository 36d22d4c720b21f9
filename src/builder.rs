//! Turns a stored coverage artifact into a [`CoverageTree`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{CovError, Result};
use crate::model::CoverageData;
use crate::parsers::coveralls;
use crate::tree::{split_path, CoverageTree};

/// Build a tree from serialized artifact bytes (coveralls layout).
pub fn build(raw: &[u8]) -> Result<CoverageTree> {
    let data = coveralls::parse(raw)?;
    build_data(&data)
}

/// Build a tree from an already parsed artifact.
///
/// Each file path is split on `/` and intermediate directories are created
/// on demand. Fails with `MalformedArtifact` on an empty path, a path given
/// twice, or a path that is a file in one entry and a directory in another.
pub fn build_data(data: &CoverageData) -> Result<CoverageTree> {
    let mut tree = CoverageTree::new();

    for file in &data.files {
        let segments: Vec<&str> = split_path(&file.path).collect();
        if segments.is_empty() {
            return Err(CovError::MalformedArtifact(format!(
                "empty source file path '{}'",
                file.path
            )));
        }

        let (id, created) = tree.file_entry(&segments).map_err(|e| match e {
            CovError::SchemaConflict { path } => CovError::MalformedArtifact(format!(
                "'{path}' is used both as a file and as a directory"
            )),
            other => other,
        })?;
        if !created {
            return Err(CovError::MalformedArtifact(format!(
                "duplicate source file '{}'",
                segments.join("/")
            )));
        }
        if let Some(lines) = tree.lines_mut(id) {
            lines.clone_from(&file.coverage);
        }
    }

    tree.recompute_totals();
    debug_assert!(tree.check_invariants());
    Ok(tree)
}

/// Bounded cache of built trees keyed by artifact content hash.
///
/// Building is idempotent, so two collections with the same content share
/// one tree. The oldest entry is dropped once `capacity` is reached.
pub struct TreeCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    trees: HashMap<String, Arc<CoverageTree>>,
    order: VecDeque<String>,
}

impl TreeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, hash: &str) -> Option<Arc<CoverageTree>> {
        self.inner.lock().trees.get(hash).cloned()
    }

    /// Return the cached tree for `hash`, building it with `load` on a miss.
    /// The lock is not held while building.
    pub fn get_or_build<F>(&self, hash: &str, load: F) -> Result<Arc<CoverageTree>>
    where
        F: FnOnce() -> Result<CoverageTree>,
    {
        if let Some(tree) = self.get(hash) {
            debug!(hash, "tree cache hit");
            return Ok(tree);
        }

        let tree = Arc::new(load()?);
        if self.capacity == 0 {
            return Ok(tree);
        }

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.trees.get(hash) {
            return Ok(existing.clone());
        }
        while inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.trees.remove(&oldest);
            }
        }
        inner.order.push_back(hash.to_string());
        inner.trees.insert(hash.to_string(), tree.clone());
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
