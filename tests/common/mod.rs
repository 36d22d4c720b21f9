#![allow(dead_code)]

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use covmanager::error::Result;
use covmanager::jobs::{JobRunner, RunnerConfig};
use covmanager::model::{Collection, CollectionFilter, CollectionPage, CoverageData, FileCoverage, NewCollection};
use covmanager::store::{CoverageStore, SqliteStore};
use covmanager::tree::CoverageTree;
use parking_lot::Mutex;
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(10);

/// Create a fresh store in a temporary directory.
/// The caller must hold onto `TempDir` to keep the temp directory alive.
pub fn setup_store() -> (Arc<SqliteStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("test.db"), 16).unwrap();
    (Arc::new(store), dir)
}

pub fn runner_for(store: Arc<dyn CoverageStore>) -> JobRunner {
    JobRunner::new(
        store,
        RunnerConfig {
            workers: 2,
            ..Default::default()
        },
    )
    .unwrap()
}

pub fn runner(store: &Arc<SqliteStore>) -> JobRunner {
    runner_for(store.clone())
}

pub fn data(files: &[(&str, &[Option<u64>])]) -> CoverageData {
    CoverageData {
        files: files
            .iter()
            .map(|(path, coverage)| FileCoverage {
                path: path.to_string(),
                coverage: coverage.to_vec(),
            })
            .collect(),
    }
}

pub fn meta(revision: &str) -> NewCollection {
    NewCollection {
        repository: "mozilla-central".to_string(),
        revision: revision.to_string(),
        branch: "master".to_string(),
        ..Default::default()
    }
}

pub fn insert(store: &SqliteStore, revision: &str, files: &[(&str, &[Option<u64>])]) -> i64 {
    store.insert(&meta(revision), &data(files)).unwrap()
}

/// Wraps a store so `load_tree` blocks until the test opens the gate.
pub struct GatedStore {
    inner: Arc<SqliteStore>,
    gate: Mutex<Receiver<()>>,
}

impl GatedStore {
    pub fn new(inner: Arc<SqliteStore>) -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = channel();
        (
            Arc::new(Self {
                inner,
                gate: Mutex::new(rx),
            }),
            tx,
        )
    }
}

impl CoverageStore for GatedStore {
    fn collection(&self, id: i64) -> Result<Collection> {
        self.inner.collection(id)
    }

    fn load_tree(&self, id: i64) -> Result<Arc<CoverageTree>> {
        let _ = self.gate.lock().recv_timeout(WAIT);
        self.inner.load_tree(id)
    }

    fn list_collections(
        &self,
        filter: &CollectionFilter,
        page: u32,
        per_page: u32,
    ) -> Result<CollectionPage> {
        self.inner.list_collections(filter, page, per_page)
    }
}
