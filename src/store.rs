//! Read access to stored collections for the job runner.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::builder::{self, TreeCache};
use crate::db;
use crate::error::Result;
use crate::model::{Collection, CollectionFilter, CollectionPage, CoverageData, NewCollection};
use crate::tree::CoverageTree;

/// Source of collections and their coverage trees. Collections are
/// immutable, so implementations may cache trees freely.
pub trait CoverageStore: Send + Sync {
    fn collection(&self, id: i64) -> Result<Collection>;

    fn load_tree(&self, id: i64) -> Result<Arc<CoverageTree>>;

    fn list_collections(
        &self,
        filter: &CollectionFilter,
        page: u32,
        per_page: u32,
    ) -> Result<CollectionPage>;
}

/// SQLite-backed store. The connection is shared behind a mutex; built trees
/// are cached by artifact content hash.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    cache: TreeCache,
}

impl SqliteStore {
    /// Open the database at `path`, creating the schema when needed.
    pub fn open(path: &Path, cache_capacity: usize) -> Result<Self> {
        let conn = db::open(path)?;
        db::init_schema(&conn)?;
        Ok(Self::from_connection(conn, cache_capacity))
    }

    /// Wrap an already initialized connection.
    pub fn from_connection(conn: Connection, cache_capacity: usize) -> Self {
        Self {
            conn: Mutex::new(conn),
            cache: TreeCache::new(cache_capacity),
        }
    }

    pub fn insert(&self, meta: &NewCollection, data: &CoverageData) -> Result<i64> {
        db::insert_collection(&mut self.conn.lock(), meta, data)
    }

    pub fn cached_trees(&self) -> usize {
        self.cache.len()
    }
}

impl CoverageStore for SqliteStore {
    fn collection(&self, id: i64) -> Result<Collection> {
        db::get_collection(&self.conn.lock(), id)
    }

    fn load_tree(&self, id: i64) -> Result<Arc<CoverageTree>> {
        let hash = db::artifact_hash(&self.conn.lock(), id)?;
        self.cache.get_or_build(&hash, || {
            let raw = db::load_artifact(&self.conn.lock(), id)?;
            builder::build(&raw)
        })
    }

    fn list_collections(
        &self,
        filter: &CollectionFilter,
        page: u32,
        per_page: u32,
    ) -> Result<CollectionPage> {
        db::list_collections(&self.conn.lock(), filter, page, per_page)
    }
}
