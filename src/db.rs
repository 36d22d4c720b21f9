use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

use crate::builder;
use crate::error::{CovError, Result};
use crate::model::{
    content_hash, Collection, CollectionFilter, CollectionPage, CoverageData, NewCollection,
};

pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = include_str!("../schema.sql");

/// Open (or create) the collection database at the given path.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

/// Ensure the schema is initialized. Safe to call on an already-initialized DB.
/// Performs forward migrations when the on-disk schema version is older than
/// `SCHEMA_VERSION`.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) if v > SCHEMA_VERSION => {
            return Err(CovError::Other(format!(
                "Database schema version {} is newer than this binary supports ({}). \
                 Please upgrade covmanager.",
                v, SCHEMA_VERSION
            )));
        }
        Some(v) => migrate(conn, v)?,
    }
    Ok(())
}

/// Apply migrations from `from_version` up to (and including) `SCHEMA_VERSION`.
///
/// To add a new migration:
///   1. Bump `SCHEMA_VERSION`.
///   2. Add a new arm `N => { ... }` that migrates from version N to N+1.
///   3. Update schema.sql to reflect the final state (new installs skip migrations).
#[allow(unused_mut, clippy::never_loop)]
fn migrate(conn: &Connection, from_version: u32) -> Result<()> {
    let mut current = from_version;
    while current < SCHEMA_VERSION {
        info!(from = current, to = current + 1, "migrating database schema");
        #[allow(clippy::match_single_binding)]
        match current {
            _ => {
                return Err(CovError::Other(format!(
                    "No migration path from schema version {} to {}. \
                     Consider deleting the database and re-ingesting.",
                    current,
                    current + 1
                )));
            }
        }
        #[allow(unreachable_code)]
        {
            current += 1;
            conn.execute("UPDATE schema_version SET version = ?1", params![current])?;
        }
    }
    Ok(())
}

/// Store `data` as a new immutable collection. Returns the collection id.
///
/// The artifact is validated by building it once; identical artifacts are
/// stored only once and shared through their content hash.
pub fn insert_collection(
    conn: &mut Connection,
    meta: &NewCollection,
    data: &CoverageData,
) -> Result<i64> {
    if meta.repository.trim().is_empty() {
        return Err(CovError::Other("A collection needs a repository".to_string()));
    }
    if meta.revision.trim().is_empty() {
        return Err(CovError::Other("A collection needs a revision".to_string()));
    }
    builder::build_data(data)?;

    let tx = conn.transaction()?;
    let id = insert_collection_tx(&tx, meta, data)?;
    tx.commit()?;
    Ok(id)
}

fn insert_collection_tx(tx: &Transaction, meta: &NewCollection, data: &CoverageData) -> Result<i64> {
    let content = data.to_canonical_json()?;
    let hash = content_hash(&content);

    tx.execute(
        "INSERT OR IGNORE INTO artifact (content_hash, content) VALUES (?1, ?2)",
        params![hash, content],
    )?;
    let artifact_id: i64 = tx.query_row(
        "SELECT id FROM artifact WHERE content_hash = ?1",
        params![hash],
        |row| row.get(0),
    )?;

    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO collection (repository, revision, branch, client, description, created_at, artifact_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            meta.repository,
            meta.revision,
            meta.branch,
            meta.client,
            meta.description,
            now,
            artifact_id
        ],
    )?;
    let collection_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO collection_tool (collection_id, tool) VALUES (?1, ?2)",
        )?;
        for tool in &meta.tools {
            stmt.execute(params![collection_id, tool])?;
        }
    }

    Ok(collection_id)
}

const COLLECTION_COLUMNS: &str = "c.id, c.repository, c.revision, c.branch, c.client, \
     c.description, c.created_at, a.content_hash";

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        repository: row.get(1)?,
        revision: row.get(2)?,
        branch: row.get(3)?,
        client: row.get(4)?,
        tools: BTreeSet::new(),
        description: row.get(5)?,
        created: row.get(6)?,
        content_hash: row.get(7)?,
    })
}

fn collection_tools(conn: &Connection, id: i64) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT tool FROM collection_tool WHERE collection_id = ?1 ORDER BY tool",
    )?;
    let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
    let mut tools = BTreeSet::new();
    for row in rows {
        tools.insert(row?);
    }
    Ok(tools)
}

/// Fetch the metadata of one collection.
pub fn get_collection(conn: &Connection, id: i64) -> Result<Collection> {
    let sql = format!(
        "SELECT {COLLECTION_COLUMNS} FROM collection c \
         JOIN artifact a ON a.id = c.artifact_id WHERE c.id = ?1"
    );
    let mut collection = conn
        .query_row(&sql, params![id], row_to_collection)
        .optional()?
        .ok_or(CovError::CollectionNotFound(id))?;
    collection.tools = collection_tools(conn, id)?;
    Ok(collection)
}

/// Content hash of a collection's artifact.
pub fn artifact_hash(conn: &Connection, id: i64) -> Result<String> {
    conn.query_row(
        "SELECT a.content_hash FROM collection c \
         JOIN artifact a ON a.id = c.artifact_id WHERE c.id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(CovError::CollectionNotFound(id))
}

/// Raw artifact bytes of a collection.
pub fn load_artifact(conn: &Connection, id: i64) -> Result<Vec<u8>> {
    conn.query_row(
        "SELECT a.content FROM collection c \
         JOIN artifact a ON a.id = c.artifact_id WHERE c.id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(CovError::CollectionNotFound(id))
}

/// One page of collections matching `filter`, newest first. Pages are
/// 1-based.
pub fn list_collections(
    conn: &Connection,
    filter: &CollectionFilter,
    page: u32,
    per_page: u32,
) -> Result<CollectionPage> {
    let page = page.max(1);
    let per_page = per_page.clamp(1, 1000);

    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();
    if let Some(repository) = &filter.repository {
        clauses.push("c.repository = ?");
        values.push(repository.clone());
    }
    if let Some(branch) = &filter.branch {
        clauses.push("c.branch = ?");
        values.push(branch.clone());
    }
    if let Some(tool) = &filter.tool {
        clauses.push(
            "EXISTS (SELECT 1 FROM collection_tool t WHERE t.collection_id = c.id AND t.tool = ?)",
        );
        values.push(tool.clone());
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let count: u64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM collection c {where_sql}"),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let offset = u64::from(page - 1) * u64::from(per_page);
    let sql = format!(
        "SELECT {COLLECTION_COLUMNS} FROM collection c \
         JOIN artifact a ON a.id = c.artifact_id {where_sql} \
         ORDER BY c.created_at DESC, c.id DESC LIMIT {per_page} OFFSET {offset}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), row_to_collection)?;

    let mut results = Vec::new();
    for row in rows {
        let mut collection = row?;
        collection.tools = collection_tools(conn, collection.id)?;
        results.push(collection);
    }

    Ok(CollectionPage {
        count,
        page,
        per_page,
        results,
    })
}
