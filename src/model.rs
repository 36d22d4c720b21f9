//! Uniform in-memory representation of coverage artifacts and collection
//! metadata, independent of any specific input format. Parsers produce a
//! `CoverageData` which is stored as a collection and later built into a
//! [`CoverageTree`](crate::tree::CoverageTree).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Compute a coverage percentage rounded to two decimals, returning 0.0 when
/// the total is zero.
#[must_use]
pub fn percent(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(covered as f64 / total as f64 * 100.0)
    }
}

#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Coverage data for a single source file.
///
/// `coverage[i]` describes line `i + 1`: `None` for lines that are not
/// instrumentable, `Some(hits)` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    #[serde(rename = "name")]
    pub path: String,
    pub coverage: Vec<Option<u64>>,
}

impl FileCoverage {
    pub fn new(path: String) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    /// Record `hits` for a 1-based line number, growing the vector as needed.
    /// Callers bound `line_number` by [`MAX_LINE`].
    pub fn set_line(&mut self, line_number: u32, hits: u64) {
        let idx = line_number.saturating_sub(1) as usize;
        if self.coverage.len() <= idx {
            self.coverage.resize(idx + 1, None);
        }
        self.coverage[idx] = Some(hits);
    }
}

/// Highest line number accepted from line-addressed input such as LCOV.
pub const MAX_LINE: u32 = 1_000_000;

/// A complete coverage artifact: one entry per source file.
///
/// Serializes in the coveralls layout (`{"source_files": [...]}`), which is
/// also the canonical form kept in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageData {
    #[serde(rename = "source_files")]
    pub files: Vec<FileCoverage>,
}

impl CoverageData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical JSON bytes: files sorted by path.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        let mut sorted = self.clone();
        sorted.files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(serde_json::to_vec(&sorted)?)
    }

    /// Hex SHA-256 over the canonical JSON form.
    pub fn content_hash(&self) -> Result<String> {
        Ok(content_hash(&self.to_canonical_json()?))
    }
}

#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Metadata supplied when storing a new collection.
#[derive(Debug, Clone, Default)]
pub struct NewCollection {
    pub repository: String,
    pub revision: String,
    pub branch: String,
    pub client: String,
    pub tools: BTreeSet<String>,
    pub description: String,
}

/// Metadata for a stored collection. Collections never change once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub id: i64,
    pub repository: String,
    pub revision: String,
    pub branch: String,
    pub client: String,
    pub tools: BTreeSet<String>,
    pub description: String,
    pub created: String,
    #[serde(rename = "contentHash")]
    pub content_hash: String,
}

/// Filter for the paged collection listing. Empty fields match anything.
#[derive(Debug, Clone, Default)]
pub struct CollectionFilter {
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub tool: Option<String>,
}

/// One page of collection metadata, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionPage {
    pub count: u64,
    pub page: u32,
    #[serde(rename = "perPage")]
    pub per_page: u32,
    pub results: Vec<Collection>,
}
