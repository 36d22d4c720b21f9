use std::path::Path;

use tracing::info;

use crate::detect::{detect_format, Format};
use crate::error::{CovError, Result};
use crate::model::{CoverageData, NewCollection};
use crate::parsers::{coveralls, parser_for};
use crate::store::SqliteStore;

/// Read a coverage file, auto-detect its format (or use the override), and
/// parse it into the artifact model.
pub fn read_artifact(
    file_path: &Path,
    format_override: Option<&str>,
) -> Result<(Format, CoverageData, Vec<u8>)> {
    let content = std::fs::read(file_path)?;

    let format = if let Some(fmt_str) = format_override {
        fmt_str.parse::<Format>()?
    } else {
        detect_format(file_path, &content).ok_or(CovError::UnknownFormat)?
    };

    let data = parser_for(format).parse(&content)?;
    Ok((format, data, content))
}

/// Parse a coverage file and store it as a new collection.
///
/// For coveralls input, a missing revision or branch is taken from the
/// file's `git` block. Returns (collection_id, detected_format).
pub fn ingest(
    store: &SqliteStore,
    file_path: &Path,
    format_override: Option<&str>,
    mut meta: NewCollection,
) -> Result<(i64, Format)> {
    let (format, data, content) = read_artifact(file_path, format_override)?;

    if format == Format::Coveralls {
        let git = coveralls::git_info(&content)?;
        if meta.revision.is_empty() {
            meta.revision = git.revision.unwrap_or_default();
        }
        if meta.branch.is_empty() {
            meta.branch = git.branch.unwrap_or_default();
        }
    }

    let id = store.insert(&meta, &data)?;
    info!(
        collection = id,
        format = %format,
        files = data.files.len(),
        repository = %meta.repository,
        revision = %meta.revision,
        "ingested collection"
    );
    Ok((id, format))
}
