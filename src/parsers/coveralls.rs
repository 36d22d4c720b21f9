/// Parser for coveralls-style JSON, the layout coverage clients submit and
/// the canonical form kept in the store.
///
/// ```json
/// {
///   "git": {"head": {"id": "abc123"}, "branch": "main"},
///   "source_files": [
///     {"name": "src/main.c", "coverage": [null, 3, 0, null]}
///   ]
/// }
/// ```
///
/// `coverage[i]` is the hit count of line `i + 1`; `null` marks a line that
/// is not instrumentable. Negative counts are rejected.
use std::path::Path;

use serde::Deserialize;

use super::CoverageParser;
use crate::detect::Format;
use crate::error::{CovError, Result};
use crate::model::{CoverageData, FileCoverage};

pub struct CoverallsParser;

impl CoverageParser for CoverallsParser {
    fn format(&self) -> Format {
        Format::Coveralls
    }

    fn can_parse(&self, path: &Path, content: &[u8]) -> bool {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if ext.eq_ignore_ascii_case("json") {
                return true;
            }
        }
        let head_len = content.len().min(4096);
        let head = String::from_utf8_lossy(&content[..head_len]);
        head.trim_start().starts_with('{') && head.contains("\"source_files\"")
    }

    fn parse(&self, input: &[u8]) -> Result<CoverageData> {
        parse(input)
    }
}

#[derive(Deserialize)]
struct RawArtifact {
    source_files: Vec<RawFile>,
    #[serde(default)]
    git: Option<RawGit>,
}

#[derive(Deserialize)]
struct RawFile {
    name: String,
    coverage: Vec<Option<i64>>,
}

#[derive(Deserialize)]
struct RawGit {
    #[serde(default)]
    head: Option<RawHead>,
    #[serde(default)]
    branch: Option<String>,
}

#[derive(Deserialize)]
struct RawHead {
    id: String,
}

/// Revision and branch recorded by the coverage client, when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitInfo {
    pub revision: Option<String>,
    pub branch: Option<String>,
}

pub fn parse(input: &[u8]) -> Result<CoverageData> {
    let raw: RawArtifact = serde_json::from_slice(input)
        .map_err(|e| CovError::MalformedArtifact(format!("invalid coverage JSON: {e}")))?;

    let mut data = CoverageData::new();
    for file in raw.source_files {
        if file.name.trim_matches('/').is_empty() {
            return Err(CovError::MalformedArtifact(
                "source file with empty name".to_string(),
            ));
        }
        let mut coverage = Vec::with_capacity(file.coverage.len());
        for (idx, hits) in file.coverage.into_iter().enumerate() {
            match hits {
                Some(n) if n < 0 => {
                    return Err(CovError::MalformedArtifact(format!(
                        "negative hit count {n} for {} line {}",
                        file.name,
                        idx + 1
                    )))
                }
                Some(n) => coverage.push(Some(n as u64)),
                None => coverage.push(None),
            }
        }
        data.files.push(FileCoverage {
            path: file.name,
            coverage,
        });
    }
    Ok(data)
}

/// Extract the `git` block without validating coverage.
pub fn git_info(input: &[u8]) -> Result<GitInfo> {
    let raw: RawArtifact = serde_json::from_slice(input)
        .map_err(|e| CovError::MalformedArtifact(format!("invalid coverage JSON: {e}")))?;
    let git = raw.git.unwrap_or(RawGit {
        head: None,
        branch: None,
    });
    Ok(GitInfo {
        revision: git.head.map(|h| h.id),
        branch: git.branch,
    })
}
