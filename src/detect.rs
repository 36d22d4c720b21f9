/// Auto-detection of coverage file formats.
///
/// Strategy:
///   1. Check file extension for strong hints
///   2. Peek at the first bytes of the file content
///   3. Fall back to CLI --format override (handled by caller)
use std::path::Path;

use crate::error::CovError;
use crate::parsers;

/// Supported coverage formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Coveralls,
    Lcov,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Coveralls => "coveralls",
            Format::Lcov => "lcov",
        }
    }
}

impl std::str::FromStr for Format {
    type Err = CovError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coveralls" | "json" => Ok(Format::Coveralls),
            "lcov" | "info" => Ok(Format::Lcov),
            _ => Err(CovError::Parse(format!(
                "Unknown format: '{}'. Supported: coveralls, lcov",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the coverage format from filename and file content.
pub fn detect_format(path: &Path, content: &[u8]) -> Option<Format> {
    if let Some(fmt) = detect_by_extension(path) {
        return Some(fmt);
    }

    // LCOV first: its sniffing looks at line prefixes, which is stricter
    // than the JSON check.
    [Format::Lcov, Format::Coveralls]
        .into_iter()
        .find(|&fmt| parsers::parser_for(fmt).can_parse(path, content))
}

fn detect_by_extension(path: &Path) -> Option<Format> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "info" | "lcov" => Some(Format::Lcov),
        "json" => Some(Format::Coveralls),
        _ => None,
    }
}
