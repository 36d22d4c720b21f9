/// Parser for the LCOV `.info` format.
///
/// Reference: https://ltp.sourceforge.net/coverage/lcov/geninfo.1.php
///
/// Only line records matter for tree building:
///   SF:<path to source file>
///   DA:<line number>,<execution count>[,<checksum>]
///   end_of_record
///
/// Function and branch records are skipped. A source file that appears in
/// several records (one per test name) has its hit counts summed.
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use super::CoverageParser;
use crate::detect::Format;
use crate::error::{CovError, Result};
use crate::model::{CoverageData, FileCoverage, MAX_LINE};

/// LCOV format parser.
pub struct LcovParser;

impl CoverageParser for LcovParser {
    fn format(&self) -> Format {
        Format::Lcov
    }

    fn can_parse(&self, path: &Path, content: &[u8]) -> bool {
        // Extension-based: .info or .lcov
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let ext = ext.to_lowercase();
            if ext == "info" || ext == "lcov" {
                return true;
            }
        }

        // Content-based: lines starting with SF: and DA:
        let head_len = content.len().min(4096);
        let head = String::from_utf8_lossy(&content[..head_len]);
        let has_sf = head.lines().any(|l| l.starts_with("SF:"));
        let has_da = head.lines().any(|l| l.starts_with("DA:"));
        has_sf && has_da
    }

    fn parse(&self, input: &[u8]) -> Result<CoverageData> {
        parse(input)
    }
}

/// Parse LCOV format coverage data from raw bytes.
pub fn parse(input: &[u8]) -> Result<CoverageData> {
    let mut data = CoverageData::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    parse_streaming_reader(&mut &*input, &mut |file| {
        match index.get(&file.path) {
            Some(&idx) => merge_record(&mut data.files[idx], &file),
            None => {
                index.insert(file.path.clone(), data.files.len());
                data.files.push(file);
            }
        }
        Ok(())
    })?;
    Ok(data)
}

fn merge_record(into: &mut FileCoverage, from: &FileCoverage) {
    if into.coverage.len() < from.coverage.len() {
        into.coverage.resize(from.coverage.len(), None);
    }
    for (slot, hits) in into.coverage.iter_mut().zip(&from.coverage) {
        *slot = match (*slot, *hits) {
            (Some(a), Some(b)) => Some(a.saturating_add(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Streaming LCOV parser — calls `emit` once per `end_of_record`.
fn parse_streaming_reader(
    reader: &mut dyn BufRead,
    emit: &mut dyn FnMut(FileCoverage) -> Result<()>,
) -> Result<()> {
    let mut current_file: Option<FileCoverage> = None;

    let mut raw_line = String::new();
    loop {
        raw_line.clear();
        let n = reader
            .read_line(&mut raw_line)
            .map_err(|e| CovError::Parse(format!("Invalid LCOV data: {e}")))?;
        if n == 0 {
            break; // EOF
        }

        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "end_of_record" {
            if let Some(file) = current_file.take() {
                emit(file)?;
            }
            continue;
        }

        let (tag, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };

        match tag {
            "SF" => {
                if value.trim_matches('/').is_empty() {
                    return Err(CovError::MalformedArtifact(
                        "SF record with empty path".to_string(),
                    ));
                }
                current_file = Some(FileCoverage::new(value.to_string()));
            }
            "DA" => {
                if let Some(file) = current_file.as_mut() {
                    let parts: Vec<&str> = value.splitn(3, ',').collect();
                    if parts.len() < 2 {
                        continue;
                    }
                    let line_number = parts[0].parse::<u32>().map_err(|_| {
                        CovError::Parse(format!("bad line number in DA:{value}"))
                    })?;
                    if line_number == 0 {
                        return Err(CovError::MalformedArtifact(format!(
                            "line number 0 in {}",
                            file.path
                        )));
                    }
                    if line_number > MAX_LINE {
                        return Err(CovError::MalformedArtifact(format!(
                            "line number {line_number} in {} exceeds {MAX_LINE}",
                            file.path
                        )));
                    }
                    let count = parts[1].parse::<i64>().map_err(|_| {
                        CovError::Parse(format!("bad execution count in DA:{value}"))
                    })?;
                    if count < 0 {
                        return Err(CovError::MalformedArtifact(format!(
                            "negative hit count {count} for {} line {line_number}",
                            file.path
                        )));
                    }
                    file.set_line(line_number, count as u64);
                }
            }
            // TN, FN, FNDA, BRDA and the summary records carry nothing the
            // tree needs.
            _ => {}
        }
    }

    // Handle case where file ends without end_of_record
    if let Some(file) = current_file.take() {
        emit(file)?;
    }

    Ok(())
}
