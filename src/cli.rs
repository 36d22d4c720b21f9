//! Command handler functions for the covmanager CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::browse::{BrowseView, Facade, NodeView, ViewRequest};
use crate::jobs::JobInputs;
use crate::model::{CollectionFilter, NewCollection};
use crate::store::{CoverageStore, SqliteStore};
use crate::tree::Delta;

pub fn cmd_ingest(
    store: &SqliteStore,
    file: &Path,
    format: Option<&str>,
    meta: NewCollection,
    json: bool,
) -> Result<String> {
    let (id, detected_format) = crate::ingest::ingest(store, file, format, meta)
        .with_context(|| format!("Failed to ingest {}", file.display()))?;
    if json {
        let collection = store.collection(id)?;
        return Ok(serde_json::to_string_pretty(&collection)? + "\n");
    }
    Ok(format!(
        "Ingested {} as format '{}' → collection id {}\n",
        file.display(),
        detected_format,
        id,
    ))
}

pub fn cmd_collections(
    facade: &Facade<'_>,
    filter: &CollectionFilter,
    page: u32,
    per_page: u32,
    json: bool,
) -> Result<String> {
    let listing = facade.collections(filter, page, per_page)?;
    if json {
        return Ok(serde_json::to_string_pretty(&listing)? + "\n");
    }
    if listing.results.is_empty() {
        return Ok("No collections in database.\n".to_string());
    }

    let mut out = String::new();
    writeln!(
        out,
        "{:>6}  {:<30} {:<12} {:<16} {:<20} CREATED",
        "ID", "REPOSITORY", "REVISION", "BRANCH", "TOOLS"
    )
    .unwrap();
    writeln!(out, "{}", "-".repeat(110)).unwrap();
    for c in &listing.results {
        let tools: Vec<&str> = c.tools.iter().map(String::as_str).collect();
        writeln!(
            out,
            "{:>6}  {:<30} {:<12} {:<16} {:<20} {}",
            c.id,
            c.repository,
            short_revision(&c.revision),
            c.branch,
            tools.join(","),
            c.created
        )
        .unwrap();
    }
    writeln!(
        out,
        "Page {} ({} of {} collections)",
        listing.page,
        listing.results.len(),
        listing.count
    )
    .unwrap();
    Ok(out)
}

/// Browse a single collection. Implemented as a one-element aggregate, which
/// yields the collection's own tree.
pub fn cmd_browse(
    facade: &Facade<'_>,
    id: i64,
    path: &str,
    timeout: Duration,
    json: bool,
) -> Result<String> {
    let request = ViewRequest::new(JobInputs::aggregate([id]), path);
    let view = facade.wait(&request, timeout)?;
    render(&view, json)
}

pub fn cmd_diff(
    facade: &Facade<'_>,
    baseline: Option<i64>,
    target: i64,
    path: &str,
    timeout: Duration,
    json: bool,
) -> Result<String> {
    let request = ViewRequest::new(JobInputs::diff(baseline, target), path);
    let view = facade.wait(&request, timeout)?;
    render(&view, json)
}

pub fn cmd_aggregate(
    facade: &Facade<'_>,
    ids: &[i64],
    path: &str,
    timeout: Duration,
    json: bool,
) -> Result<String> {
    let request = ViewRequest::new(JobInputs::aggregate(ids.iter().copied()), path);
    let view = facade.wait(&request, timeout)?;
    render(&view, json)
}

/// Aggregate `ids` and store the merged coverage as a new collection.
///
/// Metadata comes from the newest input collection; tools are the union of
/// all inputs, and the merge diagnostics are appended to the description.
pub fn cmd_save_aggregate(
    store: &SqliteStore,
    facade: &Facade<'_>,
    ids: &[i64],
    description: Option<&str>,
    timeout: Duration,
    json: bool,
) -> Result<String> {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let newest = *sorted
        .last()
        .context("aggregate needs at least one collection")?;

    let output = facade.wait_output(&JobInputs::Aggregate(sorted.clone()), timeout)?;

    let mut tools = BTreeSet::new();
    for &id in &sorted {
        tools.extend(store.collection(id)?.tools);
    }
    let base = store.collection(newest)?;
    let stats = output.merge_stats.unwrap_or_default();
    let listed: Vec<String> = sorted.iter().map(i64::to_string).collect();
    let description = match description {
        Some(d) => format!("{d} ({})", stats.summary()),
        None => format!("Aggregate of {} ({})", listed.join(", "), stats.summary()),
    };

    let meta = NewCollection {
        repository: base.repository,
        revision: base.revision,
        branch: base.branch,
        client: base.client,
        tools,
        description,
    };
    let id = store.insert(&meta, &output.tree.to_coverage_data())?;
    if json {
        let collection = store.collection(id)?;
        return Ok(serde_json::to_string_pretty(&collection)? + "\n");
    }
    Ok(format!(
        "Stored aggregate of {} collections → collection id {} ({})\n",
        sorted.len(),
        id,
        stats.summary()
    ))
}

fn render(view: &BrowseView, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(view)? + "\n")
    } else {
        Ok(format_view(view))
    }
}

fn short_revision(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}

fn format_delta(delta: &Delta) -> String {
    format!(
        "{:+} lines, {:+} covered, {:+} missed, {:+.2}%",
        delta.delta_lines_total,
        delta.delta_lines_covered,
        delta.delta_lines_missed,
        delta.delta_coverage_percent
    )
}

fn display_name(node: &NodeView) -> String {
    let name = node.name.as_deref().unwrap_or("/");
    if node.is_container && node.name.is_some() {
        format!("{name}/")
    } else {
        name.to_string()
    }
}

pub fn format_view(view: &BrowseView) -> String {
    let mut out = String::new();
    let path = if view.path.is_empty() { "/" } else { &view.path };
    writeln!(out, "Path:       {}", path).unwrap();
    writeln!(
        out,
        "Lines:      {}/{} ({:.2}%)",
        view.node.totals.lines_covered, view.node.totals.lines_total, view.node.coverage_percent
    )
    .unwrap();
    if let Some(delta) = &view.node.delta {
        writeln!(out, "Change:     {}", format_delta(delta)).unwrap();
    }
    if let Some(stats) = &view.merge_stats {
        writeln!(out, "Merge:      {}", stats.summary()).unwrap();
    }

    if let Some(lines) = &view.lines {
        writeln!(out).unwrap();
        writeln!(out, "{:>6}  {:>10}", "LINE", "HITS").unwrap();
        writeln!(out, "{}", "-".repeat(18)).unwrap();
        for (idx, hits) in lines.iter().enumerate() {
            if let Some(hits) = hits {
                let marker = if *hits > 0 { "✓" } else { "✗" };
                writeln!(out, "{:>6}  {:>10}  {}", idx + 1, hits, marker).unwrap();
            }
        }
        return out;
    }

    if view.children.is_empty() {
        return out;
    }
    writeln!(out).unwrap();
    let with_delta = view.children.iter().any(|c| c.delta.is_some());
    write!(
        out,
        "{:<50} {:>8} {:>8} {:>8} {:>8}",
        "NAME", "LINES", "COVERED", "MISSED", "RATE"
    )
    .unwrap();
    if with_delta {
        write!(out, "  CHANGE").unwrap();
    }
    writeln!(out).unwrap();
    writeln!(out, "{}", "-".repeat(if with_delta { 130 } else { 86 })).unwrap();
    for child in &view.children {
        write!(
            out,
            "{:<50} {:>8} {:>8} {:>8} {:>7.2}%",
            display_name(child),
            child.totals.lines_total,
            child.totals.lines_covered,
            child.totals.lines_missed,
            child.coverage_percent
        )
        .unwrap();
        if let Some(delta) = &child.delta {
            write!(out, "  {}", format_delta(delta)).unwrap();
        }
        writeln!(out).unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::jobs::{JobRunner, RunnerConfig};
    use crate::model::{CoverageData, FileCoverage};
    use rusqlite::Connection;
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(10);

    fn test_store() -> Arc<SqliteStore> {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        Arc::new(SqliteStore::from_connection(conn, 8))
    }

    fn runner(store: &Arc<SqliteStore>) -> JobRunner {
        let shared: Arc<dyn CoverageStore> = store.clone();
        JobRunner::new(
            shared,
            RunnerConfig {
                workers: 2,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn seed(store: &SqliteStore, revision: &str, tool: &str, files: &[(&str, Vec<Option<u64>>)]) -> i64 {
        let data = CoverageData {
            files: files
                .iter()
                .map(|(path, coverage)| FileCoverage {
                    path: path.to_string(),
                    coverage: coverage.clone(),
                })
                .collect(),
        };
        let meta = NewCollection {
            repository: "mozilla-central".to_string(),
            revision: revision.to_string(),
            branch: "main".to_string(),
            tools: [tool.to_string()].into_iter().collect(),
            ..Default::default()
        };
        store.insert(&meta, &data).unwrap()
    }

    #[test]
    fn test_cmd_ingest_lcov() {
        let store = test_store();
        let dir = tempfile::tempdir().unwrap();
        let lcov_path = dir.path().join("test.lcov");
        std::fs::write(&lcov_path, "SF:src/foo.rs\nDA:1,5\nDA:2,0\nend_of_record\n").unwrap();

        let meta = NewCollection {
            repository: "repo".to_string(),
            revision: "abc".to_string(),
            ..Default::default()
        };
        let out = cmd_ingest(&store, &lcov_path, None, meta, false).unwrap();

        assert!(out.contains("Ingested"));
        assert!(out.contains("lcov"));
        assert!(out.contains("collection id 1"));
        assert_eq!(store.load_tree(1).unwrap().root().totals.lines_total, 2);
    }

    #[test]
    fn test_cmd_collections() {
        let store = test_store();
        let runner = runner(&store);
        let facade = Facade::new(&runner);

        let out = cmd_collections(&facade, &CollectionFilter::default(), 1, 10, false).unwrap();
        assert!(out.contains("No collections in database."));

        seed(&store, "r1", "unit", &[("a.c", vec![Some(1)])]);
        seed(&store, "r2", "fuzz", &[("a.c", vec![Some(0)])]);

        let out = cmd_collections(&facade, &CollectionFilter::default(), 1, 10, false).unwrap();
        assert!(out.contains("REPOSITORY"));
        assert!(out.contains("mozilla-central"));
        assert!(out.contains("2 of 2 collections"));
        // Newest first.
        assert!(out.find("r2").unwrap() < out.find("r1").unwrap());

        let filter = CollectionFilter {
            tool: Some("fuzz".to_string()),
            ..Default::default()
        };
        let out = cmd_collections(&facade, &filter, 1, 10, true).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["results"][0]["revision"], "r2");
    }

    #[test]
    fn test_cmd_browse_directory_and_file() {
        let store = test_store();
        let runner = runner(&store);
        let facade = Facade::new(&runner);
        let id = seed(
            &store,
            "r1",
            "unit",
            &[("src/a.c", vec![Some(3), None, Some(0)]), ("src/b.c", vec![Some(1)])],
        );

        let out = cmd_browse(&facade, id, "", WAIT, false).unwrap();
        assert!(out.contains("Path:       /"));
        assert!(out.contains("Lines:      2/3 (66.67%)"));
        assert!(out.contains("src/"));
        assert!(!out.contains("Change:"));

        let out = cmd_browse(&facade, id, "src/a.c", WAIT, false).unwrap();
        assert!(out.contains("LINE"));
        assert!(out.contains("✓"));
        assert!(out.contains("✗"));
    }

    #[test]
    fn test_cmd_diff_reports_change() {
        let store = test_store();
        let runner = runner(&store);
        let facade = Facade::new(&runner);
        let base = seed(&store, "r1", "unit", &[("main.c", vec![Some(1), Some(0)])]);
        let target = seed(&store, "r2", "unit", &[("main.c", vec![Some(1), Some(1)])]);

        let out = cmd_diff(&facade, Some(base), target, "", WAIT, false).unwrap();
        assert!(out.contains("Change:     +0 lines, +1 covered, -1 missed, +50.00%"));
        assert!(out.contains("CHANGE"));

        let out = cmd_diff(&facade, Some(base), target, "main.c", WAIT, true).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["node"]["deltaLinesCovered"], 1);
        assert_eq!(json["lines"][1], 1);
    }

    #[test]
    fn test_cmd_save_aggregate() {
        let store = test_store();
        let runner = runner(&store);
        let facade = Facade::new(&runner);
        let a = seed(&store, "r1", "unit", &[("main.c", vec![Some(1), Some(0)])]);
        let b = seed(&store, "r2", "fuzz", &[("main.c", vec![Some(0), Some(2)])]);

        let out =
            cmd_save_aggregate(&store, &facade, &[b, a], Some("nightly"), WAIT, false).unwrap();
        assert!(out.contains("collection id 3"));

        let saved = store.collection(3).unwrap();
        assert_eq!(saved.revision, "r2");
        assert_eq!(saved.description, "nightly (NC 0, LM 0, CM 0)");
        assert_eq!(saved.tools.len(), 2);
        let tree = store.load_tree(3).unwrap();
        assert_eq!(tree.root().totals.lines_covered, 2);
    }

    #[test]
    fn test_cmd_save_aggregate_json() {
        let store = test_store();
        let runner = runner(&store);
        let facade = Facade::new(&runner);
        let a = seed(&store, "r1", "unit", &[("main.c", vec![Some(1)])]);
        let b = seed(&store, "r2", "unit", &[("main.c", vec![Some(0)])]);

        let out = cmd_save_aggregate(&store, &facade, &[a, b], None, WAIT, true).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["revision"], "r2");
        assert!(json["description"]
            .as_str()
            .unwrap()
            .starts_with("Aggregate of 1, 2"));
    }

    #[test]
    fn test_cmd_aggregate_unknown_collection_fails() {
        let store = test_store();
        let runner = runner(&store);
        let facade = Facade::new(&runner);
        let err = cmd_aggregate(&facade, &[42], "", WAIT, false).unwrap_err();
        assert!(err.to_string().contains("42"));
    }
}
