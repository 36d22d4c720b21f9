//! Line-level union of several coverage trees.
//!
//! Matching files are merged line by line: a line is instrumentable if it is
//! instrumentable on any side, and its hit count is the sum of the sides'.
//! A line is therefore covered in the aggregate iff it is covered in at
//! least one input, and a line hit by several inputs is still counted once.
//! The merge is commutative and associative, so input order never matters.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::error::{CovError, Result};
use crate::tree::{CoverageTree, NodeId, NodeKind, ROOT};

/// Irregularities seen while merging. These come from instrumenters that
/// disagree about a file (for example after a header changed between
/// builds); they never affect the merged tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    /// One side reported no instrumentable lines while the other did.
    pub null_coverable_count: u64,
    /// The two line vectors had different lengths.
    pub length_mismatch_count: u64,
    /// A line was instrumentable on one side only.
    pub coverable_mismatch_count: u64,
}

impl MergeStats {
    fn add(&mut self, other: &MergeStats) {
        self.null_coverable_count += other.null_coverable_count;
        self.length_mismatch_count += other.length_mismatch_count;
        self.coverable_mismatch_count += other.coverable_mismatch_count;
    }

    /// Short form used in stored aggregate descriptions.
    pub fn summary(&self) -> String {
        format!(
            "NC {}, LM {}, CM {}",
            self.null_coverable_count, self.length_mismatch_count, self.coverable_mismatch_count
        )
    }
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub tree: CoverageTree,
    pub stats: MergeStats,
}

/// Merge all `trees` into one cumulative tree.
pub fn aggregate(trees: &[Arc<CoverageTree>]) -> Result<Aggregate> {
    let Some((first, rest)) = trees.split_first() else {
        return Err(CovError::EmptyAggregateInput);
    };

    let mut acc = CoverageTree::clone(first);
    for id in 0..acc.len() {
        acc.node_mut(id).delta = None;
    }

    let mut stats = MergeStats::default();
    for tree in rest {
        stats.add(&merge_into(&mut acc, tree)?);
    }
    acc.recompute_totals();
    debug_assert!(acc.check_invariants());

    Ok(Aggregate { tree: acc, stats })
}

/// Pairwise union of `a` and `b`.
pub fn merge(a: &CoverageTree, b: &CoverageTree) -> Result<Aggregate> {
    aggregate(&[Arc::new(a.clone()), Arc::new(b.clone())])
}

/// Union `src` into `acc`. Totals of `acc` are stale afterwards.
fn merge_into(acc: &mut CoverageTree, src: &CoverageTree) -> Result<MergeStats> {
    let mut stats = MergeStats::default();
    merge_node(acc, ROOT, src, ROOT, &mut stats)?;
    Ok(stats)
}

fn merge_node(
    acc: &mut CoverageTree,
    at: NodeId,
    src: &CoverageTree,
    from: NodeId,
    stats: &mut MergeStats,
) -> Result<()> {
    for (name, src_child) in src.children(from) {
        let src_is_dir = src.node(src_child).is_container();
        match acc.child(at, name) {
            Some(existing) => {
                let acc_is_dir = acc.node(existing).is_container();
                if acc_is_dir != src_is_dir {
                    return Err(CovError::SchemaConflict {
                        path: src.path_of(src_child),
                    });
                }
                if src_is_dir {
                    merge_node(acc, existing, src, src_child, stats)?;
                } else {
                    let from_lines = src.node(src_child).lines().unwrap_or_default();
                    if let Some(into) = acc.lines_mut(existing) {
                        union_lines(into, from_lines, &src.path_of(src_child), stats);
                    }
                }
            }
            None => copy_subtree(acc, at, name, src, src_child),
        }
    }
    Ok(())
}

fn copy_subtree(acc: &mut CoverageTree, at: NodeId, name: &str, src: &CoverageTree, from: NodeId) {
    match &src.node(from).kind {
        NodeKind::File(lines) => {
            acc.push_child(at, name, NodeKind::File(lines.clone()));
        }
        NodeKind::Directory(children) => {
            let dir = acc.push_child(at, name, NodeKind::Directory(BTreeMap::new()));
            for (child_name, &child) in children {
                copy_subtree(acc, dir, child_name, src, child);
            }
        }
    }
}

/// Union two per-line vectors in place.
fn union_lines(
    into: &mut Vec<Option<u64>>,
    from: &[Option<u64>],
    path: &str,
    stats: &mut MergeStats,
) {
    let into_null = into.iter().all(Option::is_none);
    let from_null = from.iter().all(Option::is_none);
    if into_null != from_null {
        warn!(path, "file reports no coverable lines on one side");
        stats.null_coverable_count += 1;
    }
    if into.len() != from.len() {
        warn!(path, left = into.len(), right = from.len(), "line count mismatch");
        stats.length_mismatch_count += 1;
    }
    if !into_null && !from_null {
        let mismatches = into
            .iter()
            .zip(from)
            .filter(|(a, b)| a.is_some() != b.is_some())
            .count() as u64;
        if mismatches > 0 {
            warn!(path, mismatches, "coverable/non-coverable mismatch");
            stats.coverable_mismatch_count += mismatches;
        }
    }

    if into.len() < from.len() {
        into.resize(from.len(), None);
    }
    for (slot, hits) in into.iter_mut().zip(from) {
        *slot = match (*slot, *hits) {
            (Some(a), Some(b)) => Some(a.saturating_add(b)),
            (a, b) => a.or(b),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::tree::Totals;

    fn tree(raw: &str) -> Arc<CoverageTree> {
        Arc::new(build(raw.as_bytes()).unwrap())
    }

    #[test]
    fn test_aggregate_empty_input() {
        assert!(matches!(aggregate(&[]), Err(CovError::EmptyAggregateInput)));
    }

    #[test]
    fn test_aggregate_single_is_identity() {
        let a = tree(r#"{"source_files":[{"name":"x/y.c","coverage":[1,0,null]}]}"#);
        let out = aggregate(&[a.clone()]).unwrap();
        assert_eq!(out.tree, *a);
        assert_eq!(out.stats, MergeStats::default());
    }

    #[test]
    fn test_aggregate_counts_shared_lines_once() {
        let a = tree(r#"{"source_files":[{"name":"f.c","coverage":[1,0,0,null]}]}"#);
        let b = tree(r#"{"source_files":[{"name":"f.c","coverage":[4,1,0,null]},{"name":"g.c","coverage":[0]}]}"#);
        let out = aggregate(&[a, b]).unwrap();
        let f = out.tree.resolve("f.c").unwrap();
        assert_eq!(
            out.tree.node(f).lines().unwrap(),
            &[Some(5), Some(1), Some(0), None]
        );
        assert_eq!(
            out.tree.root().totals,
            Totals {
                lines_total: 4,
                lines_covered: 2,
                lines_missed: 2
            }
        );
        assert!(out.tree.check_invariants());
    }

    #[test]
    fn test_aggregate_records_mismatches() {
        let a = tree(r#"{"source_files":[{"name":"h.h","coverage":[1,null]},{"name":"n.c","coverage":[null]}]}"#);
        let b = tree(r#"{"source_files":[{"name":"h.h","coverage":[0,0,1]},{"name":"n.c","coverage":[2]}]}"#);
        let out = aggregate(&[a, b]).unwrap();
        assert_eq!(out.stats.length_mismatch_count, 1);
        assert_eq!(out.stats.coverable_mismatch_count, 1);
        assert_eq!(out.stats.null_coverable_count, 1);
        let h = out.tree.resolve("h.h").unwrap();
        assert_eq!(out.tree.node(h).lines().unwrap(), &[Some(1), Some(0), Some(1)]);
        assert_eq!(out.stats.summary(), "NC 1, LM 1, CM 1");
    }

    #[test]
    fn test_aggregate_schema_conflict() {
        let a = tree(r#"{"source_files":[{"name":"p","coverage":[1]}]}"#);
        let b = tree(r#"{"source_files":[{"name":"p/q.c","coverage":[1]}]}"#);
        assert!(matches!(
            aggregate(&[a, b]),
            Err(CovError::SchemaConflict { .. })
        ));
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = tree(r#"{"source_files":[{"name":"d/a.c","coverage":[1,0]},{"name":"z.c","coverage":[0]}]}"#);
        let b = tree(r#"{"source_files":[{"name":"d/a.c","coverage":[0,0,3]},{"name":"d/b.c","coverage":[2]}]}"#);
        assert_eq!(merge(&a, &b).unwrap().tree, merge(&b, &a).unwrap().tree);
    }
}
