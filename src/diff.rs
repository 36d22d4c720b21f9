/// Compare two coverage trees node by node.
///
/// The output tree has the shape of the union of both inputs. Absolute
/// metrics always come from the target side; every node carries a [`Delta`]
/// of target minus baseline. A node that exists only in the baseline is kept
/// with zeroed metrics so removed files stay visible and explain why totals
/// shrank.
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CovError, Result};
use crate::model::round2;
use crate::tree::{CoverageTree, Delta, NodeId, NodeKind, Totals, ROOT};

/// Diff `target` against `baseline`. With no baseline every node is a pure
/// addition (the initial-collection case).
pub fn diff(baseline: Option<&CoverageTree>, target: &CoverageTree) -> Result<CoverageTree> {
    let mut out = CoverageTree::new();
    let mut walker = Walker {
        baseline,
        target,
        out: &mut out,
    };
    walker.walk(ROOT, baseline.map(|_| ROOT), Some(ROOT))?;
    debug_assert!(out.check_invariants());
    Ok(out)
}

/// Delta between two totals. Percentages are taken from each side on its own
/// rather than derived from the line deltas.
#[must_use]
pub fn delta(baseline: &Totals, target: &Totals) -> Delta {
    Delta {
        delta_lines_total: target.lines_total as i64 - baseline.lines_total as i64,
        delta_lines_covered: target.lines_covered as i64 - baseline.lines_covered as i64,
        delta_lines_missed: target.lines_missed as i64 - baseline.lines_missed as i64,
        delta_coverage_percent: round2(
            target.coverage_percent() - baseline.coverage_percent(),
        ),
    }
}

struct Walker<'a> {
    baseline: Option<&'a CoverageTree>,
    target: &'a CoverageTree,
    out: &'a mut CoverageTree,
}

impl Walker<'_> {
    /// Fill in output node `at` from the matching baseline and target nodes
    /// (at least one is present), then recurse into the union of children.
    fn walk(&mut self, at: NodeId, base: Option<NodeId>, tgt: Option<NodeId>) -> Result<()> {
        let base_totals = match (self.baseline, base) {
            (Some(tree), Some(id)) => tree.node(id).totals,
            _ => Totals::default(),
        };
        let tgt_totals = tgt
            .map(|id| self.target.node(id).totals)
            .unwrap_or_default();

        let node = self.out.node_mut(at);
        node.totals = tgt_totals;
        node.delta = Some(delta(&base_totals, &tgt_totals));

        let names: BTreeSet<String> = self
            .child_names(base, tgt)
            .into_iter()
            .collect();

        for name in names {
            let b = base.and_then(|id| self.baseline.and_then(|tree| tree.child(id, &name)));
            let t = tgt.and_then(|id| self.target.child(id, &name));

            let b_dir = b.zip(self.baseline).map(|(id, tree)| tree.node(id).is_container());
            let t_dir = t.map(|id| self.target.node(id).is_container());
            let is_dir = match (b_dir, t_dir) {
                (Some(x), Some(y)) if x != y => {
                    let parent = self.out.path_of(at);
                    let path = if parent.is_empty() {
                        name
                    } else {
                        format!("{parent}/{name}")
                    };
                    return Err(CovError::SchemaConflict { path });
                }
                (_, Some(y)) => y,
                (Some(x), None) => x,
                (None, None) => continue,
            };

            let kind = if is_dir {
                NodeKind::Directory(BTreeMap::new())
            } else {
                // Removed files keep no line data; present ones take the
                // target's lines.
                let lines = t
                    .and_then(|id| self.target.node(id).lines())
                    .map(<[Option<u64>]>::to_vec)
                    .unwrap_or_default();
                NodeKind::File(lines)
            };
            let child = self.out.push_child(at, &name, kind);
            self.walk(child, b, t)?;
        }
        Ok(())
    }

    fn child_names(&self, base: Option<NodeId>, tgt: Option<NodeId>) -> Vec<String> {
        let mut names = Vec::new();
        if let (Some(tree), Some(id)) = (self.baseline, base) {
            names.extend(tree.children(id).map(|(name, _)| name.to_string()));
        }
        if let Some(id) = tgt {
            names.extend(self.target.children(id).map(|(name, _)| name.to_string()));
        }
        names
    }
}
