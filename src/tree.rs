//! Arena-backed coverage tree.
//!
//! Nodes live in a flat `Vec` and refer to each other by index; the root is
//! always index 0. A node is created after its parent, so walking the arena
//! in reverse visits every child before its parent.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{CovError, Result};
use crate::model::{percent, CoverageData, FileCoverage};

pub type NodeId = usize;

pub const ROOT: NodeId = 0;

/// Line counts for a node. `lines_covered + lines_missed == lines_total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub lines_total: u64,
    pub lines_covered: u64,
    pub lines_missed: u64,
}

impl Totals {
    pub fn from_lines(lines: &[Option<u64>]) -> Self {
        let mut totals = Totals::default();
        for hits in lines.iter().flatten() {
            totals.lines_total += 1;
            if *hits > 0 {
                totals.lines_covered += 1;
            }
        }
        totals.lines_missed = totals.lines_total - totals.lines_covered;
        totals
    }

    #[must_use]
    pub fn coverage_percent(&self) -> f64 {
        percent(self.lines_covered, self.lines_total)
    }

    fn add(&mut self, other: &Totals) {
        self.lines_total += other.lines_total;
        self.lines_covered += other.lines_covered;
        self.lines_missed += other.lines_missed;
    }
}

/// Change relative to a baseline, attached to nodes produced by a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub delta_lines_total: i64,
    pub delta_lines_covered: i64,
    pub delta_lines_missed: i64,
    pub delta_coverage_percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Directory(BTreeMap<String, NodeId>),
    File(Vec<Option<u64>>),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: Option<String>,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    pub totals: Totals,
    pub delta: Option<Delta>,
}

impl Node {
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    #[must_use]
    pub fn lines(&self) -> Option<&[Option<u64>]> {
        match &self.kind {
            NodeKind::File(lines) => Some(lines),
            NodeKind::Directory(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoverageTree {
    nodes: Vec<Node>,
}

impl Default for CoverageTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CoverageTree {
    /// An empty tree: a root directory without children.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: None,
                parent: None,
                kind: NodeKind::Directory(BTreeMap::new()),
                totals: Totals::default(),
                delta: None,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.child_count(ROOT) == 0
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn root(&self) -> &Node {
        self.node(ROOT)
    }

    /// Children of `id` in name order. Files have none.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        let map = match &self.nodes[id].kind {
            NodeKind::Directory(children) => Some(children),
            NodeKind::File(_) => None,
        };
        map.into_iter()
            .flat_map(|children| children.iter().map(|(name, &child)| (name.as_str(), child)))
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        match &self.nodes[id].kind {
            NodeKind::Directory(children) => children.len(),
            NodeKind::File(_) => 0,
        }
    }

    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        match &self.nodes[id].kind {
            NodeKind::Directory(children) => children.get(name).copied(),
            NodeKind::File(_) => None,
        }
    }

    /// Append a node under `parent`. The caller guarantees `parent` is a
    /// directory without a child called `name`.
    pub(crate) fn push_child(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: Some(name.to_string()),
            parent: Some(parent),
            kind,
            totals: Totals::default(),
            delta: None,
        });
        if let NodeKind::Directory(children) = &mut self.nodes[parent].kind {
            children.insert(name.to_string(), id);
        }
        id
    }

    /// Find or create the file node at `segments`, creating intermediate
    /// directories on demand. Returns the node id and whether it was created.
    ///
    /// Fails with `SchemaConflict` when a segment names a file where a
    /// directory is needed, or the leaf names an existing directory.
    pub(crate) fn file_entry(&mut self, segments: &[&str]) -> Result<(NodeId, bool)> {
        let Some((leaf, dirs)) = segments.split_last() else {
            return Err(CovError::MalformedArtifact("empty path".to_string()));
        };

        let mut current = ROOT;
        for (depth, segment) in dirs.iter().enumerate() {
            current = match self.child(current, segment) {
                Some(existing) if self.nodes[existing].is_container() => existing,
                Some(_) => {
                    return Err(CovError::SchemaConflict {
                        path: segments[..=depth].join("/"),
                    })
                }
                None => {
                    self.push_child(current, segment, NodeKind::Directory(BTreeMap::new()))
                }
            };
        }

        match self.child(current, leaf) {
            Some(existing) if self.nodes[existing].is_container() => Err(CovError::SchemaConflict {
                path: segments.join("/"),
            }),
            Some(existing) => Ok((existing, false)),
            None => Ok((self.push_child(current, leaf, NodeKind::File(Vec::new())), true)),
        }
    }

    pub(crate) fn lines_mut(&mut self, id: NodeId) -> Option<&mut Vec<Option<u64>>> {
        match &mut self.nodes[id].kind {
            NodeKind::File(lines) => Some(lines),
            NodeKind::Directory(_) => None,
        }
    }

    /// Recompute every node's totals from the file line vectors.
    pub(crate) fn recompute_totals(&mut self) {
        for id in (0..self.nodes.len()).rev() {
            let totals = match &self.nodes[id].kind {
                NodeKind::File(lines) => Totals::from_lines(lines),
                NodeKind::Directory(children) => {
                    let mut sum = Totals::default();
                    for &child in children.values() {
                        sum.add(&self.nodes[child].totals);
                    }
                    sum
                }
            };
            self.nodes[id].totals = totals;
        }
    }

    /// Walk from the root one segment at a time. Empty segments are ignored,
    /// so `""` and `"/"` both name the root.
    pub fn resolve(&self, path: &str) -> Result<NodeId> {
        let mut current = ROOT;
        for segment in split_path(path) {
            current = self
                .child(current, segment)
                .ok_or_else(|| CovError::PathNotFound(path.to_string()))?;
        }
        Ok(current)
    }

    /// Node ids from the root down to `id`, inclusive.
    pub fn ancestry(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Slash-joined path of `id`; the root is `""`.
    pub fn path_of(&self, id: NodeId) -> String {
        self.ancestry(id)
            .into_iter()
            .filter_map(|n| self.nodes[n].name.as_deref())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// All file nodes as (path, line vector), in path order.
    pub fn files(&self) -> Vec<(String, &[Option<u64>])> {
        let mut out = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            match &self.nodes[id].kind {
                NodeKind::File(lines) => out.push((self.path_of(id), lines.as_slice())),
                NodeKind::Directory(children) => stack.extend(children.values().rev()),
            }
        }
        out
    }

    /// Flatten back into the artifact model.
    pub fn to_coverage_data(&self) -> CoverageData {
        CoverageData {
            files: self
                .files()
                .into_iter()
                .map(|(path, lines)| FileCoverage {
                    path,
                    coverage: lines.to_vec(),
                })
                .collect(),
        }
    }

    /// True when every node satisfies `covered + missed == total` and every
    /// directory's totals are the sum of its children's.
    pub fn check_invariants(&self) -> bool {
        self.nodes.iter().all(|node| {
            let t = node.totals;
            if t.lines_covered + t.lines_missed != t.lines_total {
                return false;
            }
            match &node.kind {
                NodeKind::File(_) => true,
                NodeKind::Directory(children) => {
                    let mut sum = Totals::default();
                    for &child in children.values() {
                        sum.add(&self.nodes[child].totals);
                    }
                    sum == t
                }
            }
        })
    }

    fn subtree_eq(&self, a: NodeId, other: &CoverageTree, b: NodeId) -> bool {
        let (x, y) = (&self.nodes[a], &other.nodes[b]);
        if x.totals != y.totals || x.delta != y.delta {
            return false;
        }
        match (&x.kind, &y.kind) {
            (NodeKind::File(l), NodeKind::File(r)) => l == r,
            (NodeKind::Directory(l), NodeKind::Directory(r)) => {
                l.len() == r.len()
                    && l.iter().all(|(name, &child)| {
                        r.get(name)
                            .is_some_and(|&rc| self.subtree_eq(child, other, rc))
                    })
            }
            _ => false,
        }
    }
}

/// Structural equality: same names, kinds, lines, totals and deltas,
/// regardless of arena layout.
impl PartialEq for CoverageTree {
    fn eq(&self, other: &Self) -> bool {
        self.subtree_eq(ROOT, other, ROOT)
    }
}

/// Non-empty `/`-separated segments of `path`.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
