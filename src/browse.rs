//! Path-based navigation over computed trees, and the submit-or-fetch
//! request handling clients use to reach them.
//!
//! A view only ever contains the requested node and its direct children, so
//! response size stays bounded no matter how large the tree is.

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::aggregate::MergeStats;
use crate::error::{CovError, Result};
use crate::jobs::{JobId, JobInputs, JobOutput, JobRunner, JobStatus};
use crate::model::{CollectionFilter, CollectionPage};
use crate::tree::{CoverageTree, Delta, NodeId, Totals};

/// Metrics of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub name: Option<String>,
    pub is_container: bool,
    #[serde(flatten)]
    pub totals: Totals,
    pub coverage_percent: f64,
    #[serde(flatten)]
    pub delta: Option<Delta>,
}

impl NodeView {
    fn of(tree: &CoverageTree, id: NodeId) -> Self {
        let node = tree.node(id);
        NodeView {
            name: node.name.clone(),
            is_container: node.is_container(),
            totals: node.totals,
            coverage_percent: node.totals.coverage_percent(),
            delta: node.delta,
        }
    }
}

/// One ancestor on the way from the root to the browsed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Crumb {
    pub name: String,
    pub path: String,
}

/// The browse payload: a node, its direct children, and how to get back up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseView {
    pub path: String,
    pub node: NodeView,
    pub children: Vec<NodeView>,
    pub breadcrumb: Vec<Crumb>,
    /// Per-line hit counts when the node is a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<Option<u64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_stats: Option<MergeStats>,
}

/// Resolve `path` in `tree` and describe the node found there.
///
/// `path` is `/`-separated; empty segments are ignored and `""` is the root.
/// Fails with `PathNotFound` when any segment does not match a child,
/// including any segment that follows a file.
pub fn browse(tree: &CoverageTree, path: &str) -> Result<BrowseView> {
    let id = tree.resolve(path)?;

    let breadcrumb = tree
        .ancestry(id)
        .into_iter()
        .filter_map(|ancestor| {
            tree.node(ancestor).name.clone().map(|name| Crumb {
                name,
                path: tree.path_of(ancestor),
            })
        })
        .collect();

    Ok(BrowseView {
        path: tree.path_of(id),
        node: NodeView::of(tree, id),
        children: tree
            .children(id)
            .map(|(_, child)| NodeView::of(tree, child))
            .collect(),
        breadcrumb,
        lines: tree.node(id).lines().map(<[Option<u64>]>::to_vec),
        merge_stats: None,
    })
}

/// A client request: which computation, and where to look in its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRequest {
    pub inputs: JobInputs,
    pub path: String,
}

impl ViewRequest {
    pub fn new(inputs: JobInputs, path: impl Into<String>) -> Self {
        Self {
            inputs,
            path: path.into(),
        }
    }
}

/// Either the finished view, or a handle to retry with later.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ViewResponse {
    Ready(BrowseView),
    Pending { job: JobId },
}

impl ViewResponse {
    pub fn is_ready(&self) -> bool {
        matches!(self, ViewResponse::Ready(_))
    }
}

/// Entry point for browsing clients. Holds a reference to the process's job
/// runner; it keeps no state of its own.
pub struct Facade<'a> {
    runner: &'a JobRunner,
}

impl<'a> Facade<'a> {
    pub fn new(runner: &'a JobRunner) -> Self {
        Self { runner }
    }

    /// Submit-or-fetch. Identical requests map to the same job, so a client
    /// simply repeats the request until it is ready.
    ///
    /// The job is keyed on its inputs only; every path shares the job that
    /// computes the full tree. A failure is returned once as `JobFailed`;
    /// repeating the request after that starts a new computation.
    pub fn request(&self, request: &ViewRequest) -> Result<ViewResponse> {
        let id = self.runner.submit(request.inputs.clone())?;
        self.respond(id, &request.path)
    }

    fn respond(&self, id: JobId, path: &str) -> Result<ViewResponse> {
        let job = self.runner.poll(id)?;
        match job.status {
            JobStatus::Pending | JobStatus::Running => {
                debug!(job = %id, status = ?job.status, "view not ready");
                Ok(ViewResponse::Pending { job: id })
            }
            JobStatus::Failed => Err(CovError::JobFailed(
                job.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            JobStatus::Done => {
                let output = job
                    .output
                    .ok_or_else(|| CovError::Other(format!("job {id} finished without a result")))?;
                let mut view = browse(&output.tree, path)?;
                view.merge_stats = output.merge_stats;
                Ok(ViewResponse::Ready(view))
            }
        }
    }

    /// Re-issue `request` with exponential backoff until it is ready or
    /// `timeout` has passed. A client-side convenience; the engine never
    /// blocks on its own.
    pub fn wait(&self, request: &ViewRequest, timeout: Duration) -> Result<BrowseView> {
        poll_until(timeout, || match self.request(request)? {
            ViewResponse::Ready(view) => Ok(Ok(view)),
            ViewResponse::Pending { job } => Ok(Err(job)),
        })
    }

    /// Wait for the raw result of a computation instead of a view of it.
    pub fn wait_output(&self, inputs: &JobInputs, timeout: Duration) -> Result<JobOutput> {
        poll_until(timeout, || {
            let id = self.runner.submit(inputs.clone())?;
            let job = self.runner.poll(id)?;
            match job.status {
                JobStatus::Pending | JobStatus::Running => Ok(Err(id)),
                JobStatus::Failed => Err(CovError::JobFailed(
                    job.error.unwrap_or_else(|| "unknown error".to_string()),
                )),
                JobStatus::Done => job
                    .output
                    .map(Ok)
                    .ok_or_else(|| CovError::Other(format!("job {id} finished without a result"))),
            }
        })
    }

    /// Paged collection metadata, newest first.
    pub fn collections(
        &self,
        filter: &CollectionFilter,
        page: u32,
        per_page: u32,
    ) -> Result<CollectionPage> {
        self.runner.store().list_collections(filter, page, per_page)
    }
}

/// Call `attempt` until it yields a value, sleeping with exponential backoff
/// between pending answers (`Err(job)`).
fn poll_until<T>(
    timeout: Duration,
    mut attempt: impl FnMut() -> Result<std::result::Result<T, JobId>>,
) -> Result<T> {
    let deadline = Instant::now() + timeout;
    let mut backoff = Duration::from_millis(10);
    loop {
        match attempt()? {
            Ok(value) => return Ok(value),
            Err(job) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(CovError::Other(format!(
                        "timed out after {timeout:?} waiting for job {job}"
                    )));
                }
                thread::sleep(backoff.min(deadline - now));
                backoff = (backoff * 2).min(Duration::from_secs(1));
            }
        }
    }
}
