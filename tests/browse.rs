mod common;

use covmanager::browse::{browse, Facade, ViewRequest, ViewResponse};
use covmanager::error::CovError;
use covmanager::jobs::JobInputs;
use covmanager::model::CollectionFilter;

fn seeded() -> (std::sync::Arc<covmanager::store::SqliteStore>, tempfile::TempDir, i64) {
    let (store, dir) = common::setup_store();
    let id = common::insert(
        &store,
        "r1",
        &[
            ("dom/base/Element.cpp", &[Some(1), Some(0), None]),
            ("dom/base/Node.cpp", &[Some(4)]),
            ("js/src/jit/Ion.cpp", &[Some(0), Some(0)]),
            ("README", &[None]),
        ],
    );
    (store, dir, id)
}

#[test]
fn browse_levels_and_breadcrumb() {
    let (store, _dir, id) = seeded();
    let runner = common::runner(&store);
    let facade = Facade::new(&runner);

    let root = facade
        .wait(&ViewRequest::new(JobInputs::aggregate([id]), "/"), common::WAIT)
        .unwrap();
    let names: Vec<_> = root.children.iter().map(|c| c.name.clone().unwrap()).collect();
    assert_eq!(names, vec!["README", "dom", "js"]);
    assert_eq!(root.node.totals.lines_total, 5);
    assert!(root.breadcrumb.is_empty());

    let base = facade
        .wait(&ViewRequest::new(JobInputs::aggregate([id]), "dom/base/"), common::WAIT)
        .unwrap();
    assert_eq!(base.path, "dom/base");
    assert_eq!(base.children.len(), 2);
    assert_eq!(
        base.breadcrumb.iter().map(|c| c.path.as_str()).collect::<Vec<_>>(),
        vec!["dom", "dom/base"]
    );
    assert_eq!(base.node.coverage_percent, 66.67);

    // Every path shares the job that computed the whole tree.
    assert_eq!(runner.computations(), 1);
}

#[test]
fn browse_file_returns_lines() {
    let (store, _dir, id) = seeded();
    let runner = common::runner(&store);
    let facade = Facade::new(&runner);

    let view = facade
        .wait(
            &ViewRequest::new(JobInputs::aggregate([id]), "dom/base/Element.cpp"),
            common::WAIT,
        )
        .unwrap();
    assert!(!view.node.is_container);
    assert!(view.children.is_empty());
    assert_eq!(view.lines, Some(vec![Some(1), Some(0), None]));
}

#[test]
fn browse_past_a_file_is_not_found() {
    let (store, _dir, id) = seeded();
    let runner = common::runner(&store);
    let facade = Facade::new(&runner);

    let request = ViewRequest::new(JobInputs::aggregate([id]), "dom/base/Node.cpp/extra");
    let err = facade.wait(&request, common::WAIT).unwrap_err();
    assert!(matches!(err, CovError::PathNotFound(_)), "{err}");

    let missing = ViewRequest::new(JobInputs::aggregate([id]), "layout");
    assert!(matches!(
        facade.wait(&missing, common::WAIT),
        Err(CovError::PathNotFound(_))
    ));
}

#[test]
fn browse_empty_tree() {
    let (store, _dir) = common::setup_store();
    let id = common::insert(&store, "r1", &[]);
    let runner = common::runner(&store);
    let facade = Facade::new(&runner);

    let view = facade
        .wait(&ViewRequest::new(JobInputs::aggregate([id]), ""), common::WAIT)
        .unwrap();
    assert!(view.children.is_empty());
    assert_eq!(view.node.totals.lines_total, 0);
    assert_eq!(view.node.coverage_percent, 0.0);
}

#[test]
fn browse_tree_directly() {
    let (store, _dir, id) = seeded();
    let tree = covmanager::store::CoverageStore::load_tree(&*store, id).unwrap();
    let view = browse(&tree, "js/src").unwrap();
    assert_eq!(view.children[0].name.as_deref(), Some("jit"));
    assert_eq!(view.node.totals.lines_missed, 2);
}

#[test]
fn pending_response_serializes_with_job_handle() {
    let (store, _dir, id) = seeded();
    let (gated, gate) = common::GatedStore::new(store.clone());
    let runner = common::runner_for(gated);
    let facade = Facade::new(&runner);

    let response = facade
        .request(&ViewRequest::new(JobInputs::diff(None, id), ""))
        .unwrap();
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["state"], "pending");
    assert!(json["job"].is_string());
    gate.send(()).unwrap();

    let ready = facade
        .wait(&ViewRequest::new(JobInputs::diff(None, id), ""), common::WAIT)
        .unwrap();
    let json = serde_json::to_value(ViewResponse::Ready(ready)).unwrap();
    assert_eq!(json["state"], "ready");
    assert_eq!(json["node"]["deltaLinesTotal"], 5);
}

#[test]
fn collections_through_the_facade() {
    let (store, _dir, _) = seeded();
    let runner = common::runner(&store);
    let facade = Facade::new(&runner);
    let page = facade.collections(&CollectionFilter::default(), 1, 10).unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.results[0].revision, "r1");
}
