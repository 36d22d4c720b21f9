mod common;

use covmanager::browse::{Facade, ViewRequest};
use covmanager::diff::diff;
use covmanager::jobs::JobInputs;
use covmanager::store::CoverageStore;

/// Baseline has a single fully covered file; the target adds two directories.
#[test]
fn added_directories_show_up_as_deltas() {
    let (store, _dir) = common::setup_store();
    let five = [Some(1u64); 5];
    let a = common::insert(&store, "r1", &[("main.c", &five)]);
    let b = common::insert(
        &store,
        "r2",
        &[
            ("main.c", &five),
            ("a/x.c", &[Some(1), Some(2), Some(0)]),
            ("a/y.c", &[Some(1), None, Some(1), Some(1)]),
            ("b/z.c", &[Some(3), Some(3), Some(3)]),
        ],
    );

    let runner = common::runner(&store);
    let facade = Facade::new(&runner);
    let view = facade
        .wait(&ViewRequest::new(JobInputs::diff(Some(a), b), ""), common::WAIT)
        .unwrap();

    assert_eq!(view.node.totals.lines_total, 14);
    assert_eq!(view.node.totals.lines_covered, 13);
    assert_eq!(view.node.totals.lines_missed, 1);
    let root_delta = view.node.delta.unwrap();
    assert_eq!(root_delta.delta_lines_total, 9);
    assert_eq!(root_delta.delta_lines_covered, 8);
    assert_eq!(root_delta.delta_lines_missed, 1);
    assert_eq!(root_delta.delta_coverage_percent, -7.14);

    let node_a = view
        .children
        .iter()
        .find(|c| c.name.as_deref() == Some("a"))
        .unwrap();
    assert_eq!(node_a.totals.lines_total, 6);
    assert_eq!(node_a.coverage_percent, 83.33);
    assert_eq!(node_a.delta.unwrap().delta_lines_total, 6);

    let main = view
        .children
        .iter()
        .find(|c| c.name.as_deref() == Some("main.c"))
        .unwrap();
    assert_eq!(main.delta.unwrap().delta_lines_total, 0);
    assert_eq!(main.delta.unwrap().delta_coverage_percent, 0.0);
}

#[test]
fn removed_files_stay_visible_with_zero_totals() {
    let (store, _dir) = common::setup_store();
    let base = common::insert(
        &store,
        "r1",
        &[("keep.c", &[Some(1)]), ("gone/old.c", &[Some(1), Some(0)])],
    );
    let target = common::insert(&store, "r2", &[("keep.c", &[Some(1)])]);

    let t_base = store.load_tree(base).unwrap();
    let t_target = store.load_tree(target).unwrap();
    let out = diff(Some(&t_base), &t_target).unwrap();

    let gone = out.resolve("gone/old.c").unwrap();
    assert_eq!(out.node(gone).totals.lines_total, 0);
    let delta = out.node(gone).delta.unwrap();
    assert_eq!(delta.delta_lines_total, -2);
    assert_eq!(delta.delta_lines_covered, -1);
    assert_eq!(delta.delta_coverage_percent, -50.0);
    assert!(out.check_invariants());
}

#[test]
fn diff_without_baseline_counts_everything_as_added() {
    let (store, _dir) = common::setup_store();
    let id = common::insert(&store, "r1", &[("src/a.c", &[Some(1), Some(0), None])]);

    let runner = common::runner(&store);
    let facade = Facade::new(&runner);
    let view = facade
        .wait(&ViewRequest::new(JobInputs::diff(None, id), "src"), common::WAIT)
        .unwrap();

    let delta = view.node.delta.unwrap();
    assert_eq!(delta.delta_lines_total, 2);
    assert_eq!(delta.delta_lines_covered, 1);
    assert_eq!(delta.delta_coverage_percent, 50.0);
}

#[test]
fn diff_fails_on_file_directory_conflict() {
    let (store, _dir) = common::setup_store();
    let base = common::insert(&store, "r1", &[("src/util", &[Some(1)])]);
    let target = common::insert(&store, "r2", &[("src/util/str.c", &[Some(1)])]);

    let runner = common::runner(&store);
    let facade = Facade::new(&runner);
    let err = facade
        .wait(&ViewRequest::new(JobInputs::diff(Some(base), target), ""), common::WAIT)
        .unwrap_err();
    assert!(err.to_string().contains("src/util"), "{err}");
}
