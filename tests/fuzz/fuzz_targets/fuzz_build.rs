#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any artifact that builds must satisfy the tree invariants, and diffing
    // or merging it with itself must succeed.
    if let Ok(tree) = covmanager::builder::build(data) {
        assert!(tree.check_invariants());
        let diffed = covmanager::diff::diff(Some(&tree), &tree).unwrap();
        assert!(diffed.check_invariants());
        let merged = covmanager::aggregate::merge(&tree, &tree).unwrap();
        assert_eq!(merged.tree.root().totals, tree.root().totals);
    }
});
