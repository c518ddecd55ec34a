use std::collections::BTreeMap;
use std::env;
use std::panic;

use serial_test::serial;
use trainlaunch::plan::EnvPatch;

const KEPT: &str = "TRAINLAUNCH_TEST_PATCH_KEPT";
const REPLACED: &str = "TRAINLAUNCH_TEST_PATCH_REPLACED";
const ADDED: &str = "TRAINLAUNCH_TEST_PATCH_ADDED";

fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn reset() {
    // SAFETY: tests in this file run serially and nothing else reads these vars.
    unsafe {
        env::set_var(KEPT, "same");
        env::set_var(REPLACED, "before");
        env::remove_var(ADDED);
    }
}

#[test]
#[serial]
fn patch_is_visible_inside_the_scope_and_undone_after() {
    reset();
    let patch = vars(&[(KEPT, "same"), (REPLACED, "after"), (ADDED, "new")]);

    {
        let guard = EnvPatch::apply(&patch);
        assert_eq!(guard.changed(), 2);
        assert_eq!(env::var(REPLACED).unwrap(), "after");
        assert_eq!(env::var(ADDED).unwrap(), "new");
        assert_eq!(env::var(KEPT).unwrap(), "same");
    }

    assert_eq!(env::var(REPLACED).unwrap(), "before");
    assert!(env::var(ADDED).is_err());
    assert_eq!(env::var(KEPT).unwrap(), "same");
}

#[test]
#[serial]
fn patch_is_undone_when_the_scope_panics() {
    reset();
    let patch = vars(&[(REPLACED, "after"), (ADDED, "new")]);

    let result = panic::catch_unwind(|| {
        let _guard = EnvPatch::apply(&patch);
        assert_eq!(env::var(ADDED).unwrap(), "new");
        panic!("backend blew up");
    });

    assert!(result.is_err());
    assert_eq!(env::var(REPLACED).unwrap(), "before");
    assert!(env::var(ADDED).is_err());
}

#[test]
#[serial]
fn empty_patch_changes_nothing() {
    reset();
    let guard = EnvPatch::apply(&BTreeMap::new());
    assert_eq!(guard.changed(), 0);
    drop(guard);
    assert_eq!(env::var(REPLACED).unwrap(), "before");
}
