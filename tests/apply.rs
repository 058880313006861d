// tests/apply.rs

//! Applying changesets: absolute reconstruction, relative updates, and
//! the integrity checks that guard both.

mod common;

use common::{component, file_id, flavor, group, path_id, version};
use conary_trove::trove::TroveRef;
use conary_trove::{
    ApplyFlags, ChangeLog, Dependency, DependencyClass, Error, Flavor, SkipSet, Trove, TroveType,
};

const V1: &str = "/repo.example.com@ns:1/100:1.0-1-1";
const V2: &str = "/repo.example.com@ns:1/200:2.0-1-1";

fn populated_component() -> Trove {
    let mut t = component("foo:runtime", V1, "ssl is: x86");
    t.add_file(path_id(1), "/usr/bin/foo", version(V1), file_id(1))
        .unwrap();
    t.add_file(path_id(2), "/usr/share/foo/data", version(V1), file_id(2))
        .unwrap();
    t.set_size(8192);
    t.set_source_name("foo:source");
    t.set_build_time(1_431_104_547);
    t.requires
        .add(Dependency::new(DependencyClass::Soname, "libssl.so.3"));
    t.provides
        .add(Dependency::new(DependencyClass::Trove, "foo:runtime"));
    t.change_log = ChangeLog::new("jane", "jane@example.com", "initial build");
    t.compute_path_hashes();
    t.compute_digests().unwrap();
    t
}

#[test]
fn test_absolute_apply_reproduces_trove() {
    let t = populated_component();
    let (tcs, files_needed, _) = t.diff(None, true, None).unwrap();
    assert!(tcs.is_absolute());
    assert_eq!(files_needed.len(), 2);

    let mut fresh = component("foo:runtime", V2, "");
    fresh
        .apply_change_set(&tcs, ApplyFlags::default())
        .unwrap();

    assert_eq!(fresh, t);
    let skip = SkipSet::new();
    assert_eq!(
        fresh.freeze(&skip).unwrap(),
        t.freeze(&skip).unwrap(),
        "absolute apply must reproduce the frozen form byte for byte"
    );
    assert!(fresh.verify_digests().unwrap());
}

#[test]
fn test_relative_apply_moves_old_to_new() {
    let old = populated_component();

    let mut new = old.clone();
    new.change_version(version(V2));
    new.update_file(&path_id(1), None, Some(version(V2)), Some(file_id(9)))
        .unwrap();
    new.remove_file(&path_id(2)).unwrap();
    new.add_file(path_id(3), "/usr/bin/foo-helper", version(V2), file_id(3))
        .unwrap();
    new.set_size(9000);
    new.compute_path_hashes();
    new.compute_digests().unwrap();

    let (tcs, files_needed, _) = new.diff(Some(&old), false, None).unwrap();
    assert!(!tcs.is_absolute());
    // one changed file and one new file need contents
    assert_eq!(files_needed.len(), 2);
    let changed = files_needed
        .iter()
        .find(|f| f.path_id == path_id(1))
        .unwrap();
    assert_eq!(changed.old_file_id, Some(file_id(1)));
    assert_eq!(changed.new_file_id, file_id(9));

    let mut target = old.clone();
    target.apply_change_set(&tcs, ApplyFlags::default()).unwrap();
    assert_eq!(target, new);
    let skip = SkipSet::new();
    assert_eq!(target.freeze(&skip).unwrap(), new.freeze(&skip).unwrap());
}

#[test]
fn test_apply_failure_leaves_trove_unchanged() {
    let old = populated_component();

    let mut new = old.clone();
    new.change_version(version(V2));
    new.remove_file(&path_id(2)).unwrap();
    new.compute_path_hashes();
    new.compute_digests().unwrap();
    let (tcs, _, _) = new.diff(Some(&old), false, None).unwrap();

    // a target missing the file the changeset removes cannot apply
    let mut target = old.clone();
    target.remove_file(&path_id(2)).unwrap();
    let before = target.clone();
    assert!(target.apply_change_set(&tcs, ApplyFlags::default()).is_err());
    assert_eq!(target, before);
}

#[test]
fn test_integrity_error_on_stale_digests() {
    let old = populated_component();

    // change the size without recomputing digests: the changeset now
    // carries digests computed over the old contents
    let mut broken = old.clone();
    broken.change_version(version(V2));
    broken.set_size(55);
    let (tcs, _, _) = broken.diff(Some(&old), false, None).unwrap();

    let mut target = old.clone();
    let err = target.apply_change_set(&tcs, ApplyFlags::default());
    assert!(matches!(err, Err(Error::TroveIntegrity { .. })));

    // skipping the check accepts the stale digests
    let mut target = old.clone();
    target
        .apply_change_set(
            &tcs,
            ApplyFlags {
                skip_integrity_checks: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(target.size(), Some(55));
}

#[test]
fn test_group_reference_changes_apply() {
    let mut old = group("group-dist", V1);
    old.add_trove("a", version(V1), Flavor::empty(), true, false, false)
        .unwrap();
    old.add_trove("b", version(V1), Flavor::empty(), true, false, false)
        .unwrap();
    old.add_trove("a:runtime", version(V1), Flavor::empty(), true, true, false)
        .unwrap();
    old.compute_digests().unwrap();

    let mut new = old.clone();
    new.change_version(version(V2));
    new.del_trove(&TroveRef::new("b", version(V1), Flavor::empty()), false)
        .unwrap();
    new.add_trove("c", version(V2), Flavor::empty(), true, false, false)
        .unwrap();
    // flip byDefault on the weak reference
    new.add_trove("a:runtime", version(V1), Flavor::empty(), false, true, true)
        .unwrap();
    new.compute_digests().unwrap();

    let (tcs, _, jobs) = new.diff(Some(&old), false, None).unwrap();
    // b erased, c installed
    assert_eq!(jobs.len(), 2);

    let mut target = old.clone();
    target.apply_change_set(&tcs, ApplyFlags::default()).unwrap();
    assert_eq!(target, new);

    // re-applying the reference changes is an error unless tolerated
    let mut again = target.clone();
    assert!(again.apply_change_set(&tcs, ApplyFlags::default()).is_err());
}

#[test]
fn test_removed_trove_apply_clears_files() {
    let old = populated_component();
    let removed = Trove::new_with_type(
        "foo:runtime",
        version(V2),
        flavor("ssl is: x86"),
        TroveType::Removed,
    )
    .unwrap();
    let (tcs, files_needed, _) = removed.diff(Some(&old), false, None).unwrap();
    // removals carry no file information
    assert!(files_needed.is_empty());

    let mut target = old.clone();
    target
        .apply_change_set(
            &tcs,
            ApplyFlags {
                skip_integrity_checks: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(target.is_removed());
    assert!(!target.has_files());
}

#[test]
fn test_incomplete_set_for_newer_schema() {
    let old = populated_component();
    let mut new = old.clone();
    new.change_version(version(V2));
    new.compute_digests().unwrap();
    // claim a schema version this implementation does not know
    new.trove_info.trove_version.set(12);
    let (tcs, _, _) = new.diff(Some(&old), false, None).unwrap();

    let mut target = old.clone();
    target
        .apply_change_set(
            &tcs,
            ApplyFlags {
                skip_integrity_checks: true,
                allow_incomplete: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(target.is_incomplete());
}
