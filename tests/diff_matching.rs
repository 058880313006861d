// tests/diff_matching.rs

//! Sub-trove matching scenarios driven through whole-group diffs.
//!
//! Branch A and branch B hold versions v1 < v2 < v3 by timestamp; the x86
//! and x86_64 instruction sets are incompatible flavors.

mod common;

use common::{flavor, group, version};
use conary_trove::streams::PathHashes;
use conary_trove::trove::Job;
use conary_trove::{Flavor, Trove, Version};

const A_V1: &str = "/repo.example.com@ns:A/100:1.0-1";
const A_V2: &str = "/repo.example.com@ns:A/200:2.0-1";
const A_V3: &str = "/repo.example.com@ns:A/300:3.0-1";
const B_V2: &str = "/repo.example.com@ns:B/200:2.0-1";
const B_V3: &str = "/repo.example.com@ns:B/300:3.0-1";

fn group_with(refs: &[(&str, &str, &str)], group_version: &str) -> Trove {
    let mut g = group("group-dist", group_version);
    for (name, v, f) in refs {
        g.add_trove(name, version(v), flavor(f), true, false, false)
            .expect("adding a reference to a fresh group");
    }
    g
}

fn jobs_between(
    old_refs: &[(&str, &str, &str)],
    new_refs: &[(&str, &str, &str)],
    hashes: Option<&[(&str, &str, u8)]>,
) -> Vec<Job> {
    let old = group_with(old_refs, "/repo.example.com@ns:A/50:1.0-1");
    let new = group_with(new_refs, "/repo.example.com@ns:A/400:4.0-1");

    let lookup = hashes.map(|table| {
        let table: Vec<(String, Version, PathHashes)> = table
            .iter()
            .map(|(name, v, token)| {
                let mut set = PathHashes::default();
                set.add([*token; 8]);
                (name.to_string(), version(v), set)
            })
            .collect();
        move |name: &str, v: &Version, _f: &Flavor| -> Option<PathHashes> {
            table
                .iter()
                .find(|(n, tv, _)| n == name && tv == v)
                .map(|(_, _, set)| set.clone())
        }
    });

    let (_, _, jobs) = match &lookup {
        Some(lookup) => new.diff(Some(&old), false, Some(lookup)).unwrap(),
        None => new.diff(Some(&old), false, None).unwrap(),
    };
    jobs
}

fn updates(jobs: &[Job]) -> Vec<(&str, String, String)> {
    jobs.iter()
        .filter_map(|job| {
            let old = job.old.as_ref()?;
            let new = job.new.as_ref()?;
            Some((
                job.name.as_str(),
                old.0.freeze(),
                new.0.freeze(),
            ))
        })
        .collect()
}

fn installs(jobs: &[Job]) -> Vec<(&str, String)> {
    jobs.iter()
        .filter(|job| job.old.is_none())
        .map(|job| (job.name.as_str(), job.new.as_ref().unwrap().0.freeze()))
        .collect()
}

#[test]
fn test_same_branch_without_hashes_takes_latest() {
    // scenario 1, no hash hints: the old pairs with the newest candidate
    let jobs = jobs_between(
        &[("foo", A_V1, "is: x86")],
        &[("foo", A_V2, "is: x86"), ("foo", A_V3, "is: x86")],
        None,
    );
    assert_eq!(updates(&jobs), [("foo", A_V1.into(), A_V3.into())]);
    assert_eq!(installs(&jobs), [("foo", A_V2.into())]);
}

#[test]
fn test_same_branch_path_hint_wins() {
    // scenario 1, with hashes: overlap forces the v2 pairing instead
    let jobs = jobs_between(
        &[("foo", A_V1, "is: x86")],
        &[("foo", A_V2, "is: x86"), ("foo", A_V3, "is: x86")],
        Some(&[("foo", A_V1, 1), ("foo", A_V2, 1), ("foo", A_V3, 2)]),
    );
    assert_eq!(updates(&jobs), [("foo", A_V1.into(), A_V2.into())]);
    assert_eq!(installs(&jobs), [("foo", A_V3.into())]);
}

#[test]
fn test_cross_branch_when_same_branch_incompatible() {
    // scenario 2: the same-branch candidate has an incompatible flavor,
    // so the update crosses branches and the new flavor installs fresh
    let jobs = jobs_between(
        &[("foo", A_V1, "is: x86")],
        &[("foo", A_V2, "is: x86_64"), ("foo", B_V2, "is: x86")],
        None,
    );
    assert_eq!(updates(&jobs), [("foo", A_V1.into(), B_V2.into())]);
    assert_eq!(installs(&jobs), [("foo", A_V2.into())]);
}

#[test]
fn test_component_pairing_follows_package() {
    // scenario 3: hashes tie f:runtime across branches, and the owning
    // package f follows because its overlap is the union of its
    // components' hashes
    let old_refs = [("f", A_V1, ""), ("f:runtime", A_V1, "")];
    let new_refs = [
        ("f", B_V2, ""),
        ("f:runtime", B_V2, ""),
        ("f", B_V3, ""),
        ("f:runtime", B_V3, ""),
    ];
    let jobs = jobs_between(
        &old_refs,
        &new_refs,
        Some(&[
            ("f:runtime", A_V1, 1),
            ("f:runtime", B_V2, 2),
            ("f:runtime", B_V3, 1),
        ]),
    );
    let mut ups = updates(&jobs);
    ups.sort();
    assert_eq!(
        ups,
        [
            ("f", A_V1.into(), B_V3.into()),
            ("f:runtime", A_V1.into(), B_V3.into()),
        ]
    );
    let mut ins = installs(&jobs);
    ins.sort();
    assert_eq!(ins, [("f", B_V2.into()), ("f:runtime", B_V2.into())]);
}

#[test]
fn test_empty_flavor_beats_nonempty() {
    // scenario 4: empty pairs with empty even though the flagged
    // candidate is newer
    let jobs = jobs_between(
        &[("foo", A_V1, "")],
        &[("foo", A_V2, ""), ("foo", A_V3, "~!ssl")],
        None,
    );
    assert_eq!(updates(&jobs), [("foo", A_V1.into(), A_V2.into())]);
    assert_eq!(installs(&jobs), [("foo", A_V3.into())]);
}

#[test]
fn test_redundant_install() {
    // scenario 5: two compatible candidates, no hints: latest wins, the
    // other installs alongside
    let jobs = jobs_between(
        &[("foo", A_V1, "is: x86")],
        &[("foo", A_V2, "is: x86"), ("foo", A_V3, "is: x86")],
        None,
    );
    assert_eq!(updates(&jobs), [("foo", A_V1.into(), A_V3.into())]);
    assert_eq!(installs(&jobs), [("foo", A_V2.into())]);
}

#[test]
fn test_pure_install_and_erase_by_name() {
    let jobs = jobs_between(
        &[("gone", A_V1, ""), ("stays", A_V1, "")],
        &[("fresh", A_V2, ""), ("stays", A_V1, "")],
        None,
    );
    // "stays" is unchanged: no job at all
    assert!(jobs.iter().all(|job| job.name != "stays"));
    assert_eq!(installs(&jobs), [("fresh", A_V2.into())]);
    let erases: Vec<_> = jobs
        .iter()
        .filter(|job| job.new.is_none())
        .map(|job| job.name.as_str())
        .collect();
    assert_eq!(erases, ["gone"]);
}

#[test]
fn test_diff_is_deterministic() {
    let old_refs = [
        ("a", A_V1, "is: x86"),
        ("a", B_V2, "is: x86_64"),
        ("b", A_V1, "ssl"),
    ];
    let new_refs = [
        ("a", A_V3, "is: x86"),
        ("a", B_V3, "is: x86_64"),
        ("b", A_V3, "ssl,readline"),
        ("c", A_V2, ""),
    ];
    let first = jobs_between(&old_refs, &new_refs, None);
    for _ in 0..5 {
        assert_eq!(jobs_between(&old_refs, &new_refs, None), first);
    }

    let old = group_with(&old_refs, "/repo.example.com@ns:A/50:1.0-1");
    let new = group_with(&new_refs, "/repo.example.com@ns:A/400:4.0-1");
    let (tcs_a, _, _) = new.diff(Some(&old), false, None).unwrap();
    let (tcs_b, _, _) = new.diff(Some(&old), false, None).unwrap();
    let skip = conary_trove::SkipSet::new();
    use conary_trove::Stream;
    assert_eq!(tcs_a.freeze(&skip).unwrap(), tcs_b.freeze(&skip).unwrap());
}
