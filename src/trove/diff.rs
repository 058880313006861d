// src/trove/diff.rs

//! Trove-to-trove diff and the sub-trove matching engine
//!
//! [`Trove::diff`] produces a [`TroveChangeSet`], the file contents the
//! changeset will need, and a job list pairing added sub-troves with
//! removed ones. The pairing cascade runs from tight to loose:
//!
//! 1. names present on one side only become pure installs or erases
//! 2. one-added/one-removed names pair trivially
//! 3. unambiguous path-hash overlaps force pairs (components contribute
//!    their hashes to their owning package)
//! 4. flavor-scored matching in four passes: same label + compatible
//!    flavors, any label + compatible, same label + any flavor, any label
//!    + any flavor
//! 5. whatever remains becomes a pure install or erase
//!
//! Every tie breaks on frozen bytes or timestamps, so identical inputs
//! always produce identical jobs.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::flavor::Flavor;
use crate::streams::{PathHashes, Stream};
use crate::trove::changeset::TroveChangeSet;
use crate::trove::{FileId, PathId, Trove, TroveType};
use crate::version::Version;

/// One side of a matching job
pub type JobSide = (Version, Flavor);

/// A pairing the matcher produced: update when both sides are present,
/// install when only `new` is, erase when only `old` is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub old: Option<JobSide>,
    pub new: Option<JobSide>,
    pub absolute: bool,
}

/// A file whose contents the changeset consumer must obtain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNeeded {
    pub path_id: PathId,
    pub old_file_id: Option<FileId>,
    pub old_version: Option<Version>,
    pub new_file_id: FileId,
    pub new_version: Version,
}

/// Callback resolving the path hashes of a trove the differ cannot see
pub type PathHashLookup<'a> = dyn Fn(&str, &Version, &Flavor) -> Option<PathHashes> + 'a;

type Info = (Version, Flavor);

const NEG_INF: i64 = -99_999;
const EMPTY_MATCH: i64 = 9_999;

impl Trove {
    /// Diff this trove (the new state) against `them` (the old state, or
    /// `None` for a from-nothing changeset).
    ///
    /// Returns the changeset, the files needed to realize it, and the
    /// sub-trove jobs that must be diffed alongside. Both troves must
    /// share a name.
    pub fn diff(
        &self,
        them: Option<&Trove>,
        absolute: bool,
        get_path_hashes: Option<&PathHashLookup>,
    ) -> Result<(TroveChangeSet, Vec<FileNeeded>, Vec<Job>)> {
        debug_assert!(them.is_none_or(|t| t.name() == self.name()));

        let mut tcs = TroveChangeSet::default();
        tcs.name.set(self.name().as_bytes().to_vec());
        tcs.new_version.set(Some(self.version().clone()));
        tcs.new_flavor.set(self.flavor().clone());
        tcs.trove_type.set(self.trove_type_byte());
        // dependency information always travels whole so consumers can run
        // dependency checks without loading base troves
        tcs.provides.set(self.provides.clone());
        tcs.requires.set(self.requires.clone());
        tcs.change_log = self.change_log.clone();
        tcs.redirects = self.redirects.clone();
        tcs.new_sigs = self.trove_info.sigs.clone();

        match them {
            Some(them) => {
                tcs.set_absolute(false);
                tcs.old_version.set(Some(them.version().clone()));
                tcs.old_flavor.set(them.flavor().clone());
                tcs.old_sigs = them.trove_info.sigs.clone();
                if let Some(diff) = self.trove_info.diff(&them.trove_info)? {
                    tcs.trove_info_diff.set(diff);
                }
            }
            None => {
                tcs.set_absolute(absolute);
                tcs.absolute_trove_info
                    .set(self.trove_info.freeze(&Default::default())?);
            }
        }

        let files_needed = self.diff_files(them, &mut tcs);
        let jobs = self.diff_sub_troves(them, absolute, get_path_hashes, &mut tcs);

        Ok((tcs, files_needed, jobs))
    }

    fn trove_type_byte(&self) -> u8 {
        match self.trove_type() {
            TroveType::Normal => 0,
            TroveType::Redirect => 1,
            TroveType::Removed => 2,
        }
    }

    fn diff_files(&self, them: Option<&Trove>, tcs: &mut TroveChangeSet) -> Vec<FileNeeded> {
        use crate::trove::changeset::FileChange;

        let mut files_needed = Vec::new();
        if self.trove_type() != TroveType::Normal {
            // file information is never carried for redirects or removals
            return files_needed;
        }

        let empty = crate::trove::TroveRefsFilesStream::default();
        let them_map = them.map(|t| &t.id_map).unwrap_or(&empty);

        for (path_id, entry) in self.id_map.iter() {
            match them_map.get(path_id) {
                None => {
                    files_needed.push(FileNeeded {
                        path_id: *path_id,
                        old_file_id: None,
                        old_version: None,
                        new_file_id: entry.file_id,
                        new_version: entry.version.clone(),
                    });
                    tcs.new_files.push(FileChange {
                        path_id: *path_id,
                        dir_name: Some(entry.dir_name.clone()),
                        base_name: Some(entry.base_name.clone()),
                        file_id: Some(entry.file_id),
                        version: Some(entry.version.clone()),
                    });
                }
                Some(theirs) => {
                    let path_changed = entry.dir_name != theirs.dir_name
                        || entry.base_name != theirs.base_name;
                    let contents_changed =
                        entry.file_id != theirs.file_id || entry.version != theirs.version;
                    if contents_changed {
                        files_needed.push(FileNeeded {
                            path_id: *path_id,
                            old_file_id: Some(theirs.file_id),
                            old_version: Some(theirs.version.clone()),
                            new_file_id: entry.file_id,
                            new_version: entry.version.clone(),
                        });
                    }
                    if path_changed || contents_changed {
                        tcs.changed_files.push(FileChange {
                            path_id: *path_id,
                            dir_name: path_changed.then(|| entry.dir_name.clone()),
                            base_name: path_changed.then(|| entry.base_name.clone()),
                            file_id: Some(entry.file_id),
                            version: contents_changed.then(|| entry.version.clone()),
                        });
                    }
                }
            }
        }
        for (path_id, _) in them_map.iter() {
            if !self.id_map.contains(path_id) {
                tcs.old_files.push(*path_id);
            }
        }
        files_needed
    }

    fn diff_sub_troves(
        &self,
        them: Option<&Trove>,
        absolute: bool,
        get_path_hashes: Option<&PathHashLookup>,
        tcs: &mut TroveChangeSet,
    ) -> Vec<Job> {
        let mut added: BTreeMap<String, BTreeSet<Info>> = BTreeMap::new();
        let mut removed: BTreeMap<String, BTreeSet<Info>> = BTreeMap::new();

        for (r, by_default) in self.strong_troves.iter() {
            match them.and_then(|t| t.strong_troves.get(r)) {
                Some(their_default) => {
                    if by_default != their_default {
                        tcs.changed_trove(
                            &r.name,
                            r.version.clone(),
                            r.flavor.clone(),
                            by_default,
                            false,
                        );
                    }
                }
                None => {
                    tcs.new_trove_version(
                        &r.name,
                        r.version.clone(),
                        r.flavor.clone(),
                        by_default,
                        false,
                    );
                    added
                        .entry(r.name.clone())
                        .or_default()
                        .insert((r.version.clone(), r.flavor.clone()));
                }
            }
        }
        if let Some(them) = them {
            for (r, _) in them.strong_troves.iter() {
                if !self.strong_troves.contains(r) {
                    tcs.old_trove_version(&r.name, r.version.clone(), r.flavor.clone(), false);
                    removed
                        .entry(r.name.clone())
                        .or_default()
                        .insert((r.version.clone(), r.flavor.clone()));
                }
            }
        }

        // weak references travel in the changeset but never drive jobs
        for (r, by_default) in self.weak_troves.iter() {
            match them.and_then(|t| t.weak_troves.get(r)) {
                Some(their_default) => {
                    if by_default != their_default {
                        tcs.changed_trove(
                            &r.name,
                            r.version.clone(),
                            r.flavor.clone(),
                            by_default,
                            true,
                        );
                    }
                }
                None => tcs.new_trove_version(
                    &r.name,
                    r.version.clone(),
                    r.flavor.clone(),
                    by_default,
                    true,
                ),
            }
        }
        if let Some(them) = them {
            for (r, _) in them.weak_troves.iter() {
                if !self.weak_troves.contains(r) {
                    tcs.old_trove_version(&r.name, r.version.clone(), r.flavor.clone(), true);
                }
            }
        }

        if them.is_none() {
            return added
                .into_iter()
                .flat_map(|(name, infos)| {
                    infos.into_iter().map(move |info| Job {
                        name: name.clone(),
                        old: None,
                        new: Some(info),
                        absolute,
                    })
                })
                .collect();
        }

        match_sub_troves(&added, &removed, get_path_hashes)
    }
}

/// Pair added sub-troves against removed ones
fn match_sub_troves(
    added: &BTreeMap<String, BTreeSet<Info>>,
    removed: &BTreeMap<String, BTreeSet<Info>>,
    lookup: Option<&PathHashLookup>,
) -> Vec<Job> {
    let mut jobs = Vec::new();

    for (name, added_infos) in added {
        let Some(removed_infos) = removed.get(name) else {
            // nothing with this name disappeared: pure installs
            for info in added_infos {
                jobs.push(Job {
                    name: name.clone(),
                    old: None,
                    new: Some(info.clone()),
                    absolute: false,
                });
            }
            continue;
        };
        let pairs = match_one_name(
            name,
            added_infos.clone(),
            removed_infos.clone(),
            added,
            removed,
            lookup,
        );
        for (old, new) in pairs {
            jobs.push(Job {
                name: name.clone(),
                old,
                new,
                absolute: false,
            });
        }
    }

    for (name, removed_infos) in removed {
        if !added.contains_key(name) {
            for info in removed_infos {
                jobs.push(Job {
                    name: name.clone(),
                    old: Some(info.clone()),
                    new: None,
                    absolute: false,
                });
            }
        }
    }

    jobs
}

/// Union of a trove's own path hashes with those of its components that
/// share the same (version, flavor) in the same side of the diff
fn union_hashes(
    lookup: &PathHashLookup,
    side: &BTreeMap<String, BTreeSet<Info>>,
    name: &str,
    info: &Info,
) -> Option<PathHashes> {
    let mut hashes = PathHashes::default();
    if let Some(own) = lookup(name, &info.0, &info.1) {
        hashes.merge(&own);
    }
    if !name.contains(':') {
        let prefix = format!("{}:", name);
        for (comp_name, comp_infos) in side {
            if comp_name.starts_with(&prefix) && comp_infos.contains(info) {
                if let Some(comp) = lookup(comp_name, &info.0, &info.1) {
                    hashes.merge(&comp);
                }
            }
        }
    }
    (!hashes.is_empty()).then_some(hashes)
}

fn match_one_name(
    name: &str,
    mut added: BTreeSet<Info>,
    mut removed: BTreeSet<Info>,
    all_added: &BTreeMap<String, BTreeSet<Info>>,
    all_removed: &BTreeMap<String, BTreeSet<Info>>,
    lookup: Option<&PathHashLookup>,
) -> Vec<(Option<Info>, Option<Info>)> {
    let mut pairs: Vec<(Option<Info>, Option<Info>)> = Vec::new();

    // trivial pairing: the overwhelmingly common case, and it avoids the
    // path-hash lookups entirely
    if added.len() == 1 && removed.len() == 1 {
        let new = added.pop_first().unwrap();
        let old = removed.pop_first().unwrap();
        return vec![(Some(old), Some(new))];
    }

    // unambiguous path-hash overlap forces pairs; ambiguous overlaps are
    // delayed so unambiguous pairs can disambiguate them
    if let Some(lookup) = lookup {
        loop {
            let mut new_overlap: BTreeMap<&Info, Vec<&Info>> = BTreeMap::new();
            let mut old_overlap: BTreeMap<&Info, Vec<&Info>> = BTreeMap::new();
            for new_info in &added {
                let Some(new_hashes) = union_hashes(lookup, all_added, name, new_info) else {
                    continue;
                };
                for old_info in &removed {
                    let Some(old_hashes) = union_hashes(lookup, all_removed, name, old_info)
                    else {
                        continue;
                    };
                    if new_hashes.overlaps(&old_hashes) {
                        new_overlap.entry(new_info).or_default().push(old_info);
                        old_overlap.entry(old_info).or_default().push(new_info);
                    }
                }
            }

            let mut forced: Option<(Info, Info)> = None;
            for (new_info, old_candidates) in &new_overlap {
                if old_candidates.len() != 1 {
                    continue;
                }
                let old_info = old_candidates[0];
                if old_overlap.get(old_info).map(|v| v.len()) == Some(1) {
                    forced = Some(((*old_info).clone(), (*new_info).clone()));
                    break;
                }
            }
            match forced {
                Some((old, new)) => {
                    added.remove(&new);
                    removed.remove(&old);
                    pairs.push((Some(old), Some(new)));
                }
                None => break,
            }
        }
    }

    // flavor-scored matching, four passes from tight to loose
    for (same_label, require_compat) in [(true, true), (false, true), (true, false), (false, false)]
    {
        flavor_pass(
            &mut added,
            &mut removed,
            same_label,
            require_compat,
            &mut pairs,
        );
    }

    for info in removed {
        pairs.push((Some(info), None));
    }
    for info in added {
        pairs.push((None, Some(info)));
    }
    pairs
}

/// Score a flavor pair. Empty flavors pair with each other above all
/// else and with anything else only in the any-flavor passes.
fn flavor_pair_score(old: &Flavor, new: &Flavor, require_compat: bool) -> Option<i64> {
    if old.is_empty() && new.is_empty() {
        return Some(EMPTY_MATCH);
    }
    if old.is_empty() != new.is_empty() {
        return if require_compat { None } else { Some(NEG_INF) };
    }
    match new.score(old).max(old.score(new)) {
        Some(score) => Some(score as i64),
        None if require_compat => None,
        None => Some(NEG_INF),
    }
}

fn flavor_pass(
    added: &mut BTreeSet<Info>,
    removed: &mut BTreeSet<Info>,
    same_label: bool,
    require_compat: bool,
    pairs: &mut Vec<(Option<Info>, Option<Info>)>,
) {
    // (score, frozen old flavor, frozen new flavor) sorted so the best
    // score wins and ties break on the frozen forms
    let mut scored: Vec<(i64, Vec<u8>, Vec<u8>, Flavor, Flavor)> = Vec::new();
    let old_flavors: BTreeSet<Flavor> = removed.iter().map(|(_, f)| f.clone()).collect();
    let new_flavors: BTreeSet<Flavor> = added.iter().map(|(_, f)| f.clone()).collect();
    for old_flavor in &old_flavors {
        for new_flavor in &new_flavors {
            if let Some(score) = flavor_pair_score(old_flavor, new_flavor, require_compat) {
                scored.push((
                    score,
                    old_flavor.freeze_bytes(),
                    new_flavor.freeze_bytes(),
                    old_flavor.clone(),
                    new_flavor.clone(),
                ));
            }
        }
    }
    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    let mut used_flavors: BTreeSet<Vec<u8>> = BTreeSet::new();
    for (_, old_frozen, new_frozen, old_flavor, new_flavor) in scored {
        if used_flavors.contains(&old_frozen) || used_flavors.contains(&new_frozen) {
            continue;
        }
        let old_infos: Vec<Info> = removed
            .iter()
            .filter(|(_, f)| *f == old_flavor)
            .cloned()
            .collect();
        let new_infos: Vec<Info> = added
            .iter()
            .filter(|(_, f)| *f == new_flavor)
            .cloned()
            .collect();
        if old_infos.is_empty() || new_infos.is_empty() {
            continue;
        }
        used_flavors.insert(old_frozen);
        used_flavors.insert(new_frozen);

        for (old, new) in version_match(old_infos, new_infos, same_label) {
            removed.remove(&old);
            added.remove(&new);
            pairs.push((Some(old), Some(new)));
        }
    }
}

/// Pair versions within a chosen flavor pairing.
///
/// Same-trailing-label pairs form first, each new version taking the
/// newest-stamped old version; across labels, closeness decides; the
/// leftovers zip newest-to-newest. In same-label passes only the first
/// stage runs.
fn version_match(old_infos: Vec<Info>, new_infos: Vec<Info>, same_label_only: bool) -> Vec<(Info, Info)> {
    // newest first, deterministic on timestamp then string form
    fn newest_first(a: &Info, b: &Info) -> std::cmp::Ordering {
        b.0.timestamp()
            .cmp(&a.0.timestamp())
            .then_with(|| b.0.as_string().cmp(&a.0.as_string()))
    }

    let mut matches = Vec::new();
    let mut old_left: Vec<Info> = old_infos;
    let mut new_left: Vec<Info> = new_infos;
    old_left.sort_by(newest_first);
    new_left.sort_by(newest_first);

    // stage 1: same trailing label
    let mut remaining_new = Vec::new();
    for new in new_left {
        let found = old_left
            .iter()
            .position(|old| old.0.trailing_label() == new.0.trailing_label());
        match found {
            Some(idx) => {
                let old = old_left.remove(idx);
                matches.push((old, new));
            }
            None => remaining_new.push(new),
        }
    }
    let mut new_left = remaining_new;

    if same_label_only {
        return matches;
    }

    // stage 2: across labels by closeness, best first
    let mut scored: Vec<(u32, usize, usize)> = Vec::new();
    for (old_idx, old) in old_left.iter().enumerate() {
        for (new_idx, new) in new_left.iter().enumerate() {
            let closeness = new.0.closeness(&old.0);
            if closeness > 0 {
                scored.push((closeness, old_idx, new_idx));
            }
        }
    }
    // closeness descending; index order (newest first) breaks ties
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| (a.1, a.2).cmp(&(b.1, b.2))));
    let mut used_old: BTreeSet<usize> = BTreeSet::new();
    let mut used_new: BTreeSet<usize> = BTreeSet::new();
    for (_, old_idx, new_idx) in scored {
        if used_old.contains(&old_idx) || used_new.contains(&new_idx) {
            continue;
        }
        used_old.insert(old_idx);
        used_new.insert(new_idx);
        matches.push((old_left[old_idx].clone(), new_left[new_idx].clone()));
    }
    let old_left: Vec<Info> = old_left
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !used_old.contains(idx))
        .map(|(_, info)| info)
        .collect();
    let new_left: Vec<Info> = new_left
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !used_new.contains(idx))
        .map(|(_, info)| info)
        .collect();

    // stage 3: the dregs, newest to newest
    for (old, new) in old_left.into_iter().zip(new_left) {
        matches.push((old, new));
    }

    matches
}
