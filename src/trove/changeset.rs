// src/trove/changeset.rs

//! TroveChangeSet: the difference between two trove states
//!
//! A changeset is either *absolute* (describes a trove from nothing) or
//! *relative* to a declared old version. Provides, requires, flavor, and
//! redirects always travel in absolute form so dependency checks never
//! need the base trove; file and sub-trove changes are recorded as
//! new/changed/old lists; troveInfo travels as a nested diff (or a full
//! blob for absolute changesets).
//!
//! [`Trove::apply_change_set`] consumes a changeset, validating first so a
//! failed apply leaves the trove untouched.

use std::collections::BTreeMap;

use crate::changelog::ChangeLog;
use crate::deps::DependenciesStream;
use crate::error::{Error, Result};
use crate::flavor::{Flavor, FlavorsStream};
use crate::signature::TroveSignatures;
use crate::streams::set::stream_set;
use crate::streams::{
    ByteStream, IntStream, SkipSet, Stream, StringStream, take,
};
use crate::trove::info::{TROVE_VERSION_1_1, TroveInfo};
use crate::trove::{FileId, PathId, Trove, TroveRedirectList, TroveType};
use crate::version::Version;
use crate::version::streams::FrozenVersionStream;

/// Changeset type codes
const TCS_TYPE_ABSOLUTE: u32 = 1;
const TCS_TYPE_RELATIVE: u32 = 2;

/// PathIds removed by a changeset, frozen as their concatenation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct OldFileStream(pub Vec<PathId>);

impl OldFileStream {
    pub fn push(&mut self, path_id: PathId) {
        self.0.push(path_id);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathId> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Stream for OldFileStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        Ok(self.0.concat())
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        if frz.len() % 16 != 0 {
            return Err(Error::InvalidSize {
                field: "OldFileStream",
                expected: 16,
                got: frz.len() % 16,
            });
        }
        Ok(Self(
            frz.chunks_exact(16)
                .map(|chunk| chunk.try_into().unwrap())
                .collect(),
        ))
    }

    fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
        if self.0 == them.0 {
            return Ok(None);
        }
        self.freeze(&SkipSet::new()).map(Some)
    }

    fn twm(&mut self, diff: &[u8], _base: &Self) -> Result<bool> {
        *self = Self::thaw(diff)?;
        Ok(false)
    }
}

/// One file record in a changeset. New files carry every field; changed
/// files carry only what changed. The path (directory and base name)
/// travels as one optional unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileChange {
    pub path_id: PathId,
    pub dir_name: Option<Vec<u8>>,
    pub base_name: Option<Vec<u8>>,
    pub file_id: Option<FileId>,
    pub version: Option<Version>,
}

/// File records of a changeset.
///
/// Frozen per record as `pathId | pathLen pathBytes | fileIdLen fileId |
/// versionLen version`, with zero lengths meaning "unchanged". The path
/// bytes are `dirName NUL baseName`, so a present path is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ReferencedFileList(pub Vec<FileChange>);

impl ReferencedFileList {
    pub fn push(&mut self, change: FileChange) {
        self.0.push(change);
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileChange> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Stream for ReferencedFileList {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for change in &self.0 {
            out.extend_from_slice(&change.path_id);
            match (&change.dir_name, &change.base_name) {
                (Some(dir), Some(base)) => {
                    let len = dir.len() + 1 + base.len();
                    out.extend_from_slice(&(len as u16).to_be_bytes());
                    out.extend_from_slice(dir);
                    out.push(0);
                    out.extend_from_slice(base);
                }
                _ => out.extend_from_slice(&0u16.to_be_bytes()),
            }
            match &change.file_id {
                Some(file_id) => {
                    out.extend_from_slice(&(file_id.len() as u16).to_be_bytes());
                    out.extend_from_slice(file_id);
                }
                None => out.extend_from_slice(&0u16.to_be_bytes()),
            }
            match &change.version {
                Some(version) => {
                    let text = version.freeze();
                    out.extend_from_slice(&(text.len() as u16).to_be_bytes());
                    out.extend_from_slice(text.as_bytes());
                }
                None => out.extend_from_slice(&0u16.to_be_bytes()),
            }
        }
        Ok(out)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        let mut pos = 0;
        while pos < frz.len() {
            let path_id: PathId = take(frz, &mut pos, 16, "ReferencedFileList")?
                .try_into()
                .unwrap();
            let mut field = |pos: &mut usize| -> Result<Option<Vec<u8>>> {
                let raw = take(frz, pos, 2, "ReferencedFileList")?;
                let len = u16::from_be_bytes(raw.try_into().unwrap()) as usize;
                if len == 0 {
                    return Ok(None);
                }
                Ok(Some(take(frz, pos, len, "ReferencedFileList")?.to_vec()))
            };
            let (dir_name, base_name) = match field(&mut pos)? {
                None => (None, None),
                Some(path) => {
                    let nul = path
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or(Error::Truncated("ReferencedFileList"))?;
                    (
                        Some(path[..nul].to_vec()),
                        Some(path[nul + 1..].to_vec()),
                    )
                }
            };
            let file_id = match field(&mut pos)? {
                None => None,
                Some(raw) => Some(raw.as_slice().try_into().map_err(|_| Error::InvalidSize {
                    field: "fileId",
                    expected: 20,
                    got: raw.len(),
                })?),
            };
            let version = match field(&mut pos)? {
                None => None,
                Some(raw) => Some(Version::thaw(&String::from_utf8_lossy(&raw))?),
            };
            new.0.push(FileChange {
                path_id,
                dir_name,
                base_name,
                file_id,
                version,
            });
        }
        Ok(new)
    }

    fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
        if self.0 == them.0 {
            return Ok(None);
        }
        self.freeze(&SkipSet::new()).map(Some)
    }

    fn twm(&mut self, diff: &[u8], _base: &Self) -> Result<bool> {
        *self = Self::thaw(diff)?;
        Ok(false)
    }
}

/// What happened to one sub-trove reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TroveChangeOp {
    /// Reference added
    Add,
    /// Reference removed
    Remove,
    /// Only the byDefault flag changed
    ByDefaultToggle,
}

impl TroveChangeOp {
    fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Remove => "-",
            Self::ByDefaultToggle => "~",
        }
    }

    fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "+" => Some(Self::Add),
            "-" => Some(Self::Remove),
            "~" => Some(Self::ByDefaultToggle),
            _ => None,
        }
    }
}

/// One recorded change to a sub-trove reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TroveChange {
    pub op: TroveChangeOp,
    pub version: Version,
    pub flavor: Flavor,
    pub by_default: Option<bool>,
}

/// Sub-trove reference changes grouped by name.
///
/// Frozen as NUL-joined text: each name followed by `(op, frozen version,
/// flavor-or-dash, byDefault)` quads and an empty terminator. Versions
/// keep their timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferencedTroveSet(pub BTreeMap<String, Vec<TroveChange>>);

impl ReferencedTroveSet {
    pub fn record(&mut self, name: &str, change: TroveChange) {
        self.0.entry(name.to_string()).or_default().push(change);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<TroveChange>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Stream for ReferencedTroveSet {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        if self.0.is_empty() {
            return Ok(Vec::new());
        }
        let mut parts: Vec<String> = Vec::new();
        for (name, changes) in &self.0 {
            parts.push(name.clone());
            for change in changes {
                parts.push(change.op.symbol().to_string());
                parts.push(change.version.freeze());
                let flavor = change.flavor.to_string();
                parts.push(if flavor.is_empty() {
                    "-".to_string()
                } else {
                    flavor
                });
                parts.push(if change.by_default.unwrap_or(false) {
                    "1".to_string()
                } else {
                    "0".to_string()
                });
            }
            parts.push(String::new());
        }
        Ok(parts.join("\0").into_bytes())
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        if frz.is_empty() {
            return Ok(new);
        }
        let text = String::from_utf8_lossy(frz);
        let parts: Vec<&str> = text.split('\0').collect();
        let mut i = 0;
        while i < parts.len() {
            let name = parts[i];
            i += 1;
            let mut changes = Vec::new();
            while i < parts.len() && !parts[i].is_empty() {
                if i + 3 >= parts.len() {
                    return Err(Error::Truncated("ReferencedTroveSet"));
                }
                let op = TroveChangeOp::from_symbol(parts[i])
                    .ok_or(Error::Truncated("ReferencedTroveSet"))?;
                let version = Version::thaw(parts[i + 1])?;
                let flavor = if parts[i + 2] == "-" {
                    Flavor::empty()
                } else {
                    Flavor::parse(parts[i + 2])?
                };
                let by_default = match op {
                    TroveChangeOp::Remove => None,
                    _ => Some(parts[i + 3] == "1"),
                };
                changes.push(TroveChange {
                    op,
                    version,
                    flavor,
                    by_default,
                });
                i += 4;
            }
            i += 1; // the empty terminator
            new.0.insert(name.to_string(), changes);
        }
        Ok(new)
    }

    fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
        if self.0 == them.0 {
            return Ok(None);
        }
        self.freeze(&SkipSet::new()).map(Some)
    }

    fn twm(&mut self, diff: &[u8], _base: &Self) -> Result<bool> {
        *self = Self::thaw(diff)?;
        Ok(false)
    }
}

stream_set! {
    /// The changes between two troves of the same name (or from nothing).
    /// Unknown tags are skipped, so newer changesets degrade gracefully.
    pub struct TroveChangeSet(Skip) {
        0 => name: StringStream [Small, "name"],
        1 => old_version: FrozenVersionStream [Small, "oldVersion"],
        2 => new_version: FrozenVersionStream [Small, "newVersion"],
        3 => requires: DependenciesStream [Large, "requires"],
        4 => provides: DependenciesStream [Large, "provides"],
        5 => change_log: ChangeLog [Large, "changeLog"],
        6 => old_files: OldFileStream [Large, "oldFiles"],
        7 => tcs_type: IntStream [Small, "tcsType"],
        8 => strong_troves: ReferencedTroveSet [Large, "strongTroves"],
        9 => new_files: ReferencedFileList [Large, "newFiles"],
        10 => changed_files: ReferencedFileList [Large, "changedFiles"],
        11 => old_flavor: FlavorsStream [Small, "oldFlavor"],
        12 => new_flavor: FlavorsStream [Small, "newFlavor"],
        13 => trove_type: ByteStream [Small, "troveType"],
        14 => trove_info_diff: StringStream [Large, "troveInfoDiff"],
        15 => old_sigs: TroveSignatures [Large, "oldSigs"],
        16 => new_sigs: TroveSignatures [Large, "newSigs"],
        17 => weak_troves: ReferencedTroveSet [Large, "weakTroves"],
        18 => redirects: TroveRedirectList [Large, "redirects"],
        19 => absolute_trove_info: StringStream [Large, "absoluteTroveInfo"],
    }
}

impl TroveChangeSet {
    pub fn is_absolute(&self) -> bool {
        self.tcs_type.value() == Some(TCS_TYPE_ABSOLUTE)
    }

    pub(crate) fn set_absolute(&mut self, absolute: bool) {
        self.tcs_type.set(if absolute {
            TCS_TYPE_ABSOLUTE
        } else {
            TCS_TYPE_RELATIVE
        });
    }

    pub fn name_str(&self) -> String {
        self.name.as_str().into_owned()
    }

    pub fn trove_type_value(&self) -> Result<TroveType> {
        let byte = self.trove_type.value().unwrap_or(0);
        TroveType::from_byte(byte)
    }

    /// Record an added sub-trove reference
    pub fn new_trove_version(
        &mut self,
        name: &str,
        version: Version,
        flavor: Flavor,
        by_default: bool,
        weak: bool,
    ) {
        let set = if weak {
            &mut self.weak_troves
        } else {
            &mut self.strong_troves
        };
        set.record(
            name,
            TroveChange {
                op: TroveChangeOp::Add,
                version,
                flavor,
                by_default: Some(by_default),
            },
        );
    }

    /// Record a removed sub-trove reference
    pub fn old_trove_version(&mut self, name: &str, version: Version, flavor: Flavor, weak: bool) {
        let set = if weak {
            &mut self.weak_troves
        } else {
            &mut self.strong_troves
        };
        set.record(
            name,
            TroveChange {
                op: TroveChangeOp::Remove,
                version,
                flavor,
                by_default: None,
            },
        );
    }

    /// Record a byDefault flip on an unchanged reference
    pub fn changed_trove(
        &mut self,
        name: &str,
        version: Version,
        flavor: Flavor,
        by_default: bool,
        weak: bool,
    ) {
        let set = if weak {
            &mut self.weak_troves
        } else {
            &mut self.strong_troves
        };
        set.record(
            name,
            TroveChange {
                op: TroveChangeOp::ByDefaultToggle,
                version,
                flavor,
                by_default: Some(by_default),
            },
        );
    }
}

impl TroveType {
    pub(crate) fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Redirect),
            2 => Ok(Self::Removed),
            _ => Err(Error::UnknownTag {
                tag: byte,
                type_name: "TroveType",
            }),
        }
    }
}

/// Options for [`Trove::apply_change_set`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyFlags {
    /// Skip the digest check after apply. Needed when version numbers are
    /// deliberately being rewritten.
    pub skip_integrity_checks: bool,
    /// Accept troves with a schema version newer than this code
    pub allow_incomplete: bool,
    /// Leave the file map untouched
    pub skip_files: bool,
    /// Tolerate re-adds of present references and removals of absent ones
    pub redundant_okay: bool,
}

impl Trove {
    /// Apply a changeset, moving this trove to the state it describes.
    /// The whole apply is staged; any error leaves the trove unchanged.
    pub fn apply_change_set(&mut self, tcs: &TroveChangeSet, flags: ApplyFlags) -> Result<()> {
        let mut new = self.clone();

        new.set_type(tcs.trove_type_value()?);

        if new.trove_type() != TroveType::Normal {
            // redirects and removals never own files
            new.id_map.clear();
        } else if !flags.skip_files {
            for change in tcs.new_files.iter() {
                let (Some(dir), Some(base), Some(file_id), Some(version)) = (
                    change.dir_name.clone(),
                    change.base_name.clone(),
                    change.file_id,
                    change.version.clone(),
                ) else {
                    return Err(Error::Truncated("new file record"));
                };
                new.add_raw_file(change.path_id, dir, base, file_id, version);
            }
            for change in tcs.changed_files.iter() {
                new.update_raw_file(
                    &change.path_id,
                    change.dir_name.clone(),
                    change.base_name.clone(),
                    change.file_id,
                    change.version.clone(),
                )?;
            }
            for path_id in tcs.old_files.iter() {
                new.remove_file(path_id)?;
            }
        }

        new.merge_trove_changes(&tcs.strong_troves, false, flags.redundant_okay)?;
        new.merge_trove_changes(&tcs.weak_troves, true, flags.redundant_okay)?;

        new.change_flavor(tcs.new_flavor.value().clone());
        new.change_log = tcs.change_log.clone();
        new.provides = tcs.provides.value().clone();
        new.requires = tcs.requires.value().clone();
        let version = tcs
            .new_version
            .value()
            .ok_or(Error::Truncated("changeset new version"))?;
        new.change_version(version.clone());
        new.redirects = tcs.redirects.clone();

        // troveInfo: absolute blob replaces wholesale, but incompleteness
        // belongs to the local reader, not the changeset producer
        let absolute_info = tcs.absolute_trove_info.as_bytes();
        if !absolute_info.is_empty() || tcs.old_version.value().is_none() {
            let blob = if !absolute_info.is_empty() {
                absolute_info
            } else {
                tcs.trove_info_diff.as_bytes()
            };
            let incomplete_before = new.trove_info.incomplete;
            new.trove_info = TroveInfo::thaw(blob)?;
            new.trove_info.incomplete = incomplete_before;
        } else if !tcs.trove_info_diff.is_empty() {
            let base = new.trove_info.clone();
            let conflict = new
                .trove_info
                .twm(tcs.trove_info_diff.as_bytes(), &base)?;
            if conflict {
                tracing::warn!(name = new.name(), "troveInfo merge conflict during apply");
            }
        }
        if new.trove_info.complete_fixup.value().unwrap_or(0) != 0 {
            new.trove_info.complete_fixup.clear();
            new.trove_info.incomplete.set(0);
        }

        if new.trove_info.schema_version() > TROVE_VERSION_1_1 {
            if !flags.allow_incomplete {
                tracing::warn!(
                    name = new.name(),
                    declared = new.trove_info.schema_version(),
                    "trove schema is newer than this implementation"
                );
            }
            new.trove_info.incomplete.set(1);
        } else if new.trove_info.incomplete.value().is_none() {
            new.trove_info.incomplete.set(0);
        }

        if new.has_files() && new.has_troves() {
            return Err(Error::WrongTroveType(
                "trove has both files and sub-troves after apply",
            ));
        }

        if !flags.skip_integrity_checks
            && new.trove_info.sigs.sha1.is_set()
            && !new.verify_digests()?
        {
            return Err(Error::TroveIntegrity {
                name: new.name().to_string(),
                version: new.version().as_string(),
                flavor: new.flavor().to_string(),
            });
        }

        *self = new;
        Ok(())
    }

    fn merge_trove_changes(
        &mut self,
        changes: &ReferencedTroveSet,
        weak: bool,
        redundant_okay: bool,
    ) -> Result<()> {
        for (name, list) in changes.iter() {
            for change in list {
                match change.op {
                    TroveChangeOp::Add => {
                        self.add_trove(
                            name,
                            change.version.clone(),
                            change.flavor.clone(),
                            change.by_default.unwrap_or(true),
                            weak,
                            redundant_okay,
                        )?;
                    }
                    TroveChangeOp::Remove => {
                        let r = crate::trove::TroveRef::new(
                            name.clone(),
                            change.version.clone(),
                            change.flavor.clone(),
                        );
                        self.del_trove(&r, redundant_okay)?;
                    }
                    TroveChangeOp::ByDefaultToggle => {
                        let r = crate::trove::TroveRef::new(
                            name.clone(),
                            change.version.clone(),
                            change.flavor.clone(),
                        );
                        let map = if weak {
                            &mut self.weak_troves
                        } else {
                            &mut self.strong_troves
                        };
                        map.insert(r, change.by_default.unwrap_or(true));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(s: &str) -> Version {
        Version::thaw(s).unwrap()
    }

    #[test]
    fn test_old_file_stream_roundtrip() {
        let mut old = OldFileStream::default();
        old.push([1u8; 16]);
        old.push([2u8; 16]);
        let frz = old.freeze(&SkipSet::new()).unwrap();
        assert_eq!(frz.len(), 32);
        assert_eq!(OldFileStream::thaw(&frz).unwrap(), old);
        assert!(OldFileStream::thaw(&[0u8; 15]).is_err());
    }

    #[test]
    fn test_referenced_file_list_partial_fields() {
        let mut list = ReferencedFileList::default();
        list.push(FileChange {
            path_id: [7u8; 16],
            dir_name: Some(b"/usr/bin".to_vec()),
            base_name: Some(b"foo".to_vec()),
            file_id: Some([8u8; 20]),
            version: Some(version("/h@ns:1/5:1.0-1-1")),
        });
        list.push(FileChange {
            path_id: [9u8; 16],
            dir_name: None,
            base_name: None,
            file_id: Some([1u8; 20]),
            version: None,
        });
        let frz = list.freeze(&SkipSet::new()).unwrap();
        assert_eq!(ReferencedFileList::thaw(&frz).unwrap(), list);
    }

    #[test]
    fn test_referenced_file_list_empty_dir_name() {
        // "/x" splits into an empty dirName; presence must survive
        let mut list = ReferencedFileList::default();
        list.push(FileChange {
            path_id: [7u8; 16],
            dir_name: Some(Vec::new()),
            base_name: Some(b"x".to_vec()),
            file_id: None,
            version: None,
        });
        let frz = list.freeze(&SkipSet::new()).unwrap();
        let thawed = ReferencedFileList::thaw(&frz).unwrap();
        assert_eq!(thawed.0[0].dir_name.as_deref(), Some(&[][..]));
        assert_eq!(thawed.0[0].base_name.as_deref(), Some(&b"x"[..]));
    }

    #[test]
    fn test_referenced_trove_set_roundtrip() {
        let mut set = ReferencedTroveSet::default();
        set.record(
            "foo",
            TroveChange {
                op: TroveChangeOp::Add,
                version: version("/h@ns:1/77:2.0-1"),
                flavor: Flavor::parse("is: x86").unwrap(),
                by_default: Some(true),
            },
        );
        set.record(
            "foo",
            TroveChange {
                op: TroveChangeOp::Remove,
                version: version("/h@ns:1/33:1.0-1"),
                flavor: Flavor::empty(),
                by_default: None,
            },
        );
        set.record(
            "bar",
            TroveChange {
                op: TroveChangeOp::ByDefaultToggle,
                version: version("/h@ns:1/44:3.0-1"),
                flavor: Flavor::empty(),
                by_default: Some(false),
            },
        );
        let frz = set.freeze(&SkipSet::new()).unwrap();
        let thawed = ReferencedTroveSet::thaw(&frz).unwrap();
        assert_eq!(thawed, set);
        // timestamps survive the round trip
        let foo_changes = &thawed.0["foo"];
        assert_eq!(foo_changes[0].version.timestamp(), 77);
    }
}
