// src/trove/mod.rs

//! Troves: the versioned, flavored, signable units of software
//!
//! A trove is a component (files), a package (components, by reference),
//! or a group (other packages and groups). Troves reference files by
//! content-addressed identifiers and other troves by (name, version,
//! flavor); they carry a [`TroveInfo`] block, digests, and signatures.
//!
//! By invariant a NORMAL trove has files *or* sub-trove references, never
//! both. Redirect and removed troves carry neither files nor meaningful
//! contents; they exist to point updates elsewhere.

pub mod changeset;
pub mod diff;
pub mod info;
pub mod metadata;

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::changelog::ChangeLog;
use crate::deps::DependencySet;
use crate::digest::{nonstandard_sha256_bytes, sha1_bytes};
use crate::error::{Error, Result};
use crate::flavor::{Flavor, FlavorsStream, OptionalFlavorStream};
use crate::signature::keys::KeyCache;
use crate::signature::{DigestVersion, DigitalSignature};
use crate::streams::set::{SKIP_UNKNOWN, read_record, stream_set, write_record};
use crate::streams::{SizeType, SkipSet, Stream, StreamCollection, StringStream, take};
use crate::trove::info::{TROVE_VERSION, TROVE_VERSION_1_1, TroveInfo};
use crate::version::streams::StringVersionStream;
use crate::version::{Branch, Version};

pub use changeset::{ApplyFlags, TroveChangeSet};
pub use diff::{FileNeeded, Job, JobSide, PathHashLookup};
pub use info::{TroveScript, TroveScriptConversion, TroveScripts};
pub use metadata::{Metadata, MetadataItem};

/// Stable identifier of a path within a trove's lineage
pub type PathId = [u8; 16];

/// Content-addressed identifier of a file stream
pub type FileId = [u8; 20];

/// The reserved pathId of the capsule member
pub const CAPSULE_PATHID: PathId = [0u8; 16];

const TAG_NAME: u8 = 0;
const TAG_VERSION: u8 = 1;
const TAG_FLAVOR: u8 = 2;
const TAG_PROVIDES: u8 = 3;
const TAG_REQUIRES: u8 = 4;
const TAG_CHANGELOG: u8 = 5;
const TAG_TROVEINFO: u8 = 6;
const TAG_STRONG_TROVES: u8 = 7;
const TAG_IDMAP: u8 = 8;
const TAG_TYPE: u8 = 9;
// tag 10 held a signature block long ago and stays burned
const TAG_WEAK_TROVES: u8 = 11;
const TAG_REDIRECTS: u8 = 12;

/// Validate a trove name: the allowed character set, at most one `:`, and
/// non-empty components on both sides of it
pub fn valid_trove_name(name: &str) -> bool {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        Regex::new(r"^[_A-Za-z0-9+.\-:@]+$").expect("trove name pattern is valid")
    });
    if !re.is_match(name) {
        return false;
    }
    let parts: Vec<&str> = name.split(':').collect();
    parts.len() <= 2 && parts.iter().all(|part| !part.is_empty())
}

/// True for names that label collections (packages and groups): anything
/// without a component suffix that isn't a fileset
pub fn name_is_collection(name: &str) -> bool {
    !name.contains(':') && !name.starts_with("fileset-")
}

/// What kind of trove this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TroveType {
    #[default]
    Normal,
    Redirect,
    Removed,
}

impl TroveType {
    fn as_u8(&self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Redirect => 1,
            Self::Removed => 2,
        }
    }
}

/// Plain (name, version, flavor) identity of a trove
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TroveRef {
    pub name: String,
    pub version: Version,
    pub flavor: Flavor,
}

impl TroveRef {
    pub fn new(name: impl Into<String>, version: Version, flavor: Flavor) -> Self {
        Self {
            name: name.into(),
            version,
            flavor,
        }
    }
}

impl std::fmt::Display for TroveRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}[{}]", self.name, self.version.as_string(), self.flavor)
    }
}

stream_set! {
    /// Stream form of a trove identity, used inside tuple lists
    pub struct TroveTuple(Skip) {
        0 => name: StringStream [Small, "name"],
        1 => version: StringVersionStream [Small, "version"],
        2 => flavor: FlavorsStream [Small, "flavor"],
    }
}

impl TroveTuple {
    pub fn from_ref(r: &TroveRef) -> Self {
        let mut tuple = Self::default();
        tuple.name.set(r.name.as_bytes().to_vec());
        tuple.version.set(Some(r.version.clone()));
        tuple.flavor.set(r.flavor.clone());
        tuple
    }

    pub fn to_ref(&self) -> Option<TroveRef> {
        Some(TroveRef {
            name: self.name.as_str().into_owned(),
            version: self.version.value()?.clone(),
            flavor: self.flavor.value().clone(),
        })
    }
}

/// List of trove identities (build requirements, loaded troves, …)
pub type TroveTupleList = StreamCollection<TroveTuple>;

impl TroveTupleList {
    pub fn add_ref(&mut self, r: &TroveRef) -> Result<()> {
        self.add(TroveTuple::from_ref(r))
    }

    pub fn iter_refs(&self) -> impl Iterator<Item = TroveRef> + '_ {
        self.iter().filter_map(|tuple| tuple.to_ref())
    }
}

stream_set! {
    /// One redirect target: where updates of this trove should look
    pub struct TroveRedirect(Strict) {
        0 => name: StringStream [Small, "name"],
        1 => branch: StringStream [Small, "branch"],
        2 => flavor: OptionalFlavorStream [Small, "flavor"],
    }
}

impl TroveRedirect {
    pub fn new_target(name: &str, branch: &Branch, flavor: Option<Flavor>) -> Self {
        let mut redirect = Self::default();
        redirect.name.set(name.as_bytes().to_vec());
        redirect.branch.set(branch.to_string().into_bytes());
        redirect.flavor.set(flavor);
        redirect
    }

    pub fn branch_value(&self) -> Result<Branch> {
        Ok(Branch::parse(&self.branch.as_str())?)
    }
}

/// The redirect targets of a REDIRECT trove
pub type TroveRedirectList = StreamCollection<TroveRedirect>;

/// One file owned by a trove. The directory and base names are stored
/// separately; repeated directory names compress well in repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEntry {
    pub dir_name: Vec<u8>,
    pub base_name: Vec<u8>,
    pub file_id: FileId,
    pub version: Version,
}

impl FileEntry {
    /// The full path, `dirName/baseName`
    pub fn path(&self) -> String {
        format!(
            "{}/{}",
            String::from_utf8_lossy(&self.dir_name),
            String::from_utf8_lossy(&self.base_name)
        )
    }
}

/// Split an absolute path into (dirName, baseName)
pub(crate) fn split_path(path: &str) -> (Vec<u8>, Vec<u8>) {
    match path.rfind('/') {
        Some(pos) => (
            path[..pos].as_bytes().to_vec(),
            path[pos + 1..].as_bytes().to_vec(),
        ),
        None => (Vec::new(), path.as_bytes().to_vec()),
    }
}

/// The file map of a trove: pathId → file entry.
///
/// Frozen as length-prefixed records sorted bytewise; the record layout
/// leaves room for extension without disturbing the digests of old troves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TroveRefsFilesStream(BTreeMap<PathId, FileEntry>);

impl TroveRefsFilesStream {
    pub fn get(&self, path_id: &PathId) -> Option<&FileEntry> {
        self.0.get(path_id)
    }

    pub fn insert(&mut self, path_id: PathId, entry: FileEntry) {
        self.0.insert(path_id, entry);
    }

    pub fn remove(&mut self, path_id: &PathId) -> Option<FileEntry> {
        self.0.remove(path_id)
    }

    pub fn contains(&self, path_id: &PathId) -> bool {
        self.0.contains_key(path_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathId, &FileEntry)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &PathId> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl Stream for TroveRefsFilesStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        // BTreeMap iterates in pathId order, which is also entry-bytes
        // order since the pathId leads each record
        for (path_id, entry) in &self.0 {
            let version = entry.version.as_string();
            let mut record = Vec::new();
            record.extend_from_slice(path_id);
            record.extend_from_slice(&entry.file_id);
            record.extend_from_slice(&(entry.dir_name.len() as u16).to_be_bytes());
            record.extend_from_slice(&entry.dir_name);
            record.extend_from_slice(&(entry.base_name.len() as u16).to_be_bytes());
            record.extend_from_slice(&entry.base_name);
            record.extend_from_slice(&(version.len() as u16).to_be_bytes());
            record.extend_from_slice(version.as_bytes());
            out.extend_from_slice(&(record.len() as u16).to_be_bytes());
            out.extend_from_slice(&record);
        }
        Ok(out)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        let mut pos = 0;
        while pos < frz.len() {
            let raw = take(frz, &mut pos, 2, "TroveRefsFilesStream")?;
            let len = u16::from_be_bytes(raw.try_into().unwrap()) as usize;
            let record = take(frz, &mut pos, len, "TroveRefsFilesStream")?;
            let mut rpos = 0;
            let path_id: PathId = take(record, &mut rpos, 16, "TroveRefsFilesStream")?
                .try_into()
                .unwrap();
            let file_id: FileId = take(record, &mut rpos, 20, "TroveRefsFilesStream")?
                .try_into()
                .unwrap();
            let mut field = |rpos: &mut usize| -> Result<Vec<u8>> {
                let raw = take(record, rpos, 2, "TroveRefsFilesStream")?;
                let flen = u16::from_be_bytes(raw.try_into().unwrap()) as usize;
                Ok(take(record, rpos, flen, "TroveRefsFilesStream")?.to_vec())
            };
            let dir_name = field(&mut rpos)?;
            let base_name = field(&mut rpos)?;
            let version_bytes = field(&mut rpos)?;
            let version = Version::parse(&String::from_utf8_lossy(&version_bytes))?;
            new.0.insert(
                path_id,
                FileEntry {
                    dir_name,
                    base_name,
                    file_id,
                    version,
                },
            );
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

/// The sub-trove map of a trove: identity → byDefault.
///
/// Frozen as length-prefixed records sorted bytewise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TroveRefsTrovesStream(BTreeMap<TroveRef, bool>);

impl TroveRefsTrovesStream {
    pub fn get(&self, r: &TroveRef) -> Option<bool> {
        self.0.get(r).copied()
    }

    pub fn insert(&mut self, r: TroveRef, by_default: bool) {
        self.0.insert(r, by_default);
    }

    pub fn remove(&mut self, r: &TroveRef) -> Option<bool> {
        self.0.remove(r)
    }

    pub fn contains(&self, r: &TroveRef) -> bool {
        self.0.contains_key(r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TroveRef, bool)> {
        self.0.iter().map(|(r, by_default)| (r, *by_default))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Stream for TroveRefsTrovesStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        let mut records: Vec<Vec<u8>> = Vec::new();
        for (r, by_default) in &self.0 {
            let version = r.version.as_string();
            let flavor = r.flavor.freeze_bytes();
            let mut record = Vec::new();
            record.extend_from_slice(&(r.name.len() as u16).to_be_bytes());
            record.extend_from_slice(r.name.as_bytes());
            record.extend_from_slice(&(version.len() as u16).to_be_bytes());
            record.extend_from_slice(version.as_bytes());
            record.extend_from_slice(&(flavor.len() as u16).to_be_bytes());
            record.extend_from_slice(&flavor);
            record.push(*by_default as u8);
            records.push(record);
        }
        records.sort();
        let mut out = Vec::new();
        for record in records {
            out.extend_from_slice(&(record.len() as u16).to_be_bytes());
            out.extend_from_slice(&record);
        }
        Ok(out)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        let mut pos = 0;
        while pos < frz.len() {
            let raw = take(frz, &mut pos, 2, "TroveRefsTrovesStream")?;
            let len = u16::from_be_bytes(raw.try_into().unwrap()) as usize;
            let record = take(frz, &mut pos, len, "TroveRefsTrovesStream")?;
            let mut rpos = 0;
            let mut field = |rpos: &mut usize| -> Result<Vec<u8>> {
                let raw = take(record, rpos, 2, "TroveRefsTrovesStream")?;
                let flen = u16::from_be_bytes(raw.try_into().unwrap()) as usize;
                Ok(take(record, rpos, flen, "TroveRefsTrovesStream")?.to_vec())
            };
            let name = String::from_utf8_lossy(&field(&mut rpos)?).into_owned();
            let version = Version::parse(&String::from_utf8_lossy(&field(&mut rpos)?))?;
            let flavor_bytes = field(&mut rpos)?;
            let flavor = Flavor::parse(&String::from_utf8_lossy(&flavor_bytes))?;
            let by_default = *record
                .get(rpos)
                .ok_or(Error::Truncated("TroveRefsTrovesStream"))?
                != 0;
            new.0.insert(TroveRef::new(name, version, flavor), by_default);
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

/// A trove
///
/// Construct with [`Trove::new`], populate with files or sub-trove
/// references, then finalize with [`Trove::compute_digests`] before
/// freezing or signing. `diff` (in [`diff`]) produces changesets;
/// `apply_change_set` (in [`changeset`]) consumes them.
#[derive(Debug, Clone, PartialEq)]
pub struct Trove {
    name: String,
    version: Version,
    flavor: Flavor,
    trove_type: TroveType,
    pub provides: DependencySet,
    pub requires: DependencySet,
    pub change_log: ChangeLog,
    pub trove_info: TroveInfo,
    pub(crate) strong_troves: TroveRefsTrovesStream,
    pub(crate) weak_troves: TroveRefsTrovesStream,
    pub(crate) id_map: TroveRefsFilesStream,
    pub redirects: TroveRedirectList,
}

impl Trove {
    /// Create an empty trove. The name must satisfy the trove name rule.
    pub fn new(name: &str, version: Version, flavor: Flavor) -> Result<Self> {
        Self::new_with_type(name, version, flavor, TroveType::Normal)
    }

    /// Create an empty trove of a specific type
    pub fn new_with_type(
        name: &str,
        version: Version,
        flavor: Flavor,
        trove_type: TroveType,
    ) -> Result<Self> {
        if !valid_trove_name(name) {
            return Err(Error::MalformedTroveName(name.to_string()));
        }
        let mut trove = Self {
            name: name.to_string(),
            version,
            flavor,
            trove_type,
            provides: DependencySet::new(),
            requires: DependencySet::new(),
            change_log: ChangeLog::default(),
            trove_info: TroveInfo::default(),
            strong_troves: TroveRefsTrovesStream::default(),
            weak_troves: TroveRefsTrovesStream::default(),
            id_map: TroveRefsFilesStream::default(),
            redirects: TroveRedirectList::default(),
        };
        trove.trove_info.trove_version.set(trove.schema_version_for_type());
        trove.trove_info.incomplete.set(0);
        if name_is_collection(name) {
            trove.trove_info.flags.set_collection(true);
        }
        Ok(trove)
    }

    fn schema_version_for_type(&self) -> u32 {
        match self.trove_type {
            TroveType::Removed => TROVE_VERSION_1_1,
            TroveType::Redirect if self.name.starts_with("group-") => TROVE_VERSION_1_1,
            _ => TROVE_VERSION,
        }
    }

    // --- identity -------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn flavor(&self) -> &Flavor {
        &self.flavor
    }

    pub fn trove_ref(&self) -> TroveRef {
        TroveRef::new(self.name.clone(), self.version.clone(), self.flavor.clone())
    }

    pub fn trove_type(&self) -> TroveType {
        self.trove_type
    }

    pub fn is_redirect(&self) -> bool {
        self.trove_type == TroveType::Redirect
    }

    pub fn is_removed(&self) -> bool {
        self.trove_type == TroveType::Removed
    }

    pub(crate) fn set_type(&mut self, trove_type: TroveType) {
        self.trove_type = trove_type;
    }

    pub fn change_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn change_flavor(&mut self, flavor: Flavor) {
        self.flavor = flavor;
    }

    // --- convenience accessors over troveInfo ---------------------------

    pub fn size(&self) -> Option<u64> {
        self.trove_info.size.value()
    }

    pub fn set_size(&mut self, size: u64) {
        self.trove_info.size.set(size);
    }

    pub fn source_name(&self) -> String {
        self.trove_info.source_name.as_str().into_owned()
    }

    pub fn set_source_name(&mut self, name: &str) {
        self.trove_info.source_name.set(name.as_bytes().to_vec());
    }

    pub fn build_time(&self) -> Option<u64> {
        self.trove_info.build_time.value()
    }

    pub fn set_build_time(&mut self, when: u64) {
        self.trove_info.build_time.set(when);
    }

    pub fn conary_version(&self) -> String {
        self.trove_info.conary_version.as_str().into_owned()
    }

    pub fn set_conary_version(&mut self, version: &str) {
        self.trove_info
            .conary_version
            .set(version.as_bytes().to_vec());
    }

    /// Troves this trove was built against
    pub fn build_requirements(&self) -> impl Iterator<Item = TroveRef> + '_ {
        self.trove_info.build_reqs.iter_refs()
    }

    /// Recipes loaded while building this trove
    pub fn loaded_troves(&self) -> impl Iterator<Item = TroveRef> + '_ {
        self.trove_info.loaded_troves.iter_refs()
    }

    pub fn is_collection(&self) -> bool {
        self.trove_info.flags.is_collection()
    }

    pub fn set_is_collection(&mut self, on: bool) {
        self.trove_info.flags.set_collection(on);
    }

    pub fn is_incomplete(&self) -> bool {
        self.trove_info.incomplete.value().unwrap_or(0) != 0
    }

    pub fn path_hashes(&self) -> &crate::streams::PathHashes {
        &self.trove_info.path_hashes
    }

    /// Disjoint path hashes mean the troves can share a filesystem
    pub fn compatible_with(&self, other: &Trove) -> bool {
        self.trove_info
            .path_hashes
            .compatible_with(&other.trove_info.path_hashes)
    }

    // --- files ----------------------------------------------------------

    /// Add a file. The path is split into directory and base names.
    pub fn add_file(
        &mut self,
        path_id: PathId,
        path: &str,
        version: Version,
        file_id: FileId,
    ) -> Result<()> {
        if self.trove_type != TroveType::Normal {
            return Err(Error::WrongTroveType(
                "only NORMAL troves may own files",
            ));
        }
        let (dir_name, base_name) = split_path(path);
        self.id_map.insert(
            path_id,
            FileEntry {
                dir_name,
                base_name,
                file_id,
                version,
            },
        );
        Ok(())
    }

    /// Add a file with pre-split names; changeset application uses this
    pub(crate) fn add_raw_file(
        &mut self,
        path_id: PathId,
        dir_name: Vec<u8>,
        base_name: Vec<u8>,
        file_id: FileId,
        version: Version,
    ) {
        self.id_map.insert(
            path_id,
            FileEntry {
                dir_name,
                base_name,
                file_id,
                version,
            },
        );
    }

    /// Update any subset of a file's fields, preserving the rest
    pub fn update_file(
        &mut self,
        path_id: &PathId,
        path: Option<&str>,
        version: Option<Version>,
        file_id: Option<FileId>,
    ) -> Result<()> {
        let entry = self.id_map.get(path_id).cloned().ok_or_else(|| {
            Error::MissingReference {
                name: self.name.clone(),
                reference: hex::encode(path_id),
            }
        })?;
        let (dir_name, base_name) = match path {
            Some(path) => split_path(path),
            None => (entry.dir_name, entry.base_name),
        };
        self.id_map.insert(
            *path_id,
            FileEntry {
                dir_name,
                base_name,
                file_id: file_id.unwrap_or(entry.file_id),
                version: version.unwrap_or(entry.version),
            },
        );
        Ok(())
    }

    pub(crate) fn update_raw_file(
        &mut self,
        path_id: &PathId,
        dir_name: Option<Vec<u8>>,
        base_name: Option<Vec<u8>>,
        file_id: Option<FileId>,
        version: Option<Version>,
    ) -> Result<()> {
        let entry = self.id_map.get(path_id).cloned().ok_or_else(|| {
            Error::MissingReference {
                name: self.name.clone(),
                reference: hex::encode(path_id),
            }
        })?;
        self.id_map.insert(
            *path_id,
            FileEntry {
                dir_name: dir_name.unwrap_or(entry.dir_name),
                base_name: base_name.unwrap_or(entry.base_name),
                file_id: file_id.unwrap_or(entry.file_id),
                version: version.unwrap_or(entry.version),
            },
        );
        Ok(())
    }

    pub fn remove_file(&mut self, path_id: &PathId) -> Result<()> {
        self.id_map.remove(path_id).ok_or_else(|| Error::MissingReference {
            name: self.name.clone(),
            reference: hex::encode(path_id),
        })?;
        Ok(())
    }

    pub fn has_file(&self, path_id: &PathId) -> bool {
        self.id_map.contains(path_id)
    }

    pub fn file(&self, path_id: &PathId) -> Option<&FileEntry> {
        self.id_map.get(path_id)
    }

    pub fn has_files(&self) -> bool {
        !self.id_map.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.id_map.len()
    }

    /// Iterate `(pathId, entry)` over the owned files
    pub fn iter_file_list(&self) -> impl Iterator<Item = (&PathId, &FileEntry)> {
        self.id_map.iter()
    }

    /// Recompute pathHashes and dirHashes from the file map
    pub fn compute_path_hashes(&mut self) {
        self.trove_info.path_hashes.clear();
        self.trove_info.dir_hashes.clear();
        for (_, entry) in self.id_map.iter() {
            self.trove_info.path_hashes.add_path(&entry.path());
            self.trove_info
                .dir_hashes
                .add_path(&String::from_utf8_lossy(&entry.dir_name));
        }
    }

    // --- sub-trove references -------------------------------------------

    /// Add a reference to another trove
    pub fn add_trove(
        &mut self,
        name: &str,
        version: Version,
        flavor: Flavor,
        by_default: bool,
        weak_ref: bool,
        present_okay: bool,
    ) -> Result<()> {
        let r = TroveRef::new(name, version, flavor);
        let map = if weak_ref {
            &mut self.weak_troves
        } else {
            &mut self.strong_troves
        };
        if !present_okay && map.contains(&r) {
            return Err(Error::DuplicateReference {
                name: self.name.clone(),
                reference: r.to_string(),
            });
        }
        map.insert(r, by_default);
        Ok(())
    }

    /// Remove a reference; checks strong references first, then weak
    pub fn del_trove(&mut self, r: &TroveRef, missing_okay: bool) -> Result<()> {
        if self.strong_troves.remove(r).is_some() || self.weak_troves.remove(r).is_some() {
            return Ok(());
        }
        if missing_okay {
            return Ok(());
        }
        Err(Error::MissingReference {
            name: self.name.clone(),
            reference: r.to_string(),
        })
    }

    pub fn has_trove(&self, r: &TroveRef) -> bool {
        self.strong_troves.contains(r) || self.weak_troves.contains(r)
    }

    /// The byDefault flag of a reference, strong side winning
    pub fn include_trove_by_default(&self, r: &TroveRef) -> Option<bool> {
        self.strong_troves.get(r).or_else(|| self.weak_troves.get(r))
    }

    /// Iterate references; order is unspecified between the two sides
    pub fn iter_trove_list(
        &self,
        strong_refs: bool,
        weak_refs: bool,
    ) -> impl Iterator<Item = (&TroveRef, bool)> {
        let strong = strong_refs.then(|| self.strong_troves.iter());
        let weak = weak_refs.then(|| self.weak_troves.iter());
        strong.into_iter().flatten().chain(weak.into_iter().flatten())
    }

    pub fn has_troves(&self) -> bool {
        !self.strong_troves.is_empty() || !self.weak_troves.is_empty()
    }

    // --- redirects ------------------------------------------------------

    /// Add a redirect target; only valid on REDIRECT troves
    pub fn add_redirect(
        &mut self,
        name: &str,
        branch: &Branch,
        flavor: Option<Flavor>,
    ) -> Result<()> {
        if self.trove_type != TroveType::Redirect {
            return Err(Error::WrongTroveType(
                "addRedirect on a non-redirect trove",
            ));
        }
        self.redirects
            .add(TroveRedirect::new_target(name, branch, flavor))
    }

    /// Iterate redirect targets
    pub fn iter_redirects(&self) -> impl Iterator<Item = &TroveRedirect> {
        self.redirects.iter()
    }

    // --- freezing -------------------------------------------------------

    /// Canonical bytes of the whole trove under a skip set
    pub fn freeze(&self, skip: &SkipSet) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut field = |tag: u8, size: SizeType, payload: Vec<u8>| -> Result<()> {
            if !payload.is_empty() {
                write_record(&mut out, tag, size, &payload)?;
            }
            Ok(())
        };

        if !skip.contains("name") {
            field(TAG_NAME, SizeType::Small, self.name.as_bytes().to_vec())?;
        }
        if !skip.contains("version") {
            let frozen = if skip.contains("versionStrings") {
                self.version.as_string()
            } else {
                self.version.freeze()
            };
            field(TAG_VERSION, SizeType::Small, frozen.into_bytes())?;
        }
        if !skip.contains("flavor") {
            field(TAG_FLAVOR, SizeType::Large, self.flavor.freeze_bytes())?;
        }
        if !skip.contains("provides") {
            field(
                TAG_PROVIDES,
                SizeType::Large,
                self.provides.to_string().into_bytes(),
            )?;
        }
        if !skip.contains("requires") {
            field(
                TAG_REQUIRES,
                SizeType::Large,
                self.requires.to_string().into_bytes(),
            )?;
        }
        if !skip.contains("changeLog") {
            field(TAG_CHANGELOG, SizeType::Large, self.change_log.freeze(skip)?)?;
        }
        if !skip.contains("troveInfo") {
            field(TAG_TROVEINFO, SizeType::Large, self.trove_info.freeze(skip)?)?;
        }
        if !skip.contains("strongTroves") {
            field(
                TAG_STRONG_TROVES,
                SizeType::Large,
                self.strong_troves.freeze(skip)?,
            )?;
        }
        if !skip.contains("idMap") {
            field(TAG_IDMAP, SizeType::Large, self.id_map.freeze(skip)?)?;
        }
        if !skip.contains("type") {
            field(
                TAG_TYPE,
                SizeType::Small,
                vec![self.trove_type.as_u8()],
            )?;
        }
        if !skip.contains("weakTroves") {
            field(
                TAG_WEAK_TROVES,
                SizeType::Large,
                self.weak_troves.freeze(skip)?,
            )?;
        }
        if !skip.contains("redirects") {
            field(TAG_REDIRECTS, SizeType::Large, self.redirects.freeze(skip)?)?;
        }
        Ok(out)
    }

    /// Rebuild a trove from its frozen form. Unknown tags fail: the trove
    /// stream proper is strict.
    pub fn thaw(frz: &[u8]) -> Result<Self> {
        let mut name = String::new();
        let mut version: Option<Version> = None;
        let mut flavor = Flavor::empty();
        let mut trove_type = TroveType::Normal;
        let mut provides = DependencySet::new();
        let mut requires = DependencySet::new();
        let mut change_log = ChangeLog::default();
        let mut trove_info = TroveInfo::default();
        let mut strong_troves = TroveRefsTrovesStream::default();
        let mut weak_troves = TroveRefsTrovesStream::default();
        let mut id_map = TroveRefsFilesStream::default();
        let mut redirects = TroveRedirectList::default();

        let mut pos = 0;
        while pos < frz.len() {
            let (tag, _, payload) = read_record(frz, &mut pos, "Trove")?;
            match tag {
                TAG_NAME => name = String::from_utf8_lossy(payload).into_owned(),
                TAG_VERSION => {
                    version = Some(Version::thaw(&String::from_utf8_lossy(payload))?);
                }
                TAG_FLAVOR => {
                    flavor = Flavor::parse(&String::from_utf8_lossy(payload))?;
                }
                TAG_PROVIDES => {
                    provides = DependencySet::parse(&String::from_utf8_lossy(payload))?;
                }
                TAG_REQUIRES => {
                    requires = DependencySet::parse(&String::from_utf8_lossy(payload))?;
                }
                TAG_CHANGELOG => change_log = ChangeLog::thaw(payload)?,
                TAG_TROVEINFO => trove_info = TroveInfo::thaw(payload)?,
                TAG_STRONG_TROVES => strong_troves = TroveRefsTrovesStream::thaw(payload)?,
                TAG_IDMAP => id_map = TroveRefsFilesStream::thaw(payload)?,
                TAG_TYPE => {
                    let byte = *payload.first().ok_or(Error::Truncated("Trove"))?;
                    trove_type = TroveType::from_byte(byte)?;
                }
                TAG_WEAK_TROVES => weak_troves = TroveRefsTrovesStream::thaw(payload)?,
                TAG_REDIRECTS => redirects = TroveRedirectList::thaw(payload)?,
                _ => {
                    return Err(Error::UnknownTag {
                        tag,
                        type_name: "Trove",
                    });
                }
            }
        }

        let version = version.ok_or(Error::Truncated("Trove"))?;
        let mut trove = Self::new_with_type(&name, version, flavor, trove_type)?;
        trove.provides = provides;
        trove.requires = requires;
        trove.change_log = change_log;
        trove.trove_info = trove_info;
        trove.strong_troves = strong_troves;
        trove.weak_troves = weak_troves;
        trove.id_map = id_map;
        trove.redirects = redirects;
        Ok(trove)
    }

    // --- digests and signatures -----------------------------------------

    /// Skip set for the classic version-0 digest
    pub fn v0_skip_set() -> SkipSet {
        let mut skip: SkipSet = [
            "sigs",
            "versionStrings",
            "incomplete",
            "pathHashes",
            "dirHashes",
            SKIP_UNKNOWN,
        ]
        .into_iter()
        .collect();
        skip.extend(TroveInfo::post_v0_field_names());
        skip
    }

    /// Skip set for the version-1/2 digests
    pub fn v1_skip_set() -> SkipSet {
        [
            "sigs",
            "versionStrings",
            "incomplete",
            "metadata",
            "completeFixup",
        ]
        .into_iter()
        .collect()
    }

    fn digest_bytes(&self, version: DigestVersion) -> Result<Vec<u8>> {
        match version {
            DigestVersion::V0 => self.freeze(&Self::v0_skip_set()),
            _ => self.freeze(&Self::v1_skip_set()),
        }
    }

    fn recomputed_digest(&self, version: DigestVersion) -> Result<Vec<u8>> {
        let bytes = self.digest_bytes(version)?;
        Ok(match version {
            DigestVersion::V0 => sha1_bytes(&bytes).to_vec(),
            _ => nonstandard_sha256_bytes(&bytes).to_vec(),
        })
    }

    /// Recompute every digest: metadata item digests first, then the
    /// trove-level version-0 digest and either the version-1 or version-2
    /// digest, depending on script conversions. Idempotent.
    pub fn compute_digests(&mut self) -> Result<()> {
        self.trove_info
            .trove_version
            .set(self.schema_version_for_type());
        self.trove_info.metadata.compute_digests()?;

        let sha1 = sha1_bytes(&self.digest_bytes(DigestVersion::V0)?);
        self.trove_info.sigs.sha1.set(sha1);

        let sha256 = nonstandard_sha256_bytes(&self.digest_bytes(DigestVersion::V1)?);
        if self.trove_info.scripts.has_multiple_conversions() {
            self.trove_info
                .sigs
                .v_sigs
                .drop_version(DigestVersion::V1)?;
            self.trove_info
                .sigs
                .v_sigs
                .set_digest(DigestVersion::V2, &sha256)?;
        } else {
            self.trove_info
                .sigs
                .v_sigs
                .drop_version(DigestVersion::V2)?;
            self.trove_info
                .sigs
                .v_sigs
                .set_digest(DigestVersion::V1, &sha256)?;
        }
        Ok(())
    }

    /// Digest versions to trust on this trove, after the historical v1/v2
    /// accommodation: a multi-conversion trove carrying both drops v1.
    fn trusted_versions(&self) -> Vec<DigestVersion> {
        let present = self.trove_info.sigs.versions_present();
        let multi = self.trove_info.scripts.has_multiple_conversions();
        if multi
            && present.contains(&DigestVersion::V1)
            && present.contains(&DigestVersion::V2)
        {
            tracing::warn!(
                name = %self.name,
                "trove carries both v1 and v2 digests with multiple \
                 script conversions; ignoring v1"
            );
            return present
                .into_iter()
                .filter(|v| *v != DigestVersion::V1)
                .collect();
        }
        present
    }

    /// True when every stored digest matches a recomputation
    pub fn verify_digests(&self) -> Result<bool> {
        if !self.trove_info.metadata.verify_digests()? {
            return Ok(false);
        }
        for version in self.trusted_versions() {
            let stored = self
                .trove_info
                .sigs
                .digest_for(version)
                .unwrap_or_default();
            if stored != self.recomputed_digest(version)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sign every digest version present with the key `key_id` names.
    /// Digests are computed if absent and verified if present; signing a
    /// tampered trove fails. Idempotent per key.
    pub fn add_digital_signature(&mut self, key_id: &str, cache: &dyn KeyCache) -> Result<()> {
        if self.trove_info.sigs.is_empty_block() {
            self.compute_digests()?;
        } else if !self.verify_digests()? {
            return Err(Error::DigitalSignatureVerification(format!(
                "stored digests do not match contents of {}",
                self.name
            )));
        }
        let pair = cache.private_key(key_id)?;
        let timestamp = unix_timestamp();
        for version in self.trusted_versions() {
            let digest = self
                .trove_info
                .sigs
                .digest_for(version)
                .ok_or(Error::SignatureDigestMismatch(version.as_u8()))?;
            let already = self
                .trove_info
                .sigs
                .signatures_for(version)
                .iter()
                .any(|sig| sig.fingerprint_str() == pair.fingerprint());
            if already {
                continue;
            }
            let sig = pair.sign_digest(&digest, timestamp);
            match version {
                DigestVersion::V0 => self.trove_info.sigs.digital_sigs.add(sig)?,
                _ => self.trove_info.sigs.v_sigs.add_signature(version, sig)?,
            }
        }
        Ok(())
    }

    /// Attach a signature computed elsewhere. The digest for that version
    /// must already be stored and must match the trove's contents.
    pub fn add_precomputed_signature(
        &mut self,
        version: DigestVersion,
        sig: DigitalSignature,
    ) -> Result<()> {
        let stored = self
            .trove_info
            .sigs
            .digest_for(version)
            .ok_or(Error::SignatureDigestMismatch(version.as_u8()))?;
        if stored != self.recomputed_digest(version)? {
            return Err(Error::SignatureDigestMismatch(version.as_u8()));
        }
        match version {
            DigestVersion::V0 => self.trove_info.sigs.digital_sigs.add(sig),
            _ => self.trove_info.sigs.v_sigs.add_signature(version, sig),
        }
    }

    /// Find a stored signature whose fingerprint contains `key_id`
    pub fn digital_signature(&self, key_id: &str) -> Result<DigitalSignature> {
        for version in self.trove_info.sigs.versions_present() {
            for sig in self.trove_info.sigs.signatures_for(version) {
                if sig.fingerprint_str().contains(key_id) {
                    return Ok(sig);
                }
            }
        }
        Err(Error::KeyNotFound(key_id.to_string()))
    }

    /// Verify all stored signatures, trove and metadata both.
    ///
    /// Returns `(maxTrust, missingKeys, untrustedKeys)`. Missing keys are
    /// collected rather than fatal; affirmatively bad signatures and a
    /// best trust below `threshold` raise
    /// [`Error::DigitalSignatureVerification`].
    pub fn verify_digital_signatures(
        &self,
        threshold: u8,
        cache: &dyn KeyCache,
    ) -> Result<(u8, Vec<String>, Vec<String>)> {
        if !self.verify_digests()? {
            return Err(Error::DigitalSignatureVerification(format!(
                "digest mismatch on {}",
                self.name
            )));
        }

        let mut max_trust = 0u8;
        let mut missing: Vec<String> = Vec::new();
        let mut untrusted: Vec<String> = Vec::new();
        let mut bad: Vec<String> = Vec::new();
        let label = self.version.trailing_label().clone();

        for version in self.trusted_versions() {
            let digest = self
                .trove_info
                .sigs
                .digest_for(version)
                .unwrap_or_default();
            for sig in self.trove_info.sigs.signatures_for(version) {
                let fpr = sig.fingerprint_str();
                match cache.public_key(&fpr, Some(&label)) {
                    None => {
                        tracing::warn!(fingerprint = %fpr, "signing key not in cache");
                        missing.push(fpr);
                    }
                    Some(key) => match key.verify_digest(&digest, &sig) {
                        Some(trust) => {
                            if trust < threshold {
                                untrusted.push(fpr);
                            }
                            max_trust = max_trust.max(trust);
                        }
                        None => bad.push(fpr),
                    },
                }
            }
        }

        for item in self.trove_info.metadata.iter() {
            let trust = item.verify_signatures(cache, Some(&label), &mut missing)?;
            max_trust = max_trust.max(trust);
        }

        if !bad.is_empty() {
            return Err(Error::DigitalSignatureVerification(format!(
                "trove signatures made by the following keys are bad: {}",
                bad.join(" ")
            )));
        }
        if max_trust < threshold {
            return Err(Error::DigitalSignatureVerification(format!(
                "{} does not meet minimum trust level",
                self.name
            )));
        }
        Ok((max_trust, missing, untrusted))
    }

    // --- rollback fence -------------------------------------------------

    /// Whether rolling back past this trove must stop here: the
    /// compatibility classes differ and no rollback script converts
    /// between them. When the classes agree the trove never fences,
    /// scripts or not. The `update` flag is accepted and unused.
    pub fn is_rollback_fence(&self, to_class: Option<u16>, _update: bool) -> bool {
        let own = self.trove_info.compatibility_class.value().unwrap_or(0);
        let to_class = to_class.unwrap_or(0);
        if own == to_class {
            return false;
        }
        !self.trove_info.scripts.covers_rollback(own, to_class)
    }
}

fn unix_timestamp() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(s: &str) -> Version {
        Version::thaw(s).unwrap()
    }

    fn trove() -> Trove {
        Trove::new(
            "foo:runtime",
            version("/h@ns:1/1000:1.0-1-1"),
            Flavor::parse("is: x86").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_name_validation() {
        assert!(valid_trove_name("foo:bar"));
        assert!(valid_trove_name("group-dist"));
        assert!(valid_trove_name("a+b@c_d-e.f"));
        assert!(!valid_trove_name("foo bar"));
        assert!(!valid_trove_name("foo#bar"));
        assert!(!valid_trove_name("foo:bar:baz"));
        assert!(!valid_trove_name(":comp"));
        assert!(!valid_trove_name("foo:"));
        assert!(!valid_trove_name(""));
        assert!(matches!(
            Trove::new("bad name", version("/h@ns:1/1:1.0-1"), Flavor::empty()),
            Err(Error::MalformedTroveName(_))
        ));
    }

    #[test]
    fn test_collection_flag_by_name() {
        assert!(Trove::new("foo", version("/h@ns:1/1:1.0-1"), Flavor::empty())
            .unwrap()
            .is_collection());
        assert!(!trove().is_collection());
    }

    #[test]
    fn test_add_and_update_file() {
        let mut t = trove();
        let pid = [1u8; 16];
        t.add_file(pid, "/usr/bin/foo", version("/h@ns:1/1:1.0-1-1"), [2u8; 20])
            .unwrap();
        assert!(t.has_file(&pid));
        assert_eq!(t.file(&pid).unwrap().path(), "/usr/bin/foo");

        t.update_file(&pid, Some("/usr/bin/foo2"), None, None).unwrap();
        let entry = t.file(&pid).unwrap();
        assert_eq!(entry.path(), "/usr/bin/foo2");
        assert_eq!(entry.file_id, [2u8; 20]);

        t.remove_file(&pid).unwrap();
        assert!(!t.has_file(&pid));
        assert!(t.remove_file(&pid).is_err());
    }

    #[test]
    fn test_add_trove_duplicate() {
        let mut t = Trove::new("group-a", version("/h@ns:1/1:1.0-1"), Flavor::empty()).unwrap();
        let v = version("/h@ns:1/1:2.0-1");
        t.add_trove("foo", v.clone(), Flavor::empty(), true, false, false)
            .unwrap();
        assert!(matches!(
            t.add_trove("foo", v.clone(), Flavor::empty(), true, false, false),
            Err(Error::DuplicateReference { .. })
        ));
        t.add_trove("foo", v.clone(), Flavor::empty(), false, false, true)
            .unwrap();
        let r = TroveRef::new("foo", v, Flavor::empty());
        assert_eq!(t.include_trove_by_default(&r), Some(false));
    }

    #[test]
    fn test_weak_refs_separate() {
        let mut t = Trove::new("group-a", version("/h@ns:1/1:1.0-1"), Flavor::empty()).unwrap();
        let v = version("/h@ns:1/1:2.0-1");
        t.add_trove("pkg", v.clone(), Flavor::empty(), true, false, false)
            .unwrap();
        t.add_trove("pkg:runtime", v.clone(), Flavor::empty(), true, true, false)
            .unwrap();
        assert_eq!(t.iter_trove_list(true, false).count(), 1);
        assert_eq!(t.iter_trove_list(false, true).count(), 1);
        assert_eq!(t.iter_trove_list(true, true).count(), 2);

        t.del_trove(
            &TroveRef::new("pkg:runtime", v.clone(), Flavor::empty()),
            false,
        )
        .unwrap();
        assert_eq!(t.iter_trove_list(true, true).count(), 1);
        assert!(
            t.del_trove(&TroveRef::new("gone", v, Flavor::empty()), false)
                .is_err()
        );
    }

    #[test]
    fn test_redirect_only_on_redirect_troves() {
        let mut t = trove();
        let branch = Branch::parse("/h@ns:2").unwrap();
        assert!(t.add_redirect("bar", &branch, None).is_err());

        let mut r = Trove::new_with_type(
            "foo",
            version("/h@ns:1/1:1.0-1"),
            Flavor::empty(),
            TroveType::Redirect,
        )
        .unwrap();
        r.add_redirect("bar", &branch, Some(Flavor::empty())).unwrap();
        assert_eq!(r.iter_redirects().count(), 1);
    }

    #[test]
    fn test_freeze_thaw_roundtrip() {
        let mut t = trove();
        t.add_file([3u8; 16], "/bin/x", version("/h@ns:1/1:1.0-1-1"), [4u8; 20])
            .unwrap();
        t.set_size(4096);
        t.compute_path_hashes();
        t.compute_digests().unwrap();
        let frz = t.freeze(&SkipSet::new()).unwrap();
        let thawed = Trove::thaw(&frz).unwrap();
        assert_eq!(thawed, t);
        assert_eq!(thawed.freeze(&SkipSet::new()).unwrap(), frz);
    }

    #[test]
    fn test_freeze_is_stable() {
        let mut t = trove();
        t.set_size(1);
        t.compute_digests().unwrap();
        let copy = t.clone();
        assert_eq!(
            t.freeze(&SkipSet::new()).unwrap(),
            copy.freeze(&SkipSet::new()).unwrap()
        );
    }

    #[test]
    fn test_compute_digests_idempotent() {
        let mut t = trove();
        t.set_size(1);
        t.compute_digests().unwrap();
        let first = t.freeze(&SkipSet::new()).unwrap();
        t.compute_digests().unwrap();
        assert_eq!(t.freeze(&SkipSet::new()).unwrap(), first);
        assert!(t.verify_digests().unwrap());
    }

    #[test]
    fn test_digest_coverage_v0_skips_path_hashes() {
        let mut t = trove();
        t.compute_digests().unwrap();
        let v0 = t.trove_info.sigs.sha1.value().copied().unwrap();
        t.trove_info.path_hashes.add_path("/new/path");
        t.compute_digests().unwrap();
        assert_eq!(t.trove_info.sigs.sha1.value().copied().unwrap(), v0);

        t.set_size(777);
        t.compute_digests().unwrap();
        assert_ne!(t.trove_info.sigs.sha1.value().copied().unwrap(), v0);
    }

    #[test]
    fn test_digest_coverage_v1_includes_path_hashes() {
        let mut t = trove();
        t.compute_digests().unwrap();
        let v1 = t.trove_info.sigs.digest_for(DigestVersion::V1).unwrap();
        t.trove_info.path_hashes.add_path("/new/path");
        t.compute_digests().unwrap();
        assert_ne!(
            t.trove_info.sigs.digest_for(DigestVersion::V1).unwrap(),
            v1
        );
    }

    #[test]
    fn test_multi_conversion_selects_v2() {
        let mut t = trove();
        t.trove_info
            .scripts
            .post_rollback
            .conversions
            .add(TroveScriptConversion::new_pair(1, 2))
            .unwrap();
        t.compute_digests().unwrap();
        assert!(t.trove_info.sigs.digest_for(DigestVersion::V1).is_some());
        assert!(t.trove_info.sigs.digest_for(DigestVersion::V2).is_none());

        t.trove_info
            .scripts
            .post_rollback
            .conversions
            .add(TroveScriptConversion::new_pair(2, 3))
            .unwrap();
        t.compute_digests().unwrap();
        assert!(t.trove_info.sigs.digest_for(DigestVersion::V1).is_none());
        assert!(t.trove_info.sigs.digest_for(DigestVersion::V2).is_some());
        assert!(t.verify_digests().unwrap());
    }

    #[test]
    fn test_schema_version_rules() {
        let t = trove();
        assert_eq!(t.trove_info.schema_version(), TROVE_VERSION);

        let removed = Trove::new_with_type(
            "foo",
            version("/h@ns:1/1:1.0-1"),
            Flavor::empty(),
            TroveType::Removed,
        )
        .unwrap();
        assert_eq!(removed.trove_info.schema_version(), TROVE_VERSION_1_1);

        let group_redirect = Trove::new_with_type(
            "group-dist",
            version("/h@ns:1/1:1.0-1"),
            Flavor::empty(),
            TroveType::Redirect,
        )
        .unwrap();
        assert_eq!(group_redirect.trove_info.schema_version(), TROVE_VERSION_1_1);

        let plain_redirect = Trove::new_with_type(
            "foo",
            version("/h@ns:1/1:1.0-1"),
            Flavor::empty(),
            TroveType::Redirect,
        )
        .unwrap();
        assert_eq!(plain_redirect.trove_info.schema_version(), TROVE_VERSION);
    }

    #[test]
    fn test_path_hashes_and_compatibility() {
        let mut a = trove();
        a.add_file([1u8; 16], "/bin/a", version("/h@ns:1/1:1.0-1-1"), [9u8; 20])
            .unwrap();
        a.compute_path_hashes();
        let mut b = Trove::new(
            "bar:runtime",
            version("/h@ns:1/1:1.0-1-1"),
            Flavor::empty(),
        )
        .unwrap();
        b.add_file([2u8; 16], "/bin/b", version("/h@ns:1/1:1.0-1-1"), [8u8; 20])
            .unwrap();
        b.compute_path_hashes();
        assert!(a.compatible_with(&b));

        b.add_file([3u8; 16], "/bin/a", version("/h@ns:1/1:1.0-1-1"), [7u8; 20])
            .unwrap();
        b.compute_path_hashes();
        assert!(!a.compatible_with(&b));
    }

    #[test]
    fn test_rollback_fence() {
        let mut t = trove();
        // same class: never a fence
        assert!(!t.is_rollback_fence(None, false));
        t.trove_info.compatibility_class.set(2);
        assert!(t.is_rollback_fence(Some(1), false));
        // a conversion script covering (2 -> 1) removes the fence
        t.trove_info
            .scripts
            .post_rollback
            .conversions
            .add(TroveScriptConversion::new_pair(2, 1))
            .unwrap();
        assert!(!t.is_rollback_fence(Some(1), false));
        assert!(t.is_rollback_fence(Some(3), false));
        assert!(!t.is_rollback_fence(Some(2), false));
    }
}
