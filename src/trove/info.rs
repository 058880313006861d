// src/trove/info.rs

//! TroveInfo: the dense metadata block nested inside every trove
//!
//! TroveInfo preserves unknown tags so that troves written by newer code
//! survive a round-trip through older code. Fields with tags above
//! [`TROVEINFO_TAG_INCOMPLETE`] postdate the version-0 signature design and
//! are excluded from version-0 digests wholesale.

use crate::flavor::FlavorsStream;
use crate::signature::TroveSignatures;
use crate::streams::set::stream_set;
use crate::streams::{
    ByteStream, IntStream, LongLongStream, OrderedStringsStream, PathHashes, ShortStream,
    SkipSet, Stream, StreamCollection, StringStream,
};
use crate::trove::metadata::Metadata;
use crate::trove::TroveTupleList;
use crate::error::{Error, Result};
use crate::version::streams::{StringVersionStream, VersionListStream};

/// Schema version of ordinary troves
pub const TROVE_VERSION: u32 = 10;
/// Schema version of removed troves and redirect groups
pub const TROVE_VERSION_1_1: u32 = 11;
/// Fields tagged above this postdate the version-0 signature design
pub const TROVEINFO_TAG_INCOMPLETE: u8 = 14;

const FLAG_COLLECTION: u8 = 1 << 0;
const FLAG_DERIVED: u8 = 1 << 1;
const FLAG_MISSING: u8 = 1 << 2;

/// Bit-set of trove properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TroveFlagsStream(ByteStream);

impl TroveFlagsStream {
    fn get_flag(&self, flag: u8) -> bool {
        self.0.value().is_some_and(|bits| bits & flag != 0)
    }

    fn set_flag(&mut self, flag: u8, on: bool) {
        let mut bits = self.0.value().unwrap_or(0);
        if on {
            bits |= flag;
        } else {
            bits &= !flag;
        }
        self.0.set(bits);
    }

    pub fn is_collection(&self) -> bool {
        self.get_flag(FLAG_COLLECTION)
    }

    pub fn set_collection(&mut self, on: bool) {
        self.set_flag(FLAG_COLLECTION, on);
    }

    pub fn is_derived(&self) -> bool {
        self.get_flag(FLAG_DERIVED)
    }

    pub fn set_derived(&mut self, on: bool) {
        self.set_flag(FLAG_DERIVED, on);
    }

    pub fn is_missing(&self) -> bool {
        self.get_flag(FLAG_MISSING)
    }

    pub fn set_missing(&mut self, on: bool) {
        self.set_flag(FLAG_MISSING, on);
    }
}

impl Stream for TroveFlagsStream {
    fn freeze(&self, skip: &SkipSet) -> Result<Vec<u8>> {
        self.0.freeze(skip)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        Ok(Self(ByteStream::thaw(frz)?))
    }

    fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
        self.0.diff(&them.0)
    }

    fn twm(&mut self, diff: &[u8], base: &Self) -> Result<bool> {
        self.0.twm(diff, &base.0)
    }
}

stream_set! {
    /// One compatibility-class conversion a script can perform
    pub struct TroveScriptConversion(Strict) {
        1 => old: ShortStream [Small, "old"],
        2 => new: ShortStream [Small, "new"],
    }
}

impl TroveScriptConversion {
    pub fn new_pair(old: u16, new: u16) -> Self {
        let mut conv = Self::default();
        conv.old.set(old);
        conv.new.set(new);
        conv
    }
}

/// The conversions a script covers
pub type TroveScriptConversions = StreamCollection<TroveScriptConversion>;

stream_set! {
    /// One trigger script: its body and the conversions it performs
    pub struct TroveScript(Preserve) {
        1 => script: StringStream [Large, "script"],
        2 => conversions: TroveScriptConversions [Large, "conversions"],
    }
}

impl TroveScript {
    pub fn is_set(&self) -> bool {
        !self.script.is_empty() || !self.conversions.is_empty()
    }
}

stream_set! {
    /// Per-trigger script block
    pub struct TroveScripts(Preserve) {
        1 => pre_update: TroveScript [Large, "preUpdate"],
        2 => post_install: TroveScript [Large, "postInstall"],
        3 => post_update: TroveScript [Large, "postUpdate"],
        4 => pre_rollback: TroveScript [Large, "preRollback"],
        5 => post_rollback: TroveScript [Large, "postRollback"],
        6 => pre_install: TroveScript [Large, "preInstall"],
        7 => pre_erase: TroveScript [Large, "preErase"],
        8 => post_erase: TroveScript [Large, "postErase"],
    }
}

impl TroveScripts {
    pub fn iter_scripts(&self) -> impl Iterator<Item = &TroveScript> {
        [
            &self.pre_update,
            &self.post_install,
            &self.post_update,
            &self.pre_rollback,
            &self.post_rollback,
            &self.pre_install,
            &self.pre_erase,
            &self.post_erase,
        ]
        .into_iter()
    }

    /// True when any script carries more than one conversion pair; such
    /// troves get version-2 digests instead of version-1
    pub fn has_multiple_conversions(&self) -> bool {
        self.iter_scripts()
            .any(|script| script.conversions.len() > 1)
    }

    /// True when a rollback script converts between the two classes
    pub fn covers_rollback(&self, old_class: u16, new_class: u16) -> bool {
        for script in [&self.pre_rollback, &self.post_rollback] {
            for conv in script.conversions.iter() {
                if conv.old.value() == Some(old_class) && conv.new.value() == Some(new_class) {
                    return true;
                }
            }
        }
        false
    }
}

/// File modification times, index-aligned with the sorted pathId list.
/// Always merges; never compares unequal widths as a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TroveMtimes(pub Vec<u32>);

impl TroveMtimes {
    pub fn push(&mut self, mtime: u32) {
        self.0.push(mtime);
    }
}

impl Stream for TroveMtimes {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.0.len() * 4);
        for mtime in &self.0 {
            out.extend_from_slice(&mtime.to_be_bytes());
        }
        Ok(out)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        if frz.len() % 4 != 0 {
            return Err(Error::InvalidSize {
                field: "TroveMtimes",
                expected: 4,
                got: frz.len() % 4,
            });
        }
        Ok(Self(
            frz.chunks_exact(4)
                .map(|chunk| u32::from_be_bytes(chunk.try_into().unwrap()))
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

stream_set! {
    /// Foreign-package payload descriptor. Only the kind is modeled here;
    /// everything else a capsule carries is preserved as unknown records.
    pub struct TroveCapsule(Preserve) {
        0 => kind: StringStream [Small, "type"],
    }
}

stream_set! {
    /// The troveInfo block. Unknown tags are preserved and re-emitted, so
    /// newer producers' fields survive.
    pub struct TroveInfo(Preserve) {
        0 => size: LongLongStream [Small, "size"],
        1 => source_name: StringStream [Small, "sourceName"],
        2 => build_time: LongLongStream [Small, "buildTime"],
        3 => conary_version: StringStream [Small, "conaryVersion"],
        4 => build_reqs: TroveTupleList [Large, "buildReqs"],
        5 => loaded_troves: TroveTupleList [Large, "loadedTroves"],
        7 => flags: TroveFlagsStream [Small, "flags"],
        8 => cloned_from: StringVersionStream [Small, "clonedFrom"],
        9 => sigs: TroveSignatures [Large, "sigs"],
        10 => path_hashes: PathHashes [Large, "pathHashes"],
        11 => label_path: OrderedStringsStream [Small, "labelPath"],
        12 => policy_providers: TroveTupleList [Large, "policyProviders"],
        13 => trove_version: IntStream [Small, "troveVersion"],
        14 => incomplete: ByteStream [Small, "incomplete"],
        15 => dir_hashes: PathHashes [Large, "dirHashes"],
        16 => scripts: TroveScripts [Large, "scripts"],
        17 => metadata: Metadata [Large, "metadata"],
        18 => complete_fixup: ByteStream [Small, "completeFixup"],
        19 => compatibility_class: ShortStream [Small, "compatibilityClass"],
        20 => build_flavor: FlavorsStream [Large, "buildFlavor"],
        21 => cloned_from_list: VersionListStream [Large, "clonedFromList"],
        22 => capsule: TroveCapsule [Large, "capsule"],
        23 => mtimes: TroveMtimes [Large, "mtimes"],
        24 => factory: StringStream [Small, "factory"],
        26 => derived_from: TroveTupleList [Large, "derivedFrom"],
        27 => image_group: ByteStream [Small, "imageGroup"],
        28 => search_path: OrderedStringsStream [Large, "searchPath"],
    }
}

impl TroveInfo {
    /// Wire names of every field the version-0 signature design does not
    /// know about
    pub fn post_v0_field_names() -> impl Iterator<Item = &'static str> {
        Self::FIELDS
            .iter()
            .filter(|(tag, _)| *tag > TROVEINFO_TAG_INCOMPLETE)
            .map(|(_, name)| *name)
    }

    /// The declared schema version, defaulting to [`TROVE_VERSION`]
    pub fn schema_version(&self) -> u32 {
        self.trove_version.value().unwrap_or(TROVE_VERSION)
    }
}

/// Pull one field out of a frozen TroveInfo blob without a full thaw
pub fn frozen_trove_info_field<T: Stream>(tag: u8, frz: &[u8]) -> Result<Option<T>> {
    crate::streams::find_stream(tag, frz, "TroveInfo")
}
