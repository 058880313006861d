// src/streams/primitives.rs

//! Primitive streams: integers, strings, string lists, digests, path hashes
//!
//! These are the leaves of every composite stream. Numeric and string
//! streams diff absolutely (the diff is the new frozen form); `twm` applies
//! the usual three-way rule: take the diff when unchanged relative to base,
//! conflict when both sides moved apart.

use crate::digest::{PATH_HASH_LEN, SHA1_LEN, SHA256_LEN, path_hash};
use crate::error::{Error, Result};
use crate::streams::{SkipSet, Stream, read_dyn_size, take, write_size, SizeType};

use std::collections::BTreeSet;

macro_rules! numeric_stream {
    ($(#[$meta:meta])* $name:ident, $ty:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(Option<$ty>);

        impl $name {
            pub fn new(val: $ty) -> Self {
                Self(Some(val))
            }

            pub fn value(&self) -> Option<$ty> {
                self.0
            }

            pub fn set(&mut self, val: $ty) {
                self.0 = Some(val);
            }

            pub fn clear(&mut self) {
                self.0 = None;
            }

            pub fn is_set(&self) -> bool {
                self.0.is_some()
            }
        }

        impl Stream for $name {
            fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
                Ok(match self.0 {
                    None => Vec::new(),
                    Some(val) => val.to_be_bytes().to_vec(),
                })
            }

            fn thaw(frz: &[u8]) -> Result<Self> {
                if frz.is_empty() {
                    return Ok(Self(None));
                }
                let arr: [u8; size_of::<$ty>()] =
                    frz.try_into().map_err(|_| Error::InvalidSize {
                        field: stringify!($name),
                        expected: size_of::<$ty>(),
                        got: frz.len(),
                    })?;
                Ok(Self(Some(<$ty>::from_be_bytes(arr))))
            }

            fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
                if self.0 == them.0 {
                    return Ok(None);
                }
                self.freeze(&SkipSet::new()).map(Some)
            }

            fn twm(&mut self, diff: &[u8], base: &Self) -> Result<bool> {
                let new = Self::thaw(diff)?;
                if self.0 == base.0 {
                    *self = new;
                    Ok(false)
                } else {
                    Ok(self.0 != new.0)
                }
            }
        }
    };
}

numeric_stream!(
    /// One-byte unsigned integer stream
    ByteStream, u8
);
numeric_stream!(
    /// Two-byte unsigned integer stream
    ShortStream, u16
);
numeric_stream!(
    /// Four-byte unsigned integer stream
    IntStream, u32
);
numeric_stream!(
    /// Eight-byte unsigned integer stream
    LongLongStream, u64
);

/// A 32-bit timestamp that always compares equal and never conflicts on
/// merge, so modification times flow freely through three-way merges.
#[derive(Debug, Clone, Copy, Default)]
pub struct MtimeStream(Option<u32>);

impl MtimeStream {
    pub fn new(val: u32) -> Self {
        Self(Some(val))
    }

    pub fn value(&self) -> Option<u32> {
        self.0
    }

    pub fn set(&mut self, val: u32) {
        self.0 = Some(val);
    }
}

impl PartialEq for MtimeStream {
    fn eq(&self, _other: &Self) -> bool {
        // mtimes never compare
        true
    }
}

impl Eq for MtimeStream {}

impl Stream for MtimeStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        Ok(match self.0 {
            None => Vec::new(),
            Some(val) => val.to_be_bytes().to_vec(),
        })
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        if frz.is_empty() {
            return Ok(Self(None));
        }
        let arr: [u8; 4] = frz.try_into().map_err(|_| Error::InvalidSize {
            field: "MtimeStream",
            expected: 4,
            got: frz.len(),
        })?;
        Ok(Self(Some(u32::from_be_bytes(arr))))
    }

    fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
        if self.0 == them.0 {
            return Ok(None);
        }
        self.freeze(&SkipSet::new()).map(Some)
    }

    fn twm(&mut self, diff: &[u8], base: &Self) -> Result<bool> {
        let new = Self::thaw(diff)?;
        if self.0 == base.0 {
            *self = new;
        }
        // mtimes never fail a merge
        Ok(false)
    }
}

/// Raw byte string; the unset state is the empty string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StringStream(Vec<u8>);

impl StringStream {
    pub fn new(val: impl Into<Vec<u8>>) -> Self {
        Self(val.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    pub fn set(&mut self, val: impl Into<Vec<u8>>) {
        self.0 = val.into();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Stream for StringStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        Ok(Self(frz.to_vec()))
    }

    fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
        if self.0 == them.0 {
            return Ok(None);
        }
        Ok(Some(self.0.clone()))
    }

    fn twm(&mut self, diff: &[u8], base: &Self) -> Result<bool> {
        if self.0 == base.0 {
            self.0 = diff.to_vec();
            Ok(false)
        } else {
            Ok(self.0 != diff)
        }
    }
}

/// Unordered set of strings, frozen as NUL-separated sorted entries.
/// Diffs are absolute, so merges never conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StringsStream(BTreeSet<Vec<u8>>);

impl StringsStream {
    pub fn add(&mut self, val: impl Into<Vec<u8>>) {
        self.0.insert(val.into());
    }

    pub fn contains(&self, val: &[u8]) -> bool {
        self.0.contains(val)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Stream for StringsStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        let entries: Vec<&[u8]> = self.0.iter().map(|v| v.as_slice()).collect();
        Ok(entries.join(&0u8))
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        if !frz.is_empty() {
            for entry in frz.split(|&b| b == 0) {
                new.0.insert(entry.to_vec());
            }
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

/// Like [`StringsStream`] but insertion order is preserved and duplicates
/// are allowed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct OrderedStringsStream(Vec<Vec<u8>>);

impl OrderedStringsStream {
    pub fn add(&mut self, val: impl Into<Vec<u8>>) {
        self.0.push(val.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Stream for OrderedStringsStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        let entries: Vec<&[u8]> = self.0.iter().map(|v| v.as_slice()).collect();
        Ok(entries.join(&0u8))
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        if !frz.is_empty() {
            for entry in frz.split(|&b| b == 0) {
                new.0.push(entry.to_vec());
            }
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

/// Ordered list of binary strings, each length-prefixed with the dynamic
/// 1/2/4-byte size encoding. Entries may contain NUL bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct OrderedBinaryStringsStream(Vec<Vec<u8>>);

impl OrderedBinaryStringsStream {
    pub fn add(&mut self, val: impl Into<Vec<u8>>) {
        self.0.push(val.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Stream for OrderedBinaryStringsStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for entry in &self.0 {
            write_size(&mut out, SizeType::Dynamic, entry.len())?;
            out.extend_from_slice(entry);
        }
        Ok(out)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        let mut pos = 0;
        while pos < frz.len() {
            let len = read_dyn_size(frz, &mut pos, "OrderedBinaryStringsStream")?;
            let entry = take(frz, &mut pos, len, "OrderedBinaryStringsStream")?;
            new.0.push(entry.to_vec());
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

macro_rules! digest_stream {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(Option<[u8; $len]>);

        impl $name {
            pub fn new(digest: [u8; $len]) -> Self {
                Self(Some(digest))
            }

            pub fn value(&self) -> Option<&[u8; $len]> {
                self.0.as_ref()
            }

            pub fn set(&mut self, digest: [u8; $len]) {
                self.0 = Some(digest);
            }

            pub fn clear(&mut self) {
                self.0 = None;
            }

            pub fn is_set(&self) -> bool {
                self.0.is_some()
            }
        }

        impl Stream for $name {
            fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
                Ok(match &self.0 {
                    None => Vec::new(),
                    Some(digest) => digest.to_vec(),
                })
            }

            fn thaw(frz: &[u8]) -> Result<Self> {
                if frz.is_empty() {
                    return Ok(Self(None));
                }
                let arr: [u8; $len] = frz.try_into().map_err(|_| Error::InvalidSize {
                    field: stringify!($name),
                    expected: $len,
                    got: frz.len(),
                })?;
                Ok(Self(Some(arr)))
            }

            fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
                if self.0 == them.0 {
                    return Ok(None);
                }
                self.freeze(&SkipSet::new()).map(Some)
            }

            fn twm(&mut self, diff: &[u8], base: &Self) -> Result<bool> {
                let new = Self::thaw(diff)?;
                if self.0 == base.0 {
                    *self = new;
                    Ok(false)
                } else {
                    Ok(self.0 != new.0)
                }
            }
        }
    };
}

digest_stream!(
    /// Exactly 20 bytes of SHA-1 digest (or unset)
    Sha1Stream, SHA1_LEN
);
digest_stream!(
    /// Exactly 32 bytes of non-standard SHA-256 digest (or unset)
    NonStandardSha256Stream, SHA256_LEN
);

/// Like [`Sha1Stream`] but diffs absolutely, so an unset digest can
/// overwrite a set one (the zero-length diff)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AbsoluteSha1Stream(pub Sha1Stream);

impl AbsoluteSha1Stream {
    pub fn new(digest: [u8; SHA1_LEN]) -> Self {
        Self(Sha1Stream::new(digest))
    }

    pub fn value(&self) -> Option<&[u8; SHA1_LEN]> {
        self.0.value()
    }

    pub fn set(&mut self, digest: [u8; SHA1_LEN]) {
        self.0.set(digest);
    }

    pub fn is_set(&self) -> bool {
        self.0.is_set()
    }
}

impl Stream for AbsoluteSha1Stream {
    fn freeze(&self, skip: &SkipSet) -> Result<Vec<u8>> {
        self.0.freeze(skip)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        Ok(Self(Sha1Stream::thaw(frz)?))
    }

    fn diff(&self, _them: &Self) -> Result<Option<Vec<u8>>> {
        // always absolute
        self.freeze(&SkipSet::new()).map(Some)
    }

    fn twm(&mut self, diff: &[u8], _base: &Self) -> Result<bool> {
        *self = Self::thaw(diff)?;
        Ok(false)
    }
}

/// Set of 8-byte tokens, each the first 8 bytes of the MD5 of a path.
///
/// Frozen form is the sorted concatenation of the tokens. The diff format
/// is `be_u32(numAdded) | added tokens | removed tokens`; the removal count
/// is implied by the total length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PathHashes(BTreeSet<[u8; PATH_HASH_LEN]>);

impl PathHashes {
    pub fn add(&mut self, token: [u8; PATH_HASH_LEN]) {
        self.0.insert(token);
    }

    /// Hash a path and add its token
    pub fn add_path(&mut self, path: &str) {
        self.0.insert(path_hash(path));
    }

    pub fn contains(&self, token: &[u8; PATH_HASH_LEN]) -> bool {
        self.0.contains(token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8; PATH_HASH_LEN]> {
        self.0.iter()
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

    /// True when the two sets share no tokens; disjoint path sets mean the
    /// troves can coexist on disk
    pub fn compatible_with(&self, other: &PathHashes) -> bool {
        self.0.is_disjoint(&other.0)
    }

    /// True when the two sets share at least one token
    pub fn overlaps(&self, other: &PathHashes) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    /// Union in place
    pub fn merge(&mut self, other: &PathHashes) {
        self.0.extend(other.0.iter().copied());
    }

    fn parse_tokens(data: &[u8]) -> Result<Vec<[u8; PATH_HASH_LEN]>> {
        if data.len() % PATH_HASH_LEN != 0 {
            return Err(Error::InvalidSize {
                field: "PathHashes",
                expected: PATH_HASH_LEN,
                got: data.len() % PATH_HASH_LEN,
            });
        }
        Ok(data
            .chunks_exact(PATH_HASH_LEN)
            .map(|chunk| chunk.try_into().unwrap())
            .collect())
    }
}

impl Stream for PathHashes {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.0.len() * PATH_HASH_LEN);
        for token in &self.0 {
            out.extend_from_slice(token);
        }
        Ok(out)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        Ok(Self(Self::parse_tokens(frz)?.into_iter().collect()))
    }

    fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
        if self.0 == them.0 {
            return Ok(None);
        }
        let added: Vec<_> = self.0.difference(&them.0).collect();
        let removed: Vec<_> = them.0.difference(&self.0).collect();
        let mut out = Vec::with_capacity(4 + (added.len() + removed.len()) * PATH_HASH_LEN);
        out.extend_from_slice(&(added.len() as u32).to_be_bytes());
        for token in added {
            out.extend_from_slice(token);
        }
        for token in removed {
            out.extend_from_slice(token);
        }
        Ok(Some(out))
    }

    fn twm(&mut self, diff: &[u8], base: &Self) -> Result<bool> {
        if self.0 != base.0 {
            return Ok(true);
        }
        if diff.len() < 4 {
            return Err(Error::Truncated("PathHashes"));
        }
        let num_added = u32::from_be_bytes(diff[..4].try_into().unwrap()) as usize;
        let tokens = Self::parse_tokens(&diff[4..])?;
        if num_added > tokens.len() {
            return Err(Error::Truncated("PathHashes"));
        }
        for token in &tokens[num_added..] {
            self.0.remove(token);
        }
        for token in &tokens[..num_added] {
            self.0.insert(*token);
        }
        Ok(false)
    }
}
