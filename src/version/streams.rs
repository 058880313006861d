// src/version/streams.rs

//! Stream wrappers carrying version references
//!
//! [`FrozenVersionStream`] freezes with timestamps, unless the freeze is
//! running under a `versionStrings` skip; trove digests exclude
//! timestamps because the repository restamps versions at commit time, and
//! signing would otherwise be impossible before commit.
//! [`StringVersionStream`] never includes timestamps.

use crate::error::Result;
use crate::streams::{SkipSet, Stream};
use crate::version::Version;

/// Version reference frozen with timestamps
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FrozenVersionStream(pub Option<Version>);

impl FrozenVersionStream {
    pub fn new(version: Version) -> Self {
        Self(Some(version))
    }

    pub fn value(&self) -> Option<&Version> {
        self.0.as_ref()
    }

    pub fn set(&mut self, version: Option<Version>) {
        self.0 = version;
    }
}

impl Stream for FrozenVersionStream {
    fn freeze(&self, skip: &SkipSet) -> Result<Vec<u8>> {
        Ok(match &self.0 {
            None => Vec::new(),
            Some(version) if skip.contains("versionStrings") => {
                version.as_string().into_bytes()
            }
            Some(version) => version.freeze().into_bytes(),
        })
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        if frz.is_empty() {
            return Ok(Self(None));
        }
        let text = std::str::from_utf8(frz).map_err(|_| {
            crate::version::VersionParseError::UnbalancedPath(
                String::from_utf8_lossy(frz).into(),
            )
        })?;
        Ok(Self(Some(Version::thaw(text)?)))
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

/// Version reference frozen without timestamps
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StringVersionStream(pub Option<Version>);

impl StringVersionStream {
    pub fn new(version: Version) -> Self {
        Self(Some(version))
    }

    pub fn value(&self) -> Option<&Version> {
        self.0.as_ref()
    }

    pub fn set(&mut self, version: Option<Version>) {
        self.0 = version;
    }
}

impl Stream for StringVersionStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        Ok(match &self.0 {
            None => Vec::new(),
            Some(version) => version.as_string().into_bytes(),
        })
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        if frz.is_empty() {
            return Ok(Self(None));
        }
        let text = std::str::from_utf8(frz).map_err(|_| {
            crate::version::VersionParseError::UnbalancedPath(
                String::from_utf8_lossy(frz).into(),
            )
        })?;
        Ok(Self(Some(Version::parse(text)?)))
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

/// Ordered list of version references, frozen as NUL-joined strings
/// (no timestamps). Tracks clone lineages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VersionListStream(pub Vec<Version>);

impl VersionListStream {
    pub fn push(&mut self, version: Version) {
        self.0.push(version);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Stream for VersionListStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        let strings: Vec<String> = self.0.iter().map(|v| v.as_string()).collect();
        Ok(strings.join("\0").into_bytes())
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        if frz.is_empty() {
            return Ok(new);
        }
        let text = std::str::from_utf8(frz).map_err(|_| {
            crate::version::VersionParseError::UnbalancedPath(
                String::from_utf8_lossy(frz).into(),
            )
        })?;
        for part in text.split('\0') {
            new.0.push(Version::parse(part)?);
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
