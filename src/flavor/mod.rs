// src/flavor/mod.rs

//! Flavors: typed feature-flag sets with a partial-order scoring function
//!
//! A flavor records the build-time variation of a trove: use flags and an
//! instruction-set class. Syntax: `ssl,!debug,~vmware is: x86_64`
//!
//! # Flag senses
//!
//! - no prefix: required, built *for* systems with the feature
//! - `!`: disallowed, built for systems *without* it
//! - `~`: preferred, a soft positive
//! - `~!`: prefer-not, a soft negative
//!
//! `score` compares two flavors: `None` means incompatible (a hard flag on
//! one side contradicts the other, or the instruction sets differ); higher
//! scores mean better matches. The canonical text form (flags sorted,
//! instruction set last) doubles as the frozen form, so equal flavors
//! always freeze identically.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Result;
use crate::streams::{SkipSet, Stream};

/// Sense of a single flavor flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlagSense {
    /// Built for systems with this feature (no prefix)
    Required,
    /// Built for systems without this feature (`!`)
    Disallowed,
    /// Soft positive (`~`)
    Preferred,
    /// Soft negative (`~!`)
    PreferNot,
}

impl FlagSense {
    /// The string prefix for this sense
    pub fn as_prefix(&self) -> &'static str {
        match self {
            Self::Required => "",
            Self::Disallowed => "!",
            Self::Preferred => "~",
            Self::PreferNot => "~!",
        }
    }

    /// Split a flag string into its sense and name
    pub fn parse_with_name(s: &str) -> std::result::Result<(Self, &str), FlavorParseError> {
        let s = s.trim();
        let (sense, name) = if let Some(rest) = s.strip_prefix("~!") {
            (Self::PreferNot, rest)
        } else if let Some(rest) = s.strip_prefix('~') {
            (Self::Preferred, rest)
        } else if let Some(rest) = s.strip_prefix('!') {
            (Self::Disallowed, rest)
        } else {
            (Self::Required, s)
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(FlavorParseError::EmptyFlag(s.to_string()));
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_')
        {
            return Err(FlavorParseError::InvalidFlag(name.to_string()));
        }
        Ok((sense, name))
    }

    fn is_hard(&self) -> bool {
        matches!(self, Self::Required | Self::Disallowed)
    }

    fn is_positive(&self) -> bool {
        matches!(self, Self::Required | Self::Preferred)
    }
}

/// A flavor: use flags plus an instruction-set dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Flavor {
    uses: BTreeMap<String, FlagSense>,
    insn_sets: BTreeMap<String, FlagSense>,
}

impl Flavor {
    /// The empty flavor
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse from the canonical text form; the empty string is the empty
    /// flavor
    pub fn parse(s: &str) -> std::result::Result<Self, FlavorParseError> {
        let s = s.trim();
        let mut flavor = Self::default();
        if s.is_empty() {
            return Ok(flavor);
        }

        let (flag_part, insn_part) = match s.find("is:") {
            Some(pos) => (&s[..pos], Some(&s[pos + 3..])),
            None => (s, None),
        };

        for item in flag_part.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let (sense, name) = FlagSense::parse_with_name(item)?;
            flavor.uses.insert(name.to_string(), sense);
        }

        if let Some(insn_part) = insn_part {
            for arch in insn_part.split_whitespace() {
                let (sense, name) = FlagSense::parse_with_name(arch)?;
                flavor.insn_sets.insert(name.to_string(), sense);
            }
            if flavor.insn_sets.is_empty() {
                return Err(FlavorParseError::EmptyInstructionSet(s.to_string()));
            }
        }

        Ok(flavor)
    }

    /// Set a use flag
    pub fn add_use(&mut self, name: impl Into<String>, sense: FlagSense) {
        self.uses.insert(name.into(), sense);
    }

    /// Set an instruction-set entry
    pub fn add_insn_set(&mut self, name: impl Into<String>, sense: FlagSense) {
        self.insn_sets.insert(name.into(), sense);
    }

    pub fn is_empty(&self) -> bool {
        self.uses.is_empty() && self.insn_sets.is_empty()
    }

    /// Canonical frozen form: the text rendering as bytes
    pub fn freeze_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Compatibility score between two flavors.
    ///
    /// `None` means incompatible: the instruction sets name different
    /// architectures, or a hard flag on one side contradicts a hard flag on
    /// the other. Otherwise a sum over the flags: exact hard agreement
    /// scores highest, hard/soft agreement next, soft agreement least;
    /// flags present on one side only contribute nothing. Symmetric.
    pub fn score(&self, other: &Flavor) -> Option<i32> {
        let mut total = 0i32;

        if !self.insn_sets.is_empty() && !other.insn_sets.is_empty() {
            let ours: Vec<&String> = self.insn_sets.keys().collect();
            let theirs: Vec<&String> = other.insn_sets.keys().collect();
            if ours != theirs {
                return None;
            }
            total += 3 * ours.len() as i32;
        }

        for (name, ours) in &self.uses {
            let Some(theirs) = other.uses.get(name) else {
                continue;
            };
            if ours.is_positive() != theirs.is_positive() {
                if ours.is_hard() && theirs.is_hard() {
                    return None;
                }
                continue;
            }
            total += match (ours.is_hard(), theirs.is_hard()) {
                (true, true) => 3,
                (true, false) | (false, true) => 2,
                (false, false) => 1,
            };
        }

        Some(total)
    }

    /// True when this flavor can stand in for `other`: the two are
    /// compatible, every hard-required flag of `other` is present
    /// positively here, and no hard-disallowed flag of `other` is required
    /// here.
    pub fn satisfies(&self, other: &Flavor) -> bool {
        if self.score(other).is_none() {
            return false;
        }
        for (name, sense) in &other.uses {
            match sense {
                FlagSense::Required => {
                    if !self.uses.get(name).is_some_and(|s| s.is_positive()) {
                        return false;
                    }
                }
                FlagSense::Disallowed => {
                    if self.uses.get(name) == Some(&FlagSense::Required) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, sense) in &self.uses {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}{}", sense.as_prefix(), name)?;
            first = false;
        }
        if !self.insn_sets.is_empty() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "is:")?;
            for (name, sense) in &self.insn_sets {
                write!(f, " {}{}", sense.as_prefix(), name)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Flavor {
    type Err = FlavorParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Flavor::parse(s)
    }
}

/// Errors from parsing flavor strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlavorParseError {
    /// A flag has a prefix but no name
    EmptyFlag(String),
    /// Invalid characters in a flag name
    InvalidFlag(String),
    /// `is:` with no architectures
    EmptyInstructionSet(String),
}

impl fmt::Display for FlavorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFlag(s) => write!(f, "Empty flavor flag: {}", s),
            Self::InvalidFlag(s) => write!(f, "Invalid flavor flag: {}", s),
            Self::EmptyInstructionSet(s) => write!(f, "Empty instruction set in flavor: {}", s),
        }
    }
}

impl std::error::Error for FlavorParseError {}

/// Stream wrapper carrying a flavor; the frozen form is the canonical text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FlavorsStream(pub Flavor);

impl FlavorsStream {
    pub fn new(flavor: Flavor) -> Self {
        Self(flavor)
    }

    pub fn value(&self) -> &Flavor {
        &self.0
    }

    pub fn set(&mut self, flavor: Flavor) {
        self.0 = flavor;
    }
}

impl Stream for FlavorsStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        Ok(self.0.freeze_bytes())
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(frz)
            .map_err(|_| FlavorParseError::InvalidFlag(String::from_utf8_lossy(frz).into()))
            .map_err(crate::error::Error::from)?;
        Ok(Self(Flavor::parse(text).map_err(crate::error::Error::from)?))
    }

    fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
        if self.0 == them.0 {
            return Ok(None);
        }
        Ok(Some(self.0.freeze_bytes()))
    }

    fn twm(&mut self, diff: &[u8], _base: &Self) -> Result<bool> {
        *self = Self::thaw(diff)?;
        Ok(false)
    }
}

/// Like [`FlavorsStream`], but distinguishes *unset* (frozen as one NUL
/// byte) from the *empty flavor* (frozen as no bytes)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionalFlavorStream(pub Option<Flavor>);

impl OptionalFlavorStream {
    pub fn value(&self) -> Option<&Flavor> {
        self.0.as_ref()
    }

    pub fn set(&mut self, flavor: Option<Flavor>) {
        self.0 = flavor;
    }
}

impl Default for OptionalFlavorStream {
    fn default() -> Self {
        // the zero-byte frozen form is the empty flavor, not unset
        Self(Some(Flavor::empty()))
    }
}

impl Stream for OptionalFlavorStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        Ok(match &self.0 {
            None => vec![0u8],
            Some(flavor) => flavor.freeze_bytes(),
        })
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        if frz == [0u8] {
            return Ok(Self(None));
        }
        let inner = FlavorsStream::thaw(frz)?;
        Ok(Self(Some(inner.0)))
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
