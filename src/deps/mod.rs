// src/deps/mod.rs

//! Dependency sets for requires/provides tracking
//!
//! Dependencies are grouped by typed class, each with its own textual
//! prefix:
//!
//! - `trove: foo:runtime` refers to another trove
//! - `soname: libssl.so.3(SSLEAY)` is a shared library, flags are version tags
//! - `file: /usr/bin/python3` is a path that must exist
//! - `abi: x86_64(SysV)` is an ABI compatibility tag
//! - `python: requests` / `perl: DBI` are language modules
//!
//! The frozen form is the sorted, newline-separated text rendering, so
//! equal sets always freeze identically. Resolution lives elsewhere; this
//! module only stores, compares, and answers `satisfies`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::streams::{SkipSet, Stream};

/// Dependency classes, each a distinct namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyClass {
    /// ABI compatibility tag
    Abi,
    /// A file that must exist
    File,
    /// Shared library soname
    Soname,
    /// Another trove
    Trove,
    /// Python module
    Python,
    /// Perl module
    Perl,
    /// Use flag advertised by the build
    Use,
}

impl DependencyClass {
    /// The textual prefix for this class
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Abi => "abi",
            Self::File => "file",
            Self::Soname => "soname",
            Self::Trove => "trove",
            Self::Python => "python",
            Self::Perl => "perl",
            Self::Use => "use",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "abi" => Some(Self::Abi),
            "file" => Some(Self::File),
            "soname" => Some(Self::Soname),
            "trove" => Some(Self::Trove),
            "python" => Some(Self::Python),
            "perl" => Some(Self::Perl),
            "use" => Some(Self::Use),
            _ => None,
        }
    }
}

impl fmt::Display for DependencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// One dependency: class, name, and flags
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency {
    pub class: DependencyClass,
    pub name: String,
    pub flags: BTreeSet<String>,
}

impl Dependency {
    pub fn new(class: DependencyClass, name: impl Into<String>) -> Self {
        Self {
            class,
            name: name.into(),
            flags: BTreeSet::new(),
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.name)?;
        if !self.flags.is_empty() {
            let flags: Vec<&str> = self.flags.iter().map(|s| s.as_str()).collect();
            write!(f, "({})", flags.join(" "))?;
        }
        Ok(())
    }
}

impl FromStr for Dependency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (prefix, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::DependencyParse(s.to_string()))?;
        let class = DependencyClass::from_prefix(prefix.trim())
            .ok_or_else(|| Error::DependencyParse(s.to_string()))?;
        let rest = rest.trim();
        let (name, flags) = match rest.split_once('(') {
            Some((name, flag_part)) => {
                let flag_part = flag_part
                    .strip_suffix(')')
                    .ok_or_else(|| Error::DependencyParse(s.to_string()))?;
                let flags: BTreeSet<String> = flag_part
                    .split_whitespace()
                    .map(|f| f.to_string())
                    .collect();
                (name.trim(), flags)
            }
            None => (rest, BTreeSet::new()),
        };
        if name.is_empty() {
            return Err(Error::DependencyParse(s.to_string()));
        }
        Ok(Self {
            class,
            name: name.to_string(),
            flags,
        })
    }
}

/// A set of dependencies, deduplicated by (class, name) with merged flags
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct DependencySet {
    deps: BTreeMap<(DependencyClass, String), BTreeSet<String>>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency; flags merge when the (class, name) pair repeats
    pub fn add(&mut self, dep: Dependency) {
        self.deps
            .entry((dep.class, dep.name))
            .or_default()
            .extend(dep.flags);
    }

    pub fn contains(&self, class: DependencyClass, name: &str) -> bool {
        self.deps.contains_key(&(class, name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = Dependency> + '_ {
        self.deps.iter().map(|((class, name), flags)| Dependency {
            class: *class,
            name: name.clone(),
            flags: flags.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Parse the frozen text form
    pub fn parse(s: &str) -> Result<Self> {
        let mut set = Self::new();
        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            set.add(line.parse()?);
        }
        Ok(set)
    }

    /// True when this set (as provides) covers every entry of `requires`:
    /// same class and name present, with the required flags a subset of
    /// the provided flags
    pub fn satisfies(&self, requires: &DependencySet) -> bool {
        requires.deps.iter().all(|(key, wanted_flags)| {
            self.deps
                .get(key)
                .is_some_and(|have| wanted_flags.is_subset(have))
        })
    }
}

impl fmt::Display for DependencySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for dep in self.iter() {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{}", dep)?;
            first = false;
        }
        Ok(())
    }
}

/// Stream wrapper around a [`DependencySet`]; diffs are absolute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DependenciesStream(pub DependencySet);

impl DependenciesStream {
    pub fn new(deps: DependencySet) -> Self {
        Self(deps)
    }

    pub fn value(&self) -> &DependencySet {
        &self.0
    }

    pub fn set(&mut self, deps: DependencySet) {
        self.0 = deps;
    }
}

impl Stream for DependenciesStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        Ok(self.0.to_string().into_bytes())
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(frz)
            .map_err(|_| Error::DependencyParse(String::from_utf8_lossy(frz).into()))?;
        Ok(Self(DependencySet::parse(text)?))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_text_roundtrip() {
        let dep = Dependency::new(DependencyClass::Soname, "libssl.so.3")
            .with_flag("SSLEAY")
            .with_flag("OPENSSL_3.0.0");
        let text = dep.to_string();
        assert_eq!(text, "soname: libssl.so.3(OPENSSL_3.0.0 SSLEAY)");
        assert_eq!(text.parse::<Dependency>().unwrap(), dep);
    }

    #[test]
    fn test_dependency_parse_errors() {
        assert!("noclass".parse::<Dependency>().is_err());
        assert!("bogus: name".parse::<Dependency>().is_err());
        assert!("file: ".parse::<Dependency>().is_err());
        assert!("soname: lib(unclosed".parse::<Dependency>().is_err());
    }

    #[test]
    fn test_set_freeze_is_sorted() {
        let mut set = DependencySet::new();
        set.add(Dependency::new(DependencyClass::Trove, "zsh:runtime"));
        set.add(Dependency::new(DependencyClass::File, "/bin/sh"));
        let text = set.to_string();
        assert_eq!(text, "file: /bin/sh\ntrove: zsh:runtime");
        assert_eq!(DependencySet::parse(&text).unwrap(), set);
    }

    #[test]
    fn test_flags_merge() {
        let mut set = DependencySet::new();
        set.add(Dependency::new(DependencyClass::Soname, "libc.so.6").with_flag("GLIBC_2.2"));
        set.add(Dependency::new(DependencyClass::Soname, "libc.so.6").with_flag("GLIBC_2.3"));
        assert_eq!(set.len(), 1);
        let dep = set.iter().next().unwrap();
        assert_eq!(dep.flags.len(), 2);
    }

    #[test]
    fn test_satisfies() {
        let mut provides = DependencySet::new();
        provides.add(
            Dependency::new(DependencyClass::Soname, "libz.so.1")
                .with_flag("ZLIB_1.2")
                .with_flag("ZLIB_1.3"),
        );
        let mut requires = DependencySet::new();
        requires.add(Dependency::new(DependencyClass::Soname, "libz.so.1").with_flag("ZLIB_1.2"));
        assert!(provides.satisfies(&requires));

        requires.add(Dependency::new(DependencyClass::File, "/bin/true"));
        assert!(!provides.satisfies(&requires));
    }

    #[test]
    fn test_stream_roundtrip_and_absolute_diff() {
        let mut set = DependencySet::new();
        set.add(Dependency::new(DependencyClass::Abi, "x86_64").with_flag("SysV"));
        let stream = DependenciesStream::new(set);
        let frz = stream.freeze(&SkipSet::new()).unwrap();
        assert_eq!(DependenciesStream::thaw(&frz).unwrap(), stream);

        let empty = DependenciesStream::default();
        let d = stream.diff(&empty).unwrap().unwrap();
        let mut merged = empty.clone();
        assert!(!merged.twm(&d, &empty).unwrap());
        assert_eq!(merged, stream);
        assert!(stream.diff(&stream).unwrap().is_none());
    }
}
