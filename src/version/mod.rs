// src/version/mod.rs

//! Version paths: labels, revisions, and the frozen forms troves store
//!
//! A version is an alternating path of labels and revisions:
//!
//! `/conary.example.com@rpl:2/1.2-3` is revision `1.2-3` on the label
//! `conary.example.com@rpl:2`; branches of branches extend the path
//! (`/host@ns:a/1.2-3/host@ns:b/1.2-3.1`).
//!
//! # Components
//!
//! - **Label**: `host@namespace:tag`, where a package was committed
//! - **Revision**: `version-sourceCount[-buildCount]`, plus a microsecond
//!   timestamp assigned by the repository at commit time
//!
//! Two textual forms exist: `asString` (no timestamps) and the *frozen*
//! form, which prefixes each revision with its timestamp
//! (`/host@ns:tag/1431104547000000:1.2-3`). Timestamps never participate in
//! equality; they order revisions within a branch.

pub mod streams;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A label identifying where on a repository a version lives
///
/// Format: `host@namespace:tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    /// Repository hostname
    pub host: String,
    /// Namespace within the repository
    pub namespace: String,
    /// Branch tag
    pub tag: String,
}

impl Label {
    /// Create a new label
    pub fn new(
        host: impl Into<String>,
        namespace: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            namespace: namespace.into(),
            tag: tag.into(),
        }
    }

    /// Parse a label from `host@namespace:tag` format
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let at_pos = s
            .find('@')
            .ok_or_else(|| VersionParseError::MissingAt(s.to_string()))?;
        let colon_pos = s[at_pos..]
            .find(':')
            .map(|p| at_pos + p)
            .ok_or_else(|| VersionParseError::MissingColon(s.to_string()))?;

        let host = &s[..at_pos];
        let namespace = &s[at_pos + 1..colon_pos];
        let tag = &s[colon_pos + 1..];

        if host.is_empty() || namespace.is_empty() || tag.is_empty() {
            return Err(VersionParseError::EmptyLabelComponent(s.to_string()));
        }

        let valid = |c: char| c.is_alphanumeric() || c == '.' || c == '-' || c == '_';
        if !host.chars().all(valid) || !namespace.chars().all(valid) || !tag.chars().all(valid) {
            return Err(VersionParseError::InvalidLabel(s.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            namespace: namespace.to_string(),
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.host, self.namespace, self.tag)
    }
}

impl FromStr for Label {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::parse(s)
    }
}

/// A revision: upstream version plus source and optional build counts,
/// stamped with the repository commit time in microseconds
#[derive(Debug, Clone)]
pub struct Revision {
    pub version: String,
    pub source_count: String,
    pub build_count: Option<String>,
    /// Commit time in microseconds; 0 when the version came from a bare
    /// string rather than a frozen form
    pub timestamp: u64,
}

impl Revision {
    pub fn new(
        version: impl Into<String>,
        source_count: impl Into<String>,
        build_count: Option<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            version: version.into(),
            source_count: source_count.into(),
            build_count,
            timestamp,
        }
    }

    /// Parse `version-sourceCount[-buildCount]`, without a timestamp
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() < 2 || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(VersionParseError::InvalidRevision(s.to_string()));
        }
        Ok(Self {
            version: parts[0].to_string(),
            source_count: parts[1].to_string(),
            build_count: parts.get(2).map(|p| p.to_string()),
            timestamp: 0,
        })
    }

    /// Parse the frozen form `timestamp:version-sourceCount[-buildCount]`
    pub fn parse_frozen(s: &str) -> Result<Self, VersionParseError> {
        let (stamp, rest) = s
            .split_once(':')
            .ok_or_else(|| VersionParseError::InvalidRevision(s.to_string()))?;
        let timestamp = stamp
            .parse::<u64>()
            .map_err(|_| VersionParseError::InvalidTimestamp(s.to_string()))?;
        let mut revision = Self::parse(rest)?;
        revision.timestamp = timestamp;
        Ok(revision)
    }

    /// Frozen form with the timestamp prefix
    pub fn freeze(&self) -> String {
        format!("{}:{}", self.timestamp, self)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.version, self.source_count)?;
        if let Some(build) = &self.build_count {
            write!(f, "-{}", build)?;
        }
        Ok(())
    }
}

// timestamps never participate in equality or ordering
impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.source_count == other.source_count
            && self.build_count == other.build_count
    }
}

impl Eq for Revision {}

impl Hash for Revision {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
        self.source_count.hash(state);
        self.build_count.hash(state);
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.version, &self.source_count, &self.build_count).cmp(&(
            &other.version,
            &other.source_count,
            &other.build_count,
        ))
    }
}

/// A branch: a version with the trailing revision dropped
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Branch {
    parts: Vec<(Label, Option<Revision>)>,
}

impl Branch {
    /// The label the branch ends on
    pub fn label(&self) -> &Label {
        &self.parts.last().expect("branch is never empty").0
    }

    /// Parse a branch string: `/label[/revision/label…]`
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let elements = split_path(s)?;
        // label, then (revision, label) pairs: always an odd count
        if elements.len() % 2 == 0 {
            return Err(VersionParseError::UnbalancedPath(s.to_string()));
        }
        let mut parts: Vec<(Label, Option<Revision>)> = Vec::new();
        let mut i = 0;
        while i < elements.len() {
            let label = Label::parse(elements[i])?;
            if i + 1 < elements.len() {
                parts.push((label, Some(Revision::parse(elements[i + 1])?)));
                i += 2;
            } else {
                parts.push((label, None));
                i += 1;
            }
        }
        Ok(Self { parts })
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, revision) in &self.parts {
            write!(f, "/{}", label)?;
            if let Some(revision) = revision {
                write!(f, "/{}", revision)?;
            }
        }
        Ok(())
    }
}

/// A full version: a non-empty path of (label, revision) pairs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    parts: Vec<(Label, Revision)>,
}

impl Version {
    /// Build a version from explicit parts; versions are never empty
    pub fn from_parts(parts: Vec<(Label, Revision)>) -> Self {
        debug_assert!(!parts.is_empty());
        Self { parts }
    }

    /// Parse the string form `/label/revision[/label/revision…]`
    /// (no timestamps)
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        Self::parse_with(s, Revision::parse)
    }

    /// Parse the frozen form, where each revision carries its timestamp
    pub fn thaw(s: &str) -> Result<Self, VersionParseError> {
        Self::parse_with(s, Revision::parse_frozen)
    }

    fn parse_with(
        s: &str,
        parse_revision: fn(&str) -> Result<Revision, VersionParseError>,
    ) -> Result<Self, VersionParseError> {
        let elements = split_path(s)?;
        if elements.is_empty() || elements.len() % 2 != 0 {
            return Err(VersionParseError::UnbalancedPath(s.to_string()));
        }
        let mut parts = Vec::with_capacity(elements.len() / 2);
        for pair in elements.chunks_exact(2) {
            parts.push((Label::parse(pair[0])?, parse_revision(pair[1])?));
        }
        Ok(Self { parts })
    }

    /// String form without timestamps
    pub fn as_string(&self) -> String {
        let mut out = String::new();
        for (label, revision) in &self.parts {
            out.push('/');
            out.push_str(&label.to_string());
            out.push('/');
            out.push_str(&revision.to_string());
        }
        out
    }

    /// Frozen form with timestamps
    pub fn freeze(&self) -> String {
        let mut out = String::new();
        for (label, revision) in &self.parts {
            out.push('/');
            out.push_str(&label.to_string());
            out.push('/');
            out.push_str(&revision.freeze());
        }
        out
    }

    /// The branch this version sits on: the path with the trailing
    /// revision dropped
    pub fn branch(&self) -> Branch {
        let mut parts: Vec<(Label, Option<Revision>)> = self
            .parts
            .iter()
            .map(|(label, revision)| (label.clone(), Some(revision.clone())))
            .collect();
        if let Some(last) = parts.last_mut() {
            last.1 = None;
        }
        Branch { parts }
    }

    /// The label the version was committed on
    pub fn trailing_label(&self) -> &Label {
        &self.parts.last().expect("version is never empty").0
    }

    /// The final revision
    pub fn trailing_revision(&self) -> &Revision {
        &self.parts.last().expect("version is never empty").1
    }

    /// Host of the trailing label
    pub fn host(&self) -> &str {
        &self.trailing_label().host
    }

    /// True when both versions sit on the same branch
    pub fn on_same_branch(&self, other: &Version) -> bool {
        self.branch() == other.branch()
    }

    /// Timestamp of the trailing revision
    pub fn timestamp(&self) -> u64 {
        self.trailing_revision().timestamp
    }

    /// Overwrite the per-revision timestamps, outermost first. Extra
    /// entries are ignored; missing entries leave the old stamp.
    pub fn set_timestamps(&mut self, stamps: &[u64]) {
        for (part, stamp) in self.parts.iter_mut().zip(stamps) {
            part.1.timestamp = *stamp;
        }
    }

    /// Closeness of two versions: how many labels their paths share, with
    /// an extra point when the trailing labels agree. Zero means nothing
    /// in common. Symmetric and deterministic.
    pub fn closeness(&self, other: &Version) -> u32 {
        let ours: std::collections::BTreeSet<&Label> =
            self.parts.iter().map(|(label, _)| label).collect();
        let theirs: std::collections::BTreeSet<&Label> =
            other.parts.iter().map(|(label, _)| label).collect();
        let mut score = ours.intersection(&theirs).count() as u32;
        if score > 0 && self.trailing_label() == other.trailing_label() {
            score += 1;
        }
        score
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

/// Split `/a/b/c` into its elements, rejecting empty ones
fn split_path(s: &str) -> Result<Vec<&str>, VersionParseError> {
    let rest = s
        .strip_prefix('/')
        .ok_or_else(|| VersionParseError::MissingLeadingSlash(s.to_string()))?;
    let elements: Vec<&str> = rest.split('/').collect();
    if elements.iter().any(|e| e.is_empty()) {
        return Err(VersionParseError::UnbalancedPath(s.to_string()));
    }
    Ok(elements)
}

/// Errors from parsing labels, revisions, and version paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    /// Missing '@' separator in a label
    MissingAt(String),
    /// Missing ':' separator in a label
    MissingColon(String),
    /// A label component is empty
    EmptyLabelComponent(String),
    /// Invalid characters in a label
    InvalidLabel(String),
    /// Revision is not `version-sourceCount[-buildCount]`
    InvalidRevision(String),
    /// Frozen revision timestamp is not an integer
    InvalidTimestamp(String),
    /// Version string does not start with '/'
    MissingLeadingSlash(String),
    /// Version path has empty elements or an odd label/revision count
    UnbalancedPath(String),
    /// Empty version or branch
    Empty,
}

impl fmt::Display for VersionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAt(s) => write!(f, "Missing '@' in label: {}", s),
            Self::MissingColon(s) => write!(f, "Missing ':' in label: {}", s),
            Self::EmptyLabelComponent(s) => write!(f, "Empty component in label: {}", s),
            Self::InvalidLabel(s) => write!(f, "Invalid characters in label: {}", s),
            Self::InvalidRevision(s) => write!(f, "Invalid revision: {}", s),
            Self::InvalidTimestamp(s) => write!(f, "Invalid timestamp in revision: {}", s),
            Self::MissingLeadingSlash(s) => write!(f, "Version must start with '/': {}", s),
            Self::UnbalancedPath(s) => write!(f, "Unbalanced version path: {}", s),
            Self::Empty => write!(f, "Empty version"),
        }
    }
}

impl std::error::Error for VersionParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse() {
        let label = Label::parse("conary.example.com@rpl:2").unwrap();
        assert_eq!(label.host, "conary.example.com");
        assert_eq!(label.namespace, "rpl");
        assert_eq!(label.tag, "2");
        assert_eq!(label.to_string(), "conary.example.com@rpl:2");
    }

    #[test]
    fn test_label_parse_errors() {
        assert!(Label::parse("no-at-sign").is_err());
        assert!(Label::parse("host@nocolon").is_err());
        assert!(Label::parse("@ns:tag").is_err());
        assert!(Label::parse("host@:tag").is_err());
        assert!(Label::parse("host@ns:").is_err());
        assert!(Label::parse("ho st@ns:tag").is_err());
    }

    #[test]
    fn test_revision_forms() {
        let rev = Revision::parse("1.2-3").unwrap();
        assert_eq!(rev.version, "1.2");
        assert_eq!(rev.source_count, "3");
        assert!(rev.build_count.is_none());

        let rev = Revision::parse_frozen("1431104547000000:1.2-3-1").unwrap();
        assert_eq!(rev.timestamp, 1431104547000000);
        assert_eq!(rev.build_count.as_deref(), Some("1"));
        assert_eq!(rev.freeze(), "1431104547000000:1.2-3-1");

        assert!(Revision::parse("1.2").is_err());
        assert!(Revision::parse("1.2-3-4-5").is_err());
    }

    #[test]
    fn test_version_roundtrip() {
        let v = Version::parse("/a.example.com@ns:1/1.0-1").unwrap();
        assert_eq!(v.as_string(), "/a.example.com@ns:1/1.0-1");
        assert_eq!(v.trailing_label().tag, "1");
        assert_eq!(v.trailing_revision().version, "1.0");
        assert_eq!(v.host(), "a.example.com");
    }

    #[test]
    fn test_frozen_roundtrip() {
        let frozen = "/a.example.com@ns:1/5000:1.0-1";
        let v = Version::thaw(frozen).unwrap();
        assert_eq!(v.timestamp(), 5000);
        assert_eq!(v.freeze(), frozen);
        assert_eq!(v.as_string(), "/a.example.com@ns:1/1.0-1");
    }

    #[test]
    fn test_timestamps_ignored_by_equality() {
        let a = Version::thaw("/h@ns:1/100:1.0-1").unwrap();
        let b = Version::thaw("/h@ns:1/200:1.0-1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_branch() {
        let v = Version::parse("/h@ns:1/1.0-1/h@ns:2/2.0-1").unwrap();
        let branch = v.branch();
        assert_eq!(branch.to_string(), "/h@ns:1/1.0-1/h@ns:2");
        assert_eq!(branch.label().tag, "2");

        let other = Version::parse("/h@ns:1/1.1-1/h@ns:2/3.0-1").unwrap();
        assert!(!v.on_same_branch(&other));
        let sibling = Version::parse("/h@ns:1/1.0-1/h@ns:2/9.9-1").unwrap();
        assert!(v.on_same_branch(&sibling));
    }

    #[test]
    fn test_branch_parse() {
        let branch = Branch::parse("/h@ns:1/1.0-1/h@ns:2").unwrap();
        assert_eq!(branch.to_string(), "/h@ns:1/1.0-1/h@ns:2");
        let top = Branch::parse("/h@ns:1").unwrap();
        assert_eq!(top.label().tag, "1");
    }

    #[test]
    fn test_closeness() {
        let a = Version::parse("/h@ns:1/1.0-1").unwrap();
        let b = Version::parse("/h@ns:1/2.0-1").unwrap();
        let c = Version::parse("/h@ns:2/2.0-1").unwrap();
        let d = Version::parse("/h@ns:1/1.0-1/h@ns:2/2.0-1").unwrap();
        assert_eq!(a.closeness(&b), 2); // shared label + trailing bonus
        assert_eq!(a.closeness(&c), 0);
        assert_eq!(c.closeness(&d), 2);
        assert_eq!(a.closeness(&d), 1); // shared label, different trailing
        assert_eq!(a.closeness(&b), b.closeness(&a));
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(Version::parse("no-slash@ns:1/1.0-1").is_err());
        assert!(Version::parse("/h@ns:1").is_err());
        assert!(Version::parse("/h@ns:1//1.0-1").is_err());
        assert!(Version::parse("").is_err());
    }
}
