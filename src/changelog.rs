// src/changelog.rs

//! Changelog entries attached to troves

use crate::streams::StringStream;
use crate::streams::set::stream_set;

stream_set! {
    /// Who committed a trove and why. An all-empty changelog freezes to
    /// nothing, so unset changelogs drop out of the containing trove.
    pub struct ChangeLog(Strict) {
        0 => name: StringStream [Small, "name"],
        1 => contact: StringStream [Small, "contact"],
        2 => message: StringStream [Small, "message"],
    }
}

impl ChangeLog {
    pub fn new(name: &str, contact: &str, message: &str) -> Self {
        let mut log = Self::default();
        log.name.set(name.as_bytes().to_vec());
        log.contact.set(contact.as_bytes().to_vec());
        log.message.set(message.as_bytes().to_vec());
        log
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.contact.is_empty() && self.message.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{SkipSet, Stream};

    #[test]
    fn test_empty_changelog_freezes_to_nothing() {
        assert!(ChangeLog::default().freeze(&SkipSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_roundtrip() {
        let log = ChangeLog::new("jane", "jane@example.com", "fix the frobnicator");
        let frz = log.freeze(&SkipSet::new()).unwrap();
        assert_eq!(ChangeLog::thaw(&frz).unwrap(), log);
    }
}
