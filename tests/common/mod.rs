// tests/common/mod.rs

//! Shared builders for integration tests

#![allow(dead_code)]

use conary_trove::{Flavor, Trove, Version};

/// Thaw a frozen version string (with timestamps)
pub fn version(s: &str) -> Version {
    Version::thaw(s).expect("test version must parse")
}

/// Parse a flavor string
pub fn flavor(s: &str) -> Flavor {
    Flavor::parse(s).expect("test flavor must parse")
}

/// A collection trove ready to take sub-trove references
pub fn group(name: &str, v: &str) -> Trove {
    Trove::new(name, version(v), Flavor::empty()).expect("test trove must build")
}

/// A component trove ready to take files
pub fn component(name: &str, v: &str, f: &str) -> Trove {
    Trove::new(name, version(v), flavor(f)).expect("test trove must build")
}

/// A pathId from a small integer
pub fn path_id(n: u8) -> [u8; 16] {
    [n; 16]
}

/// A fileId from a small integer
pub fn file_id(n: u8) -> [u8; 20] {
    [n; 20]
}
