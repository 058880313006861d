// src/lib.rs

//! Conary trove core
//!
//! The trove object model and everything needed to move troves between
//! machines and trust them when they arrive:
//!
//! - Streams: freeze/thaw/diff/three-way-merge value types composed into
//!   tagged, forward-compatible stream sets
//! - Troves: versioned, flavored units referencing files by content id and
//!   other troves by (name, version, flavor)
//! - Signed digests: multiple digest versions over precisely defined field
//!   subsets, so signatures survive schema evolution
//! - Changesets: relative and absolute diffs between trove states, with a
//!   flavor- and path-hash-aware matcher pairing added and removed
//!   sub-troves
//!
//! The core is synchronous and side-effect-free; the only injected
//! collaborator is the [`signature::keys::KeyCache`] used for signing and
//! verification.

pub mod changelog;
pub mod deps;
pub mod digest;
mod error;
pub mod flavor;
pub mod signature;
pub mod streams;
pub mod trove;
pub mod version;

pub use changelog::ChangeLog;
pub use deps::{Dependency, DependencyClass, DependencySet};
pub use error::{Error, Result};
pub use flavor::{FlagSense, Flavor};
pub use signature::keys::{KeyCache, MemoryKeyCache, PublicKey, SigningKeyPair};
pub use signature::{DigestVersion, DigitalSignature, TroveSignatures};
pub use trove::{
    ApplyFlags, CAPSULE_PATHID, FileId, FileNeeded, Job, PathId, Trove, TroveChangeSet, TroveRef,
    TroveType,
};
pub use streams::{SkipSet, Stream};
pub use version::{Branch, Label, Revision, Version};
