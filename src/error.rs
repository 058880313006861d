// src/error.rs

//! Crate-wide error type
//!
//! Stream primitives surface errors immediately; composite operations
//! (`applyChangeSet`, `diff`) validate before mutating so that a failure
//! leaves the receiver unchanged.

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the trove core
#[derive(Error, Debug)]
pub enum Error {
    /// Trove name contains invalid characters, multiple colons, or an
    /// empty component
    #[error("malformed trove name: {0:?}")]
    MalformedTroveName(String),

    /// A fixed-width field received data of the wrong length
    /// (pathId != 16, fileId != 20, sha1 != 20, sha256 != 32)
    #[error("invalid {field} size: expected {expected} bytes, got {got}")]
    InvalidSize {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    /// Record payload too large for its declared size class
    #[error("{size_class} record payload overflow: {len} bytes")]
    Overflow { size_class: &'static str, len: usize },

    /// A strict-policy stream set received an unrecognized tag
    #[error("unknown tag {tag} while thawing {type_name}")]
    UnknownTag { tag: u8, type_name: &'static str },

    /// Frozen data ended in the middle of a record
    #[error("truncated stream data while thawing {0}")]
    Truncated(&'static str),

    /// A stream set holding preserved unknown fields was diffed against
    /// a type that cannot carry them
    #[error("cannot diff {0}: unknown fields present on one side only")]
    UnknownFieldsInDiff(&'static str),

    /// `addTrove` of a reference that is already present
    #[error("duplicate trove reference {reference} in {name}")]
    DuplicateReference { name: String, reference: String },

    /// `delTrove` of a reference that is not present
    #[error("missing trove reference {reference} in {name}")]
    MissingReference { name: String, reference: String },

    /// Digest verification failed while applying a changeset
    #[error("trove integrity failure for {name}={version}[{flavor}]")]
    TroveIntegrity {
        name: String,
        version: String,
        flavor: String,
    },

    /// A stored signature is malformed, a digest disagrees, a signature
    /// fails to verify, or the required trust level is unmet.
    ///
    /// By convention this error is never swallowed by wrappers; transports
    /// must re-raise it.
    #[error("digital signature verification failed: {0}")]
    DigitalSignatureVerification(String),

    /// Signing or verification requested a key the cache does not hold
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A precomputed signature was added for a digest that does not match
    #[error("signature digest mismatch for version {0}")]
    SignatureDigestMismatch(u8),

    /// Version string could not be parsed
    #[error(transparent)]
    VersionParse(#[from] crate::version::VersionParseError),

    /// Flavor string could not be parsed
    #[error(transparent)]
    FlavorParse(#[from] crate::flavor::FlavorParseError),

    /// Dependency string could not be parsed
    #[error("invalid dependency: {0}")]
    DependencyParse(String),

    /// Operation not valid for this trove type
    /// (e.g. `addRedirect` on a non-redirect trove)
    #[error("{0}")]
    WrongTroveType(&'static str),
}
