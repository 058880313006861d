// src/signature/mod.rs

//! Signature blocks stored in troveInfo and metadata items
//!
//! A signature block carries digests of the owning object plus the
//! signatures made over those digests:
//!
//! - the classic version-0 SHA-1 digest with its signature list
//! - a set of *versioned* digests (version 1 and 2, both non-standard
//!   SHA-256), each with its own signature list
//!
//! Signature lists are absolute collections: the repository accretes
//! signatures over time, so the whole list always travels in full.
//!
//! The raw signature bytes use MPI framing: a count byte, then each MPI as
//! a 2-byte big-endian bit length followed by the value bytes.

pub mod keys;

use crate::error::{Error, Result};
use crate::streams::set::stream_set;
use crate::streams::{AbsoluteStreamCollection, ByteStream, IntStream, Sha1Stream, StringStream};

/// Digest scheme versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DigestVersion {
    /// Classic SHA-1 over the original field set
    V0,
    /// Non-standard SHA-256 over everything except signatures and metadata
    V1,
    /// Same coverage as V1; emitted instead of it when any script carries
    /// more than one compatibility-class conversion
    V2,
}

impl DigestVersion {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::V0),
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }
}

stream_set! {
    /// One OpenPGP-style signature: key fingerprint, timestamp, and the
    /// MPI-framed signature bytes
    pub struct DigitalSignature(Strict) {
        0 => fingerprint: StringStream [Small, "fingerprint"],
        1 => signature: StringStream [Small, "signature"],
        2 => timestamp: IntStream [Small, "timestamp"],
    }
}

impl DigitalSignature {
    /// Build a signature record from its parts
    pub fn from_parts(fingerprint: &str, timestamp: u32, mpis: &[Vec<u8>]) -> Self {
        let mut sig = Self::default();
        sig.fingerprint.set(fingerprint.as_bytes().to_vec());
        sig.timestamp.set(timestamp);
        let mut buf = vec![mpis.len() as u8];
        for mpi in mpis {
            buf.extend_from_slice(&((mpi.len() * 8) as u16).to_be_bytes());
            buf.extend_from_slice(mpi);
        }
        sig.signature.set(buf);
        sig
    }

    pub fn fingerprint_str(&self) -> String {
        self.fingerprint.as_str().into_owned()
    }

    /// Unpack the MPI list
    pub fn mpis(&self) -> Result<Vec<Vec<u8>>> {
        let data = self.signature.as_bytes();
        let count = *data
            .first()
            .ok_or(Error::Truncated("DigitalSignature"))? as usize;
        let mut mpis = Vec::with_capacity(count);
        let mut pos = 1;
        for _ in 0..count {
            let raw = data
                .get(pos..pos + 2)
                .ok_or(Error::Truncated("DigitalSignature"))?;
            let bits = u16::from_be_bytes(raw.try_into().unwrap()) as usize;
            let len = bits.div_ceil(8);
            pos += 2;
            let value = data
                .get(pos..pos + len)
                .ok_or(Error::Truncated("DigitalSignature"))?;
            mpis.push(value.to_vec());
            pos += len;
        }
        Ok(mpis)
    }
}

/// The signature list over one digest
pub type DigitalSignatures = AbsoluteStreamCollection<DigitalSignature>;

impl DigitalSignatures {
    /// Find a signature whose fingerprint contains `key_id`
    pub fn signature_for(&self, key_id: &str) -> Result<&DigitalSignature> {
        self.iter()
            .find(|sig| sig.fingerprint_str().contains(key_id))
            .ok_or_else(|| Error::KeyNotFound(key_id.to_string()))
    }
}

stream_set! {
    /// A versioned digest with its signatures
    pub struct VersionedSignature(Preserve) {
        0 => version: ByteStream [Small, "version"],
        1 => digest: StringStream [Small, "digest"],
        2 => signatures: DigitalSignatures [Large, "signatures"],
    }
}

/// All versioned digests of an object
pub type VersionedSignaturesSet = AbsoluteStreamCollection<VersionedSignature>;

impl VersionedSignaturesSet {
    /// The stored digest for a version, if any
    pub fn digest_for(&self, version: DigestVersion) -> Option<Vec<u8>> {
        self.iter()
            .find(|vs| vs.version.value() == Some(version.as_u8()))
            .map(|vs| vs.digest.as_bytes().to_vec())
    }

    /// Signatures stored for a version
    pub fn signatures_for(&self, version: DigestVersion) -> Vec<DigitalSignature> {
        self.iter()
            .filter(|vs| vs.version.value() == Some(version.as_u8()))
            .flat_map(|vs| vs.signatures.iter().cloned())
            .collect()
    }

    /// Store (or replace) the digest for a version, keeping any signatures
    /// already made for it
    pub fn set_digest(&mut self, version: DigestVersion, digest: &[u8]) -> Result<()> {
        let mut entry = self.take_entry(version)?.unwrap_or_default();
        entry.version.set(version.as_u8());
        entry.digest.set(digest.to_vec());
        self.add(entry)
    }

    /// Attach a signature to the entry for `version`; the digest must
    /// already be stored
    pub fn add_signature(&mut self, version: DigestVersion, sig: DigitalSignature) -> Result<()> {
        let mut entry = self
            .take_entry(version)?
            .ok_or(Error::SignatureDigestMismatch(version.as_u8()))?;
        entry.signatures.add(sig)?;
        self.add(entry)
    }

    /// Drop the entry for `version`, returning it
    fn take_entry(&mut self, version: DigestVersion) -> Result<Option<VersionedSignature>> {
        let found = self
            .iter()
            .find(|vs| vs.version.value() == Some(version.as_u8()))
            .cloned();
        if let Some(entry) = &found {
            self.remove(entry)?;
        }
        Ok(found)
    }

    /// Remove the entry for `version` entirely
    pub fn drop_version(&mut self, version: DigestVersion) -> Result<()> {
        self.take_entry(version)?;
        Ok(())
    }
}

stream_set! {
    /// The trove-level signature block: the classic SHA-1 digest, its
    /// signatures, and the versioned digest set.
    ///
    /// Tag 2 was burned by a withdrawn digest scheme; the versioned set
    /// lives at tag 3.
    pub struct TroveSignatures(Preserve) {
        0 => sha1: Sha1Stream [Small, "sha1"],
        1 => digital_sigs: DigitalSignatures [Large, "digitalSigs"],
        3 => v_sigs: VersionedSignaturesSet [Large, "vSigs"],
    }
}

impl TroveSignatures {
    /// Forget every digest and signature. Derived troves (shadows most of
    /// all) change content, so inherited signatures must not survive.
    pub fn reset(&mut self) {
        self.sha1 = Sha1Stream::default();
        self.digital_sigs = DigitalSignatures::default();
        self.v_sigs = VersionedSignaturesSet::default();
    }

    /// The stored digest for a version, if any
    pub fn digest_for(&self, version: DigestVersion) -> Option<Vec<u8>> {
        match version {
            DigestVersion::V0 => self.sha1.value().map(|d| d.to_vec()),
            _ => self.v_sigs.digest_for(version),
        }
    }

    /// Signatures stored for a version
    pub fn signatures_for(&self, version: DigestVersion) -> Vec<DigitalSignature> {
        match version {
            DigestVersion::V0 => self.digital_sigs.iter().cloned().collect(),
            _ => self.v_sigs.signatures_for(version),
        }
    }

    /// Digest versions present in this block, ascending
    pub fn versions_present(&self) -> Vec<DigestVersion> {
        let mut present = Vec::new();
        if self.sha1.is_set() {
            present.push(DigestVersion::V0);
        }
        for candidate in [DigestVersion::V1, DigestVersion::V2] {
            if self.v_sigs.digest_for(candidate).is_some() {
                present.push(candidate);
            }
        }
        present
    }

    pub fn is_empty_block(&self) -> bool {
        !self.sha1.is_set() && self.digital_sigs.is_empty() && self.v_sigs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{SkipSet, Stream};

    fn sig(fpr: &str) -> DigitalSignature {
        DigitalSignature::from_parts(fpr, 1000, &[vec![1u8; 32], vec![2u8; 32]])
    }

    #[test]
    fn test_mpi_roundtrip() {
        let s = sig("cafebabe");
        let mpis = s.mpis().unwrap();
        assert_eq!(mpis.len(), 2);
        assert_eq!(mpis[0], vec![1u8; 32]);
        assert_eq!(mpis[1], vec![2u8; 32]);
        assert_eq!(s.fingerprint_str(), "cafebabe");
        assert_eq!(s.timestamp.value(), Some(1000));
    }

    #[test]
    fn test_signature_lookup_by_key_id() {
        let mut sigs = DigitalSignatures::default();
        sigs.add(sig("aabbccdd")).unwrap();
        assert!(sigs.signature_for("bbcc").is_ok());
        assert!(matches!(
            sigs.signature_for("ffff"),
            Err(Error::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_versioned_set_digest_and_signature() {
        let mut vsigs = VersionedSignaturesSet::default();
        vsigs.set_digest(DigestVersion::V1, &[9u8; 32]).unwrap();
        assert_eq!(vsigs.digest_for(DigestVersion::V1), Some(vec![9u8; 32]));
        assert_eq!(vsigs.digest_for(DigestVersion::V2), None);

        vsigs.add_signature(DigestVersion::V1, sig("aa")).unwrap();
        assert_eq!(vsigs.signatures_for(DigestVersion::V1).len(), 1);
        // digest survives a re-set
        vsigs.set_digest(DigestVersion::V1, &[9u8; 32]).unwrap();
        assert_eq!(vsigs.signatures_for(DigestVersion::V1).len(), 1);

        assert!(matches!(
            vsigs.add_signature(DigestVersion::V2, sig("bb")),
            Err(Error::SignatureDigestMismatch(2))
        ));
    }

    #[test]
    fn test_trove_signatures_roundtrip() {
        let mut block = TroveSignatures::default();
        block.sha1.set([3u8; 20]);
        block.digital_sigs.add(sig("aa")).unwrap();
        block.v_sigs.set_digest(DigestVersion::V2, &[7u8; 32]).unwrap();
        let frz = block.freeze(&SkipSet::new()).unwrap();
        let thawed = TroveSignatures::thaw(&frz).unwrap();
        assert_eq!(thawed, block);
        assert_eq!(
            thawed.versions_present(),
            vec![DigestVersion::V0, DigestVersion::V2]
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut block = TroveSignatures::default();
        block.sha1.set([3u8; 20]);
        block.digital_sigs.add(sig("aa")).unwrap();
        block.reset();
        assert!(block.is_empty_block());
        assert!(block.freeze(&SkipSet::new()).unwrap().is_empty());
    }
}
