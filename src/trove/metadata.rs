// src/trove/metadata.rs

//! Language-scoped, optionally signed metadata items
//!
//! Each [`MetadataItem`] describes one language's view of a trove: short
//! and long descriptions, licenses, categories, URLs, and a free-form
//! key/value map. Items are identified by a 20-byte digest (`id`) of their
//! own contents with the id and signature fields excluded, so an item's
//! identity is stable under re-signing.
//!
//! Two signature generations coexist: `oldSignatures` sign the version-0
//! SHA-1 digest over the original field set; `signatures` carries the
//! versioned digests (version 1 and up) over the whole item. Unknown tags
//! are preserved, and participate in the version-1 digest but not the
//! version-0 one.

use crate::digest::{nonstandard_sha256_bytes, sha1_bytes};
use crate::error::{Error, Result};
use crate::signature::keys::{KeyCache, SigningKeyPair};
use crate::signature::{DigestVersion, DigitalSignatures, VersionedSignaturesSet};
use crate::streams::set::{SKIP_UNKNOWN, stream_set};
use crate::streams::{
    AbsoluteSha1Stream, LongLongStream, OrderedBinaryStringsStream, OrderedStreamCollection,
    SkipSet, Stream, StringStream, read_dyn_size, take, write_size, SizeType,
};
use crate::version::Label;

/// Ordered string→string map, frozen as alternating dynamic-prefixed
/// key/value entries in key order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyValueItemsStream(std::collections::BTreeMap<Vec<u8>, Vec<u8>>);

impl KeyValueItemsStream {
    pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.0.get(key).map(|v| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Stream for KeyValueItemsStream {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (key, value) in &self.0 {
            write_size(&mut out, SizeType::Dynamic, key.len())?;
            out.extend_from_slice(key);
            write_size(&mut out, SizeType::Dynamic, value.len())?;
            out.extend_from_slice(value);
        }
        Ok(out)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        let mut pos = 0;
        while pos < frz.len() {
            let klen = read_dyn_size(frz, &mut pos, "KeyValueItemsStream")?;
            let key = take(frz, &mut pos, klen, "KeyValueItemsStream")?.to_vec();
            if pos >= frz.len() {
                return Err(Error::Truncated("KeyValueItemsStream"));
            }
            let vlen = read_dyn_size(frz, &mut pos, "KeyValueItemsStream")?;
            let value = take(frz, &mut pos, vlen, "KeyValueItemsStream")?.to_vec();
            new.0.insert(key, value);
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

stream_set! {
    /// One language's metadata for a trove
    pub struct MetadataItem(Preserve) {
        0 => id: AbsoluteSha1Stream [Small, "id"],
        1 => language: StringStream [Small, "language"],
        2 => url: StringStream [Small, "url"],
        3 => licenses: OrderedBinaryStringsStream [Large, "licenses"],
        4 => crypto: OrderedBinaryStringsStream [Large, "crypto"],
        5 => short_desc: StringStream [Small, "shortDesc"],
        6 => long_desc: StringStream [Large, "longDesc"],
        7 => categories: OrderedBinaryStringsStream [Large, "categories"],
        8 => bibliography: OrderedBinaryStringsStream [Large, "bibliography"],
        9 => old_signatures: DigitalSignatures [Large, "oldSignatures"],
        10 => notes: OrderedBinaryStringsStream [Large, "notes"],
        11 => key_value: KeyValueItemsStream [Large, "keyValue"],
        12 => size_override: LongLongStream [Small, "sizeOverride"],
        13 => signatures: VersionedSignaturesSet [Large, "signatures"],
    }
}

impl MetadataItem {
    /// Bytes covered by the item id and the version-1 digest: everything
    /// except the id and both signature blocks, unknown records included
    fn digest_bytes_v1(&self) -> Result<Vec<u8>> {
        let mut skip = SkipSet::new();
        skip.insert("id");
        skip.insert("signatures");
        skip.insert("oldSignatures");
        self.freeze_ext(&skip, true, true)
    }

    /// Bytes covered by the version-0 digest: the original field set only,
    /// unknown records excluded
    fn digest_bytes_v0(&self) -> Result<Vec<u8>> {
        let mut skip = SkipSet::new();
        skip.insert("id");
        skip.insert("signatures");
        skip.insert("oldSignatures");
        skip.insert("notes");
        skip.insert("keyValue");
        skip.insert("sizeOverride");
        skip.insert(SKIP_UNKNOWN);
        self.freeze_ext(&skip, true, true)
    }

    /// The version-0 digest of the current contents
    pub fn digest_v0(&self) -> Result<[u8; 20]> {
        Ok(sha1_bytes(&self.digest_bytes_v0()?))
    }

    /// Recompute the item id and the stored version-1 digest. Signatures
    /// made over unchanged digests survive.
    pub fn compute_digests(&mut self) -> Result<()> {
        let covered = self.digest_bytes_v1()?;
        self.id.set(sha1_bytes(&covered));
        self.signatures
            .set_digest(DigestVersion::V1, &nonstandard_sha256_bytes(&covered))?;
        Ok(())
    }

    /// True when the stored id and digests match the current contents
    pub fn verify_digests(&self) -> Result<bool> {
        let covered = self.digest_bytes_v1()?;
        if let Some(stored) = self.id.value() {
            if stored != &sha1_bytes(&covered) {
                return Ok(false);
            }
        }
        if let Some(stored) = self.signatures.digest_for(DigestVersion::V1) {
            if stored != nonstandard_sha256_bytes(&covered) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sign the item's digests with a key pair. Adds a version-0 signature
    /// over the SHA-1 digest and a version-1 signature over the stored
    /// SHA-256 digest; digests must be current.
    pub fn sign(&mut self, pair: &SigningKeyPair, timestamp: u32) -> Result<()> {
        if !self.verify_digests()? {
            return Err(Error::SignatureDigestMismatch(1));
        }
        let v0 = self.digest_v0()?;
        self.old_signatures.add(pair.sign_digest(&v0, timestamp))?;
        if let Some(digest) = self.signatures.digest_for(DigestVersion::V1) {
            self.signatures
                .add_signature(DigestVersion::V1, pair.sign_digest(&digest, timestamp))?;
        }
        Ok(())
    }

    /// Verify every stored signature against the key cache. Returns the
    /// highest trust seen; unknown keys land in `missing`, affirmatively
    /// bad signatures are an error.
    pub fn verify_signatures(
        &self,
        cache: &dyn KeyCache,
        label_hint: Option<&Label>,
        missing: &mut Vec<String>,
    ) -> Result<u8> {
        if !self.verify_digests()? {
            return Err(Error::DigitalSignatureVerification(format!(
                "metadata digest mismatch for language {:?}",
                self.language.as_str()
            )));
        }
        let mut max_trust = 0u8;
        let mut bad: Vec<String> = Vec::new();

        let v0 = self.digest_v0()?;
        for sig in self.old_signatures.iter() {
            let fpr = sig.fingerprint_str();
            match cache.public_key(&fpr, label_hint) {
                None => missing.push(fpr),
                Some(key) => match key.verify_digest(&v0, sig) {
                    Some(trust) => max_trust = max_trust.max(trust),
                    None => bad.push(fpr),
                },
            }
        }
        if let Some(digest) = self.signatures.digest_for(DigestVersion::V1) {
            for sig in self.signatures.signatures_for(DigestVersion::V1) {
                let fpr = sig.fingerprint_str();
                match cache.public_key(&fpr, label_hint) {
                    None => missing.push(fpr),
                    Some(key) => match key.verify_digest(&digest, &sig) {
                        Some(trust) => max_trust = max_trust.max(trust),
                        None => bad.push(fpr),
                    },
                }
            }
        }

        if !bad.is_empty() {
            return Err(Error::DigitalSignatureVerification(format!(
                "metadata signatures made by the following keys are bad: {}",
                bad.join(" ")
            )));
        }
        Ok(max_trust)
    }
}

/// The metadata block: items in insertion order, newest resolution last
pub type Metadata = OrderedStreamCollection<MetadataItem>;

impl Metadata {
    /// The item for a language, if present
    pub fn item_for_language(&self, language: &[u8]) -> Option<&MetadataItem> {
        self.iter()
            .find(|item| item.language.as_bytes() == language)
    }

    /// Recompute ids and digests on every item
    pub fn compute_digests(&mut self) -> Result<()> {
        for item in self.iter_mut() {
            item.compute_digests()?;
        }
        Ok(())
    }

    /// True when every item's stored digests match its contents
    pub fn verify_digests(&self) -> Result<bool> {
        for item in self.iter() {
            if !item.verify_digests()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::keys::{MemoryKeyCache, TRUST_FULL};

    fn item() -> MetadataItem {
        let mut item = MetadataItem::default();
        item.language.set(b"en".to_vec());
        item.short_desc.set(b"a frobnicator".to_vec());
        item.long_desc.set(b"frobnicates the unfrobnicated".to_vec());
        item.licenses.add(b"MIT".to_vec());
        item
    }

    #[test]
    fn test_key_value_roundtrip() {
        let mut kv = KeyValueItemsStream::default();
        kv.insert(&b"upstream"[..], &b"https://example.com"[..]);
        kv.insert(&b"maintainer"[..], &b"jane"[..]);
        let frz = kv.freeze(&SkipSet::new()).unwrap();
        assert_eq!(KeyValueItemsStream::thaw(&frz).unwrap(), kv);
        assert_eq!(kv.get(b"maintainer"), Some(&b"jane"[..]));
    }

    #[test]
    fn test_id_excludes_signatures() {
        let mut a = item();
        a.compute_digests().unwrap();
        let id_before = *a.id.value().unwrap();

        let pair = SigningKeyPair::generate();
        a.sign(&pair, 1).unwrap();
        a.compute_digests().unwrap();
        assert_eq!(a.id.value(), Some(&id_before));
    }

    #[test]
    fn test_id_changes_with_content() {
        let mut a = item();
        a.compute_digests().unwrap();
        let id_before = *a.id.value().unwrap();
        a.short_desc.set(b"a different description".to_vec());
        a.compute_digests().unwrap();
        assert_ne!(a.id.value(), Some(&id_before));
    }

    #[test]
    fn test_v0_digest_ignores_extension_fields() {
        let mut a = item();
        let before = a.digest_v0().unwrap();
        a.key_value
            .insert(&b"note"[..], &b"added later"[..]);
        a.size_override.set(99);
        assert_eq!(a.digest_v0().unwrap(), before);
        a.short_desc.set(b"changed".to_vec());
        assert_ne!(a.digest_v0().unwrap(), before);
    }

    #[test]
    fn test_sign_and_verify() {
        let mut cache = MemoryKeyCache::new();
        let pair = SigningKeyPair::generate();
        let mut a = item();
        a.compute_digests().unwrap();
        a.sign(&pair, 7).unwrap();
        cache.add_key_pair(pair, TRUST_FULL);

        let mut missing = Vec::new();
        let trust = a.verify_signatures(&cache, None, &mut missing).unwrap();
        assert_eq!(trust, TRUST_FULL);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_verify_fails_after_mutation() {
        let pair = SigningKeyPair::generate();
        let mut a = item();
        a.compute_digests().unwrap();
        a.sign(&pair, 7).unwrap();
        a.short_desc.set(b"tampered".to_vec());

        let cache = MemoryKeyCache::new();
        let mut missing = Vec::new();
        assert!(matches!(
            a.verify_signatures(&cache, None, &mut missing),
            Err(Error::DigitalSignatureVerification(_))
        ));
    }

    #[test]
    fn test_missing_keys_collected() {
        let pair = SigningKeyPair::generate();
        let mut a = item();
        a.compute_digests().unwrap();
        a.sign(&pair, 7).unwrap();

        let cache = MemoryKeyCache::new();
        let mut missing = Vec::new();
        let trust = a.verify_signatures(&cache, None, &mut missing).unwrap();
        assert_eq!(trust, 0);
        assert_eq!(missing.len(), 2); // one per digest version
    }

    #[test]
    fn test_metadata_collection_language_lookup() {
        let mut metadata = Metadata::default();
        metadata.add(item());
        let mut de = item();
        de.language.set(b"de".to_vec());
        de.short_desc.set(b"ein frobnikator".to_vec());
        metadata.add(de);
        assert!(metadata.item_for_language(b"de").is_some());
        assert!(metadata.item_for_language(b"fr").is_none());
        metadata.compute_digests().unwrap();
        assert!(metadata.verify_digests().unwrap());
    }
}
