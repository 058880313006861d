// tests/signatures.rs

//! Trove signing and verification against an injected key cache.

mod common;

use common::{component, file_id, path_id, version};
use conary_trove::signature::keys::{TRUST_FULL, TRUST_MARGINAL, TRUST_UNTRUSTED};
use conary_trove::trove::MetadataItem;
use conary_trove::{
    DigestVersion, Error, MemoryKeyCache, SigningKeyPair, Trove,
};

const V1: &str = "/repo.example.com@ns:1/100:1.0-1-1";

fn signed_trove(cache: &mut MemoryKeyCache, trust: u8) -> (Trove, String) {
    let pair = SigningKeyPair::generate();
    let fingerprint = pair.fingerprint().to_string();
    cache.add_key_pair(pair, trust);

    let mut t = component("foo:runtime", V1, "ssl is: x86");
    t.add_file(path_id(1), "/usr/bin/foo", version(V1), file_id(1))
        .unwrap();
    t.compute_path_hashes();

    let mut item = MetadataItem::default();
    item.language.set(b"en".to_vec());
    item.short_desc.set(b"a frobnicator".to_vec());
    t.trove_info.metadata.add(item);

    t.compute_digests().unwrap();
    t.add_digital_signature(&fingerprint, cache).unwrap();
    (t, fingerprint)
}

#[test]
fn test_sign_and_verify_roundtrip() {
    let mut cache = MemoryKeyCache::new();
    let (t, fingerprint) = signed_trove(&mut cache, TRUST_FULL);

    assert!(t.verify_digests().unwrap());
    let (trust, missing, untrusted) = t.verify_digital_signatures(0, &cache).unwrap();
    assert_eq!(trust, TRUST_FULL);
    assert!(missing.is_empty());
    assert!(untrusted.is_empty());

    // the signature is discoverable by abbreviated key id
    assert!(t.digital_signature(&fingerprint[48..]).is_ok());
}

#[test]
fn test_signing_is_idempotent_per_key() {
    let mut cache = MemoryKeyCache::new();
    let (mut t, fingerprint) = signed_trove(&mut cache, TRUST_FULL);
    let before_v0 = t
        .trove_info
        .sigs
        .signatures_for(DigestVersion::V0)
        .len();
    t.add_digital_signature(&fingerprint, &cache).unwrap();
    assert_eq!(
        t.trove_info.sigs.signatures_for(DigestVersion::V0).len(),
        before_v0
    );
}

#[test]
fn test_two_signers_accumulate() {
    let mut cache = MemoryKeyCache::new();
    let (mut t, _) = signed_trove(&mut cache, TRUST_MARGINAL);
    let second = SigningKeyPair::generate();
    let second_fpr = second.fingerprint().to_string();
    cache.add_key_pair(second, TRUST_FULL);
    t.add_digital_signature(&second_fpr, &cache).unwrap();

    assert_eq!(t.trove_info.sigs.signatures_for(DigestVersion::V0).len(), 2);
    let (trust, _, _) = t.verify_digital_signatures(0, &cache).unwrap();
    assert_eq!(trust, TRUST_FULL, "best trust across signers wins");
}

#[test]
fn test_verification_fails_after_metadata_mutation() {
    let mut cache = MemoryKeyCache::new();
    let (mut t, _) = signed_trove(&mut cache, TRUST_FULL);

    // tamper with the signed metadata
    for item in t.trove_info.metadata.iter_mut() {
        item.short_desc.set(b"a backdoored frobnicator".to_vec());
    }

    assert!(matches!(
        t.verify_digital_signatures(0, &cache),
        Err(Error::DigitalSignatureVerification(_))
    ));
}

#[test]
fn test_verification_fails_after_content_mutation() {
    let mut cache = MemoryKeyCache::new();
    let (mut t, _) = signed_trove(&mut cache, TRUST_FULL);
    t.set_size(12345);
    assert!(!t.verify_digests().unwrap());
    assert!(matches!(
        t.verify_digital_signatures(0, &cache),
        Err(Error::DigitalSignatureVerification(_))
    ));
}

#[test]
fn test_missing_keys_are_collected_not_fatal() {
    let mut cache = MemoryKeyCache::new();
    let (t, _) = signed_trove(&mut cache, TRUST_FULL);

    // verify against a cache that knows nothing
    let empty = MemoryKeyCache::new();
    let (trust, missing, _) = t.verify_digital_signatures(0, &empty).unwrap();
    assert_eq!(trust, TRUST_UNTRUSTED);
    assert!(!missing.is_empty());
}

#[test]
fn test_trust_threshold_enforced() {
    let mut cache = MemoryKeyCache::new();
    let (t, _) = signed_trove(&mut cache, TRUST_MARGINAL);
    assert!(t.verify_digital_signatures(TRUST_MARGINAL, &cache).is_ok());
    assert!(matches!(
        t.verify_digital_signatures(TRUST_FULL, &cache),
        Err(Error::DigitalSignatureVerification(_))
    ));
}

#[test]
fn test_precomputed_signature_requires_matching_digest() {
    let mut cache = MemoryKeyCache::new();
    let (t, _) = signed_trove(&mut cache, TRUST_FULL);

    let other = SigningKeyPair::generate();
    let digest = t
        .trove_info
        .sigs
        .digest_for(DigestVersion::V1)
        .expect("v1 digest present");
    let sig = other.sign_digest(&digest, 99);

    let mut ok = t.clone();
    ok.add_precomputed_signature(DigestVersion::V1, sig.clone())
        .unwrap();

    // a tampered trove no longer matches its stored digest
    let mut tampered = t.clone();
    tampered.set_size(1);
    assert!(matches!(
        tampered.add_precomputed_signature(DigestVersion::V1, sig),
        Err(Error::SignatureDigestMismatch(1))
    ));
}

#[test]
fn test_signatures_survive_freeze_thaw() {
    let mut cache = MemoryKeyCache::new();
    let (t, _) = signed_trove(&mut cache, TRUST_FULL);
    let skip = conary_trove::SkipSet::new();
    let thawed = Trove::thaw(&t.freeze(&skip).unwrap()).unwrap();
    assert_eq!(thawed, t);
    let (trust, missing, _) = thawed.verify_digital_signatures(0, &cache).unwrap();
    assert_eq!(trust, TRUST_FULL);
    assert!(missing.is_empty());
}
