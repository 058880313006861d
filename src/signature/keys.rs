// src/signature/keys.rs

//! Key cache and Ed25519 key pairs for trove signing
//!
//! The core never talks to a keyring directly; callers inject a
//! [`KeyCache`]. The in-memory implementation here carries Ed25519 keys
//! with per-key trust levels. Key pairs can be generated, stored in TOML
//! key files, and loaded back.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::signature::DigitalSignature;
use crate::version::Label;

/// No reason to believe the key
pub const TRUST_UNTRUSTED: u8 = 0;
/// Key is signed by a partially trusted introducer
pub const TRUST_MARGINAL: u8 = 60;
/// Key is fully trusted
pub const TRUST_FULL: u8 = 120;

/// Fingerprint of a verifying key: hex SHA-256 of its bytes
pub fn fingerprint_of(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// A public key plus the trust placed in it
#[derive(Debug, Clone)]
pub struct PublicKey {
    verifying: VerifyingKey,
    fingerprint: String,
    trust: u8,
}

impl PublicKey {
    pub fn new(verifying: VerifyingKey, trust: u8) -> Self {
        let fingerprint = fingerprint_of(&verifying);
        Self {
            verifying,
            fingerprint,
            trust,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn trust(&self) -> u8 {
        self.trust
    }

    /// Check a signature over a digest. Returns the key's trust level on
    /// success, `None` for malformed or non-verifying signatures.
    pub fn verify_digest(&self, digest: &[u8], sig: &DigitalSignature) -> Option<u8> {
        let mpis = sig.mpis().ok()?;
        if mpis.len() != 2 {
            return None;
        }
        let mut raw = [0u8; 64];
        for (idx, mpi) in mpis.iter().enumerate() {
            if mpi.len() > 32 {
                return None;
            }
            // left-pad short MPIs back to 32 bytes
            raw[idx * 32 + (32 - mpi.len())..(idx + 1) * 32].copy_from_slice(mpi);
        }
        let signature = Signature::from_bytes(&raw);
        self.verifying.verify(digest, &signature).ok()?;
        Some(self.trust)
    }
}

/// An Ed25519 signing key pair
pub struct SigningKeyPair {
    signing: SigningKey,
    fingerprint: String,
}

impl SigningKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let fingerprint = fingerprint_of(&signing.verifying_key());
        Self {
            signing,
            fingerprint,
        }
    }

    pub fn from_signing_key(signing: SigningKey) -> Self {
        let fingerprint = fingerprint_of(&signing.verifying_key());
        Self {
            signing,
            fingerprint,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// The public half with a trust level attached
    pub fn public_key(&self, trust: u8) -> PublicKey {
        PublicKey::new(self.verifying_key(), trust)
    }

    /// Sign a digest, producing the stream-ready signature record. The
    /// 64-byte Ed25519 signature is framed as two 256-bit MPIs.
    pub fn sign_digest(&self, digest: &[u8], timestamp: u32) -> DigitalSignature {
        let signature = self.signing.sign(digest);
        let raw = signature.to_bytes();
        DigitalSignature::from_parts(
            &self.fingerprint,
            timestamp,
            &[raw[..32].to_vec(), raw[32..].to_vec()],
        )
    }

    /// Save the private key to a TOML key file with owner-only permissions
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let data = KeyFile {
            algorithm: "ed25519".to_string(),
            key: BASE64.encode(self.signing.to_bytes()),
            fingerprint: self.fingerprint.clone(),
        };
        let rendered = toml::to_string_pretty(&data)?;
        fs::write(path, rendered)
            .with_context(|| format!("Failed to write key file: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Load a key pair from a TOML key file
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file: {}", path.display()))?;
        let key_file: KeyFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse key file: {}", path.display()))?;
        if key_file.algorithm != "ed25519" {
            anyhow::bail!("Unsupported key algorithm: {}", key_file.algorithm);
        }
        let raw = BASE64.decode(&key_file.key)?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Ed25519 private key must be 32 bytes"))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes)))
    }
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    algorithm: String,
    key: String,
    fingerprint: String,
}

/// The injected key store: public keys for verification, private keys for
/// signing. The `label_hint` tells networked implementations which
/// repository most likely holds the key; lookups by fingerprint accept a
/// trailing substring the way key IDs abbreviate fingerprints.
pub trait KeyCache {
    /// Fetch a public key by (possibly abbreviated) fingerprint
    fn public_key(&self, fingerprint: &str, label_hint: Option<&Label>) -> Option<&PublicKey>;

    /// Fetch a private key for signing
    fn private_key(&self, key_id: &str) -> Result<&SigningKeyPair>;
}

/// In-memory key cache
#[derive(Default)]
pub struct MemoryKeyCache {
    public: BTreeMap<String, PublicKey>,
    private: BTreeMap<String, SigningKeyPair>,
}

impl MemoryKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_public_key(&mut self, key: PublicKey) {
        self.public.insert(key.fingerprint().to_string(), key);
    }

    /// Add a key pair for signing and make its public half available for
    /// verification at the given trust level
    pub fn add_key_pair(&mut self, pair: SigningKeyPair, trust: u8) {
        self.add_public_key(pair.public_key(trust));
        self.private.insert(pair.fingerprint().to_string(), pair);
    }
}

impl KeyCache for MemoryKeyCache {
    fn public_key(&self, fingerprint: &str, _label_hint: Option<&Label>) -> Option<&PublicKey> {
        if let Some(key) = self.public.get(fingerprint) {
            return Some(key);
        }
        self.public
            .values()
            .find(|key| key.fingerprint().contains(fingerprint))
    }

    fn private_key(&self, key_id: &str) -> Result<&SigningKeyPair> {
        if let Some(pair) = self.private.get(key_id) {
            return Ok(pair);
        }
        self.private
            .values()
            .find(|pair| pair.fingerprint().contains(key_id))
            .ok_or_else(|| Error::KeyNotFound(key_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_digest() {
        let pair = SigningKeyPair::generate();
        let digest = [5u8; 20];
        let sig = pair.sign_digest(&digest, 42);
        let public = pair.public_key(TRUST_FULL);
        assert_eq!(public.verify_digest(&digest, &sig), Some(TRUST_FULL));
        assert_eq!(public.verify_digest(&[6u8; 20], &sig), None);
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let pair = SigningKeyPair::generate();
        assert_eq!(pair.fingerprint().len(), 64);
        assert!(pair.fingerprint().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cache_abbreviated_lookup() {
        let mut cache = MemoryKeyCache::new();
        let pair = SigningKeyPair::generate();
        let fpr = pair.fingerprint().to_string();
        cache.add_key_pair(pair, TRUST_MARGINAL);

        assert!(cache.public_key(&fpr, None).is_some());
        assert!(cache.public_key(&fpr[48..], None).is_some());
        assert!(cache.private_key(&fpr[48..]).is_ok());
        assert!(matches!(
            cache.private_key("0000000000"),
            Err(Error::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_key_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.key");
        let pair = SigningKeyPair::generate();
        pair.save_to_file(&path).unwrap();
        let loaded = SigningKeyPair::load_from_file(&path).unwrap();
        assert_eq!(loaded.fingerprint(), pair.fingerprint());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
