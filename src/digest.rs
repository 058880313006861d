// src/digest.rs

//! Digest helpers for trove signatures and path hashing
//!
//! Three digests feed the trove signature scheme:
//! - **SHA-1** for version-0 (classic) trove and metadata digests
//! - **Non-standard SHA-256** for version-1 and version-2 digests
//! - **MD5**, truncated to 8 bytes, for path hashes
//!
//! The "non-standard" SHA-256 reproduces a historical padding defect: when
//! the message length is congruent to 55 mod 64, the implementation emits an
//! extra all-zero block before the length block. Every other input produces
//! standard SHA-256 output. Existing signed artifacts depend on the defect,
//! so it is preserved bit-exactly here.

use md5::Md5;
use sha1::Sha1;
use sha2::digest::generic_array::GenericArray;
use sha2::{Digest, compress256};

/// Length of a SHA-1 digest (and a FileId) in bytes
pub const SHA1_LEN: usize = 20;

/// Length of a SHA-256 digest in bytes
pub const SHA256_LEN: usize = 32;

/// Length of a path hash token in bytes
pub const PATH_HASH_LEN: usize = 8;

/// SHA-1 of a byte string
pub fn sha1_bytes(data: &[u8]) -> [u8; SHA1_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// MD5 of a byte string
pub fn md5_bytes(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First 8 bytes of the MD5 of a path, the token stored in path-hash sets
pub fn path_hash(path: &str) -> [u8; PATH_HASH_LEN] {
    let digest = md5_bytes(path.as_bytes());
    let mut token = [0u8; PATH_HASH_LEN];
    token.copy_from_slice(&digest[..PATH_HASH_LEN]);
    token
}

/// Non-standard SHA-256 of a byte string
pub fn nonstandard_sha256_bytes(data: &[u8]) -> [u8; SHA256_LEN] {
    let mut hasher = NonStandardSha256::new();
    hasher.update(data);
    hasher.finalize()
}

type Block = GenericArray<u8, sha2::digest::consts::U64>;

/// Streaming non-standard SHA-256
///
/// Uses the standard compression function; only the final padding differs
/// (see module docs). Message lengths are tracked modulo 2^32 bits, matching
/// the original 32-bit length counter.
pub struct NonStandardSha256 {
    state: [u32; 8],
    buf: [u8; 64],
    curlen: usize,
    length: u32,
}

impl NonStandardSha256 {
    pub fn new() -> Self {
        Self {
            state: [
                0x6A09E667, 0xBB67AE85, 0x3C6EF372, 0xA54FF53A, 0x510E527F, 0x9B05688C,
                0x1F83D9AB, 0x5BE0CD19,
            ],
            buf: [0u8; 64],
            curlen: 0,
            length: 0,
        }
    }

    fn compress(&mut self) {
        let block = Block::from_slice(&self.buf);
        compress256(&mut self.state, std::slice::from_ref(block));
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.buf[self.curlen] = byte;
            self.curlen += 1;
            if self.curlen == 64 {
                self.compress();
                self.length = self.length.wrapping_add(512);
                self.curlen = 0;
            }
        }
    }

    pub fn finalize(mut self) -> [u8; SHA256_LEN] {
        self.length = self.length.wrapping_add((self.curlen as u32) * 8);

        self.buf[self.curlen] = 0x80;
        self.curlen += 1;

        // The historic bug: `>=` where the standard algorithm uses `>`.
        // At curlen == 56 the length still fits, but an extra block is
        // emitted anyway.
        if self.curlen >= 56 {
            for i in self.curlen..64 {
                self.buf[i] = 0;
            }
            self.compress();
            self.curlen = 0;
        }

        for i in self.curlen..56 {
            self.buf[i] = 0;
        }

        // 32-bit length counter, so the top four length bytes are zero
        self.buf[56..60].copy_from_slice(&[0, 0, 0, 0]);
        self.buf[60..64].copy_from_slice(&self.length.to_be_bytes());
        self.compress();

        let mut out = [0u8; SHA256_LEN];
        for (i, word) in self.state.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        out
    }
}

impl Default for NonStandardSha256 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::Sha256;

    fn standard_sha256(data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    #[test]
    fn test_matches_standard_for_most_lengths() {
        for len in [0usize, 1, 31, 54, 56, 63, 64, 100, 120, 200] {
            let data = vec![0xabu8; len];
            assert_eq!(
                nonstandard_sha256_bytes(&data),
                standard_sha256(&data),
                "length {} should match standard SHA-256",
                len
            );
        }
    }

    #[test]
    fn test_diverges_at_55_mod_64() {
        for len in [55usize, 119, 183] {
            let data = vec![0xabu8; len];
            assert_ne!(
                nonstandard_sha256_bytes(&data),
                standard_sha256(&data),
                "length {} should hit the padding defect",
                len
            );
        }
    }

    #[test]
    fn test_incremental_update_equals_oneshot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut hasher = NonStandardSha256::new();
        for chunk in data.chunks(7) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.finalize(), nonstandard_sha256_bytes(data));
    }

    #[test]
    fn test_path_hash_is_md5_prefix() {
        let h = path_hash("/bin/ls");
        assert_eq!(&h[..], &md5_bytes(b"/bin/ls")[..8]);
    }
}
