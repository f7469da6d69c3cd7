//! The 160-bit cryptographic strong hash.
//!
//! The original C++ used `CryptoPP::SHA1`; this crate uses the `sha1`
//! crate's `Sha1` type through the RustCrypto `Digest` trait, which is the
//! choice `oferchen-rsync/crates/checksums` makes for the same role.

use sha1::{Digest, Sha1};

use crate::config::STRONG_HASH_LEN;

/// A 20-byte strong content hash.
pub type StrongHash = [u8; STRONG_HASH_LEN];

/// Computes the strong hash of a single byte slice in one call.
pub fn hash(bytes: &[u8]) -> StrongHash {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Incremental strong-hash accumulator, used both for per-block hashes and
/// for the whole-file digest that runs alongside them.
#[derive(Default)]
pub struct StrongHasher(Sha1);

impl StrongHasher {
    pub fn new() -> Self {
        Self(Sha1::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> StrongHash {
        self.0.finalize().into()
    }
}
