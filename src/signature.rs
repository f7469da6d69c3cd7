//! Signature table builder, the `RsyncableFile` equivalent.
//!
//! Grounded on the original `RsyncableFile.cpp`/`.h`: the block-size
//! scaling rule in [`scaler_function`] is a direct port of
//! `RsyncableFile::scaler_function`, and [`build_signature`] follows the
//! same read-hash-sort sequence as `RsyncableFile`'s constructor.

use std::path::Path;

use crate::block_reader::BlockReader;
use crate::buffer::CircularBuffer;
use crate::config::{MIN_BLOCK_SIZE, SIGNATURE_ENTRY_STRIDE, SIGNATURE_TABLE_CAP_BYTES};
use crate::error::Result;
use crate::rolling;
use crate::strong::{self, StrongHash, StrongHasher};
use serde::{Deserialize, Serialize};

/// One `(weak, strong, offset)` signature entry, totally ordered by that
/// tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub weak: u32,
    pub strong: StrongHash,
    pub offset: u64,
}

impl SignatureEntry {
    /// Encodes this entry in the persisted 32-byte little-endian stride:
    /// `weak:4, strong:20, offset:8`.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_ENTRY_STRIDE as usize] {
        let mut buf = [0u8; SIGNATURE_ENTRY_STRIDE as usize];
        buf[0..4].copy_from_slice(&self.weak.to_le_bytes());
        buf[4..24].copy_from_slice(&self.strong);
        buf[24..32].copy_from_slice(&self.offset.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; SIGNATURE_ENTRY_STRIDE as usize]) -> Self {
        let mut weak_bytes = [0u8; 4];
        weak_bytes.copy_from_slice(&bytes[0..4]);
        let mut strong = [0u8; 20];
        strong.copy_from_slice(&bytes[4..24]);
        let mut offset_bytes = [0u8; 8];
        offset_bytes.copy_from_slice(&bytes[24..32]);
        Self {
            weak: u32::from_le_bytes(weak_bytes),
            strong,
            offset: u64::from_le_bytes(offset_bytes),
        }
    }
}

/// A sorted signature table for one file version plus its whole-file
/// digest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureTable {
    block_size: u64,
    entries: Vec<SignatureEntry>,
    digest: StrongHash,
}

impl SignatureTable {
    /// Assembles a table from already-computed parts. Used by the comparer,
    /// which builds the new file's table on a worker thread rather than via
    /// [`build_signature`].
    pub fn from_parts(block_size: u64, entries: Vec<SignatureEntry>, digest: StrongHash) -> Self {
        Self {
            block_size,
            entries,
            digest,
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn digest(&self) -> &StrongHash {
        &self.digest
    }

    pub fn entries(&self) -> &[SignatureEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Chooses a block size for a file of `file_size` bytes such that the
/// resulting signature table stays within [`SIGNATURE_TABLE_CAP_BYTES`]:
/// start at [`MIN_BLOCK_SIZE`] and double while
/// `ceil(file_size / block_size) * SIGNATURE_ENTRY_STRIDE` would exceed
/// the cap.
pub fn scaler_function(file_size: u64) -> u64 {
    let mut block_size = MIN_BLOCK_SIZE;
    while blocks_per_file(file_size, block_size) * SIGNATURE_ENTRY_STRIDE > SIGNATURE_TABLE_CAP_BYTES
    {
        block_size <<= 1;
    }
    block_size
}

fn blocks_per_file(file_size: u64, block_size: u64) -> u64 {
    if file_size == 0 {
        0
    } else {
        (file_size + block_size - 1) / block_size
    }
}

/// Builds a signature table for the file at `path`: chooses a block size,
/// reads the file one block at a time, and records `(weak, strong,
/// offset)` for each block while folding every block into a running
/// whole-file digest. The table is sorted lexicographically by
/// `(weak, strong, offset)` before being returned.
pub fn build_signature(path: impl AsRef<Path>) -> Result<SignatureTable> {
    let path = path.as_ref();
    let file_size = std::fs::metadata(path)
        .map_err(|e| crate::error::Error::io(path, e))?
        .len();
    let block_size = scaler_function(file_size);

    tracing::debug!(file = %path.display(), file_size, block_size, "building signature table");

    let mut reader = BlockReader::open(path, block_size as usize)?;
    let mut entries = Vec::with_capacity(blocks_per_file(file_size, block_size) as usize);
    let mut global = StrongHasher::new();
    let mut offset: u64 = 0;
    let mut block = CircularBuffer::new(block_size as usize);

    while reader.next_block(&mut block)? {
        let mut bytes = Vec::with_capacity(block.size());
        block.process_whole(|chunk| bytes.extend_from_slice(chunk));

        let weak = rolling::compute(&bytes);
        let strong = strong::hash(&bytes);
        global.update(&bytes);

        entries.push(SignatureEntry {
            weak,
            strong,
            offset,
        });
        offset += bytes.len() as u64;
    }

    entries.sort();

    Ok(SignatureTable {
        block_size,
        entries,
        digest: global.finalize(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn block_size_starts_at_minimum_for_small_files() {
        assert_eq!(scaler_function(0), 512);
        assert_eq!(scaler_function(1000), 512);
    }

    #[test]
    fn block_size_scaling_respects_cap() {
        // ceil(F/B) * 32 <= 64 MiB, and either B == 512 or the half-size
        // block would have exceeded the cap.
        for file_size in [0u64, 1, 512, 1_000_000, 5_000_000_000] {
            let block_size = scaler_function(file_size);
            let blocks = blocks_per_file(file_size, block_size);
            assert!(blocks * SIGNATURE_ENTRY_STRIDE <= SIGNATURE_TABLE_CAP_BYTES);
            if block_size != MIN_BLOCK_SIZE {
                let half = block_size / 2;
                let half_blocks = blocks_per_file(file_size, half);
                assert!(half_blocks * SIGNATURE_ENTRY_STRIDE > SIGNATURE_TABLE_CAP_BYTES);
            }
        }
    }

    #[test]
    fn empty_file_has_no_entries() {
        let file = write_temp(&[]);
        let sig = build_signature(file.path()).unwrap();
        assert!(sig.is_empty());
        assert_eq!(sig.digest(), &strong::hash(b""));
    }

    #[test]
    fn entries_are_sorted_and_cover_every_block() {
        let data: Vec<u8> = (0u8..=255).cycle().take(20_000).collect();
        let file = write_temp(&data);
        let sig = build_signature(file.path()).unwrap();
        assert!(sig.entries().windows(2).all(|w| w[0] <= w[1]));

        let mut offsets: Vec<u64> = sig.entries().iter().map(|e| e.offset).collect();
        offsets.sort();
        let mut expected = 0u64;
        for off in &offsets {
            assert_eq!(*off, expected);
            expected += sig.block_size();
        }
    }

    #[test]
    fn signature_entry_byte_round_trip() {
        let entry = SignatureEntry {
            weak: 0xdead_beef,
            strong: [7u8; 20],
            offset: 123456,
        };
        let bytes = entry.to_bytes();
        assert_eq!(SignatureEntry::from_bytes(&bytes), entry);
    }
}
