//! Named constants used across the delta engine, gathered in one place
//! instead of scattered as magic numbers through the component modules.

/// Upper bound on the in-memory size of a signature table:
/// `ceil(file_size / block_size) * sizeof(entry) <= SIGNATURE_TABLE_CAP_BYTES`.
pub const SIGNATURE_TABLE_CAP_BYTES: u64 = 64 << 20;

/// Starting block size the scaling rule doubles from.
pub const MIN_BLOCK_SIZE: u64 = 512;

/// On-disk stride of one persisted `SignatureEntry`: 4 (weak) + 20 (strong)
/// + 8 (offset) bytes.
pub const SIGNATURE_ENTRY_STRIDE: u64 = 32;

/// Byte width of the strong cryptographic digest (SHA-1, 160 bits).
pub const STRONG_HASH_LEN: usize = 20;

/// Default capacity of the disk-staging buffer the block reader prefetches
/// into, used when the caller's requested block size is small enough that
/// prefetching one block at a time is still cheap.
pub const DEFAULT_PREFETCH_BLOCK_SIZE: usize = 1 << 13;

/// Depth of the bounded handoff channel between the comparer's producer
/// and the new-file signature worker.
pub const SIGNATURE_WORKER_QUEUE_DEPTH: usize = 8;
