//! Network-wide constants shared by ledger readers.

/// Size of the message-start magic that prefixes every block record on disk.
pub const MESSAGE_START_SIZE: usize = 4;
/// Serialized size of a block header.
pub const BLOCK_HEADER_SIZE: usize = 80;
/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: u32 = 2_000_000;
/// Expected size of a fully synced ledger on disk. Not network specific.
pub const BLOCKCHAIN_SIZE_BYTES: u64 = 2 * 1_000_000_000;
/// Free space required in the data directory before a bootstrap may start.
pub const BOOTSTRAP_MIN_FREE_SPACE: u64 = 2 * BLOCKCHAIN_SIZE_BYTES;
