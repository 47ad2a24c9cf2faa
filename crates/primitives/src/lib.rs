//! Ledger record types and the hashing used to identify them.

pub mod block;
pub mod encoding;
pub mod hash;

pub use block::{genesis_header, BlockHeader};
pub use hash::{hash256_to_hex, hex_lower, sha256, sha256_reader};
