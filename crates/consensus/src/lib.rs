//! Network identity constants and per-network chain parameters.

pub mod constants;
pub mod params;

pub use params::{chain_params, hash256_from_hex, ChainParams, GenesisParams, HexError, Network};

/// 32-byte hash in internal (little-endian) byte order.
pub type Hash256 = [u8; 32];
