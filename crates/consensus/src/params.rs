//! Chain parameter definitions.

use std::fmt;

use crate::constants::BOOTSTRAP_MIN_FREE_SPACE;
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Self::Mainnet),
            "test" | "testnet" => Some(Self::Testnet),
            "regtest" => Some(Self::Regtest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of the genesis block header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GenesisParams {
    pub version: i32,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub message_start: [u8; 4],
    pub genesis: GenesisParams,
    /// Published consensus hash of the genesis block.
    pub hash_genesis_block: Hash256,
    /// Source of the cloud bootstrap archive. Empty when the network has none.
    pub bootstrap_url: &'static str,
    pub min_free_space: u64,
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hash length"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a big-endian display hex string into internal byte order.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.is_empty() || hex.len() > 64 {
        return Err(HexError::InvalidLength);
    }

    let mut padded = String::with_capacity(64);
    for _ in 0..(64 - hex.len()) {
        padded.push('0');
    }
    padded.push_str(hex);

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        let digits = padded.get(start..start + 2).ok_or(HexError::InvalidHex)?;
        *byte_out = u8::from_str_radix(digits, 16).map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();

    Ok(bytes)
}

const GENESIS_MERKLE_ROOT_HEX: &str =
    "a15f3ecb4e6f79d2ab863192d1f021acb600ceb01d38b29f4bfc9a1775e646c5";

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => mainnet_chain_params(),
        Network::Testnet => testnet_chain_params(),
        Network::Regtest => regtest_chain_params(),
    }
}

fn genesis_merkle_root() -> Hash256 {
    hash256_from_hex(GENESIS_MERKLE_ROOT_HEX).expect("genesis merkle root")
}

fn mainnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Mainnet,
        message_start: [0x21, 0xdd, 0xae, 0xe1],
        genesis: GenesisParams {
            version: 1,
            merkle_root: genesis_merkle_root(),
            time: 1_525_482_708,
            bits: 0x1e0f_fff0,
            nonce: 400_025,
        },
        hash_genesis_block: hash256_from_hex(
            "000007c79348b5aaf2e08c5904e6751fdcb6d705402cb5b77fa68f2718390cae",
        )
        .expect("mainnet genesis hash"),
        bootstrap_url: "https://opcx.info/bootstrap/v1/main",
        min_free_space: BOOTSTRAP_MIN_FREE_SPACE,
    }
}

fn testnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Testnet,
        message_start: [0x26, 0x72, 0xa6, 0xbd],
        genesis: GenesisParams {
            version: 1,
            merkle_root: genesis_merkle_root(),
            time: 1_520_769_358,
            bits: 0x1e0f_fff0,
            nonce: 823_545,
        },
        hash_genesis_block: hash256_from_hex(
            "00000d0a3f1e85d21f9e6bb8a8c6ebc2b994c0ea5e99b2c7f3ceeabf1ef1ccab",
        )
        .expect("testnet genesis hash"),
        bootstrap_url: "https://opcx.io/bootstrap/v1/test",
        min_free_space: BOOTSTRAP_MIN_FREE_SPACE,
    }
}

fn regtest_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Regtest,
        message_start: [0x26, 0x72, 0xa6, 0xbd],
        genesis: GenesisParams {
            version: 1,
            merkle_root: genesis_merkle_root(),
            time: 1_525_482_708,
            bits: 0x207f_ffff,
            nonce: 12_345,
        },
        hash_genesis_block: hash256_from_hex(
            "647ceccaa95bcc7647fb41ece2b7b6c2e082d0ea94405fef7af88e11e0cdd2a8",
        )
        .expect("regtest genesis hash"),
        bootstrap_url: "",
        min_free_space: BOOTSTRAP_MIN_FREE_SPACE,
    }
}
