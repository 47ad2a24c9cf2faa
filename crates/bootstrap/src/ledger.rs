//! Checks that extracted ledger data is complete and belongs to the selected network.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use ledgerboot_consensus::constants::{BLOCK_HEADER_SIZE, MAX_BLOCK_SIZE, MESSAGE_START_SIZE};
use ledgerboot_consensus::Hash256;
use ledgerboot_primitives::block::BlockHeader;
use ledgerboot_primitives::encoding::{Decodable, Decoder};
use ledgerboot_primitives::{hash256_to_hex, hex_lower, sha256_reader};

use crate::error::BootstrapError;
use crate::layout::{rename, with_suffix, LEDGER_DIRS, TMP_SUFFIX};
use crate::params::BootstrapParams;

/// First block segment file inside `blocks/`.
pub const FIRST_SEGMENT_NAME: &str = "blk00000.dat";

/// magic + little-endian record length
const RECORD_PREFIX_SIZE: usize = MESSAGE_START_SIZE + 4;

pub fn verify_layout(staging: &Path) -> Result<(), BootstrapError> {
    for name in LEDGER_DIRS {
        let dir = staging.join(name);
        if !dir.is_dir() {
            return Err(BootstrapError::Integrity(format!(
                "verification failed, {} does not exist",
                dir.display()
            )));
        }
    }
    Ok(())
}

/// Reads the first block record of the staged ledger and checks it is this network's genesis.
///
/// Returns the network's genesis hash once the stored header matches the genesis header.
pub fn verify_network_identity(
    staging: &Path,
    params: &BootstrapParams,
) -> Result<Hash256, BootstrapError> {
    let path = staging.join(LEDGER_DIRS[0]).join(FIRST_SEGMENT_NAME);
    let failed = |detail: String| {
        BootstrapError::Integrity(format!(
            "bootstrap verification failed for {}: {detail}",
            path.display()
        ))
    };

    let mut file =
        File::open(&path).map_err(|err| failed(format!("cannot open block file ({err})")))?;
    let mut prefix = [0u8; RECORD_PREFIX_SIZE];
    read_record_bytes(&mut file, &mut prefix).map_err(|err| failed(err))?;

    let magic = &prefix[..MESSAGE_START_SIZE];
    if magic != params.message_start {
        return Err(failed(format!(
            "invalid network magic {}, expected {} ({})",
            hex_lower(magic),
            hex_lower(&params.message_start),
            params.network
        )));
    }

    let size = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    if (size as usize) < BLOCK_HEADER_SIZE || size > MAX_BLOCK_SIZE {
        return Err(failed(format!(
            "invalid block size {size}, expected {BLOCK_HEADER_SIZE}..={MAX_BLOCK_SIZE}"
        )));
    }

    let mut record = vec![0u8; size as usize];
    read_record_bytes(&mut file, &mut record).map_err(|err| failed(err))?;

    let mut decoder = Decoder::new(&record);
    let header = <BlockHeader as Decodable>::consensus_decode(&mut decoder)
        .map_err(|err| failed(format!("malformed block record ({err})")))?;
    let tx_count = decoder
        .read_varint()
        .map_err(|err| failed(format!("malformed block record ({err})")))?;
    if tx_count == 0 {
        return Err(failed("malformed block record (no transactions)".to_string()));
    }

    let expected = &params.genesis_header;
    if header != *expected {
        return Err(failed(format!(
            "block {} does not match genesis block {} {} ({})",
            describe_header(&header),
            hash256_to_hex(&params.genesis_hash),
            describe_header(expected),
            params.network
        )));
    }
    Ok(params.genesis_hash)
}

/// Identifying header fields, as printed in identity errors.
fn describe_header(header: &BlockHeader) -> String {
    format!(
        "[merkle root {}, time {}, bits {:08x}, nonce {}]",
        hash256_to_hex(&header.merkle_root),
        header.time,
        header.bits,
        header.nonce
    )
}

fn read_record_bytes(file: &mut File, buf: &mut [u8]) -> Result<(), String> {
    file.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            format!("block file truncated (wanted {} more bytes)", buf.len())
        } else {
            format!("read error ({err})")
        }
    })
}

/// SHA-256 of the archive, streamed from disk.
pub fn archive_digest(archive: &Path) -> Result<Hash256, BootstrapError> {
    let file = File::open(archive).map_err(BootstrapError::io_at("open", archive))?;
    sha256_reader(file).map_err(BootstrapError::io_at("read", archive))
}

/// Writes the lowercase hex digest of `archive` into `marker` and returns it.
///
/// The marker is written to a temporary sibling first so a crash never leaves a
/// half-written marker in place.
pub fn write_verified_marker(archive: &Path, marker: &Path) -> Result<String, BootstrapError> {
    let digest = hex_lower(&archive_digest(archive)?);
    let tmp = with_suffix(marker, TMP_SUFFIX);
    fs::write(&tmp, digest.as_bytes()).map_err(BootstrapError::io_at("create", &tmp))?;
    rename(&tmp, marker)?;
    Ok(digest)
}

pub fn read_verified_marker(marker: &Path) -> Result<String, BootstrapError> {
    fs::read_to_string(marker).map_err(BootstrapError::io_at("read", marker))
}
