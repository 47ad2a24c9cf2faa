use std::io::{self, Read};

use ledgerboot_consensus::Hash256;
use sha2::{Digest, Sha256};

const STREAM_CHUNK: usize = 64 * 1024;

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// SHA-256 of everything `reader` yields, read in fixed-size chunks.
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<Hash256> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; STREAM_CHUNK];
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buf[..read]);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Ok(out)
}

pub fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(hex_digit(byte >> 4));
        out.push(hex_digit(byte & 0x0f));
    }
    out
}

/// Display form of a hash: byte-reversed lowercase hex.
pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex_lower(&reversed)
}

fn hex_digit(value: u8) -> char {
    match value {
        0..=9 => (b'0' + value) as char,
        _ => (b'a' + (value - 10)) as char,
    }
}
