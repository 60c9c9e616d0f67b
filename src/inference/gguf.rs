//! GGUF header preflight
//!
//! Cheap check run before handing a file to llama.cpp, so an obviously wrong
//! file is rejected with a readable error instead of a native load failure.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use thiserror::Error;

/// GGUF magic bytes (little-endian: "GGUF")
pub const GGUF_MAGIC: u32 = 0x46554747;

/// magic(4) + version(4) + tensor_count(8) + metadata_kv_count(8)
const HEADER_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum GgufError {
    #[error("Failed to read model file: {0}")]
    Io(#[from] io::Error),

    #[error("Not a GGUF file: magic 0x{0:08X}")]
    InvalidMagic(u32),

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("File too small to be a GGUF model")]
    Truncated,
}

/// Fixed-size header at the start of every GGUF file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

/// Reads and checks the GGUF header of the file at `path`.
///
/// Only versions 2 and 3 are accepted.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<GgufHeader, GgufError> {
    let mut buf = [0u8; HEADER_LEN];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < HEADER_LEN {
        match file.read(&mut buf[filled..])? {
            0 => return Err(GgufError::Truncated),
            n => filled += n,
        }
    }
    parse_header(&buf)
}

fn parse_header(buf: &[u8; HEADER_LEN]) -> Result<GgufHeader, GgufError> {
    let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
    let dword = |at: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[at..at + 8]);
        u64::from_le_bytes(bytes)
    };

    let magic = word(0);
    if magic != GGUF_MAGIC {
        return Err(GgufError::InvalidMagic(magic));
    }
    let version = word(4);
    if !(2..=3).contains(&version) {
        return Err(GgufError::UnsupportedVersion(version));
    }

    Ok(GgufHeader {
        version,
        tensor_count: dword(8),
        metadata_kv_count: dword(16),
    })
}
