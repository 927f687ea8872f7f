// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Incremental BLAKE3 tree hashing with a Bao outboard.
//!
//! The encoder accepts input in pieces of any size; the root and the outboard
//! depend only on the concatenated bytes, never on how they were split.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use bao::encode::Encoder;
use memmap2::Mmap;

use crate::config::COPY_BUFFER_SIZE;
use crate::error::TreeResult;
use crate::proof::HashResult;

/// One in-progress tree computation. The outboard accumulates in memory.
pub struct TreeEncoder {
    encoder: Encoder<Cursor<Vec<u8>>>,
    length: u64,
}

impl TreeEncoder {
    pub fn new() -> Self {
        Self {
            encoder: Encoder::new_outboard(Cursor::new(Vec::new())),
            length: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) -> TreeResult<()> {
        self.encoder.write_all(data)?;
        self.length += data.len() as u64;
        Ok(())
    }

    /// Bytes fed so far.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Closes the tree and returns root, outboard and length.
    pub fn finalize(mut self) -> TreeResult<HashResult> {
        let root = self.encoder.finalize()?;
        let proof = self.encoder.into_inner().into_inner();
        Ok(HashResult::new(*root.as_bytes(), proof, self.length))
    }
}

impl Default for TreeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TreeEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeEncoder").field("length", &self.length).finish()
    }
}

/// Hashes an in-memory buffer in one call.
pub fn encode_bytes(data: &[u8]) -> HashResult {
    let (proof, root) = bao::encode::outboard(data);
    HashResult::new(*root.as_bytes(), proof, data.len() as u64)
}

/// Drains `reader` into a fresh tree.
pub fn encode_reader(reader: &mut impl Read) -> TreeResult<HashResult> {
    let mut encoder = TreeEncoder::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        encoder.update(&buf[..n])?;
    }
    encoder.finalize()
}

/// Hashes a file by mapping it into memory. Pipes, character devices and
/// other files that cannot be mapped are read through instead.
pub fn encode_file(path: impl AsRef<Path>) -> TreeResult<HashResult> {
    let mut file = File::open(path)?;
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return encode_reader(&mut file);
    }

    let mut encoder = TreeEncoder::new();
    // Zero-length mappings are rejected by the OS.
    if metadata.len() > 0 {
        // The file is only read; concurrent truncation by another process is
        // outside what the caller may do while a hash is in flight.
        let map = unsafe { Mmap::map(&file)? };
        encoder.update(&map)?;
    }

    encoder.finalize()
}
