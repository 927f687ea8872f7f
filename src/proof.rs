// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Hash results and verified range reads.

use std::io::{Cursor, Read, Seek};

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::cid::ContentIdentifier;
use crate::config::{OUTBOARD_HEADER_LEN, ROOT_HASH_LEN};
use crate::error::{TreeError, TreeResult};

/// The finished output of one tree computation.
///
/// `proof` is the Bao outboard: an 8-byte little-endian length header followed
/// by the parent hashes in pre-order. Together with `root_hash` it lets a reader
/// verify any byte range of the content without hashing the rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashResult {
    pub root_hash: [u8; ROOT_HASH_LEN],
    pub proof: Vec<u8>,
    pub length: u64,
}

impl HashResult {
    pub fn new(root_hash: [u8; ROOT_HASH_LEN], proof: Vec<u8>, length: u64) -> Self {
        Self { root_hash, proof, length }
    }

    pub fn identifier(&self) -> ContentIdentifier {
        ContentIdentifier::new(self.root_hash)
    }

    /// Content length recorded in the outboard header.
    pub fn declared_length(&self) -> TreeResult<u64> {
        if self.proof.len() < OUTBOARD_HEADER_LEN {
            return Err(TreeError::TruncatedProof(self.proof.len()));
        }
        Ok(LittleEndian::read_u64(&self.proof[..OUTBOARD_HEADER_LEN]))
    }

    /// Checks that the outboard header and `length` agree.
    pub fn check(&self) -> TreeResult<()> {
        let declared = self.declared_length()?;
        if declared != self.length {
            return Err(TreeError::LengthMismatch { declared, recorded: self.length });
        }
        Ok(())
    }

    /// Reads `len` bytes at `offset` from `content`, verifying them against
    /// the root. `content` must be the full original content.
    pub fn read_verified<C: Read + Seek>(&self, content: C, offset: u64, len: u64) -> TreeResult<Vec<u8>> {
        self.check()?;
        let end = offset.checked_add(len);
        if end.map_or(true, |end| end > self.length) {
            return Err(TreeError::RangeOutOfBounds { offset, len, length: self.length });
        }

        let mut extractor =
            bao::encode::SliceExtractor::new_outboard(content, Cursor::new(&self.proof[..]), offset, len);
        let mut slice = Vec::new();
        extractor.read_to_end(&mut slice)?;

        let root = bao::Hash::from(self.root_hash);
        let mut decoder = bao::decode::SliceDecoder::new(&slice[..], &root, offset, len);
        let mut out = Vec::with_capacity(len as usize);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| TreeError::Verification(e.to_string()))?;
        Ok(out)
    }

    /// Verifies that `content` is exactly what this result was computed over.
    pub fn verify_content(&self, content: &[u8]) -> TreeResult<()> {
        let expected = crate::tree::encode_bytes(content);
        if expected.root_hash != self.root_hash {
            return Err(TreeError::Verification(format!(
                "root mismatch: expected {}, computed {}",
                hex::encode(self.root_hash),
                hex::encode(expected.root_hash)
            )));
        }
        if expected.proof != self.proof || expected.length != self.length {
            return Err(TreeError::Verification("outboard does not match content".to_string()));
        }
        Ok(())
    }
}
