// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use std::io;
use thiserror::Error;

/// Failures of the content identifier codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid digest length: expected 32 bytes, got {0}")]
    InvalidDigestLength(usize),
    #[error("Invalid identifier tag: expected 261f, found {0}")]
    InvalidTag(String),
    #[error("Unsupported multibase encoding: {0}")]
    UnsupportedBase(String),
    #[error("Malformed identifier: {0}")]
    Malformed(String),
}

/// Failures while building or checking a tree.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Proof is truncated: {0} bytes")]
    TruncatedProof(usize),
    #[error("Length mismatch: proof declares {declared} bytes, result records {recorded}")]
    LengthMismatch { declared: u64, recorded: u64 },
    #[error("Range {offset}+{len} exceeds content length {length}")]
    RangeOutOfBounds { offset: u64, len: u64, length: u64 },
    #[error("Verification failed: {0}")]
    Verification(String),
}

pub type TreeResult<T> = std::result::Result<T, TreeError>;
