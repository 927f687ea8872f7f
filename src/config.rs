// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Configuration constants.

/// Width of a tree root (BLAKE3 output) in bytes.
pub const ROOT_HASH_LEN: usize = 32;

/// Type tag prepended to the root before base58 encoding.
/// Marks "BLAKE3 tree root, 32 bytes".
pub const CID_TAG: [u8; 2] = [0x26, 0x1f];

/// Size of the little-endian length header at the front of every outboard.
pub const OUTBOARD_HEADER_LEN: usize = 8;

/// Read buffer for whole-reader encoding. At least 16 KiB lets BLAKE3 use AVX-512.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Root of the empty input, identical to `blake3("")`.
pub const EMPTY_ROOT_HEX: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";
