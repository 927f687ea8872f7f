// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! treehash-kernel: BLAKE3/Bao tree hashing, outboard proofs and content identifiers.
//!
//! Everything in this crate is pure and in-process. The isolated worker
//! (`treehash-node`) drives [`tree::TreeEncoder`] on the far side of its RPC
//! boundary; hosts only ever see the finished [`proof::HashResult`] and the
//! textual [`cid::ContentIdentifier`].

pub mod config;
pub mod error;
pub mod cid;
pub mod tree;
pub mod proof;

pub use cid::{decode_identifier, encode_identifier, ContentIdentifier};
pub use error::{CodecError, TreeError, TreeResult};
pub use proof::HashResult;
pub use tree::TreeEncoder;
