// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Content identifiers.
//!
//! Text form: `z` + base58btc(`26 1f` ++ root). The leading `z` is the
//! multibase marker for base58btc, the two tag bytes mark the payload as a
//! 32-byte BLAKE3 tree root.

use std::fmt;
use std::str::FromStr;

use multibase::Base;

use crate::config::{CID_TAG, ROOT_HASH_LEN};
use crate::error::CodecError;

/// A tree root together with its textual identifier form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentIdentifier {
    root: [u8; ROOT_HASH_LEN],
}

impl ContentIdentifier {
    pub fn new(root: [u8; ROOT_HASH_LEN]) -> Self {
        Self { root }
    }

    /// Builds an identifier from an unsized digest, rejecting anything but 32 bytes.
    pub fn from_digest(digest: &[u8]) -> Result<Self, CodecError> {
        let root: [u8; ROOT_HASH_LEN] = digest
            .try_into()
            .map_err(|_| CodecError::InvalidDigestLength(digest.len()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &[u8; ROOT_HASH_LEN] {
        &self.root
    }

    /// Lowercase hex of the bare root.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.root)
    }

    fn tagged(&self) -> [u8; CID_TAG.len() + ROOT_HASH_LEN] {
        let mut buf = [0u8; CID_TAG.len() + ROOT_HASH_LEN];
        buf[..CID_TAG.len()].copy_from_slice(&CID_TAG);
        buf[CID_TAG.len()..].copy_from_slice(&self.root);
        buf
    }
}

impl fmt::Display for ContentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&multibase::encode(Base::Base58Btc, self.tagged()))
    }
}

impl FromStr for ContentIdentifier {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, data) = multibase::decode(s).map_err(|e| CodecError::Malformed(e.to_string()))?;
        if base != Base::Base58Btc {
            return Err(CodecError::UnsupportedBase(format!("{:?}", base)));
        }
        if data.len() < CID_TAG.len() {
            return Err(CodecError::Malformed(format!("{} bytes after decoding", data.len())));
        }

        let (tag, root) = data.split_at(CID_TAG.len());
        if tag != CID_TAG {
            return Err(CodecError::InvalidTag(hex::encode(tag)));
        }

        Self::from_digest(root)
    }
}

/// Encodes a 32-byte tree root as its textual identifier.
pub fn encode_identifier(root_hash: &[u8]) -> Result<String, CodecError> {
    Ok(ContentIdentifier::from_digest(root_hash)?.to_string())
}

/// Exact inverse of [`encode_identifier`].
pub fn decode_identifier(identifier: &str) -> Result<[u8; ROOT_HASH_LEN], CodecError> {
    Ok(*identifier.parse::<ContentIdentifier>()?.root())
}
