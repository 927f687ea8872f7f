// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod decode;
pub mod hash;
pub mod verify;

use anyhow::Context;

/// Accepts either a content identifier or a 64-digit hex root.
pub fn parse_root(text: &str) -> anyhow::Result<[u8; 32]> {
    let text = text.trim();
    if text.len() == 64 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
        let mut root = [0u8; 32];
        hex::decode_to_slice(text, &mut root).context("invalid hex root")?;
        return Ok(root);
    }
    treehash_kernel::decode_identifier(text).with_context(|| format!("invalid identifier {:?}", text))
}
