// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use treehash_kernel::HashResult;

use super::parse_root;

/// Checks `len` bytes at `offset` of `content_path` against `root` and the
/// proof stored at `proof_path`. Without a range the whole file is checked.
pub fn run(
    content_path: &Path,
    proof_path: &Path,
    root: &str,
    offset: u64,
    len: Option<u64>,
) -> anyhow::Result<Vec<u8>> {
    let root_hash = parse_root(root)?;
    let proof = std::fs::read(proof_path)
        .with_context(|| format!("reading proof {}", proof_path.display()))?;

    let mut result = HashResult::new(root_hash, proof, 0);
    result.length = result.declared_length()?;

    let content = File::open(content_path)
        .with_context(|| format!("opening {}", content_path.display()))?;
    let len = len.unwrap_or_else(|| result.length.saturating_sub(offset));

    match result.read_verified(BufReader::new(content), offset, len) {
        Ok(bytes) => {
            println!("\n✅ VERIFIED\n");
            println!("Identifier: {}", result.identifier());
            println!("Range:      {}..{} of {} bytes\n", offset, offset + len, result.length);
            Ok(bytes)
        }
        Err(e) => {
            println!("\n❌ VERIFICATION FAILED\n");
            println!("Identifier: {}", result.identifier());
            Err(e.into())
        }
    }
}
