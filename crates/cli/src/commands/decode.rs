// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use treehash_kernel::ContentIdentifier;

/// Prints the hex root behind an identifier.
pub fn run(identifier: &str) -> anyhow::Result<String> {
    let cid: ContentIdentifier = identifier.trim().parse()?;
    let root = cid.hash_hex();
    println!("{}", root);
    Ok(root)
}
