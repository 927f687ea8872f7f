// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Public hashing entry points.
//!
//! Streams are cut into fixed-size chunks and pushed through a session; files
//! already on disk go straight to the worker, which maps them itself. Both
//! paths produce the same [`HashResult`] for the same bytes, whatever the
//! chunk size.

use std::io;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt};
use treehash_kernel::HashResult;

use crate::config::{WorkerConfig, MAX_CHUNK_SIZE};
use crate::errors::{HashError, Result};
use crate::protocol::SessionHandle;
use crate::registry::SessionRegistry;
use crate::transport::WorkerRpc;

pub struct HashCoordinator<R> {
    registry: SessionRegistry<R>,
    chunk_size: usize,
}

impl<R: WorkerRpc> HashCoordinator<R> {
    pub fn new(rpc: R, config: &WorkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: SessionRegistry::new(rpc, config.retired_capacity),
            chunk_size: config.chunk_size,
        })
    }

    pub fn registry(&self) -> &SessionRegistry<R> {
        &self.registry
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Hashes `source` to its end using the configured chunk size.
    pub async fn compute_tree_streaming<S>(&self, source: S) -> Result<HashResult>
    where
        S: AsyncRead + Unpin,
    {
        self.compute_tree_streaming_with(source, self.chunk_size).await
    }

    /// Hashes `source` using `chunk_size` bytes per write.
    pub async fn compute_tree_streaming_with<S>(&self, mut source: S, chunk_size: usize) -> Result<HashResult>
    where
        S: AsyncRead + Unpin,
    {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(HashError::InvalidConfig(format!("chunk size {} out of range", chunk_size)));
        }

        let handle = self.registry.open().await?;
        let mut buf = vec![0u8; chunk_size];
        let mut read_total = 0u64;

        loop {
            let n = match fill_chunk(&mut source, &mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.abandon(handle).await;
                    return Err(e.into());
                }
            };
            // A failed append has already destroyed the session.
            self.registry.append(handle, &buf[..n]).await?;
            read_total += n as u64;
        }

        let result = self.registry.finalize(handle).await?;
        if result.length != read_total {
            return Err(HashError::LengthMismatch { read: read_total, hashed: result.length });
        }

        metrics::counter!("treehash_bytes_hashed_total", read_total);
        tracing::debug!(%handle, length = read_total, "Stream hashed");
        Ok(result)
    }

    /// Hashes a file already on disk without streaming it through the session cycle.
    pub async fn compute_tree_file(&self, path: impl AsRef<Path>) -> Result<HashResult> {
        let path = tokio::fs::canonicalize(path.as_ref()).await?;
        let result = self.registry.rpc().compute_file(&path).await?;

        metrics::increment_counter!("treehash_files_hashed_total");
        metrics::counter!("treehash_bytes_hashed_total", result.length);
        tracing::debug!(path = %path.display(), length = result.length, "File hashed");
        Ok(result)
    }

    async fn abandon(&self, handle: SessionHandle) {
        if let Err(e) = self.registry.abort(handle).await {
            tracing::warn!(%handle, "Aborting session failed: {}", e);
        }
    }
}

/// Reads until `buf` is full or the source ends. Returns the bytes read.
async fn fill_chunk<S: AsyncRead + Unpin>(source: &mut S, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Textual identifier of a finished root.
pub fn encode_identifier(root_hash: &[u8]) -> Result<String> {
    Ok(treehash_kernel::encode_identifier(root_hash)?)
}
