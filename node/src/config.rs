// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::HashError;

/// Chunk size used by streaming hashing when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Upper bound for a single `Write` payload.
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Name of the worker executable as built by this package.
pub const WORKER_BIN_NAME: &str = "treehash-worker";

#[cfg(feature = "embed-worker")]
pub static EMBEDDED_WORKER: &[u8] = include_bytes!(env!("TREEHASH_WORKER_BIN"));

/// Where the worker executable comes from.
#[derive(Clone)]
pub enum WorkerBinary {
    /// Executable image held in memory; written to a temporary file at startup.
    Embedded(Cow<'static, [u8]>),
    /// An executable already on disk.
    Path(PathBuf),
}

impl std::fmt::Debug for WorkerBinary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerBinary::Embedded(bytes) => write!(f, "Embedded({} bytes)", bytes.len()),
            WorkerBinary::Path(path) => write!(f, "Path({:?})", path),
        }
    }
}

impl Default for WorkerBinary {
    #[cfg(feature = "embed-worker")]
    fn default() -> Self {
        WorkerBinary::Embedded(Cow::Borrowed(EMBEDDED_WORKER))
    }

    #[cfg(not(feature = "embed-worker"))]
    fn default() -> Self {
        // Installed side by side with the host executable.
        let dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
            .unwrap_or_default();
        WorkerBinary::Path(dir.join(WORKER_BIN_NAME))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub binary: WorkerBinary,
    /// Arguments passed to the worker executable.
    pub worker_args: Vec<String>,
    /// Bytes per `Write` call when hashing a stream.
    pub chunk_size: usize,
    /// How long the worker may take to print its handshake.
    pub handshake_timeout: Duration,
    /// How long shutdown waits for the worker to exit before killing it.
    pub shutdown_grace: Duration,
    /// How many finished handles the registry remembers for diagnostics.
    pub retired_capacity: usize,
    /// Remove the worker on SIGINT/SIGTERM and exit the process.
    pub exit_on_signal: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary: WorkerBinary::default(),
            worker_args: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            handshake_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(2),
            retired_capacity: 4096,
            exit_on_signal: true,
        }
    }
}

impl WorkerConfig {
    pub fn with_binary(binary: WorkerBinary) -> Self {
        Self { binary, ..Self::default() }
    }

    pub fn validate(&self) -> Result<(), HashError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(HashError::InvalidConfig(format!(
                "chunk_size must be in 1..={}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        Ok(())
    }
}
