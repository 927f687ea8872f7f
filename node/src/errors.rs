// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use thiserror::Error;
use treehash_kernel::CodecError;

use crate::protocol::SessionHandle;

#[derive(Error, Debug)]
pub enum HashError {
    /// Extracting, launching or handshaking the worker failed. Fatal at startup.
    #[error("Worker bootstrap failed: {0}")]
    Bootstrap(String),
    /// Connection lost or a response could not be decoded.
    #[error("Transport failure: {0}")]
    Transport(String),
    /// The handle is unknown or no longer active. No worker call was made.
    #[error("Invalid session: {0}")]
    InvalidSession(SessionHandle),
    #[error("Write to session {handle} failed: {message}")]
    Write { handle: SessionHandle, message: String },
    #[error("Finalize of session {handle} failed: {message}")]
    Finalize { handle: SessionHandle, message: String },
    /// Worker-reported failure of `init`, `destroy` or `compute_file`.
    #[error("Worker rejected {op}: {message}")]
    Worker { op: &'static str, message: String },
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Length mismatch: read {read} bytes but worker hashed {hashed}")]
    LengthMismatch { read: u64, hashed: u64 },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HashError {
    pub fn is_transport(&self) -> bool {
        matches!(self, HashError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, HashError>;
