// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Host ⇄ worker wire protocol.
//!
//! The worker prints one handshake line on stdout, then both directions switch
//! to length-delimited frames. Each frame is a bincode-encoded [`Envelope`];
//! the envelope id correlates a response with its request.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;
use treehash_kernel::HashResult;

/// Version of the handshake and framing layer.
pub const CORE_PROTOCOL_VERSION: u32 = 1;
/// Version of the request/response vocabulary.
pub const APP_PROTOCOL_VERSION: u32 = 1;

/// Environment variable the worker expects to find set to [`COOKIE_VALUE`].
pub const COOKIE_KEY: &str = "TREEHASH_WORKER_COOKIE";
pub const COOKIE_VALUE: &str = "8f3c2a71e4b94d0c9a6e5b1f7d203c48";

pub const NETWORK: &str = "stdio";
pub const WIRE_FORMAT: &str = "bincode";

/// Largest accepted frame. A finalize response carries the whole outboard.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Worker-assigned identifier of one hashing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(pub u32);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Init,
    Write { handle: SessionHandle, data: Vec<u8> },
    Finalize { handle: SessionHandle },
    Destroy { handle: SessionHandle },
    ComputeFile { path: String },
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::Init => "init",
            Request::Write { .. } => "write",
            Request::Finalize { .. } => "finalize",
            Request::Destroy { .. } => "destroy",
            Request::ComputeFile { .. } => "compute_file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Opened(SessionHandle),
    Written,
    Finalized(HashResult),
    Destroyed,
    Computed(HashResult),
    Fault(WorkerFault),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    UnknownHandle,
    Io,
    Internal,
}

/// Error reported by the worker for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFault {
    pub kind: FaultKind,
    pub message: String,
}

impl WorkerFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for WorkerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    pub body: T,
}

pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub fn encode_frame<T: Serialize>(envelope: &Envelope<T>) -> Result<Bytes, bincode::error::EncodeError> {
    let bytes = bincode::serde::encode_to_vec(envelope, bincode::config::standard())?;
    Ok(Bytes::from(bytes))
}

pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<Envelope<T>, bincode::error::DecodeError> {
    Ok(bincode::serde::decode_from_slice(frame, bincode::config::standard())?.0)
}

/// The single line a worker prints before framing starts:
/// `CORE|APP|NETWORK|ADDRESS|WIRE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub core_version: u32,
    pub app_version: u32,
    pub network: String,
    pub address: String,
    pub wire: String,
}

impl Handshake {
    pub fn current() -> Self {
        Self {
            core_version: CORE_PROTOCOL_VERSION,
            app_version: APP_PROTOCOL_VERSION,
            network: NETWORK.to_string(),
            address: "-".to_string(),
            wire: WIRE_FORMAT.to_string(),
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}\n",
            self.core_version, self.app_version, self.network, self.address, self.wire
        )
    }

    pub fn parse(line: &str) -> Result<Self, String> {
        let parts: Vec<&str> = line.trim_end().split('|').collect();
        if parts.len() != 5 {
            return Err(format!("unrecognised handshake line {:?}", line.trim_end()));
        }
        let version = |s: &str, what: &str| {
            s.parse::<u32>()
                .map_err(|_| format!("invalid {} version {:?}", what, s))
        };
        Ok(Self {
            core_version: version(parts[0], "core protocol")?,
            app_version: version(parts[1], "app protocol")?,
            network: parts[2].to_string(),
            address: parts[3].to_string(),
            wire: parts[4].to_string(),
        })
    }

    /// Accepts only a worker speaking exactly this protocol.
    pub fn check(&self) -> Result<(), String> {
        if self.core_version != CORE_PROTOCOL_VERSION {
            return Err(format!(
                "core protocol version {} not supported (expected {})",
                self.core_version, CORE_PROTOCOL_VERSION
            ));
        }
        if self.app_version != APP_PROTOCOL_VERSION {
            return Err(format!(
                "app protocol version {} not supported (expected {})",
                self.app_version, APP_PROTOCOL_VERSION
            ));
        }
        if self.network != NETWORK || self.wire != WIRE_FORMAT {
            return Err(format!("unsupported transport {}/{}", self.network, self.wire));
        }
        Ok(())
    }
}

/// Worker-side check of the cookie the host put in the environment.
pub fn check_cookie(value: Option<&str>) -> Result<(), String> {
    match value {
        Some(v) if v == COOKIE_VALUE => Ok(()),
        Some(_) => Err(format!("{} does not match", COOKIE_KEY)),
        None => Err(format!(
            "{} is not set; this binary is a worker and is started by its host",
            COOKIE_KEY
        )),
    }
}
