// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod config;
pub mod errors;
pub mod telemetry;
pub mod protocol;
pub mod transport;
pub mod registry;
pub mod coordinator;
pub mod worker;
pub mod supervisor;
pub mod service;

pub use config::{WorkerBinary, WorkerConfig};
pub use coordinator::{encode_identifier, HashCoordinator};
pub use errors::HashError;
pub use protocol::SessionHandle;
pub use registry::{SessionRegistry, SessionState};
pub use service::TreeHashService;
pub use transport::{RpcClient, WorkerRpc};
pub use treehash_kernel::HashResult;
