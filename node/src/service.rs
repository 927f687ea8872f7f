// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The object collaborators hold: one worker, one coordinator over it.

use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncRead;
use treehash_kernel::HashResult;

use crate::config::WorkerConfig;
use crate::coordinator::{self, HashCoordinator};
use crate::errors::Result;
use crate::supervisor::WorkerSupervisor;
use crate::transport::RpcClient;

pub struct TreeHashService {
    supervisor: WorkerSupervisor,
    coordinator: HashCoordinator<Arc<RpcClient>>,
}

impl TreeHashService {
    /// Launches the worker. An error here means the host must not continue.
    pub async fn start(config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        let supervisor = WorkerSupervisor::launch(&config).await?;
        let coordinator = HashCoordinator::new(supervisor.client(), &config)?;
        Ok(Self { supervisor, coordinator })
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    pub fn coordinator(&self) -> &HashCoordinator<Arc<RpcClient>> {
        &self.coordinator
    }

    pub async fn compute_tree_streaming<S>(&self, source: S) -> Result<HashResult>
    where
        S: AsyncRead + Unpin,
    {
        self.coordinator.compute_tree_streaming(source).await
    }

    pub async fn compute_tree_file(&self, path: impl AsRef<Path>) -> Result<HashResult> {
        self.coordinator.compute_tree_file(path).await
    }

    pub fn encode_identifier(&self, root_hash: &[u8]) -> Result<String> {
        coordinator::encode_identifier(root_hash)
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
