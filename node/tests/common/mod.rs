// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use treehash_kernel::HashResult;
use treehash_node::protocol::{Request, Response};
use treehash_node::worker::WorkerService;
use treehash_node::{HashError, SessionHandle, WorkerBinary, WorkerConfig, WorkerRpc};

pub fn worker_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_treehash-worker"))
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig::with_binary(WorkerBinary::Path(worker_path()))
}

pub fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// In-process worker that can be told to fail a given write or finalize.
pub struct FlakyWorker {
    inner: WorkerService,
    pub fail_write_at: Option<usize>,
    pub fail_finalize: bool,
    pub writes: AtomicUsize,
    pub destroys: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FlakyWorker {
    pub fn new() -> Self {
        Self {
            inner: WorkerService::new(),
            fail_write_at: None,
            fail_finalize: false,
            writes: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_write(n: usize) -> Self {
        Self { fail_write_at: Some(n), ..Self::new() }
    }

    pub fn failing_finalize() -> Self {
        Self { fail_finalize: true, ..Self::new() }
    }

    pub fn live_sessions(&self) -> usize {
        self.inner.session_count()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WorkerRpc for FlakyWorker {
    async fn init(&self) -> Result<SessionHandle, HashError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.handle(Request::Init).await {
            Response::Opened(handle) => Ok(handle),
            other => Err(HashError::Transport(format!("{:?}", other))),
        }
    }

    async fn write(&self, handle: SessionHandle, data: &[u8]) -> Result<(), HashError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_write_at == Some(n) {
            return Err(HashError::Write { handle, message: "injected write failure".to_string() });
        }
        match self.inner.handle(Request::Write { handle, data: data.to_vec() }).await {
            Response::Written => Ok(()),
            other => Err(HashError::Write { handle, message: format!("{:?}", other) }),
        }
    }

    async fn finalize(&self, handle: SessionHandle) -> Result<HashResult, HashError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_finalize {
            return Err(HashError::Finalize { handle, message: "injected finalize failure".to_string() });
        }
        match self.inner.handle(Request::Finalize { handle }).await {
            Response::Finalized(result) => Ok(result),
            other => Err(HashError::Finalize { handle, message: format!("{:?}", other) }),
        }
    }

    async fn destroy(&self, handle: SessionHandle) -> Result<(), HashError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.destroys.fetch_add(1, Ordering::SeqCst);
        match self.inner.handle(Request::Destroy { handle }).await {
            Response::Destroyed => Ok(()),
            other => Err(HashError::Worker { op: "destroy", message: format!("{:?}", other) }),
        }
    }

    async fn compute_file(&self, path: &std::path::Path) -> Result<HashResult, HashError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = path.to_string_lossy().into_owned();
        match self.inner.handle(Request::ComputeFile { path }).await {
            Response::Computed(result) => Ok(result),
            other => Err(HashError::Worker { op: "compute_file", message: format!("{:?}", other) }),
        }
    }
}
