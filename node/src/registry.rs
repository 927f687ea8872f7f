// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Host-side mirror of the worker's session table.
//!
//! A handle is `Active` from `open` until it is finalized or destroyed; both
//! are terminal. Any failed worker call retires the handle and issues a
//! `Destroy`, so the worker never keeps a session the host can no longer reach.
//! A handle is driven by one caller at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use treehash_kernel::HashResult;

use crate::errors::{HashError, Result};
use crate::protocol::SessionHandle;
use crate::transport::WorkerRpc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active { bytes_written: u64 },
    Finalized,
    Destroyed,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }
}

struct Table {
    sessions: HashMap<SessionHandle, SessionState>,
    /// Terminal handles, oldest first. Bounded by `retired_capacity`.
    retired: VecDeque<SessionHandle>,
    retired_capacity: usize,
}

impl Table {
    fn retire(&mut self, handle: SessionHandle, state: SessionState) {
        self.sessions.insert(handle, state);
        self.retired.push_back(handle);
        while self.retired.len() > self.retired_capacity {
            if let Some(old) = self.retired.pop_front() {
                // A wrapped-around handle may be active again under the same number.
                if self.sessions.get(&old).is_some_and(|s| !s.is_active()) {
                    self.sessions.remove(&old);
                }
            }
        }
    }
}

pub struct SessionRegistry<R> {
    rpc: R,
    table: Mutex<Table>,
}

impl<R: WorkerRpc> SessionRegistry<R> {
    pub fn new(rpc: R, retired_capacity: usize) -> Self {
        Self {
            rpc,
            table: Mutex::new(Table {
                sessions: HashMap::new(),
                retired: VecDeque::new(),
                retired_capacity,
            }),
        }
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state of `handle`, if it is still remembered.
    pub fn state(&self, handle: SessionHandle) -> Option<SessionState> {
        self.table().sessions.get(&handle).copied()
    }

    pub fn active_count(&self) -> usize {
        self.table().sessions.values().filter(|s| s.is_active()).count()
    }

    fn ensure_active(&self, handle: SessionHandle) -> Result<()> {
        match self.state(handle) {
            Some(SessionState::Active { .. }) => Ok(()),
            _ => Err(HashError::InvalidSession(handle)),
        }
    }

    pub async fn open(&self) -> Result<SessionHandle> {
        let handle = self.rpc.init().await?;
        let previous = self
            .table()
            .sessions
            .insert(handle, SessionState::Active { bytes_written: 0 });
        if let Some(SessionState::Active { .. }) = previous {
            tracing::error!(%handle, "Worker handed out a handle that is still active");
        }

        metrics::increment_counter!("treehash_sessions_opened_total");
        tracing::debug!(%handle, "Session opened");
        Ok(handle)
    }

    pub async fn append(&self, handle: SessionHandle, data: &[u8]) -> Result<()> {
        self.ensure_active(handle)?;

        match self.rpc.write(handle, data).await {
            Ok(()) => {
                if let Some(SessionState::Active { bytes_written }) = self.table().sessions.get_mut(&handle) {
                    *bytes_written += data.len() as u64;
                }
                Ok(())
            }
            Err(e) => {
                self.retire(handle, SessionState::Destroyed);
                self.cleanup(handle, &e).await;
                Err(e)
            }
        }
    }

    pub async fn finalize(&self, handle: SessionHandle) -> Result<HashResult> {
        self.ensure_active(handle)?;

        match self.rpc.finalize(handle).await {
            Ok(result) => {
                self.retire(handle, SessionState::Finalized);
                metrics::increment_counter!("treehash_sessions_finalized_total");
                tracing::debug!(%handle, length = result.length, "Session finalized");
                Ok(result)
            }
            Err(e) => {
                self.retire(handle, SessionState::Destroyed);
                self.cleanup(handle, &e).await;
                Err(e)
            }
        }
    }

    /// Abandons an active session. A second abort of the same handle is `InvalidSession`.
    pub async fn abort(&self, handle: SessionHandle) -> Result<()> {
        self.ensure_active(handle)?;
        self.retire(handle, SessionState::Destroyed);
        tracing::debug!(%handle, "Session aborted");
        self.rpc.destroy(handle).await
    }

    fn retire(&self, handle: SessionHandle, state: SessionState) {
        if state == SessionState::Destroyed {
            metrics::increment_counter!("treehash_sessions_destroyed_total");
        }
        self.table().retire(handle, state);
    }

    /// At-most-once destroy after a failed call. Never masks `cause`.
    async fn cleanup(&self, handle: SessionHandle, cause: &HashError) {
        tracing::warn!(%handle, "Session failed, destroying: {}", cause);
        if let Err(e) = self.rpc.destroy(handle).await {
            tracing::warn!(%handle, "Cleanup destroy failed: {}", e);
        }
    }
}
