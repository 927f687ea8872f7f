// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Host side of the worker connection.
//!
//! Requests from any number of tasks share one connection. Each request gets
//! a fresh envelope id and a oneshot waiter; a single reader task routes every
//! response to the waiter registered under its id.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use treehash_kernel::HashResult;

use crate::errors::{HashError, Result};
use crate::protocol::{decode_frame, encode_frame, frame_codec, Envelope, Handshake, Request, Response, SessionHandle};

/// The five worker operations. Implemented by [`RpcClient`]; tests substitute
/// their own implementations.
pub trait WorkerRpc: Send + Sync + 'static {
    fn init(&self) -> impl Future<Output = Result<SessionHandle>> + Send;

    fn write(&self, handle: SessionHandle, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    fn finalize(&self, handle: SessionHandle) -> impl Future<Output = Result<HashResult>> + Send;

    fn destroy(&self, handle: SessionHandle) -> impl Future<Output = Result<()>> + Send;

    fn compute_file(&self, path: &Path) -> impl Future<Output = Result<HashResult>> + Send;
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Default)]
struct Pending {
    waiters: HashMap<u64, oneshot::Sender<Response>>,
    /// Set once the reader task stops; every later call fails with this reason.
    closed: Option<String>,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RpcClient {
    next_id: AtomicU64,
    pending: Arc<Mutex<Pending>>,
    sink: tokio::sync::Mutex<Option<FramedWrite<BoxedWriter, LengthDelimitedCodec>>>,
    reader: JoinHandle<()>,
}

impl RpcClient {
    /// Reads and checks the worker's handshake line, then starts routing responses.
    pub async fn connect<R, W>(reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| HashError::Bootstrap(format!("reading handshake: {}", e)))?;
        if n == 0 {
            return Err(HashError::Bootstrap(
                "worker closed its output before the handshake".to_string(),
            ));
        }

        let handshake = Handshake::parse(&line).map_err(HashError::Bootstrap)?;
        handshake.check().map_err(HashError::Bootstrap)?;
        tracing::debug!(
            core = handshake.core_version,
            app = handshake.app_version,
            "Worker handshake accepted"
        );

        let pending = Arc::new(Mutex::new(Pending::default()));
        let frames = FramedRead::new(reader, frame_codec());
        let reader = tokio::spawn(read_loop(frames, pending.clone()));
        let writer: BoxedWriter = Box::new(writer);

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            sink: tokio::sync::Mutex::new(Some(FramedWrite::new(writer, frame_codec()))),
            reader,
        })
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.pending).closed.is_some()
    }

    /// Closes the request direction. The worker sees end-of-input and exits;
    /// calls still waiting fail once the reader observes the close.
    pub async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = SinkExt::<Bytes>::close(&mut sink).await {
                tracing::debug!("Closing worker input failed: {}", e);
            }
        }
    }

    fn closed_reason(&self) -> String {
        lock(&self.pending)
            .closed
            .clone()
            .unwrap_or_else(|| "worker connection closed".to_string())
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = request.op();
        let frame = encode_frame(&Envelope { id, body: request })
            .map_err(|e| HashError::Transport(format!("encoding {}: {}", op, e)))?;

        let rx = {
            let mut pending = lock(&self.pending);
            if let Some(reason) = &pending.closed {
                return Err(HashError::Transport(reason.clone()));
            }
            let (tx, rx) = oneshot::channel();
            pending.waiters.insert(id, tx);
            rx
        };

        let sent = {
            let mut sink = self.sink.lock().await;
            match sink.as_mut() {
                Some(sink) => sink.send(frame).await.map_err(|e| e.to_string()),
                None => Err("client is closed".to_string()),
            }
        };
        if let Err(reason) = sent {
            lock(&self.pending).waiters.remove(&id);
            return Err(HashError::Transport(format!("sending {}: {}", op, reason)));
        }

        rx.await.map_err(|_| HashError::Transport(self.closed_reason()))
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(mut frames: FramedRead<R, LengthDelimitedCodec>, pending: Arc<Mutex<Pending>>)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        match frames.next().await {
            Some(Ok(frame)) => match decode_frame::<Response>(&frame) {
                Ok(envelope) => {
                    let waiter = lock(&pending).waiters.remove(&envelope.id);
                    match waiter {
                        Some(tx) => {
                            // The caller may have gone away; nothing to do then.
                            let _ = tx.send(envelope.body);
                        }
                        None => tracing::warn!(id = envelope.id, "Response for unknown request dropped"),
                    }
                }
                // Without a decodable id the stream can no longer be trusted.
                Err(e) => break format!("malformed response: {}", e),
            },
            Some(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                break "worker closed the connection mid-frame".to_string()
            }
            Some(Err(e)) => break format!("reading from worker: {}", e),
            None => break "worker closed the connection".to_string(),
        }
    };

    tracing::warn!("Worker connection lost: {}", reason);
    let mut state = lock(&pending);
    state.closed = Some(reason);
    // Dropping the senders wakes every waiting caller.
    state.waiters.clear();
}

fn unexpected(op: &str, response: &Response) -> HashError {
    let got = match response {
        Response::Opened(_) => "opened",
        Response::Written => "written",
        Response::Finalized(_) => "finalized",
        Response::Destroyed => "destroyed",
        Response::Computed(_) => "computed",
        Response::Fault(_) => "fault",
    };
    HashError::Transport(format!("unexpected {} response to {}", got, op))
}

impl WorkerRpc for RpcClient {
    async fn init(&self) -> Result<SessionHandle> {
        match self.call(Request::Init).await? {
            Response::Opened(handle) => Ok(handle),
            Response::Fault(fault) => Err(HashError::Worker { op: "init", message: fault.to_string() }),
            other => Err(unexpected("init", &other)),
        }
    }

    async fn write(&self, handle: SessionHandle, data: &[u8]) -> Result<()> {
        let request = Request::Write { handle, data: data.to_vec() };
        match self.call(request).await? {
            Response::Written => Ok(()),
            Response::Fault(fault) => Err(HashError::Write { handle, message: fault.to_string() }),
            other => Err(unexpected("write", &other)),
        }
    }

    async fn finalize(&self, handle: SessionHandle) -> Result<HashResult> {
        match self.call(Request::Finalize { handle }).await? {
            Response::Finalized(result) => Ok(result),
            Response::Fault(fault) => Err(HashError::Finalize { handle, message: fault.to_string() }),
            other => Err(unexpected("finalize", &other)),
        }
    }

    async fn destroy(&self, handle: SessionHandle) -> Result<()> {
        match self.call(Request::Destroy { handle }).await? {
            Response::Destroyed => Ok(()),
            Response::Fault(fault) => Err(HashError::Worker { op: "destroy", message: fault.to_string() }),
            other => Err(unexpected("destroy", &other)),
        }
    }

    async fn compute_file(&self, path: &Path) -> Result<HashResult> {
        let path = path.to_str().ok_or_else(|| {
            HashError::Io(io::Error::new(io::ErrorKind::InvalidInput, "path is not valid UTF-8"))
        })?;
        match self.call(Request::ComputeFile { path: path.to_string() }).await? {
            Response::Computed(result) => Ok(result),
            Response::Fault(fault) => Err(HashError::Worker { op: "compute_file", message: fault.to_string() }),
            other => Err(unexpected("compute_file", &other)),
        }
    }
}

impl<T: WorkerRpc> WorkerRpc for Arc<T> {
    fn init(&self) -> impl Future<Output = Result<SessionHandle>> + Send {
        (**self).init()
    }

    fn write(&self, handle: SessionHandle, data: &[u8]) -> impl Future<Output = Result<()>> + Send {
        (**self).write(handle, data)
    }

    fn finalize(&self, handle: SessionHandle) -> impl Future<Output = Result<HashResult>> + Send {
        (**self).finalize(handle)
    }

    fn destroy(&self, handle: SessionHandle) -> impl Future<Output = Result<()>> + Send {
        (**self).destroy(handle)
    }

    fn compute_file(&self, path: &Path) -> impl Future<Output = Result<HashResult>> + Send {
        (**self).compute_file(path)
    }
}
