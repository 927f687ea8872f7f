// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Worker side: the session table and the request loop run by `treehash-worker`.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use treehash_kernel::tree::{encode_file, TreeEncoder};
use treehash_kernel::TreeError;

use crate::protocol::{
    check_cookie, decode_frame, encode_frame, frame_codec, Envelope, FaultKind, Handshake, Request, Response,
    SessionHandle, WorkerFault, COOKIE_KEY, MAX_FRAME_LEN,
};

type Session = Arc<Mutex<TreeEncoder>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fault_from(e: TreeError) -> WorkerFault {
    match e {
        TreeError::Io(e) => WorkerFault::new(FaultKind::Io, e.to_string()),
        other => WorkerFault::new(FaultKind::Internal, other.to_string()),
    }
}

fn unknown(handle: SessionHandle) -> Response {
    Response::Fault(WorkerFault::new(FaultKind::UnknownHandle, format!("unknown session {}", handle)))
}

#[derive(Debug)]
pub struct WorkerService {
    next_handle: AtomicU32,
    sessions: Mutex<HashMap<SessionHandle, Session>>,
}

impl Default for WorkerService {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerService {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    fn session(&self, handle: SessionHandle) -> Option<Session> {
        lock(&self.sessions).get(&handle).cloned()
    }

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Init => {
                let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
                lock(&self.sessions).insert(handle, Arc::new(Mutex::new(TreeEncoder::new())));
                tracing::debug!(%handle, "Session created");
                Response::Opened(handle)
            }
            Request::Write { handle, data } => {
                let Some(session) = self.session(handle) else {
                    return unknown(handle);
                };
                let written = lock(&session).update(&data);
                match written {
                    Ok(()) => Response::Written,
                    Err(e) => Response::Fault(fault_from(e)),
                }
            }
            Request::Finalize { handle } => {
                let Some(session) = lock(&self.sessions).remove(&handle) else {
                    return unknown(handle);
                };
                let encoder = std::mem::take(&mut *lock(&session));
                match encoder.finalize() {
                    Ok(result) => {
                        tracing::debug!(%handle, length = result.length, "Session finalized");
                        Response::Finalized(result)
                    }
                    Err(e) => Response::Fault(fault_from(e)),
                }
            }
            Request::Destroy { handle } => match lock(&self.sessions).remove(&handle) {
                Some(_) => {
                    tracing::debug!(%handle, "Session destroyed");
                    Response::Destroyed
                }
                None => unknown(handle),
            },
            Request::ComputeFile { path } => {
                let hashed = tokio::task::spawn_blocking(move || encode_file(&path)).await;
                match hashed {
                    Ok(Ok(result)) => Response::Computed(result),
                    Ok(Err(e)) => Response::Fault(fault_from(e)),
                    Err(e) => Response::Fault(WorkerFault::new(FaultKind::Internal, e.to_string())),
                }
            }
        }
    }
}

/// Announces the protocol on `writer`, then serves requests until `reader` ends.
pub async fn serve_with_handshake<R, W>(service: Arc<WorkerService>, reader: R, mut writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    writer.write_all(Handshake::current().to_line().as_bytes()).await?;
    writer.flush().await?;
    serve(service, reader, writer).await
}

/// Encodes a response, replacing it with an `Internal` fault for the same id
/// when it would not fit in one frame.
fn encode_response(envelope: &Envelope<Response>, limit: usize) -> io::Result<Bytes> {
    let frame = encode_frame(envelope).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    if frame.len() <= limit {
        return Ok(frame);
    }

    tracing::warn!(id = envelope.id, bytes = frame.len(), "Response exceeds the frame limit");
    let fault = Envelope {
        id: envelope.id,
        body: Response::Fault(WorkerFault::new(
            FaultKind::Internal,
            format!("response of {} bytes exceeds the {} byte frame limit", frame.len(), limit),
        )),
    };
    encode_frame(&fault).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

/// Request loop. Every request runs in its own task; responses are written
/// as they complete, tagged with the id of the request they answer.
///
/// If the response writer fails the loop stops with its error, so the host
/// sees the connection close instead of waiting on answers that never come.
pub async fn serve<R, W>(service: Arc<WorkerService>, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut frames = FramedRead::new(reader, frame_codec());
    let (tx, mut rx) = mpsc::channel::<Envelope<Response>>(64);

    let mut writer_task = tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, frame_codec());
        while let Some(envelope) = rx.recv().await {
            let frame = encode_response(&envelope, MAX_FRAME_LEN)?;
            sink.send(frame).await?;
        }
        SinkExt::<Bytes>::close(&mut sink).await
    });

    loop {
        let frame = tokio::select! {
            frame = frames.next() => frame,
            finished = &mut writer_task => {
                let err = match finished {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => io::Error::new(io::ErrorKind::BrokenPipe, "response writer stopped"),
                    Err(e) => io::Error::new(io::ErrorKind::Other, e.to_string()),
                };
                tracing::error!("Response writer failed: {}", err);
                return Err(err);
            }
        };
        let Some(frame) = frame else { break };

        let frame = frame?;
        let envelope: Envelope<Request> = decode_frame(&frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let service = service.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let id = envelope.id;
            let body = service.handle(envelope.body).await;
            if tx.send(Envelope { id, body }).await.is_err() {
                tracing::debug!(id, "Response dropped, writer has stopped");
            }
        });
    }

    tracing::debug!("Host closed the request stream");
    drop(tx);
    writer_task
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
}

/// Logging for a worker process: stdout carries the RPC stream, so logs go
/// to stderr where the host picks them up.
pub fn init_logging() {
    let installed = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "treehash_node=info,treehash_worker=info".into()),
        ))
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Runs this process as a worker on stdin/stdout. Returns the exit code.
pub async fn run_stdio() -> i32 {
    if let Err(reason) = check_cookie(std::env::var(COOKIE_KEY).ok().as_deref()) {
        eprintln!("{}", reason);
        return 1;
    }

    let service = Arc::new(WorkerService::new());
    let serving = serve_with_handshake(service, tokio::io::stdin(), tokio::io::stdout());

    tokio::select! {
        res = serving => match res {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!("Request loop failed: {}", e);
                1
            }
        },
        _ = terminated() => {
            tracing::info!("Termination signal received, shutting down");
            0
        }
    }
}

#[cfg(unix)]
async fn terminated() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            tracing::warn!("Could not install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminated() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let service = WorkerService::new();

        let Response::Opened(handle) = service.handle(Request::Init).await else {
            panic!("expected a handle");
        };
        assert_eq!(service.session_count(), 1);

        let resp = service.handle(Request::Write { handle, data: b"abc".to_vec() }).await;
        assert_eq!(resp, Response::Written);

        let Response::Finalized(result) = service.handle(Request::Finalize { handle }).await else {
            panic!("expected a result");
        };
        assert_eq!(result, treehash_kernel::tree::encode_bytes(b"abc"));
        assert_eq!(service.session_count(), 0);

        // Finalize retires the session on the worker as well.
        let resp = service.handle(Request::Destroy { handle }).await;
        assert!(matches!(resp, Response::Fault(WorkerFault { kind: FaultKind::UnknownHandle, .. })));
    }

    #[tokio::test]
    async fn test_handles_are_unique() {
        let service = WorkerService::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let Response::Opened(handle) = service.handle(Request::Init).await else {
                panic!("expected a handle");
            };
            assert!(seen.insert(handle));
            service.handle(Request::Destroy { handle }).await;
        }
        assert_eq!(service.session_count(), 0);
    }

    #[tokio::test]
    async fn test_compute_missing_file_is_io_fault() {
        let service = WorkerService::new();
        let resp = service
            .handle(Request::ComputeFile { path: "/nonexistent/treehash/input".to_string() })
            .await;
        assert!(matches!(resp, Response::Fault(WorkerFault { kind: FaultKind::Io, .. })));
    }

    #[test]
    fn test_oversized_response_becomes_fault() {
        let envelope = Envelope {
            id: 9,
            body: Response::Finalized(treehash_kernel::tree::encode_bytes(&[7u8; 20_000])),
        };

        let frame = encode_response(&envelope, 256).unwrap();
        let back: Envelope<Response> = decode_frame(&frame).unwrap();
        assert_eq!(back.id, 9);
        assert!(matches!(back.body, Response::Fault(WorkerFault { kind: FaultKind::Internal, .. })));

        let frame = encode_response(&envelope, MAX_FRAME_LEN).unwrap();
        assert_eq!(decode_frame::<Response>(&frame).unwrap(), envelope);
    }

    /// Accepts `remaining` bytes, then every write fails.
    struct BrokenPipeAfter {
        remaining: usize,
    }

    impl AsyncWrite for BrokenPipeAfter {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            if self.remaining == 0 {
                return std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "host went away")));
            }
            let n = buf.len().min(self.remaining);
            self.remaining -= n;
            std::task::Poll::Ready(Ok(n))
        }

        fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_writer_failure_stops_serving() {
        let (host, worker) = tokio::io::duplex(4096);
        let writer = BrokenPipeAfter { remaining: Handshake::current().to_line().len() };
        let serving = tokio::spawn(serve_with_handshake(Arc::new(WorkerService::new()), worker, writer));

        // The request side stays open; only the response side is broken.
        let mut requests = FramedWrite::new(host, frame_codec());
        let frame = encode_frame(&Envelope { id: 1, body: Request::Init }).unwrap();
        requests.send(frame).await.unwrap();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), serving)
            .await
            .expect("serve must stop once responses cannot be written")
            .unwrap();
        assert_eq!(outcome.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
