// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::path::Path;
use std::sync::Arc;

use tokio::io::{duplex, split, AsyncWriteExt, DuplexStream};
use treehash_kernel::tree::encode_bytes;
use treehash_node::worker::{serve_with_handshake, WorkerService};
use treehash_node::{HashError, RpcClient, SessionHandle, WorkerRpc};

/// Runs a worker service on one end of an in-memory pipe and connects a client to the other.
async fn connected() -> (RpcClient, Arc<WorkerService>, tokio::task::JoinHandle<std::io::Result<()>>) {
    let (host, worker) = duplex(64 * 1024);
    let service = Arc::new(WorkerService::new());

    let (wr, ww) = split(worker);
    let server = tokio::spawn(serve_with_handshake(service.clone(), wr, ww));

    let (hr, hw) = split(host);
    let client = RpcClient::connect(hr, hw).await.unwrap();
    (client, service, server)
}

async fn client_after(line: &str) -> Result<RpcClient, HashError> {
    let (host, mut worker): (DuplexStream, DuplexStream) = duplex(1024);
    worker.write_all(line.as_bytes()).await.unwrap();
    let (hr, hw) = split(host);
    // Keep the worker end open until the handshake has been read.
    let result = RpcClient::connect(hr, hw).await;
    drop(worker);
    result
}

#[tokio::test]
async fn test_session_roundtrip() {
    let (client, service, _server) = connected().await;

    let handle = client.init().await.unwrap();
    client.write(handle, b"hello ").await.unwrap();
    client.write(handle, b"world").await.unwrap();
    let result = client.finalize(handle).await.unwrap();

    assert_eq!(result, encode_bytes(b"hello world"));
    assert_eq!(service.session_count(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
    let (client, _service, _server) = connected().await;
    let client = Arc::new(client);

    let mut tasks = Vec::new();
    for i in 0..16usize {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let data: Vec<u8> = (0..(i * 997 + 1)).map(|b| (b % 251) as u8).collect();
            let handle = client.init().await?;
            for chunk in data.chunks(128) {
                client.write(handle, chunk).await?;
            }
            let result = client.finalize(handle).await?;
            Ok::<_, HashError>((data, result))
        }));
    }

    for task in tasks {
        let (data, result) = task.await.unwrap().unwrap();
        assert_eq!(result, encode_bytes(&data));
    }
}

#[tokio::test]
async fn test_worker_faults_map_to_operation_errors() {
    let (client, _service, _server) = connected().await;
    let bogus = SessionHandle(424242);

    assert!(matches!(client.write(bogus, b"x").await, Err(HashError::Write { handle, .. }) if handle == bogus));
    assert!(matches!(client.finalize(bogus).await, Err(HashError::Finalize { .. })));
    assert!(matches!(client.destroy(bogus).await, Err(HashError::Worker { op: "destroy", .. })));
    assert!(matches!(
        client.compute_file(Path::new("/nonexistent/treehash/input")).await,
        Err(HashError::Worker { op: "compute_file", .. })
    ));

    // The connection survives request-level faults.
    let handle = client.init().await.unwrap();
    client.destroy(handle).await.unwrap();
}

#[tokio::test]
async fn test_closed_worker_fails_pending_and_later_calls() {
    let (client, _service, server) = connected().await;
    let handle = client.init().await.unwrap();

    client.close().await;
    server.await.unwrap().unwrap();

    let err = client.write(handle, b"late").await.unwrap_err();
    assert!(err.is_transport(), "got {:?}", err);

    for _ in 0..100 {
        if client.is_closed() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("client never noticed the closed connection");
}

#[tokio::test]
async fn test_worker_disappearing_is_transport_error() {
    let (host, worker) = duplex(1024);
    let (wr, mut ww) = split(worker);
    ww.write_all(b"1|1|stdio|-|bincode\n").await.unwrap();

    let (hr, hw) = split(host);
    let client = RpcClient::connect(hr, hw).await.unwrap();
    drop(wr);
    drop(ww);

    let err = client.init().await.unwrap_err();
    assert!(err.is_transport(), "got {:?}", err);
}

#[tokio::test]
async fn test_handshake_version_mismatch_is_bootstrap_error() {
    let err = client_after("2|1|stdio|-|bincode\n").await.err().unwrap();
    assert!(matches!(err, HashError::Bootstrap(ref m) if m.contains("core protocol")), "got {:?}", err);

    let err = client_after("1|7|stdio|-|bincode\n").await.err().unwrap();
    assert!(matches!(err, HashError::Bootstrap(ref m) if m.contains("app protocol")), "got {:?}", err);

    let err = client_after("1|1|tcp|127.0.0.1:1|grpc\n").await.err().unwrap();
    assert!(matches!(err, HashError::Bootstrap(_)));

    let err = client_after("hello\n").await.err().unwrap();
    assert!(matches!(err, HashError::Bootstrap(_)));
}

#[tokio::test]
async fn test_no_handshake_is_bootstrap_error() {
    let (host, worker) = duplex(1024);
    drop(worker);
    let (hr, hw) = split(host);
    let err = RpcClient::connect(hr, hw).await.err().unwrap();
    assert!(matches!(err, HashError::Bootstrap(_)));
}
