// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
mod common;

use std::io::Write;

use common::{sample, worker_config};
use tempfile::NamedTempFile;
use treehash_kernel::config::EMPTY_ROOT_HEX;
use treehash_kernel::tree::encode_bytes;
use treehash_kernel::{decode_identifier, ContentIdentifier};
use treehash_node::TreeHashService;

fn write_temp(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn test_stream_matches_file_mode() {
    let service = TreeHashService::start(worker_config()).await.unwrap();
    let data = vec![0x41u8; 10_000];
    let file = write_temp(&data);

    let streamed = service
        .coordinator()
        .compute_tree_streaming_with(&data[..], 512)
        .await
        .unwrap();
    let mapped = service.compute_tree_file(file.path()).await.unwrap();

    assert_eq!(streamed, mapped);
    assert_eq!(streamed.length, 10_000);
    assert_eq!(streamed, encode_bytes(&data));

    service.shutdown().await;
}

#[tokio::test]
async fn test_chunk_size_independence() {
    let service = TreeHashService::start(worker_config()).await.unwrap();
    let coord = service.coordinator();

    let small = sample(2_000);
    let by_byte = coord.compute_tree_streaming_with(&small[..], 1).await.unwrap();
    assert_eq!(by_byte, encode_bytes(&small));

    let data = sample(200_000);
    let reference = coord.compute_tree_streaming_with(&data[..], 512).await.unwrap();
    for chunk in [7usize, 1024, 65536] {
        let result = coord.compute_tree_streaming_with(&data[..], chunk).await.unwrap();
        assert_eq!(result, reference, "chunk size {}", chunk);
    }
    assert_eq!(reference.length, data.len() as u64);

    service.shutdown().await;
}

#[tokio::test]
async fn test_empty_input() {
    let service = TreeHashService::start(worker_config()).await.unwrap();

    let result = service.compute_tree_streaming(&b""[..]).await.unwrap();
    assert_eq!(hex::encode(result.root_hash), EMPTY_ROOT_HEX);
    assert_eq!(result.length, 0);
    assert_eq!(result.proof, vec![0u8; 8]);
    assert!(result.verify_content(b"").is_ok());

    let file = write_temp(b"");
    let mapped = service.compute_tree_file(file.path()).await.unwrap();
    assert_eq!(mapped, result);

    service.shutdown().await;
}

#[tokio::test]
async fn test_proof_verifies_streamed_content() {
    let service = TreeHashService::start(worker_config()).await.unwrap();
    let data = sample(100_000);

    let result = service.compute_tree_streaming(&data[..]).await.unwrap();
    result.check().unwrap();
    assert_eq!(result.declared_length().unwrap(), 100_000);
    assert!(result.verify_content(&data).is_ok());

    let mut tampered = data.clone();
    tampered[50_000] ^= 1;
    assert!(result.verify_content(&tampered).is_err());

    service.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_mix() {
    let service = TreeHashService::start(worker_config()).await.unwrap();
    let registry = service.coordinator().registry();

    let a = sample(5_000);
    let b: Vec<u8> = sample(7_000).into_iter().map(|x| x ^ 0xff).collect();

    let ha = registry.open().await.unwrap();
    let hb = registry.open().await.unwrap();
    assert_ne!(ha, hb);

    let mut ca = a.chunks(300);
    let mut cb = b.chunks(500);
    loop {
        let (na, nb) = (ca.next(), cb.next());
        if na.is_none() && nb.is_none() {
            break;
        }
        let (ra, rb) = tokio::join!(
            async {
                match na {
                    Some(chunk) => registry.append(ha, chunk).await,
                    None => Ok(()),
                }
            },
            async {
                match nb {
                    Some(chunk) => registry.append(hb, chunk).await,
                    None => Ok(()),
                }
            }
        );
        ra.unwrap();
        rb.unwrap();
    }

    let (ra, rb) = tokio::join!(registry.finalize(ha), registry.finalize(hb));
    assert_eq!(ra.unwrap(), encode_bytes(&a));
    assert_eq!(rb.unwrap(), encode_bytes(&b));
    assert_eq!(registry.active_count(), 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_parallel_streams_share_one_worker() {
    let service = TreeHashService::start(worker_config()).await.unwrap();
    let inputs: Vec<Vec<u8>> = (1..=8).map(|i| sample(i * 3_001)).collect();

    let results = futures::future::join_all(
        inputs
            .iter()
            .map(|data| service.compute_tree_streaming(&data[..])),
    )
    .await;

    for (data, result) in inputs.iter().zip(results) {
        assert_eq!(result.unwrap(), encode_bytes(data));
    }

    service.shutdown().await;
}

#[tokio::test]
async fn test_identifier_of_streamed_root() {
    let service = TreeHashService::start(worker_config()).await.unwrap();
    let data = b"hello tree";

    let result = service.compute_tree_streaming(&data[..]).await.unwrap();
    let id = service.encode_identifier(&result.root_hash).unwrap();

    assert!(id.starts_with('z'));
    assert_eq!(decode_identifier(&id).unwrap(), result.root_hash);
    assert_eq!(id, result.identifier().to_string());
    assert_eq!(id.parse::<ContentIdentifier>().unwrap().root(), &result.root_hash);

    assert!(service.encode_identifier(&[0u8; 31]).is_err());

    service.shutdown().await;
}

#[tokio::test]
async fn test_missing_file_is_an_error() {
    let service = TreeHashService::start(worker_config()).await.unwrap();
    assert!(service.compute_tree_file("/nonexistent/treehash/input").await.is_err());
    service.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_device_file_is_hashed_by_reading() {
    let service = TreeHashService::start(worker_config()).await.unwrap();
    let result = service.compute_tree_file("/dev/null").await.unwrap();
    assert_eq!(hex::encode(result.root_hash), EMPTY_ROOT_HEX);
    service.shutdown().await;
}
