// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::path::{Path, PathBuf};

use anyhow::Context;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;
use treehash_kernel::HashResult;
use treehash_node::{TreeHashService, WorkerBinary, WorkerConfig};

#[derive(Debug, Clone)]
pub struct HashOptions {
    /// Push the input through a streaming session even when it is a file.
    pub stream: bool,
    pub chunk_size: Option<usize>,
    pub proof_out: Option<PathBuf>,
    /// Worker executable. Without one, this binary runs itself as the worker.
    pub worker: Option<PathBuf>,
    pub worker_args: Vec<String>,
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HashReport {
    pub source: String,
    pub mode: &'static str,
    pub identifier: String,
    pub root: String,
    pub length: u64,
    pub proof_bytes: usize,
}

impl HashReport {
    fn new(source: String, mode: &'static str, result: &HashResult, identifier: String) -> Self {
        Self {
            source,
            mode,
            identifier,
            root: hex::encode(result.root_hash),
            length: result.length,
            proof_bytes: result.proof.len(),
        }
    }
}

/// Arguments that make the `treehash` binary serve as its own worker.
pub const SELF_WORKER_ARGS: &[&str] = &["worker"];

pub fn worker_config(options: &HashOptions) -> anyhow::Result<WorkerConfig> {
    let mut config = match &options.worker {
        Some(path) => {
            let mut config = WorkerConfig::with_binary(WorkerBinary::Path(path.clone()));
            config.worker_args = options.worker_args.clone();
            config
        }
        None => {
            let exe = std::env::current_exe().context("locating the treehash executable")?;
            let mut config = WorkerConfig::with_binary(WorkerBinary::Path(exe));
            config.worker_args = SELF_WORKER_ARGS.iter().map(|a| a.to_string()).collect();
            config
        }
    };
    if let Some(chunk_size) = options.chunk_size {
        config.chunk_size = chunk_size;
    }
    Ok(config)
}

/// Hashes `input` (stdin when `None`) through a freshly started worker.
pub async fn run(input: Option<&Path>, options: &HashOptions) -> anyhow::Result<HashReport> {
    let service = TreeHashService::start(worker_config(options)?)
        .await
        .context("starting hash worker")?;

    let outcome = hash_with(&service, input, options).await;
    service.shutdown().await;
    let (result, report) = outcome?;

    if let Some(path) = &options.proof_out {
        std::fs::write(path, &result.proof)
            .with_context(|| format!("writing proof to {}", path.display()))?;
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(report)
}

async fn hash_with(
    service: &TreeHashService,
    input: Option<&Path>,
    options: &HashOptions,
) -> anyhow::Result<(HashResult, HashReport)> {
    let (result, source, mode) = match input {
        Some(path) if !options.stream => {
            let result = service.compute_tree_file(path).await?;
            (result, path.display().to_string(), "file")
        }
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            let result = service.compute_tree_streaming(file).await?;
            (result, path.display().to_string(), "stream")
        }
        None => {
            let result = service.compute_tree_streaming(tokio::io::stdin()).await?;
            (result, "<stdin>".to_string(), "stream")
        }
    };

    let identifier = service.encode_identifier(&result.root_hash)?;
    let report = HashReport::new(source, mode, &result, identifier);
    Ok((result, report))
}

fn print_report(report: &HashReport) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Field", "Value"]);

    table.add_row(vec!["Source", report.source.as_str()]);
    table.add_row(vec!["Mode", report.mode]);
    table.add_row(vec!["Identifier", report.identifier.as_str()]);
    table.add_row(vec!["Root", report.root.as_str()]);
    table.add_row(vec!["Length".to_string(), report.length.to_string()]);
    table.add_row(vec!["Proof".to_string(), format!("{} bytes", report.proof_bytes)]);

    println!("{table}");
}
