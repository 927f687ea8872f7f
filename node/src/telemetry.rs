// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::sync::OnceLock;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Tracing (logs). Worker output arrives under the `treehash_worker` target.
    let installed = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "treehash_node=info,treehash_worker=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }

    // 2. Metrics (Prometheus)
    if PROM_HANDLE.get().is_some() {
        tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROM_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::warn!("Failed to install Prometheus recorder: {}", e);
            return;
        }
    }

    metrics::describe_counter!("treehash_sessions_opened_total", "Streaming sessions opened on the worker");
    metrics::describe_counter!("treehash_sessions_finalized_total", "Streaming sessions finalized");
    metrics::describe_counter!("treehash_sessions_destroyed_total", "Streaming sessions aborted or destroyed after a failure");
    metrics::describe_counter!("treehash_files_hashed_total", "Files hashed through the worker's file path");
    metrics::describe_counter!("treehash_bytes_hashed_total", "Bytes hashed by either path");
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
