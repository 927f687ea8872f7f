// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Worker process lifecycle.
//!
//! Launch: write the worker image to a temporary executable (or use a path),
//! spawn it with the handshake cookie in its environment, read its handshake
//! line. Any failure there is fatal and is returned as `HashError::Bootstrap`.
//!
//! Shutdown: close the request stream, wait briefly for the worker to exit,
//! kill it otherwise, remove the temporary executable. Cleanup errors are
//! logged only.
//!
//! Unless disabled in the config, SIGINT and SIGTERM are watched from launch
//! on: the worker is killed, its temporary executable removed, and the host
//! exits with the conventional `128 + signal` status.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use tempfile::TempPath;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use crate::config::{WorkerBinary, WorkerConfig};
use crate::errors::{HashError, Result};
use crate::protocol::{COOKIE_KEY, COOKIE_VALUE};
use crate::transport::RpcClient;

/// What must be cleaned up when the host is told to stop: the worker process
/// and its extracted executable. Shared with the signal watcher.
#[derive(Default)]
struct Lifecycle {
    child: tokio::sync::Mutex<Option<Child>>,
    executable: Mutex<Option<TempPath>>,
}

pub struct WorkerSupervisor {
    client: Arc<RpcClient>,
    lifecycle: Arc<Lifecycle>,
    pid: Option<u32>,
    stderr_task: JoinHandle<()>,
    shutdown_grace: Duration,
}

impl WorkerSupervisor {
    pub async fn launch(config: &WorkerConfig) -> Result<Self> {
        let lifecycle = Arc::new(Lifecycle::default());
        if config.exit_on_signal {
            watch_signals(&lifecycle);
        }

        let program = match &config.binary {
            WorkerBinary::Embedded(image) => {
                let temp = extract_executable(image)?;
                tracing::debug!(path = %temp.display(), bytes = image.len(), "Worker extracted");
                let program = temp.to_path_buf();
                *lifecycle.executable.lock().unwrap_or_else(PoisonError::into_inner) = Some(temp);
                program
            }
            WorkerBinary::Path(path) => path.clone(),
        };

        let mut child = Command::new(&program)
            .args(&config.worker_args)
            .env(COOKIE_KEY, COOKIE_VALUE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HashError::Bootstrap(format!("launching {}: {}", program.display(), e)))?;

        let pid = child.id();
        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => return Err(HashError::Bootstrap("worker pipes unavailable".to_string())),
        };
        let stderr_task = tokio::spawn(forward_stderr(stderr));

        let client = match tokio::time::timeout(config.handshake_timeout, RpcClient::connect(stdout, stdin)).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                abandon_child(&mut child).await;
                return Err(e);
            }
            Err(_) => {
                abandon_child(&mut child).await;
                return Err(HashError::Bootstrap(format!(
                    "no handshake from worker within {:?}",
                    config.handshake_timeout
                )));
            }
        };

        tracing::info!(?pid, program = %program.display(), "Worker started");
        *lifecycle.child.lock().await = Some(child);

        Ok(Self {
            client: Arc::new(client),
            lifecycle,
            pid,
            stderr_task,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn client(&self) -> Arc<RpcClient> {
        self.client.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Location of the extracted executable while it exists.
    pub fn executable_path(&self) -> Option<PathBuf> {
        self.lifecycle
            .executable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|p| p.to_path_buf())
    }

    /// Stops the worker without the graceful close. In-flight calls fail with a transport error.
    pub async fn kill(&self) {
        if let Some(child) = self.lifecycle.child.lock().await.as_mut() {
            if let Err(e) = child.kill().await {
                tracing::warn!("Killing worker failed: {}", e);
            }
        }
    }

    /// Idempotent.
    pub async fn shutdown(&self) {
        self.client.close().await;

        if let Some(mut child) = self.lifecycle.child.lock().await.take() {
            match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => tracing::info!(%status, "Worker exited"),
                Ok(Err(e)) => tracing::warn!("Waiting for worker failed: {}", e),
                Err(_) => {
                    tracing::warn!("Worker still running after {:?}, killing it", self.shutdown_grace);
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Killing worker failed: {}", e);
                    }
                }
            }
        }

        self.lifecycle.remove_executable();
    }
}

impl Lifecycle {
    /// Signal path: no waiting, the host is about to exit.
    fn abandon(&self) {
        match self.child.try_lock() {
            Ok(mut child) => {
                if let Some(child) = child.as_mut() {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!("Killing worker on signal failed: {}", e);
                    }
                }
            }
            // A shutdown in progress owns the child; the worker sees our
            // pipes close when we exit.
            Err(_) => tracing::debug!("Worker busy shutting down, leaving it to exit on EOF"),
        }
        self.remove_executable();
    }

    fn remove_executable(&self) {
        let temp = self.executable.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(temp) = temp {
            let path = temp.to_path_buf();
            match temp.close() {
                Ok(()) => tracing::debug!(path = %path.display(), "Worker executable removed"),
                Err(e) => tracing::warn!(path = %path.display(), "Removing worker executable failed: {}", e),
            }
        }
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        self.stderr_task.abort();
    }
}

/// Supervisors the signal watcher cleans up after. Dead entries are pruned
/// on every registration.
static SUPERVISED: Mutex<Vec<Weak<Lifecycle>>> = Mutex::new(Vec::new());
static SIGNAL_WATCHER: OnceLock<bool> = OnceLock::new();

/// Registers `lifecycle` for cleanup on SIGINT/SIGTERM, starting the
/// process-wide watcher on first use.
///
/// Installing a handler replaces the default action for these signals, so
/// once the watcher runs it always ends the process itself, with the status
/// the default action would have produced.
fn watch_signals(lifecycle: &Arc<Lifecycle>) {
    let installed = *SIGNAL_WATCHER.get_or_init(|| match start_signal_watcher() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Signal handlers unavailable, no worker cleanup on signal: {}", e);
            false
        }
    });
    if !installed {
        return;
    }

    let mut supervised = SUPERVISED.lock().unwrap_or_else(PoisonError::into_inner);
    supervised.retain(|weak| weak.strong_count() > 0);
    supervised.push(Arc::downgrade(lifecycle));
}

/// The watcher owns its own runtime so it outlives whichever runtime the
/// supervisors were launched on.
fn start_signal_watcher() -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    // Listeners are registered here, before we return, so no later signal is missed.
    let mut signals = {
        let _guard = runtime.enter();
        ShutdownSignals::install()?
    };

    std::thread::Builder::new()
        .name("treehash-signals".to_string())
        .spawn(move || {
            let (signal, code) = runtime.block_on(signals.recv());
            tracing::info!(signal, "Shutdown signal received, removing worker");

            let supervised = std::mem::take(&mut *SUPERVISED.lock().unwrap_or_else(PoisonError::into_inner));
            for lifecycle in supervised.iter().filter_map(Weak::upgrade) {
                lifecycle.abandon();
            }
            std::process::exit(code);
        })?;
    Ok(())
}

async fn abandon_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!("Killing worker after failed start: {}", e);
    }
}

/// Relays worker log lines into our own log.
async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(target: "treehash_worker", "{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Worker stderr closed: {}", e);
                break;
            }
        }
    }
}

/// Interrupt and termination listeners, registered as soon as this is built
/// so no signal delivered afterwards is missed.
pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Waits for the next signal. Returns its name and the exit status a
    /// process killed by it would report.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> (&'static str, i32) {
        tokio::select! {
            _ = self.interrupt.recv() => ("interrupt", 130),
            _ = self.terminate.recv() => ("terminate", 143),
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> (&'static str, i32) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ("interrupt", 130),
            Err(e) => {
                tracing::warn!("Signal handling failed: {}", e);
                std::future::pending().await
            }
        }
    }
}
