//! Private async runtime backing network stores

use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tracing::info;
use xccl_core::{Error, Result};

/// Tokio runtime owned by a single store
///
/// Store operations are blocking calls; this runtime drives the async
/// socket work behind them. Dropping it stops every task the store spawned,
/// which closes any listening socket.
pub struct StoreRuntime {
    /// Tokio runtime; taken on drop
    runtime: Option<Runtime>,

    /// Grace period for tasks on drop
    shutdown_timeout: Duration,
}

impl StoreRuntime {
    /// Create a new runtime with `io_threads` worker threads
    pub fn new(io_threads: usize, shutdown_timeout: Duration) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(io_threads.max(1))
            .enable_all()
            .thread_name("xccl-store")
            .build()
            .map_err(|e| Error::Internal {
                message: format!("Failed to build Tokio runtime: {}", e),
            })?;

        Ok(Self {
            runtime: Some(runtime),
            shutdown_timeout,
        })
    }

    /// Block on a future until completion
    ///
    /// Must not be called from within another Tokio runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        match &self.runtime {
            Some(runtime) => runtime.block_on(future),
            // Only `drop` takes the runtime
            None => unreachable!("store runtime used after shutdown"),
        }
    }
}

impl Drop for StoreRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.shutdown_timeout);
            info!("Store runtime shut down");
        }
    }
}
