//! Daemon startup: state, capability files, local workers and the HTTP server.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use buildpool_scheduler::http::create_router;
use buildpool_scheduler::AppState;
use buildpool_worker::LocalWorker;

use crate::config::ServerConfig;
use crate::error::ServerError;

/// A started daemon. Dropping it disconnects its local workers.
pub struct Daemon {
    state: Arc<AppState>,
    workers: Vec<LocalWorker>,
    cap_files: Vec<PathBuf>,
}

impl Daemon {
    /// Create the pools, write capability files and join the local workers.
    pub async fn start(config: &ServerConfig) -> Result<Self, ServerError> {
        let state = AppState::new(&config.scheduler);
        info!(pools = ?state.scheduler.pool_names(), "Scheduler created");
        if config.scheduler.pools.is_empty() {
            warn!("No pools configured, every submission will be rejected");
        }

        let cap_files = state
            .write_capability_files(&config.scheduler.state_dir)
            .await?;

        let mut workers = Vec::new();
        for worker in config.resolved_workers()? {
            let name = worker.name.clone();
            let local = LocalWorker::connect(worker, &state.caps)
                .await
                .map_err(|source| ServerError::Worker { name, source })?;
            workers.push(local);
        }

        Ok(Self {
            state,
            workers,
            cap_files,
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn cap_files(&self) -> &[PathBuf] {
        &self.cap_files
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Serve HTTP on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = create_router(self.state.clone());
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "HTTP server listening");
        }
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;

        info!(workers = self.workers.len(), "Shutting down local workers");
        drop(self);
        Ok(())
    }
}

/// Bind the configured listen address.
pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    let bind_err = |source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    };
    let parsed: SocketAddr = addr
        .parse()
        .map_err(|e| bind_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
    TcpListener::bind(parsed).await.map_err(bind_err)
}
