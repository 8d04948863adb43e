//! Tally node runtime
//!
//! Opens the ledger, runs the distribution sweep and periodic snapshots as
//! background tasks, and writes a final snapshot on shutdown.

use crate::config::NodeConfig;
use crate::service::{LedgerService, Origin};

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_core::{Clock, SystemClock};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Node state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Ledger opened, tasks not yet running
    Starting,
    /// Background tasks running
    Running,
    /// Shutting down
    Stopping,
    /// Stopped; final snapshot written
    Stopped,
}

/// Tally ledger node
pub struct TallyNode {
    /// Configuration
    config: NodeConfig,
    /// Shared ledger
    service: Arc<LedgerService>,
    /// How the ledger was opened
    origin: Origin,
    /// Node state
    state: Arc<RwLock<NodeState>>,
    /// Stops an in-flight sweep between positions
    cancel: Arc<AtomicBool>,
    /// One shutdown channel per background task
    shutdown_txs: Vec<mpsc::Sender<()>>,
    /// Background task handles
    handles: Vec<JoinHandle<()>>,
}

impl TallyNode {
    /// Open the ledger with the system clock
    pub async fn new(config: NodeConfig) -> anyhow::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Open the ledger: restore the snapshot file, or mint genesis and write
    /// the first snapshot. A snapshot that fails validation aborts start-up.
    pub async fn with_clock(config: NodeConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        config.validate()?;
        let path = config.snapshot_path();

        let open_config = config.clone();
        let (service, origin) =
            tokio::task::spawn_blocking(move || LedgerService::open(&open_config, clock))
                .await?
                .map_err(|e| anyhow::anyhow!("Failed to open ledger at {}: {}", path.display(), e))?;
        let service = Arc::new(service);

        if matches!(origin, Origin::Genesis { .. }) {
            let writer = service.clone();
            let path = config.snapshot_path();
            tokio::task::spawn_blocking(move || writer.save(&path)).await??;
        }

        Ok(Self {
            config,
            service,
            origin,
            state: Arc::new(RwLock::new(NodeState::Starting)),
            cancel: Arc::new(AtomicBool::new(false)),
            shutdown_txs: Vec::new(),
            handles: Vec::new(),
        })
    }

    /// Get node state
    pub fn state(&self) -> NodeState {
        self.state.read().clone()
    }

    /// Shared ledger handle
    pub fn service(&self) -> Arc<LedgerService> {
        self.service.clone()
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.config.snapshot_path()
    }

    /// Run until Ctrl-C or SIGTERM
    pub async fn run(&mut self) -> anyhow::Result<()> {
        tracing::info!("Starting Tally node...");
        self.start();
        self.print_startup_banner();

        self.wait_for_shutdown().await;

        self.shutdown().await
    }

    /// Spawn the background tasks
    pub fn start(&mut self) {
        *self.state.write() = NodeState::Starting;
        self.cancel.store(false, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel(1);
        self.shutdown_txs.push(tx);
        self.handles.push(tokio::spawn(distribution_loop(
            self.service.clone(),
            self.cancel.clone(),
            Duration::from_secs(self.config.staking.sweep_check_secs),
            rx,
        )));

        let (tx, rx) = mpsc::channel(1);
        self.shutdown_txs.push(tx);
        self.handles.push(tokio::spawn(snapshot_loop(
            self.service.clone(),
            self.config.snapshot_path(),
            Duration::from_secs(self.config.snapshot.interval_secs),
            rx,
        )));

        *self.state.write() = NodeState::Running;
    }

    /// Stop the background tasks and write a final snapshot
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        *self.state.write() = NodeState::Stopping;
        tracing::info!("Shutting down...");

        self.cancel.store(true, Ordering::Relaxed);
        for tx in self.shutdown_txs.drain(..) {
            let _ = tx.send(()).await;
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }

        let service = self.service.clone();
        let path = self.config.snapshot_path();
        tokio::task::spawn_blocking(move || service.save(&path)).await??;

        *self.state.write() = NodeState::Stopped;
        tracing::info!("Node stopped");
        Ok(())
    }

    fn print_startup_banner(&self) {
        tracing::info!("Tally node {} is running", self.config.node.name);
        match &self.origin {
            Origin::Restored { sequence } => {
                tracing::info!("Ledger restored at sequence {}", sequence)
            }
            Origin::Genesis { allocations } => {
                tracing::info!("Fresh ledger with {} genesis allocations", allocations)
            }
        }
        tracing::info!("Snapshot: {}", self.config.snapshot_path().display());
        tracing::info!(
            "Distribution interval: {}s (checked every {}s)",
            self.config.staking.distribution_interval_secs,
            self.config.staking.sweep_check_secs
        );
        tracing::info!("Press Ctrl+C to stop the node");
    }

    /// Wait for shutdown signal
    async fn wait_for_shutdown(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }
}

/// Periodically pay due staking positions
async fn distribution_loop(
    service: Arc<LedgerService>,
    cancel: Arc<AtomicBool>,
    check_every: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!("Distribution loop received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(check_every) => {
                let service = service.clone();
                let cancel = cancel.clone();
                match tokio::task::spawn_blocking(move || service.run_distribution(&cancel)).await {
                    Ok(report) if report.examined > 0 => {
                        tracing::debug!(paid = report.paid, retired = report.retired, "Sweep done");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Distribution sweep panicked: {}", e),
                }
            }
        }
    }
}

/// Periodically write the snapshot file
async fn snapshot_loop(
    service: Arc<LedgerService>,
    path: PathBuf,
    every: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!("Snapshot loop received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(every) => {
                let service = service.clone();
                let path = path.clone();
                match tokio::task::spawn_blocking(move || service.save(&path)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("Periodic snapshot failed: {}", e),
                    Err(e) => tracing::error!("Periodic snapshot panicked: {}", e),
                }
            }
        }
    }
}

impl Drop for TallyNode {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node.data_dir = dir.path().display().to_string();
        config
    }

    #[tokio::test]
    async fn test_node_creation() {
        let temp_dir = TempDir::new().unwrap();
        let node = TallyNode::new(config(&temp_dir)).await.unwrap();

        assert_eq!(node.state(), NodeState::Starting);
        assert!(matches!(node.origin(), Origin::Genesis { allocations: 3 }));
        assert!(node.snapshot_path().exists());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let mut node = TallyNode::new(config(&temp_dir)).await.unwrap();

        node.start();
        assert_eq!(node.state(), NodeState::Running);
        node.shutdown().await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
    }
}
